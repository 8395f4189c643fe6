//! Catalog → clap command tree, and clap matches → invocation arguments.
//!
//! Every operation becomes a kebab-case subcommand. Path parameters are
//! positional, query and header parameters are `--<name>` options, and a
//! request body comes from `--json` or repeated `--field key=value`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command};
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{Map, Value};

use crate::audit::TracingAuditSink;
use crate::catalog::{OperationDescriptor, ParamLocation, ParamType, SchemaCatalog};
use crate::error::CliError;
use crate::invoke::{Arguments, BODY_ARGUMENT};
use crate::transport::TransportConfig;

/// Subcommand that prints the catalog instead of invoking anything.
pub const LIST_COMMAND: &str = "list";

/// Options that apply before the operation subcommand.
pub fn global_args() -> Vec<Arg> {
    vec![
        Arg::new("document")
            .long("document")
            .short('d')
            .env("OPENAPI_INVOKE_DOCUMENT")
            .required(true)
            .help("OpenAPI JSON document: file path or http(s) URL"),
        Arg::new("server-url")
            .long("server-url")
            .env("OPENAPI_INVOKE_SERVER_URL")
            .help("Override the document's server URL"),
        Arg::new("plugin")
            .long("plugin")
            .default_value("api")
            .help("Name to register the document under"),
        Arg::new("header")
            .long("header")
            .short('H')
            .action(ArgAction::Append)
            .help("Extra request header: 'Name: value' (repeatable)"),
        Arg::new("bearer")
            .long("bearer")
            .env("OPENAPI_INVOKE_BEARER")
            .hide_env_values(true)
            .help("Bearer token sent as Authorization header"),
        Arg::new("timeout")
            .long("timeout")
            .value_parser(clap::value_parser!(u64))
            .default_value("100")
            .help("Request timeout in seconds"),
        Arg::new("insecure")
            .long("insecure")
            .action(ArgAction::SetTrue)
            .help("Accept invalid TLS certificates"),
        Arg::new("audit")
            .long("audit")
            .action(ArgAction::SetTrue)
            .help("Log every outgoing request"),
        Arg::new("verbose")
            .long("verbose")
            .short('v')
            .action(ArgAction::Count)
            .help("Increase log verbosity (-v, -vv)"),
    ]
}

/// Load `../.env` or else `.env` relative to `dir`, whichever exists first.
///
/// Variables already set in the environment are left alone. Returns the file
/// that was loaded.
pub fn load_env_file(dir: &Path) -> Option<PathBuf> {
    let candidates = [dir.parent().map(|parent| parent.join(".env")), Some(dir.join(".env"))];
    let path = candidates.into_iter().flatten().find(|path| path.is_file())?;
    match dotenvy::from_path(&path) {
        Ok(()) => Some(path),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "ignoring unreadable env file");
            None
        }
    }
}

/// Parses only the global options, tolerating whatever follows.
///
/// Used to find the document before the full command tree can be built.
pub fn bootstrap_command(name: &str) -> Command {
    Command::new(name.to_owned())
        .args(global_args())
        .allow_external_subcommands(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .ignore_errors(true)
}

/// Build the full command tree for a loaded catalog.
pub fn build_command(name: &str, catalog: &SchemaCatalog) -> Command {
    let about = catalog
        .title()
        .map(|title| format!("Invoke operations of {title}"))
        .unwrap_or_else(|| "Invoke OpenAPI operations".to_string());

    let mut root = Command::new(name.to_owned())
        .about(about)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .args(global_args())
        .subcommand(Command::new(LIST_COMMAND).about("List the document's operations"));

    for (cmd_name, op) in command_names(catalog) {
        root = root.subcommand(build_operation_command(op, &cmd_name));
    }
    root
}

/// Find the operation behind a subcommand name.
pub fn find_operation<'a>(
    catalog: &'a SchemaCatalog,
    cmd_name: &str,
) -> Option<&'a OperationDescriptor> {
    command_names(catalog)
        .into_iter()
        .find(|(name, _)| name == cmd_name)
        .map(|(_, op)| op)
}

/// Subcommand name per operation. Ids that normalize to the same name get the
/// HTTP method appended, then a numeric suffix while still taken.
pub fn command_names(catalog: &SchemaCatalog) -> Vec<(String, &OperationDescriptor)> {
    let mut name_count: HashMap<String, usize> = HashMap::new();
    for op in catalog.operations() {
        *name_count.entry(normalize_operation_id(&op.id)).or_default() += 1;
    }

    let candidates: Vec<String> = catalog
        .operations()
        .iter()
        .map(|op| {
            let base = normalize_operation_id(&op.id);
            if name_count.get(&base).copied().unwrap_or(0) > 1 || base == LIST_COMMAND {
                format!("{}-{}", base, op.method.as_str().to_lowercase())
            } else {
                base
            }
        })
        .collect();

    let reserved: HashSet<&str> = candidates.iter().map(String::as_str).collect();
    let mut taken: HashSet<String> = HashSet::new();
    candidates
        .iter()
        .zip(catalog.operations())
        .map(|(candidate, op)| {
            let mut name = candidate.clone();
            let mut n = 2;
            while taken.contains(&name) || (n > 2 && reserved.contains(name.as_str())) {
                name = format!("{candidate}-{n}");
                n += 1;
            }
            taken.insert(name.clone());
            (name, op)
        })
        .collect()
}

fn build_operation_command(op: &OperationDescriptor, cmd_name: &str) -> Command {
    let mut cmd = Command::new(cmd_name.to_owned()).about(op.summary.clone());

    for param in &op.parameters {
        let arg = Arg::new(param.name.clone()).help(param.description.clone());
        let arg = match param.location {
            ParamLocation::Path => arg.required(true),
            ParamLocation::Query | ParamLocation::Header => {
                let arg = arg.long(param.name.clone());
                if param.param_type == ParamType::Boolean {
                    arg.action(ArgAction::SetTrue)
                } else {
                    arg.required(param.required).action(ArgAction::Set)
                }
            }
        };
        cmd = cmd.arg(arg);
    }

    if op.request_body.is_some() && op.method.accepts_body() {
        cmd = cmd
            .arg(
                Arg::new("json-body")
                    .long("json")
                    .short('j')
                    .help("Request body as JSON string")
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("field")
                    .long("field")
                    .short('f')
                    .help("Set body field: key=value (repeatable)")
                    .action(ArgAction::Append),
            );
    }

    cmd
}

/// Collect invocation arguments from a parsed operation subcommand.
pub fn arguments_from_matches(
    op: &OperationDescriptor,
    matches: &ArgMatches,
) -> Result<Arguments, CliError> {
    let mut args = Arguments::new();

    for param in &op.parameters {
        let is_flag = param.param_type == ParamType::Boolean && param.location != ParamLocation::Path;
        if is_flag {
            if matches.get_flag(&param.name) {
                args.insert(param.name.clone(), Value::Bool(true));
            }
            continue;
        }
        let Some(raw) = matches.get_one::<String>(&param.name) else {
            continue;
        };
        let value = match param.param_type {
            ParamType::Integer | ParamType::Number => serde_json::from_str::<Value>(raw)
                .ok()
                .filter(Value::is_number)
                .unwrap_or_else(|| Value::String(raw.clone())),
            ParamType::Boolean | ParamType::String => Value::String(raw.clone()),
        };
        args.insert(param.name.clone(), value);
    }

    if let Some(body) = build_body(matches)? {
        // A `body` parameter owns that key; the payload travels as the lone leftover.
        let key = match op.parameter(BODY_ARGUMENT) {
            Some(_) => "json-body",
            None => BODY_ARGUMENT,
        };
        args.insert(key.to_string(), body);
    }
    Ok(args)
}

fn build_body(matches: &ArgMatches) -> Result<Option<Value>, CliError> {
    // Subcommands without a body schema do not define these ids.
    let has_body_args = matches.ids().any(|id| id == "json-body" || id == "field");
    if !has_body_args {
        return Ok(None);
    }

    // --json takes precedence
    if let Some(json_str) = matches.get_one::<String>("json-body") {
        let val: Value = serde_json::from_str(json_str).map_err(CliError::InvalidJsonBody)?;
        return Ok(Some(val));
    }

    if let Some(fields) = matches.get_many::<String>("field") {
        let mut obj = Map::new();
        for field in fields {
            let (key, val) = field
                .split_once('=')
                .ok_or_else(|| CliError::InvalidFieldFormat {
                    field: field.to_string(),
                })?;
            // Try to parse as JSON value, fall back to string
            let json_val = serde_json::from_str(val).unwrap_or(Value::String(val.to_string()));
            obj.insert(key.to_string(), json_val);
        }
        return Ok(Some(Value::Object(obj)));
    }

    Ok(None)
}

/// Transport configuration from the global options.
pub fn transport_config_from_matches(matches: &ArgMatches) -> Result<TransportConfig, CliError> {
    let mut config = TransportConfig::new();

    if let Some(url) = matches.get_one::<String>("server-url") {
        config = config.base_url_override(url.clone());
    }
    if let Some(headers) = matches.get_many::<String>("header") {
        for header in headers {
            let (name, value) = parse_header(header)?;
            config = config.header(name, value);
        }
    }
    if let Some(token) = matches.get_one::<String>("bearer") {
        config = config.bearer_token(token.clone());
    }
    if let Some(&secs) = matches.get_one::<u64>("timeout") {
        config = if secs == 0 {
            config.no_timeout()
        } else {
            config.timeout(Duration::from_secs(secs))
        };
    }
    if matches.get_flag("insecure") {
        config = config.danger_accept_invalid_certs();
    }
    if matches.get_flag("audit") {
        config = config.audit(std::sync::Arc::new(TracingAuditSink));
    }
    Ok(config)
}

fn parse_header(header: &str) -> Result<(HeaderName, HeaderValue), CliError> {
    let invalid = || CliError::InvalidHeaderFormat {
        header: header.to_string(),
    };
    let (name, value) = header.split_once(':').ok_or_else(invalid)?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((name, value))
}

/// `GetAllOrders` → `get-all-orders`, `getHTTPStatus` → `get-http-status`.
pub fn normalize_operation_id(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + 4);
    for i in 0..chars.len() {
        let c = chars[i];
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower)
                {
                    result.push('-');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else if c == '_' || c == ' ' || c == '.' {
            if !result.is_empty() && !result.ends_with('-') {
                result.push('-');
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LoadOptions;
    use serde_json::json;

    fn catalog() -> SchemaCatalog {
        let doc = json!({
            "info": { "title": "Orders API" },
            "servers": [{ "url": "http://localhost:5275/" }],
            "paths": {
                "/api/orders": {
                    "get": {
                        "operationId": "GetAllOrders",
                        "summary": "Get all orders",
                        "parameters": [
                            { "name": "product", "in": "query", "description": "Filter by product" },
                            { "name": "limit", "in": "query", "schema": { "type": "integer" } },
                            { "name": "verbose", "in": "query", "schema": { "type": "boolean" } },
                            { "name": "X-Request-Id", "in": "header", "required": true }
                        ]
                    },
                    "post": {
                        "operationId": "CreateOrder",
                        "requestBody": {
                            "content": { "application/json": { "schema": { "type": "object" } } }
                        }
                    }
                },
                "/api/orders/{id}": {
                    "get": {
                        "operationId": "GetOrderById",
                        "parameters": [{ "name": "id", "in": "path", "schema": { "type": "integer" } }]
                    },
                    "put": { "operationId": "getOrderById" }
                },
                "/api/lists": {
                    "get": { "operationId": "List" }
                }
            }
        });
        SchemaCatalog::from_value(&doc, &LoadOptions::new()).unwrap()
    }

    fn sub_matches(catalog: &SchemaCatalog, argv: &[&str]) -> (String, ArgMatches) {
        let mut full = vec!["oi", "--document", "orders.json"];
        full.extend_from_slice(argv);
        let matches = build_command("oi", catalog)
            .try_get_matches_from(full)
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        (name.to_string(), sub.clone())
    }

    // -- normalize_operation_id --

    #[test]
    fn normalize_operation_id_pascal_case() {
        assert_eq!(normalize_operation_id("GetAllOrders"), "get-all-orders");
    }

    #[test]
    fn normalize_operation_id_consecutive_uppercase() {
        assert_eq!(normalize_operation_id("getHTTPStatus"), "get-http-status");
        assert_eq!(normalize_operation_id("HTMLParser"), "html-parser");
        assert_eq!(normalize_operation_id("getAPI"), "get-api");
    }

    #[test]
    fn normalize_operation_id_separators_and_digits() {
        assert_eq!(normalize_operation_id("orders_list"), "orders-list");
        assert_eq!(normalize_operation_id("getV2Orders"), "get-v2-orders");
        assert_eq!(normalize_operation_id(""), "");
    }

    // -- command tree --

    #[test]
    fn colliding_names_get_method_suffix() {
        let catalog = catalog();
        let names: Vec<String> = command_names(&catalog).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "get-all-orders",
                "create-order",
                "get-order-by-id-get",
                "get-order-by-id-put",
                "list-get",
            ]
        );
    }

    #[test]
    fn same_method_collisions_get_numeric_suffix() {
        let doc = json!({
            "servers": [{ "url": "http://localhost:5275/" }],
            "paths": {
                "/a": { "get": { "operationId": "GetOrders" } },
                "/b": { "get": { "operationId": "get_orders" } },
                "/c": { "get": { "operationId": "get_orders_get_2" } }
            }
        });
        let catalog = SchemaCatalog::from_value(&doc, &LoadOptions::new()).unwrap();
        let names: Vec<String> = command_names(&catalog).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["get-orders-get", "get-orders-get-3", "get-orders-get-2"]);

        assert_eq!(find_operation(&catalog, "get-orders-get-3").unwrap().id, "get_orders");

        let matches = build_command("oi", &catalog)
            .try_get_matches_from(["oi", "-d", "x", "get-orders-get-3"])
            .unwrap();
        assert_eq!(matches.subcommand_name(), Some("get-orders-get-3"));
    }

    #[test]
    fn find_operation_maps_back_to_descriptor() {
        let catalog = catalog();
        assert_eq!(find_operation(&catalog, "create-order").unwrap().id, "CreateOrder");
        assert_eq!(find_operation(&catalog, "get-order-by-id-put").unwrap().id, "getOrderById");
        assert!(find_operation(&catalog, "delete-order").is_none());
    }

    #[test]
    fn build_command_has_list_and_operations() {
        let cmd = build_command("oi", &catalog());
        let subs: Vec<&str> = cmd.get_subcommands().map(|c| c.get_name()).collect();
        assert!(subs.contains(&LIST_COMMAND));
        assert!(subs.contains(&"get-all-orders"));
        assert_eq!(cmd.get_about().unwrap().to_string(), "Invoke operations of Orders API");
    }

    #[test]
    fn body_args_only_for_body_operations() {
        let cmd = build_command("oi", &catalog());
        let create = cmd.find_subcommand("create-order").unwrap();
        assert!(create.get_arguments().any(|a| a.get_id() == "json-body"));
        let get_all = cmd.find_subcommand("get-all-orders").unwrap();
        assert!(!get_all.get_arguments().any(|a| a.get_id() == "json-body"));
    }

    // -- arguments_from_matches --

    #[test]
    fn query_header_and_flag_arguments() {
        let catalog = catalog();
        let (name, matches) = sub_matches(
            &catalog,
            &[
                "get-all-orders",
                "--product",
                "Widget A",
                "--limit",
                "5",
                "--verbose",
                "--X-Request-Id",
                "abc",
            ],
        );
        let op = find_operation(&catalog, &name).unwrap();

        let args = arguments_from_matches(op, &matches).unwrap();
        assert_eq!(
            Value::Object(args),
            json!({ "product": "Widget A", "limit": 5, "verbose": true, "X-Request-Id": "abc" })
        );
    }

    #[test]
    fn positional_path_argument() {
        let catalog = catalog();
        let (name, matches) = sub_matches(&catalog, &["get-order-by-id-get", "42"]);
        let op = find_operation(&catalog, &name).unwrap();

        let args = arguments_from_matches(op, &matches).unwrap();
        assert_eq!(args["id"], json!(42));
    }

    #[test]
    fn json_body_takes_precedence_over_fields() {
        let catalog = catalog();
        let (name, matches) = sub_matches(
            &catalog,
            &["create-order", "--json", r#"{"from":"json"}"#, "--field", "from=field"],
        );
        let op = find_operation(&catalog, &name).unwrap();

        let args = arguments_from_matches(op, &matches).unwrap();
        assert_eq!(args[BODY_ARGUMENT], json!({ "from": "json" }));
    }

    #[test]
    fn body_parameter_keeps_its_own_value() {
        let doc = json!({
            "servers": [{ "url": "http://localhost" }],
            "paths": {
                "/api/notes": {
                    "post": {
                        "operationId": "CreateNote",
                        "parameters": [{ "name": "body", "in": "query" }],
                        "requestBody": {
                            "content": { "application/json": { "schema": { "type": "object" } } }
                        }
                    }
                }
            }
        });
        let catalog = SchemaCatalog::from_value(&doc, &LoadOptions::new()).unwrap();
        let (name, matches) = sub_matches(
            &catalog,
            &["create-note", "--body", "draft", "--json", r#"{"text":"hi"}"#],
        );
        let op = find_operation(&catalog, &name).unwrap();

        let args = arguments_from_matches(op, &matches).unwrap();
        assert_eq!(args[BODY_ARGUMENT], json!("draft"));
        assert_eq!(args["json-body"], json!({ "text": "hi" }));
    }

    #[test]
    fn fields_parse_json_values_with_string_fallback() {
        let catalog = catalog();
        let (name, matches) = sub_matches(
            &catalog,
            &["create-order", "-f", "Id=12", "-f", "Product=Widget1", "-f", "Quantity=10"],
        );
        let op = find_operation(&catalog, &name).unwrap();

        let args = arguments_from_matches(op, &matches).unwrap();
        assert_eq!(
            args[BODY_ARGUMENT],
            json!({ "Id": 12, "Product": "Widget1", "Quantity": 10 })
        );
    }

    #[test]
    fn invalid_body_input_is_reported() {
        let catalog = catalog();
        let op = catalog.operation("CreateOrder").unwrap();

        let (_, matches) = sub_matches(&catalog, &["create-order", "--json", "{invalid json}"]);
        let err = arguments_from_matches(op, &matches).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));

        let (_, matches) = sub_matches(&catalog, &["create-order", "--field", "no-equals-sign"]);
        let err = arguments_from_matches(op, &matches).unwrap_err();
        assert!(err.to_string().contains("invalid --field format"));
    }

    #[test]
    fn no_body_flags_means_no_body_argument() {
        let catalog = catalog();
        let op = catalog.operation("CreateOrder").unwrap();
        let (_, matches) = sub_matches(&catalog, &["create-order"]);

        let args = arguments_from_matches(op, &matches).unwrap();
        assert!(args.is_empty());
    }

    // -- global options --

    #[test]
    fn transport_config_from_global_options() {
        let matches = build_command("oi", &catalog())
            .try_get_matches_from([
                "oi",
                "--document",
                "orders.json",
                "--server-url",
                "http://localhost:9999/",
                "-H",
                "X-Tenant: sprockets",
                "--timeout",
                "5",
                "--insecure",
                "--audit",
                LIST_COMMAND,
            ])
            .unwrap();

        let config = transport_config_from_matches(&matches).unwrap();
        assert_eq!(config.base_url_override.as_deref(), Some("http://localhost:9999/"));
        assert_eq!(config.headers["x-tenant"], "sprockets");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert!(!config.verify_tls);
        assert!(config.audit.is_some());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let err = parse_header("no-colon").unwrap_err();
        assert!(matches!(err, CliError::InvalidHeaderFormat { .. }));
    }

    #[test]
    fn env_file_prefers_the_parent_directory() {
        let root = std::env::temp_dir().join(format!("openapi-invoke-env-{}", std::process::id()));
        let child = root.join("app");
        std::fs::create_dir_all(&child).unwrap();
        std::fs::write(root.join(".env"), "OPENAPI_INVOKE_ENV_FILE_TEST=parent\n").unwrap();
        std::fs::write(child.join(".env"), "OPENAPI_INVOKE_ENV_FILE_TEST=child\n").unwrap();

        assert_eq!(load_env_file(&child), Some(root.join(".env")));
        assert_eq!(std::env::var("OPENAPI_INVOKE_ENV_FILE_TEST").unwrap(), "parent");

        std::fs::remove_dir_all(&root).unwrap();
        assert_eq!(load_env_file(&child), None);
    }

    #[test]
    fn bootstrap_tolerates_unknown_operation_arguments() {
        let matches = bootstrap_command("oi")
            .try_get_matches_from(["oi", "-d", "orders.json", "-vv", "create-order", "--json", "{}"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("document").unwrap(), "orders.json");
        assert_eq!(matches.get_count("verbose"), 2);
    }
}
