//! OpenAPI document → operation catalog
//!
//! Parses an OpenAPI 3.x JSON document into a [`SchemaCatalog`]: a read-only
//! set of [`OperationDescriptor`]s keyed by operationId, plus the server URL
//! every operation is sent to.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde_json::Value;
use url::Url;

use crate::error::SchemaParseError;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Chained or nested `$ref`s deeper than this are left unresolved.
const MAX_REF_DEPTH: usize = 32;

/// HTTP methods an operation can be invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Parse a path-item key (`"get"`, `"post"`, ...). Case-insensitive.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "delete" => Some(Self::Delete),
            "patch" => Some(Self::Patch),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }

    /// Whether a request body is sent for this method.
    pub fn accepts_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

/// Where a parameter goes in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

impl ParamLocation {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            _ => None,
        }
    }
}

/// Primitive type of a parameter, taken from `schema.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    fn from_schema(schema: Option<&Value>) -> Self {
        match schema.and_then(|s| s.get("type")).and_then(Value::as_str) {
            Some("integer") => Self::Integer,
            Some("number") => Self::Number,
            Some("boolean") => Self::Boolean,
            _ => Self::String,
        }
    }
}

/// A single flat parameter of an operation.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct ParameterDescriptor {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub param_type: ParamType,
    pub description: String,
}

/// The request body an operation accepts.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct RequestBody {
    /// Declared media type; JSON variants are normalized to `application/json`.
    pub content_type: String,
    /// Body schema with local `$ref`s inlined.
    pub schema: Value,
    pub required: bool,
}

impl RequestBody {
    pub fn is_json(&self) -> bool {
        self.content_type == JSON_CONTENT_TYPE
    }

    /// Property names declared by an object body schema.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.schema
            .get("properties")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|props| props.keys().map(String::as_str))
    }
}

/// One invocable operation, immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct OperationDescriptor {
    /// operationId from the document (e.g. "GetAllOrders")
    pub id: String,
    pub method: HttpMethod,
    /// URL path template (e.g. "/api/orders/{id}")
    pub path_template: String,
    /// Summary text, falling back to the description
    pub summary: String,
    pub tags: Vec<String>,
    /// Parameters in declared order
    pub parameters: Vec<ParameterDescriptor>,
    pub request_body: Option<RequestBody>,
    pub server_base_url: String,
}

impl OperationDescriptor {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameters_in(
        &self,
        location: ParamLocation,
    ) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }
}

/// Where to read an OpenAPI document from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Path(PathBuf),
    Url(Url),
    /// A JSON document already in memory.
    Inline(String),
}

impl DocumentSource {
    /// Treat `http(s)://` locations as URLs and everything else as a file path.
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            if let Ok(url) = Url::parse(location) {
                return Self::Url(url);
            }
        }
        Self::Path(PathBuf::from(location))
    }
}

/// Options for [`SchemaCatalog::load`].
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct LoadOptions {
    /// Takes precedence over the document's `servers` entry.
    pub server_url_override: Option<String>,
    /// Client used to fetch [`DocumentSource::Url`] documents.
    pub http_client: Option<reqwest::Client>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_url_override(mut self, url: impl Into<String>) -> Self {
        self.server_url_override = Some(url.into());
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}

/// The parsed operations of one OpenAPI document.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    title: Option<String>,
    server_base_url: String,
    operations: Vec<OperationDescriptor>,
    index: HashMap<String, usize>,
}

impl SchemaCatalog {
    /// Read and parse a document from a file, URL, or string.
    pub async fn load(
        source: DocumentSource,
        options: LoadOptions,
    ) -> Result<Self, SchemaParseError> {
        let (text, document_url) = match source {
            DocumentSource::Inline(text) => (text, None),
            DocumentSource::Path(path) => {
                let text = tokio::fs::read_to_string(&path).await.map_err(|err| {
                    SchemaParseError::MalformedDocument(format!(
                        "failed to read {}: {err}",
                        path.display()
                    ))
                })?;
                (text, None)
            }
            DocumentSource::Url(url) => {
                let text = fetch_document(&url, &options).await?;
                (text, Some(url))
            }
        };

        let doc: Value = serde_json::from_str(&text)
            .map_err(|err| SchemaParseError::MalformedDocument(format!("invalid JSON: {err}")))?;
        let catalog = Self::build(&doc, &options, document_url.as_ref())?;
        tracing::debug!(
            operations = catalog.len(),
            server = %catalog.server_base_url,
            "loaded OpenAPI catalog"
        );
        Ok(catalog)
    }

    /// Parse an already-decoded document.
    pub fn from_value(doc: &Value, options: &LoadOptions) -> Result<Self, SchemaParseError> {
        Self::build(doc, options, None)
    }

    fn build(
        doc: &Value,
        options: &LoadOptions,
        document_url: Option<&Url>,
    ) -> Result<Self, SchemaParseError> {
        if !doc.is_object() {
            return Err(SchemaParseError::MalformedDocument(
                "document root must be an object".into(),
            ));
        }

        let server_base_url = resolve_server_url(doc, options, document_url)?;
        let title = doc
            .pointer("/info/title")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut operations = Vec::new();
        let mut index = HashMap::new();

        let paths = match doc.get("paths") {
            None => None,
            Some(Value::Object(paths)) => Some(paths),
            Some(_) => {
                return Err(SchemaParseError::MalformedDocument(
                    "`paths` must be an object".into(),
                ))
            }
        };

        for (path, path_item) in paths.into_iter().flatten() {
            let path_item = resolve_ref(doc, path_item)?;
            let Some(entries) = path_item.as_object() else {
                return Err(SchemaParseError::MalformedDocument(format!(
                    "path item {path} must be an object"
                )));
            };
            let path_level_params = path_item.get("parameters");

            for (key, operation) in entries {
                let Some(method) = HttpMethod::from_key(key) else {
                    if matches!(key.as_str(), "head" | "options" | "trace") {
                        tracing::debug!(%path, method = %key, "skipping unsupported HTTP method");
                    }
                    continue;
                };

                let op = extract_single_operation(
                    doc,
                    path,
                    method,
                    operation,
                    path_level_params,
                    &server_base_url,
                )?;

                if index.contains_key(&op.id) {
                    return Err(SchemaParseError::DuplicateOperationId(op.id));
                }
                index.insert(op.id.clone(), operations.len());
                operations.push(op);
            }
        }

        Ok(Self {
            title,
            server_base_url,
            operations,
            index,
        })
    }

    pub fn operation(&self, id: &str) -> Option<&OperationDescriptor> {
        self.index.get(id).map(|&i| &self.operations[i])
    }

    /// Operations in document order.
    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn server_base_url(&self) -> &str {
        &self.server_base_url
    }

    /// `info.title` of the source document.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Point every operation at a different server.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_base_url = url.into();
        for op in &mut self.operations {
            op.server_base_url.clone_from(&self.server_base_url);
        }
        self
    }
}

async fn fetch_document(url: &Url, options: &LoadOptions) -> Result<String, SchemaParseError> {
    let client = options.http_client.clone().unwrap_or_default();
    let malformed =
        |err: reqwest::Error| SchemaParseError::MalformedDocument(format!("failed to fetch {url}: {err}"));

    let resp = client.get(url.clone()).send().await.map_err(malformed)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SchemaParseError::MalformedDocument(format!(
            "failed to fetch {url}: HTTP {status}"
        )));
    }
    resp.text().await.map_err(malformed)
}

fn resolve_server_url(
    doc: &Value,
    options: &LoadOptions,
    document_url: Option<&Url>,
) -> Result<String, SchemaParseError> {
    if let Some(url) = &options.server_url_override {
        return Ok(url.clone());
    }

    let server = doc
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .ok_or(SchemaParseError::NoServerUrl)?;
    let raw = server
        .get("url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .ok_or(SchemaParseError::NoServerUrl)?;
    let expanded = expand_server_variables(raw, server.get("variables"));

    if Url::parse(&expanded).is_ok() {
        return Ok(expanded);
    }

    // Relative server URLs are relative to where the document was served from.
    match document_url {
        Some(base) => base
            .join(&expanded)
            .map(String::from)
            .map_err(|err| SchemaParseError::MalformedDocument(format!("bad server URL {expanded}: {err}"))),
        None => Err(SchemaParseError::NoServerUrl),
    }
}

/// Replace `{name}` in a server URL with `variables.name.default`.
fn expand_server_variables(raw: &str, variables: Option<&Value>) -> String {
    let Some(vars) = variables.and_then(Value::as_object) else {
        return raw.to_string();
    };
    let mut url = raw.to_string();
    for (name, var) in vars {
        if let Some(default) = var.get("default").and_then(Value::as_str) {
            url = url.replace(&format!("{{{name}}}"), default);
        }
    }
    url
}

fn extract_single_operation(
    doc: &Value,
    path: &str,
    method: HttpMethod,
    operation: &Value,
    path_level_params: Option<&Value>,
    server_base_url: &str,
) -> Result<OperationDescriptor, SchemaParseError> {
    let id = operation
        .get("operationId")
        .and_then(Value::as_str)
        .unwrap_or("");

    if id.is_empty() {
        return Err(SchemaParseError::MissingOperationId {
            method: method.to_string(),
            path: path.to_string(),
        });
    }

    let summary = operation
        .get("summary")
        .or_else(|| operation.get("description"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let tags = operation
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let parameters = collect_params(doc, path_level_params, operation.get("parameters"))?;
    let request_body = extract_body(doc, operation)?;

    Ok(OperationDescriptor {
        id: id.to_string(),
        method,
        path_template: path.to_string(),
        summary,
        tags,
        parameters,
        request_body,
        server_base_url: server_base_url.to_string(),
    })
}

/// Merge path-level + operation-level parameters, keeping declared order.
/// Operation-level overrides path-level for the same name and location.
fn collect_params(
    doc: &Value,
    path_level: Option<&Value>,
    operation_level: Option<&Value>,
) -> Result<Vec<ParameterDescriptor>, SchemaParseError> {
    let mut params: Vec<ParameterDescriptor> = Vec::new();

    for source in [path_level, operation_level].into_iter().flatten() {
        let Some(list) = source.as_array() else {
            continue;
        };
        for param in list {
            let param = resolve_ref(doc, param)?;
            let Some(p) = parse_param(param) else {
                continue;
            };
            match params
                .iter_mut()
                .find(|existing| existing.name == p.name && existing.location == p.location)
            {
                Some(existing) => *existing = p,
                None => params.push(p),
            }
        }
    }

    Ok(params)
}

/// Parse a single parameter. Cookie parameters and entries without a name are skipped.
fn parse_param(param: &Value) -> Option<ParameterDescriptor> {
    let name = param.get("name")?.as_str()?.to_string();
    let location = ParamLocation::from_key(param.get("in")?.as_str()?)?;
    let description = param
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    // Path parameters are always required.
    let required = location == ParamLocation::Path
        || param
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);

    Some(ParameterDescriptor {
        name,
        location,
        required,
        param_type: ParamType::from_schema(param.get("schema")),
        description,
    })
}

fn extract_body(doc: &Value, operation: &Value) -> Result<Option<RequestBody>, SchemaParseError> {
    let Some(request_body) = operation.get("requestBody") else {
        return Ok(None);
    };
    let request_body = resolve_ref(doc, request_body)?;
    let required = request_body
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let Some(content) = request_body.get("content").and_then(Value::as_object) else {
        return Ok(None);
    };

    let chosen = content
        .iter()
        .find(|(media_type, _)| media_type.as_str() == JSON_CONTENT_TYPE)
        .or_else(|| content.iter().find(|(media_type, _)| is_json_media_type(media_type)))
        .or_else(|| content.iter().next());
    let Some((media_type, media)) = chosen else {
        return Ok(None);
    };

    let content_type = if is_json_media_type(media_type) {
        JSON_CONTENT_TYPE.to_string()
    } else {
        media_type.clone()
    };
    let schema = media
        .get("schema")
        .map(|schema| inline_refs(doc, schema, 0))
        .unwrap_or(Value::Null);

    Ok(Some(RequestBody {
        content_type,
        schema,
        required,
    }))
}

fn is_json_media_type(media_type: &str) -> bool {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == JSON_CONTENT_TYPE || essence == "text/json" || essence.ends_with("+json")
}

/// Follow a chain of local `$ref`s to the referenced value.
fn resolve_ref<'a>(doc: &'a Value, value: &'a Value) -> Result<&'a Value, SchemaParseError> {
    let mut current = value;
    for _ in 0..MAX_REF_DEPTH {
        let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
            return Ok(current);
        };
        current = lookup_ref(doc, reference).ok_or_else(|| {
            SchemaParseError::MalformedDocument(format!("unresolvable $ref {reference}"))
        })?;
    }
    Ok(current)
}

fn lookup_ref<'a>(doc: &'a Value, reference: &str) -> Option<&'a Value> {
    doc.pointer(reference.strip_prefix('#')?)
}

/// Copy a schema with local `$ref`s replaced by their targets.
/// Unresolvable or too-deep references are kept as-is.
fn inline_refs(doc: &Value, value: &Value, depth: usize) -> Value {
    if depth >= MAX_REF_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            if let Some(target) = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| lookup_ref(doc, r))
            {
                return inline_refs(doc, target, depth + 1);
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), inline_refs(doc, v, depth + 1)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| inline_refs(doc, v, depth + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}
