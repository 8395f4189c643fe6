//! `openapi-invoke`: load an OpenAPI document, register it as a plugin, and
//! invoke one of its operations from the command line.

use std::process::ExitCode;

use anyhow::{Context, Result};
use openapi_invoke::cli::{self, LIST_COMMAND};
use openapi_invoke::{
    CliError, DocumentSource, InvocationResult, InvokeOptions, LoadOptions, PluginRegistry,
    SchemaCatalog,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const BIN_NAME: &str = "openapi-invoke";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, audit: bool) {
    // RUST_LOG wins; otherwise -v flags pick the level. Default is WARN only.
    let base_filter = match std::env::var("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => match verbose {
            0 => "warn".to_string(),
            1 => "warn,openapi_invoke=info".to_string(),
            _ => "info,openapi_invoke=debug".to_string(),
        },
    };
    let filter = if audit {
        format!("{base_filter},openapi_invoke::audit=info")
    } else {
        base_filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<ExitCode> {
    // Environment files feed the OPENAPI_INVOKE_* variables read below.
    let env_file = std::env::current_dir()
        .ok()
        .and_then(|dir| cli::load_env_file(&dir));

    // The command tree depends on the document, so read the global options first.
    let bootstrap = cli::bootstrap_command(BIN_NAME)
        .try_get_matches()
        .unwrap_or_default();
    let verbose = bootstrap
        .try_get_one::<u8>("verbose")
        .ok()
        .flatten()
        .copied()
        .unwrap_or(0);
    let audit = bootstrap
        .try_get_one::<bool>("audit")
        .ok()
        .flatten()
        .copied()
        .unwrap_or(false);
    init_tracing(verbose, audit);
    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "loaded env file");
    }

    let document = match bootstrap.try_get_one::<String>("document").ok().flatten() {
        Some(document) => document.clone(),
        None => {
            // Let clap report the missing option (or print help) and exit.
            clap::Command::new(BIN_NAME)
                .args(cli::global_args())
                .get_matches();
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut load_options = LoadOptions::new();
    if let Some(url) = bootstrap.try_get_one::<String>("server-url").ok().flatten() {
        load_options = load_options.server_url_override(url.clone());
    }
    let catalog = SchemaCatalog::load(DocumentSource::parse(&document), load_options)
        .await
        .with_context(|| format!("failed to load {document}"))?;

    let matches = cli::build_command(BIN_NAME, &catalog).get_matches();
    let (cmd_name, sub_matches) = matches
        .subcommand()
        .context("no operation given")?;

    if cmd_name == LIST_COMMAND {
        for (name, op) in cli::command_names(&catalog) {
            println!(
                "{name:<32} {:<6} {:<32} {}",
                op.method.as_str(),
                op.path_template,
                op.summary
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let op = cli::find_operation(&catalog, cmd_name)
        .ok_or_else(|| CliError::UnknownOperation(cmd_name.to_string()))?;
    let args = cli::arguments_from_matches(op, sub_matches)?;
    let operation_id = op.id.clone();

    let plugin = matches
        .get_one::<String>("plugin")
        .cloned()
        .unwrap_or_else(|| "api".to_string());
    let config = cli::transport_config_from_matches(&matches)?;

    let registry = PluginRegistry::new();
    registry.register(plugin.clone(), catalog, config)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = registry
        .invoke_with(
            &plugin,
            &operation_id,
            &args,
            &InvokeOptions::new().cancel_on(cancel),
        )
        .await?;

    match result {
        InvocationResult::Success(resp) => {
            println!("{}", resp.text());
            Ok(ExitCode::SUCCESS)
        }
        InvocationResult::Failure(failure) => {
            eprintln!("error: {failure}");
            Ok(ExitCode::FAILURE)
        }
    }
}
