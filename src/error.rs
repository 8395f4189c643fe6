//! Error types for the openapi-invoke crate.

use thiserror::Error;

/// Errors that can occur while loading an OpenAPI document into a catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaParseError {
    #[error("operation {method} {path} has no operationId")]
    MissingOperationId { method: String, path: String },

    #[error("duplicate operationId: {0}")]
    DuplicateOperationId(String),

    #[error("no server URL: document declares no servers and no override was given")]
    NoServerUrl,

    #[error("malformed OpenAPI document: {0}")]
    MalformedDocument(String),
}

/// Caller-input errors detected before any request is sent.
///
/// These are never retried; the caller has to fix the arguments.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvocationError {
    #[error("missing required argument: {0}")]
    MissingArgument(String),

    #[error("path placeholder {{{0}}} has no matching argument")]
    UnresolvedPathParameter(String),

    #[error("unsupported request content type: {0} (only application/json is supported)")]
    UnsupportedContentType(String),

    #[error("invalid value for argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("invalid header {name}")]
    InvalidHeader { name: String },

    #[error("cannot build request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Errors raised by the plugin registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("plugin already registered: {0}")]
    DuplicateName(String),

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("plugin {plugin} has no operation {operation_id}")]
    UnknownOperation {
        plugin: String,
        operation_id: String,
    },

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("failed to build HTTP transport for plugin {plugin}")]
    Transport {
        plugin: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors turning command-line input into invocation arguments.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    #[error("invalid JSON in --json argument")]
    InvalidJsonBody(#[source] serde_json::Error),

    #[error("invalid --field format: {field} (expected key=value)")]
    InvalidFieldFormat { field: String },

    #[error("invalid --header format: {header} (expected Name: value)")]
    InvalidHeaderFormat { header: String },

    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Other,
}

/// A request that never produced an HTTP response.
#[derive(Debug, Error, Clone)]
#[error("{kind:?} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        // reqwest's Display hides the root cause; walk the chain for diagnostics.
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self { kind, message }
    }
}
