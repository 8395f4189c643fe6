//! Import OpenAPI documents as named plugins and invoke their operations.
//!
//! Parses an OpenAPI 3.x JSON document into a [`SchemaCatalog`], registers it
//! in a [`PluginRegistry`] under a plugin name, and invokes operations by
//! `(plugin, operationId, arguments)`. Each invocation sends exactly one HTTP
//! request and returns an [`InvocationResult`].
//!
//! # Usage
//!
//! ```no_run
//! use openapi_invoke::{
//!     Arguments, DocumentSource, LoadOptions, PluginRegistry, SchemaCatalog, TransportConfig,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let source = DocumentSource::parse("http://localhost:5275/swagger/v1/swagger.json");
//! let options = LoadOptions::new().server_url_override("http://localhost:5275/");
//! let catalog = SchemaCatalog::load(source, options).await?;
//!
//! let registry = PluginRegistry::new();
//! registry.register("OrderService", catalog, TransportConfig::new())?;
//!
//! let result = registry
//!     .invoke("OrderService", "GetAllOrders", &Arguments::new())
//!     .await?;
//! println!("{}", result.into_result()?.text());
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod catalog;
pub mod cli;
pub mod error;
pub mod invoke;
pub mod registry;
pub mod transport;

pub use audit::{AuditRecord, AuditSink, AuditedTransport, MemoryAuditSink, TracingAuditSink};
pub use catalog::{
    DocumentSource, HttpMethod, LoadOptions, OperationDescriptor, ParamLocation, ParamType,
    ParameterDescriptor, RequestBody, SchemaCatalog,
};
pub use error::{
    CliError, InvocationError, RegistryError, SchemaParseError, TransportError, TransportErrorKind,
};
pub use invoke::{
    Arguments, Failure, FailureKind, InvocationResponse, InvocationResult, InvokeOptions,
    OperationInvoker, BODY_ARGUMENT,
};
pub use registry::{Plugin, PluginRegistry};
pub use transport::{
    BearerToken, CredentialSupplier, HttpRequest, HttpResponse, ReqwestTransport, Transport,
    TransportConfig,
};

// Re-export dependencies for downstream crates
pub use reqwest;
pub use tokio_util::sync::CancellationToken;
