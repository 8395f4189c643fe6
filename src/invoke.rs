//! Arguments → HTTP request → [`InvocationResult`]
//!
//! Takes an [`OperationDescriptor`] and a map of structured arguments, builds
//! exactly one HTTP request, sends it through the configured [`Transport`], and
//! maps the outcome into a uniform result.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::audit::AuditedTransport;
use crate::catalog::{OperationDescriptor, ParamLocation, RequestBody};
use crate::error::{InvocationError, TransportError};
use crate::transport::{
    CredentialSupplier, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportConfig,
};

/// Structured arguments keyed by parameter name.
pub type Arguments = Map<String, Value>;

/// Argument carrying an explicit request body.
pub const BODY_ARGUMENT: &str = "body";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Per-call controls.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct InvokeOptions {
    pub cancel: Option<CancellationToken>,
    /// Upper bound on the whole round trip, measured from when the request is sent.
    pub deadline: Option<Duration>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A 2xx/3xx response. The body is left exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl InvocationResponse {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No HTTP response: connection refused, timeout, TLS failure.
    Transport,
    /// The server answered with status >= 400.
    Remote,
    /// The caller's token fired or the deadline elapsed.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport error",
            Self::Remote => "remote error",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Runtime outcome of a well-formed invocation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Diagnostic text; for remote errors, the raw response body.
    pub message: String,
    pub status: Option<u16>,
}

impl Failure {
    /// Whether an external retry policy could reasonably try again.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            FailureKind::Transport => true,
            FailureKind::Remote => self
                .status
                .is_some_and(|s| s == 408 || s == 429 || (500..600).contains(&s)),
            FailureKind::Cancelled => false,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Failure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationResult {
    Success(InvocationResponse),
    Failure(Failure),
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success(resp) => Some(resp.status),
            Self::Failure(failure) => failure.status,
        }
    }

    pub fn into_result(self) -> Result<InvocationResponse, Failure> {
        match self {
            Self::Success(resp) => Ok(resp),
            Self::Failure(failure) => Err(failure),
        }
    }

    fn failure(kind: FailureKind, message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Failure(Failure {
            kind,
            message: message.into(),
            status,
        })
    }
}

/// Builds and sends requests for operations of one plugin.
#[derive(Debug, Clone)]
pub struct OperationInvoker {
    transport: Arc<dyn Transport>,
    default_headers: HeaderMap,
    credentials: Option<Arc<dyn CredentialSupplier>>,
}

impl OperationInvoker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            default_headers: HeaderMap::new(),
            credentials: None,
        }
    }

    /// Build a reqwest-backed invoker from a plugin's transport configuration.
    pub fn from_config(config: &TransportConfig) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::from_config(config)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Use `transport` with the headers, credentials and audit sink of `config`.
    pub fn with_transport(transport: Arc<dyn Transport>, config: &TransportConfig) -> Self {
        let transport: Arc<dyn Transport> = match &config.audit {
            Some(sink) => Arc::new(AuditedTransport::new(transport, Arc::clone(sink))),
            None => transport,
        };
        Self {
            transport,
            default_headers: config.headers.clone(),
            credentials: config.credentials.clone(),
        }
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn credentials(mut self, supplier: Arc<dyn CredentialSupplier>) -> Self {
        self.credentials = Some(supplier);
        self
    }

    /// Execute `op` with `args`.
    ///
    /// Caller-input problems surface as `Err` before anything is sent; every
    /// outcome of an attempted request is an `Ok(InvocationResult)`.
    pub async fn invoke(
        &self,
        op: &OperationDescriptor,
        args: &Arguments,
        options: &InvokeOptions,
    ) -> Result<InvocationResult, InvocationError> {
        let request = self.build_request(op, args)?;
        let span = tracing::debug_span!("invoke", operation_id = %op.id, method = %op.method);
        Ok(self.send(request, options).instrument(span).await)
    }

    /// Build the request `invoke` would send, without sending it.
    pub fn build_request(
        &self,
        op: &OperationDescriptor,
        args: &Arguments,
    ) -> Result<HttpRequest, InvocationError> {
        for param in &op.parameters {
            if param.required && arg_value(args, &param.name).is_none() {
                return Err(InvocationError::MissingArgument(param.name.clone()));
            }
        }

        let path = build_path(&op.path_template, args)?;
        let query = build_query(op, args)?;
        let url = build_url(&op.server_base_url, &path, &query)?;
        let body = build_body(op, args)?;
        let headers = self.build_headers(op, args, body.is_some())?;

        Ok(HttpRequest {
            method: op.method,
            url,
            headers,
            body,
        })
    }

    fn build_headers(
        &self,
        op: &OperationDescriptor,
        args: &Arguments,
        has_body: bool,
    ) -> Result<HeaderMap, InvocationError> {
        let mut headers = self.default_headers.clone();
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static(JSON_CONTENT_TYPE));

        if let Some(secret) = self.credentials.as_ref().and_then(|c| c.authorization()) {
            let mut value = HeaderValue::from_str(secret.expose_secret()).map_err(|_| {
                InvocationError::InvalidHeader {
                    name: AUTHORIZATION.to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        for param in op.parameters_in(ParamLocation::Header) {
            let Some(value) = arg_value(args, &param.name) else {
                continue;
            };
            let invalid = || InvocationError::InvalidHeader {
                name: param.name.clone(),
            };
            let name = HeaderName::from_bytes(param.name.as_bytes()).map_err(|_| invalid())?;
            let value =
                HeaderValue::from_str(&render_scalar(&param.name, value)?).map_err(|_| invalid())?;
            headers.insert(name, value);
        }

        if has_body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        Ok(headers)
    }

    async fn send(&self, request: HttpRequest, options: &InvokeOptions) -> InvocationResult {
        let cancel = options.cancel.clone().unwrap_or_default();
        let deadline = options.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending().await,
            }
        };

        tracing::debug!(url = %request.url, "sending request");
        // Losing branches drop the transport future, which aborts the request.
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return InvocationResult::failure(FailureKind::Cancelled, "invocation cancelled", None);
            }
            () = expired => {
                return InvocationResult::failure(FailureKind::Cancelled, "invocation deadline elapsed", None);
            }
            outcome = self.transport.send(request) => outcome,
        };

        map_response(outcome)
    }
}

fn map_response(outcome: Result<HttpResponse, TransportError>) -> InvocationResult {
    match outcome {
        Err(err) => {
            tracing::debug!(error = %err, "transport failure");
            InvocationResult::failure(FailureKind::Transport, err.to_string(), None)
        }
        Ok(resp) if resp.status >= 400 => {
            tracing::debug!(status = resp.status, "remote error");
            let body = String::from_utf8_lossy(&resp.body).into_owned();
            InvocationResult::failure(FailureKind::Remote, body, Some(resp.status))
        }
        Ok(resp) => {
            let content_type = resp
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            InvocationResult::Success(InvocationResponse {
                status: resp.status,
                content_type,
                body: resp.body,
            })
        }
    }
}

/// An argument counts as present unless missing or `null`.
fn arg_value<'a>(args: &'a Arguments, name: &str) -> Option<&'a Value> {
    args.get(name).filter(|v| !v.is_null())
}

/// Render a flat primitive for a path, query or header slot.
fn render_scalar(name: &str, value: &Value) -> Result<String, InvocationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(InvocationError::InvalidArgument {
            name: name.to_string(),
            reason: "expected a string, number or boolean".into(),
        }),
    }
}

/// Substitute every `{name}` placeholder in one pass.
fn build_path(template: &str, args: &Arguments) -> Result<String, InvocationError> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(len) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + len];
        let value = arg_value(args, name)
            .ok_or_else(|| InvocationError::UnresolvedPathParameter(name.to_string()))?;
        path.push_str(&rest[..open]);
        path.push_str(&urlencoding::encode(&render_scalar(name, value)?));
        rest = &rest[open + len + 1..];
    }
    path.push_str(rest);
    Ok(path)
}

/// Query string in declared parameter order, RFC 3986 percent-encoded.
fn build_query(op: &OperationDescriptor, args: &Arguments) -> Result<String, InvocationError> {
    let mut pairs = Vec::new();
    for param in op.parameters_in(ParamLocation::Query) {
        if let Some(value) = arg_value(args, &param.name) {
            let value = render_scalar(&param.name, value)?;
            pairs.push(format!(
                "{}={}",
                urlencoding::encode(&param.name),
                urlencoding::encode(&value)
            ));
        }
    }
    Ok(pairs.join("&"))
}

fn build_url(base_url: &str, path: &str, query: &str) -> Result<Url, InvocationError> {
    let mut url = format!("{}{}", base_url.trim_end_matches('/'), path);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    Url::parse(&url).map_err(|err| InvocationError::InvalidUrl {
        reason: err.to_string(),
        url,
    })
}

fn build_body(op: &OperationDescriptor, args: &Arguments) -> Result<Option<Bytes>, InvocationError> {
    let Some(request_body) = op.request_body.as_ref() else {
        return Ok(None);
    };
    if !op.method.accepts_body() {
        return Ok(None);
    }

    let Some(payload) = select_body(op, request_body, args) else {
        if request_body.required {
            return Err(InvocationError::MissingArgument(BODY_ARGUMENT.into()));
        }
        return Ok(None);
    };

    if !request_body.is_json() {
        return Err(InvocationError::UnsupportedContentType(
            request_body.content_type.clone(),
        ));
    }

    let bytes = serde_json::to_vec(&payload).map_err(|err| InvocationError::InvalidArgument {
        name: BODY_ARGUMENT.into(),
        reason: err.to_string(),
    })?;
    Ok(Some(Bytes::from(bytes)))
}

/// Pick the payload: explicit `body`, else the single structured leftover
/// argument, else leftover arguments named after body schema properties.
///
/// A declared parameter named `body` keeps its argument; the payload then
/// comes from the leftover rules only.
fn select_body(op: &OperationDescriptor, request_body: &RequestBody, args: &Arguments) -> Option<Value> {
    let explicit = match op.parameter(BODY_ARGUMENT) {
        Some(_) => None,
        None => arg_value(args, BODY_ARGUMENT),
    };
    if let Some(body) = explicit {
        // Callers often hand over the body as JSON text.
        if let Value::String(text) = body {
            if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(text) {
                return Some(parsed);
            }
        }
        return Some(body.clone());
    }

    let residual: Vec<(&String, &Value)> = args
        .iter()
        .filter(|(name, value)| !value.is_null() && op.parameter(name).is_none())
        .collect();

    if let [(_, value)] = residual.as_slice() {
        if value.is_object() || value.is_array() {
            return Some((*value).clone());
        }
    }

    let properties: HashSet<&str> = request_body.property_names().collect();
    let assembled: Map<String, Value> = residual
        .into_iter()
        .filter(|(name, _)| properties.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    (!assembled.is_empty()).then_some(Value::Object(assembled))
}
