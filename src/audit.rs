//! Request audit log: a [`Transport`] decorator that records every outgoing
//! request before it is sent.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::catalog::HttpMethod;
use crate::error::TransportError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Recorded in place of the body when a request carries none.
pub const NO_CONTENT: &str = "No content";

/// What gets recorded for one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub method: HttpMethod,
    pub url: String,
    /// Body as UTF-8 (lossy), or [`NO_CONTENT`].
    pub body: String,
}

impl AuditRecord {
    pub fn from_request(request: &HttpRequest) -> Self {
        let body = match &request.body {
            Some(body) => String::from_utf8_lossy(body).into_owned(),
            None => NO_CONTENT.to_string(),
        };
        Self {
            method: request.method,
            url: request.url.to_string(),
            body,
        }
    }
}

#[derive(Debug, Error)]
#[error("audit sink failed: {0}")]
pub struct AuditSinkError(pub String);

/// Destination for audit records. Must not block.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditSinkError>;
}

/// Emits each record as a structured `tracing` event on the
/// `openapi_invoke::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        tracing::info!(
            target: "openapi_invoke::audit",
            method = %record.method,
            url = %record.url,
            body = %record.body,
            "outgoing request"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Wraps a transport and records each request to a sink before forwarding it
/// unchanged. Sink failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct AuditedTransport<T> {
    inner: T,
    sink: Arc<dyn AuditSink>,
}

impl<T: Transport> AuditedTransport<T> {
    pub fn new(inner: T, sink: Arc<dyn AuditSink>) -> Self {
        Self { inner, sink }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for AuditedTransport<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Err(err) = self.sink.record(&AuditRecord::from_request(&request)) {
            tracing::debug!(error = %err, url = %request.url, "dropping audit record");
        }
        self.inner.send(request).await
    }
}
