//! Client error types.
//!
//! Adapter errors ([`HttpError`], [`BrokerError`], [`StoreError`]) pass
//! through the instrumented clients unchanged, wrapped in [`ClientError`].

use serde::Serialize;
use thiserror::Error;

use crate::client::http::{HttpRequest, HttpResponse};
use crate::BoxError;

/// Normalized HTTP failure.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct HttpError {
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub request: Option<HttpRequest>,
    pub response: Option<HttpResponse>,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
            request: None,
            response: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_request(mut self, request: HttpRequest) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach the response, taking the status from it.
    pub fn with_response(mut self, response: HttpResponse) -> Self {
        self.status = Some(response.status);
        self.response = Some(response);
        self
    }
}

/// Broker adapter failure.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct BrokerError {
    pub message: String,
    pub code: Option<String>,
}

impl BrokerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Key-value store adapter failure.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub code: Option<String>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub(crate) fn unexpected_reply(command: &str) -> Self {
        Self::new(format!("unexpected reply to {command}")).with_code("UNEXPECTED_REPLY")
    }
}

/// Error returned by every client method.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The instance was configured but could not be constructed.
    #[error("client '{instance}' is unavailable: {reason}")]
    Unavailable { instance: String, reason: String },
}

impl ClientError {
    /// Stable code for the error shape.
    pub fn code(&self) -> &str {
        match self {
            ClientError::Http(e) => e.code.as_deref().unwrap_or("HTTP_ERROR"),
            ClientError::Broker(e) => e.code.as_deref().unwrap_or("BROKER_ERROR"),
            ClientError::Store(e) => e.code.as_deref().unwrap_or("STORE_ERROR"),
            ClientError::Unavailable { .. } => "CLIENT_UNAVAILABLE",
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Unavailable { .. })
    }
}

/// Why a configured instance could not be built.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("no {kind} adapter factory registered")]
    MissingFactory { kind: &'static str },

    #[error("adapter factory failed: {0}")]
    Factory(#[source] BoxError),

    #[error("initial connect failed: {0}")]
    Connect(#[source] ClientError),

    #[error("initial connect did not complete within {timeout_ms}ms")]
    ConnectTimedOut { timeout_ms: u64 },
}
