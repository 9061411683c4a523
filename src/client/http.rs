//! Instrumented HTTP client.
//!
//! # Responsibilities
//! - Inject the active correlation id into outgoing request headers
//! - Log start, success and failure of every request with its duration
//! - Return adapter errors unchanged
//!
//! # Design Decisions
//! - An explicit correlation header set by the caller is never overwritten
//! - Headers and bodies are only logged when the instance opts in

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::error::{ClientError, HttpError};
use crate::client::failing::FailingClient;
use crate::client::instrument::{CallError, InstrumentOptions, Instrumentation};
use crate::logging::metadata::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Normalized response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability an HTTP library must provide to be instrumented.
#[async_trait]
pub trait HttpAdapter: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

impl CallError for HttpError {
    fn describe(&self, metadata: &mut Metadata, options: &InstrumentOptions) {
        if let Some(status) = self.status {
            metadata.insert("status", status);
        }
        if let Some(response) = &self.response {
            describe_response(response, metadata, options);
        }
    }
}

fn describe_response(response: &HttpResponse, metadata: &mut Metadata, options: &InstrumentOptions) {
    metadata.insert("status", response.status);
    if options.include_headers {
        metadata.insert("response_headers", &response.headers);
    }
    if options.include_body {
        if let Some(body) = &response.body {
            metadata.insert("response_body", body);
        }
    }
}

/// HTTP adapter wrapped with correlation and call logging.
pub struct InstrumentedHttp {
    adapter: Arc<dyn HttpAdapter>,
    instrumentation: Instrumentation,
}

impl InstrumentedHttp {
    pub(crate) fn new(adapter: Arc<dyn HttpAdapter>, instrumentation: Instrumentation) -> Self {
        Self {
            adapter,
            instrumentation,
        }
    }

    pub async fn request(&self, mut request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let header = self.instrumentation.correlation_header();
        if let Some(id) = self.instrumentation.correlation_id() {
            if request.header_value(header).is_none() {
                request.headers.insert(header.to_string(), id);
            }
        }

        let options = self.instrumentation.options();
        let mut details = Metadata::new()
            .with("method", request.method)
            .with("url", &request.url);
        if !request.query.is_empty() {
            details.insert("query", &request.query);
        }
        if options.include_headers {
            details.insert("request_headers", &request.headers);
        }
        if options.include_body {
            if let Some(body) = &request.body {
                details.insert("request_body", body);
            }
        }

        let operation = request.method.as_str();
        let response = self
            .instrumentation
            .observe(operation, details, self.adapter.execute(request), |response, metadata| {
                describe_response(response, metadata, options)
            })
            .await?;
        Ok(response)
    }
}

/// A configured HTTP instance.
pub enum HttpClient {
    Instrumented(InstrumentedHttp),
    Failing(FailingClient),
}

impl HttpClient {
    pub fn instance(&self) -> &str {
        match self {
            HttpClient::Instrumented(client) => client.instrumentation.instance(),
            HttpClient::Failing(client) => client.instance(),
        }
    }

    pub fn is_failing(&self) -> bool {
        matches!(self, HttpClient::Failing(_))
    }

    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        match self {
            HttpClient::Instrumented(client) => client.request(request).await,
            HttpClient::Failing(client) => Err(client.fail(request.method.as_str()).await),
        }
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(HttpRequest::new(HttpMethod::Get, url)).await
    }

    pub async fn post(&self, url: &str, body: Value) -> Result<HttpResponse, ClientError> {
        self.request(HttpRequest::new(HttpMethod::Post, url).body(body)).await
    }

    pub async fn put(&self, url: &str, body: Value) -> Result<HttpResponse, ClientError> {
        self.request(HttpRequest::new(HttpMethod::Put, url).body(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.request(HttpRequest::new(HttpMethod::Delete, url)).await
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("instance", &self.instance())
            .field("failing", &self.is_failing())
            .finish()
    }
}
