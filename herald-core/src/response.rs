//! HTTP response wrapper.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::descriptor::ResponseType;
use crate::{HeraldError, Request, Result};

/// Response body decoded according to the request's response type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    /// Parsed JSON document.
    Json(Value),
    /// Text or document body.
    Text(String),
    /// Raw bytes (array buffer, blob, stream).
    Binary(Bytes),
}

/// HTTP response wrapper.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    body: Bytes,
    request: Request,
}

impl Response {
    /// Create a response for the request that produced it.
    pub fn new(request: Request, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            request,
        }
    }

    /// Override the status text.
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the status text.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the request that produced this response.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body as bytes.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| HeraldError::Io(format!("Response body is not valid UTF-8: {e}")))
    }

    /// Parse the response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decode the body according to the declared response type.
    ///
    /// Without a declared type the `Content-Type` header decides between
    /// JSON and text.
    pub fn data(&self) -> Result<ResponseData> {
        let response_type = self.request.response_type.unwrap_or_else(|| {
            match self.header("content-type") {
                Some(ct) if ct.contains("json") => ResponseType::Json,
                _ => ResponseType::Text,
            }
        });

        match response_type {
            ResponseType::Json if self.body.is_empty() => Ok(ResponseData::Json(Value::Null)),
            ResponseType::Json => Ok(ResponseData::Json(self.json()?)),
            ResponseType::Text | ResponseType::Document => Ok(ResponseData::Text(self.text()?)),
            ResponseType::ArrayBuffer | ResponseType::Blob | ResponseType::Stream => {
                Ok(ResponseData::Binary(self.body.clone()))
            }
        }
    }

    /// Check for an error response and return it.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            let message = self.text().unwrap_or_else(|_| "Unknown error".to_string());
            Err(HeraldError::Io(format!("{} {}: {}", self.status.as_u16(), self.status_text, message)))
        } else {
            Ok(self)
        }
    }
}
