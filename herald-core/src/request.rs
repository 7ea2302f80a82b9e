//! Outbound request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::descriptor::{RequestMethod, ResponseType};
use crate::multipart::MultipartForm;
use crate::Result;

/// Request payload, shaped by the declared encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// JSON document.
    Json(Value),
    /// `application/x-www-form-urlencoded` string.
    Form(String),
    /// Multipart payload.
    Multipart(MultipartForm),
    /// Raw text supplied through the config escape hatch.
    Text(String),
}

impl RequestBody {
    /// Check whether there is no body.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Encode the body for the wire.
    pub fn to_bytes(&self) -> Result<Option<Bytes>> {
        Ok(match self {
            Self::Empty => None,
            Self::Json(value) => Some(Bytes::from(serde_json::to_vec(value)?)),
            Self::Form(encoded) => Some(Bytes::from(encoded.clone())),
            Self::Multipart(form) => Some(form.encode()),
            Self::Text(text) => Some(Bytes::from(text.clone())),
        })
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    message: Mutex<String>,
    token: CancellationToken,
}

/// Shared cancellation state of one invocation.
///
/// Clones observe the same flag, so the handle held by the caller cancels
/// every copy of the request travelling through the chain.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    state: Arc<CancelState>,
}

impl Cancellation {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag, record the message and fire the token.
    pub fn cancel(&self, message: impl Into<String>) {
        *self.state.message.lock() = message.into();
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.token.cancel();
    }

    /// Check whether the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Message given to [`cancel`](Self::cancel).
    pub fn message(&self) -> String {
        self.state.message.lock().clone()
    }

    /// Token a transport can await to abort an in-flight call.
    pub fn token(&self) -> CancellationToken {
        self.state.token.clone()
    }
}

/// A request assembled from a descriptor and call arguments.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Path (and query) relative to `base_url`, or an absolute URL.
    pub url: String,
    /// HTTP verb.
    pub method: RequestMethod,
    /// Base URL the transport resolves `url` against.
    pub base_url: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request payload.
    pub data: RequestBody,
    /// Expected response decoding.
    pub response_type: Option<ResponseType>,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
    /// Config keys the core does not interpret.
    pub extensions: Map<String, Value>,
    cancellation: Cancellation,
}

impl Request {
    /// Create an empty GET request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request for the given method and url.
    pub fn with_url(method: RequestMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            ..Self::default()
        }
    }

    /// Cancel the request.
    pub fn cancel(&self, message: impl Into<String>) {
        self.cancellation.cancel(message);
    }

    /// Check whether the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Message given when the request was cancelled.
    pub fn cancel_message(&self) -> String {
        self.cancellation.message()
    }

    /// Token fired on cancellation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancellation.token()
    }

    /// Shared cancellation handle.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Get a header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// URL as the transport will see it.
    pub fn full_url(&self) -> String {
        match &self.base_url {
            Some(base) if !is_absolute(&self.url) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.url.trim_start_matches('/')
            ),
            _ => self.url.clone(),
        }
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
