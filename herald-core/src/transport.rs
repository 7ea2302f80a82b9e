//! Transport seam.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::{Request, Response};

/// Performs the actual network call for the terminal interceptor.
///
/// Implementations must honour [`Request::cancel_token`] and report
/// failures with a [`TransportErrorKind`](crate::TransportErrorKind) that
/// separates cancellation, timeout/abort and everything else.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and collect the full response.
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;
}
