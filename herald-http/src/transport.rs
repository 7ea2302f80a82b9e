//! reqwest transport.

use std::time::Instant;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use herald_core::{
    ClientConfig, HeraldError, Request, Response, Transport, TransportError, TransportErrorKind,
};
use tracing::debug;
use url::Url;

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> herald_core::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .default_headers(default_headers(config)?);

        if config.gzip {
            builder = builder.gzip(true);
        }
        if config.brotli {
            builder = builder.brotli(true);
        }
        if config.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        let inner = builder
            .build()
            .map_err(|e| HeraldError::IllegalArgument(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { inner })
    }

    /// Wrap an existing `reqwest` client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    async fn exchange(
        &self,
        request: &Request,
        url: Url,
        body: Option<bytes::Bytes>,
    ) -> Result<(http::StatusCode, HeaderMap, bytes::Bytes), reqwest::Error> {
        let mut builder = self
            .inner
            .request(request.method.to_http(), url)
            .headers(request.headers.clone());

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok((status, headers, body))
    }
}

fn default_headers(config: &ClientConfig) -> herald_core::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.default_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HeraldError::IllegalArgument(format!("Invalid default header '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HeraldError::IllegalArgument(format!("Invalid value for default header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Map a reqwest failure onto the transport error codes.
fn classify(error: reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::TimedOut
    } else if error.is_body() || error.is_decode() {
        TransportErrorKind::Aborted
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, error.to_string())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let full_url = request.full_url();
        let url = Url::parse(&full_url)
            .map_err(|e| TransportError::other(format!("Invalid URL '{full_url}': {e}")))?;
        let body = request
            .data
            .to_bytes()
            .map_err(|e| TransportError::other(e.to_string()))?;

        let token = request.cancel_token();
        let start = Instant::now();

        let (status, headers, body) = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(url = %full_url, "HTTP request cancelled");
                return Err(TransportError::cancelled(request.cancel_message()));
            }
            result = self.exchange(request, url, body) => result.map_err(classify)?,
        };

        debug!(
            method = %request.method,
            url = %full_url,
            status = %status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "HTTP exchange completed"
        );

        Ok(Response::new(request.clone(), status, headers, body))
    }
}
