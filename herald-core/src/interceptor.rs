//! Interceptors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::chain::Chain;
use crate::config::ClientConfig;
use crate::transport::Transport;
use crate::{HeraldError, Response, Result};

/// Order given to interceptors without a valid order of their own.
pub const DEFAULT_ORDER: i32 = 9999;

/// Order of the terminal [`RealCall`]. Nothing runs after it.
pub const TERMINAL_ORDER: i32 = i32::MAX;

static GLOBAL_INTERCEPTORS: Lazy<RwLock<Vec<Arc<dyn Interceptor>>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// A stage of the interceptor chain.
///
/// An interceptor may inspect or replace the request before calling
/// [`Chain::proceed`], wrap the response or failure coming back, or answer
/// on its own without proceeding.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Execution order; smaller runs first. `None` or negative sorts last.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Called once with the client configuration when the chain is built.
    fn init(&self, _config: &ClientConfig) {}

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Handle the request held by `chain`.
    async fn intercept(&self, chain: &mut Chain) -> Result<Response>;
}

/// Register an interceptor prepended to every client built afterwards.
pub fn register_global_interceptor(interceptor: Arc<dyn Interceptor>) {
    GLOBAL_INTERCEPTORS.write().push(interceptor);
}

/// Interceptors registered process-wide, in registration order.
pub fn global_interceptors() -> Vec<Arc<dyn Interceptor>> {
    GLOBAL_INTERCEPTORS.read().clone()
}

/// Terminal interceptor performing the network call.
pub struct RealCall {
    transport: Arc<dyn Transport>,
}

impl RealCall {
    /// Create the terminal stage over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Interceptor for RealCall {
    fn order(&self) -> Option<i32> {
        Some(TERMINAL_ORDER)
    }

    async fn intercept(&self, chain: &mut Chain) -> Result<Response> {
        let request = chain.request();
        self.transport.send(request).await.map_err(HeraldError::from)
    }
}

/// Logs requests and responses when the client runs in debug mode.
#[derive(Debug, Default)]
pub struct LoggingInterceptor {
    enabled: AtomicBool,
}

impl LoggingInterceptor {
    /// Create a disabled logging interceptor; `init` enables it from `debug`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether logging is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn order(&self) -> Option<i32> {
        Some(TERMINAL_ORDER - 1)
    }

    fn init(&self, config: &ClientConfig) {
        self.enabled.store(config.debug, Ordering::Relaxed);
    }

    async fn intercept(&self, chain: &mut Chain) -> Result<Response> {
        let request = chain.request().clone();

        if !self.is_enabled() {
            return chain.proceed(request).await;
        }

        tracing::debug!(
            method = %request.method,
            url = %request.full_url(),
            "Sending HTTP request"
        );
        for (name, value) in &request.headers {
            tracing::trace!(
                header = %name,
                value = ?value,
                "Request header"
            );
        }

        let start = Instant::now();
        let result = chain.proceed(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => {
                tracing::debug!(
                    status = %response.status(),
                    elapsed_ms,
                    "Received HTTP response"
                );
                for (name, value) in response.headers() {
                    tracing::trace!(
                        header = %name,
                        value = ?value,
                        "Response header"
                    );
                }
            }
            Err(error) => {
                tracing::debug!(
                    error = %error,
                    elapsed_ms,
                    "HTTP request failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InterceptorChain;
    use crate::error::{ErrorKind, TransportError};
    use crate::{Request, RequestMethod};
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use parking_lot::Mutex;

    struct Echo {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn send(&self, request: &Request) -> std::result::Result<Response, TransportError> {
            self.seen.lock().push(request.url.clone());
            Ok(Response::new(
                request.clone(),
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from(request.url.clone()),
            ))
        }
    }

    struct Failing;

    #[async_trait]
    impl Transport for Failing {
        async fn send(&self, _: &Request) -> std::result::Result<Response, TransportError> {
            Err(TransportError::timed_out("deadline exceeded"))
        }
    }

    #[tokio::test]
    async fn test_real_call_sends_current_request() {
        let echo = Arc::new(Echo {
            seen: Mutex::new(Vec::new()),
        });
        let chain = InterceptorChain::with_interceptors([
            Arc::new(RealCall::new(echo.clone())) as Arc<dyn Interceptor>,
        ]);

        let response = chain
            .intercept(Request::with_url(RequestMethod::Get, "/ping"))
            .await
            .unwrap();

        assert_eq!(response.text().unwrap(), "/ping");
        assert_eq!(*echo.seen.lock(), vec!["/ping".to_string()]);
    }

    #[tokio::test]
    async fn test_real_call_wraps_transport_error() {
        let chain = InterceptorChain::with_interceptors([
            Arc::new(RealCall::new(Arc::new(Failing))) as Arc<dyn Interceptor>,
        ]);

        let err = chain.intercept(Request::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_logging_passes_through() {
        let logging = Arc::new(LoggingInterceptor::new());
        let config = ClientConfig::builder().debug(true).build();
        logging.init(&config);
        assert!(logging.is_enabled());

        let chain = InterceptorChain::with_interceptors([
            logging as Arc<dyn Interceptor>,
            Arc::new(RealCall::new(Arc::new(Echo {
                seen: Mutex::new(Vec::new()),
            }))),
        ]);

        let response = chain
            .intercept(Request::with_url(RequestMethod::Get, "/logged"))
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "/logged");
    }

    #[test]
    fn test_orders() {
        let logging = LoggingInterceptor::new();
        assert!(!logging.is_enabled());
        assert!(logging.order() < RealCall::new(Arc::new(Failing)).order());
    }
}
