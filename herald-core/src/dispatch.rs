//! Dispatch layer.
//!
//! A declared service is a thin wrapper around a [`ServiceProxy`]. Calling
//! one of its methods resolves the method's descriptor, builds the request,
//! drives it through the interceptor chain and hands back a cancellable
//! [`Call`].

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::argument::Argument;
use crate::client::Shared;
use crate::declaration::{ServiceDeclaration, ServiceKey};
use crate::request::Cancellation;
use crate::{HeraldError, Request, Response, Result};

/// A declared HTTP service.
///
/// Usually generated by [`service!`](crate::service).
pub trait HttpService: Send + Sync + Sized + 'static {
    /// Register the class-level, method-level and parameter declarations.
    fn declare(service: &mut ServiceDeclaration);

    /// Wrap a proxy bound to this service.
    fn from_proxy(proxy: ServiceProxy) -> Self;

    /// Proxy the service dispatches through.
    fn proxy(&self) -> &ServiceProxy;
}

/// Receives failed invocations.
///
/// `reason` is the rejection returned to the caller, `classified` its
/// cancel/timeout/I-O classification.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, reason: &HeraldError, classified: &HeraldError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&HeraldError, &HeraldError) + Send + Sync,
{
    fn handle(&self, reason: &HeraldError, classified: &HeraldError) {
        self(reason, classified)
    }
}

/// Maps a rejection onto one of the error kinds reported to the [`ErrorHandler`].
pub trait ExceptionClassifier: Send + Sync {
    /// Return a classification, or `None` to let the next classifier try.
    fn classify(&self, request: &Request, reason: &HeraldError) -> Option<HeraldError>;
}

/// Caller cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct CancelClassifier;

impl ExceptionClassifier for CancelClassifier {
    fn classify(&self, request: &Request, reason: &HeraldError) -> Option<HeraldError> {
        if reason.is_cancelled() || (request.is_cancelled() && !reason.is_timeout()) {
            Some(HeraldError::RequestCancelled(request.cancel_message()))
        } else {
            None
        }
    }
}

/// Transport timeout and abort codes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeoutClassifier;

impl ExceptionClassifier for TimeoutClassifier {
    fn classify(&self, _request: &Request, reason: &HeraldError) -> Option<HeraldError> {
        reason
            .is_timeout()
            .then(|| HeraldError::RequestTimeout(reason.to_string()))
    }
}

/// Classifiers every client starts with.
pub fn default_classifiers() -> Vec<Arc<dyn ExceptionClassifier>> {
    vec![Arc::new(CancelClassifier), Arc::new(TimeoutClassifier)]
}

/// First matching classification, generic I/O otherwise.
pub fn classify(
    classifiers: &[Arc<dyn ExceptionClassifier>],
    request: &Request,
    reason: &HeraldError,
) -> HeraldError {
    classifiers
        .iter()
        .find_map(|c| c.classify(request, reason))
        .unwrap_or_else(|| HeraldError::Io(reason.to_string()))
}

/// Pending result of a declared method call.
///
/// Nothing is sent until the call is awaited. [`cancel`](Self::cancel)
/// may be used before or while it is in flight.
#[must_use = "calls do nothing unless awaited"]
pub struct Call {
    future: BoxFuture<'static, Result<Response>>,
    cancellation: Cancellation,
}

impl Call {
    pub(crate) fn new(future: BoxFuture<'static, Result<Response>>, cancellation: Cancellation) -> Self {
        Self {
            future,
            cancellation,
        }
    }

    /// A call that fails without sending anything.
    pub fn failed(error: HeraldError) -> Self {
        Self::new(Box::pin(async move { Err(error) }), Cancellation::new())
    }

    /// Cancel the request with a message.
    pub fn cancel(&self, message: impl Into<String>) {
        self.cancellation.cancel(message);
    }

    /// Check whether the call was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Handle that cancels this call from elsewhere.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }
}

impl Future for Call {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Binding of one service type to a client.
#[derive(Clone)]
pub struct ServiceProxy {
    bound: ServiceKey,
    shared: Arc<Shared>,
}

impl ServiceProxy {
    pub(crate) fn new(bound: ServiceKey, shared: Arc<Shared>) -> Self {
        Self { bound, shared }
    }

    /// Service type this proxy is bound to.
    pub fn bound(&self) -> ServiceKey {
        self.bound
    }

    /// Check whether two proxies share the same client context.
    pub fn same_client(&self, other: &ServiceProxy) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Dispatch a call of `method` on service `S`.
    pub fn invoke<S: HttpService>(&self, method: &str, args: Vec<Argument>) -> Call {
        if TypeId::of::<S>() != self.bound.type_id() {
            return Call::failed(HeraldError::IllegalState(format!(
                "'{}::{}' was invoked through a proxy bound to '{}'.",
                std::any::type_name::<S>(),
                method,
                self.bound.name()
            )));
        }

        let shared = &self.shared;
        let Some(descriptor) = shared.registry.get_metadata(self.bound.type_id(), method) else {
            return Call::failed(HeraldError::IllegalArgument(format!(
                "No request declared for '{}::{}'.",
                self.bound.name(),
                method
            )));
        };

        let mut request = match shared.builder.build(&descriptor, &args) {
            Ok(request) => request,
            Err(error) => {
                warn!(
                    service = self.bound.name(),
                    method,
                    error = %error,
                    "Failed to build request"
                );
                return Call::failed(error);
            }
        };
        if request.base_url.is_none() {
            request.base_url = shared.config.base_url.clone();
        }

        let cancellation = request.cancellation().clone();
        let shared = self.shared.clone();
        let service = self.bound.name();
        let method = method.to_string();

        let future = async move {
            let snapshot = request.clone();
            match shared.chain.intercept(request).await {
                Ok(response) => Ok(response),
                Err(reason) => {
                    let classified = classify(&shared.classifiers, &snapshot, &reason);
                    debug!(
                        service,
                        method = %method,
                        error = %reason,
                        kind = ?classified.kind(),
                        "Request rejected"
                    );
                    if let Some(handler) = &shared.error_handler {
                        handler.handle(&reason, &classified);
                    }
                    Err(reason)
                }
            }
        };

        Call::new(Box::pin(future), cancellation)
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("bound", &self.bound.name())
            .finish()
    }
}
