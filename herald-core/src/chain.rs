//! Interceptor chain.
//!
//! The chain runs one request through an ordered list of interceptors. Each
//! interceptor receives a [`Chain`] positioned just after itself and decides
//! whether, and with which request, to [`proceed`](Chain::proceed) to its
//! downstream neighbours.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::interceptor::{DEFAULT_ORDER, Interceptor};
use crate::{HeraldError, Request, Response, Result};

type Interceptors = Arc<[Arc<dyn Interceptor>]>;

/// Execution context of one interceptor run.
pub struct Chain {
    interceptors: Interceptors,
    index: usize,
    request: Request,
}

impl Chain {
    fn new(interceptors: Interceptors, index: usize, request: Request) -> Self {
        Self {
            interceptors,
            index,
            request,
        }
    }

    /// Request passed to the most recent [`proceed`](Self::proceed).
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable access to the current request.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Position of the next interceptor to run.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Hand the request to the next interceptor.
    ///
    /// Fails with [`HeraldError::RequestCancelled`] when the request was
    /// cancelled, and with [`HeraldError::IllegalState`] when no interceptor
    /// is left to produce a response.
    pub async fn proceed(&mut self, request: Request) -> Result<Response> {
        self.request = request.clone();

        if request.is_cancelled() {
            trace!(index = self.index, "Request cancelled before proceeding");
            return Err(HeraldError::RequestCancelled(request.cancel_message()));
        }

        let Some(interceptor) = self.interceptors.get(self.index).cloned() else {
            return Err(HeraldError::IllegalState(
                "No real call in this interceptor chain, request has been rejected.".into(),
            ));
        };

        trace!(
            index = self.index,
            interceptor = interceptor.name(),
            "Proceeding"
        );

        let mut next = Chain::new(self.interceptors.clone(), self.index + 1, request);
        interceptor.intercept(&mut next).await
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("index", &self.index)
            .field("len", &self.interceptors.len())
            .field("request", &self.request)
            .finish()
    }
}

/// Effective order: absent or negative orders sort after explicit ones.
pub fn effective_order(interceptor: &dyn Interceptor) -> i32 {
    match interceptor.order() {
        Some(order) if order >= 0 => order,
        _ => DEFAULT_ORDER,
    }
}

/// Ordered collection of interceptors shared by every invocation of a client.
///
/// The sorted view is computed on the first invocation after a structural
/// change and reused until the next one.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
    sorted: RwLock<Option<Interceptors>>,
}

impl InterceptorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain from interceptors in registration order.
    pub fn with_interceptors(interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: RwLock::new(interceptors.into_iter().collect()),
            sorted: RwLock::new(None),
        }
    }

    /// Register an interceptor.
    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        let mut sorted = self.sorted.write();
        self.interceptors.write().push(interceptor);
        *sorted = None;
    }

    /// Remove an interceptor by identity. Returns whether it was registered.
    pub fn remove_interceptor(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        let mut sorted = self.sorted.write();
        let mut interceptors = self.interceptors.write();
        let before = interceptors.len();
        interceptors.retain(|i| !Arc::ptr_eq(i, interceptor));

        let removed = interceptors.len() != before;
        if removed {
            *sorted = None;
        }
        removed
    }

    /// Number of registered interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    /// Check whether no interceptor is registered.
    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    /// Interceptors in execution order.
    pub fn sorted(&self) -> Arc<[Arc<dyn Interceptor>]> {
        if let Some(sorted) = self.sorted.read().as_ref() {
            return sorted.clone();
        }

        // Lock order is `sorted` then `interceptors`, as in add/remove.
        let mut memo = self.sorted.write();
        if let Some(sorted) = memo.as_ref() {
            return sorted.clone();
        }

        let mut interceptors = self.interceptors.read().clone();
        interceptors.sort_by_key(|i| effective_order(i.as_ref()));
        let sorted: Interceptors = interceptors.into();

        trace!(len = sorted.len(), "Sorted interceptor chain");
        *memo = Some(sorted.clone());
        sorted
    }

    /// Run a request through the chain.
    pub async fn intercept(&self, request: Request) -> Result<Response> {
        let mut chain = Chain::new(self.sorted(), 0, request.clone());
        chain.proceed(request).await
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sorted().iter().map(|i| i.name()).collect();
        f.debug_struct("InterceptorChain")
            .field("interceptors", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records its order on the way in and proceeds.
    struct Recording {
        order: Option<i32>,
        label: i32,
        visits: Arc<Mutex<Vec<i32>>>,
    }

    #[async_trait]
    impl Interceptor for Recording {
        fn order(&self) -> Option<i32> {
            self.order
        }

        async fn intercept(&self, chain: &mut Chain) -> Result<Response> {
            self.visits.lock().push(self.label);
            let request = chain.request().clone();
            chain.proceed(request).await
        }
    }

    /// Answers without proceeding.
    struct Terminal {
        order: i32,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Interceptor for Terminal {
        fn order(&self) -> Option<i32> {
            Some(self.order)
        }

        async fn intercept(&self, chain: &mut Chain) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(
                chain.request().clone(),
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from_static(b"done"),
            ))
        }
    }

    fn recording(order: Option<i32>, label: i32, visits: &Arc<Mutex<Vec<i32>>>) -> Arc<dyn Interceptor> {
        Arc::new(Recording {
            order,
            label,
            visits: visits.clone(),
        })
    }

    fn terminal(order: i32) -> (Arc<dyn Interceptor>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let terminal = Arc::new(Terminal {
            order,
            calls: calls.clone(),
        });
        (terminal, calls)
    }

    #[tokio::test]
    async fn test_visits_in_ascending_order() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let (real, calls) = terminal(i32::MAX);
        let chain = InterceptorChain::with_interceptors([
            recording(Some(5), 5, &visits),
            recording(Some(1), 1, &visits),
            real,
            recording(Some(3), 3, &visits),
        ]);

        let response = chain.intercept(Request::new()).await.unwrap();

        assert_eq!(response.text().unwrap(), "done");
        assert_eq!(*visits.lock(), vec![1, 3, 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_and_negative_orders_sort_last_stably() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let (real, _) = terminal(i32::MAX);
        let chain = InterceptorChain::with_interceptors([
            recording(None, 100, &visits),
            recording(Some(-4), 101, &visits),
            recording(Some(10_000), 102, &visits),
            recording(Some(2), 2, &visits),
            real,
        ]);

        chain.intercept(Request::new()).await.unwrap();
        assert_eq!(*visits.lock(), vec![2, 100, 101, 102]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_downstream() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let (early, early_calls) = terminal(1);
        let (real, real_calls) = terminal(i32::MAX);
        let chain = InterceptorChain::with_interceptors([
            real,
            recording(Some(2), 2, &visits),
            early,
        ]);

        chain.intercept(Request::new()).await.unwrap();

        assert_eq!(early_calls.load(Ordering::SeqCst), 1);
        assert_eq!(real_calls.load(Ordering::SeqCst), 0);
        assert!(visits.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain_is_illegal_state() {
        let chain = InterceptorChain::new();
        let err = chain.intercept(Request::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[tokio::test]
    async fn test_chain_without_terminal_is_illegal_state() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::with_interceptors([recording(Some(1), 1, &visits)]);

        let err = chain.intercept(Request::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(*visits.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_cancelled_request_never_reaches_terminal() {
        let (real, calls) = terminal(i32::MAX);
        let chain = InterceptorChain::with_interceptors([real]);

        let request = Request::new();
        request.cancel("user aborted");

        let err = chain.intercept(request).await.unwrap_err();
        assert!(matches!(err, HeraldError::RequestCancelled(ref m) if m == "user aborted"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_interceptor_can_rewrite_request() {
        struct Rewrite;

        #[async_trait]
        impl Interceptor for Rewrite {
            fn order(&self) -> Option<i32> {
                Some(0)
            }

            async fn intercept(&self, chain: &mut Chain) -> Result<Response> {
                let mut request = chain.request().clone();
                request.url = "/rewritten".into();
                let response = chain.proceed(request).await?;
                assert_eq!(chain.request().url, "/rewritten");
                Ok(response)
            }
        }

        let (real, _) = terminal(i32::MAX);
        let chain = InterceptorChain::with_interceptors([Arc::new(Rewrite) as Arc<dyn Interceptor>, real]);

        let response = chain
            .intercept(Request::with_url(Default::default(), "/initial"))
            .await
            .unwrap();
        assert_eq!(response.request().url, "/rewritten");
    }

    #[tokio::test]
    async fn test_add_and_remove_invalidate_order() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let (real, _) = terminal(i32::MAX);
        let chain = InterceptorChain::with_interceptors([real, recording(Some(5), 5, &visits)]);

        chain.intercept(Request::new()).await.unwrap();

        let first = recording(Some(1), 1, &visits);
        chain.add_interceptor(first.clone());
        chain.intercept(Request::new()).await.unwrap();

        assert!(chain.remove_interceptor(&first));
        assert!(!chain.remove_interceptor(&first));
        chain.intercept(Request::new()).await.unwrap();

        assert_eq!(*visits.lock(), vec![5, 1, 5, 5]);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_memo_never_outlives_concurrent_changes() {
        let chain = Arc::new(InterceptorChain::new());
        let (real, _) = terminal(i32::MAX);
        chain.add_interceptor(real);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let chain = chain.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        chain.sorted();
                    }
                })
            })
            .collect();

        let visits = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            chain.add_interceptor(recording(Some(i), i, &visits));
            chain.sorted();
        }
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(chain.sorted().len(), chain.len());
        assert_eq!(chain.len(), 51);
    }
}
