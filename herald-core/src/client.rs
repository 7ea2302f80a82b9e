//! Client composition root.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::builder::RequestBuilder;
use crate::chain::InterceptorChain;
use crate::config::ClientConfig;
use crate::declaration::ServiceKey;
use crate::dispatch::{ErrorHandler, ExceptionClassifier, HttpService, ServiceProxy, default_classifiers};
use crate::interceptor::{Interceptor, LoggingInterceptor, RealCall, global_interceptors};
use crate::registry::MetadataRegistry;
use crate::transport::Transport;
use crate::{HeraldError, Result};

/// State shared by every proxy of one client.
pub(crate) struct Shared {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) registry: Arc<MetadataRegistry>,
    pub(crate) builder: RequestBuilder,
    pub(crate) chain: InterceptorChain,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
    pub(crate) classifiers: Vec<Arc<dyn ExceptionClassifier>>,
}

/// Declarative HTTP client.
///
/// ```rust,ignore
/// let herald = Herald::builder()
///     .config(ClientConfig::builder().base_url("http://localhost:8080").build())
///     .transport(transport)
///     .build()?;
///
/// let users = herald.create::<UserService>();
/// let response = users.get("42").await?;
/// ```
pub struct Herald {
    shared: Arc<Shared>,
    proxies: Mutex<HashMap<TypeId, ServiceProxy>>,
}

impl Herald {
    /// Create a new client builder.
    pub fn builder() -> HeraldBuilder {
        HeraldBuilder::default()
    }

    /// Bind a declared service to this client.
    ///
    /// The service is registered on first use. Repeated calls share the
    /// same proxy.
    pub fn create<T: HttpService>(&self) -> T {
        let proxy = self
            .proxies
            .lock()
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                self.shared.registry.register_service::<T>();
                debug!(service = std::any::type_name::<T>(), "Created service proxy");
                ServiceProxy::new(ServiceKey::of::<T>(), self.shared.clone())
            })
            .clone();

        T::from_proxy(proxy)
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Get the metadata registry.
    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.shared.registry
    }

    /// Get the interceptor chain.
    pub fn chain(&self) -> &InterceptorChain {
        &self.shared.chain
    }

    /// Add an interceptor to the live client. Returns the handle used for removal.
    pub fn add_interceptor(&self, interceptor: impl Interceptor + 'static) -> Arc<dyn Interceptor> {
        let interceptor: Arc<dyn Interceptor> = Arc::new(interceptor);
        interceptor.init(&self.shared.config);
        self.shared.chain.add_interceptor(interceptor.clone());
        interceptor
    }

    /// Remove an interceptor previously added.
    pub fn remove_interceptor(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        self.shared.chain.remove_interceptor(interceptor)
    }
}

impl std::fmt::Debug for Herald {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Herald")
            .field("config", &self.shared.config)
            .field("chain", &self.shared.chain)
            .finish()
    }
}

/// Builder for [`Herald`].
#[derive(Default)]
pub struct HeraldBuilder {
    config: ClientConfig,
    interceptors: Vec<Arc<dyn Interceptor>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    classifiers: Vec<Arc<dyn ExceptionClassifier>>,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<Arc<MetadataRegistry>>,
    builder: Option<RequestBuilder>,
}

impl HeraldBuilder {
    /// Set the client configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the configuration collected so far.
    pub fn client_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Set the handler notified of failed invocations.
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Add an interceptor.
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Add a shared interceptor.
    pub fn interceptor_arc(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Add a classifier consulted after the built-in ones.
    pub fn classifier(mut self, classifier: impl ExceptionClassifier + 'static) -> Self {
        self.classifiers.push(Arc::new(classifier));
        self
    }

    /// Set the transport used by the terminal interceptor.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set a shared transport.
    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a dedicated registry instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a customised request builder.
    pub fn request_builder(mut self, builder: RequestBuilder) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Build the client.
    ///
    /// The chain holds the global interceptors, then the configured ones,
    /// then the logging interceptor and the terminal real call. Every
    /// interceptor is initialised with the configuration.
    pub fn build(self) -> Result<Herald> {
        let transport = self.transport.ok_or_else(|| {
            HeraldError::IllegalState("A transport is required to build a client.".into())
        })?;

        let config = Arc::new(self.config);

        let mut interceptors = global_interceptors();
        interceptors.extend(self.interceptors);
        interceptors.push(Arc::new(LoggingInterceptor::new()));
        interceptors.push(Arc::new(RealCall::new(transport)));

        for interceptor in &interceptors {
            interceptor.init(&config);
        }

        let mut classifiers = default_classifiers();
        classifiers.extend(self.classifiers);

        debug!(
            base_url = ?config.base_url,
            interceptors = interceptors.len(),
            debug = config.debug,
            "Built client"
        );

        Ok(Herald {
            shared: Arc::new(Shared {
                config,
                registry: self.registry.unwrap_or_else(MetadataRegistry::global),
                builder: self.builder.unwrap_or_default(),
                chain: InterceptorChain::with_interceptors(interceptors),
                error_handler: self.error_handler,
                classifiers,
            }),
            proxies: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::declaration::{Declaration, ServiceDeclaration, markers};
    use crate::error::{ErrorKind, TransportError};
    use crate::{Argument, Call, Request, Response};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every request with its own url and records what it saw.
    #[derive(Default)]
    struct Recorder {
        sent: parking_lot::Mutex<Vec<Request>>,
        fail_with: Option<TransportError>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: &Request) -> std::result::Result<Response, TransportError> {
            self.sent.lock().push(request.clone());
            if let Some(error) = &self.fail_with {
                return Err(error.clone());
            }
            Ok(Response::new(
                request.clone(),
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from(request.full_url()),
            ))
        }
    }

    struct Users {
        proxy: ServiceProxy,
    }

    impl HttpService for Users {
        fn declare(service: &mut ServiceDeclaration) {
            service.class_mut().http("/users").headers(["Accept: application/json"]);
            service.method("get").get("/:id").param(markers::path("id"));
            service
                .method("create")
                .post("")
                .param(markers::body())
                .param(markers::config());
            service.method("broken").get("/:missing");
        }

        fn from_proxy(proxy: ServiceProxy) -> Self {
            Self { proxy }
        }

        fn proxy(&self) -> &ServiceProxy {
            &self.proxy
        }
    }

    impl Users {
        fn get(&self, id: &str) -> Call {
            self.proxy.invoke::<Self>("get", vec![Argument::from(id)])
        }

        fn create(&self, body: serde_json::Value, config: serde_json::Value) -> Call {
            self.proxy.invoke::<Self>("create", vec![body.into(), config.into()])
        }

        fn broken(&self) -> Call {
            self.proxy.invoke::<Self>("broken", vec![])
        }
    }

    struct Other {
        proxy: ServiceProxy,
    }

    impl HttpService for Other {
        fn declare(_: &mut ServiceDeclaration) {}

        fn from_proxy(proxy: ServiceProxy) -> Self {
            Self { proxy }
        }

        fn proxy(&self) -> &ServiceProxy {
            &self.proxy
        }
    }

    fn client(transport: Arc<Recorder>) -> HeraldBuilder {
        Herald::builder()
            .config(ClientConfig::builder().base_url("http://api.local").build())
            .registry(Arc::new(MetadataRegistry::new()))
            .transport_arc(transport)
    }

    #[tokio::test]
    async fn test_call_reaches_transport() {
        let transport = Arc::new(Recorder::default());
        let herald = client(transport.clone()).build().unwrap();

        let users = herald.create::<Users>();
        let response = users.get("42").await.unwrap();

        assert_eq!(response.text().unwrap(), "http://api.local/users/42");
        let sent = transport.sent.lock();
        assert_eq!(sent[0].header("accept"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_config_argument_overrides_request() {
        let transport = Arc::new(Recorder::default());
        let herald = client(transport.clone()).build().unwrap();

        let response = herald
            .create::<Users>()
            .create(json!({"name": "ann"}), json!({"baseURL": "http://other.local"}))
            .await
            .unwrap();

        assert_eq!(response.text().unwrap(), "http://other.local/users/");
        assert_eq!(response.request().method.as_str(), "post");
    }

    #[test]
    fn test_build_requires_transport() {
        let err = Herald::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_create_is_idempotent() {
        let herald = client(Arc::new(Recorder::default())).build().unwrap();

        let a = herald.create::<Users>();
        let b = herald.create::<Users>();
        assert!(a.proxy().same_client(b.proxy()));
        assert!(herald.registry().is_registered(TypeId::of::<Users>()));
    }

    #[tokio::test]
    async fn test_detached_proxy_is_illegal_state() {
        let herald = client(Arc::new(Recorder::default())).build().unwrap();
        let other = herald.create::<Other>();

        let err = other
            .proxy()
            .invoke::<Users>("get", vec!["1".into()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[tokio::test]
    async fn test_undeclared_method_is_rejected() {
        let herald = client(Arc::new(Recorder::default())).build().unwrap();
        let other = herald.create::<Other>();

        let err = other.proxy().invoke::<Other>("missing", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    }

    #[tokio::test]
    async fn test_build_failure_skips_error_handler() {
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        let herald = client(Arc::new(Recorder::default()))
            .error_handler(move |_: &HeraldError, _: &HeraldError| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let err = herald.create::<Users>().broken().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathVariableNotMatch);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_handler_sees_classified_failure() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let transport = Arc::new(Recorder {
            fail_with: Some(TransportError::timed_out("too slow")),
            ..Default::default()
        });
        let herald = client(transport)
            .error_handler(move |reason: &HeraldError, classified: &HeraldError| {
                sink.lock().push((reason.kind(), classified.kind()));
            })
            .build()
            .unwrap();

        let err = herald.create::<Users>().get("1").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(
            *seen.lock(),
            vec![(ErrorKind::Transport, ErrorKind::RequestTimeout)]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_send() {
        let transport = Arc::new(Recorder::default());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let herald = client(transport.clone())
            .error_handler(move |_: &HeraldError, classified: &HeraldError| {
                sink.lock().push(classified.to_string());
            })
            .build()
            .unwrap();

        let call = herald.create::<Users>().get("1");
        call.cancel("changed my mind");

        let err = call.await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(transport.sent.lock().is_empty());
        assert_eq!(*seen.lock(), vec!["Request cancelled: changed my mind".to_string()]);
    }

    #[tokio::test]
    async fn test_added_interceptor_runs_and_can_be_removed() {
        struct Stamp;

        #[async_trait]
        impl Interceptor for Stamp {
            fn order(&self) -> Option<i32> {
                Some(1)
            }

            async fn intercept(&self, chain: &mut Chain) -> Result<Response> {
                let mut request = chain.request().clone();
                request
                    .headers
                    .insert("x-stamp", http::HeaderValue::from_static("1"));
                chain.proceed(request).await
            }
        }

        let transport = Arc::new(Recorder::default());
        let herald = client(transport.clone()).build().unwrap();
        let users = herald.create::<Users>();

        let stamp = herald.add_interceptor(Stamp);
        users.get("1").await.unwrap();
        assert!(herald.remove_interceptor(&stamp));
        users.get("2").await.unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent[0].header("x-stamp"), Some("1"));
        assert!(sent[1].header("x-stamp").is_none());
    }
}
