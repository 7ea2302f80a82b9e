//! # Herald Core
//!
//! Declarative HTTP clients: describe endpoints once on a service type and
//! call them like ordinary methods.
//!
//! ## Features
//!
//! - **Declarations**: class-level and method-level paths, verbs, headers and
//!   parameter roles, with service inheritance
//! - **Metadata Registry**: merged per-method descriptors, resolved once and cached
//! - **Request Builder**: validation plus an ordered compilation pipeline for
//!   path variables, query strings, headers and JSON/form/multipart bodies
//! - **Interceptor Chain**: ordered async middleware with short-circuiting
//!   and cooperative cancellation
//! - **Dispatch**: cancellable calls, error classification and error handlers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use herald_core::prelude::*;
//!
//! service! {
//!     #[http("/users")]
//!     pub struct UserService {
//!         #[get("/:id")]
//!         pub fn get(#[path("id")] id: &str);
//!
//!         #[post("")]
//!         pub fn create(#[body] user: serde_json::Value);
//!     }
//! }
//!
//! let herald = Herald::builder()
//!     .config(ClientConfig::builder().base_url("http://localhost:8080").build())
//!     .transport(my_transport)
//!     .build()?;
//!
//! let users = herald.create::<UserService>();
//! let call = users.get("42");
//! let response = call.await?;
//! ```

mod argument;
mod builder;
mod chain;
mod client;
mod config;
mod declaration;
mod descriptor;
mod dispatch;
mod error;
mod interceptor;
mod multipart;
mod registry;
mod request;
mod response;
mod transport;

pub use argument::{Argument, BinaryPart};
pub use builder::{CONFIG_MERGE_ORDER, DescriptorValidator, RequestBuilder, RequestHandler};
pub use chain::{Chain, InterceptorChain, effective_order};
pub use client::{Herald, HeraldBuilder};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use declaration::{
    ClassDeclaration, Declaration, MethodDeclaration, ParamRole, ServiceDeclaration, ServiceKey,
    markers,
};
pub use descriptor::{Descriptor, RequestMethod, ResponseType};
pub use dispatch::{
    Call, CancelClassifier, ErrorHandler, ExceptionClassifier, HttpService, ServiceProxy,
    TimeoutClassifier, classify, default_classifiers,
};
pub use error::{ErrorKind, HeraldError, Result, TransportError, TransportErrorKind};
pub use interceptor::{
    DEFAULT_ORDER, Interceptor, LoggingInterceptor, RealCall, TERMINAL_ORDER, global_interceptors,
    register_global_interceptor,
};
pub use multipart::{MultipartForm, PartValue};
pub use registry::{ClassId, MetadataKey, MetadataRegistry, MethodId};
pub use request::{Cancellation, Request, RequestBody};
pub use response::{Response, ResponseData};
pub use transport::Transport;

// Re-export common types
pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, StatusCode, header};

/// Prelude for common imports.
///
/// ```
/// use herald_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::argument::{Argument, BinaryPart};
    pub use crate::chain::{Chain, InterceptorChain};
    pub use crate::client::{Herald, HeraldBuilder};
    pub use crate::config::{ClientConfig, ClientConfigBuilder};
    pub use crate::declaration::{Declaration, ServiceDeclaration, markers};
    pub use crate::descriptor::{Descriptor, RequestMethod, ResponseType};
    pub use crate::dispatch::{Call, ErrorHandler, ExceptionClassifier, HttpService, ServiceProxy};
    pub use crate::error::{ErrorKind, HeraldError, Result, TransportError, TransportErrorKind};
    pub use crate::interceptor::Interceptor;
    pub use crate::registry::MetadataRegistry;
    pub use crate::request::Request;
    pub use crate::response::{Response, ResponseData};
    pub use crate::service;
    pub use crate::transport::Transport;
    pub use async_trait::async_trait;
}
