//! # Herald HTTP
//!
//! The default transport for Herald clients, backed by `reqwest`.
//!
//! - **Connection Pooling**: one pooled client per transport
//! - **Compression**: gzip/brotli per configuration
//! - **Timeouts**: client-wide from the configuration, per request from the
//!   `timeout` config key
//! - **Cancellation**: in-flight exchanges abort when the call is cancelled
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use herald_core::{ClientConfig, Herald};
//! use herald_http::ReqwestBuilderExt;
//!
//! # fn main() -> herald_core::Result<()> {
//! let herald = Herald::builder()
//!     .config(ClientConfig::builder().base_url("https://api.example.com").build())
//!     .build_with_reqwest()?;
//! # Ok(())
//! # }
//! ```

mod transport;

pub use transport::ReqwestTransport;

use herald_core::{Herald, HeraldBuilder, Result};

/// Build a [`Herald`] over a [`ReqwestTransport`] configured from the builder's config.
pub trait ReqwestBuilderExt {
    /// Build the client with the reqwest transport.
    fn build_with_reqwest(self) -> Result<Herald>;
}

impl ReqwestBuilderExt for HeraldBuilder {
    fn build_with_reqwest(self) -> Result<Herald> {
        let transport = ReqwestTransport::new(self.client_config())?;
        self.transport(transport).build()
    }
}
