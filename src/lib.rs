// Herald - A declarative HTTP client for Rust
//
// Services are declared once with path, query, header and body markers.
// Each call is compiled by an ordered request pipeline and then driven
// through an ordered interceptor chain to the transport.

// Re-export core functionality
pub use herald_core::*;

// Re-export the default transport
#[cfg(feature = "reqwest")]
pub use herald_http::{ReqwestBuilderExt, ReqwestTransport};

#[cfg(feature = "reqwest")]
pub use herald_http;

// Prelude for common imports
pub mod prelude {
    pub use herald_core::prelude::*;

    #[cfg(feature = "reqwest")]
    pub use herald_http::{ReqwestBuilderExt, ReqwestTransport};
}
