//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration consumed once by every interceptor's `init` and by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL relative request URLs resolve against.
    pub base_url: Option<String>,
    /// Whole-exchange timeout, in milliseconds on the wire.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Enables request/response logging.
    pub debug: bool,
    /// `(name, value)` pairs sent with every request.
    pub default_headers: Vec<(String, String)>,
    pub user_agent: String,
    /// Accept gzip-encoded responses.
    pub gzip: bool,
    /// Accept brotli-encoded responses.
    pub brotli: bool,
    pub follow_redirects: bool,
    /// Redirect hops allowed when `follow_redirects` is on.
    pub max_redirects: usize,
    /// Settings the core does not interpret, available to interceptors.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            debug: false,
            default_headers: Vec::new(),
            user_agent: format!("herald/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
            extra: Map::new(),
        }
    }
}

impl ClientConfig {
    /// Start a [`ClientConfigBuilder`] from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Look up a setting the core does not know about.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

/// Plain field setters of [`ClientConfigBuilder`].
macro_rules! setters {
    ($( $(#[$doc:meta])* $field:ident: $ty:ty ),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $field(mut self, value: $ty) -> Self {
                self.config.$field = value;
                self
            }
        )*
    };
}

impl ClientConfigBuilder {
    setters! {
        /// Client-wide timeout; a `timeout` config argument overrides it per call.
        timeout: Duration,
        connect_timeout: Duration,
        /// Turns on the logging interceptor.
        debug: bool,
        gzip: bool,
        brotli: bool,
        follow_redirects: bool,
        max_redirects: usize,
    }

    /// Base URL joined with relative request paths.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Append a header sent with every request.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set a free-form setting.
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
