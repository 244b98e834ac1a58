//! Tracker configuration.

use crate::storage::KeyValueStore;
use crate::transport::Uploader;
use std::sync::Arc;
use std::time::Duration;

/// Production API host.
pub const DEFAULT_API_HOST: &str = "https://ecdmp.tenmax.io/api/v1";

/// Beta API host.
pub const BETA_API_HOST: &str = "https://beta-ecdmp.tenmax.io/api/v1";

/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Default idle time after which a session expires.
pub const DEFAULT_SESSION_EXPIRE: Duration = Duration::from_secs(30 * 60);

/// Default maximum number of queued events.
pub const DEFAULT_MAX_QUEUE_LEN: usize = 1000;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) api_host: String,
    pub(crate) flush_interval: Duration,
    pub(crate) session_expire: Duration,
    pub(crate) max_queue_len: usize,
    pub(crate) timeout: Duration,
}

impl Config {
    /// Get the API host.
    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    /// Get the flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Get the session expiry.
    pub fn session_expire(&self) -> Duration {
        self.session_expire
    }

    /// Get the max queue length.
    pub fn max_queue_len(&self) -> usize {
        self.max_queue_len
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for the tracker.
#[derive(Default)]
pub struct TrackerBuilder {
    api_host: Option<String>,
    flush_interval: Option<Duration>,
    session_expire: Option<Duration>,
    max_queue_len: Option<usize>,
    timeout: Option<Duration>,
    pub(crate) store: Option<Arc<dyn KeyValueStore>>,
    pub(crate) uploader: Option<Arc<dyn Uploader>>,
}

impl TrackerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API host.
    pub fn api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = Some(host.into());
        self
    }

    /// Use the beta API host.
    pub fn beta(self) -> Self {
        self.api_host(BETA_API_HOST)
    }

    /// Set the flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Set the session expiry.
    pub fn session_expire(mut self, expire: Duration) -> Self {
        self.session_expire = Some(expire);
        self
    }

    /// Set the max queue length.
    pub fn max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = Some(len);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Persist preference and events through the given store.
    ///
    /// Defaults to an in-memory store.
    pub fn store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Upload batches through the given uploader.
    ///
    /// Defaults to the HTTP transport against `api_host`.
    pub fn uploader(mut self, uploader: impl Uploader + 'static) -> Self {
        self.uploader = Some(Arc::new(uploader));
        self
    }

    /// Build the configuration.
    pub(crate) fn build_config(&self) -> Result<Config, crate::Error> {
        let config = Config {
            api_host: self
                .api_host
                .clone()
                .unwrap_or_else(|| DEFAULT_API_HOST.into()),
            flush_interval: self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL),
            session_expire: self.session_expire.unwrap_or(DEFAULT_SESSION_EXPIRE),
            max_queue_len: self.max_queue_len.unwrap_or(DEFAULT_MAX_QUEUE_LEN),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        };

        if config.api_host.is_empty() {
            return Err(crate::Error::Config("api_host cannot be empty".into()));
        }
        if config.flush_interval.is_zero() {
            return Err(crate::Error::Config("flush_interval must be positive".into()));
        }
        if config.max_queue_len == 0 {
            return Err(crate::Error::Config("max_queue_len must be positive".into()));
        }

        Ok(config)
    }
}
