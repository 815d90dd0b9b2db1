//! Manager configuration.

use std::sync::Arc;

use ludari_cache::Cache;
use ludari_core::Logger;
use ludari_storage::Storage;

use crate::handler::Handler;

/// Default and bounds for the watch-job tick, in seconds.
pub const DEFAULT_WATCH_INTERVAL_SECS: u32 = 5;
pub const MIN_WATCH_INTERVAL_SECS: u32 = 1;
pub const MAX_WATCH_INTERVAL_SECS: u32 = 5;

/// Environment variable consulted for a default replica identifier.
pub const ENV_REPLICA_ID: &str = "LUDARI_REPLICA_ID";

/// Configuration record for [`Manager::new`](crate::Manager::new).
///
/// `storage` and `logger` are required by construction; everything else has
/// a default: an in-process cache, no method handler, no query secret, a
/// replica id from `LUDARI_REPLICA_ID` or a fresh UUID, scheduling disabled,
/// a 5-second watch tick, and lock release on shutdown.
#[derive(Clone)]
pub struct ManagerOptions {
    pub storage: Arc<dyn Storage>,
    pub logger: Arc<dyn Logger>,
    pub cache: Option<Arc<dyn Cache>>,
    pub handler: Option<Arc<dyn Handler>>,
    pub query_secret: Option<String>,
    pub replica_id: Option<String>,
    pub enabled: bool,
    pub watch_interval_secs: u32,
    pub release_locks_on_shutdown: bool,
}

impl ManagerOptions {
    pub fn new(storage: Arc<dyn Storage>, logger: Arc<dyn Logger>) -> Self {
        Self {
            storage,
            logger,
            cache: None,
            handler: None,
            query_secret: None,
            replica_id: None,
            enabled: false,
            watch_interval_secs: DEFAULT_WATCH_INTERVAL_SECS,
            release_locks_on_shutdown: true,
        }
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn query_secret(mut self, secret: impl Into<String>) -> Self {
        self.query_secret = Some(secret.into());
        self
    }

    pub fn replica_id(mut self, id: impl Into<String>) -> Self {
        self.replica_id = Some(id.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Watch-job tick in seconds; clamped into `[1, 5]` at construction.
    pub fn watch_interval_secs(mut self, secs: u32) -> Self {
        self.watch_interval_secs = secs;
        self
    }

    pub fn release_locks_on_shutdown(mut self, release: bool) -> Self {
        self.release_locks_on_shutdown = release;
        self
    }
}
