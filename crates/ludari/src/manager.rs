//! Manager construction, lifecycle, and gated logging.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use uuid::Uuid;

use ludari_cache::{Cache, MemoryCache};
use ludari_core::{validate_replica_id, LogLevel, Logger};
use ludari_crypto::validate_query_secret;
use ludari_storage::Storage;

use crate::config::{
    ManagerOptions, ENV_REPLICA_ID, MAX_WATCH_INTERVAL_SECS, MIN_WATCH_INTERVAL_SECS,
};
use crate::error::{ManagerError, Result};
use crate::handler::{Handler, InlineHandler};
use crate::{control, scheduler, watchdog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Initialized,
    Destroyed,
}

/// A distributed lock this replica acquired and has not yet released.
#[derive(Debug, Clone)]
pub(crate) struct ActiveLock {
    pub lock_value: String,
    pub acquired_at: Instant,
    pub ttl_ms: u64,
    pub job_name: String,
}

pub(crate) struct ManagerInner {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) handler: Option<Arc<dyn Handler>>,
    pub(crate) query_secret: Option<String>,
    pub(crate) replica_id: String,
    pub(crate) enabled: bool,
    pub(crate) watch_interval_secs: u32,
    pub(crate) release_locks_on_shutdown: bool,

    pub(crate) lifecycle: Mutex<Lifecycle>,
    /// Fleet log level, refreshed from Control on every firing.
    pub(crate) log_level: Mutex<LogLevel>,
    /// Job name → running cron timer task.
    pub(crate) timers: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Job name → inline execution.
    pub(crate) inline: Mutex<HashMap<String, InlineHandler>>,
    /// Job name → lock held by this replica.
    pub(crate) active_locks: Mutex<HashMap<String, ActiveLock>>,
    pub(crate) watchdog: Mutex<Option<JoinHandle<()>>>,
    pub(crate) is_resetting: AtomicBool,
}

impl ManagerInner {
    pub(crate) fn is_destroyed(&self) -> bool {
        *self.lifecycle.lock().expect("lifecycle poisoned") == Lifecycle::Destroyed
    }

    fn gate(&self, level: LogLevel) -> bool {
        self.log_level
            .lock()
            .expect("log level poisoned")
            .allows(level)
    }

    pub(crate) fn log_error(&self, message: &str) {
        if self.gate(LogLevel::Error) {
            self.logger.error(message);
        }
    }

    pub(crate) fn log_warn(&self, message: &str) {
        if self.gate(LogLevel::Warn) {
            self.logger.warn(message);
        }
    }

    pub(crate) fn log_info(&self, message: &str) {
        if self.gate(LogLevel::Info) {
            self.logger.log(message);
        }
    }

    pub(crate) fn log_debug(&self, message: &str) {
        if self.gate(LogLevel::Debug) {
            self.logger.debug(message);
        }
    }
}

/// The orchestration engine: one replica of the fleet.
///
/// Cheap to clone; all state lives behind one `Arc`.
#[derive(Clone)]
pub struct Manager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl Manager {
    /// Validate the configuration and build a Manager. Nothing is scheduled
    /// until [`initialize`](Manager::initialize) runs.
    pub fn new(options: ManagerOptions) -> Result<Self> {
        if let Some(secret) = &options.query_secret {
            validate_query_secret(secret)?;
        }

        let (replica_id, from_environment) = match options.replica_id {
            Some(id) => (id, false),
            None => match std::env::var(ENV_REPLICA_ID) {
                Ok(id) if !id.trim().is_empty() => (id.trim().to_string(), true),
                _ => (Uuid::new_v4().to_string(), false),
            },
        };
        validate_replica_id(&replica_id).map_err(ManagerError::Validation)?;

        let watch_interval_secs = options
            .watch_interval_secs
            .clamp(MIN_WATCH_INTERVAL_SECS, MAX_WATCH_INTERVAL_SECS);

        let cache = options
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new()) as Arc<dyn Cache>);

        let inner = Arc::new(ManagerInner {
            storage: options.storage,
            cache,
            logger: options.logger,
            handler: options.handler,
            query_secret: options.query_secret,
            replica_id,
            enabled: options.enabled,
            watch_interval_secs,
            release_locks_on_shutdown: options.release_locks_on_shutdown,
            lifecycle: Mutex::new(Lifecycle::Created),
            log_level: Mutex::new(LogLevel::default()),
            timers: Mutex::new(HashMap::new()),
            inline: Mutex::new(HashMap::new()),
            active_locks: Mutex::new(HashMap::new()),
            watchdog: Mutex::new(None),
            is_resetting: AtomicBool::new(false),
        });

        // An auto-generated id means two restarts look like two replicas,
        // which inflates the roster until pruning catches up. Flag it where
        // a production deployment would notice.
        if !from_environment && in_production() {
            inner.log_warn(&format!(
                "replica id {} was auto-generated; set {ENV_REPLICA_ID} in production",
                inner.replica_id
            ));
        } else {
            inner.log_debug(&format!("replica id: {}", inner.replica_id));
        }

        Ok(Self { inner })
    }

    /// The identifier this replica registers in `Control.replicas`.
    pub fn replica_id(&self) -> &str {
        &self.inner.replica_id
    }

    pub fn is_initialized(&self) -> bool {
        *self.inner.lifecycle.lock().expect("lifecycle poisoned") == Lifecycle::Initialized
    }

    /// Prepare the fleet state and start scheduling. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        {
            let lifecycle = self.inner.lifecycle.lock().expect("lifecycle poisoned");
            match *lifecycle {
                Lifecycle::Destroyed => return Err(ManagerError::Destroyed),
                Lifecycle::Initialized => return Ok(()),
                Lifecycle::Created => {}
            }
        }

        control::prepare(&self.inner).await?;

        let handle = watchdog::start(&self.inner);
        *self.inner.watchdog.lock().expect("watchdog poisoned") = Some(handle);

        *self.inner.lifecycle.lock().expect("lifecycle poisoned") = Lifecycle::Initialized;
        self.inner.log_debug("manager initialized");
        Ok(())
    }

    /// Stop timers, release tracked locks, and tear the cache down.
    /// Idempotent and best-effort: in-flight firings are not interrupted.
    pub async fn destroy(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock().expect("lifecycle poisoned");
            if *lifecycle == Lifecycle::Destroyed {
                return;
            }
            *lifecycle = Lifecycle::Destroyed;
        }

        if let Some(handle) = self
            .inner
            .watchdog
            .lock()
            .expect("watchdog poisoned")
            .take()
        {
            handle.abort();
        }

        scheduler::stop_all(&self.inner);

        if self.inner.release_locks_on_shutdown {
            let held: Vec<(String, ActiveLock)> = self
                .inner
                .active_locks
                .lock()
                .expect("active locks poisoned")
                .drain()
                .collect();
            for (name, lock) in held {
                if !self.inner.cache.release_lock(&name, &lock.lock_value).await {
                    self.inner
                        .log_debug(&format!("lock for job '{name}' was already gone"));
                }
            }
        }

        self.inner
            .inline
            .lock()
            .expect("inline registry poisoned")
            .clear();

        self.inner.cache.destroy().await;
        self.inner.log_debug("manager destroyed");
    }

    /// The gate every public mutation and listing API passes first.
    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        match *self.inner.lifecycle.lock().expect("lifecycle poisoned") {
            Lifecycle::Initialized => Ok(()),
            Lifecycle::Destroyed => Err(ManagerError::Destroyed),
            Lifecycle::Created => Err(ManagerError::NotInitialized),
        }
    }
}

fn in_production() -> bool {
    ["LUDARI_ENV", "NODE_ENV"]
        .iter()
        .any(|var| std::env::var(var).is_ok_and(|v| v == "production"))
}
