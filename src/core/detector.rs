use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error};

use crate::config::{ConfigError, DetectorConfig};
use crate::core::cache::{AtomicCache, MemcachedCache};
use crate::core::error::CacheError;
use crate::core::message::{Message, Queue};
use crate::core::strategy::DedupeStrategy;

/// Value stored under each claimed message id.
const CLAIM_MARKER: &[u8] = b"1";

/// [`DuplicateDetector`] decides whether a message was already claimed by
/// another consumer inside its dedupe window.
///
/// The claim is a single atomic insert-if-absent against the shared cache:
/// whoever inserts the message id first owns the message until the entry
/// expires. Nothing is locked locally, so any number of threads, processes or
/// hosts may call [`found_duplicate`](Self::found_duplicate) concurrently as
/// long as they share the cache.
pub struct DuplicateDetector {
    cache: Arc<dyn AtomicCache>,
    strategy: DedupeStrategy,
    fallback_timeout: u32,
    /// queue id -> resolved TTL; first write wins and never changes.
    timeouts: DashMap<String, u32>,
}

impl std::fmt::Debug for DuplicateDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateDetector")
            .field("strategy", &self.strategy)
            .field("fallback_timeout", &self.fallback_timeout)
            .field("resolved_queues", &self.timeouts.len())
            .finish()
    }
}

impl DuplicateDetector {
    /// Creates a detector over an injected cache.
    pub fn new(config: &DetectorConfig, cache: Arc<dyn AtomicCache>) -> Self {
        Self {
            cache,
            strategy: config.dedupe_strategy,
            fallback_timeout: config.timeout,
            timeouts: DashMap::new(),
        }
    }

    /// Creates a detector backed by memcached, built from `config.servers`.
    ///
    /// Fails if no server is configured or the cluster cannot be reached.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, ConfigError> {
        if config.servers.is_empty() {
            error!("duplicate detection is enabled but no cache servers are configured");
            return Err(ConfigError::NoServers);
        }

        let cache = MemcachedCache::connect(&config.servers, config.memcached.clone())
            .inspect_err(|e| error!(error = %e, "unable to build the dedupe cache client"))?;

        Ok(Self::new(config, Arc::new(cache)))
    }

    pub fn strategy(&self) -> DedupeStrategy {
        self.strategy
    }

    pub fn fallback_timeout(&self) -> u32 {
        self.fallback_timeout
    }

    /// Number of queues whose timeout has been resolved so far.
    pub fn resolved_queues(&self) -> usize {
        self.timeouts.len()
    }

    /// Returns `true` if `message` was already claimed within its window.
    ///
    /// Never fails: a missing message or queue yields `false`, and cache
    /// failures are turned into a verdict by the configured strategy.
    pub fn found_duplicate<M: Message + ?Sized>(&self, message: Option<&M>) -> bool {
        let Some(message) = message else {
            debug!("no message to check; treating as not a duplicate");
            return false;
        };
        let Some(queue) = message.queue() else {
            debug!(message_id = message.id(), "message has no queue; treating as not a duplicate");
            return false;
        };

        let timeout = self.queue_timeout(queue);

        match self.cache.insert_if_absent(message.id(), CLAIM_MARKER, timeout) {
            Ok(true) => false,
            Ok(false) => {
                debug!(message_id = message.id(), queue = queue.id(), "duplicate message");
                true
            }
            Err(e) => self.on_cache_failure(message.id(), &e),
        }
    }

    /// TTL used for messages from `queue`.
    ///
    /// Resolved once per queue id from the queue's visibility window, or the
    /// fallback timeout when it has none. Later changes to the queue's
    /// window are not observed.
    pub fn queue_timeout<Q: Queue + ?Sized>(&self, queue: &Q) -> u32 {
        if let Some(timeout) = self.timeouts.get(queue.id()) {
            return *timeout;
        }

        let resolved = queue.visibility_timeout().unwrap_or(self.fallback_timeout);
        *self
            .timeouts
            .entry(queue.id().to_string())
            .or_insert(resolved)
    }

    fn on_cache_failure(&self, message_id: &str, err: &CacheError) -> bool {
        error!(
            message_id,
            strategy = %self.strategy,
            error = %err,
            "error accessing duplicate cache server; {}",
            self.strategy.decision()
        );
        self.strategy.verdict_on_failure()
    }
}
