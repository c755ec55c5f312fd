//! memcached-backed [`AtomicCache`].
//!
//! Each configured server gets its own connection pool. Keys are routed to a
//! node by CRC-32 of the key, modulo the node count. Hosts are never ejected,
//! so the node list is fixed for the lifetime of the cache and every process
//! sharing the same server list routes a given key to the same node. No
//! lookups are cached client side; every `insert_if_absent` is a round trip.
//!
//! Only the binary protocol is accepted: its `add` reports an existing key
//! as an error, while the ascii client in `memcache` reports it as success.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use memcache::{CommandError, MemcacheError};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::core::cache::AtomicCache;
use crate::core::error::CacheError;

/// memcached treats expirations above 30 days as absolute unix timestamps.
const MAX_RELATIVE_TTL_SECS: u32 = 30 * 24 * 60 * 60;

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

/// Bytes of the original key kept in front of a digested key:
/// prefix + ":sha256:" + 64 hex chars == MAX_KEY_LEN.
const DIGEST_PREFIX_LEN: usize = MAX_KEY_LEN - 8 - 64;

/// URL parameters owned by [`MemcachedOptions`]; user values are dropped.
const MANAGED_PARAMS: [&str; 4] = ["protocol", "tcp_nodelay", "timeout", "connect_timeout"];

/// Client-side operational settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcachedOptions {
    pub tcp_nodelay: bool,
    /// Consecutive socket failures before a node is marked down.
    pub socket_max_failures: u32,
    /// Read/write timeout per socket.
    pub socket_timeout: Duration,
    /// How long a node stays down before it is tried again.
    pub down_retry_delay: Duration,
    /// Connections per node.
    pub pool_size: u32,
}

impl Default for MemcachedOptions {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            socket_max_failures: 5,
            socket_timeout: Duration::from_secs(2),
            down_retry_delay: Duration::from_secs(30),
            pool_size: 4,
        }
    }
}

/// Consecutive-failure tracking for one node.
#[derive(Debug, Default)]
pub(crate) struct NodeHealth {
    consecutive_failures: AtomicU32,
    /// Unix ms until which the node is down; 0 = up.
    down_until_ms: AtomicU64,
}

impl NodeHealth {
    /// Returns `true` if calls may be sent to the node at `now_ms`.
    pub(crate) fn is_available(&self, now_ms: u64) -> bool {
        let until = self.down_until_ms.load(Ordering::Acquire);
        until == 0 || now_ms >= until
    }

    /// Resets the failure streak. Returns `true` if the node was down.
    pub(crate) fn record_success(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::Release);
        self.down_until_ms.swap(0, Ordering::AcqRel) != 0
    }

    /// Counts a socket failure. Returns `true` when this failure marked the
    /// node down.
    pub(crate) fn record_failure(&self, now_ms: u64, max_failures: u32, retry: Duration) -> bool {
        let streak = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if streak >= max_failures.max(1) {
            self.consecutive_failures.store(0, Ordering::Release);
            self.down_until_ms
                .store(now_ms + retry.as_millis() as u64, Ordering::Release);
            true
        } else {
            false
        }
    }
}

struct Node {
    server: String,
    client: memcache::Client,
    health: NodeHealth,
}

/// [`AtomicCache`] over a fixed list of memcached servers.
pub struct MemcachedCache {
    nodes: Vec<Node>,
    options: MemcachedOptions,
}

impl fmt::Debug for MemcachedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedCache")
            .field("servers", &self.servers())
            .field("options", &self.options)
            .finish()
    }
}

impl MemcachedCache {
    /// Opens one pool per server.
    ///
    /// Fails if the list is empty or a pool cannot be established.
    pub fn connect<S: AsRef<str>>(
        servers: &[S],
        options: MemcachedOptions,
    ) -> Result<Self, CacheError> {
        if servers.is_empty() {
            return Err(CacheError::Unavailable("no memcached servers configured".into()));
        }

        let mut nodes = Vec::with_capacity(servers.len());
        for server in servers {
            let server = server.as_ref().trim().to_string();
            let url = node_url(&server, &options)?;
            let client = memcache::Client::with_pool_size(url.as_str(), options.pool_size.max(1))
                .map_err(|e| CacheError::Unavailable(format!("{server}: {e}")))?;
            debug!(server = %server, "memcached node connected");
            nodes.push(Node {
                server,
                client,
                health: NodeHealth::default(),
            });
        }

        info!(nodes = nodes.len(), "memcached dedupe cache ready");
        Ok(Self { nodes, options })
    }

    pub fn servers(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.server.as_str()).collect()
    }

    pub fn options(&self) -> &MemcachedOptions {
        &self.options
    }

    fn node_for(&self, key: &str) -> &Node {
        &self.nodes[node_index(key, self.nodes.len())]
    }
}

impl AtomicCache for MemcachedCache {
    fn insert_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: u32,
    ) -> Result<bool, CacheError> {
        let key = wire_key(key);
        let node = self.node_for(&key);
        let now = unix_now_ms();

        if !node.health.is_available(now) {
            return Err(CacheError::NodeDown {
                server: node.server.clone(),
            });
        }

        let expiration = wire_expiration(ttl_secs, now / 1000);
        let result = node.client.add(&key, value, expiration);

        match result {
            Ok(()) => {
                self.mark_success(node);
                Ok(true)
            }
            Err(MemcacheError::CommandError(CommandError::KeyExists)) => {
                self.mark_success(node);
                Ok(false)
            }
            Err(e) => {
                let err = classify(&node.server, e);
                if err.is_socket_failure() {
                    self.mark_failure(node, now);
                }
                Err(err)
            }
        }
    }
}

impl MemcachedCache {
    fn mark_success(&self, node: &Node) {
        if node.health.record_success() {
            info!(server = %node.server, "memcached node back up");
        }
    }

    fn mark_failure(&self, node: &Node, now: u64) {
        let marked = node.health.record_failure(
            now,
            self.options.socket_max_failures,
            self.options.down_retry_delay,
        );
        if marked {
            warn!(
                server = %node.server,
                failures = self.options.socket_max_failures,
                retry_in_ms = self.options.down_retry_delay.as_millis() as u64,
                "memcached node marked down"
            );
        }
    }
}

fn classify(server: &str, err: MemcacheError) -> CacheError {
    match err {
        MemcacheError::IOError(e) => CacheError::Transport {
            server: server.to_string(),
            reason: e.to_string(),
        },
        MemcacheError::PoolError(e) => CacheError::Transport {
            server: server.to_string(),
            reason: e.to_string(),
        },
        other => CacheError::Protocol {
            server: server.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Builds the connection URL for one server, carrying the socket options.
///
/// Rejects any protocol other than binary.
pub(crate) fn node_url(server: &str, options: &MemcachedOptions) -> Result<String, CacheError> {
    let full = if server.contains("://") {
        server.to_string()
    } else {
        format!("memcache://{server}")
    };
    let (base, query) = match full.split_once('?') {
        Some((base, query)) => (base.to_string(), query.to_string()),
        None => (full, String::new()),
    };

    let mut params: Vec<String> = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if name == "protocol" && !value.eq_ignore_ascii_case("binary") {
            return Err(CacheError::Unavailable(format!(
                "{server}: protocol `{value}` cannot report existing keys on add; use binary"
            )));
        }
        if !MANAGED_PARAMS.contains(&name) {
            params.push(pair.to_string());
        }
    }

    let secs = options.socket_timeout.as_secs_f64();
    params.push(format!("tcp_nodelay={}", options.tcp_nodelay));
    params.push(format!("timeout={secs}"));
    params.push(format!("connect_timeout={secs}"));

    Ok(format!("{base}?{}", params.join("&")))
}

/// Key as sent to memcached: ids over 250 bytes are shortened to a prefix
/// plus a SHA-256 digest of the whole id.
pub(crate) fn wire_key(key: &str) -> Cow<'_, str> {
    if key.len() <= MAX_KEY_LEN {
        return Cow::Borrowed(key);
    }

    let mut cut = DIGEST_PREFIX_LEN;
    while !key.is_char_boundary(cut) {
        cut -= 1;
    }
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Cow::Owned(format!("{}:sha256:{hex}", &key[..cut]))
}

#[inline]
pub(crate) fn node_index(key: &str, nodes: usize) -> usize {
    crc32fast::hash(key.as_bytes()) as usize % nodes
}

/// Translates a relative TTL into what memcached expects on the wire.
pub(crate) fn wire_expiration(ttl_secs: u32, now_unix_secs: u64) -> u32 {
    if ttl_secs > MAX_RELATIVE_TTL_SECS {
        (now_unix_secs + u64::from(ttl_secs)).min(u64::from(u32::MAX)) as u32
    } else {
        ttl_secs
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
