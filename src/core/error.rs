use thiserror::Error;

/// Failures reported by an [`AtomicCache`](crate::core::cache::AtomicCache).
///
/// A key that already exists is *not* an error; it is the `Ok(false)` arm of
/// `insert_if_absent`. Everything here is a transport or availability
/// problem that the detector resolves through its dedupe strategy.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("transport error talking to {server}: {reason}")]
    Transport { server: String, reason: String },

    #[error("cache node {server} is marked down")]
    NodeDown { server: String },

    #[error("unexpected response from {server}: {reason}")]
    Protocol { server: String, reason: String },

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    /// True for failures that count towards marking a node down.
    pub fn is_socket_failure(&self) -> bool {
        matches!(self, CacheError::Transport { .. })
    }
}
