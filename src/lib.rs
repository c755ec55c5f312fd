//! dupguard – distributed at-most-once guard for queue consumers.
//!
//! Before processing a received message, a worker asks the
//! [`DuplicateDetector`] whether another consumer already claimed it. The
//! claim is one atomic insert-if-absent against a shared cache, so the
//! guarantee holds across threads, processes and hosts.
//!
//! This crate exports
//!  * `core`    – detector, dedupe strategy, message traits, cache backends
//!  * `config`  – TOML + environment driven configuration
//!  * `logging` – tracing subscriber setup
//!  * `watch`   – bulk line-oriented checking used by the CLI

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;
pub mod watch;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use config::{ConfigError, DetectorConfig};
pub use crate::core::cache::{AtomicCache, MemcachedCache, MemcachedOptions, MemoryCache};
pub use crate::core::detector::DuplicateDetector;
pub use crate::core::error::CacheError;
pub use crate::core::message::{Envelope, Message, Queue, QueueRef};
pub use crate::core::strategy::DedupeStrategy;
