#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex, Once};

use dupguard::{AtomicCache, CacheError, DedupeStrategy, DetectorConfig};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        dupguard::logging::init_logging();
    });
}

pub fn config(strategy: DedupeStrategy, timeout: u32) -> DetectorConfig {
    DetectorConfig {
        dedupe_strategy: strategy,
        timeout,
        ..DetectorConfig::default()
    }
}

/// Cache whose every call fails like an unreachable server.
#[derive(Debug, Default)]
pub struct UnreachableCache;

impl AtomicCache for UnreachableCache {
    fn insert_if_absent(&self, _key: &str, _value: &[u8], _ttl: u32) -> Result<bool, CacheError> {
        Err(CacheError::Transport {
            server: "10.0.0.9:11211".into(),
            reason: "connection timed out".into(),
        })
    }
}

/// In-memory sink for formatted log output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a thread-local subscriber writing into the returned buffer.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, buffer.contents())
}
