use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "DUPGUARD_LOG";

/// Builds the level filter: `DUPGUARD_LOG`, then `RUST_LOG`, then `info`.
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: compact stderr formatter with UTC
/// timestamps and thread info. Stdout is left to CLI verdicts.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is kept.
pub fn init_logging() -> bool {
    let formatting_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .compact();

    let subscriber = Registry::default().with(log_filter()).with(formatting_layer);

    match tracing::subscriber::set_global_default(subscriber) {
        Ok(()) => true,
        Err(_) => {
            tracing::debug!("global subscriber already installed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_keeps_first_subscriber() {
        init_logging();
        assert!(!init_logging());
    }
}
