//! Line-oriented bulk checking used by `dupguard watch`.
//!
//! Each input line names one received message:
//!
//! ```text
//! <queue-id> [visibility-secs] <message-id>
//! - <message-id>                  # message without a queue
//! ```
//!
//! Checks run on the blocking pool, bounded by a semaphore. A deadline is the
//! caller's concern: it is applied around each check here, and a check that
//! misses it is reported as [`Outcome::TimedOut`] while the cache call itself
//! keeps running to completion.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::core::detector::DuplicateDetector;
use crate::core::message::{Envelope, Message, QueueRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("expected `<queue> [visibility] <message-id>`, got `{0}`")]
    Malformed(String),
    #[error("invalid visibility timeout `{0}`")]
    Visibility(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Fresh,
    Duplicate,
    TimedOut,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Fresh => "fresh",
            Outcome::Duplicate => "duplicate",
            Outcome::TimedOut => "timeout",
        }
    }
}

impl From<bool> for Outcome {
    fn from(duplicate: bool) -> Self {
        if duplicate {
            Outcome::Duplicate
        } else {
            Outcome::Fresh
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// 1-based input line number.
    pub line: usize,
    pub message_id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub concurrency: usize,
    pub deadline: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 16,
            deadline: None,
        }
    }
}

/// Parses one input line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Envelope>, LineError> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let (queue, visibility, id) = match parts.as_slice() {
        [queue, id] => (*queue, None, *id),
        [queue, vis, id] => {
            let secs = vis
                .parse::<u32>()
                .map_err(|_| LineError::Visibility(vis.to_string()))?;
            (*queue, Some(secs), *id)
        }
        _ => return Err(LineError::Malformed(line.to_string())),
    };

    if queue == "-" {
        return Ok(Some(Envelope::detached(id)));
    }
    Ok(Some(Envelope::new(id, Arc::new(QueueRef::new(queue, visibility)))))
}

/// Checks every message read from `reader`, calling `emit` as verdicts
/// complete. Returns the number of messages checked.
pub async fn check_lines<R, F>(
    detector: Arc<DuplicateDetector>,
    reader: R,
    options: WatchOptions,
    mut emit: F,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Verdict),
{
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks: JoinSet<Verdict> = JoinSet::new();
    let mut lines = reader.lines();
    let mut lineno = 0usize;
    let mut checked = 0usize;

    while let Some(line) = lines.next_line().await? {
        lineno += 1;
        let envelope = match parse_line(&line) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = lineno, error = %e, "skipping input line");
                continue;
            }
        };

        let permit = permits.clone().acquire_owned().await?;
        let det = detector.clone();
        let deadline = options.deadline;
        checked += 1;

        tasks.spawn(async move {
            let message_id = envelope.id().to_string();
            let on_panic = det.strategy().verdict_on_failure();
            // The permit lives as long as the blocking check, so a missed
            // deadline does not free a slot while the cache call still runs.
            let check = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                det.found_duplicate(Some(&envelope))
            });

            let joined = match deadline {
                Some(limit) => match timeout(limit, check).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        return Verdict {
                            line: lineno,
                            message_id,
                            outcome: Outcome::TimedOut,
                        }
                    }
                },
                None => check.await,
            };

            let duplicate = joined.unwrap_or_else(|e| {
                error!(line = lineno, %message_id, error = %e, "duplicate check aborted");
                on_panic
            });

            Verdict {
                line: lineno,
                message_id,
                outcome: Outcome::from(duplicate),
            }
        });

        while let Some(done) = tasks.try_join_next() {
            emit(done?);
        }
    }

    while let Some(done) = tasks.join_next().await {
        emit(done?);
    }

    Ok(checked)
}
