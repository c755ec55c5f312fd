//! dupguard – operator CLI around the duplicate detector.
//
//  $ dupguard --config dupguard.toml check --queue orders --visibility-timeout 30 abc123
//  abc123  fresh
//  $ printf 'orders 30 abc123\n' | dupguard watch --deadline-ms 500
//  abc123  duplicate
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::info;

use dupguard::logging::init_logging;
use dupguard::watch::{check_lines, Outcome, WatchOptions};
use dupguard::{DetectorConfig, DuplicateDetector, Envelope, QueueRef};

#[derive(Debug, Parser)]
#[command(name = "dupguard", version, about = "Distributed duplicate-message guard")]
struct Cli {
    /// Path to config TOML (env DUPGUARD_CONFIG is used when omitted)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Claim one or more message ids received from a queue.
    Check {
        /// Queue identifier.
        #[arg(long)]
        queue: String,
        /// Queue visibility window in seconds.
        #[arg(long)]
        visibility_timeout: Option<u32>,
        /// Message ids to check.
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Read `<queue> [visibility] <message-id>` lines from stdin and check each.
    Watch {
        /// Maximum checks in flight.
        #[arg(long, default_value_t = 16)]
        concurrency: usize,
        /// Per-check deadline in milliseconds.
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = DetectorConfig::load(cli.config.as_deref())?;
    info!(
        strategy = %config.dedupe_strategy,
        timeout = config.timeout,
        servers = ?config.servers,
        "starting duplicate detector"
    );
    let detector =
        tokio::task::spawn_blocking(move || DuplicateDetector::from_config(&config)).await??;
    let detector = Arc::new(detector);

    match cli.cmd {
        Command::Check {
            queue,
            visibility_timeout,
            ids,
        } => {
            let queue = Arc::new(QueueRef::new(queue, visibility_timeout));
            let verdicts = tokio::task::spawn_blocking(move || {
                ids.into_iter()
                    .map(|id| {
                        let envelope = Envelope::new(id.clone(), queue.clone());
                        (id, Outcome::from(detector.found_duplicate(Some(&envelope))))
                    })
                    .collect::<Vec<_>>()
            })
            .await?;

            for (id, outcome) in verdicts {
                println!("{id}\t{}", outcome.as_str());
            }
        }
        Command::Watch {
            concurrency,
            deadline_ms,
        } => {
            let options = WatchOptions {
                concurrency,
                deadline: deadline_ms.map(Duration::from_millis),
            };
            let reader = BufReader::new(tokio::io::stdin());
            let checked = check_lines(detector, reader, options, |verdict| {
                println!("{}\t{}", verdict.message_id, verdict.outcome.as_str());
            })
            .await?;
            info!(checked, "stdin exhausted");
        }
    }

    Ok(())
}
