//! Vsweep binary - removes non-current object versions from versioned
//! buckets.
//!
//! Thin wrapper around `vsweep-engine`: parses flags and environment
//! variables, sets up JSON logging, restores the retention cache from the
//! persistence bucket, runs the cleanup pipeline over each target bucket,
//! and persists the cache again on the way out.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod app;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

/// Removes non-current object versions from versioned buckets.
///
/// Buckets may be given as arguments and via $VSWEEP_BUCKETS (separated by
/// whitespace), either as bare names or as URLs
/// (`https://host[:port]/<bucket>[/<prefix>]`) pinning a custom endpoint.
#[derive(Parser, Debug)]
#[command(name = "vsweep")]
#[command(version)]
struct Args {
    /// Target buckets. Combined with $VSWEEP_BUCKETS.
    buckets: Vec<String>,

    /// Perform a trial run without deleting objects or changing retention.
    #[arg(
        long = "dry_run",
        env = "VSWEEP_DRY_RUN",
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    dry_run: bool,

    /// Minimum object version age before considering it for deletion.
    #[arg(
        long = "min_age",
        env = "VSWEEP_MIN_AGE",
        default_value = "32days",
        value_parser = humantime::parse_duration
    )]
    min_age: Duration,

    /// Set or extend object version retention to at least this duration.
    #[arg(
        long = "min_retention",
        env = "VSWEEP_MIN_RETENTION",
        default_value = "32days",
        value_parser = humantime::parse_duration
    )]
    min_retention: Duration,

    /// Refresh retention when it is missing or the remaining time falls
    /// below this value. Must not exceed --min_retention.
    #[arg(
        long = "min_retention_threshold",
        env = "VSWEEP_MIN_RETENTION_THRESHOLD",
        default_value = "8days",
        value_parser = humantime::parse_duration
    )]
    min_retention_threshold: Duration,

    /// Bucket storing the retention cache snapshot (`state.gz`), reducing
    /// provider calls across runs.
    #[arg(long = "persistence_bucket", env = "VSWEEP_PERSISTENCE_BUCKET")]
    persistence_bucket: Option<String>,

    /// Enable debug logging.
    #[arg(long, env = "VSWEEP_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .json()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: installing log subscriber: {err}");
        return ExitCode::FAILURE;
    }

    match app::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Run failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["vsweep"]).unwrap();

        assert!(args.dry_run);
        assert!(!args.debug);
        assert_eq!(args.min_age, Duration::from_secs(32 * 24 * 60 * 60));
        assert_eq!(args.min_retention, Duration::from_secs(32 * 24 * 60 * 60));
        assert_eq!(
            args.min_retention_threshold,
            Duration::from_secs(8 * 24 * 60 * 60)
        );
        assert_eq!(args.persistence_bucket, None);
    }

    #[test]
    fn test_flags_parse() {
        let args = Args::try_parse_from([
            "vsweep",
            "--dry_run=false",
            "--min_age",
            "48h",
            "--persistence_bucket",
            "https://host:9000/state-bucket",
            "logs",
            "backups",
        ])
        .unwrap();

        assert!(!args.dry_run);
        assert_eq!(args.min_age, Duration::from_secs(48 * 60 * 60));
        assert_eq!(args.buckets, vec!["logs", "backups"]);
        assert_eq!(
            args.persistence_bucket.as_deref(),
            Some("https://host:9000/state-bucket")
        );
    }
}
