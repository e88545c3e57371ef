//! Run orchestration for the vsweep binary.

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use vsweep_core::CleanupStats;
use vsweep_engine::{
    run_cleanup, BucketClient, CleanupConfig, ClientError, RetentionState,
};
use vsweep_s3::{AddressError, BucketAddress, S3BucketClient};
use vsweep_state::{Store, StoreError};

use crate::Args;

/// Key of the cache snapshot object in the persistence bucket.
const STATE_OBJECT_KEY: &str = "state.gz";

/// Environment variable naming additional target buckets.
const BUCKETS_ENV: &str = "VSWEEP_BUCKETS";

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error(
        "min_retention_threshold ({threshold}) may not exceed min_retention ({retention})"
    )]
    ThresholdExceedsRetention {
        threshold: humantime::Duration,
        retention: humantime::Duration,
    },

    #[error("{flag}: duration out of range")]
    DurationOutOfRange { flag: &'static str },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("creating scratch directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("{count} error(s) during cleanup")]
    Failures { count: usize },
}

#[derive(Debug, Error)]
enum RestoreError {
    #[error("downloading {STATE_OBJECT_KEY}: {0}")]
    Download(ClientError),

    #[error("opening snapshot: {0}")]
    Open(StoreError),
}

/// Merges `$VSWEEP_BUCKETS` (whitespace-separated) with positional
/// arguments, environment first.
fn bucket_list(env_value: Option<&str>, args: &[String]) -> Vec<String> {
    let mut buckets: Vec<String> = env_value
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    buckets.extend(args.iter().cloned());
    buckets
}

fn to_delta(value: std::time::Duration, flag: &'static str) -> Result<TimeDelta, AppError> {
    TimeDelta::from_std(value).map_err(|_| AppError::DurationOutOfRange { flag })
}

async fn restore_state(client: &S3BucketClient, dir: &Path) -> Result<Store, RestoreError> {
    let data = client
        .download_object(STATE_OBJECT_KEY)
        .await
        .map_err(RestoreError::Download)?;

    Store::open_compressed(dir, &mut data.as_ref()).map_err(RestoreError::Open)
}

async fn persist_state(store: &Store, client: &S3BucketClient) -> Result<(), ClientError> {
    let mut snapshot = Vec::new();

    store
        .snapshot_to(&mut snapshot)
        .map_err(|err| ClientError::Api {
            operation: "PutObject",
            message: format!("writing snapshot: {err}"),
        })?;

    client.upload_object(STATE_OBJECT_KEY, snapshot.into()).await
}

pub(crate) async fn run(args: Args) -> Result<(), AppError> {
    if args.min_retention_threshold > args.min_retention {
        return Err(AppError::ThresholdExceedsRetention {
            threshold: args.min_retention_threshold.into(),
            retention: args.min_retention.into(),
        });
    }

    let config = CleanupConfig::new(
        Utc::now(),
        to_delta(args.min_age, "min_age")?,
        to_delta(args.min_retention, "min_retention")?,
        to_delta(args.min_retention_threshold, "min_retention_threshold")?,
    )
    .with_dry_run(args.dry_run);

    // Bad addresses are fatal before any network call is made.
    let buckets = bucket_list(std::env::var(BUCKETS_ENV).ok().as_deref(), &args.buckets);
    let addresses = buckets
        .iter()
        .map(|input| BucketAddress::parse(input))
        .collect::<Result<Vec<_>, _>>()?;

    let persistence_address = args
        .persistence_bucket
        .as_deref()
        .map(BucketAddress::parse)
        .transpose()?;

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;

    let scratch_dir = tempfile::tempdir()?;

    // A failed restore degrades to an empty cache: the cache is a hint and
    // the provider stays authoritative.
    let mut persistence = None;
    let mut store = None;

    if let Some(address) = &persistence_address {
        let client = S3BucketClient::from_config(&aws_config, address);

        match restore_state(&client, scratch_dir.path()).await {
            Ok(restored) => store = Some(restored),
            Err(err) => warn!(error = %err, "Restoring state failed"),
        }

        persistence = Some(client);
    }

    let store = match store {
        Some(store) => store,
        None => Store::create_temp(scratch_dir.path())?,
    };

    let stats = Arc::new(CleanupStats::new());
    let mut failures = 0usize;

    for address in &addresses {
        let client = Arc::new(S3BucketClient::from_config(&aws_config, address));

        info!(bucket = %address, dry_run = args.dry_run, "Starting cleanup");

        let result = match store.bucket(address.bucket()) {
            Ok(bucket_state) => {
                run_cleanup(
                    Arc::clone(&client) as Arc<dyn BucketClient>,
                    Arc::new(bucket_state) as Arc<dyn RetentionState>,
                    Arc::clone(&stats),
                    config.clone(),
                )
                .await
                .map_err(|err| err.to_string())
            }
            Err(err) => Err(err.to_string()),
        };

        if let Err(err) = result {
            error!(bucket = %address, error = %err, "Cleanup failed");
            failures += 1;
        }
    }

    if let Some(client) = &persistence {
        if let Err(err) = persist_state(&store, client).await {
            error!(error = %err, "Persisting state failed");
            failures += 1;
        }
    }

    stats.log_summary();

    if failures > 0 {
        return Err(AppError::Failures { count: failures });
    }

    Ok(())
}
