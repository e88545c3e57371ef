//! End-to-end pipeline tests against the simulated provider and an
//! in-memory retention cache.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use vsweep_core::CleanupStats;
use vsweep_engine::{
    run_cleanup, BucketClient, CleanupConfig, InMemoryRetentionState, ListedTombstone,
    ListedVersion, RetentionState, SimulatedBucketClient, VersionListPage,
};

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

fn listed(key: &str, version_id: &str, t: DateTime<Utc>, is_latest: bool) -> ListedVersion {
    ListedVersion {
        key: key.to_string(),
        version_id: version_id.to_string(),
        last_modified: t,
        is_latest,
        size: 100,
    }
}

fn tombstone(key: &str, version_id: &str, t: DateTime<Utc>, is_latest: bool) -> ListedTombstone {
    ListedTombstone {
        key: key.to_string(),
        version_id: version_id.to_string(),
        last_modified: t,
        is_latest,
    }
}

fn config(now: DateTime<Utc>) -> CleanupConfig {
    CleanupConfig::new(
        now,
        TimeDelta::days(20),
        TimeDelta::days(10),
        TimeDelta::days(8),
    )
    .with_dry_run(false)
}

/// Two keys spread over two listing pages: one with an old non-current
/// version behind a live head, one hidden behind a lingering delete marker.
#[tokio::test]
async fn test_mixed_bucket_run() {
    let now = at(2003, 3, 15);

    let client = Arc::new(SimulatedBucketClient::new("logs"));
    client.push_page(VersionListPage {
        versions: vec![
            listed("app.log", "jan-1", at(2003, 1, 1), false),
            listed("app.log", "feb-1", at(2003, 2, 1), true),
            listed("db.dump", "jan-2", at(2003, 1, 2), false),
        ],
        delete_markers: vec![],
        next: None,
    });
    client.push_page(VersionListPage {
        versions: vec![listed("db.dump", "feb-2", at(2003, 2, 1), false)],
        delete_markers: vec![tombstone("db.dump", "mar-1-del", at(2003, 3, 1), true)],
        next: None,
    });

    let state = Arc::new(InMemoryRetentionState::new());
    let stats = Arc::new(CleanupStats::new());

    run_cleanup(
        Arc::clone(&client) as Arc<dyn BucketClient>,
        Arc::clone(&state) as Arc<dyn RetentionState>,
        Arc::clone(&stats),
        config(now),
    )
    .await
    .unwrap();

    // jan-1 and jan-2 are old, unretained and below live heads; feb-2 must
    // outlive the db.dump delete marker, feb-1 is the app.log head.
    let mut deleted: Vec<(String, String)> = client.delete_batches().concat();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![
            ("app.log".to_string(), "jan-1".to_string()),
            ("db.dump".to_string(), "jan-2".to_string()),
        ]
    );

    let mut puts = client.retention_puts();
    puts.sort();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].0, "app.log");
    assert_eq!(puts[0].1, "feb-1");
    assert_eq!(puts[0].2, at(2003, 3, 25));
    assert_eq!(puts[1].0, "db.dump");
    assert_eq!(puts[1].1, "feb-2");
    // The marker was created 2003-03-01 and lingers for 20 days.
    assert_eq!(puts[1].2, at(2003, 3, 21));

    let s = stats.snapshot();
    assert_eq!(s.total_count, 5);
    assert_eq!(s.delete_count, 2);
    assert_eq!(s.delete_success_count, 2);
    assert_eq!(s.retention_success_count, 2);
    assert_eq!(s.total_size.bytes(), 400);
}

/// A second run over the same bucket serves committed retentions from the
/// cache; only versions cached as "no retention" are re-validated against
/// the provider.
#[tokio::test]
async fn test_second_run_is_served_from_the_cache() {
    let now = at(2004, 3, 1);

    let pages = || VersionListPage {
        versions: vec![
            listed("app.log", "jan-1", at(2004, 1, 1), false),
            listed("app.log", "feb-1", at(2004, 2, 1), true),
        ],
        delete_markers: vec![],
        next: None,
    };

    let state = Arc::new(InMemoryRetentionState::new());

    let first = Arc::new(SimulatedBucketClient::new("logs"));
    first.push_page(pages());

    run_cleanup(
        Arc::clone(&first) as Arc<dyn BucketClient>,
        Arc::clone(&state) as Arc<dyn RetentionState>,
        Arc::new(CleanupStats::new()),
        config(now),
    )
    .await
    .unwrap();

    let mut first_queries = first.retention_queries();
    first_queries.sort();
    assert_eq!(
        first_queries,
        vec![
            ("app.log".to_string(), "feb-1".to_string()),
            ("app.log".to_string(), "jan-1".to_string()),
        ]
    );

    let second = Arc::new(SimulatedBucketClient::new("logs"));
    second.push_page(pages());

    run_cleanup(
        Arc::clone(&second) as Arc<dyn BucketClient>,
        Arc::clone(&state) as Arc<dyn RetentionState>,
        Arc::new(CleanupStats::new()),
        config(now),
    )
    .await
    .unwrap();

    // feb-1's committed retention is in the cache; jan-1 was cached as
    // "no retention" and is checked against the provider again.
    assert_eq!(
        second.retention_queries(),
        vec![("app.log".to_string(), "jan-1".to_string())]
    );
}
