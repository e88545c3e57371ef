//! Per-key version series and the expiry decision rules.
//!
//! The processor is the only stage that sees whole keys. Phase 1 groups the
//! annotated stream into per-key series kept in sorted order; phase 2,
//! entered only once the stream has closed, walks each series exactly once
//! and splits it into versions to delete and versions whose retention must
//! be extended.
//!
//! Deciding early, while the listing is still streaming, would be unsound:
//! until the latest version of a key has been seen, nothing about that key
//! may be deleted.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vsweep_core::{version_order, CleanupStats, ObjectVersion};

use crate::channel::send_or_cancelled;
use crate::error::EngineResult;
use crate::extend::RetentionRequest;

// -----------------------------------------------------------------------------
// Decision rules
// -----------------------------------------------------------------------------

/// The expiry and extension rules, fixed for one run.
#[derive(Debug, Clone)]
pub(crate) struct DecisionRules {
    now: DateTime<Utc>,
    /// Versions modified before this are deletion candidates.
    cutoff_deletion: DateTime<Utc>,
    min_deletion_age: TimeDelta,
    min_retention: TimeDelta,
}

impl DecisionRules {
    pub(crate) fn new(
        now: DateTime<Utc>,
        min_deletion_age: TimeDelta,
        min_retention: TimeDelta,
    ) -> Self {
        let cutoff_deletion = truncate_to_minute(now - min_deletion_age);

        Self {
            now,
            cutoff_deletion,
            min_deletion_age,
            min_retention,
        }
    }

    /// Whether `v` may be deleted: old enough, and not under a live lock.
    fn expired(&self, v: &ObjectVersion) -> bool {
        v.last_modified < self.cutoff_deletion
            && v.retain_until.is_none_or(|until| until < self.now)
    }

    /// Requests an extension for `v` reaching `min_retention` past now (or
    /// past a future modification time, under clock skew).
    fn push_extend_from_now(&self, v: &ObjectVersion, out: &mut Vec<RetentionRequest>) {
        let target = truncate_to_second(self.now.max(v.last_modified) + self.min_retention);
        self.push_extend_until(v, target, out);
    }

    /// Requests an extension for `v` reaching at least `until`.
    ///
    /// Emitted only for regular versions whose current lock is absent or
    /// strictly before the target; tombstones cannot carry retention.
    fn push_extend_until(
        &self,
        v: &ObjectVersion,
        until: DateTime<Utc>,
        out: &mut Vec<RetentionRequest>,
    ) {
        if v.delete_marker {
            return;
        }

        if v.retain_until.is_none_or(|current| current < until) {
            out.push(RetentionRequest {
                object: v.clone(),
                until,
            });
        }
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(TimeDelta::minutes(1)).unwrap_or(t)
}

fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(TimeDelta::seconds(1)).unwrap_or(t)
}

// -----------------------------------------------------------------------------
// VersionSeries
// -----------------------------------------------------------------------------

/// What finalization decided for one series.
#[derive(Debug, Default)]
pub(crate) struct SeriesDecision {
    /// Versions to hand to the deleter.
    pub expired: Vec<ObjectVersion>,
    /// Retention targets to hand to the extender.
    pub extend: Vec<RetentionRequest>,
}

/// All versions of one key, in `(last_modified, version_id)` order.
#[derive(Debug)]
pub(crate) struct VersionSeries {
    items: Vec<ObjectVersion>,
    have_latest: bool,
}

impl VersionSeries {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            have_latest: false,
        }
    }

    /// Inserts `v` at its sorted position, regardless of arrival order.
    fn insert(&mut self, v: ObjectVersion) {
        self.have_latest = self.have_latest || v.is_latest;

        let pos = self
            .items
            .partition_point(|existing| version_order(existing, &v) != Ordering::Greater);

        self.items.insert(pos, v);
    }

    /// Applies the decision rules to the complete series.
    fn finalize(&self, rules: &DecisionRules) -> SeriesDecision {
        let mut decision = SeriesDecision::default();

        // Without the latest version the listing is incomplete; an
        // incomplete view must not be allowed to destroy data. Keep every
        // regular version alive instead.
        let latest_idx = if self.have_latest {
            self.items.iter().rposition(|v| v.is_latest)
        } else {
            None
        };

        let Some(latest_idx) = latest_idx else {
            for v in &self.items {
                rules.push_extend_from_now(v, &mut decision.extend);
            }

            return decision;
        };

        let latest = &self.items[latest_idx];

        // End (exclusive) of the prefix that may expire.
        let expire_end;

        if latest.delete_marker {
            let tombstone_expiry = latest.last_modified + rules.min_deletion_age;

            if tombstone_expiry <= rules.now {
                // The marker itself has expired: the whole series, marker
                // included, is a deletion candidate.
                expire_end = self.items.len();
            } else if let Some(anchor_idx) = self.items[..latest_idx]
                .iter()
                .rposition(|v| !v.delete_marker)
            {
                // The marker lingers: the nearest regular version below it
                // must survive at least as long as the marker does.
                rules.push_extend_until(
                    &self.items[anchor_idx],
                    tombstone_expiry,
                    &mut decision.extend,
                );

                for v in &self.items[anchor_idx + 1..] {
                    rules.push_extend_from_now(v, &mut decision.extend);
                }

                expire_end = anchor_idx;
            } else {
                // Tombstones all the way down: nothing to anchor on, so
                // leave the series untouched.
                expire_end = 0;
            }
        } else {
            for v in &self.items[latest_idx..] {
                rules.push_extend_from_now(v, &mut decision.extend);
            }

            expire_end = latest_idx;
        }

        for v in &self.items[..expire_end] {
            if !rules.expired(v) {
                break;
            }

            decision.expired.push(v.clone());
        }

        debug_assert!(
            decision.expired.iter().all(|e| decision
                .extend
                .iter()
                .all(|r| r.object.version_id != e.version_id)),
            "expired and extend sets must be disjoint"
        );

        decision
    }
}

// -----------------------------------------------------------------------------
// Processor stage
// -----------------------------------------------------------------------------

/// The processor stage. Single-task: every series has exactly one writer.
pub(crate) struct Processor {
    stats: Arc<CleanupStats>,
    rules: DecisionRules,
}

impl Processor {
    pub(crate) fn new(stats: Arc<CleanupStats>, rules: DecisionRules) -> Self {
        Self { stats, rules }
    }

    /// Groups the input into series, then finalizes each one.
    pub(crate) async fn run(
        self,
        mut rx: mpsc::Receiver<ObjectVersion>,
        extend_tx: mpsc::Sender<RetentionRequest>,
        delete_tx: mpsc::Sender<ObjectVersion>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let mut series: HashMap<Arc<str>, VersionSeries> = HashMap::new();

        loop {
            let ov = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(crate::error::EngineError::Cancelled),
                ov = rx.recv() => match ov {
                    Some(ov) => ov,
                    None => break,
                },
            };

            self.stats.discovered(&ov);

            series
                .entry(Arc::clone(&ov.key))
                .or_insert_with(VersionSeries::new)
                .insert(ov);
        }

        for s in series.values() {
            let decision = s.finalize(&self.rules);

            for v in decision.expired {
                send_or_cancelled(&delete_tx, &cancel, v).await?;
            }

            for req in decision.extend {
                send_or_cancelled(&extend_tx, &cancel, req).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    struct Builder {
        series: VersionSeries,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                series: VersionSeries::new(),
            }
        }

        fn version(mut self, id: &str, t: DateTime<Utc>, latest: bool) -> Self {
            self.series.insert(object(id, t, latest, false, None));
            self
        }

        fn retained(
            mut self,
            id: &str,
            t: DateTime<Utc>,
            latest: bool,
            until: DateTime<Utc>,
        ) -> Self {
            self.series.insert(object(id, t, latest, false, Some(until)));
            self
        }

        fn tombstone(mut self, id: &str, t: DateTime<Utc>, latest: bool) -> Self {
            self.series.insert(object(id, t, latest, true, None));
            self
        }
    }

    fn object(
        id: &str,
        t: DateTime<Utc>,
        is_latest: bool,
        delete_marker: bool,
        retain_until: Option<DateTime<Utc>>,
    ) -> ObjectVersion {
        ObjectVersion {
            key: Arc::from("k"),
            version_id: id.to_string(),
            last_modified: t,
            is_latest,
            delete_marker,
            size: if delete_marker { 0 } else { 10 },
            retain_until,
        }
    }

    fn rules(now: DateTime<Utc>, min_retention_days: i64) -> DecisionRules {
        DecisionRules::new(now, TimeDelta::days(20), TimeDelta::days(min_retention_days))
    }

    fn expired_ids(decision: &SeriesDecision) -> Vec<&str> {
        decision.expired.iter().map(|v| v.version_id.as_str()).collect()
    }

    fn extend_targets(decision: &SeriesDecision) -> Vec<(&str, DateTime<Utc>)> {
        decision
            .extend
            .iter()
            .map(|r| (r.object.version_id.as_str(), r.until))
            .collect()
    }

    // Decision scenarios. min_retention is 10 days and min_deletion_age
    // 20 days unless a test says otherwise.

    #[test]
    fn test_two_versions() {
        let series = Builder::new()
            .version("jan-1", at(2004, 1, 1), false)
            .version("feb-1", at(2004, 2, 1), true)
            .series;

        let decision = series.finalize(&rules(at(2010, 1, 1), 10));

        assert_eq!(expired_ids(&decision), vec!["jan-1"]);
        assert_eq!(extend_targets(&decision), vec![("feb-1", at(2010, 1, 11))]);
    }

    #[test]
    fn test_current_tombstone_is_left_alone() {
        let series = Builder::new()
            .tombstone("jan-1-del", at(2003, 1, 1), true)
            .series;

        let decision = series.finalize(&rules(at(2003, 1, 14), 10));

        assert!(decision.expired.is_empty());
        assert!(decision.extend.is_empty());
    }

    #[test]
    fn test_expired_tombstone_is_deleted() {
        let series = Builder::new()
            .tombstone("jan-1-del", at(2003, 1, 1), true)
            .series;

        let decision = series.finalize(&rules(at(2003, 3, 1), 10));

        assert_eq!(expired_ids(&decision), vec!["jan-1-del"]);
        assert!(decision.extend.is_empty());
    }

    #[test]
    fn test_version_before_recent_tombstone_is_anchored() {
        let series = Builder::new()
            .version("jan-1", at(2003, 1, 1), false)
            .version("feb-1", at(2003, 2, 1), false)
            .tombstone("mar-1-del", at(2003, 3, 1), true)
            .series;

        let decision = series.finalize(&rules(at(2003, 3, 15), 10));

        // The marker expires on 2003-03-21; feb-1 has to survive until then.
        assert_eq!(expired_ids(&decision), vec!["jan-1"]);
        assert_eq!(extend_targets(&decision), vec![("feb-1", at(2003, 3, 21))]);
    }

    #[test]
    fn test_version_and_tombstone_both_expired() {
        let series = Builder::new()
            .version("jan-1", at(2003, 1, 1), false)
            .version("feb-1", at(2003, 2, 1), false)
            .tombstone("mar-1-del", at(2003, 3, 1), true)
            .series;

        let now = at(2003, 3, 21) + TimeDelta::seconds(1);
        let decision = series.finalize(&rules(now, 10));

        assert_eq!(expired_ids(&decision), vec!["jan-1", "feb-1", "mar-1-del"]);
        assert!(decision.extend.is_empty());
    }

    #[test]
    fn test_live_retention_blocks_expiry() {
        let series = Builder::new()
            .retained("jan-1", at(2004, 1, 1), false, at(2004, 4, 1))
            .version("feb-1", at(2004, 2, 1), true)
            .series;

        let decision = series.finalize(&DecisionRules::new(
            at(2004, 3, 28),
            TimeDelta::days(20),
            TimeDelta::days(12),
        ));

        assert!(decision.expired.is_empty());
        assert_eq!(extend_targets(&decision), vec![("feb-1", at(2004, 4, 9))]);
    }

    // Invariants.

    #[test]
    fn test_no_latest_means_no_deletions() {
        let series = Builder::new()
            .version("jan-1", at(2003, 1, 1), false)
            .tombstone("feb-1-del", at(2003, 2, 1), false)
            .version("mar-1", at(2003, 3, 1), false)
            .series;

        let decision = series.finalize(&rules(at(2010, 1, 1), 10));

        assert!(decision.expired.is_empty());
        // Every regular version is kept alive; the marker cannot be.
        assert_eq!(
            extend_targets(&decision),
            vec![("jan-1", at(2010, 1, 11)), ("mar-1", at(2010, 1, 11))]
        );
    }

    #[test]
    fn test_all_tombstones_under_lingering_marker_stay_untouched() {
        let series = Builder::new()
            .tombstone("jan-1-del", at(2003, 1, 1), false)
            .tombstone("mar-1-del", at(2003, 3, 1), true)
            .series;

        let decision = series.finalize(&rules(at(2003, 3, 15), 10));

        assert!(decision.expired.is_empty());
        assert!(decision.extend.is_empty());
    }

    #[test]
    fn test_expiry_stops_at_first_survivor() {
        // mar-1 is still retained, so the oldest-first walk stops there and
        // may-1, old and unretained, survives behind it.
        let series = Builder::new()
            .version("jan-1", at(2003, 1, 1), false)
            .retained("mar-1", at(2003, 3, 1), false, at(2010, 1, 1))
            .version("may-1", at(2003, 5, 1), false)
            .version("dec-1", at(2003, 12, 1), true)
            .series;

        let decision = series.finalize(&rules(at(2004, 1, 1), 10));

        assert_eq!(expired_ids(&decision), vec!["jan-1"]);
    }

    #[test]
    fn test_expired_sets_satisfy_age_and_lock_bounds() {
        let now = at(2004, 1, 1);
        let r = rules(now, 10);
        let series = Builder::new()
            .version("a", at(2003, 1, 1), false)
            .retained("b", at(2003, 2, 1), false, at(2003, 6, 1))
            .version("c", at(2003, 3, 1), false)
            .version("d", at(2003, 12, 31), true)
            .series;

        let decision = series.finalize(&r);

        for v in &decision.expired {
            assert!(v.last_modified < now - TimeDelta::days(20));
            assert!(v.retain_until.is_none_or(|until| until < now));
        }
    }

    #[test]
    fn test_extension_not_requested_when_lock_already_reaches_target() {
        let series = Builder::new()
            .retained("feb-1", at(2004, 2, 1), true, at(2030, 1, 1))
            .series;

        let decision = series.finalize(&rules(at(2004, 3, 1), 10));

        assert!(decision.extend.is_empty());
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let decision_rules = rules(at(2010, 1, 1), 10);

        let objects = vec![
            object("jan-1", at(2003, 1, 1), false, false, None),
            object("feb-1", at(2003, 2, 1), false, false, None),
            object("feb-2", at(2003, 2, 1), false, false, None),
            object("mar-1", at(2003, 3, 1), true, false, None),
        ];

        // Rotations plus a reversal cover every pairwise order inversion.
        for start in 0..objects.len() {
            for reverse in [false, true] {
                let mut order: Vec<ObjectVersion> = objects
                    .iter()
                    .cycle()
                    .skip(start)
                    .take(objects.len())
                    .cloned()
                    .collect();

                if reverse {
                    order.reverse();
                }

                let mut series = VersionSeries::new();
                for v in order {
                    series.insert(v);
                }

                let ids: Vec<&str> =
                    series.items.iter().map(|v| v.version_id.as_str()).collect();
                assert_eq!(ids, vec!["jan-1", "feb-1", "feb-2", "mar-1"]);

                let decision = series.finalize(&decision_rules);
                assert_eq!(expired_ids(&decision), vec!["jan-1", "feb-1", "feb-2"]);
                assert_eq!(
                    extend_targets(&decision),
                    vec![("mar-1", at(2010, 1, 11))]
                );
            }
        }
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_version_id() {
        let t = at(2003, 2, 1);
        let mut series = VersionSeries::new();
        series.insert(object("b", t, false, false, None));
        series.insert(object("a", t, false, false, None));
        series.insert(object("c", t, true, false, None));

        let ids: Vec<&str> = series.items.iter().map(|v| v.version_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cutoff_is_truncated_to_the_minute() {
        let now = Utc.with_ymd_and_hms(2004, 1, 21, 0, 0, 30).unwrap();
        let r = rules(now, 10);

        // Modified exactly at the truncated cutoff: not strictly older.
        let series = Builder::new()
            .version("edge", at(2004, 1, 1), false)
            .version("head", at(2004, 1, 2), true)
            .series;

        let decision = series.finalize(&r);
        assert!(decision.expired.is_empty());
    }

    #[tokio::test]
    async fn test_processor_stage_defers_until_stream_closes() {
        let stats = Arc::new(CleanupStats::new());
        let processor = Processor::new(Arc::clone(&stats), rules(at(2010, 1, 1), 10));

        let (in_tx, in_rx) = mpsc::channel(8);
        let (extend_tx, mut extend_rx) = mpsc::channel(8);
        let (delete_tx, mut delete_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(processor.run(in_rx, extend_tx, delete_tx, cancel));

        in_tx
            .send(object("jan-1", at(2004, 1, 1), false, false, None))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        // The old version alone must not trigger a deletion; the head has
        // not been seen yet.
        assert!(delete_rx.try_recv().is_err());

        in_tx
            .send(object("feb-1", at(2004, 2, 1), true, false, None))
            .await
            .unwrap();
        drop(in_tx);

        handle.await.unwrap().unwrap();

        let deleted = delete_rx.recv().await.unwrap();
        assert_eq!(deleted.version_id, "jan-1");
        assert_eq!(delete_rx.recv().await, None);

        let extended = extend_rx.recv().await.unwrap();
        assert_eq!(extended.object.version_id, "feb-1");
        assert_eq!(extended.until, at(2010, 1, 11));

        assert_eq!(stats.snapshot().total_count, 2);
    }
}
