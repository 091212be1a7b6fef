use crate::domain::daily::DailyAggregate;
use crate::error::{CoreError, Result};
use crate::ingest::source::AggregateSource;
use crate::storage::snapshot::{SnapshotRead, SnapshotStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Outcome bookkeeping shared by everyone contending for one rebuild lock.
#[derive(Debug, Default)]
pub struct EpisodeLog {
    last: Option<(u64, std::result::Result<Arc<Vec<DailyAggregate>>, CoreError>)>,
}

/// Mutual exclusion for rebuild episodes.
///
/// Cloning shares the lock. Each [`RebuildCoordinator`] gets its own unless
/// one is injected with [`RebuildCoordinator::with_lock`].
#[derive(Debug, Clone, Default)]
pub struct RebuildLock {
    log: Arc<Mutex<EpisodeLog>>,
    completed: Arc<AtomicU64>,
}

impl RebuildLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rebuild episodes that have finished, successfully or not.
    pub fn completed_episodes(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

/// Cache-or-build access to the daily aggregate collection.
///
/// A snapshot hit never takes the lock. On a miss, callers serialize on the
/// lock; the first one runs source → aggregate → snapshot write and everyone
/// who queued during that episode receives its result (or its error) instead
/// of starting another build. An episode runs in its own task, so dropping a
/// caller does not cancel a rebuild in flight. There is no wait timeout.
#[derive(Clone)]
pub struct RebuildCoordinator {
    store: Arc<SnapshotStore>,
    source: Arc<dyn AggregateSource>,
    lock: RebuildLock,
}

impl RebuildCoordinator {
    pub fn new(store: SnapshotStore, source: Arc<dyn AggregateSource>) -> Self {
        Self::with_lock(store, source, RebuildLock::new())
    }

    pub fn with_lock(
        store: SnapshotStore,
        source: Arc<dyn AggregateSource>,
        lock: RebuildLock,
    ) -> Self {
        Self {
            store: Arc::new(store),
            source,
            lock,
        }
    }

    pub fn lock(&self) -> &RebuildLock {
        &self.lock
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn get_or_build(&self) -> Result<Vec<DailyAggregate>> {
        let seen = self.lock.completed_episodes();

        if let Some(daily) = self.read_snapshot().await {
            return Ok(daily);
        }

        let guard = self.lock.log.clone().lock_owned().await;

        // An episode finished while we waited: share its outcome.
        if let Some((episode, outcome)) = &guard.last {
            if *episode > seen {
                tracing::debug!(episode, "reusing outcome of concurrent rebuild");
                return outcome.as_ref().map(|d| (**d).clone()).map_err(Clone::clone);
            }
        }

        if let Some(daily) = self.read_snapshot().await {
            return Ok(daily);
        }

        self.spawn_episode(guard, false).await
    }

    /// Rebuilds unconditionally (still under the lock). Unlike
    /// [`Self::get_or_build`], a snapshot write failure is returned as an error.
    pub async fn rebuild(&self) -> Result<Vec<DailyAggregate>> {
        let guard = self.lock.log.clone().lock_owned().await;
        self.spawn_episode(guard, true).await
    }

    async fn spawn_episode(
        &self,
        guard: OwnedMutexGuard<EpisodeLog>,
        strict_write: bool,
    ) -> Result<Vec<DailyAggregate>> {
        let this = self.clone();
        tokio::spawn(async move { this.run_episode(guard, strict_write).await })
            .await
            .map_err(|e| CoreError::Aggregation(format!("rebuild task failed: {e}")))?
    }

    async fn run_episode(
        &self,
        mut guard: OwnedMutexGuard<EpisodeLog>,
        strict_write: bool,
    ) -> Result<Vec<DailyAggregate>> {
        let episode = self.lock.completed_episodes() + 1;
        let episode_id = Uuid::new_v4();
        let t0 = Instant::now();
        tracing::info!(
            %episode_id,
            episode,
            source = self.source.source_name(),
            "snapshot rebuild started"
        );

        let built = self.source.build_daily().await.map(Arc::new);

        let mut write_failure = None;
        if let Ok(daily) = &built {
            if let Err(err) = self.write_snapshot(daily.clone()).await {
                tracing::error!(
                    %episode_id,
                    error = %err,
                    "snapshot write failed; serving rebuilt data without persisting"
                );
                write_failure = Some(err);
            }
        }

        match &built {
            Ok(daily) => tracing::info!(
                %episode_id,
                days = daily.len(),
                elapsed_ms = t0.elapsed().as_millis(),
                "snapshot rebuild finished"
            ),
            Err(err) => tracing::error!(
                %episode_id,
                error = %err,
                elapsed_ms = t0.elapsed().as_millis(),
                "snapshot rebuild failed"
            ),
        }

        guard.last = Some((episode, built.clone()));
        self.lock.completed.store(episode, Ordering::Release);
        drop(guard);

        match (built, write_failure) {
            (Err(err), _) => Err(err),
            (Ok(_), Some(err)) if strict_write => Err(err),
            (Ok(daily), _) => Ok(Arc::unwrap_or_clone(daily)),
        }
    }

    async fn read_snapshot(&self) -> Option<Vec<DailyAggregate>> {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.read()).await {
            Ok(SnapshotRead::Present(daily)) => Some(daily),
            Ok(SnapshotRead::Absent) => {
                tracing::debug!(snapshot = %self.store.path().display(), "snapshot absent");
                None
            }
            Ok(SnapshotRead::Invalid(reason)) => {
                tracing::warn!(
                    snapshot = %self.store.path().display(),
                    %reason,
                    "snapshot invalid; will rebuild"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "snapshot read task failed; will rebuild");
                None
            }
        }
    }

    async fn write_snapshot(&self, daily: Arc<Vec<DailyAggregate>>) -> Result<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.write(&daily))
            .await
            .map_err(|e| CoreError::SnapshotWrite(format!("snapshot write task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn series() -> Vec<DailyAggregate> {
        vec![
            DailyAggregate {
                date: "2024-01-01".to_string(),
                clicks: 10.0,
                impressions: 300.0,
                ctr: 10.0 / 300.0,
                position: 4.2,
            },
            DailyAggregate {
                date: "2024-01-02".to_string(),
                clicks: 12.0,
                impressions: 310.0,
                ctr: 12.0 / 310.0,
                position: 3.9,
            },
        ]
    }

    /// Counts builds and blocks each one until the test opens the gate.
    struct GatedSource {
        calls: AtomicUsize,
        gate: Notify,
        fail_first: bool,
    }

    impl GatedSource {
        fn new(fail_first: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
                fail_first,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl AggregateSource for GatedSource {
        fn source_name(&self) -> &'static str {
            "gated_test_source"
        }

        async fn build_daily(&self) -> Result<Vec<DailyAggregate>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail_first && n == 0 {
                return Err(CoreError::SourceCorrupted("test failure".to_string()));
            }
            Ok(series())
        }
    }

    fn coordinator(dir: &tempfile::TempDir, source: Arc<GatedSource>) -> RebuildCoordinator {
        RebuildCoordinator::new(SnapshotStore::new(dir.path().join("daily.json")), source)
    }

    async fn spawn_callers(
        coord: &RebuildCoordinator,
        n: usize,
    ) -> Vec<tokio::task::JoinHandle<Result<Vec<DailyAggregate>>>> {
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let c = coord.clone();
                tokio::spawn(async move { c.get_or_build().await })
            })
            .collect();
        // Let every caller reach the lock before the build is released.
        tokio::time::sleep(Duration::from_millis(100)).await;
        handles
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_run_exactly_one_build() {
        let dir = tempfile::tempdir().unwrap();
        let source = GatedSource::new(false);
        let coord = coordinator(&dir, source.clone());

        let handles = spawn_callers(&coord, 8).await;
        source.gate.notify_one();

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert_eq!(source.calls(), 1);
        assert!(results.iter().all(|r| *r == series()));
        assert_eq!(coord.lock().completed_episodes(), 1);
        assert_eq!(coord.store().read(), SnapshotRead::Present(series()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_callers_share_one_ingestion() {
        let dir = tempfile::tempdir().unwrap();
        let source = GatedSource::new(false);
        let coord = coordinator(&dir, source.clone());

        let handles = spawn_callers(&coord, 2).await;
        assert_eq!(source.calls(), 1);
        source.gate.notify_one();

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn snapshot_hit_skips_build() {
        let dir = tempfile::tempdir().unwrap();
        let source = GatedSource::new(false);
        let coord = coordinator(&dir, source.clone());
        coord.store().write(&series()).unwrap();

        let daily = coord.get_or_build().await.unwrap();
        assert_eq!(daily, series());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_snapshot_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let source = GatedSource::new(false);
        let coord = coordinator(&dir, source.clone());
        std::fs::write(coord.store().path(), b"not json").unwrap();

        source.gate.notify_one();
        let daily = coord.get_or_build().await.unwrap();
        assert_eq!(daily, series());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_reaches_all_waiters_then_next_call_retries() {
        let dir = tempfile::tempdir().unwrap();
        let source = GatedSource::new(true);
        let coord = coordinator(&dir, source.clone());

        let handles = spawn_callers(&coord, 3).await;
        source.gate.notify_one();
        for h in handles {
            let err = h.await.unwrap().unwrap_err();
            assert!(matches!(err, CoreError::SourceCorrupted(_)));
        }
        assert_eq!(source.calls(), 1);

        source.gate.notify_one();
        let daily = coord.get_or_build().await.unwrap();
        assert_eq!(daily, series());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn write_failure_still_serves_data_but_rebuild_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let source = GatedSource::new(false);
        let coord =
            RebuildCoordinator::new(SnapshotStore::new(blocker.join("daily.json")), source.clone());

        source.gate.notify_one();
        assert_eq!(coord.get_or_build().await.unwrap(), series());

        source.gate.notify_one();
        let err = coord.rebuild().await.unwrap_err();
        assert!(matches!(err, CoreError::SnapshotWrite(_)));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn snapshot_hit_is_not_blocked_by_rebuild_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let source = GatedSource::new(false);
        let coord = coordinator(&dir, source.clone());
        let prior = vec![series()[0].clone()];
        coord.store().write(&prior).unwrap();

        let rebuilding = coord.clone();
        let rebuild = tokio::spawn(async move { rebuilding.rebuild().await });
        while source.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let hit = tokio::time::timeout(Duration::from_millis(200), coord.get_or_build())
            .await
            .expect("cache hit waited on the rebuild lock")
            .unwrap();
        assert_eq!(hit, prior);
        assert_eq!(source.calls(), 1);

        source.gate.notify_one();
        assert_eq!(rebuild.await.unwrap().unwrap(), series());
        assert_eq!(coord.store().read(), SnapshotRead::Present(series()));
    }

    #[tokio::test]
    async fn coordinators_do_not_share_locks_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let a = coordinator(&dir, GatedSource::new(false));
        let b = coordinator(&dir, GatedSource::new(false));
        assert!(!Arc::ptr_eq(&a.lock().log, &b.lock().log));

        let shared = RebuildLock::new();
        let c = RebuildCoordinator::with_lock(
            SnapshotStore::new(dir.path().join("c.json")),
            GatedSource::new(false),
            shared.clone(),
        );
        assert!(Arc::ptr_eq(&c.lock().log, &shared.log));
    }
}
