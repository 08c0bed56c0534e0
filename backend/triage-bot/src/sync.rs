//! Long-running background task that pulls newly registered projects from
//! the registry into the local [`ProjectCache`].

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::cache::ProjectCache;
use crate::errors::Result;
use crate::project::Project;
use crate::registry::Registry;

/// Maximum number of projects fetched per tick.
pub const PAGE_SIZE: u64 = 10;

/// Run the synchronizer forever, one page per tick.
pub async fn run<R: Registry>(registry: R, cache: ProjectCache, interval_secs: u64) {
    info!("Registry sync starting — every {interval_secs}s");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = sync_once(&registry, &cache).await {
            error!("Registry sync error: {e}");
        }
    }
}

/// Perform a single sync iteration.
///
/// Returns the number of projects appended. Catch-up across a gap wider than
/// [`PAGE_SIZE`] happens over several calls.
pub async fn sync_once<R: Registry + ?Sized>(registry: &R, cache: &ProjectCache) -> Result<usize> {
    let total = registry.total_projects().await?;
    let local = cache.len() as u64;
    if total <= local {
        return Ok(0);
    }

    info!("Updating projects, total: {total}, cached: {local}");
    let wanted = PAGE_SIZE.min(total - local);
    let page = registry.get_project_list(PAGE_SIZE, local).await?;

    let appended = cache.extend(
        page.into_iter()
            .take(wanted as usize)
            .map(Project::from),
    );
    info!("Appended {appended} projects ({} cached)", cache.len());
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TriageError;
    use crate::registry::ProjectRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory registry holding `total` sequentially numbered projects.
    struct FakeRegistry {
        total: AtomicU64,
        list_calls: AtomicUsize,
        offsets: Mutex<Vec<u64>>,
        /// Upcoming `total_projects` calls that fail.
        failures: AtomicUsize,
        /// Records returned past the requested page.
        extra: u64,
    }

    impl FakeRegistry {
        fn new(total: u64) -> Self {
            Self {
                total: AtomicU64::new(total),
                list_calls: AtomicUsize::new(0),
                offsets: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(0),
                extra: 0,
            }
        }

        fn failing(self, times: usize) -> Self {
            self.failures.store(times, Ordering::SeqCst);
            self
        }

        fn record(i: u64) -> ProjectRecord {
            ProjectRecord {
                owner: format!("0x{i:040x}"),
                contracts: vec![format!("0xC{i:039x}")],
                domain: format!("project-{i}.xyz"),
                contact: format!("tg:odesec_bot/{i}"),
            }
        }
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn total_projects(&self) -> Result<u64> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(TriageError::RegistryUnavailable("node down".to_string()));
            }
            Ok(self.total.load(Ordering::SeqCst))
        }

        async fn get_project_list(&self, limit: u64, offset: u64) -> Result<Vec<ProjectRecord>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.offsets.lock().unwrap().push(offset);
            let total = self.total.load(Ordering::SeqCst);
            let end = total.min(offset + limit) + self.extra;
            Ok((offset..end).map(Self::record).collect())
        }
    }

    fn domains(cache: &ProjectCache) -> Vec<String> {
        cache.snapshot().into_iter().map(|p| p.domain).collect()
    }

    #[tokio::test]
    async fn catches_up_one_page_per_tick() {
        let registry = FakeRegistry::new(25);
        let cache = ProjectCache::new();
        cache.extend((0..10).map(|i| FakeRegistry::record(i).into()));

        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 10);
        assert_eq!(cache.len(), 20);
        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 5);
        assert_eq!(cache.len(), 25);

        assert_eq!(*registry.offsets.lock().unwrap(), vec![10, 20]);
        let expected: Vec<String> = (0..25).map(|i| format!("project-{i}.xyz")).collect();
        assert_eq!(domains(&cache), expected);
    }

    #[tokio::test]
    async fn up_to_date_cache_fetches_nothing() {
        let registry = FakeRegistry::new(3);
        let cache = ProjectCache::new();
        cache.extend((0..3).map(|i| FakeRegistry::record(i).into()));

        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 0);
        assert_eq!(registry.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn registry_behind_cache_is_a_no_op() {
        let registry = FakeRegistry::new(1);
        let cache = ProjectCache::new();
        cache.extend((0..4).map(|i| FakeRegistry::record(i).into()));

        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 0);
        assert_eq!(registry.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test]
    async fn new_registrations_are_picked_up_later() {
        let registry = FakeRegistry::new(2);
        let cache = ProjectCache::new();
        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 2);

        registry.total.store(3, Ordering::SeqCst);
        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 1);
        assert_eq!(domains(&cache)[2], "project-2.xyz");
        // Contracts were normalized on the way in.
        assert_eq!(
            cache.snapshot()[2].contracts[0].as_str(),
            format!("0xc{:039x}", 2)
        );
    }

    #[tokio::test]
    async fn unavailable_registry_leaves_cache_untouched() {
        let registry = FakeRegistry::new(5).failing(1);
        let cache = ProjectCache::new();
        cache.extend((0..2).map(|i| FakeRegistry::record(i).into()));

        assert!(matches!(
            sync_once(&registry, &cache).await,
            Err(TriageError::RegistryUnavailable(_))
        ));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_interval() {
        let cache = ProjectCache::new();
        let handle = tokio::spawn(run(FakeRegistry::new(15), cache.clone(), 10));

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.len(), 10);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.len(), 15);
        handle.abort();
    }

    #[tokio::test]
    async fn over_returned_records_are_not_appended() {
        let registry = FakeRegistry {
            extra: 5,
            ..FakeRegistry::new(13)
        };
        let cache = ProjectCache::new();
        cache.extend((0..10).map(|i| FakeRegistry::record(i).into()));

        // Gap of 3, registry answers with 8.
        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 3);
        assert_eq!(cache.len(), 13);
        assert_eq!(domains(&cache)[12], "project-12.xyz");

        // Full page requested, registry answers with 15.
        registry.total.store(40, Ordering::SeqCst);
        assert_eq!(sync_once(&registry, &cache).await.unwrap(), 10);
        assert_eq!(cache.len(), 23);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_is_retried_on_next_tick() {
        let cache = ProjectCache::new();
        let registry = FakeRegistry::new(15).failing(1);
        let handle = tokio::spawn(run(registry, cache.clone(), 10));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.len(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.len(), 10);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.len(), 15);
        handle.abort();
    }
}
