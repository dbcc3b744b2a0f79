//! Filter registry: owns the subscribed lists and mediates every cache and
//! network access for them.
//!
//! Each filter has its own operation lock, held for the whole of an
//! `update`, `load`, `unload` or `remove`, so operations on one filter form
//! a linear history while different filters proceed independently. The
//! filter's state sits behind a separate `RwLock` that is only held for
//! short critical sections, so snapshots never wait on the network.

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::counter::{count_rules, count_rules_from};
use crate::error::{Error, Result};
use crate::fetcher::{FetchOutcome, Fetcher, HttpFetcher};
use crate::filter::{Filter, FilterId};
use crate::metadata::FilterMetadata;
use crate::store::{digest, CacheStore};

struct Entry {
    /// Operation lock; `true` once the filter has been removed
    op: Mutex<bool>,
    state: RwLock<Filter>,
}

impl Entry {
    fn new(filter: Filter) -> Self {
        Self {
            op: Mutex::new(false),
            state: RwLock::new(filter),
        }
    }
}

/// Registry of filter lists backed by a [`CacheStore`].
///
/// # Example
///
/// ```ignore
/// use k2filter::{CacheStore, Filter, FilterRegistry, HttpFetcher};
///
/// let registry = FilterRegistry::new(CacheStore::new("data/filters"), HttpFetcher::new());
/// registry.init()?;
///
/// let id = registry.add(Filter::with_id(1, "https://example.com/filters/1.txt"))?;
///
/// // Download: true when the cached content changed
/// if registry.update(id)? {
///     println!("{} rules", registry.get(id).unwrap().rules_count);
/// }
///
/// // Later, without network
/// registry.unload(id);
/// registry.load(id)?;
/// ```
pub struct FilterRegistry {
    store: CacheStore,
    fetcher: Box<dyn Fetcher>,
    filters: RwLock<AHashMap<FilterId, Arc<Entry>>>,
}

impl FilterRegistry {
    /// Create an empty registry.
    pub fn new(store: CacheStore, fetcher: impl Fetcher + 'static) -> Self {
        Self {
            store,
            fetcher: Box::new(fetcher),
            filters: RwLock::new(AHashMap::new()),
        }
    }

    /// Create, initialize and populate a registry from configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let fetcher = HttpFetcher::with_config(config.fetch_timeout(), &config.user_agent);
        let registry = Self::new(CacheStore::new(&config.cache_dir), fetcher);
        registry.init()?;
        for filter in config.to_filters() {
            registry.add(filter)?;
        }
        Ok(registry)
    }

    /// Prepare the cache directory.
    ///
    /// Creates it if needed and removes temp files left by interrupted
    /// writes. Safe to call more than once, but must not run concurrently
    /// with updates.
    pub fn init(&self) -> Result<()> {
        self.store.init()?;
        log::debug!("Filter cache ready at {:?}", self.store.dir());
        Ok(())
    }

    /// Get the underlying cache store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Get the cache path of a filter.
    pub fn path(&self, id: FilterId) -> PathBuf {
        self.store.path(id)
    }

    /// Register a filter.
    ///
    /// The filter starts unloaded. ETag and last check time are restored
    /// from its metadata sidecar if one exists.
    pub fn add(&self, mut filter: Filter) -> Result<FilterId> {
        let id = filter.id;

        match FilterMetadata::load(self.store.metadata_path(id)) {
            Ok(meta) => {
                filter.etag = meta.etag;
                filter.last_checked = meta.last_checked;
            }
            Err(e) => log::warn!("Ignoring metadata of filter {}: {}", id, e),
        }
        filter.unload();

        let mut filters = self.filters.write();
        if filters.contains_key(&id) {
            return Err(Error::DuplicateFilter(id));
        }
        filters.insert(id, Arc::new(Entry::new(filter)));
        Ok(id)
    }

    /// Unregister a filter and delete its cached files.
    ///
    /// Waits for an in-flight operation on the filter to finish first. The
    /// filter stays registered until its files are gone, so the same id
    /// cannot be added again while they are being deleted.
    pub fn remove(&self, id: FilterId) -> Result<Filter> {
        let entry = self.entry(id)?;
        let mut retired = entry.op.lock();
        if *retired {
            return Err(Error::UnknownFilter(id));
        }

        self.store.delete(&self.store.path(id))?;
        self.store.delete(&self.store.metadata_path(id))?;

        *retired = true;
        self.filters.write().remove(&id);

        let mut filter = entry.state.read().clone();
        filter.unload();
        log::info!("Removed filter {} ({})", id, filter.url);
        Ok(filter)
    }

    /// Get a snapshot of a filter.
    pub fn get(&self, id: FilterId) -> Option<Filter> {
        self.filters.read().get(&id).map(|e| e.state.read().clone())
    }

    /// Get snapshots of all filters, ordered by id.
    pub fn filters(&self) -> Vec<Filter> {
        let mut all: Vec<Filter> = self
            .filters
            .read()
            .values()
            .map(|e| e.state.read().clone())
            .collect();
        all.sort_by_key(|f| f.id);
        all
    }

    /// Check if a filter is registered.
    pub fn contains(&self, id: FilterId) -> bool {
        self.filters.read().contains_key(&id)
    }

    /// Get the number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    /// Check if no filter is registered.
    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }

    /// Fetch a filter and refresh its cache.
    ///
    /// Returns `true` if new content was written. Unchanged content (or a
    /// 304 answer to the conditional request) returns `false` without
    /// rewriting the cache file; an already loaded filter keeps its rule
    /// count, an unloaded one is loaded from the cache. Either way the filter
    /// is loaded afterwards. On error the cache and the rule count are left
    /// as they were.
    pub fn update(&self, id: FilterId) -> Result<bool> {
        let entry = self.entry(id)?;
        let retired = entry.op.lock();
        if *retired {
            return Err(Error::UnknownFilter(id));
        }

        let (url, etag) = {
            let filter = entry.state.read();
            (filter.url.clone(), filter.etag.clone())
        };
        let path = self.store.path(id);
        let cached = self.store.digest(&path)?;
        // Only a cached copy can be revalidated
        let etag = cached.and(etag);

        let (body, new_etag) = match self.fetcher.fetch(&url, etag.as_deref()) {
            Ok(FetchOutcome::Content { body, etag }) => (body, etag),
            Ok(FetchOutcome::NotModified) => {
                if cached.is_none() {
                    return Err(Error::Fetch(format!(
                        "{} answered 304 but filter {} has no cache",
                        url, id
                    )));
                }
                log::debug!("Filter {} not modified (304)", id);
                self.load_if_unloaded(id, &entry, &path)?;
                self.record_check(id, &entry, etag);
                return Ok(false);
            }
            Err(e) => {
                log::warn!("Failed to fetch filter {} from {}: {}", id, url, e);
                return Err(e);
            }
        };

        if cached == Some(digest(&body)) {
            log::debug!("Filter {} unchanged ({} bytes)", id, body.len());
            self.load_if_unloaded(id, &entry, &path)?;
            self.record_check(id, &entry, new_etag);
            return Ok(false);
        }

        self.store.write(&path, &body)?;
        let rules_count = count_rules(&body);
        let modified = self.store.modified(&path);
        entry.state.write().set_loaded(rules_count, modified);
        self.record_check(id, &entry, new_etag);

        log::info!(
            "Updated filter {} from {}: {} rules ({} bytes)",
            id,
            url,
            rules_count,
            body.len()
        );
        Ok(true)
    }

    /// Load a filter from its cache without network access.
    ///
    /// Fails with [`Error::NotFound`] if the filter has never been
    /// downloaded or its cache was deleted.
    pub fn load(&self, id: FilterId) -> Result<()> {
        let entry = self.entry(id)?;
        let retired = entry.op.lock();
        if *retired {
            return Err(Error::UnknownFilter(id));
        }

        self.load_cached(id, &entry, &self.store.path(id))
    }

    /// Drop a filter's in-memory rule data. The cache file is kept.
    ///
    /// Unknown filters are ignored.
    pub fn unload(&self, id: FilterId) {
        let Ok(entry) = self.entry(id) else {
            return;
        };
        let retired = entry.op.lock();
        if !*retired {
            entry.state.write().unload();
        }
    }

    /// Refresh every enabled filter concurrently.
    pub fn update_all(&self) -> Vec<(FilterId, Result<bool>)> {
        let ids = self.enabled_ids(|_| true);
        self.update_many(ids)
    }

    /// Refresh enabled filters whose last check is older than `interval`.
    pub fn update_due(&self, interval: Duration) -> Vec<(FilterId, Result<bool>)> {
        let ids = self.enabled_ids(|f| f.needs_update(interval));
        self.update_many(ids)
    }

    /// Load every enabled filter from cache.
    pub fn load_all(&self) -> Vec<(FilterId, Result<()>)> {
        self.enabled_ids(|_| true)
            .into_iter()
            .map(|id| (id, self.load(id)))
            .collect()
    }

    /// Unload every filter.
    pub fn unload_all(&self) {
        let ids: Vec<FilterId> = self.filters.read().keys().copied().collect();
        for id in ids {
            self.unload(id);
        }
    }

    fn entry(&self, id: FilterId) -> Result<Arc<Entry>> {
        self.filters
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownFilter(id))
    }

    fn enabled_ids(&self, pred: impl Fn(&Filter) -> bool) -> Vec<FilterId> {
        let mut ids: Vec<FilterId> = self
            .filters
            .read()
            .values()
            .filter_map(|e| {
                let filter = e.state.read();
                (filter.enabled && pred(&*filter)).then_some(filter.id)
            })
            .collect();
        ids.sort();
        ids
    }

    fn update_many(&self, ids: Vec<FilterId>) -> Vec<(FilterId, Result<bool>)> {
        thread::scope(|s| {
            let workers: Vec<_> = ids
                .into_iter()
                .map(|id| (id, s.spawn(move || self.update(id))))
                .collect();

            workers
                .into_iter()
                .map(|(id, worker)| {
                    let result = worker
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                    (id, result)
                })
                .collect()
        })
    }

    /// Count the cached file and mark the filter loaded. Caller holds the
    /// operation lock.
    fn load_cached(&self, id: FilterId, entry: &Entry, path: &Path) -> Result<()> {
        let file = self.store.open(path)?;
        let modified = file.metadata().and_then(|m| m.modified()).ok();
        let rules_count = count_rules_from(BufReader::new(file))?;
        entry.state.write().set_loaded(rules_count, modified);

        log::debug!("Loaded filter {}: {} rules", id, rules_count);
        Ok(())
    }

    fn load_if_unloaded(&self, id: FilterId, entry: &Entry, path: &Path) -> Result<()> {
        if entry.state.read().loaded {
            return Ok(());
        }
        self.load_cached(id, entry, path)
    }

    fn record_check(&self, id: FilterId, entry: &Entry, etag: Option<String>) {
        let meta = FilterMetadata::checked_now(etag);
        {
            let mut filter = entry.state.write();
            filter.last_checked = meta.last_checked;
            filter.etag = meta.etag.clone();
        }
        if let Err(e) = meta.save(self.store.metadata_path(id)) {
            log::warn!("Failed to save metadata of filter {}: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use tempfile::{tempdir, TempDir};

    const LIST_URL: &str = "http://127.0.0.1/filters/1.txt";
    const LIST_V1: &str = "||example.org^$third-party
# Inline comment example
||example.com^$third-party
0.0.0.0 example.com
";
    const LIST_V2: &str = "||example.org^
||ads.example.net^
";

    /// Serves canned content per URL. Each call to a URL with several
    /// versions returns the next one in turn.
    #[derive(Default)]
    struct MockFetcher {
        lists: Mutex<HashMap<String, Vec<Vec<u8>>>>,
        etags: Mutex<HashMap<String, String>>,
        down: Mutex<bool>,
        calls: AtomicUsize,
    }

    impl MockFetcher {
        fn serving(url: &str, content: &str) -> Arc<Self> {
            let fetcher = Arc::new(Self::default());
            fetcher.set_content(url, content);
            fetcher
        }

        fn set_content(&self, url: &str, content: &str) {
            self.rotate(url, &[content]);
        }

        fn rotate(&self, url: &str, versions: &[&str]) {
            let versions = versions.iter().map(|v| v.as_bytes().to_vec()).collect();
            self.lists.lock().insert(url.to_string(), versions);
        }

        fn set_etag(&self, url: &str, etag: &str) {
            self.etags.lock().insert(url.to_string(), etag.to_string());
        }

        fn set_down(&self, down: bool) {
            *self.down.lock() = down;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for MockFetcher {
        fn fetch(&self, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.down.lock() {
                return Err(Error::Fetch("connection refused".to_string()));
            }

            let current = self.etags.lock().get(url).cloned();
            if etag.is_some() && etag == current.as_deref() {
                return Ok(FetchOutcome::NotModified);
            }

            let lists = self.lists.lock();
            let versions = lists.get(url).ok_or(Error::Status(404))?;
            Ok(FetchOutcome::Content {
                body: versions[call % versions.len()].clone(),
                etag: current,
            })
        }
    }

    fn setup(fetcher: &Arc<MockFetcher>) -> (TempDir, FilterRegistry) {
        let dir = tempdir().unwrap();
        let registry = FilterRegistry::new(CacheStore::new(dir.path()), fetcher.clone());
        registry.init().unwrap();
        (dir, registry)
    }

    fn mtime(path: &std::path::Path) -> std::time::SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }

    #[test]
    fn test_download_then_refresh() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();

        // download
        assert!(registry.update(id).unwrap());
        let filter = registry.get(id).unwrap();
        assert!(filter.loaded);
        assert_eq!(filter.rules_count, 3);
        assert_eq!(fs::read(registry.path(id)).unwrap(), LIST_V1.as_bytes());
        let written = mtime(&registry.path(id));

        // refresh
        assert!(!registry.update(id).unwrap());
        let filter = registry.get(id).unwrap();
        assert_eq!(filter.rules_count, 3);
        assert!(filter.last_checked.is_some());
        assert_eq!(mtime(&registry.path(id)), written);
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_changed_content_is_rewritten() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();

        assert!(registry.update(id).unwrap());
        fetcher.set_content(LIST_URL, LIST_V2);
        assert!(registry.update(id).unwrap());

        assert_eq!(registry.get(id).unwrap().rules_count, 2);
        assert_eq!(fs::read(registry.path(id)).unwrap(), LIST_V2.as_bytes());
    }

    #[test]
    fn test_load_after_update_is_offline() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        assert!(registry.update(id).unwrap());

        fetcher.set_down(true);
        registry.load(id).unwrap();

        let filter = registry.get(id).unwrap();
        assert!(filter.loaded);
        assert_eq!(filter.rules_count, 3);
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_unload_then_load() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        registry.update(id).unwrap();

        registry.unload(id);
        let filter = registry.get(id).unwrap();
        assert!(!filter.loaded);
        assert_eq!(filter.loaded_rules(), None);
        assert!(registry.path(id).exists());

        registry.load(id).unwrap();
        assert_eq!(registry.get(id).unwrap().loaded_rules(), Some(3));
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_load_without_cache_is_not_found() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();

        assert!(registry.load(id).unwrap_err().is_not_found());

        registry.update(id).unwrap();
        fs::remove_file(registry.path(id)).unwrap();
        assert!(matches!(registry.load(id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_failed_update_keeps_cache() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        registry.update(id).unwrap();
        let written = mtime(&registry.path(id));

        fetcher.set_down(true);
        assert!(registry.update(id).unwrap_err().is_fetch());

        let filter = registry.get(id).unwrap();
        assert!(filter.loaded);
        assert_eq!(filter.rules_count, 3);
        assert_eq!(fs::read(registry.path(id)).unwrap(), LIST_V1.as_bytes());
        assert_eq!(mtime(&registry.path(id)), written);
    }

    #[test]
    fn test_http_status_error() {
        let fetcher = Arc::new(MockFetcher::default());
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();

        assert!(matches!(registry.update(id), Err(Error::Status(404))));
        assert!(!registry.path(id).exists());
        assert!(!registry.get(id).unwrap().loaded);
    }

    #[test]
    fn test_etag_not_modified() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        fetcher.set_etag(LIST_URL, "\"v1\"");
        let (dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();

        assert!(registry.update(id).unwrap());
        assert_eq!(registry.get(id).unwrap().etag.as_deref(), Some("\"v1\""));

        // Served content changed but the server says 304; trust the server
        fetcher.set_content(LIST_URL, LIST_V2);
        assert!(!registry.update(id).unwrap());
        assert_eq!(registry.get(id).unwrap().rules_count, 3);

        // ETag survives a restart through the sidecar
        let restarted = FilterRegistry::new(CacheStore::new(dir.path()), fetcher.clone());
        let id = restarted.add(Filter::new(LIST_URL)).unwrap();
        let filter = restarted.get(id).unwrap();
        assert_eq!(filter.etag.as_deref(), Some("\"v1\""));
        assert!(filter.last_checked.is_some());
        assert!(!filter.loaded);
    }

    #[test]
    fn test_etag_not_sent_without_cache() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        fetcher.set_etag(LIST_URL, "\"v1\"");
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        registry.update(id).unwrap();

        fs::remove_file(registry.path(id)).unwrap();
        assert!(registry.update(id).unwrap());
        assert!(registry.path(id).exists());
    }

    #[test]
    fn test_stale_temp_file_does_not_affect_cache() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        registry.update(id).unwrap();

        // Crash after writing a temp file but before the rename
        let stale = dir.path().join(".k2crash.tmp");
        fs::write(&stale, &LIST_V2.as_bytes()[..5]).unwrap();

        registry.unload(id);
        registry.load(id).unwrap();
        assert_eq!(registry.get(id).unwrap().rules_count, 3);

        registry.init().unwrap();
        assert!(!stale.exists());
        assert!(registry.path(id).exists());
    }

    #[test]
    fn test_concurrent_updates_same_filter() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.rotate(LIST_URL, &[LIST_V1, LIST_V2]);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        let valid = [count_rules(LIST_V1.as_bytes()), count_rules(LIST_V2.as_bytes())];

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..5 {
                        registry.update(id).unwrap();
                        let count = registry.get(id).unwrap().rules_count;
                        assert!(valid.contains(&count));
                    }
                });
            }
        });

        assert_eq!(fetcher.calls(), 40);
        let on_disk = fs::read(registry.path(id)).unwrap();
        assert!(on_disk == LIST_V1.as_bytes() || on_disk == LIST_V2.as_bytes());
        assert_eq!(registry.get(id).unwrap().rules_count, count_rules(&on_disk));
    }

    #[test]
    fn test_update_all_reports_per_filter() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.set_content("http://a.example/list.txt", LIST_V1);
        fetcher.set_content("http://b.example/list.txt", LIST_V2);
        let (_dir, registry) = setup(&fetcher);

        let a = registry.add(Filter::with_id(1, "http://a.example/list.txt")).unwrap();
        let b = registry.add(Filter::with_id(2, "http://b.example/list.txt")).unwrap();
        let missing = registry
            .add(Filter::with_id(3, "http://c.example/list.txt"))
            .unwrap();
        registry
            .add(Filter::with_id(4, "http://a.example/list.txt").with_enabled(false))
            .unwrap();

        let results = registry.update_all();
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], (id, Ok(true)) if id == a));
        assert!(matches!(results[1], (id, Ok(true)) if id == b));
        assert!(matches!(results[2], (id, Err(Error::Status(404))) if id == missing));

        assert_eq!(registry.get(a).unwrap().rules_count, 3);
        assert_eq!(registry.get(b).unwrap().rules_count, 2);
        assert!(!registry.get(FilterId::new(4)).unwrap().loaded);
    }

    #[test]
    fn test_update_due_skips_recent() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();

        assert_eq!(registry.update_due(Duration::from_secs(3600)).len(), 1);
        assert!(registry.update_due(Duration::from_secs(3600)).is_empty());
        assert_eq!(registry.update_due(Duration::ZERO).len(), 1);
        assert_eq!(fetcher.calls(), 2);
        assert!(registry.get(id).unwrap().loaded);
    }

    #[test]
    fn test_load_all_and_unload_all() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let cached = registry.add(Filter::with_id(1, LIST_URL)).unwrap();
        let fresh = registry.add(Filter::with_id(2, LIST_URL)).unwrap();
        registry.update(cached).unwrap();
        registry.unload_all();

        let results = registry.load_all();
        assert!(results[0].1.is_ok());
        assert!(matches!(&results[1], (id, Err(Error::NotFound(_))) if *id == fresh));
        assert_eq!(registry.get(cached).unwrap().loaded_rules(), Some(3));

        registry.unload_all();
        assert!(registry.filters().iter().all(|f| !f.loaded));
    }

    #[test]
    fn test_remove_deletes_cache() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        registry.update(id).unwrap();
        let path = registry.path(id);
        let meta_path = registry.store().metadata_path(id);
        assert!(meta_path.exists());

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.url, LIST_URL);
        assert!(!removed.loaded);
        assert!(!path.exists());
        assert!(!meta_path.exists());
        assert!(!registry.contains(id));
        assert!(registry.is_empty());

        assert!(matches!(registry.update(id), Err(Error::UnknownFilter(_))));
        assert!(matches!(registry.remove(id), Err(Error::UnknownFilter(_))));
        // Unload of an unknown filter is a no-op
        registry.unload(id);
    }

    #[test]
    fn test_unchanged_update_after_restart_loads_cache() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        assert!(registry.update(id).unwrap());
        let written = mtime(&registry.path(id));

        let restarted = FilterRegistry::new(CacheStore::new(dir.path()), fetcher.clone());
        let id = restarted.add(Filter::new(LIST_URL)).unwrap();
        assert!(!restarted.get(id).unwrap().loaded);

        assert!(!restarted.update(id).unwrap());
        let filter = restarted.get(id).unwrap();
        assert_eq!(filter.loaded_rules(), Some(3));
        assert_eq!(mtime(&restarted.path(id)), written);
    }

    #[test]
    fn test_not_modified_after_restart_loads_cache() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        fetcher.set_etag(LIST_URL, "\"v1\"");
        let (dir, registry) = setup(&fetcher);
        let id = registry.add(Filter::new(LIST_URL)).unwrap();
        assert!(registry.update(id).unwrap());

        let restarted = FilterRegistry::new(CacheStore::new(dir.path()), fetcher.clone());
        let id = restarted.add(Filter::new(LIST_URL)).unwrap();

        // 304 from the server, count comes from the cached file
        fetcher.set_content(LIST_URL, LIST_V2);
        assert!(!restarted.update(id).unwrap());
        assert_eq!(restarted.get(id).unwrap().loaded_rules(), Some(3));
        assert_eq!(fs::read(restarted.path(id)).unwrap(), LIST_V1.as_bytes());
    }

    /// Blocks inside `fetch` until released.
    struct GatedFetcher {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Fetcher for GatedFetcher {
        fn fetch(&self, _url: &str, _etag: Option<&str>) -> Result<FetchOutcome> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            Ok(FetchOutcome::Content {
                body: LIST_V1.as_bytes().to_vec(),
                etag: None,
            })
        }
    }

    #[test]
    fn test_remove_keeps_id_reserved_until_deleted() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let fetcher = GatedFetcher {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let dir = tempdir().unwrap();
        let registry = FilterRegistry::new(CacheStore::new(dir.path()), fetcher);
        registry.init().unwrap();
        let id = registry.add(Filter::with_id(1, LIST_URL)).unwrap();

        thread::scope(|s| {
            let updating = s.spawn(|| registry.update(id));
            entered_rx.recv().unwrap();

            let removing = s.spawn(|| registry.remove(id));
            thread::sleep(Duration::from_millis(50));

            // Removal is waiting on the in-flight update; the id is still taken
            assert!(matches!(
                registry.add(Filter::with_id(1, LIST_URL)),
                Err(Error::DuplicateFilter(_))
            ));

            release_tx.send(()).unwrap();
            assert!(updating.join().unwrap().unwrap());
            removing.join().unwrap().unwrap();
        });

        assert!(!registry.path(id).exists());
        assert!(!registry.store().metadata_path(id).exists());
        assert!(!registry.contains(id));
        registry.add(Filter::with_id(1, LIST_URL)).unwrap();
    }

    #[test]
    fn test_duplicate_add() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        registry.add(Filter::with_id(7, LIST_URL)).unwrap();
        assert!(matches!(
            registry.add(Filter::with_id(7, "http://other.example/list.txt")),
            Err(Error::DuplicateFilter(id)) if id == FilterId::new(7)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_resets_loaded_state() {
        let fetcher = MockFetcher::serving(LIST_URL, LIST_V1);
        let (_dir, registry) = setup(&fetcher);
        let mut filter = Filter::new(LIST_URL);
        filter.loaded = true;
        filter.rules_count = 99;

        let id = registry.add(filter).unwrap();
        assert_eq!(registry.get(id).unwrap().loaded_rules(), None);
    }

    #[test]
    fn test_from_config() {
        let dir = tempdir().unwrap();
        let yaml = format!(
            "cache_dir: {:?}\nfilters:\n  - id: 1\n    url: {}\n  - id: 2\n    url: http://b.example/list.txt\n",
            dir.path().join("filters"),
            LIST_URL
        );
        let config = SyncConfig::from_yaml(&yaml).unwrap();
        let registry = FilterRegistry::from_config(&config).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(dir.path().join("filters").is_dir());
        assert_eq!(
            registry.path(FilterId::new(1)),
            dir.path().join("filters").join("1.txt")
        );
    }
}
