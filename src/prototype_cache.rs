//! Prototype cache: in-memory always, on-disk when a cache dir is set.
//!
//! The cache guarantees at-most-one concurrent analysis per type: racing
//! threads share a per-type `OnceCell`, so the first one runs the
//! analysis and the rest block on its result. Disk entries are byte-stable
//! JSON keyed by the type name; freshness is decided by comparing an
//! opaque source fingerprint.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::prototype::ServicePrototype;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

type Entry = Arc<OnceCell<Arc<ServicePrototype>>>;

/// Shared prototype storage with single-flight analysis.
pub struct PrototypeCache {
    entries: DashMap<String, Entry, RandomState>,
    fingerprints: DashMap<String, Vec<u8>, RandomState>,
    dir: Option<PathBuf>,
}

impl PrototypeCache {
    /// A purely in-memory cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(RandomState::new()),
            fingerprints: DashMap::with_hasher(RandomState::new()),
            dir: None,
        }
    }

    /// A cache that additionally persists prototypes under `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            entries: DashMap::with_hasher(RandomState::new()),
            fingerprints: DashMap::with_hasher(RandomState::new()),
            dir: Some(dir),
        })
    }

    /// Look up a prototype, falling back to disk when persistence is on.
    pub fn get(&self, type_name: &str) -> Option<Arc<ServicePrototype>> {
        if let Some(cell) = self.entries.get(type_name) {
            if let Some(proto) = cell.get() {
                return Some(Arc::clone(proto));
            }
        }

        let loaded = self.load_from_disk(type_name).ok().flatten()?;
        #[cfg(feature = "logging")]
        trace!(
            target: "blueprint_di",
            service_type = type_name,
            "Prototype loaded from disk cache"
        );
        let cell = self
            .entries
            .entry(type_name.to_string())
            .or_default()
            .clone();
        Some(Arc::clone(cell.get_or_init(|| Arc::new(loaded))))
    }

    /// Store a prototype, replacing any previous entry.
    pub fn put(&self, type_name: &str, prototype: ServicePrototype) -> Result<()> {
        self.write_to_disk(type_name, &prototype)?;
        self.entries.insert(
            type_name.to_string(),
            Arc::new(OnceCell::with_value(Arc::new(prototype))),
        );
        Ok(())
    }

    /// Drop one type's cached prototype and fingerprint.
    pub fn invalidate(&self, type_name: &str) {
        self.entries.remove(type_name);
        self.fingerprints.remove(type_name);
        if let Some(dir) = &self.dir {
            let _ = std::fs::remove_file(Self::json_path(dir, type_name));
            let _ = std::fs::remove_file(Self::fp_path(dir, type_name));
        }
    }

    /// Drop every cached prototype.
    pub fn clear_all(&self) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.invalidate(&key);
        }
        self.entries.clear();
        self.fingerprints.clear();
    }

    /// Record the source fingerprint the cached prototype was derived from.
    pub fn record_fingerprint(&self, type_name: &str, fingerprint: &[u8]) -> Result<()> {
        self.fingerprints
            .insert(type_name.to_string(), fingerprint.to_vec());
        if let Some(dir) = &self.dir {
            std::fs::write(Self::fp_path(dir, type_name), fingerprint)?;
        }
        Ok(())
    }

    /// Whether the cached entry for `type_name` matches `fingerprint`.
    ///
    /// Returns false when nothing was recorded: an unknown entry is never
    /// fresh.
    pub fn is_fresh(&self, type_name: &str, fingerprint: &[u8]) -> bool {
        if let Some(stored) = self.fingerprints.get(type_name) {
            return stored.as_slice() == fingerprint;
        }
        if let Some(dir) = &self.dir {
            if let Ok(stored) = std::fs::read(Self::fp_path(dir, type_name)) {
                self.fingerprints
                    .insert(type_name.to_string(), stored.clone());
                return stored.as_slice() == fingerprint;
            }
        }
        false
    }

    /// Return the cached prototype or run `analyze` exactly once to fill
    /// the entry, even under concurrent callers.
    pub fn get_or_analyze<F>(&self, type_name: &str, analyze: F) -> Result<Arc<ServicePrototype>>
    where
        F: FnOnce() -> Result<ServicePrototype>,
    {
        let cell = self
            .entries
            .entry(type_name.to_string())
            .or_default()
            .clone();

        let result = cell.get_or_try_init(|| {
            if let Some(loaded) = self.load_from_disk(type_name)? {
                return Ok(Arc::new(loaded));
            }
            let prototype = analyze()?;
            self.write_to_disk(type_name, &prototype)?;
            #[cfg(feature = "logging")]
            debug!(
                target: "blueprint_di",
                service_type = type_name,
                "Prototype analyzed and cached"
            );
            Ok(Arc::new(prototype))
        });

        match result {
            Ok(proto) => Ok(Arc::clone(proto)),
            Err(err) => {
                // Leave no empty cell behind so a later call can retry
                self.entries
                    .remove_if(type_name, |_, cell| cell.get().is_none());
                Err(err)
            }
        }
    }

    /// Number of in-memory entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn load_from_disk(&self, type_name: &str) -> Result<Option<ServicePrototype>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = Self::json_path(dir, type_name);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(ServicePrototype::from_json(&json)?))
    }

    fn write_to_disk(&self, type_name: &str, prototype: &ServicePrototype) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        std::fs::write(Self::json_path(dir, type_name), prototype.to_json()?)?;
        Ok(())
    }

    fn json_path(dir: &Path, type_name: &str) -> PathBuf {
        dir.join(format!("{}.json", Self::file_stem(type_name)))
    }

    fn fp_path(dir: &Path, type_name: &str) -> PathBuf {
        dir.join(format!("{}.fp", Self::file_stem(type_name)))
    }

    // Sanitized name plus a hash suffix so distinct type names never
    // collide on disk.
    fn file_stem(type_name: &str) -> String {
        let sanitized: String = type_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        type_name.hash(&mut hasher);
        format!("{}-{:016x}", sanitized, hasher.finish())
    }
}

impl Default for PrototypeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PrototypeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrototypeCache")
            .field("entries", &self.entries.len())
            .field("persistent", &self.dir.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn proto(name: &str) -> ServicePrototype {
        ServicePrototype {
            class: name.to_string(),
            constructor: None,
            injected_properties: vec![],
            injected_methods: vec![],
            is_instantiable: true,
        }
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = PrototypeCache::new();
        assert!(cache.get("app.X").is_none());

        cache.put("app.X", proto("app.X")).unwrap();
        assert_eq!(cache.get("app.X").unwrap().class, "app.X");

        cache.invalidate("app.X");
        assert!(cache.get("app.X").is_none());
    }

    #[test]
    fn test_get_or_analyze_runs_once() {
        let cache = PrototypeCache::new();
        let runs = AtomicU32::new(0);

        for _ in 0..3 {
            let p = cache
                .get_or_analyze("app.X", || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(proto("app.X"))
                })
                .unwrap();
            assert_eq!(p.class, "app.X");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_analysis_can_retry() {
        let cache = PrototypeCache::new();
        let err = cache
            .get_or_analyze("app.X", || Err(DiError::analysis("app.X", "boom")))
            .unwrap_err();
        assert!(matches!(err, DiError::Analysis { .. }));

        // Retry succeeds once the model is fixed
        let p = cache.get_or_analyze("app.X", || Ok(proto("app.X"))).unwrap();
        assert_eq!(p.class, "app.X");
    }

    #[test]
    fn test_concurrent_analysis_is_single_flight() {
        let cache = Arc::new(PrototypeCache::new());
        let runs = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    cache
                        .get_or_analyze("app.Shared", move || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(proto("app.Shared"))
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().class, "app.Shared");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrototypeCache::with_dir(dir.path()).unwrap();
        cache.put("app.Disk", proto("app.Disk")).unwrap();

        // A fresh cache over the same dir sees the persisted entry
        let reopened = PrototypeCache::with_dir(dir.path()).unwrap();
        assert_eq!(reopened.get("app.Disk").unwrap().class, "app.Disk");
    }

    #[test]
    fn test_fingerprint_freshness() {
        let cache = PrototypeCache::new();
        assert!(!cache.is_fresh("app.X", b"v1"));

        cache.record_fingerprint("app.X", b"v1").unwrap();
        assert!(cache.is_fresh("app.X", b"v1"));
        assert!(!cache.is_fresh("app.X", b"v2"));
    }

    #[test]
    fn test_fingerprint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrototypeCache::with_dir(dir.path()).unwrap();
        cache.record_fingerprint("app.X", b"sha256:abc").unwrap();

        let reopened = PrototypeCache::with_dir(dir.path()).unwrap();
        assert!(reopened.is_fresh("app.X", b"sha256:abc"));
        assert!(!reopened.is_fresh("app.X", b"sha256:def"));
    }

    #[test]
    fn test_distinct_names_get_distinct_files() {
        assert_ne!(
            PrototypeCache::file_stem("a.b"),
            PrototypeCache::file_stem("a_b")
        );
    }
}
