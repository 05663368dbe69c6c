//! Content-addressed figure cache
//!
//! Layout: `<root>/<hash>/` holds the artifact files and `entry.json`.
//! Entries are written into a private temporary directory and renamed into
//! place, so a reader never observes a half-written entry. Work on one hash
//! is serialized through a per-entry slot; the global lock only guards the
//! slot map.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::utils::error::{ManuscriptError, ManuscriptResult};

pub const ENTRY_FILE: &str = "entry.json";
const TMP_PREFIX: &str = ".tmp-";

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Metadata of one cached figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureArtifact {
    pub hash: String,
    /// Source path as written in the manuscript.
    pub source: String,
    /// Artifact file names inside the entry directory.
    pub files: Vec<String>,
    pub format: String,
    pub dpi: u32,
    pub generated_at: DateTime<Utc>,
}

impl FigureArtifact {
    pub fn primary_file(&self) -> Option<&str> {
        self.files.first().map(String::as_str)
    }
}

/// How a request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit(FigureArtifact),
    Generated(FigureArtifact),
    /// Another process wrote the same entry first; its entry is used.
    RaceHit(FigureArtifact),
}

impl CacheOutcome {
    pub fn artifact(&self) -> &FigureArtifact {
        match self {
            CacheOutcome::Hit(a) | CacheOutcome::Generated(a) | CacheOutcome::RaceHit(a) => a,
        }
    }
}

/// What a generator produced in its scratch directory.
pub struct Produced {
    pub files: Vec<String>,
    pub format: String,
    pub dpi: u32,
}

type Slot = Arc<Mutex<()>>;

pub struct FigureCache {
    root: PathBuf,
    slots: RwLock<FxHashMap<String, Slot>>,
}

impl std::fmt::Debug for FigureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FigureCache").field("root", &self.root).finish()
    }
}

impl FigureCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> ManuscriptResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        Ok(Self {
            root,
            slots: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    /// A complete, readable entry for `hash`.
    pub fn lookup(&self, hash: &str) -> Option<FigureArtifact> {
        let dir = self.entry_dir(hash);
        let text = fs::read_to_string(dir.join(ENTRY_FILE)).ok()?;
        let artifact: FigureArtifact = serde_json::from_str(&text).ok()?;
        let complete = artifact.hash == hash
            && !artifact.files.is_empty()
            && artifact.files.iter().all(|f| dir.join(f).is_file());
        complete.then_some(artifact)
    }

    /// Hashes of all complete entries.
    pub fn entries(&self) -> Vec<String> {
        let Ok(read) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut hashes: Vec<String> = read
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with(TMP_PREFIX))
            .filter(|name| self.lookup(name).is_some())
            .collect();
        hashes.sort();
        hashes
    }

    fn slot(&self, hash: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(hash) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(hash.to_string()).or_default())
    }

    /// Return the entry for `hash`, generating it if missing (or if `force`).
    ///
    /// `generate` receives an empty scratch directory and must leave its
    /// artifact files there.
    pub fn get_or_generate<F>(
        &self,
        hash: &str,
        source: &str,
        force: bool,
        generate: F,
    ) -> Result<CacheOutcome, String>
    where
        F: FnOnce(&Path) -> Result<Produced, String>,
    {
        let slot = self.slot(hash);
        let _guard = slot.lock();

        if !force {
            if let Some(artifact) = self.lookup(hash) {
                log::debug!("figure cache hit for {} ({})", source, hash);
                return Ok(CacheOutcome::Hit(artifact));
            }
        }

        let scratch = self.root.join(format!(
            "{}{}-{}-{}",
            TMP_PREFIX,
            hash,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&scratch).map_err(|e| format!("cannot create scratch dir: {}", e))?;

        let produced = match generate(&scratch) {
            Ok(produced) => produced,
            Err(reason) => {
                let _ = fs::remove_dir_all(&scratch);
                return Err(reason);
            }
        };
        let artifact = FigureArtifact {
            hash: hash.to_string(),
            source: source.to_string(),
            files: produced.files,
            format: produced.format,
            dpi: produced.dpi,
            generated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&artifact)
            .map_err(|e| format!("cannot serialize cache entry: {}", e))?;
        if let Err(e) = fs::write(scratch.join(ENTRY_FILE), json) {
            let _ = fs::remove_dir_all(&scratch);
            return Err(format!("cannot write cache entry: {}", e));
        }

        let target = self.entry_dir(hash);
        if force && target.exists() {
            let _ = fs::remove_dir_all(&target);
        }
        match fs::rename(&scratch, &target) {
            Ok(()) => {
                log::info!("cached figure {} as {}", source, hash);
                Ok(CacheOutcome::Generated(artifact))
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&scratch);
                // Another process renamed its entry into place first.
                match self.lookup(hash) {
                    Some(existing) => {
                        log::info!("figure cache write race on {}, using existing entry", hash);
                        Ok(CacheOutcome::RaceHit(existing))
                    }
                    None => Err(format!("cannot store cache entry: {}", e)),
                }
            }
        }
    }

    /// Remove every entry whose hash is not in `live`. Scratch directories
    /// of in-flight writers are left alone. Returns the number removed.
    pub fn prune(&self, live: &FxHashSet<String>) -> ManuscriptResult<usize> {
        let mut removed = 0usize;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(TMP_PREFIX) || live.contains(&name) || !entry.path().is_dir() {
                continue;
            }
            fs::remove_dir_all(entry.path()).map_err(|e| ManuscriptError::IoError {
                message: format!("cannot prune {}: {}", entry.path().display(), e),
            })?;
            removed += 1;
        }
        log::info!("pruned {} stale figure cache entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path) -> Result<Produced, String> {
        fs::write(dir.join("plot.png"), b"png").map_err(|e| e.to_string())?;
        Ok(Produced {
            files: vec!["plot.png".to_string()],
            format: "png".to_string(),
            dpi: 72,
        })
    }

    #[test]
    fn miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FigureCache::open(dir.path()).unwrap();
        let first = cache.get_or_generate("abc", "FIGURES/p.sh", false, write_png).unwrap();
        assert!(matches!(first, CacheOutcome::Generated(_)));
        let second = cache
            .get_or_generate("abc", "FIGURES/p.sh", false, |_| Err("must not run".to_string()))
            .unwrap();
        assert!(matches!(second, CacheOutcome::Hit(_)));
        assert!(cache.entry_dir("abc").join(ENTRY_FILE).is_file());
        assert_eq!(cache.entries(), vec!["abc".to_string()]);
    }

    #[test]
    fn failed_generation_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FigureCache::open(dir.path()).unwrap();
        let err = cache
            .get_or_generate("bad", "x", false, |_| Err("exit 1".to_string()))
            .unwrap_err();
        assert_eq!(err, "exit 1");
        assert_eq!(fs::read_dir(cache.root()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_requests_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FigureCache::open(dir.path()).unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    cache
                        .get_or_generate("same", "s", false, |d| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            write_png(d)
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rename_race_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FigureCache::open(dir.path()).unwrap();
        let outcome = cache
            .get_or_generate("raced", "s", false, |d| {
                // Simulate another process finishing first.
                let other = FigureCache::open(dir.path()).unwrap();
                other.get_or_generate("raced", "s", false, write_png).unwrap();
                write_png(d)
            })
            .unwrap();
        assert!(matches!(outcome, CacheOutcome::RaceHit(_)));
    }

    #[test]
    fn prune_keeps_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FigureCache::open(dir.path()).unwrap();
        cache.get_or_generate("keep", "a", false, write_png).unwrap();
        cache.get_or_generate("drop", "b", false, write_png).unwrap();
        let live: FxHashSet<String> = ["keep".to_string()].into_iter().collect();
        assert_eq!(cache.prune(&live).unwrap(), 1);
        assert_eq!(cache.entries(), vec!["keep".to_string()]);
    }
}
