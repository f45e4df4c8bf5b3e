//! Two-tier request cache: in-memory LRU over a disk tier.
//!
//! Entries are keyed by the SHA-256 of the URL. The cold tier stores one
//! JSON file per key under `{dir}/{first2}/{key}.json` with a header
//! recording creation time and TTL; writes are atomic (temp + rename).
//! Cold hits are promoted back into the hot tier. Unreadable cold files
//! are deleted and treated as misses.

use pagemill_config::Config;
use pagemill_types::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cold-tier entry format version.
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ColdEntry {
    version: u32,
    created_at: u64,
    ttl_secs: u64,
    body: String,
}

impl ColdEntry {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.created_at.saturating_add(self.ttl_secs)
    }
}

#[derive(Debug)]
struct HotEntry {
    body: String,
    created_at: u64,
    ttl_secs: u64,
    last_access: u64,
}

#[derive(Debug, Default)]
struct HotTier {
    entries: HashMap<String, HotEntry>,
    tick: u64,
}

impl HotTier {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_to(&mut self, max_items: usize) {
        while self.entries.len() > max_items {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// URL-keyed response cache with hot (memory) and cold (disk) tiers.
#[derive(Debug)]
pub struct RequestCache {
    dir: PathBuf,
    memory_max_items: usize,
    disk_max_bytes: u64,
    ttl: Duration,
    hot: Mutex<HotTier>,
}

impl RequestCache {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_settings(
            config.cache_dir.clone(),
            config.cache_memory_max_items,
            config.cache_disk_max_bytes,
            Duration::from_secs(config.cache_ttl),
        )
    }

    pub fn with_settings(
        dir: PathBuf,
        memory_max_items: usize,
        disk_max_bytes: u64,
        ttl: Duration,
    ) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            Error::new(
                ErrorKind::CacheIo,
                format!("failed to create cache directory: {e}"),
            )
            .with_context("path", dir.display().to_string())
            .with_source(e)
        })?;
        Ok(Self {
            dir,
            memory_max_items,
            disk_max_bytes,
            ttl,
            hot: Mutex::new(HotTier::default()),
        })
    }

    fn hot(&self) -> MutexGuard<'_, HotTier> {
        self.hot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a cached body. Expired entries are deleted on read; cold
    /// hits are promoted into the hot tier. Read failures count as misses.
    pub fn get(&self, url: &str) -> Option<String> {
        let key = cache_key(url);
        let now = unix_now();

        {
            let mut hot = self.hot();
            let tick = hot.touch();
            if let Some(entry) = hot.entries.get_mut(&key) {
                if now < entry.created_at.saturating_add(entry.ttl_secs) {
                    entry.last_access = tick;
                    return Some(entry.body.clone());
                }
                hot.entries.remove(&key);
                let _ = fs::remove_file(self.entry_path(&key));
                return None;
            }
        }

        let path = self.entry_path(&key);
        let content = fs::read_to_string(&path).ok()?;
        let entry: ColdEntry = match serde_json::from_str(&content) {
            Ok(e) => e,
            Err(_) => {
                // Corrupt entry: delete and miss.
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if entry.version != CACHE_VERSION || entry.is_expired(now) {
            let _ = fs::remove_file(&path);
            return None;
        }

        let body = entry.body.clone();
        let mut hot = self.hot();
        let tick = hot.touch();
        hot.entries.insert(
            key,
            HotEntry {
                body: entry.body,
                created_at: entry.created_at,
                ttl_secs: entry.ttl_secs,
                last_access: tick,
            },
        );
        hot.evict_to(self.memory_max_items);
        Some(body)
    }

    /// Store a body in both tiers, enforcing the configured limits.
    pub fn set(&self, url: &str, body: &str) -> Result<()> {
        let key = cache_key(url);
        let now = unix_now();
        let ttl_secs = self.ttl.as_secs();

        {
            let mut hot = self.hot();
            let tick = hot.touch();
            hot.entries.insert(
                key.clone(),
                HotEntry {
                    body: body.to_string(),
                    created_at: now,
                    ttl_secs,
                    last_access: tick,
                },
            );
            hot.evict_to(self.memory_max_items);
        }

        let entry = ColdEntry {
            version: CACHE_VERSION,
            created_at: now,
            ttl_secs,
            body: body.to_string(),
        };
        let serialized = serde_json::to_string(&entry).map_err(|e| {
            Error::new(ErrorKind::CacheIo, format!("cache entry serialization failed: {e}"))
                .with_source(e)
        })?;

        if serialized.len() as u64 > self.disk_max_bytes {
            tracing::warn!(url, size = serialized.len(), "entry exceeds cold tier budget, kept in memory only");
            return Ok(());
        }

        self.evict_cold(serialized.len() as u64)?;

        let path = self.entry_path(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| cache_io("create cache subdirectory", &path, e))?;
        }
        let temp = path.with_extension("tmp");
        fs::write(&temp, &serialized).map_err(|e| cache_io("write cache entry", &temp, e))?;
        fs::rename(&temp, &path).map_err(|e| cache_io("commit cache entry", &path, e))?;
        Ok(())
    }

    /// Remove entries older than `max_age` (all entries when `None`).
    /// Returns the number of distinct entries removed.
    pub fn clear(&self, max_age: Option<Duration>) -> usize {
        let now = unix_now();
        let cutoff = max_age.map(|age| now.saturating_sub(age.as_secs()));
        let mut removed: HashSet<String> = HashSet::new();

        {
            let mut hot = self.hot();
            let stale: Vec<String> = hot
                .entries
                .iter()
                .filter(|(_, e)| cutoff.is_none_or(|c| e.created_at <= c))
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                hot.entries.remove(&key);
                removed.insert(key);
            }
        }

        for (path, _, _) in self.cold_files() {
            let drop_entry = match cutoff {
                None => true,
                Some(cutoff) => fs::read_to_string(&path)
                    .ok()
                    .and_then(|c| serde_json::from_str::<ColdEntry>(&c).ok())
                    .is_none_or(|e| e.created_at <= cutoff),
            };
            if drop_entry && fs::remove_file(&path).is_ok() {
                if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                    removed.insert(key.to_string());
                }
            }
        }

        removed.len()
    }

    /// Number of entries in the hot tier.
    pub fn hot_items(&self) -> usize {
        self.hot().entries.len()
    }

    /// Total bytes held by the cold tier.
    pub fn cold_bytes(&self) -> u64 {
        self.cold_files().iter().map(|(_, _, len)| len).sum()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Evict oldest-mtime cold files until `incoming` bytes fit.
    fn evict_cold(&self, incoming: u64) -> Result<()> {
        let mut files = self.cold_files();
        let mut total: u64 = files.iter().map(|(_, _, len)| len).sum();
        if total + incoming <= self.disk_max_bytes {
            return Ok(());
        }
        files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (path, _, len) in files {
            if total + incoming <= self.disk_max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(len);
            }
        }
        Ok(())
    }

    fn cold_files(&self) -> Vec<(PathBuf, SystemTime, u64)> {
        let mut out = Vec::new();
        let Ok(subdirs) = fs::read_dir(&self.dir) else {
            return out;
        };
        for subdir in subdirs.flatten() {
            let subdir_path = subdir.path();
            if !subdir_path.is_dir() {
                continue;
            }
            let Ok(files) = fs::read_dir(&subdir_path) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().is_some_and(|e| e == "json")
                    && let Ok(meta) = file.metadata()
                {
                    let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
                    out.push((path, mtime, meta.len()));
                }
            }
        }
        out
    }

    /// Layout: `{cache_dir}/{first2}/{keyhex}.json`
    fn entry_path(&self, key: &str) -> PathBuf {
        let prefix = if key.len() >= 2 { &key[..2] } else { "00" };
        self.dir.join(prefix).join(format!("{key}.json"))
    }
}

fn cache_io(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::new(ErrorKind::CacheIo, format!("failed to {action}: {e}"))
        .with_context("path", path.display().to_string())
        .with_source(e)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// SHA-256 hex of the URL.
fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
