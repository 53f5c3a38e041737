//! On-disk document cache shared between processes.
//!
//! Every process polling the same API reads and writes the same files, so
//! they share one view of when each document next needs fetching. Each entry
//! is a small JSON file holding the raw document and its expiry; it is
//! re-parsed when loaded.
//!
//! Layout mirrors the document URL:
//!
//! ```text
//! <cache dir>/http/aurorawatch-api.lancs.ac.uk/0.2/status/current-status.xml.json
//! ```
//!
//! Writes go to a uniquely named temp file which is then renamed over the
//! entry, so readers never observe a partially written document. Two
//! processes can still both decide to fetch before either has written; the
//! cache reduces duplicate requests but does not eliminate them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Disk cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A cached document as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEntry {
    /// URL the document was fetched from.
    pub url: String,

    pub fetched_at: DateTime<Utc>,

    /// The entry is stale from this instant on.
    pub expires_at: DateTime<Utc>,

    /// Raw document text.
    pub body: String,
}

impl DiskEntry {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Distinguishes temp files written concurrently within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-per-document cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    directory: PathBuf,
}

impl DiskCache {
    /// Create a cache rooted at `directory`. Nothing is created until the
    /// first store.
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File holding the entry for `url`.
    pub fn entry_path(&self, url: &str) -> PathBuf {
        let mut path = self.directory.clone();
        match Url::parse(url) {
            Ok(parsed) => {
                path.push(sanitize(parsed.scheme()));
                let host = parsed
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .unwrap_or("localhost");
                match parsed.port() {
                    Some(port) => path.push(format!("{}_{}", sanitize(host), port)),
                    None => path.push(sanitize(host)),
                }
                for segment in parsed
                    .path_segments()
                    .into_iter()
                    .flatten()
                    .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                {
                    path.push(sanitize(segment));
                }
            }
            Err(_) => path.push(sanitize(url)),
        }

        let mut file = path.into_os_string();
        file.push(".json");
        PathBuf::from(file)
    }

    /// Load the entry for `url`.
    ///
    /// A missing entry is `Ok(None)`. An unreadable or foreign entry is
    /// removed and also reported as `Ok(None)`.
    pub async fn load(&self, url: &str) -> Result<Option<DiskEntry>, CacheError> {
        let path = self.entry_path(url);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };

        match serde_json::from_slice::<DiskEntry>(&bytes) {
            Ok(entry) if entry.url == url => {
                debug!(path = %path.display(), expires_at = %entry.expires_at, "Loaded disk cache entry");
                Ok(Some(entry))
            }
            Ok(entry) => {
                warn!(path = %path.display(), found = %entry.url, "Disk cache entry is for another URL");
                self.remove(&path).await?;
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalidating corrupt disk cache entry");
                self.remove(&path).await?;
                Ok(None)
            }
        }
    }

    /// Store `entry`, replacing any previous entry for the same URL.
    pub async fn store(&self, entry: &DiskEntry) -> Result<(), CacheError> {
        let path = self.entry_path(&entry.url);
        if let Some(parent) = path.parent() {
            self.ensure_directory(parent).await?;
        }

        let encoded = serde_json::to_vec(entry)?;
        let temp_path = path.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&temp_path, &encoded).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CacheError::Io(e));
        }

        debug!(path = %path.display(), bytes = encoded.len(), "Stored disk cache entry");
        Ok(())
    }

    /// Remove the entry for `url`. Returns whether one existed.
    pub async fn invalidate(&self, url: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(url);
        warn!(url, path = %path.display(), "Invalidating disk cache entry");
        self.remove(&path).await
    }

    async fn remove(&self, path: &Path) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Create `dir` and, if the cache root is new, restrict it to the owner.
    async fn ensure_directory(&self, dir: &Path) -> Result<(), CacheError> {
        let root_is_new = !tokio::fs::try_exists(&self.directory).await?;
        tokio::fs::create_dir_all(dir).await?;

        #[cfg(unix)]
        if root_is_new {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.directory, std::fs::Permissions::from_mode(0o700))
                .await?;
        }
        #[cfg(not(unix))]
        let _ = root_is_new;

        Ok(())
    }
}

/// Make a URL component safe to use as a single path component.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    const STATUS_URL: &str = "http://aurorawatch-api.lancs.ac.uk/0.2/status/current-status.xml";

    fn create_temp_cache() -> (DiskCache, TempDir) {
        let temp = TempDir::new().unwrap();
        let cache = DiskCache::new(temp.path().join("cache"));
        (cache, temp)
    }

    fn entry(url: &str) -> DiskEntry {
        let fetched_at = Utc::now();
        DiskEntry {
            url: url.to_string(),
            fetched_at,
            expires_at: fetched_at + TimeDelta::seconds(60),
            body: "<current_status/>".to_string(),
        }
    }

    #[test]
    fn test_entry_path_layout() {
        let cache = DiskCache::new(PathBuf::from("/cache"));

        assert_eq!(
            cache.entry_path(STATUS_URL),
            PathBuf::from(
                "/cache/http/aurorawatch-api.lancs.ac.uk/0.2/status/current-status.xml.json"
            )
        );
        assert_eq!(
            cache.entry_path("https://localhost:8443/api/status-descriptions.xml"),
            PathBuf::from("/cache/https/localhost_8443/api/status-descriptions.xml.json")
        );
        // Traversal segments never escape the cache directory.
        assert!(
            cache
                .entry_path("http://example.com/../../etc/passwd")
                .starts_with("/cache/http/example.com")
        );
    }

    #[tokio::test]
    async fn test_load_missing() {
        let (cache, _temp) = create_temp_cache();
        assert!(cache.load(STATUS_URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let (cache, _temp) = create_temp_cache();
        let stored = entry(STATUS_URL);

        cache.store(&stored).await.unwrap();
        let loaded = cache.load(STATUS_URL).await.unwrap();

        assert_eq!(loaded, Some(stored));
    }

    #[tokio::test]
    async fn test_store_replaces_and_leaves_no_temp_files() {
        let (cache, _temp) = create_temp_cache();
        let first = entry(STATUS_URL);
        let second = DiskEntry {
            body: "<current_status>second</current_status>".to_string(),
            ..first.clone()
        };

        cache.store(&first).await.unwrap();
        cache.store(&second).await.unwrap();

        assert_eq!(cache.load(STATUS_URL).await.unwrap(), Some(second));

        let dir = cache.entry_path(STATUS_URL).parent().unwrap().to_path_buf();
        let names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["current-status.xml.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_invalidated() {
        let (cache, _temp) = create_temp_cache();
        cache.store(&entry(STATUS_URL)).await.unwrap();

        let path = cache.entry_path(STATUS_URL);
        std::fs::write(&path, b"{ truncated").unwrap();

        assert!(cache.load(STATUS_URL).await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_shared_between_instances() {
        let (writer, temp) = create_temp_cache();
        let reader = DiskCache::new(temp.path().join("cache"));

        writer.store(&entry(STATUS_URL)).await.unwrap();

        assert!(reader.load(STATUS_URL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (cache, _temp) = create_temp_cache();
        cache.store(&entry(STATUS_URL)).await.unwrap();

        assert!(cache.invalidate(STATUS_URL).await.unwrap());
        assert!(!cache.invalidate(STATUS_URL).await.unwrap());
        assert!(cache.load(STATUS_URL).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_root_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let (cache, _temp) = create_temp_cache();
        cache.store(&entry(STATUS_URL)).await.unwrap();

        let mode = std::fs::metadata(cache.directory()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_disk_entry_staleness() {
        let e = entry(STATUS_URL);
        assert!(!e.is_stale(e.fetched_at));
        assert!(e.is_stale(e.expires_at));
    }
}
