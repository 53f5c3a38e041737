//! Refresh engine: the expiry state machine behind every accessor.
//!
//! For each resource kind the engine keeps one in-memory [`CacheEntry`]
//! guarded by its own async mutex. A read proceeds:
//!
//! 1. Fresh in-memory entry: returned, no I/O.
//! 2. Fresh disk cache entry (written by this or another process): adopted
//!    into memory and returned, no network I/O.
//! 3. Otherwise the document is fetched, parsed, written to disk and memory.
//! 4. A failed fetch or parse is returned as an error. Stale data is never
//!    served in its place.
//!
//! The mutex is held for the whole sequence, so each kind has at most one
//! fetch in flight per engine and concurrent readers wait for its result.
//!
//! Status and activity expire independently. The descriptions table takes
//! no part in expiry: it is fetched once and kept until explicitly
//! refreshed.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::{ClientConfig, MAX_CACHE_SECS, MIN_DEFAULT_TTL_SECS};
use crate::error::{Error, Result};
use crate::model::{Activity, Descriptions, ResourceKind, Status};
use crate::parser;
use crate::storage::{DiskCache, DiskEntry};
use crate::transport::{FetchedDocument, Transport};

/// A document kind that takes part in the expiry state machine.
pub trait Document: Send + Sync + Sized + 'static {
    const KIND: ResourceKind;

    fn parse(body: &[u8], lang: &str, expires: DateTime<Utc>) -> Result<Self>;
}

impl Document for Status {
    const KIND: ResourceKind = ResourceKind::Status;

    fn parse(body: &[u8], lang: &str, expires: DateTime<Utc>) -> Result<Self> {
        parser::parse_status(body, lang, expires)
    }
}

impl Document for Activity {
    const KIND: ResourceKind = ResourceKind::Activity;

    fn parse(body: &[u8], lang: &str, expires: DateTime<Utc>) -> Result<Self> {
        parser::parse_activity(body, lang, expires)
    }
}

/// A parsed document and its validity window.
///
/// `expires_at` is never earlier than `fetched_at`.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub document: Arc<T>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Stale from `expires_at` onwards.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

type Slot<T> = Mutex<Option<CacheEntry<T>>>;

/// Per-client refresh engine.
pub struct RefreshEngine {
    base_url: String,
    lang: String,
    default_ttl: TimeDelta,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    disk: Option<DiskCache>,
    status: Slot<Status>,
    activity: Slot<Activity>,
    descriptions: Mutex<Option<Arc<Descriptions>>>,
}

impl RefreshEngine {
    /// Create an engine.
    ///
    /// Fails with [`Error::Config`] if the disk cache is enabled and its
    /// location override is invalid.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut config = config.clone();
        config.normalize();

        let disk = if config.use_disk_cache {
            let directory = config.resolve_cache_dir()?;
            debug!(directory = %directory.display(), "Using disk cache");
            Some(DiskCache::new(directory))
        } else {
            None
        };

        Ok(Self {
            base_url: config.base_url,
            lang: config.lang,
            default_ttl: config.default_ttl.clamp(
                TimeDelta::seconds(MIN_DEFAULT_TTL_SECS),
                TimeDelta::seconds(MAX_CACHE_SECS),
            ),
            transport,
            clock,
            disk,
            status: Mutex::new(None),
            activity: Mutex::new(None),
            descriptions: Mutex::new(None),
        })
    }

    /// Start with a fixed descriptions table instead of fetching one.
    pub fn with_descriptions(self, descriptions: Descriptions) -> Self {
        Self {
            descriptions: Mutex::new(Some(Arc::new(descriptions))),
            ..self
        }
    }

    /// URL of a document.
    pub fn url(&self, kind: ResourceKind) -> String {
        format!("{}{}", self.base_url, kind.path())
    }

    pub fn disk_cache(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    /// Current status, fetching if the cached copy has expired.
    pub async fn status(&self) -> Result<Arc<Status>> {
        self.get(&self.status).await
    }

    /// Current activity, fetching if the cached copy has expired.
    pub async fn activity(&self) -> Result<Arc<Activity>> {
        self.get(&self.activity).await
    }

    /// Expiry of the in-memory copy of `kind`, if there is one.
    ///
    /// Descriptions never expire and always report `None`.
    pub async fn cached_expiry(&self, kind: ResourceKind) -> Option<DateTime<Utc>> {
        match kind {
            ResourceKind::Status => self.status.lock().await.as_ref().map(|e| e.expires_at),
            ResourceKind::Activity => self.activity.lock().await.as_ref().map(|e| e.expires_at),
            ResourceKind::Descriptions => None,
        }
    }

    /// Forget the cached copy of `kind`, in memory and on disk.
    pub async fn invalidate(&self, kind: ResourceKind) {
        match kind {
            ResourceKind::Status => *self.status.lock().await = None,
            ResourceKind::Activity => *self.activity.lock().await = None,
            ResourceKind::Descriptions => return self.invalidate_descriptions().await,
        }

        if let Some(disk) = &self.disk {
            let url = self.url(kind);
            if let Err(e) = disk.invalidate(&url).await {
                warn!(url, error = %e, "Could not remove disk cache entry");
            }
        }
    }

    /// The descriptions table, fetched on first use and then kept.
    #[instrument(skip(self))]
    pub async fn descriptions(&self) -> Result<Arc<Descriptions>> {
        let mut cached = self.descriptions.lock().await;
        if let Some(descriptions) = cached.as_ref() {
            return Ok(Arc::clone(descriptions));
        }

        let url = self.url(ResourceKind::Descriptions);
        let fetched = self.fetch_document(&url).await?;
        let descriptions = Arc::new(parser::parse_descriptions(&fetched.body, &self.lang)?);
        info!("Cached descriptions table");

        *cached = Some(Arc::clone(&descriptions));
        Ok(descriptions)
    }

    /// Drop the cached descriptions so the next read fetches them again.
    pub async fn invalidate_descriptions(&self) {
        *self.descriptions.lock().await = None;
    }

    /// Fetch the descriptions table now, replacing the cached copy only on
    /// success.
    pub async fn refresh_descriptions(&self) -> Result<Arc<Descriptions>> {
        let mut cached = self.descriptions.lock().await;
        let url = self.url(ResourceKind::Descriptions);
        let fetched = self.fetch_document(&url).await?;
        let descriptions = Arc::new(parser::parse_descriptions(&fetched.body, &self.lang)?);

        *cached = Some(Arc::clone(&descriptions));
        Ok(descriptions)
    }

    #[instrument(skip(self, slot), fields(kind = %T::KIND))]
    async fn get<T: Document>(&self, slot: &Slot<T>) -> Result<Arc<T>> {
        let mut cached = slot.lock().await;
        let now = self.clock.now();

        if let Some(entry) = cached.as_ref() {
            if !entry.is_stale(now) {
                debug!(expires_at = %entry.expires_at, "Serving from memory");
                return Ok(Arc::clone(&entry.document));
            }
        }

        let url = self.url(T::KIND);

        if let Some(entry) = self.load_from_disk::<T>(&url, now).await {
            debug!(expires_at = %entry.expires_at, "Adopted disk cache entry");
            let document = Arc::clone(&entry.document);
            *cached = Some(entry);
            return Ok(document);
        }

        let entry = self.fetch::<T>(&url).await?;
        let document = Arc::clone(&entry.document);
        *cached = Some(entry);
        Ok(document)
    }

    async fn load_from_disk<T: Document>(
        &self,
        url: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<T>> {
        let disk = self.disk.as_ref()?;

        let entry = match disk.load(url).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(url, error = %e, "Could not read disk cache");
                return None;
            }
        };

        if entry.is_stale(now) {
            debug!(expires_at = %entry.expires_at, "Disk cache entry is stale");
            return None;
        }

        match T::parse(entry.body.as_bytes(), &self.lang, entry.expires_at) {
            Ok(document) => Some(CacheEntry {
                document: Arc::new(document),
                fetched_at: entry.fetched_at,
                expires_at: entry.expires_at.max(entry.fetched_at),
            }),
            Err(e) => {
                warn!(url, error = %e, "Discarding unparsable disk cache entry");
                if let Err(e) = disk.invalidate(url).await {
                    warn!(url, error = %e, "Could not remove disk cache entry");
                }
                None
            }
        }
    }

    async fn fetch<T: Document>(&self, url: &str) -> Result<CacheEntry<T>> {
        let fetched = self.fetch_document(url).await?;
        let fetched_at = self.clock.now();
        let expires_at = self.expiry(fetched_at, fetched.expires_at);

        let document = T::parse(&fetched.body, &self.lang, expires_at).inspect_err(|e| {
            warn!(url, error = %e, "Fetched document did not parse");
        })?;

        if let Some(disk) = &self.disk {
            let entry = DiskEntry {
                url: url.to_string(),
                fetched_at,
                expires_at,
                body: String::from_utf8_lossy(&fetched.body).into_owned(),
            };
            if let Err(e) = disk.store(&entry).await {
                warn!(url, error = %e, "Could not write disk cache");
            }
        }

        info!(expires_at = %expires_at, "Refreshed {}", T::KIND);
        Ok(CacheEntry {
            document: Arc::new(document),
            fetched_at,
            expires_at,
        })
    }

    async fn fetch_document(&self, url: &str) -> Result<FetchedDocument> {
        let fetched = self.transport.fetch(url).await.inspect_err(|e| {
            warn!(url, error = %e, "Fetch failed");
        })?;

        if !fetched.is_success() {
            warn!(url, status = fetched.status, "Unexpected HTTP status");
            return Err(Error::retrieval(url, format!("HTTP status {}", fetched.status)));
        }
        Ok(fetched)
    }

    /// Expiry for a document fetched at `fetched_at`.
    ///
    /// A declared expiry already in the past (server clock skew) is clamped
    /// to `fetched_at`: the document is returned once and refetched on the
    /// next read.
    fn expiry(&self, fetched_at: DateTime<Utc>, declared: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match declared {
            Some(expires) if expires < fetched_at => {
                debug!(%expires, %fetched_at, "Declared expiry already passed");
                fetched_at
            }
            Some(expires) => expires,
            None => fetched_at
                .checked_add_signed(self.default_ttl)
                .unwrap_or(fetched_at),
        }
    }
}
