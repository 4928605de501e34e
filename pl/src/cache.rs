//! Compiled Artifact Cache
//!
//! Compiled template script is cached under the SHA-256 of the template's
//! absolute path. Storage is pluggable through [`CacheBackend`]; the
//! [`ArtifactCache`] on top decides whether a stored artifact is still fresh.
//!
//! # File layout
//!
//! ```text
//! <cache-path>/
//! ├── <key>.plate     # JSON header line, then the compiled source
//! └── <key>.lock      # advisory lock held while writing
//! ```

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Environment;
use crate::error::CacheError;

/// When an entry was stored and how long it lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub stored_at: DateTime<Utc>,
    /// Seconds; zero means the entry never expires
    pub ttl_secs: u64,
}

impl CacheMetadata {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.ttl_secs == 0 {
            return None;
        }
        let ttl = Duration::try_seconds(i64::try_from(self.ttl_secs).ok()?)?;
        self.stored_at.checked_add_signed(ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

/// Key-value storage for compiled artifacts
///
/// Expired entries read as absent.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>, CacheError>;
    fn put(&self, key: &str, data: &[u8], ttl_secs: u64) -> Result<(), CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
}

/// One file per entry in a cache directory
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

const ENTRY_EXT: &str = "plate";
const LOCK_EXT: &str = "lock";

impl FileCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXT))
    }

    /// Reads header and body; `None` when missing or expired
    fn read(&self, key: &str) -> Result<Option<(CacheMetadata, Vec<u8>)>, CacheError> {
        let bytes = match fs::read(self.entry_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let split = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
        let meta: CacheMetadata = serde_json::from_slice(&bytes[..split])?;
        if meta.is_expired(Utc::now()) {
            debug!(%key, "FileCache::read: expired");
            return Ok(None);
        }

        let body = bytes.get(split + 1..).unwrap_or_default().to_vec();
        Ok(Some((meta, body)))
    }
}

impl CacheBackend for FileCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.read(key)?.map(|(_, body)| body))
    }

    fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>, CacheError> {
        Ok(self.read(key)?.map(|(meta, _)| meta))
    }

    fn put(&self, key: &str, data: &[u8], ttl_secs: u64) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;

        let lock_path = self.dir.join(format!("{}.{}", key, LOCK_EXT));
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        FileExt::lock_exclusive(&lock).map_err(|source| CacheError::Lock {
            key: key.to_string(),
            source,
        })?;

        let meta = CacheMetadata {
            stored_at: Utc::now(),
            ttl_secs,
        };
        let tmp_path = self.dir.join(format!(".{}.{}.tmp", key, Uuid::now_v7()));
        let mut tmp = fs::File::create(&tmp_path)?;
        serde_json::to_writer(&mut tmp, &meta)?;
        tmp.write_all(b"\n")?;
        tmp.write_all(data)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, self.entry_path(key))?;

        debug!(%key, len = data.len(), ttl_secs, "FileCache::put: stored");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        for path in [
            self.entry_path(key),
            self.dir.join(format!("{}.{}", key, LOCK_EXT)),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        if !self.dir.exists() {
            return Ok(());
        }

        let mut removed = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let ours = path
                .extension()
                .is_some_and(|ext| ext == ENTRY_EXT || ext == LOCK_EXT || ext == "tmp");
            if ours && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        info!(dir = ?self.dir, removed, "FileCache::clear: done");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    meta: CacheMetadata,
    data: Vec<u8>,
}

/// In-process cache, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<MemoryEntry> {
        let entries = self.entries.read().ok()?;
        entries.get(key).filter(|e| !e.meta.is_expired(Utc::now())).cloned()
    }

    fn poisoned() -> CacheError {
        CacheError::Io(std::io::Error::other("memory cache lock poisoned"))
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.live(key).map(|e| e.data))
    }

    fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>, CacheError> {
        Ok(self.live(key).map(|e| e.meta))
    }

    fn put(&self, key: &str, data: &[u8], ttl_secs: u64) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                meta: CacheMetadata {
                    stored_at: Utc::now(),
                    ttl_secs,
                },
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().map_err(|_| Self::poisoned())?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().map_err(|_| Self::poisoned())?.clear();
        Ok(())
    }
}

/// A cached compilation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub key: String,
    pub source: String,
    pub meta: CacheMetadata,
}

/// Freshness policy over a [`CacheBackend`]
///
/// Backend failures never fail a render: they are logged and treated as a
/// miss, and the template is compiled again.
#[derive(Clone)]
pub struct ArtifactCache {
    backend: Arc<dyn CacheBackend>,
    environment: Environment,
    ttl_secs: u64,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("environment", &self.environment)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    pub fn new(backend: Arc<dyn CacheBackend>, environment: Environment, ttl_secs: u64) -> Self {
        Self {
            backend,
            environment,
            ttl_secs,
        }
    }

    /// Hex SHA-256 of the template's absolute path
    pub fn key_for(path: &Path) -> String {
        format!("{:x}", Sha256::digest(path.to_string_lossy().as_bytes()))
    }

    /// Returns the cached artifact when it may be used for a source last
    /// modified at `modified`
    pub fn lookup(&self, path: &Path, modified: DateTime<Utc>) -> Option<CompiledArtifact> {
        let key = Self::key_for(path);

        let meta = match self.backend.metadata(&key) {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                debug!(?path, "ArtifactCache::lookup: miss");
                return None;
            }
            Err(e) => {
                warn!(?path, error = %e, "ArtifactCache::lookup: backend failed, recompiling");
                return None;
            }
        };

        if !self.environment.trusts_cache() && meta.stored_at < modified {
            debug!(?path, stored_at = %meta.stored_at, %modified, "ArtifactCache::lookup: stale");
            return None;
        }

        let data = match self.backend.get(&key) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                warn!(?path, error = %e, "ArtifactCache::lookup: backend failed, recompiling");
                return None;
            }
        };

        match String::from_utf8(data) {
            Ok(source) => {
                debug!(?path, "ArtifactCache::lookup: hit");
                Some(CompiledArtifact { key, source, meta })
            }
            Err(_) => {
                warn!(?path, "ArtifactCache::lookup: entry is not UTF-8, recompiling");
                None
            }
        }
    }

    /// Stores compiled source; failures are logged
    pub fn store(&self, path: &Path, source: &str) {
        let key = Self::key_for(path);
        if let Err(e) = self.backend.put(&key, source.as_bytes(), self.ttl_secs) {
            warn!(?path, error = %e, "ArtifactCache::store: backend failed");
        }
    }

    /// Removes the artifact for one template
    pub fn purge(&self, path: &Path) -> Result<(), CacheError> {
        self.backend.delete(&Self::key_for(path))
    }

    /// Removes every artifact
    pub fn clear(&self) -> Result<(), CacheError> {
        self.backend.clear()
    }
}
