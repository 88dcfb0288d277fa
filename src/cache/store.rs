//! File-backed cache store with lazy TTL eviction and rename-on-commit writes

use super::key::CacheKey;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Suffix of in-progress writes
const TEMP_SUFFIX: &str = "tmp";

/// A cached response body
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Key the entry is stored under
    pub key: CacheKey,
    /// Stored body bytes
    pub body: Vec<u8>,
    /// Hex MD5 of `body`
    pub digest: String,
    /// Last write time of the entry
    pub stored_at: DateTime<Utc>,
    /// TTL the entry was read with
    pub ttl: Duration,
}

impl CacheEntry {
    /// Instant after which the entry is stale
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True while `now <= stored_at + ttl`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at()
    }
}

/// In-progress cache write
///
/// Bytes go to a temporary file. [`commit`](CacheWriter::commit) moves it over
/// the entry; [`abort`](CacheWriter::abort), or dropping the writer without
/// committing, deletes the temporary file and leaves any previous entry alone.
pub trait CacheWriter: Write + Send {
    /// Publish the written bytes as the entry
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard the written bytes
    fn abort(self: Box<Self>);

    /// Bytes written so far
    fn bytes_written(&self) -> u64;
}

/// Storage backend for cached bodies
pub trait CacheStore: Send + Sync {
    /// Read an entry that is still fresh under `ttl`
    ///
    /// Returns `Ok(None)` on a miss. A stale entry is deleted as a side effect.
    fn read(&self, key: &CacheKey, ttl: Duration) -> Result<Option<CacheEntry>>;

    /// Start writing a new body for `key`
    fn open_writer(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>>;

    /// Delete the entry for `key`. Returns true if one existed.
    fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Delete every entry and leftover temporary file. Returns the number removed.
    fn clear(&self) -> Result<usize>;

    /// Delete entries and temporary files last written more than `max_age` ago
    fn purge(&self, max_age: Duration) -> Result<usize>;
}

/// Flat directory of `<sha256>.<extension>` files
#[derive(Debug)]
pub struct FileCacheStore {
    dir: PathBuf,
    extension: String,
    temp_counter: AtomicU64,
}

impl FileCacheStore {
    /// Open (and create if needed) a cache directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty or dotted extension, or
    /// [`Error::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        if extension.is_empty() || extension.contains(['.', '/', '\\']) {
            return Err(Error::config(
                "cache.extension",
                format!("invalid cache extension {:?}", extension),
            ));
        }

        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            extension: extension.to_string(),
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Open the store described by a [`CacheConfig`]
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(&config.dir, &config.extension)
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `key`
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name(&self.extension))
    }

    fn temp_path_for(&self, key: &CacheKey) -> PathBuf {
        let stamp = Utc::now().timestamp_millis();
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}-{}.{}",
            key.file_name(&self.extension),
            stamp,
            n,
            TEMP_SUFFIX
        ))
    }

    /// Entry files and temporary files owned by this store
    fn owned_files(&self) -> Result<Vec<(PathBuf, fs::Metadata)>> {
        let entry_suffix = format!(".{}", self.extension);
        let temp_marker = format!(".{}.", self.extension);
        let temp_suffix = format!(".{}", TEMP_SUFFIX);

        let mut files = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            let metadata = dir_entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_entry = name.ends_with(&entry_suffix);
            let is_temp = name.ends_with(&temp_suffix) && name.contains(&temp_marker);
            if is_entry || is_temp {
                files.push((dir_entry.path(), metadata));
            }
        }
        Ok(files)
    }
}

impl CacheStore for FileCacheStore {
    fn read(&self, key: &CacheKey, ttl: Duration) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(key = %key, "Cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > ttl {
            tracing::debug!(
                key = %key,
                age_ms = age.as_millis() as u64,
                ttl_ms = ttl.as_millis() as u64,
                "Evicting stale cache entry"
            );
            remove_if_exists(&path)?;
            return Ok(None);
        }

        let body = match fs::read(&path) {
            Ok(body) => body,
            // Evicted or replaced between stat and read
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let digest = format!("{:x}", md5::compute(&body));

        tracing::debug!(key = %key, bytes = body.len(), "Cache hit");
        Ok(Some(CacheEntry {
            key: key.clone(),
            body,
            digest,
            stored_at: DateTime::<Utc>::from(modified),
            ttl,
        }))
    }

    fn open_writer(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>> {
        let temp_path = self.temp_path_for(key);
        let file = File::create(&temp_path)?;
        Ok(Box::new(FileCacheWriter {
            file: Some(BufWriter::new(file)),
            temp_path,
            final_path: self.path_for(key),
            written: 0,
        }))
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(remove_if_exists(&self.path_for(key))?)
    }

    fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for (path, _) in self.owned_files()? {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        tracing::info!(dir = %self.dir.display(), removed = removed, "Cache cleared");
        Ok(removed)
    }

    fn purge(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for (path, metadata) in self.owned_files()? {
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age > max_age && remove_if_exists(&path)? {
                removed += 1;
            }
        }
        tracing::info!(
            dir = %self.dir.display(),
            removed = removed,
            max_age_secs = max_age.as_secs(),
            "Cache purged"
        );
        Ok(removed)
    }
}

/// Delete a file, treating "already gone" as success
fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

struct FileCacheWriter {
    /// `None` once committed or aborted
    file: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
}

impl FileCacheWriter {
    fn discard(&mut self) {
        self.file.take();
        if let Err(e) = remove_if_exists(&self.temp_path) {
            tracing::warn!(
                path = %self.temp_path.display(),
                error = %e,
                "Failed to remove temporary cache file"
            );
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        let Some(mut file) = self.file.take() else {
            return Err(io::Error::other("cache writer already finished"));
        };
        file.flush()?;
        let file = file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        if fs::rename(&self.temp_path, &self.final_path).is_err() {
            // Platforms that refuse to rename over an existing file
            remove_if_exists(&self.final_path)?;
            fs::rename(&self.temp_path, &self.final_path)?;
        }
        Ok(())
    }
}

impl Write for FileCacheWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("cache writer already finished"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl CacheWriter for FileCacheWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        match self.finish() {
            Ok(()) => {
                tracing::debug!(
                    path = %self.final_path.display(),
                    bytes = self.written,
                    "Cache entry committed"
                );
                Ok(())
            }
            Err(e) => {
                self.discard();
                Err(e.into())
            }
        }
    }

    fn abort(mut self: Box<Self>) {
        tracing::debug!(path = %self.final_path.display(), "Cache write aborted");
        self.discard();
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Drop for FileCacheWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            self.discard();
        }
    }
}
