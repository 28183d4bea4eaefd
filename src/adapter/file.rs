//! Filesystem-backed storage
//!
//! Entries are JSON envelopes fanned out over 256 hex-named shard
//! directories (`<dir>/<2-hex-prefix>/<sha1(name)>.json`). Every tag owns an
//! isolated shard tree under `<dir>/_tags_/<tag>/`, created lazily on first
//! use. The 256-way fan-out is part of the on-disk format and is not
//! configurable.

use super::{ExpiryCheck, GcRange, StorageAdapter};
use crate::core::envelope::Envelope;
use crate::core::error::{CacheError, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

const SHARD_COUNT: usize = 256;
const TAGS_DIR: &str = "_tags_";

const IO_ATTEMPTS: usize = 3;
const IO_RETRY_DELAY: Duration = Duration::from_millis(20);

/// File adapter options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAdapterConfig {
    /// Root directory of the cache tree
    pub dir: PathBuf,
}

/// Filesystem storage backend
pub struct FileAdapter {
    dir: PathBuf,

    /// Tags whose shard directories are already on disk
    known_tags: Mutex<HashSet<String>>,

    /// Reentrancy guard: overlapping gc calls are silent no-ops
    gc_running: AtomicBool,

    /// Files seen per tag over the slices of the current gc cycle
    tag_seen: Mutex<HashMap<String, u64>>,
}

impl FileAdapter {
    /// Create the adapter, pre-creating the root shard tree so the adapter
    /// is usable as soon as the constructor returns.
    pub fn new(config: FileAdapterConfig) -> Result<Self> {
        init_shards_sync(&config.dir)?;
        std::fs::create_dir_all(config.dir.join(TAGS_DIR)).map_err(io_fault)?;
        debug!("file adapter ready at {:?}", config.dir);

        Ok(Self {
            dir: config.dir,
            known_tags: Mutex::new(HashSet::new()),
            gc_running: AtomicBool::new(false),
            tag_seen: Mutex::new(HashMap::new()),
        })
    }

    fn hash_name(name: &str) -> String {
        hex::encode(Sha1::digest(name.as_bytes()))
    }

    /// Resolve the namespace directory for `tag`, creating the tag's shard
    /// tree the first time the tag is used.
    async fn namespace_dir(&self, tag: Option<&str>) -> Result<PathBuf> {
        let Some(tag) = tag else {
            return Ok(self.dir.clone());
        };
        // An empty tag would resolve to `_tags_/` itself and turn the tag
        // index into a shard tree.
        if tag.is_empty() {
            return Err(CacheError::InvalidTag(String::new()));
        }
        let dir = self.dir.join(TAGS_DIR).join(tag);
        if !self.known_tags.lock().contains(tag) {
            init_shards_async(&dir).await?;
            self.known_tags.lock().insert(tag.to_string());
        }
        Ok(dir)
    }

    /// Full garbage-collection pass, all errors swallowed.
    async fn gc_pass(&self, is_expired: ExpiryCheck<'_>, range: Option<GcRange>) {
        let shards = shard_slice(range);
        sweep_namespace(&self.dir, is_expired, shards.clone()).await;

        let Ok(tags) = self.list_tags().await else {
            return;
        };
        let closes_cycle = range.is_none_or(|r| r.is_final());
        for tag in tags {
            let dir = self.dir.join(TAGS_DIR).join(&tag);
            let seen = sweep_namespace(&dir, is_expired, shards.clone()).await;

            let cycle_total = {
                let mut counts = self.tag_seen.lock();
                let slot = counts.entry(tag.clone()).or_insert(0);
                *slot += seen;
                if closes_cycle {
                    counts.remove(&tag)
                } else {
                    None
                }
            };

            // A tag tree observed empty over a whole cycle is dropped; the
            // next write to the tag recreates it.
            if cycle_total == Some(0) {
                debug!("removing empty tag tree: {}", tag);
                let _ = tokio::fs::remove_dir_all(&dir).await;
                self.known_tags.lock().remove(&tag);
            }
        }
    }

    /// Tag namespaces currently present on disk.
    async fn list_tags(&self) -> std::io::Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir.join(TAGS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                if let Ok(name) = entry.file_name().into_string() {
                    tags.push(name);
                }
            }
        }
        Ok(tags)
    }
}

#[async_trait]
impl StorageAdapter for FileAdapter {
    async fn get(&self, name: &str, tag: Option<&str>) -> Result<Option<Envelope>> {
        let dir = self.namespace_dir(tag).await?;
        let path = entry_path(&dir, name);
        let text = match with_retries(|| tokio::fs::read_to_string(&path)).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_fault(e)),
        };
        let envelope = serde_json::from_str(&text)
            .map_err(|e| CacheError::Serialization(format!("corrupt entry {path:?}: {e}")))?;
        Ok(Some(envelope))
    }

    async fn set(&self, name: &str, envelope: &Envelope, tag: Option<&str>) -> Result<()> {
        let dir = self.namespace_dir(tag).await?;
        let path = entry_path(&dir, name);
        let text = serde_json::to_string(envelope)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        with_retries(|| tokio::fs::write(&path, &text))
            .await
            .map_err(io_fault)
    }

    async fn clear(&self, name: &str, tag: Option<&str>) -> Result<()> {
        let dir = self.namespace_dir(tag).await?;
        let path = entry_path(&dir, name);
        match with_retries(|| tokio::fs::remove_file(&path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_fault(e)),
        }
    }

    async fn clear_tag(&self, tag: &str) -> Result<()> {
        let dir = self.namespace_dir(Some(tag)).await?;
        let sweeps = (0..SHARD_COUNT).map(|i| {
            let shard = dir.join(format!("{i:02x}"));
            async move { clear_shard(&shard).await }
        });

        // Clear as much as possible before reporting; the last error wins.
        let mut last_err = None;
        for res in join_all(sweeps).await {
            if let Err(e) = res {
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn gc(&self, is_expired: ExpiryCheck<'_>, range: Option<GcRange>) -> Result<()> {
        if self.gc_running.swap(true, Ordering::SeqCst) {
            debug!("gc already in progress, skipping");
            return Ok(());
        }
        // Reset on drop: the sweep's future can be cancelled at any await
        // point, and a flag stuck at true would disable gc forever.
        let _reset = GcFlagReset(&self.gc_running);
        self.gc_pass(is_expired, range).await;
        Ok(())
    }
}

struct GcFlagReset<'a>(&'a AtomicBool);

impl Drop for GcFlagReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn io_fault(e: std::io::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

fn entry_path(namespace: &Path, name: &str) -> PathBuf {
    let key = FileAdapter::hash_name(name);
    namespace.join(&key[..2]).join(format!("{key}.json"))
}

fn shard_name(index: usize) -> String {
    format!("{index:02x}")
}

fn init_shards_sync(dir: &Path) -> Result<()> {
    for i in 0..SHARD_COUNT {
        std::fs::create_dir_all(dir.join(shard_name(i))).map_err(io_fault)?;
    }
    Ok(())
}

async fn init_shards_async(dir: &Path) -> Result<()> {
    for i in 0..SHARD_COUNT {
        tokio::fs::create_dir_all(dir.join(shard_name(i)))
            .await
            .map_err(io_fault)?;
    }
    Ok(())
}

/// Shard indices covered by one gc run.
fn shard_slice(range: Option<GcRange>) -> Range<usize> {
    match range {
        None => 0..SHARD_COUNT,
        Some(r) => {
            let parts = r.parts.max(1);
            let index = r.index.min(parts - 1);
            (index * SHARD_COUNT / parts)..((index + 1) * SHARD_COUNT / parts)
        }
    }
}

/// Retry transient I/O failures with a short delay. `NotFound` is never
/// transient and is returned to the caller right away; the final attempt's
/// error propagates unwrapped.
async fn with_retries<T, F, Fut>(op: F) -> std::io::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(e),
            Err(e) => {
                if attempt >= IO_ATTEMPTS {
                    return Err(e);
                }
                attempt += 1;
                tokio::time::sleep(IO_RETRY_DELAY).await;
            }
        }
    }
}

/// Delete every file in one shard directory, remembering the last error so
/// a single bad entry does not stop the sweep.
async fn clear_shard(shard: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(shard).await.map_err(io_fault)?;
    let mut last_err = None;
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if !is_file {
                    continue;
                }
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    last_err = Some(io_fault(e));
                }
            }
            Ok(None) => break,
            Err(e) => {
                last_err = Some(io_fault(e));
                break;
            }
        }
    }
    match last_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Sweep a slice of one namespace's shards in parallel, unlinking entries
/// the predicate rejects. Returns the number of regular files seen, which
/// includes files deleted by this very sweep.
async fn sweep_namespace(dir: &Path, is_expired: ExpiryCheck<'_>, shards: Range<usize>) -> u64 {
    let sweeps = shards.map(|i| {
        let shard = dir.join(shard_name(i));
        async move { sweep_shard(&shard, is_expired).await }
    });
    join_all(sweeps).await.into_iter().sum()
}

async fn sweep_shard(shard: &Path, is_expired: ExpiryCheck<'_>) -> u64 {
    let Ok(mut entries) = tokio::fs::read_dir(shard).await else {
        return 0;
    };
    let mut seen = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        seen += 1;

        // One corrupt or vanished entry must never abort the sweep.
        let path = entry.path();
        let Ok(text) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
            continue;
        };
        if is_expired(&envelope) {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
    seen
}
