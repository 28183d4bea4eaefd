use super::envelope::Envelope;
use super::error::{CacheError, Result};
use super::order::KeyOrder;
use super::tag_view::TagView;
use crate::adapter::StorageAdapter;
use crate::config::CacheConfig;
use crate::scheduler;
use cron::Schedule;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const PREVIEW_LEN: usize = 64;

/// The cache core: stamps expiry/version envelopes onto values, serializes
/// access per key, and forwards physical storage to a pluggable backend.
///
/// Cloning is cheap and clones share all state, including the scheduled gc
/// job; there is exactly one job per underlying instance.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

pub(crate) struct CacheInner {
    pub(crate) adapter: Arc<dyn StorageAdapter>,
    pub(crate) config: CacheConfig,

    /// Global invalidation counter stamped into every write. Entries whose
    /// stored version differs read as absent, without physical deletion.
    pub(crate) version: AtomicU64,

    order: KeyOrder,

    /// Memoized child views, one per tag name (see [`TagView::tag`]).
    pub(crate) views: Mutex<HashMap<String, TagView>>,

    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Create a cache over `adapter`, registering the background gc job
    /// when the config carries a cron schedule.
    pub fn new(
        adapter: Arc<dyn StorageAdapter>,
        config: CacheConfig,
        version: u64,
    ) -> Result<Self> {
        if config.gc_complete_times == 0 {
            return Err(CacheError::Config(
                "gc_complete_times must be at least 1".to_string(),
            ));
        }
        let schedule = match &config.gc_schedule {
            Some(expr) => Some(
                Schedule::from_str(expr)
                    .map_err(|e| CacheError::Config(format!("bad gc schedule {expr:?}: {e}")))?,
            ),
            None => None,
        };

        info!(
            "initializing cache (version={}, gc_schedule={:?}, gc_complete_times={})",
            version, config.gc_schedule, config.gc_complete_times
        );

        let inner = Arc::new(CacheInner {
            adapter,
            config,
            version: AtomicU64::new(version),
            order: KeyOrder::default(),
            views: Mutex::new(HashMap::new()),
            gc_task: Mutex::new(None),
        });
        if let Some(schedule) = schedule {
            let handle = scheduler::spawn_gc_job(inner.clone(), schedule);
            *inner.gc_task.lock() = Some(handle);
        }
        Ok(Self { inner })
    }

    /// Fetch a value. Misses, stale entries, storage faults, and values that
    /// no longer deserialize as `T` all read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, name: &str, tag: Option<&str>) -> Option<T> {
        let value = self.inner.do_get(name, tag).await?;
        serde_json::from_value(value).ok()
    }

    /// Store a value with `ttl` seconds to live (`None` = configured
    /// default, 0 = never expires). Unlike reads, a failed write is an
    /// error the caller must see.
    pub async fn set<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        ttl: Option<u64>,
        tag: Option<&str>,
    ) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.inner.do_set(name, value, ttl, tag).await
    }

    /// Return the cached value if fresh, otherwise run `supplier`, cache its
    /// result, and return it. Within one cache instance the supplier runs at
    /// most once per logical cache state, even under concurrent calls.
    ///
    /// The computed value is returned even when writing it back fails; the
    /// storage fault is reported through the log instead of the return
    /// value, so callers get a correct response at the cost of durability.
    pub async fn remember<T, F, Fut>(
        &self,
        name: &str,
        supplier: F,
        ttl: Option<u64>,
        tag: Option<&str>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let value = self
            .inner
            .do_remember(
                name,
                || async {
                    let value = supplier().await;
                    serde_json::to_value(value)
                        .map_err(|e| CacheError::Serialization(e.to_string()))
                },
                ttl,
                tag,
            )
            .await?;
        serde_json::from_value(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Drop one entry. Missing entries and storage faults are no-ops.
    pub async fn clear(&self, name: &str, tag: Option<&str>) {
        self.inner.do_clear(name, tag).await;
    }

    /// Drop every entry under `tag`. Backend errors propagate so the caller
    /// knows when the bulk delete was incomplete.
    pub async fn clear_tag(&self, tag: &str) -> Result<()> {
        self.inner.do_clear_tag(tag).await
    }

    /// View of the root namespace with colon-prefixed tag addressing.
    pub fn root(&self) -> TagView {
        TagView::new(self.inner.clone(), None)
    }

    /// Memoized view bound to `tag`.
    pub fn tag(&self, tag: &str) -> Result<TagView> {
        self.root().tag(tag)
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Bump the invalidation counter. Everything written under an older
    /// version reads as absent from now on; the scheduled gc picks the new
    /// version up on its next run.
    pub fn set_version(&self, version: u64) {
        self.inner.version.store(version, Ordering::SeqCst);
    }

    /// Cancel the scheduled gc job and drop memoized views.
    pub fn close(&self) {
        if let Some(handle) = self.inner.gc_task.lock().take() {
            handle.abort();
        }
        self.inner.views.lock().clear();
    }
}

impl CacheInner {
    pub(crate) fn is_stale(&self, envelope: &Envelope) -> bool {
        envelope.version != self.version.load(Ordering::SeqCst) || envelope.is_expired()
    }

    pub(crate) async fn do_get(&self, name: &str, tag: Option<&str>) -> Option<Value> {
        if validate_tag(tag).is_err() {
            return None;
        }
        self.order
            .run(tag, name, async {
                let envelope = match self.adapter.get(name, tag).await {
                    Ok(envelope) => envelope?,
                    Err(e) => {
                        debug!("read fault for key {:?}, treating as miss: {}", name, e);
                        return None;
                    }
                };
                if self.is_stale(&envelope) {
                    return None;
                }
                Some(envelope.value)
            })
            .await
    }

    pub(crate) async fn do_set(
        &self,
        name: &str,
        value: Value,
        ttl: Option<u64>,
        tag: Option<&str>,
    ) -> Result<()> {
        validate_tag(tag)?;
        self.order
            .run(tag, name, async { self.write(name, value, ttl, tag).await })
            .await
    }

    pub(crate) async fn do_remember<F, Fut>(
        &self,
        name: &str,
        supplier: F,
        ttl: Option<u64>,
        tag: Option<&str>,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        validate_tag(tag)?;
        self.order
            .run(tag, name, async {
                match self.adapter.get(name, tag).await {
                    Ok(Some(envelope)) if !self.is_stale(&envelope) => {
                        return Ok(envelope.value);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("read fault for key {:?}, recomputing: {}", name, e);
                    }
                }

                let value = supplier().await?;
                if let Err(e) = self.write(name, value.clone(), ttl, tag).await {
                    error!("cache write-back failed: {}", e);
                }
                Ok(value)
            })
            .await
    }

    pub(crate) async fn do_clear(&self, name: &str, tag: Option<&str>) {
        if validate_tag(tag).is_err() {
            return;
        }
        self.order
            .run(tag, name, async {
                if let Err(e) = self.adapter.clear(name, tag).await {
                    debug!("clear fault for key {:?}, ignoring: {}", name, e);
                }
            })
            .await
    }

    pub(crate) async fn do_clear_tag(&self, tag: &str) -> Result<()> {
        validate_tag(Some(tag))?;
        self.adapter.clear_tag(tag).await
    }

    async fn write(
        &self,
        name: &str,
        value: Value,
        ttl: Option<u64>,
        tag: Option<&str>,
    ) -> Result<()> {
        let ttl = ttl.unwrap_or(self.config.default_ttl_secs);
        let envelope = Envelope::new(value, ttl, self.version.load(Ordering::SeqCst));
        self.adapter
            .set(name, &envelope, tag)
            .await
            .map_err(|e| CacheError::WriteFailed {
                key: name.to_string(),
                preview: preview(&envelope.value),
                reason: e.to_string(),
            })
    }
}

fn validate_tag(tag: Option<&str>) -> Result<()> {
    match tag {
        Some("") => Err(CacheError::InvalidTag(String::new())),
        _ => Ok(()),
    }
}

/// Short value description for write-failure errors.
fn preview(value: &Value) -> String {
    let text = value.to_string();
    if text.len() <= PREVIEW_LEN {
        text
    } else {
        let cut = (0..=PREVIEW_LEN).rev().find(|i| text.is_char_boundary(*i));
        format!("{}...", &text[..cut.unwrap_or(0)])
    }
}
