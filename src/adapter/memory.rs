//! In-process storage
//!
//! Map-backed adapter for tests and single-process deployments. No partial
//! gc support; the range argument is ignored.

use super::{ExpiryCheck, GcRange, StorageAdapter};
use crate::core::envelope::Envelope;
use crate::core::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryAdapter {
    root: RwLock<HashMap<String, Envelope>>,
    tags: RwLock<HashMap<String, HashMap<String, Envelope>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn get(&self, name: &str, tag: Option<&str>) -> Result<Option<Envelope>> {
        match tag {
            None => Ok(self.root.read().get(name).cloned()),
            Some(tag) => Ok(self
                .tags
                .read()
                .get(tag)
                .and_then(|bucket| bucket.get(name))
                .cloned()),
        }
    }

    async fn set(&self, name: &str, envelope: &Envelope, tag: Option<&str>) -> Result<()> {
        match tag {
            None => {
                self.root.write().insert(name.to_string(), envelope.clone());
            }
            Some(tag) => {
                self.tags
                    .write()
                    .entry(tag.to_string())
                    .or_default()
                    .insert(name.to_string(), envelope.clone());
            }
        }
        Ok(())
    }

    async fn clear(&self, name: &str, tag: Option<&str>) -> Result<()> {
        match tag {
            None => {
                self.root.write().remove(name);
            }
            Some(tag) => {
                if let Some(bucket) = self.tags.write().get_mut(tag) {
                    bucket.remove(name);
                }
            }
        }
        Ok(())
    }

    async fn clear_tag(&self, tag: &str) -> Result<()> {
        self.tags.write().remove(tag);
        Ok(())
    }

    async fn gc(&self, is_expired: ExpiryCheck<'_>, _range: Option<GcRange>) -> Result<()> {
        self.root.write().retain(|_, env| !is_expired(env));

        let mut tags = self.tags.write();
        for bucket in tags.values_mut() {
            bucket.retain(|_, env| !is_expired(env));
        }
        tags.retain(|_, bucket| !bucket.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::now_ms;
    use serde_json::json;

    fn fresh(data: &str) -> Envelope {
        Envelope {
            value: json!(data),
            expires_at: 0,
            version: 1,
        }
    }

    fn expired(data: &str) -> Envelope {
        Envelope {
            value: json!(data),
            expires_at: now_ms() - 1000,
            version: 1,
        }
    }

    fn by_time(env: &Envelope) -> bool {
        env.is_expired()
    }

    #[tokio::test]
    async fn test_set_get_clear_per_namespace() {
        let cache = MemoryAdapter::new();

        cache.set("name", &fresh("no tag"), None).await.unwrap();
        cache.set("name", &fresh("tagA"), Some("tagA")).await.unwrap();

        assert_eq!(cache.get("name", None).await.unwrap(), Some(fresh("no tag")));
        assert_eq!(
            cache.get("name", Some("tagA")).await.unwrap(),
            Some(fresh("tagA"))
        );

        cache.clear("name", None).await.unwrap();
        assert_eq!(cache.get("name", None).await.unwrap(), None);
        assert!(cache.get("name", Some("tagA")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_tag_drops_whole_bucket() {
        let cache = MemoryAdapter::new();

        cache.set("a1", &fresh("a"), Some("tagA")).await.unwrap();
        cache.set("b1", &fresh("b"), Some("tagB")).await.unwrap();
        cache.set("b2", &fresh("c"), Some("tagB")).await.unwrap();

        cache.clear_tag("tagB").await.unwrap();

        assert!(cache.get("a1", Some("tagA")).await.unwrap().is_some());
        assert_eq!(cache.get("b1", Some("tagB")).await.unwrap(), None);
        assert_eq!(cache.get("b2", Some("tagB")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_gc_drops_expired_and_empty_buckets() {
        let cache = MemoryAdapter::new();

        cache.set("name", &fresh("no tag"), None).await.unwrap();
        cache.set("name", &fresh("tagA"), Some("tagA")).await.unwrap();
        cache.set("name", &expired("tagB"), Some("tagB")).await.unwrap();

        cache.gc(&by_time, None).await.unwrap();

        assert!(cache.get("name", None).await.unwrap().is_some());
        assert!(cache.get("name", Some("tagA")).await.unwrap().is_some());
        assert_eq!(cache.get("name", Some("tagB")).await.unwrap(), None);
        assert!(!cache.tags.read().contains_key("tagB"));
    }
}
