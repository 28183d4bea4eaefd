use super::cache::CacheInner;
use super::error::{CacheError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

/// Deferred value producer for [`Call::Remember`].
pub type Supplier = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Value> + Send>> + Send>;

/// Unified call surface: one entry point whose operation is picked by the
/// shape of the value argument, the way a dynamic caller would — no value
/// reads, a null clears, a callable computes-and-remembers, anything else
/// stores.
pub enum Call {
    Get,
    Clear,
    Set(Value, Option<u64>),
    Remember(Supplier, Option<u64>),
}

/// A cache handle with an optional bound tag.
///
/// Untagged views address tags through `"tag:name"` keys (the first colon
/// splits, an empty left side does not count); views bound to a tag take
/// every key literally. `clear_tag` and `tag` are only meaningful on one
/// side of that split, and error on the other.
#[derive(Clone)]
pub struct TagView {
    inner: Arc<CacheInner>,
    tag: Option<String>,
}

impl TagView {
    pub(crate) fn new(inner: Arc<CacheInner>, tag: Option<String>) -> Self {
        Self { inner, tag }
    }

    /// Bound tag, if any.
    pub fn bound_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Split `"tag:name"` keys on untagged views; bound views never split.
    fn resolve<'a>(&'a self, key: &'a str) -> (Option<&'a str>, &'a str) {
        if self.tag.is_some() {
            return (self.tag.as_deref(), key);
        }
        match key.find(':') {
            Some(i) if i > 0 => (Some(&key[..i]), &key[i + 1..]),
            _ => (None, key),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (tag, name) = self.resolve(key);
        let value = self.inner.do_get(name, tag).await?;
        serde_json::from_value(value).ok()
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<()> {
        let (tag, name) = self.resolve(key);
        let value =
            serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.inner.do_set(name, value, ttl, tag).await
    }

    pub async fn remember<T, F, Fut>(&self, key: &str, supplier: F, ttl: Option<u64>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (tag, name) = self.resolve(key);
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

    pub async fn clear(&self, key: &str) {
        let (tag, name) = self.resolve(key);
        self.inner.do_clear(name, tag).await;
    }

    /// Drop every entry under the bound tag. Errors on untagged views,
    /// which have no tag to clear.
    pub async fn clear_tag(&self) -> Result<()> {
        match &self.tag {
            Some(tag) => self.inner.do_clear_tag(tag).await,
            None => Err(CacheError::InvalidTag(
                "view has no bound tag to clear".to_string(),
            )),
        }
    }

    /// Child view bound to `tag`, memoized on the owning cache so every
    /// call site gets the identical view. Only untagged views can branch.
    pub fn tag(&self, tag: &str) -> Result<TagView> {
        if self.tag.is_some() {
            return Err(CacheError::InvalidTag(
                "view is already bound to a tag".to_string(),
            ));
        }
        if tag.is_empty() {
            return Err(CacheError::InvalidTag(String::new()));
        }
        let mut views = self.inner.views.lock();
        let view = views
            .entry(tag.to_string())
            .or_insert_with(|| TagView::new(self.inner.clone(), Some(tag.to_string())));
        Ok(view.clone())
    }

    /// Dispatch one unified call against `key`. `Set` and `Remember` return
    /// the stored/computed value, `Get` the hit (if any), `Clear` nothing.
    pub async fn call(&self, key: &str, op: Call) -> Result<Option<Value>> {
        let (tag, name) = self.resolve(key);
        match op {
            Call::Get => Ok(self.inner.do_get(name, tag).await),
            Call::Clear => {
                self.inner.do_clear(name, tag).await;
                Ok(None)
            }
            Call::Set(value, ttl) => {
                self.inner.do_set(name, value.clone(), ttl, tag).await?;
                Ok(Some(value))
            }
            Call::Remember(supplier, ttl) => {
                let value = self
                    .inner
                    .do_remember(name, || async { Ok(supplier().await) }, ttl, tag)
                    .await?;
                Ok(Some(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::config::CacheConfig;
    use crate::core::cache::Cache;
    use serde_json::json;

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryAdapter::new()), CacheConfig::default(), 1).unwrap()
    }

    #[tokio::test]
    async fn test_colon_key_addresses_tag_namespace() {
        let cache = cache();
        let root = cache.root();

        root.set("tagA:x", &1, Some(0)).await.unwrap();
        assert_eq!(cache.tag("tagA").unwrap().get::<i32>("x").await, Some(1));
        assert_eq!(root.get::<i32>("tagA:x").await, Some(1));
        assert_eq!(root.get::<i32>("x").await, None);

        root.clear("tagA:x").await;
        assert_eq!(cache.tag("tagA").unwrap().get::<i32>("x").await, None);
    }

    #[tokio::test]
    async fn test_leading_colon_is_not_a_tag_prefix() {
        let cache = cache();
        let root = cache.root();

        root.set(":weird", &1, Some(0)).await.unwrap();
        // The whole string, colon included, is a root-namespace key.
        assert_eq!(root.get::<i32>(":weird").await, Some(1));
        assert_eq!(cache.get::<i32>(":weird", None).await, Some(1));
    }

    #[tokio::test]
    async fn test_only_first_colon_splits() {
        let cache = cache();
        let root = cache.root();

        root.set("a:b:c", &1, Some(0)).await.unwrap();
        assert_eq!(cache.tag("a").unwrap().get::<i32>("b:c").await, Some(1));
    }

    #[tokio::test]
    async fn test_bound_view_takes_keys_literally() {
        let cache = cache();
        let view = cache.tag("A").unwrap();

        view.set("x:y", &1, Some(0)).await.unwrap();
        assert_eq!(view.get::<i32>("x:y").await, Some(1));
        // No second-level split happened.
        assert_eq!(cache.get::<i32>("y", Some("x")).await, None);
    }

    #[tokio::test]
    async fn test_tag_views_isolate_and_clear() {
        let cache = cache();
        let a = cache.tag("A").unwrap();
        let b = cache.tag("B").unwrap();

        a.set("x", &1, Some(0)).await.unwrap();
        b.set("x", &2, Some(0)).await.unwrap();
        assert_eq!(a.get::<i32>("x").await, Some(1));
        assert_eq!(b.get::<i32>("x").await, Some(2));

        a.clear_tag().await.unwrap();
        assert_eq!(a.get::<i32>("x").await, None);
        assert_eq!(b.get::<i32>("x").await, Some(2));
    }

    #[tokio::test]
    async fn test_tag_only_on_untagged_views() {
        let cache = cache();
        let bound = cache.tag("A").unwrap();
        assert!(matches!(bound.tag("B"), Err(CacheError::InvalidTag(_))));
        assert!(matches!(
            cache.root().tag(""),
            Err(CacheError::InvalidTag(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_tag_needs_bound_tag() {
        let cache = cache();
        assert!(matches!(
            cache.root().clear_tag().await,
            Err(CacheError::InvalidTag(_))
        ));
    }

    #[tokio::test]
    async fn test_child_views_are_memoized() {
        let cache = cache();
        let first = cache.tag("A").unwrap();
        for _ in 0..3 {
            let again = cache.tag("A").unwrap();
            assert_eq!(again.bound_tag(), Some("A"));
        }

        // Repeated lookups reuse the stored view; only distinct tag names
        // grow the memo.
        assert_eq!(first.inner.views.lock().len(), 1);
        cache.tag("B").unwrap();
        assert_eq!(first.inner.views.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_call_dispatch() {
        let cache = cache();
        let root = cache.root();

        assert_eq!(root.call("a", Call::Get).await.unwrap(), None);

        let stored = root
            .call("a", Call::Set(json!({"n": 1}), Some(0)))
            .await
            .unwrap();
        assert_eq!(stored, Some(json!({"n": 1})));
        assert_eq!(
            root.call("a", Call::Get).await.unwrap(),
            Some(json!({"n": 1}))
        );

        root.call("a", Call::Clear).await.unwrap();
        assert_eq!(root.call("a", Call::Get).await.unwrap(), None);

        let supplier: Supplier = Box::new(|| Box::pin(async { json!("computed") }));
        let computed = root
            .call("a", Call::Remember(supplier, Some(0)))
            .await
            .unwrap();
        assert_eq!(computed, Some(json!("computed")));

        // Second remember hits the cache, the supplier must not run.
        let supplier: Supplier = Box::new(|| Box::pin(async { panic!("supplier reran") }));
        let cached = root
            .call("a", Call::Remember(supplier, Some(0)))
            .await
            .unwrap();
        assert_eq!(cached, Some(json!("computed")));
    }

    #[tokio::test]
    async fn test_call_colon_addressing_matches_tag_view() {
        let cache = cache();
        let root = cache.root();

        root.call("tagA:x", Call::Set(json!(1), Some(0)))
            .await
            .unwrap();
        let via_view = cache.tag("tagA").unwrap();
        assert_eq!(via_view.get::<i32>("x").await, Some(1));

        via_view.set("y", &2, Some(0)).await.unwrap();
        assert_eq!(root.call("tagA:y", Call::Get).await.unwrap(), Some(json!(2)));
    }
}
