use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handoff_types::{Item, ItemDisposition};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum ItemStoreError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("item store unavailable: {0}")]
    Unavailable(String),
}

/// The item listing service, as far as the handoff needs it
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_item(&self, item_id: &str) -> Result<Item, ItemStoreError>;

    /// Mark the item claimed. Idempotent: a second call keeps the first
    /// timestamp.
    async fn set_claimed(&self, item_id: &str, at: DateTime<Utc>) -> Result<Item, ItemStoreError>;

    /// Undo `set_claimed`, returning the item to the open listing
    async fn reopen(&self, item_id: &str) -> Result<Item, ItemStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: RwLock<HashMap<String, Item>>,
    unavailable: AtomicBool,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, item: Item) {
        self.items.write().await.insert(item.id.clone(), item);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), ItemStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ItemStoreError::Unavailable(
                "in-memory item store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get_item(&self, item_id: &str) -> Result<Item, ItemStoreError> {
        self.ensure_available()?;
        self.items
            .read()
            .await
            .get(item_id)
            .cloned()
            .ok_or_else(|| ItemStoreError::NotFound(item_id.to_string()))
    }

    async fn set_claimed(&self, item_id: &str, at: DateTime<Utc>) -> Result<Item, ItemStoreError> {
        self.ensure_available()?;
        let mut items = self.items.write().await;
        let item = items
            .get_mut(item_id)
            .ok_or_else(|| ItemStoreError::NotFound(item_id.to_string()))?;

        if !item.is_claimed() {
            item.disposition = ItemDisposition::Claimed;
            item.claimed_at = Some(at);
        }
        Ok(item.clone())
    }

    async fn reopen(&self, item_id: &str) -> Result<Item, ItemStoreError> {
        self.ensure_available()?;
        let mut items = self.items.write().await;
        let item = items
            .get_mut(item_id)
            .ok_or_else(|| ItemStoreError::NotFound(item_id.to_string()))?;

        item.disposition = ItemDisposition::Open;
        item.claimed_at = None;
        Ok(item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_set_claimed_is_idempotent() {
        let store = InMemoryItemStore::new();
        store.put(Item::open("item-1", "finder-1")).await;

        let first_at = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let first = store.set_claimed("item-1", first_at).await.unwrap();
        let second = store
            .set_claimed("item-1", first_at + Duration::minutes(3))
            .await
            .unwrap();

        assert!(second.is_claimed());
        assert_eq!(first.claimed_at, second.claimed_at);
    }

    #[tokio::test]
    async fn test_reopen_clears_claim() {
        let store = InMemoryItemStore::new();
        store.put(Item::open("item-1", "finder-1")).await;
        store.set_claimed("item-1", Utc::now()).await.unwrap();

        let item = store.reopen("item-1").await.unwrap();
        assert!(!item.is_claimed());
        assert_eq!(item.claimed_at, None);
    }

    #[tokio::test]
    async fn test_missing_item() {
        let store = InMemoryItemStore::new();
        let result = store.get_item("nope").await;
        assert!(matches!(result, Err(ItemStoreError::NotFound(_))));
    }
}
