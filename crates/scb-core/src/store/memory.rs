use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    errors::Error,
    store::{ordered_tail, DocumentStore, Keyed, Record},
    Result,
};

/// Process-local `DocumentStore`.
///
/// Used when no database URL is configured (local runs) and by the tests.
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Record>>>,
    push_counter: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Error::Store` until switched back.
    #[cfg(test)]
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Store("memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn next_push_key(&self) -> String {
        let n = self.push_counter.fetch_add(1, Ordering::SeqCst);
        format!("-M{n:019}")
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_record(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        self.check_available()?;
        let cols = self.collections.lock().await;
        Ok(cols.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn put_record(&self, collection: &str, key: &str, record: Record) -> Result<()> {
        self.check_available()?;
        let mut cols = self.collections.lock().await;
        cols.entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), record);
        Ok(())
    }

    async fn patch_record(&self, collection: &str, key: &str, fields: Record) -> Result<()> {
        self.check_available()?;
        let mut cols = self.collections.lock().await;
        let existing = cols
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        for (k, v) in fields {
            existing.insert(k, v);
        }
        Ok(())
    }

    async fn push_record(&self, collection: &str, record: Record) -> Result<String> {
        self.check_available()?;
        let key = self.next_push_key();
        let mut cols = self.collections.lock().await;
        cols.entry(collection.to_string())
            .or_default()
            .insert(key.clone(), record);
        Ok(key)
    }

    async fn delete_record(&self, collection: &str, key: &str) -> Result<()> {
        self.check_available()?;
        let mut cols = self.collections.lock().await;
        if let Some(c) = cols.get_mut(collection) {
            c.remove(key);
        }
        Ok(())
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        equals: &Value,
    ) -> Result<Vec<Keyed>> {
        self.check_available()?;
        let cols = self.collections.lock().await;
        let Some(c) = cols.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(c.iter()
            .filter(|(_, r)| r.get(field) == Some(equals))
            .map(|(k, r)| Keyed {
                key: k.clone(),
                record: r.clone(),
            })
            .collect())
    }

    async fn query_ordered_range(
        &self,
        collection: &str,
        order_field: &str,
        limit_from_end: usize,
        before: Option<&Value>,
    ) -> Result<Vec<Keyed>> {
        self.check_available()?;
        let rows = {
            let cols = self.collections.lock().await;
            cols.get(collection)
                .map(|c| {
                    c.iter()
                        .map(|(k, r)| Keyed {
                            key: k.clone(),
                            record: r.clone(),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        Ok(ordered_tail(rows, order_field, limit_from_end, before))
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let cols = self.collections.lock().await;
        Ok(cols
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!("test records are objects"),
        }
    }

    #[tokio::test]
    async fn patch_merges_without_dropping_fields() {
        let store = MemoryStore::new();
        store
            .put_record("users", "1", rec(json!({"first_name": "Ada", "level": "300"})))
            .await
            .unwrap();
        store
            .patch_record("users", "1", rec(json!({"level": "400"})))
            .await
            .unwrap();

        let got = store.get_record("users", "1").await.unwrap().unwrap();
        assert_eq!(got.get("first_name"), Some(&json!("Ada")));
        assert_eq!(got.get("level"), Some(&json!("400")));
    }

    #[tokio::test]
    async fn push_keys_sort_in_insertion_order() {
        let store = MemoryStore::new();
        let a = store.push_record("announcements", rec(json!({"n": 1}))).await.unwrap();
        let b = store.push_record("announcements", rec(json!({"n": 2}))).await.unwrap();
        assert!(a < b);
        assert_eq!(store.list_keys("announcements").await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn query_by_field_matches_exact_value() {
        let store = MemoryStore::new();
        store
            .put_record("users", "1", rec(json!({"matric_number": "CU/1"})))
            .await
            .unwrap();
        store
            .put_record("users", "2", rec(json!({"matric_number": "CU/2"})))
            .await
            .unwrap();

        let hits = store
            .query_by_field("users", "matric_number", &json!("CU/2"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "2");
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_record("users", "1").await,
            Err(Error::Store(_))
        ));
    }
}
