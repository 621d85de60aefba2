//! Document store port.
//!
//! The bot keeps everything in a shared real-time document database (Firebase
//! Realtime Database in production). Records are JSON objects addressed by
//! `collection/key`.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::Result;

pub mod memory;

pub type Record = Map<String, Value>;

/// Collection names shared by every store implementation.
pub mod collections {
    pub const USERS: &str = "users";
    pub const ADMINS: &str = "admins";
    pub const ANNOUNCEMENTS: &str = "announcements";
    pub const EVENTS: &str = "events";
    pub const FAQS: &str = "faqs";
    pub const LOST_AND_FOUND: &str = "lost_and_found";
    pub const FILES: &str = "files";
    pub const SUGGESTIONS: &str = "suggestions";
    pub const CONTACTS: &str = "contacts";
}

/// A record together with its key.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyed {
    pub key: String,
    pub record: Record,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_record(&self, collection: &str, key: &str) -> Result<Option<Record>>;

    /// Replace the record at `collection/key`.
    async fn put_record(&self, collection: &str, key: &str, record: Record) -> Result<()>;

    /// Merge `fields` into the record at `collection/key`, leaving other fields untouched.
    async fn patch_record(&self, collection: &str, key: &str, fields: Record) -> Result<()>;

    /// Append a record under a generated, chronologically sortable key.
    async fn push_record(&self, collection: &str, record: Record) -> Result<String>;

    async fn delete_record(&self, collection: &str, key: &str) -> Result<()>;

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        equals: &Value,
    ) -> Result<Vec<Keyed>>;

    /// The last `limit_from_end` records ordered by `order_field`, ascending.
    ///
    /// With `before`, only records whose `order_field` is strictly less than
    /// `before` are considered. Records without `order_field` never match.
    async fn query_ordered_range(
        &self,
        collection: &str,
        order_field: &str,
        limit_from_end: usize,
        before: Option<&Value>,
    ) -> Result<Vec<Keyed>>;

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>>;
}

/// Ordering used by `query_ordered_range`: numbers before strings, numbers
/// numerically, strings lexicographically. Other JSON types are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::String(_)) => Some(Ordering::Less),
        (Value::String(_), Value::Number(_)) => Some(Ordering::Greater),
        _ => None,
    }
}

/// Shared post-processing for ordered range queries: drop records that lack
/// the field or are not strictly before the boundary, sort ascending, keep the tail.
pub fn ordered_tail(
    mut rows: Vec<Keyed>,
    order_field: &str,
    limit_from_end: usize,
    before: Option<&Value>,
) -> Vec<Keyed> {
    rows.retain(|row| {
        let Some(v) = row.record.get(order_field) else {
            return false;
        };
        match before {
            Some(b) => compare_values(v, b) == Some(Ordering::Less),
            None => compare_values(v, v).is_some(),
        }
    });

    rows.sort_by(|a, b| {
        let (Some(x), Some(y)) = (a.record.get(order_field), b.record.get(order_field)) else {
            return Ordering::Equal;
        };
        compare_values(x, y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });

    let skip = rows.len().saturating_sub(limit_from_end);
    rows.into_iter().skip(skip).collect()
}

pub fn to_record<T: serde::Serialize>(value: &T) -> Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(crate::Error::Store(format!(
            "expected an object record, got {other}"
        ))),
    }
}

pub fn from_record<T: serde::de::DeserializeOwned>(record: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}
