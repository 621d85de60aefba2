//! Firebase Realtime Database adapter (REST).
//!
//! Every record lives at `{base}/{collection}/{key}.json`. Ordered queries use
//! the database's `orderBy` / `limitToLast` / `endAt` parameters; the
//! exclusive boundary and the final ordering are applied client-side, since
//! the REST API returns query results as an unordered JSON object.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde_json::{Map, Value};

use scb_core::{
    errors::Error,
    store::{ordered_tail, DocumentStore, Keyed, Record},
    Result,
};

/// Records that are a bare scalar in the database (e.g. `admins/<id>: true`)
/// are exposed to the core as `{"value": <scalar>}`.
const SCALAR_FIELD: &str = "value";

#[derive(Clone, Debug)]
pub struct FirebaseStore {
    base: Url,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl FirebaseStore {
    pub fn new(database_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base = Url::parse(database_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("invalid database url {database_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "database url {database_url:?} cannot hold paths"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            base,
            auth_token,
            http,
        })
    }

    fn url(&self, collection: &str, key: Option<&str>) -> Url {
        json_url(&self.base, collection, key)
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut req = self.http.request(method.clone(), url.clone()).query(query);
        if let Some(token) = &self.auth_token {
            req = req.query(&[("auth", token)]);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(%method, path = url.path(), error = %e, "firebase request failed");
            Error::Store(format!("firebase request error: {e}"))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Store(format!(
                "firebase {method} {} failed: {status} {}",
                url.path(),
                body.chars().take(200).collect::<String>()
            )));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| Error::Store(format!("firebase json error: {e}")))
    }

    async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<Value> {
        self.request(Method::GET, url, query, None).await
    }
}

#[async_trait]
impl DocumentStore for FirebaseStore {
    async fn get_record(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let v = self.get(self.url(collection, Some(key)), &[]).await?;
        Ok(record_from_value(v))
    }

    async fn put_record(&self, collection: &str, key: &str, record: Record) -> Result<()> {
        let body = value_from_record(record);
        self.request(Method::PUT, self.url(collection, Some(key)), &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn patch_record(&self, collection: &str, key: &str, fields: Record) -> Result<()> {
        let body = Value::Object(fields);
        self.request(Method::PATCH, self.url(collection, Some(key)), &[], Some(&body))
            .await?;
        Ok(())
    }

    async fn push_record(&self, collection: &str, record: Record) -> Result<String> {
        let body = Value::Object(record);
        let v = self
            .request(Method::POST, self.url(collection, None), &[], Some(&body))
            .await?;
        v.get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Store(format!("firebase push returned no key: {v}")))
    }

    async fn delete_record(&self, collection: &str, key: &str) -> Result<()> {
        self.request(Method::DELETE, self.url(collection, Some(key)), &[], None)
            .await?;
        Ok(())
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        equals: &Value,
    ) -> Result<Vec<Keyed>> {
        let query = [
            ("orderBy", quoted(field)),
            ("equalTo", equals.to_string()),
        ];
        let v = self.get(self.url(collection, None), &query).await?;
        let mut rows = rows_from_listing(v);
        // The server already filtered; recheck in case of index-less fallbacks.
        rows.retain(|r| r.record.get(field) == Some(equals));
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    async fn query_ordered_range(
        &self,
        collection: &str,
        order_field: &str,
        limit_from_end: usize,
        before: Option<&Value>,
    ) -> Result<Vec<Keyed>> {
        if limit_from_end == 0 {
            return Ok(Vec::new());
        }
        let mut fetch = first_fetch(limit_from_end, before);
        loop {
            let query = range_query(order_field, fetch, before);
            let listing = rows_from_listing(self.get(self.url(collection, None), &query).await?);
            let fetched = listing.len();
            let rows = ordered_tail(listing, order_field, limit_from_end, before);
            match wider_fetch(fetch, fetched, rows.len(), limit_from_end) {
                Some(next) => {
                    tracing::debug!(collection, fetched, kept = rows.len(), next, "boundary ties; refetching");
                    fetch = next;
                }
                None => return Ok(rows),
            }
        }
    }

    async fn list_keys(&self, collection: &str) -> Result<Vec<String>> {
        let v = self
            .get(self.url(collection, None), &[("shallow", "true".to_string())])
            .await?;
        let mut keys: Vec<String> = rows_from_listing(v).into_iter().map(|r| r.key).collect();
        keys.sort();
        Ok(keys)
    }
}

fn json_url(base: &Url, collection: &str, key: Option<&str>) -> Url {
    let mut url = base.clone();
    if let Ok(mut segs) = url.path_segments_mut() {
        segs.pop_if_empty();
        match key {
            Some(k) => {
                segs.push(collection).push(&format!("{k}.json"));
            }
            None => {
                segs.push(&format!("{collection}.json"));
            }
        }
    }
    url
}

/// `endAt` is inclusive, so behind a boundary one extra row is fetched to
/// make up for a row sitting exactly on it.
fn first_fetch(limit: usize, before: Option<&Value>) -> usize {
    match before {
        Some(_) => limit + 1,
        None => limit,
    }
}

/// When several rows share the boundary value they can crowd out rows that
/// belong on the page. If the server returned everything asked for but too
/// few rows survived the exclusion, ask again for enough rows to cover the
/// excluded ones. `None` once the page is full or the collection ran out.
fn wider_fetch(requested: usize, fetched: usize, kept: usize, limit: usize) -> Option<usize> {
    if kept >= limit || fetched < requested {
        return None;
    }
    Some(limit + (fetched - kept))
}

/// Query parameters for "last `fetch` by `field`, up to and including `end_at`".
fn range_query(field: &str, fetch: usize, end_at: Option<&Value>) -> Vec<(&'static str, String)> {
    let mut q = vec![("orderBy", quoted(field))];
    if let Some(b) = end_at {
        q.push(("endAt", b.to_string()));
    }
    q.push(("limitToLast", fetch.to_string()));
    q
}

fn quoted(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn record_from_value(v: Value) -> Option<Record> {
    match v {
        Value::Null => None,
        Value::Object(map) => Some(map),
        scalar => {
            let mut map = Map::new();
            map.insert(SCALAR_FIELD.to_string(), scalar);
            Some(map)
        }
    }
}

fn value_from_record(mut record: Record) -> Value {
    let is_wrapped_scalar = record.len() == 1
        && record
            .get(SCALAR_FIELD)
            .map(|v| !v.is_object() && !v.is_array() && !v.is_null())
            .unwrap_or(false);
    if is_wrapped_scalar {
        if let Some(v) = record.remove(SCALAR_FIELD) {
            return v;
        }
    }
    Value::Object(record)
}

/// A collection listing comes back as an object keyed by child key, or as
/// an array when every key is a small integer. Null children are holes.
fn rows_from_listing(v: Value) -> Vec<Keyed> {
    let pairs: Vec<(String, Value)> = match v {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    };
    pairs
        .into_iter()
        .filter_map(|(key, v)| record_from_value(v).map(|record| Keyed { key, record }))
        .collect()
}
