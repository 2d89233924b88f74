//! Per-entity result cache
//!
//! Each entity type keeps an ordered list of records behind its own queue,
//! so read-modify-write sequences (miss → resolve → store, invalidate →
//! store) are atomic with respect to other callers of the same cache.
//! Records are matched by equality on a caller-chosen subset of fields.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use pged_core::{Error, Result, TaskQueue};

use crate::link::Record;

#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entity: String,
    entries: TaskQueue<Vec<Record>>,
    hits: AtomicU64,
    session_hits: Arc<AtomicU64>,
}

impl EntityCache {
    pub(crate) fn new(entity: &str, session: u64, session_hits: Arc<AtomicU64>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entity: entity.to_string(),
                entries: TaskQueue::new(format!("pged_cache_{}_{}", entity, session), Vec::new()),
                hits: AtomicU64::new(0),
                session_hits,
            }),
        }
    }

    pub fn entity(&self) -> &str {
        &self.inner.entity
    }

    pub fn hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.run(|entries| entries.len()).await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// First record whose fields equal every identifier field.
    pub async fn get(&self, identifiers: &Value) -> Result<Option<Record>> {
        let identifiers = identifiers_of(identifiers)?;
        let entries = self.inner.entries.enter().await;
        Ok(self.lookup(&entries, identifiers))
    }

    /// Like [`EntityCache::get`], calling `resolver` on a miss and storing
    /// a non-empty result. The whole sequence holds the cache's queue slot.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        identifiers: &Value,
        resolver: F,
    ) -> Result<Option<Record>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Record>>>,
    {
        let identifiers = identifiers_of(identifiers)?;
        let mut entries = self.inner.entries.enter().await;

        if let Some(found) = self.lookup(&entries, identifiers) {
            return Ok(Some(found));
        }

        tracing::trace!(entity = %self.inner.entity, "cache miss, resolving");
        let resolved = resolver().await?;
        if let Some(record) = resolved.as_ref().filter(|record| !record.is_empty()) {
            entries.push(record.clone());
        }
        Ok(resolved)
    }

    /// Store a record, a list of records or a `{items, total}` page.
    ///
    /// Null and empty records are skipped. Returns the input unchanged.
    pub async fn set(&self, values: Value) -> Result<Value> {
        let records = records_of(&values)?;
        self.inner
            .entries
            .run(|entries| entries.extend(records))
            .await;
        Ok(values)
    }

    /// Replace every record matching `identifiers` with `values`.
    pub async fn update(&self, identifiers: &Value, values: Value) -> Result<Value> {
        let identifiers = identifiers_of(identifiers)?;
        let records = records_of(&values)?;
        self.inner
            .entries
            .run(|entries| {
                entries.retain(|entry| !matches(entry, identifiers));
                entries.extend(records);
            })
            .await;
        Ok(values)
    }

    /// Merge `delta` into the first matching record and return it.
    pub async fn patch(&self, identifiers: &Value, delta: &Value) -> Result<Option<Record>> {
        let identifiers = identifiers_of(identifiers)?;
        let Value::Object(delta) = delta else {
            return Err(Error::invalid_cache_value(format!(
                "patch expects an object, got {}",
                delta
            )));
        };

        Ok(self
            .inner
            .entries
            .run(|entries| {
                let entry = entries.iter_mut().find(|entry| matches(entry, identifiers))?;
                entry.extend(delta.clone());
                Some(entry.clone())
            })
            .await)
    }

    /// Remove every matching record and return how many were removed.
    pub async fn invalidate(&self, identifiers: &Value) -> Result<usize> {
        let identifiers = identifiers_of(identifiers)?;
        Ok(self
            .inner
            .entries
            .run(|entries| {
                let before = entries.len();
                entries.retain(|entry| !matches(entry, identifiers));
                before - entries.len()
            })
            .await)
    }

    fn lookup(&self, entries: &[Record], identifiers: &Map<String, Value>) -> Option<Record> {
        let found = entries
            .iter()
            .find(|entry| matches(entry, identifiers))
            .cloned()?;
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
        self.inner.session_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(entity = %self.inner.entity, "cache hit");
        Some(found)
    }
}

fn identifiers_of(identifiers: &Value) -> Result<&Map<String, Value>> {
    match identifiers {
        Value::Object(map) => Ok(map),
        other => Err(Error::invalid_cache_value(format!(
            "identifiers must be an object, got {}",
            other
        ))),
    }
}

/// Missing fields compare as null.
fn matches(entry: &Record, identifiers: &Map<String, Value>) -> bool {
    identifiers
        .iter()
        .all(|(key, value)| entry.get(key).unwrap_or(&Value::Null) == value)
}

fn records_of(values: &Value) -> Result<Vec<Record>> {
    match values {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => match (map.get("items"), map.get("total")) {
            (Some(items @ Value::Array(_)), Some(_)) => records_of(items),
            _ if map.is_empty() => Ok(Vec::new()),
            _ => Ok(vec![map.clone()]),
        },
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => {}
                    Value::Object(map) if map.is_empty() => {}
                    Value::Object(map) => records.push(map.clone()),
                    other => {
                        return Err(Error::invalid_cache_value(format!(
                            "expected an object, got {}",
                            other
                        )))
                    }
                }
            }
            Ok(records)
        }
        other => Err(Error::invalid_cache_value(format!(
            "expected an object or a list, got {}",
            other
        ))),
    }
}
