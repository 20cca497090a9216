//! In-memory store backend for tests.
//!
//! Honors the same contract the HTTP backend speaks, including the visibility
//! rule: writes and deletes stay invisible to [`DocStore::query`] until the
//! collection is flushed. Code that forgets a flush before depending on a
//! write fails against this fake the same way it would against a freshly
//! restarted reader in production.
//!
//! `insert` rejects duplicate primary keys; `upsert` replaces. Fault
//! injection covers the two error paths the client treats specially:
//! [`set_offline`](MemStore::set_offline) for degraded mode and
//! [`inject_rate_limits`](MemStore::inject_rate_limits) for retry.

use crate::error::StoreError;
use crate::store::filter::Filter;
use crate::store::{DocStore, Record};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Default)]
struct Collection {
    visible: BTreeMap<String, Record>,
    staged: BTreeMap<String, Record>,
    staged_deletes: HashSet<String>,
}

#[derive(Default)]
pub struct MemStore {
    collections: Mutex<HashMap<String, Collection>>,
    primary_keys: Mutex<HashMap<String, String>>,
    offline: AtomicBool,
    rate_limits_left: AtomicU32,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the primary key field for a collection. Unregistered
    /// collections default to `id`.
    pub fn with_primary_key(self, collection: &str, field: &str) -> Self {
        self.primary_keys
            .lock()
            .unwrap()
            .insert(collection.to_string(), field.to_string());
        self
    }

    /// While offline every verb fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` verb calls with [`StoreError::RateLimited`].
    pub fn inject_rate_limits(&self, n: u32) {
        self.rate_limits_left.store(n, Ordering::SeqCst);
    }

    /// Count of records visible without a pending flush, for assertions.
    pub fn visible_len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.visible.len())
            .unwrap_or(0)
    }

    fn check_faults(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        let left = self.rate_limits_left.load(Ordering::SeqCst);
        if left > 0 {
            self.rate_limits_left.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::RateLimited("injected".into()));
        }
        Ok(())
    }

    fn primary_key_of(&self, collection: &str) -> String {
        self.primary_keys
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_else(|| "id".to_string())
    }

    fn key_value(record: &Record, field: &str) -> Result<String, StoreError> {
        match record.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(StoreError::Request(format!(
                "primary key {field} has unsupported type: {other}"
            ))),
            None => Err(StoreError::Request(format!(
                "record missing primary key {field}"
            ))),
        }
    }
}

#[async_trait]
impl DocStore for MemStore {
    async fn query(
        &self,
        collection: &str,
        filter: &str,
        _output_fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        self.check_faults()?;
        let parsed = Filter::parse(filter)?;
        let map = self.collections.lock().unwrap();
        let Some(coll) = map.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .visible
            .values()
            .filter(|r| parsed.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        self.check_faults()?;
        let pk = self.primary_key_of(collection);
        let mut map = self.collections.lock().unwrap();
        let coll = map.entry(collection.to_string()).or_default();
        for record in records {
            let key = Self::key_value(&record, &pk)?;
            let live = coll.visible.contains_key(&key) && !coll.staged_deletes.contains(&key);
            if live || coll.staged.contains_key(&key) {
                return Err(StoreError::Request(format!(
                    "duplicate primary key {key} in {collection}"
                )));
            }
            coll.staged.insert(key, record);
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        self.check_faults()?;
        let pk = self.primary_key_of(collection);
        let mut map = self.collections.lock().unwrap();
        let coll = map.entry(collection.to_string()).or_default();
        for record in records {
            let key = Self::key_value(&record, &pk)?;
            coll.staged_deletes.remove(&key);
            coll.staged.insert(key, record);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &str) -> Result<(), StoreError> {
        self.check_faults()?;
        let parsed = Filter::parse(filter)?;
        let mut map = self.collections.lock().unwrap();
        let Some(coll) = map.get_mut(collection) else {
            return Ok(());
        };
        let doomed: Vec<String> = coll
            .visible
            .iter()
            .filter(|(_, r)| parsed.matches(r))
            .map(|(k, _)| k.clone())
            .collect();
        coll.staged_deletes.extend(doomed);
        coll.staged.retain(|_, r| !parsed.matches(r));
        Ok(())
    }

    async fn flush(&self, collection: &str) -> Result<(), StoreError> {
        self.check_faults()?;
        let mut map = self.collections.lock().unwrap();
        let Some(coll) = map.get_mut(collection) else {
            return Ok(());
        };
        for key in coll.staged_deletes.drain() {
            coll.visible.remove(&key);
        }
        let staged = std::mem::take(&mut coll.staged);
        coll.visible.extend(staged);
        Ok(())
    }
}
