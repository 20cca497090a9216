//! Thin client for the backing document store.
//!
//! The store holds named collections of schemaless records with one mandatory
//! primary key field and a filter-expression query language. It offers no
//! transactions and no ordering; a write is only guaranteed visible to other
//! processes after an explicit [`Store::flush`] on its collection.
//!
//! The concrete backend is injected behind [`DocStore`] so every subsystem can
//! be exercised against the in-memory fake ([`MemStore`]) with the identical
//! contract the HTTP backend ([`HttpStore`]) speaks.

pub mod filter;
pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One stored record: a flat JSON object keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// Dimension of the placeholder vector written to non-vector collections.
/// The store requires a vector field per schema; coordination records carry a
/// constant zero vector to satisfy it.
pub const PLACEHOLDER_VECTOR_DIM: usize = 4;

/// Field name of the placeholder vector.
pub const VECTOR_FIELD: &str = "vector";

/// Retries after the initial attempt, applied only to rate-limit errors.
const MAX_RETRIES: u32 = 3;

/// First backoff delay; doubles per retry.
const INITIAL_BACKOFF_MS: u64 = 200;

/// Backend contract: the five verbs every implementation must provide.
///
/// `filter` is a store filter expression (see [`filter`]); an empty filter
/// matches every record. Implementations must treat `upsert` as
/// insert-or-replace on the collection's primary key.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        filter: &str,
        output_fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    async fn insert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError>;

    async fn upsert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, filter: &str) -> Result<(), StoreError>;

    /// Make prior writes to `collection` visible to subsequent reads from
    /// other processes.
    async fn flush(&self, collection: &str) -> Result<(), StoreError>;
}

/// Evaluates `$op` with bounded exponential backoff on rate-limit errors.
/// Any other error propagates immediately.
macro_rules! with_backoff {
    ($op:expr) => {{
        let mut delay = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut attempt = 0u32;
        loop {
            match $op {
                Err(StoreError::RateLimited(msg)) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, "store rate limited, backing off: {}", msg);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => break other,
            }
        }
    }};
}

/// Store handle held by the coordination layer: a backend plus the retry
/// policy applied uniformly to every call.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn DocStore>,
}

impl Store {
    pub fn new(backend: Arc<dyn DocStore>) -> Self {
        Self { backend }
    }

    pub async fn query(
        &self,
        collection: &str,
        filter: &str,
        output_fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        with_backoff!(
            self.backend
                .query(collection, filter, output_fields, limit)
                .await
        )
    }

    pub async fn insert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        let records = with_placeholder_vectors(records);
        with_backoff!(self.backend.insert(collection, records.clone()).await)
    }

    pub async fn upsert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        let records = with_placeholder_vectors(records);
        with_backoff!(self.backend.upsert(collection, records.clone()).await)
    }

    pub async fn delete(&self, collection: &str, filter: &str) -> Result<(), StoreError> {
        with_backoff!(self.backend.delete(collection, filter).await)
    }

    pub async fn flush(&self, collection: &str) -> Result<(), StoreError> {
        with_backoff!(self.backend.flush(collection).await)
    }

    /// Cheap readiness probe: one bounded query against `collection`.
    /// An `Unavailable` result means the caller should enter degraded mode.
    pub async fn probe(&self, collection: &str) -> Result<(), StoreError> {
        self.query(collection, "", &[], 1).await.map(|_| ())
    }
}

/// The store schema mandates a vector field; coordination records satisfy it
/// with a constant zero vector.
fn with_placeholder_vectors(mut records: Vec<Record>) -> Vec<Record> {
    for record in &mut records {
        record
            .entry(VECTOR_FIELD)
            .or_insert_with(|| Value::from(vec![0.0f32; PLACEHOLDER_VECTOR_DIM]));
    }
    records
}

/// Serialize a typed value into a store record.
pub fn to_record<T: Serialize>(value: &T) -> Result<Record, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Request(format!(
            "record must serialize to an object, got {}",
            other
        ))),
        Err(e) => Err(StoreError::Request(e.to_string())),
    }
}

/// Decode a store record into a typed value. The placeholder vector field is
/// dropped first so typed structs need not model it.
pub fn from_record<T: DeserializeOwned>(mut record: Record) -> Result<T, StoreError> {
    record.remove(VECTOR_FIELD);
    serde_json::from_value(Value::Object(record)).map_err(|e| StoreError::Decode(e.to_string()))
}
