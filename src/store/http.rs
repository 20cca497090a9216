//! HTTP backend speaking the store's REST API.
//!
//! Every verb is a POST of a JSON body to a fixed path; responses carry a
//! `{"code": 0, "data": ...}` envelope where a non-zero code is a server-side
//! error. Rate limiting surfaces either as HTTP 429 or as an envelope message,
//! and both map to [`StoreError::RateLimited`] so the retry policy in
//! [`super::Store`] can kick in.

use crate::error::StoreError;
use crate::store::{DocStore, Record};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;

const QUERY_PATH: &str = "/v2/vectordb/entities/query";
const INSERT_PATH: &str = "/v2/vectordb/entities/insert";
const UPSERT_PATH: &str = "/v2/vectordb/entities/upsert";
const DELETE_PATH: &str = "/v2/vectordb/entities/delete";
const FLUSH_PATH: &str = "/v2/vectordb/collections/flush";

pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StoreError::RateLimited(format!("{path} returned 429")));
        }
        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
            return Err(StoreError::Unavailable(format!(
                "{path} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(StoreError::Request(format!("{path} returned {status}")));
        }
        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let code = envelope.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            return Err(classify_server_error(code, message));
        }
        Ok(envelope)
    }
}

/// Server-side envelope errors: rate limits retry, missing/unloaded
/// collections mean the deployment is not set up and we should degrade.
fn classify_server_error(code: i64, message: String) -> StoreError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("too many requests") {
        StoreError::RateLimited(message)
    } else if lower.contains("can't find collection")
        || lower.contains("collection not found")
        || lower.contains("collection not loaded")
    {
        StoreError::Unavailable(message)
    } else {
        StoreError::Request(format!("store error code {code}: {message}"))
    }
}

#[async_trait]
impl DocStore for HttpStore {
    async fn query(
        &self,
        collection: &str,
        filter: &str,
        output_fields: &[&str],
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let fields: Vec<&str> = if output_fields.is_empty() {
            vec!["*"]
        } else {
            output_fields.to_vec()
        };
        let envelope = self
            .post(
                QUERY_PATH,
                json!({
                    "collectionName": collection,
                    "filter": filter,
                    "outputFields": fields,
                    "limit": limit,
                }),
            )
            .await?;
        let rows = envelope
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        rows.into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                other => Err(StoreError::Decode(format!(
                    "query row is not an object: {other}"
                ))),
            })
            .collect()
    }

    async fn insert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        self.post(
            INSERT_PATH,
            json!({ "collectionName": collection, "data": records }),
        )
        .await
        .map(|_| ())
    }

    async fn upsert(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        self.post(
            UPSERT_PATH,
            json!({ "collectionName": collection, "data": records }),
        )
        .await
        .map(|_| ())
    }

    async fn delete(&self, collection: &str, filter: &str) -> Result<(), StoreError> {
        self.post(
            DELETE_PATH,
            json!({ "collectionName": collection, "filter": filter }),
        )
        .await
        .map(|_| ())
    }

    async fn flush(&self, collection: &str) -> Result<(), StoreError> {
        self.post(FLUSH_PATH, json!({ "collectionName": collection }))
            .await
            .map(|_| ())
    }
}
