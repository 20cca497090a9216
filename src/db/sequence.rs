//! Monotonic counters over the store.
//!
//! The store has no atomic increment, so the read-increment-upsert cycle is
//! serialized through a blocking file lock shared by every process on the
//! host (`<scope>/seq.lock`). Concurrent writers on different hosts can still
//! race; a single shared workstation is the supported deployment.
//!
//! Counter names in use: `tasks` and `changelog`; `metrics` and `decisions`
//! are reserved for the same scheme.

use crate::db::{Coordinator, KIND_SEQUENCES};
use crate::flock::ProcessLock;
use crate::store::{filter, to_record};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize)]
struct Sequence {
    name: String,
    current_value: i64,
}

impl Coordinator {
    /// Next value of the named counter, starting at 1.
    pub async fn next_seq(&self, name: &str) -> Result<i64> {
        let guard = ProcessLock::acquire(&self.scope().seq_lock_path())?;
        let collection = self.collection(KIND_SEQUENCES);
        let rows = self
            .store()
            .query(&collection, &filter::eq_str("name", name), &[], 1)
            .await?;
        let current = rows
            .into_iter()
            .next()
            .and_then(|r| r.get("current_value").and_then(Value::as_i64))
            .unwrap_or(0);
        let next = current + 1;
        let record = to_record(&Sequence {
            name: name.to_string(),
            current_value: next,
        })?;
        self.store().upsert(&collection, vec![record]).await?;
        // Flush before releasing the lock: the next holder reads this value.
        self.store().flush(&collection).await?;
        drop(guard);
        Ok(next)
    }
}
