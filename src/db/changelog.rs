//! Shared changelog: who did what, lately.
//!
//! Entries are append-only and id-ordered by a sequence counter, since the
//! store itself cannot sort. Readers fetch a bounded window and order
//! client-side.

use crate::db::{Coordinator, FETCH_LIMIT, KIND_CHANGELOG, now_secs};
use crate::store::{from_record, to_record};
use crate::types::ChangeEntry;
use anyhow::Result;

const CHANGELOG_SEQ: &str = "changelog";

impl Coordinator {
    /// Append a changelog entry.
    pub async fn record_change(&self, agent: &str, summary: &str) -> Result<ChangeEntry> {
        let seq_id = self.next_seq(CHANGELOG_SEQ).await?;
        let entry = ChangeEntry {
            id: format!("chg-{seq_id}"),
            seq_id,
            agent: agent.to_string(),
            summary: summary.to_string(),
            created_at: now_secs(),
        };
        let collection = self.collection(KIND_CHANGELOG);
        self.store()
            .insert(&collection, vec![to_record(&entry)?])
            .await?;
        self.store().flush(&collection).await?;
        Ok(entry)
    }

    /// The most recent `limit` entries, newest first.
    pub async fn recent_changes(&self, limit: usize) -> Result<Vec<ChangeEntry>> {
        let rows = self
            .store()
            .query(&self.collection(KIND_CHANGELOG), "", &[], FETCH_LIMIT)
            .await?;
        let mut entries: Vec<ChangeEntry> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| std::cmp::Reverse(e.seq_id));
        entries.truncate(limit);
        Ok(entries)
    }
}
