//! Advisory file locks.
//!
//! A lock is one record keyed by relative path. Acquisition overwrites
//! unconditionally; the pre-edit handler consults the owner first and turns a
//! conflict into a warning, never a refusal.

use crate::db::{Coordinator, FETCH_LIMIT, KIND_FILE_LOCKS};
use crate::store::{filter, from_record, to_record};
use crate::types::FileLock;
use anyhow::Result;

impl Coordinator {
    /// Record `agent` as the holder of `path`, replacing any prior holder.
    pub async fn acquire_lock(&self, path: &str, agent: &str, now: i64) -> Result<FileLock> {
        let lock = FileLock {
            file_path: path.to_string(),
            agent_name: agent.to_string(),
            locked_at: now,
        };
        let collection = self.collection(KIND_FILE_LOCKS);
        self.store()
            .upsert(&collection, vec![to_record(&lock)?])
            .await?;
        self.store().flush(&collection).await?;
        Ok(lock)
    }

    /// Current holder of `path`, if any.
    pub async fn get_lock(&self, path: &str) -> Result<Option<FileLock>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_FILE_LOCKS),
                &filter::eq_str("file_path", path),
                &[],
                1,
            )
            .await?;
        Ok(rows.into_iter().next().map(from_record).transpose()?)
    }

    /// Drop the lock on `path` if `agent` is its holder; otherwise no-op.
    pub async fn release_lock(&self, path: &str, agent: &str) -> Result<()> {
        let collection = self.collection(KIND_FILE_LOCKS);
        self.store()
            .delete(
                &collection,
                &filter::and(&[
                    filter::eq_str("file_path", path),
                    filter::eq_str("agent_name", agent),
                ]),
            )
            .await?;
        self.store().flush(&collection).await?;
        Ok(())
    }

    /// Drop every lock held by `agent`; used on session end.
    pub async fn release_all_locks(&self, agent: &str) -> Result<()> {
        let collection = self.collection(KIND_FILE_LOCKS);
        self.store()
            .delete(&collection, &filter::eq_str("agent_name", agent))
            .await?;
        self.store().flush(&collection).await?;
        Ok(())
    }

    /// Every held lock, ordered by path.
    pub async fn list_locks(&self) -> Result<Vec<FileLock>> {
        let rows = self
            .store()
            .query(&self.collection(KIND_FILE_LOCKS), "", &[], FETCH_LIMIT)
            .await?;
        let mut locks: Vec<FileLock> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        locks.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(locks)
    }
}
