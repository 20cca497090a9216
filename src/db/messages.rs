//! Inter-agent messaging.
//!
//! Messages are immutable rows; delivery marking rewrites `delivered_at`.
//! A broadcast is one independent row per active recipient, so delivery state
//! tracks per recipient with no extra bookkeeping. Senders flush before
//! returning: once `send` reports success the recipient's next pending check
//! must observe the message.

use crate::db::{Coordinator, FETCH_LIMIT, KIND_MESSAGES, now_ms, now_secs};
use crate::error::ToolError;
use crate::store::{filter, from_record, to_record};
use crate::types::{Agent, Message, Priority};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};

/// Recipient name that fans out to every active agent except the sender.
pub const BROADCAST_TARGET: &str = "all";

/// Prefix marking fanned-out copies of a broadcast.
pub const BROADCAST_PREFIX: &str = "[broadcast] ";

/// Disambiguates ids minted in the same millisecond by one process.
static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_message_id(recipient: &str) -> String {
    let n = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{}-{}", now_ms(), n, recipient)
}

/// What a send did: who got a row, who was idle enough to warrant a wake.
#[derive(Debug, Default)]
pub struct SendOutcome {
    pub message_ids: Vec<String>,
    pub recipients: Vec<String>,
    pub wake_requested: Vec<String>,
}

impl Coordinator {
    /// Send to one active agent, or to all of them (`to = "all"`).
    ///
    /// Wake requests for idle recipients are enqueued here; the caller decides
    /// whether to drain the queue afterwards.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        body: &str,
        priority: Priority,
    ) -> Result<SendOutcome> {
        let actives: Vec<Agent> = self
            .list_active()
            .await?
            .into_iter()
            .filter(|a| !a.is_pending())
            .collect();
        let broadcast = to == BROADCAST_TARGET;
        let recipients: Vec<Agent> = if broadcast {
            actives.iter().filter(|a| a.name != from).cloned().collect()
        } else {
            match actives.iter().find(|a| a.name == to) {
                Some(agent) => vec![agent.clone()],
                None => {
                    let roster: Vec<String> = actives.iter().map(|a| a.name.clone()).collect();
                    return Err(ToolError::unknown_recipient(to, &roster).into());
                }
            }
        };
        if recipients.is_empty() {
            return Ok(SendOutcome::default());
        }

        let now = now_secs();
        let mut outcome = SendOutcome::default();
        let mut records = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            let message = Message {
                id: next_message_id(&recipient.name),
                from_agent: from.to_string(),
                to_agent: recipient.name.clone(),
                body: if broadcast {
                    format!("{BROADCAST_PREFIX}{body}")
                } else {
                    body.to_string()
                },
                priority,
                created_at: now,
                delivered_at: 0,
            };
            records.push(to_record(&message)?);
            outcome.message_ids.push(message.id);
            outcome.recipients.push(recipient.name.clone());
        }
        let collection = self.collection(KIND_MESSAGES);
        self.store().insert(&collection, records).await?;
        self.store().flush(&collection).await?;

        for recipient in &recipients {
            if recipient.is_idle() && !recipient.terminal_handle.is_empty() {
                self.enqueue_wake(&recipient.terminal_handle).await?;
                outcome.wake_requested.push(recipient.name.clone());
            }
        }
        if broadcast {
            let snippet: String = body.chars().take(60).collect();
            self.record_change(from, &format!("broadcast: {snippet}"))
                .await?;
        }
        tracing::debug!(
            from,
            to,
            count = outcome.recipients.len(),
            "message(s) stored"
        );
        Ok(outcome)
    }

    /// Undelivered messages for `agent`, oldest first.
    pub async fn pending_messages(&self, agent: &str) -> Result<Vec<Message>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_MESSAGES),
                &filter::and(&[
                    filter::eq_str("to_agent", agent),
                    filter::eq_int("delivered_at", 0),
                ]),
                &[],
                FETCH_LIMIT,
            )
            .await?;
        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        messages.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(messages)
    }

    /// Already-delivered messages for `agent`, newest first, bounded.
    pub async fn delivered_messages(&self, agent: &str, limit: usize) -> Result<Vec<Message>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_MESSAGES),
                &filter::and(&[
                    filter::eq_str("to_agent", agent),
                    filter::gt_int("delivered_at", 0),
                ]),
                &[],
                FETCH_LIMIT,
            )
            .await?;
        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        messages.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    /// Stamp `delivered_at` on each id, flushing before return so the marking
    /// is visible to any later pending check from another process.
    pub async fn mark_delivered(&self, ids: &[String], now: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection = self.collection(KIND_MESSAGES);
        for id in ids {
            let rows = self
                .store()
                .query(&collection, &filter::eq_str("id", id), &[], 1)
                .await?;
            let Some(row) = rows.into_iter().next() else {
                continue;
            };
            let mut message: Message = from_record(row)?;
            if message.delivered_at == 0 {
                message.delivered_at = now;
                self.store()
                    .upsert(&collection, vec![to_record(&message)?])
                    .await?;
            }
        }
        self.store().flush(&collection).await?;
        Ok(())
    }

    /// Drop messages older than the retention window, read or not.
    /// Returns how many were visible for deletion.
    pub async fn sweep_expired_messages(&self, now: i64) -> Result<usize> {
        let retention_secs = self.scope().config.message_retention_hours * 3600;
        let cutoff = now - retention_secs;
        let collection = self.collection(KIND_MESSAGES);
        let expired = self
            .store()
            .query(
                &collection,
                &filter::lt_int("created_at", cutoff),
                &["id"],
                FETCH_LIMIT,
            )
            .await?;
        if expired.is_empty() {
            return Ok(0);
        }
        self.store()
            .delete(&collection, &filter::lt_int("created_at", cutoff))
            .await?;
        self.store().flush(&collection).await?;
        tracing::debug!(count = expired.len(), "swept expired messages");
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scope;
    use crate::error::ErrorCode;

    async fn coordinator() -> (Coordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::open(dir.path()).unwrap();
        (Coordinator::in_memory(scope), dir)
    }

    async fn seed_active(db: &Coordinator, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            db.upsert_agent(&Agent::new(name, &format!("t{i}"), &format!("s{i}"), 100))
                .await
                .unwrap();
        }
    }

    mod send_tests {
        use super::*;

        #[tokio::test]
        async fn pending_shows_message_exactly_once_until_marked() {
            let (db, _dir) = coordinator().await;
            seed_active(&db, &["alfa", "bravo"]).await;
            db.send_message("alfa", "bravo", "ping", Priority::Normal)
                .await
                .unwrap();
            let pending = db.pending_messages("bravo").await.unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].body, "ping");
            assert_eq!(pending[0].delivered_at, 0);

            let ids: Vec<String> = pending.iter().map(|m| m.id.clone()).collect();
            db.mark_delivered(&ids, 500).await.unwrap();
            assert!(db.pending_messages("bravo").await.unwrap().is_empty());
            let history = db.delivered_messages("bravo", 10).await.unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].delivered_at, 500);
        }

        #[tokio::test]
        async fn broadcast_excludes_sender_and_prefixes_body() {
            let (db, _dir) = coordinator().await;
            seed_active(&db, &["alfa", "bravo", "charlie"]).await;
            let outcome = db
                .send_message("alfa", BROADCAST_TARGET, "standup", Priority::Normal)
                .await
                .unwrap();
            assert_eq!(outcome.recipients.len(), 2);
            assert!(!outcome.recipients.contains(&"alfa".to_string()));
            assert!(db.pending_messages("alfa").await.unwrap().is_empty());
            let got = db.pending_messages("bravo").await.unwrap();
            assert_eq!(got[0].body, "[broadcast] standup");

            let changes = db.recent_changes(5).await.unwrap();
            assert!(
                changes
                    .iter()
                    .any(|c| c.agent == "alfa" && c.summary == "broadcast: standup")
            );
        }

        #[tokio::test]
        async fn unknown_recipient_names_the_roster() {
            let (db, _dir) = coordinator().await;
            seed_active(&db, &["alfa", "bravo"]).await;
            let err = db
                .send_message("alfa", "zulu", "hi", Priority::Normal)
                .await
                .unwrap_err();
            let tool_err = ToolError::from(err);
            assert_eq!(tool_err.code, ErrorCode::UnknownRecipient);
            assert!(tool_err.message.contains("alfa"));
            assert!(tool_err.message.contains("bravo"));
        }

        #[tokio::test]
        async fn idle_recipient_gets_a_wake_request() {
            let (db, _dir) = coordinator().await;
            seed_active(&db, &["alfa"]).await;
            let mut busy = Agent::new("bravo", "t9", "s9", 100);
            busy.current_task = "already working".into();
            db.upsert_agent(&busy).await.unwrap();

            let outcome = db
                .send_message("alfa", BROADCAST_TARGET, "hello", Priority::High)
                .await
                .unwrap();
            // bravo is busy, no wake for it; nothing else is registered.
            assert!(outcome.wake_requested.is_empty());

            db.upsert_agent(&Agent::new("charlie", "t3", "s3", 100))
                .await
                .unwrap();
            let outcome = db
                .send_message("alfa", "charlie", "hello", Priority::High)
                .await
                .unwrap();
            assert_eq!(outcome.wake_requested, vec!["charlie".to_string()]);
            assert_eq!(db.pending_wakes().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn pending_excludes_preregistered_recipients() {
            let (db, _dir) = coordinator().await;
            seed_active(&db, &["alfa"]).await;
            db.preregister_agent().await.unwrap();
            let outcome = db
                .send_message("alfa", BROADCAST_TARGET, "hi", Priority::Normal)
                .await
                .unwrap();
            assert!(outcome.recipients.is_empty());
        }
    }

    mod retention_tests {
        use super::*;

        #[tokio::test]
        async fn sweep_drops_old_messages_regardless_of_read_state() {
            let (db, _dir) = coordinator().await;
            seed_active(&db, &["alfa", "bravo"]).await;
            db.send_message("alfa", "bravo", "old-read", Priority::Normal)
                .await
                .unwrap();
            db.send_message("alfa", "bravo", "old-unread", Priority::Normal)
                .await
                .unwrap();
            let pending = db.pending_messages("bravo").await.unwrap();
            let read_id = pending
                .iter()
                .find(|m| m.body == "old-read")
                .unwrap()
                .id
                .clone();
            db.mark_delivered(&[read_id], now_secs()).await.unwrap();

            // Both rows are now older than the 24h window.
            let future = now_secs() + 25 * 3600;
            let swept = db.sweep_expired_messages(future).await.unwrap();
            assert_eq!(swept, 2);
            assert!(db.pending_messages("bravo").await.unwrap().is_empty());
            assert!(db.delivered_messages("bravo", 10).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn sweep_keeps_fresh_messages() {
            let (db, _dir) = coordinator().await;
            seed_active(&db, &["alfa", "bravo"]).await;
            db.send_message("alfa", "bravo", "fresh", Priority::Normal)
                .await
                .unwrap();
            let swept = db.sweep_expired_messages(now_secs()).await.unwrap();
            assert_eq!(swept, 0);
            assert_eq!(db.pending_messages("bravo").await.unwrap().len(), 1);
        }
    }
}
