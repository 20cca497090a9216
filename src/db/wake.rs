//! Wake queue: nudging idle agents' terminals.
//!
//! Senders enqueue a request per idle recipient, then try to drain. The drain
//! is single-flight per host, guarded by `<scope>/wake.lock`: whoever holds
//! the file lock processes the whole queue, everyone else returns
//! immediately. A request survives until processed, so a lost race only
//! delays the nudge to the next drain.

use crate::db::{Coordinator, FETCH_LIMIT, KIND_WAKE_QUEUE, now_ms, now_secs};
use crate::flock::ProcessLock;
use crate::store::{filter, from_record, to_record};
use crate::types::WakeRequest;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

static WAKE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Bound on drain cycles, in case writers keep the queue busy.
const MAX_DRAIN_CYCLES: usize = 10;

/// Side-effect seam for actually waking a terminal.
#[async_trait]
pub trait Nudge: Send + Sync {
    async fn nudge(&self, terminal_handle: &str) -> Result<()>;
}

/// Default when no wake command is configured: log and move on.
pub struct LogNudge;

#[async_trait]
impl Nudge for LogNudge {
    async fn nudge(&self, terminal_handle: &str) -> Result<()> {
        tracing::info!(terminal = %terminal_handle, "wake requested (no wake_command configured)");
        Ok(())
    }
}

/// Runs the configured shell template. `{terminal}` substitutes the full
/// handle (`tmux:%5`), `{pane}` the part after the prefix (`%5`).
pub struct CommandNudge {
    template: String,
}

impl CommandNudge {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    fn render(&self, terminal_handle: &str) -> String {
        let pane = terminal_handle
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(terminal_handle);
        self.template
            .replace("{terminal}", terminal_handle)
            .replace("{pane}", pane)
    }
}

#[async_trait]
impl Nudge for CommandNudge {
    async fn nudge(&self, terminal_handle: &str) -> Result<()> {
        let command = self.render(terminal_handle);
        tracing::debug!(%command, "running wake command");
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .status()
            .await?;
        if !status.success() {
            tracing::warn!(%command, %status, "wake command failed");
        }
        Ok(())
    }
}

/// Choose the nudge implementation for a scope's config.
pub fn nudge_for(config: &crate::config::CrewConfig) -> Box<dyn Nudge> {
    match &config.wake_command {
        Some(template) => Box::new(CommandNudge::new(template)),
        None => Box::new(LogNudge),
    }
}

impl Coordinator {
    /// Queue a wake for a terminal and flush so any drainer sees it.
    pub async fn enqueue_wake(&self, terminal_handle: &str) -> Result<()> {
        let request = WakeRequest {
            id: format!(
                "wake-{}-{}",
                now_ms(),
                WAKE_COUNTER.fetch_add(1, Ordering::Relaxed)
            ),
            terminal_handle: terminal_handle.to_string(),
            created_at: now_secs(),
        };
        let collection = self.collection(KIND_WAKE_QUEUE);
        self.store()
            .insert(&collection, vec![to_record(&request)?])
            .await?;
        self.store().flush(&collection).await?;
        Ok(())
    }

    /// Outstanding wake requests, oldest first.
    pub async fn pending_wakes(&self) -> Result<Vec<WakeRequest>> {
        let rows = self
            .store()
            .query(&self.collection(KIND_WAKE_QUEUE), "", &[], FETCH_LIMIT)
            .await?;
        let mut requests: Vec<WakeRequest> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        requests.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(requests)
    }

    /// Drain the queue if nobody else is doing it. Returns the number of
    /// nudges issued; 0 when the drain lock was held elsewhere.
    pub async fn process_wake_queue_once(&self, nudge: &dyn Nudge) -> Result<usize> {
        let Some(_guard) = ProcessLock::try_acquire(&self.scope().wake_lock_path())? else {
            tracing::debug!("wake queue drain already in flight");
            return Ok(0);
        };
        let collection = self.collection(KIND_WAKE_QUEUE);
        let mut nudged = 0;
        let mut seen: HashSet<String> = HashSet::new();
        for _ in 0..MAX_DRAIN_CYCLES {
            let pending = self.pending_wakes().await?;
            if pending.is_empty() {
                break;
            }
            for request in pending {
                // One nudge per terminal per drain, however many requests.
                if seen.insert(request.terminal_handle.clone()) {
                    if let Err(e) = nudge.nudge(&request.terminal_handle).await {
                        tracing::warn!(terminal = %request.terminal_handle, "nudge failed: {e:#}");
                    }
                    nudged += 1;
                }
                self.store()
                    .delete(&collection, &filter::eq_str("id", &request.id))
                    .await?;
            }
            self.store().flush(&collection).await?;
        }
        Ok(nudged)
    }
}
