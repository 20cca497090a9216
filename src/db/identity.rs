//! Identity resolution and recovery.
//!
//! Maps a (terminal, session) pair onto a stable pool name. Terminals outlive
//! sessions: a crashed or restarted session in the same terminal must come
//! back as the same agent. Resolution walks an ordered chain of strategies
//! and takes the first match:
//!
//! 1. an agent bound to this terminal, ended or not: adopt it;
//! 2. an active agent bound to this session (terminal detection lost);
//! 3. a pre-registered agent awaiting its first session: rebind it;
//! 4. the first free pool name, overwriting an unclaimable ended holder;
//! 5. pool exhausted: synthesize a name from the session handle.

use crate::cache::{self, CachedIdentity};
use crate::db::{Coordinator, FETCH_LIMIT, KIND_AGENTS, now_ms, now_secs};
use crate::store::{filter, from_record};
use crate::types::{Agent, NAME_POOL, PENDING_SESSION_PREFIX};
use anyhow::Result;
use std::collections::HashSet;

/// Terminal handle used when neither a terminal nor a session handle is
/// known. Every such caller shares one stable binding; without it the
/// resolver would fall through to allocation on every call.
pub(crate) const UNKNOWN_TERMINAL: &str = "local";

impl Coordinator {
    /// Resolve the calling session to an agent, registering one if needed.
    /// The terminal cache file is refreshed as a side effect.
    pub async fn resolve_identity(
        &self,
        terminal_handle: &str,
        session_handle: &str,
    ) -> Result<Agent> {
        let terminal_handle = if terminal_handle.is_empty() && session_handle.is_empty() {
            UNKNOWN_TERMINAL
        } else {
            terminal_handle
        };
        let now = now_secs();
        let agent = if let Some(agent) = self
            .adopt_by_terminal(terminal_handle, session_handle, now)
            .await?
        {
            agent
        } else if let Some(agent) = self
            .adopt_by_session(terminal_handle, session_handle)
            .await?
        {
            agent
        } else if let Some(agent) = self
            .adopt_preregistered(terminal_handle, session_handle, now)
            .await?
        {
            agent
        } else {
            self.allocate_fresh(terminal_handle, session_handle, now)
                .await?
        };
        self.refresh_cache(&agent, now);
        Ok(agent)
    }

    /// Tier 1: the terminal already has an agent, possibly from an ended
    /// session. Adopt it, refreshing the session binding.
    async fn adopt_by_terminal(
        &self,
        terminal_handle: &str,
        session_handle: &str,
        now: i64,
    ) -> Result<Option<Agent>> {
        let Some(mut agent) = self.get_agent_by_terminal(terminal_handle).await? else {
            return Ok(None);
        };
        if agent.is_active() && agent.session_handle == session_handle {
            return Ok(Some(agent));
        }
        tracing::debug!(name = %agent.name, %terminal_handle, "adopting agent by terminal");
        agent.session_handle = session_handle.to_string();
        agent.started_at = now;
        agent.ended_at = 0;
        self.upsert_agent(&agent).await?;
        Ok(Some(agent))
    }

    /// Tier 2: an active agent carries this session but terminal detection
    /// changed or failed. Rebind the terminal when we have one.
    async fn adopt_by_session(
        &self,
        terminal_handle: &str,
        session_handle: &str,
    ) -> Result<Option<Agent>> {
        let Some(mut agent) = self.get_agent_by_session(session_handle).await? else {
            return Ok(None);
        };
        if !terminal_handle.is_empty() && agent.terminal_handle != terminal_handle {
            agent.terminal_handle = terminal_handle.to_string();
            self.upsert_agent(&agent).await?;
        }
        Ok(Some(agent))
    }

    /// Tier 3: a pre-registered agent is waiting for its first session.
    async fn adopt_preregistered(
        &self,
        terminal_handle: &str,
        session_handle: &str,
        now: i64,
    ) -> Result<Option<Agent>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_AGENTS),
                &filter::starts_with("session_handle", PENDING_SESSION_PREFIX),
                &[],
                FETCH_LIMIT,
            )
            .await?;
        let mut pending: Vec<Agent> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        pending.sort_by(|a, b| a.name.cmp(&b.name));
        let Some(mut agent) = pending.into_iter().next() else {
            return Ok(None);
        };
        tracing::debug!(name = %agent.name, "binding pre-registered agent");
        agent.session_handle = session_handle.to_string();
        agent.terminal_handle = terminal_handle.to_string();
        agent.started_at = now;
        agent.ended_at = 0;
        self.upsert_agent(&agent).await?;
        Ok(Some(agent))
    }

    /// Tiers 4 and 5: allocate from the pool, or synthesize past its end.
    async fn allocate_fresh(
        &self,
        terminal_handle: &str,
        session_handle: &str,
        now: i64,
    ) -> Result<Agent> {
        let all = self.list_agents().await?;
        let name = allocate_pool_name(&all)
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_name(session_handle));
        let replacing = all.iter().any(|a| a.name == name);
        let agent = Agent::new(&name, terminal_handle, session_handle, now);
        self.upsert_agent(&agent).await?;
        if replacing {
            // The overwritten holder may have died mid-task.
            self.force_complete_active_tasks(&name, now, "agent replaced")
                .await?;
        }
        tracing::info!(name = %agent.name, "registered agent");
        Ok(agent)
    }

    /// Reserve a pool name ahead of any session; tier 3 binds it later.
    pub async fn preregister_agent(&self) -> Result<Agent> {
        let now = now_secs();
        let token = now_ms().to_string();
        let all = self.list_agents().await?;
        let name = allocate_pool_name(&all)
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_name(&token));
        let replacing = all.iter().any(|a| a.name == name);
        let agent = Agent::new(
            &name,
            "",
            &format!("{PENDING_SESSION_PREFIX}{token}"),
            now,
        );
        self.upsert_agent(&agent).await?;
        if replacing {
            self.force_complete_active_tasks(&name, now, "agent replaced")
                .await?;
        }
        Ok(agent)
    }

    /// Best-effort cache refresh; the cache is advisory.
    pub(crate) fn refresh_cache(&self, agent: &Agent, now: i64) {
        if agent.terminal_handle.is_empty() {
            return;
        }
        let entry = CachedIdentity::from_agent(agent, now);
        if let Err(e) = cache::write_identity(self.scope(), &agent.terminal_handle, &entry) {
            tracing::debug!("cache refresh failed: {e:#}");
        }
    }
}

/// First pool name not reserved by a current or recoverable holder.
fn allocate_pool_name(agents: &[Agent]) -> Option<&'static str> {
    let live_terminals: HashSet<&str> = agents
        .iter()
        .filter(|a| a.is_active() && !a.terminal_handle.is_empty())
        .map(|a| a.terminal_handle.as_str())
        .collect();
    NAME_POOL.iter().copied().find(|name| {
        match agents.iter().find(|a| a.name == *name) {
            None => true,
            Some(holder) => !name_reserved(holder, &live_terminals),
        }
    })
}

/// A name stays reserved while its holder is active (or pending), or while an
/// ended holder's terminal could still come back and re-adopt it.
fn name_reserved(holder: &Agent, live_terminals: &HashSet<&str>) -> bool {
    if holder.is_active() {
        return true;
    }
    if holder.terminal_handle.is_empty() {
        return false;
    }
    !live_terminals.contains(holder.terminal_handle.as_str())
}

/// Past the pool: derive a stable name from the session handle.
fn synthesize_name(session_handle: &str) -> String {
    let cleaned: String = session_handle
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_lowercase();
    if cleaned.is_empty() {
        format!("a-{}", now_ms())
    } else {
        format!("a-{cleaned}")
    }
}
