//! Agent registry operations.

use crate::db::{Coordinator, FETCH_LIMIT, KIND_AGENTS};
use crate::store::{filter, from_record, to_record};
use crate::types::Agent;
use anyhow::Result;

impl Coordinator {
    /// Look up an agent by pool name.
    pub async fn get_agent(&self, name: &str) -> Result<Option<Agent>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_AGENTS),
                &filter::eq_str("name", name),
                &[],
                1,
            )
            .await?;
        Ok(rows.into_iter().next().map(from_record).transpose()?)
    }

    /// Active agent bound to a session handle.
    pub async fn get_agent_by_session(&self, session_handle: &str) -> Result<Option<Agent>> {
        if session_handle.is_empty() {
            return Ok(None);
        }
        let rows = self
            .store()
            .query(
                &self.collection(KIND_AGENTS),
                &filter::and(&[
                    filter::eq_str("session_handle", session_handle),
                    filter::eq_int("ended_at", 0),
                ]),
                &[],
                1,
            )
            .await?;
        Ok(rows.into_iter().next().map(from_record).transpose()?)
    }

    /// Agent bound to a terminal handle, ended rows included. Prefers a live
    /// binding, then the most recently started.
    pub async fn get_agent_by_terminal(&self, terminal_handle: &str) -> Result<Option<Agent>> {
        if terminal_handle.is_empty() {
            return Ok(None);
        }
        let rows = self
            .store()
            .query(
                &self.collection(KIND_AGENTS),
                &filter::eq_str("terminal_handle", terminal_handle),
                &[],
                FETCH_LIMIT,
            )
            .await?;
        let mut agents: Vec<Agent> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        agents.sort_by_key(|a| (a.is_active(), a.started_at));
        Ok(agents.pop())
    }

    /// Every registered agent, ordered by name.
    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = self
            .store()
            .query(&self.collection(KIND_AGENTS), "", &[], FETCH_LIMIT)
            .await?;
        let mut agents: Vec<Agent> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    /// Agents with no `ended_at`, ordered by name.
    pub async fn list_active(&self) -> Result<Vec<Agent>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_AGENTS),
                &filter::eq_int("ended_at", 0),
                &[],
                FETCH_LIMIT,
            )
            .await?;
        let mut agents: Vec<Agent> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    /// Write the full agent record and flush so other sessions observe it.
    pub async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let collection = self.collection(KIND_AGENTS);
        self.store()
            .upsert(&collection, vec![to_record(agent)?])
            .await?;
        self.store().flush(&collection).await?;
        Ok(())
    }

    /// Read-modify-write a single flag on the agent record.
    pub async fn set_flag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        if let Some(mut agent) = self.get_agent(name).await? {
            agent.flags.insert(key.to_string(), value.to_string());
            self.upsert_agent(&agent).await?;
        }
        Ok(())
    }

    pub async fn get_flag(&self, name: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_agent(name)
            .await?
            .and_then(|a| a.flags.get(key).cloned()))
    }

    pub async fn clear_flag(&self, name: &str, key: &str) -> Result<()> {
        if let Some(mut agent) = self.get_agent(name).await?
            && agent.flags.remove(key).is_some()
        {
            self.upsert_agent(&agent).await?;
        }
        Ok(())
    }

    /// End an agent's session: force-complete its active task rows, clear
    /// the session binding, stamp `ended_at`, park the current task in
    /// `last_task`, release every file lock the agent still holds. Returns
    /// the updated record, or None for unknown names.
    pub async fn end_session(&self, name: &str, now: i64) -> Result<Option<Agent>> {
        let Some(mut agent) = self.get_agent(name).await? else {
            return Ok(None);
        };
        // Session end can fire without a prior stop; the ended agent must not
        // keep claimed/in_progress rows on the board.
        self.force_complete_active_tasks(name, now, "session ended")
            .await?;
        agent.session_handle.clear();
        agent.ended_at = now;
        if !agent.current_task.is_empty() {
            agent.last_task = std::mem::take(&mut agent.current_task);
        }
        self.upsert_agent(&agent).await?;
        self.release_all_locks(name).await?;
        Ok(Some(agent))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Scope;
    use crate::db::{Coordinator, now_secs};
    use crate::types::Agent;

    async fn coordinator() -> (Coordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::open(dir.path()).unwrap();
        (Coordinator::in_memory(scope), dir)
    }

    mod registry_tests {
        use super::*;

        #[tokio::test]
        async fn upsert_then_get_roundtrips() {
            let (db, _dir) = coordinator().await;
            let agent = Agent::new("alfa", "tmux:%1", "sess-1", now_secs());
            db.upsert_agent(&agent).await.unwrap();
            let found = db.get_agent("alfa").await.unwrap().unwrap();
            assert_eq!(found.terminal_handle, "tmux:%1");
            assert!(found.is_active());
        }

        #[tokio::test]
        async fn list_active_excludes_ended() {
            let (db, _dir) = coordinator().await;
            let now = now_secs();
            db.upsert_agent(&Agent::new("alfa", "t1", "s1", now))
                .await
                .unwrap();
            let mut ended = Agent::new("bravo", "t2", "s2", now);
            ended.ended_at = now;
            db.upsert_agent(&ended).await.unwrap();
            let active = db.list_active().await.unwrap();
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].name, "alfa");
        }

        #[tokio::test]
        async fn terminal_lookup_prefers_live_binding() {
            let (db, _dir) = coordinator().await;
            let mut old = Agent::new("alfa", "t1", "s1", 100);
            old.ended_at = 150;
            db.upsert_agent(&old).await.unwrap();
            db.upsert_agent(&Agent::new("bravo", "t1", "s2", 200))
                .await
                .unwrap();
            let found = db.get_agent_by_terminal("t1").await.unwrap().unwrap();
            assert_eq!(found.name, "bravo");
        }

        #[tokio::test]
        async fn end_session_parks_current_task() {
            let (db, _dir) = coordinator().await;
            let mut agent = Agent::new("alfa", "t1", "s1", 100);
            agent.current_task = "refactor parser".into();
            db.upsert_agent(&agent).await.unwrap();
            let ended = db.end_session("alfa", 200).await.unwrap().unwrap();
            assert_eq!(ended.ended_at, 200);
            assert!(ended.session_handle.is_empty());
            assert!(ended.current_task.is_empty());
            assert_eq!(ended.last_task, "refactor parser");
        }

        #[tokio::test]
        async fn end_session_force_completes_active_task_rows() {
            let (db, _dir) = coordinator().await;
            db.upsert_agent(&Agent::new("alfa", "t1", "s1", 100))
                .await
                .unwrap();
            db.set_current_task("alfa", "mid-flight work").await.unwrap();

            db.end_session("alfa", 200).await.unwrap().unwrap();
            assert!(db.list_active_tasks().await.unwrap().is_empty());
            assert!(db.active_tasks_for("alfa").await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn flags_roundtrip_and_clear() {
            let (db, _dir) = coordinator().await;
            db.upsert_agent(&Agent::new("alfa", "t1", "s1", 100))
                .await
                .unwrap();
            db.set_flag("alfa", "awaiting_task", "1").await.unwrap();
            assert_eq!(
                db.get_flag("alfa", "awaiting_task")
                    .await
                    .unwrap()
                    .as_deref(),
                Some("1")
            );
            db.clear_flag("alfa", "awaiting_task").await.unwrap();
            assert_eq!(db.get_flag("alfa", "awaiting_task").await.unwrap(), None);
        }
    }
}
