//! Task lifecycle operations.
//!
//! States run pending → claimed → in_progress → review → done, with direct
//! jumps into in_progress and done permitted. The enforced invariant is
//! narrower: at most one claimed/in_progress task per agent, maintained by
//! force-completing whatever was active when a new task starts.
//!
//! `rejection_note` doubles as the abnormal-completion note on tasks closed
//! by force rather than by their assignee.

use crate::db::{Coordinator, FETCH_LIMIT, KIND_TASKS, now_secs};
use crate::format::format_elapsed;
use crate::store::{filter, from_record, to_record};
use crate::types::{FLAG_AWAITING_TASK, Task, TaskState};
use anyhow::Result;

/// Sequence counter backing task ids.
const TASK_SEQ: &str = "tasks";

/// Result of `set_current_task`.
#[derive(Debug)]
pub struct TaskChange {
    pub task: Task,
    pub superseded: Vec<Task>,
}

/// Result of `clear_current_task`.
#[derive(Debug)]
pub struct ClearOutcome {
    /// The task text the agent was carrying.
    pub cleared: String,
    /// Time since the earliest surviving claim, when one existed.
    pub elapsed: Option<String>,
    pub completed: Vec<Task>,
}

impl Coordinator {
    /// Create a task. `claimed_at` is stamped when the initial state is
    /// already active.
    pub async fn create_task(
        &self,
        title: &str,
        description: &str,
        assignee: &str,
        state: TaskState,
    ) -> Result<Task> {
        let seq_id = self.next_seq(TASK_SEQ).await?;
        let now = now_secs();
        let task = Task {
            id: format!("task-{seq_id}"),
            seq_id,
            title: title.to_string(),
            description: description.to_string(),
            state,
            assignee: assignee.to_string(),
            depends_on: Vec::new(),
            parent_id: String::new(),
            created_at: now,
            claimed_at: if state.is_active() { now } else { 0 },
            completed_at: 0,
            rejection_note: String::new(),
        };
        let collection = self.collection(KIND_TASKS);
        self.store()
            .upsert(&collection, vec![to_record(&task)?])
            .await?;
        self.store().flush(&collection).await?;
        Ok(task)
    }

    /// Tasks currently claimed or in progress by `agent`.
    pub async fn active_tasks_for(&self, agent: &str) -> Result<Vec<Task>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_TASKS),
                &format!(
                    "{} and ({} or {})",
                    filter::eq_str("assignee", agent),
                    filter::eq_str("state", "claimed"),
                    filter::eq_str("state", "in_progress"),
                ),
                &[],
                FETCH_LIMIT,
            )
            .await?;
        let mut tasks: Vec<Task> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        tasks.sort_by_key(|t| t.seq_id);
        Ok(tasks)
    }

    /// Every claimed/in_progress task, ordered by seq id.
    pub async fn list_active_tasks(&self) -> Result<Vec<Task>> {
        let rows = self
            .store()
            .query(
                &self.collection(KIND_TASKS),
                &format!(
                    "({} or {})",
                    filter::eq_str("state", "claimed"),
                    filter::eq_str("state", "in_progress"),
                ),
                &[],
                FETCH_LIMIT,
            )
            .await?;
        let mut tasks: Vec<Task> = rows
            .into_iter()
            .map(from_record)
            .collect::<Result<_, _>>()?;
        tasks.sort_by_key(|t| t.seq_id);
        Ok(tasks)
    }

    /// Mark every active task of `agent` done, stamping `completed_at` and
    /// the closing note. Returns the tasks as completed.
    pub async fn force_complete_active_tasks(
        &self,
        agent: &str,
        now: i64,
        note: &str,
    ) -> Result<Vec<Task>> {
        let mut tasks = self.active_tasks_for(agent).await?;
        if tasks.is_empty() {
            return Ok(tasks);
        }
        let collection = self.collection(KIND_TASKS);
        for task in &mut tasks {
            task.state = TaskState::Done;
            task.completed_at = now;
            task.rejection_note = note.to_string();
            self.store()
                .upsert(&collection, vec![to_record(task)?])
                .await?;
        }
        self.store().flush(&collection).await?;
        tracing::debug!(agent, count = tasks.len(), "force-completed active tasks");
        Ok(tasks)
    }

    /// Start a new current task for `agent`: whatever was active is
    /// force-completed first, the agent record and terminal cache are
    /// updated, and a changelog entry is written.
    pub async fn set_current_task(&self, agent_name: &str, text: &str) -> Result<TaskChange> {
        let now = now_secs();
        let superseded = self
            .force_complete_active_tasks(agent_name, now, "superseded")
            .await?;
        let title = first_line(text);
        let task = self
            .create_task(&title, text, agent_name, TaskState::InProgress)
            .await?;

        if let Some(mut agent) = self.get_agent(agent_name).await? {
            if !agent.current_task.is_empty() {
                agent.last_task = agent.current_task.clone();
            }
            agent.current_task = text.to_string();
            agent.flags.remove(FLAG_AWAITING_TASK);
            self.upsert_agent(&agent).await?;
            self.refresh_cache(&agent, now);
        }
        self.record_change(agent_name, &format!("started: {title}"))
            .await?;
        Ok(TaskChange { task, superseded })
    }

    /// Close out the agent's current task. Elapsed time runs from the
    /// earliest claim among the tasks completed here.
    pub async fn clear_current_task(&self, agent_name: &str) -> Result<ClearOutcome> {
        let now = now_secs();
        let completed = self
            .force_complete_active_tasks(agent_name, now, "cleared")
            .await?;
        let elapsed = completed
            .iter()
            .filter(|t| t.claimed_at > 0)
            .map(|t| t.claimed_at)
            .min()
            .map(|claimed| format_elapsed(now - claimed));

        let mut cleared = String::new();
        if let Some(mut agent) = self.get_agent(agent_name).await? {
            cleared = agent.current_task.clone();
            if !agent.current_task.is_empty() {
                agent.last_task = std::mem::take(&mut agent.current_task);
                self.upsert_agent(&agent).await?;
                self.refresh_cache(&agent, now);
            }
        }
        if !cleared.is_empty() {
            let summary = match &elapsed {
                Some(e) => format!("finished: {} ({e})", first_line(&cleared)),
                None => format!("finished: {}", first_line(&cleared)),
            };
            self.record_change(agent_name, &summary).await?;
        }
        Ok(ClearOutcome {
            cleared,
            elapsed,
            completed,
        })
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.len() > 80 {
        let mut cut = 80;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &line[..cut])
    } else {
        line.to_string()
    }
}
