//! Core types shared across the coordination subsystems.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The fixed ordered pool of agent codenames. Names are allocated in this
/// order and reused only when the prior holder can no longer reclaim them
/// through its terminal.
pub const NAME_POOL: [&str; 26] = [
    "alfa", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliett",
    "kilo", "lima", "mike", "november", "oscar", "papa", "quebec", "romeo", "sierra", "tango",
    "uniform", "victor", "whiskey", "xray", "yankee", "zulu",
];

/// Session handles with this prefix mark agents pre-registered out-of-band,
/// before their real session handle is known. The identity resolver adopts
/// and rebinds them.
pub const PENDING_SESSION_PREFIX: &str = "pending-";

/// Flag key set when an agent went idle and must record a task before its
/// next file edit.
pub const FLAG_AWAITING_TASK: &str = "awaiting_task";

/// One coordination participant, bound to a terminal and (while live) a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Short codename, primary key. Drawn from [`NAME_POOL`] unless the pool
    /// was exhausted.
    pub name: String,
    /// Current session handle; empty once the session has ended.
    #[serde(default)]
    pub session_handle: String,
    /// Terminal handle, stable across session handle changes. May be empty
    /// for agents registered without terminal context.
    #[serde(default)]
    pub terminal_handle: String,
    pub started_at: i64,
    /// 0 while the agent is live.
    #[serde(default)]
    pub ended_at: i64,
    #[serde(default)]
    pub current_task: String,
    #[serde(default)]
    pub last_task: String,
    /// Ephemeral per-agent flags, e.g. `awaiting_task`.
    #[serde(default)]
    pub flags: HashMap<String, String>,
}

impl Agent {
    /// A fresh agent record bound to the given terminal/session.
    pub fn new(name: &str, terminal: &str, session: &str, now: i64) -> Self {
        Self {
            name: name.to_string(),
            session_handle: session.to_string(),
            terminal_handle: terminal.to_string(),
            started_at: now,
            ended_at: 0,
            current_task: String::new(),
            last_task: String::new(),
            flags: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at == 0
    }

    /// Idle means live but without a current task; messages to idle agents
    /// trigger a wake attempt.
    pub fn is_idle(&self) -> bool {
        self.is_active() && self.current_task.is_empty()
    }

    /// True while the record is a placeholder from out-of-band pre-registration.
    pub fn is_pending(&self) -> bool {
        self.session_handle.starts_with(PENDING_SESSION_PREFIX)
    }
}

/// Message priority. Order matters for rendering (urgent first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }

    /// Lenient parse; unrecognized values fall back to normal.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "urgent" => Priority::Urgent,
            "high" => Priority::High,
            _ => Priority::Normal,
        }
    }
}

/// A message in an agent's inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub body: String,
    pub priority: Priority,
    pub created_at: i64,
    /// 0 until the recipient's pending-message check ran.
    #[serde(default)]
    pub delivered_at: i64,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.delivered_at == 0
    }
}

/// Advisory claim on a file path. Never blocks an edit, only warns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    /// Relative file path, primary key.
    pub file_path: String,
    pub agent_name: String,
    pub locked_at: i64,
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Claimed,
    InProgress,
    Review,
    Done,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Claimed => "claimed",
            TaskState::InProgress => "in_progress",
            TaskState::Review => "review",
            TaskState::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "claimed" => Some(TaskState::Claimed),
            "in_progress" => Some(TaskState::InProgress),
            "review" => Some(TaskState::Review),
            "done" => Some(TaskState::Done),
            _ => None,
        }
    }

    /// Active states count against the one-live-task-per-agent invariant.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Claimed | TaskState::InProgress)
    }
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Primary key, `task-<seq_id>`.
    pub id: String,
    pub seq_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: TaskState,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub parent_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub claimed_at: i64,
    #[serde(default)]
    pub completed_at: i64,
    #[serde(default)]
    pub rejection_note: String,
}

/// A queued request to nudge an idle agent's terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeRequest {
    pub id: String,
    pub terminal_handle: String,
    pub created_at: i64,
}

/// One changelog entry, for the recent-changes view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Primary key, `chg-<seq_id>`.
    pub id: String,
    pub seq_id: i64,
    pub agent: String,
    pub summary: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_pool_has_26_unique_tokens() {
        let mut seen = std::collections::HashSet::new();
        for name in NAME_POOL {
            assert!(seen.insert(name), "duplicate pool name: {}", name);
        }
        assert_eq!(seen.len(), 26);
    }

    #[test]
    fn priority_parse_is_lenient() {
        assert_eq!(Priority::parse("URGENT"), Priority::Urgent);
        assert_eq!(Priority::parse("high"), Priority::High);
        assert_eq!(Priority::parse("whatever"), Priority::Normal);
    }

    #[test]
    fn task_state_roundtrip() {
        for state in [
            TaskState::Pending,
            TaskState::Claimed,
            TaskState::InProgress,
            TaskState::Review,
            TaskState::Done,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::parse("bogus"), None);
    }

    #[test]
    fn idle_means_active_without_task() {
        let mut agent = Agent::new("alfa", "tmux:%1", "sess-1", 1000);
        assert!(agent.is_idle());
        agent.current_task = "refactor parser".to_string();
        assert!(!agent.is_idle());
        agent.current_task.clear();
        agent.ended_at = 2000;
        assert!(!agent.is_idle());
    }
}
