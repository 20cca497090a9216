//! Identity and crew overview tools.

use super::{ToolHandler, make_tool};
use crate::db::{Coordinator, now_secs};
use crate::format::{format_agents_markdown, format_dashboard_markdown, format_messages_markdown};
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{Value, json};

/// How many changelog entries the dashboard shows.
const DASHBOARD_CHANGES: usize = 10;

pub fn get_tools() -> Vec<Tool> {
    vec![
        make_tool(
            "whoami",
            "Who you are on this crew: name, terminal, current task, plus any waiting messages (they are marked delivered).",
            json!({}),
            vec![],
        ),
        make_tool(
            "agents",
            "List active crew agents and what each one is working on.",
            json!({}),
            vec![],
        ),
        make_tool(
            "dashboard",
            "Project overview: active agents, tasks in flight, file locks, and recent changes.",
            json!({}),
            vec![],
        ),
    ]
}

pub async fn whoami(handler: &ToolHandler) -> Result<Value> {
    let agent = handler.caller().await?;
    let now = now_secs();

    let pending = handler.db.pending_messages(&agent.name).await?;
    if !pending.is_empty() {
        let ids: Vec<String> = pending.iter().map(|m| m.id.clone()).collect();
        handler.db.mark_delivered(&ids, now).await?;
    }

    let mut md = String::new();
    md.push_str(&format!(
        "You are **{}** on `{}`.\n",
        agent.name, agent.terminal_handle
    ));
    if agent.current_task.is_empty() {
        md.push_str("No task recorded; call task_set before editing files.\n");
    } else {
        md.push_str(&format!("Current task: {}\n", agent.current_task));
    }
    if !agent.last_task.is_empty() {
        md.push_str(&format!("Previous task: {}\n", agent.last_task));
    }
    md.push('\n');
    if pending.is_empty() {
        md.push_str("No new messages.\n");
    } else {
        md.push_str(&format_messages_markdown(&pending, now));
    }

    Ok(Value::String(md))
}

pub async fn agents(db: &Coordinator) -> Result<Value> {
    let agents = db.list_active().await?;
    Ok(Value::String(format_agents_markdown(&agents, now_secs())))
}

pub async fn dashboard(db: &Coordinator) -> Result<Value> {
    let agents = db.list_active().await?;
    let tasks = db.list_active_tasks().await?;
    let locks = db.list_locks().await?;
    let changes = db.recent_changes(DASHBOARD_CHANGES).await?;

    Ok(Value::String(format_dashboard_markdown(
        &agents,
        &tasks,
        &locks,
        &changes,
        now_secs(),
    )))
}
