//! Task recording tools.

use super::{ToolHandler, get_i64, get_string, make_tool};
use crate::db::{Coordinator, now_secs};
use crate::error::ToolError;
use crate::format::format_changes_markdown;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{Value, json};

const DEFAULT_CHANGES_LIMIT: i64 = 20;

pub fn get_tools() -> Vec<Tool> {
    vec![
        make_tool(
            "task_set",
            "Record what you are working on. Call this before editing files; it also closes out any earlier task you had open.",
            json!({
                "task": {
                    "type": "string",
                    "description": "What you are doing, in a sentence. The first line becomes the task title."
                }
            }),
            vec!["task"],
        ),
        make_tool(
            "task_clear",
            "Mark your current task finished. Reports how long it took.",
            json!({}),
            vec![],
        ),
        make_tool(
            "changes",
            "Recent crew changelog: who started and finished what.",
            json!({
                "limit": {
                    "type": "integer",
                    "description": "How many entries to show (default: 20)."
                }
            }),
            vec![],
        ),
    ]
}

pub async fn task_set(handler: &ToolHandler, args: Value) -> Result<Value> {
    let text = get_string(&args, "task").ok_or_else(|| ToolError::missing_field("task"))?;
    if text.trim().is_empty() {
        return Err(ToolError::invalid_value("task", "must not be empty").into());
    }

    let agent = handler.caller().await?;
    let change = handler.db.set_current_task(&agent.name, &text).await?;

    let mut md = format!(
        "Task recorded: {} (`{}`).\n",
        change.task.title, change.task.id
    );
    if !change.superseded.is_empty() {
        md.push_str(&format!(
            "Superseded {} earlier task(s).\n",
            change.superseded.len()
        ));
    }

    Ok(Value::String(md))
}

pub async fn task_clear(handler: &ToolHandler) -> Result<Value> {
    let agent = handler.caller().await?;
    let outcome = handler.db.clear_current_task(&agent.name).await?;

    if outcome.cleared.is_empty() && outcome.completed.is_empty() {
        return Ok(Value::String("No active task to clear.".to_string()));
    }

    let mut md = String::new();
    if outcome.cleared.is_empty() {
        md.push_str(&format!(
            "Closed {} open task(s).\n",
            outcome.completed.len()
        ));
    } else {
        match &outcome.elapsed {
            Some(elapsed) => md.push_str(&format!("Done: {} ({}).\n", outcome.cleared, elapsed)),
            None => md.push_str(&format!("Done: {}.\n", outcome.cleared)),
        }
    }

    Ok(Value::String(md))
}

pub async fn changes(db: &Coordinator, args: Value) -> Result<Value> {
    let limit = get_i64(&args, "limit")
        .unwrap_or(DEFAULT_CHANGES_LIMIT)
        .max(1) as usize;
    let entries = db.recent_changes(limit).await?;

    Ok(Value::String(format_changes_markdown(&entries, now_secs())))
}
