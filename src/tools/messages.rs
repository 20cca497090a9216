//! Crew messaging tools.

use super::{ToolHandler, get_bool, get_i64, get_string, make_tool};
use crate::db::messages::BROADCAST_TARGET;
use crate::db::now_secs;
use crate::error::ToolError;
use crate::format::format_messages_markdown;
use crate::types::Priority;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{Value, json};

const DEFAULT_HISTORY_LIMIT: i64 = 20;

pub fn get_tools() -> Vec<Tool> {
    vec![
        make_tool(
            "msg",
            "Send a message to another crew agent, or to 'all' for a broadcast. Idle recipients get a wake nudge.",
            json!({
                "to": {
                    "type": "string",
                    "description": "Recipient agent name, or 'all' to broadcast to every active agent except yourself."
                },
                "body": {
                    "type": "string",
                    "description": "The message text."
                },
                "priority": {
                    "type": "string",
                    "enum": ["urgent", "high", "normal"],
                    "description": "Delivery priority (default: normal). Urgent messages are marked '!!!' in inboxes."
                }
            }),
            vec!["to", "body"],
        ),
        make_tool(
            "inbox",
            "Read your pending messages and mark them delivered. Pass history=true to re-read already-delivered messages.",
            json!({
                "history": {
                    "type": "boolean",
                    "description": "Show already-delivered messages instead of pending ones (default: false)."
                },
                "limit": {
                    "type": "integer",
                    "description": "How many history entries to show (default: 20). Ignored for pending messages."
                }
            }),
            vec![],
        ),
    ]
}

pub async fn msg(handler: &ToolHandler, args: Value) -> Result<Value> {
    let to = get_string(&args, "to").ok_or_else(|| ToolError::missing_field("to"))?;
    let body = get_string(&args, "body").ok_or_else(|| ToolError::missing_field("body"))?;
    let priority = get_string(&args, "priority")
        .map(|p| Priority::parse(&p))
        .unwrap_or_default();

    let sender = handler.caller().await?;
    let outcome = handler
        .db
        .send_message(&sender.name, &to, &body, priority)
        .await?;

    let mut md = String::new();
    if outcome.recipients.is_empty() {
        md.push_str("No other active agents; nothing sent.\n");
        return Ok(Value::String(md));
    }

    if to == BROADCAST_TARGET {
        md.push_str(&format!(
            "Broadcast to {} agent(s): {}.\n",
            outcome.recipients.len(),
            outcome.recipients.join(", ")
        ));
    } else {
        md.push_str(&format!("Sent to {}.\n", outcome.recipients.join(", ")));
    }

    if !outcome.wake_requested.is_empty() {
        let nudged = handler.db.process_wake_queue_once(handler.nudge()).await?;
        md.push_str(&format!(
            "Wake requested for {} idle recipient(s)",
            outcome.wake_requested.len()
        ));
        if nudged > 0 {
            md.push_str(&format!("; {} nudge(s) sent", nudged));
        }
        md.push_str(".\n");
    }

    Ok(Value::String(md))
}

pub async fn inbox(handler: &ToolHandler, args: Value) -> Result<Value> {
    let history = get_bool(&args, "history").unwrap_or(false);
    let agent = handler.caller().await?;
    let now = now_secs();

    if history {
        let limit = get_i64(&args, "limit").unwrap_or(DEFAULT_HISTORY_LIMIT).max(1) as usize;
        let delivered = handler.db.delivered_messages(&agent.name, limit).await?;
        if delivered.is_empty() {
            return Ok(Value::String("No delivered messages.".to_string()));
        }
        let mut md = String::from("Delivered message history.\n\n");
        md.push_str(&format_messages_markdown(&delivered, now));
        return Ok(Value::String(md));
    }

    let pending = handler.db.pending_messages(&agent.name).await?;
    if pending.is_empty() {
        return Ok(Value::String("No new messages.".to_string()));
    }
    let ids: Vec<String> = pending.iter().map(|m| m.id.clone()).collect();
    handler.db.mark_delivered(&ids, now).await?;

    Ok(Value::String(format_messages_markdown(&pending, now)))
}
