//! MCP tool implementations.

pub mod agents;
pub mod help;
pub mod messages;
pub mod tasks;

use crate::db::Coordinator;
use crate::db::wake::{Nudge, nudge_for};
use crate::error::ToolError;
use crate::types::Agent;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::Value;

/// Text every tool answers with while the store is unreachable.
pub const DEGRADED_NOTICE: &str =
    "The coordination store is not available. Crew coordination is offline; \
     continue working without it.";

/// Tool handler that processes MCP tool calls.
///
/// The terminal and session handles are captured once at server startup;
/// MCP callers never pass identity arguments.
pub struct ToolHandler {
    pub db: Coordinator,
    pub terminal_handle: String,
    pub session_handle: String,
    pub degraded: bool,
    nudge: Box<dyn Nudge>,
}

impl ToolHandler {
    pub fn new(
        db: Coordinator,
        terminal_handle: String,
        session_handle: String,
        degraded: bool,
    ) -> Self {
        let nudge = nudge_for(&db.scope().config);
        Self {
            db,
            terminal_handle,
            session_handle,
            degraded,
            nudge,
        }
    }

    /// Get all available tools.
    pub fn get_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();

        // Identity and overview tools
        tools.extend(agents::get_tools());

        // Messaging tools
        tools.extend(messages::get_tools());

        // Task tools
        tools.extend(tasks::get_tools());

        // Help
        tools.extend(help::get_tools());

        tools
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if self.degraded {
            return Ok(Value::String(DEGRADED_NOTICE.to_string()));
        }

        match name {
            // Identity and overview tools
            "whoami" => agents::whoami(self).await,
            "agents" => agents::agents(&self.db).await,
            "dashboard" => agents::dashboard(&self.db).await,

            // Messaging tools
            "msg" => messages::msg(self, arguments).await,
            "inbox" => messages::inbox(self, arguments).await,

            // Task tools
            "task_set" => tasks::task_set(self, arguments).await,
            "task_clear" => tasks::task_clear(self).await,
            "changes" => tasks::changes(&self.db, arguments).await,

            "help" => help::help(),

            _ => Err(ToolError::unknown_tool(name).into()),
        }
    }

    /// Resolve the calling agent from the handles captured at startup.
    pub(crate) async fn caller(&self) -> Result<Agent> {
        self.db
            .resolve_identity(&self.terminal_handle, &self.session_handle)
            .await
    }

    pub(crate) fn nudge(&self) -> &dyn Nudge {
        self.nudge.as_ref()
    }
}

/// Helper to create a tool definition.
pub fn make_tool(name: &str, description: &str, properties: Value, required: Vec<&str>) -> Tool {
    let input_schema = rmcp::model::JsonObject::from_iter([
        ("type".to_string(), serde_json::json!("object")),
        ("properties".to_string(), properties),
        ("required".to_string(), serde_json::json!(required)),
    ]);

    Tool::new(name.to_string(), description.to_string(), input_schema)
}

/// Helper to get a string from arguments.
pub fn get_string(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str().map(String::from))
}

/// Helper to get an i64 from arguments.
pub fn get_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

/// Helper to get a bool from arguments.
pub fn get_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}
