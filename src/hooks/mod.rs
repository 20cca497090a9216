//! Session lifecycle handlers.
//!
//! Each handler is one short-lived process: JSON payload on stdin, optional
//! JSON control message on stdout, exit 0. Handlers piggyback on the host's
//! own lifecycle events; they must never fail the action that triggered them.
//! No scope marker, an unreachable store, or any coordination error all
//! degrade to a silent no-op.

pub mod handlers;

use crate::config::Scope;
use crate::db::Coordinator;
use crate::terminal::detect_handle;
use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookEvent {
    /// A new agent session opened.
    SessionStart,
    /// The host is about to run a tool.
    PreTool,
    /// The host finished running a tool.
    PostTool,
    /// The agent went idle.
    Stop,
    /// The session is closing.
    SessionEnd,
}

/// Payload the host pipes to a handler. Unknown fields are ignored; missing
/// ones default so a sparse payload still parses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: ToolInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub file_path: String,
}

/// Control message a handler may emit: context for the agent, and for
/// pre-tool a permission decision. Empty output prints nothing.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HookOutput {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Some("deny".to_string()),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.decision.is_none() && self.reason.is_none()
    }
}

/// Entry point for `crew-mcp hook <event>`: read stdin, dispatch, print.
/// Every failure path is a logged no-op; the host action proceeds.
pub async fn run(event: HookEvent) -> Result<()> {
    let mut raw = String::new();
    if std::io::stdin().read_to_string(&mut raw).is_err() {
        tracing::debug!("hook stdin unreadable, skipping");
        return Ok(());
    }
    let input: HookInput = match serde_json::from_str(&raw) {
        Ok(input) => input,
        Err(e) => {
            tracing::debug!("hook payload unparseable, skipping: {e}");
            return Ok(());
        }
    };

    let start = if input.cwd.is_empty() {
        std::env::current_dir().unwrap_or_default()
    } else {
        input.cwd.clone().into()
    };
    let Some(scope) = Scope::discover(&start) else {
        tracing::debug!("no coordination scope above {}, skipping", start.display());
        return Ok(());
    };
    let db = match Coordinator::connect(scope) {
        Ok(db) => db,
        Err(e) => {
            tracing::debug!("store client unavailable, skipping: {e:#}");
            return Ok(());
        }
    };

    let terminal = detect_handle().unwrap_or_default();
    let output = dispatch_silent(event, &db, &terminal, &input).await;
    if !output.is_empty() {
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}

/// Dispatch with the handler-boundary swallow applied: coordination trouble
/// never blocks the host action, it degrades to an empty output.
pub async fn dispatch_silent(
    event: HookEvent,
    db: &Coordinator,
    terminal: &str,
    input: &HookInput,
) -> HookOutput {
    match dispatch(event, db, terminal, input).await {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("hook {:?} degraded to no-op: {e:#}", event);
            HookOutput::default()
        }
    }
}

pub async fn dispatch(
    event: HookEvent,
    db: &Coordinator,
    terminal: &str,
    input: &HookInput,
) -> Result<HookOutput> {
    match event {
        HookEvent::SessionStart => handlers::session_start(db, terminal, input).await,
        HookEvent::PreTool => handlers::pre_tool(db, terminal, input).await,
        HookEvent::PostTool => handlers::post_tool(db, terminal, input).await,
        HookEvent::Stop => handlers::stop(db, terminal, input).await,
        HookEvent::SessionEnd => handlers::session_end(db, terminal, input).await,
    }
}
