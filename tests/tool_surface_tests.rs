//! Integration tests for the MCP tool surface.
//!
//! Drives `ToolHandler::call_tool` the way the server does, against the
//! in-memory store, and asserts on the rendered replies and structured errors.

use crew_mcp::config::Scope;
use crew_mcp::db::Coordinator;
use crew_mcp::error::{ErrorCode, ToolError};
use crew_mcp::tools::{DEGRADED_NOTICE, ToolHandler};
use serde_json::{Value, json};

fn setup() -> (Coordinator, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let scope = Scope::open(dir.path()).expect("Failed to open scope");
    (Coordinator::in_memory(scope), dir)
}

fn handler(db: &Coordinator, terminal: &str, session: &str) -> ToolHandler {
    ToolHandler::new(db.clone(), terminal.to_string(), session.to_string(), false)
}

fn text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => panic!("expected a text reply, got {other}"),
    }
}

mod identity_tools_tests {
    use super::*;

    #[tokio::test]
    async fn whoami_allocates_a_name_and_reports_status() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");
        let reply = text(me.call_tool("whoami", json!({})).await.unwrap());
        assert!(reply.contains("You are **alfa** on `t1`."));
        assert!(reply.contains("No task recorded"));
        assert!(reply.contains("No new messages."));
    }

    #[tokio::test]
    async fn whoami_shows_current_and_previous_task() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");
        let _ = text(me.call_tool("whoami", json!({})).await.unwrap());
        db.set_current_task("alfa", "first pass").await.unwrap();
        db.clear_current_task("alfa").await.unwrap();
        db.set_current_task("alfa", "second pass").await.unwrap();

        let reply = text(me.call_tool("whoami", json!({})).await.unwrap());
        assert!(reply.contains("Current task: second pass"));
        assert!(reply.contains("Previous task: first pass"));
    }

    #[tokio::test]
    async fn agents_lists_the_active_crew() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();
        db.resolve_identity("t2", "s2").await.unwrap();

        let any = handler(&db, "t1", "s1");
        let reply = text(any.call_tool("agents", json!({})).await.unwrap());
        assert!(reply.contains("alfa"));
        assert!(reply.contains("bravo"));
    }

    #[tokio::test]
    async fn dashboard_renders_every_section() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();
        db.set_current_task("alfa", "carving the dashboard")
            .await
            .unwrap();
        db.acquire_lock("src/lib.rs", "alfa", 100).await.unwrap();

        let me = handler(&db, "t1", "s1");
        let reply = text(me.call_tool("dashboard", json!({})).await.unwrap());
        assert!(reply.contains("# Crew Dashboard"));
        assert!(reply.contains("## Agents (1)"));
        assert!(reply.contains("## Active Tasks (1)"));
        assert!(reply.contains("## File Locks (1)"));
        assert!(reply.contains("## Recent Changes"));
        assert!(reply.contains("carving the dashboard"));
        assert!(reply.contains("src/lib.rs"));
    }
}

mod messaging_tools_tests {
    use super::*;

    #[tokio::test]
    async fn msg_then_inbox_roundtrip() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();
        db.resolve_identity("t2", "s2").await.unwrap();
        db.set_current_task("bravo", "busy elsewhere").await.unwrap();

        let alfa = handler(&db, "t1", "s1");
        let bravo = handler(&db, "t2", "s2");

        let reply = text(
            alfa.call_tool(
                "msg",
                json!({"to": "bravo", "body": "fixtures moved to tests/data"}),
            )
            .await
            .unwrap(),
        );
        assert_eq!(reply, "Sent to bravo.\n");

        let inbox = text(bravo.call_tool("inbox", json!({})).await.unwrap());
        assert!(inbox.contains("**alfa**"));
        assert!(inbox.contains("fixtures moved to tests/data"));

        let empty = text(bravo.call_tool("inbox", json!({})).await.unwrap());
        assert_eq!(empty, "No new messages.");

        let history = text(
            bravo
                .call_tool("inbox", json!({"history": true}))
                .await
                .unwrap(),
        );
        assert!(history.contains("Delivered message history."));
        assert!(history.contains("fixtures moved to tests/data"));
    }

    #[tokio::test]
    async fn urgent_messages_carry_the_marker() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();
        db.resolve_identity("t2", "s2").await.unwrap();
        db.set_current_task("bravo", "busy").await.unwrap();

        let alfa = handler(&db, "t1", "s1");
        let bravo = handler(&db, "t2", "s2");
        alfa.call_tool(
            "msg",
            json!({"to": "bravo", "body": "drop everything", "priority": "urgent"}),
        )
        .await
        .unwrap();

        let inbox = text(bravo.call_tool("inbox", json!({})).await.unwrap());
        assert!(inbox.contains("!!! "));
    }

    #[tokio::test]
    async fn broadcast_reports_the_recipient_count() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();
        db.resolve_identity("t2", "s2").await.unwrap();
        db.resolve_identity("t3", "s3").await.unwrap();
        db.set_current_task("bravo", "busy").await.unwrap();
        db.set_current_task("charlie", "busy").await.unwrap();

        let alfa = handler(&db, "t1", "s1");
        let reply = text(
            alfa.call_tool("msg", json!({"to": "all", "body": "standup in five"}))
                .await
                .unwrap(),
        );
        assert!(reply.contains("Broadcast to 2 agent(s)"));
        assert!(reply.contains("bravo"));
        assert!(reply.contains("charlie"));
    }

    #[tokio::test]
    async fn broadcast_with_no_crewmates_sends_nothing() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();

        let alfa = handler(&db, "t1", "s1");
        let reply = text(
            alfa.call_tool("msg", json!({"to": "all", "body": "anyone?"}))
                .await
                .unwrap(),
        );
        assert_eq!(reply, "No other active agents; nothing sent.\n");
    }

    #[tokio::test]
    async fn idle_recipient_wake_is_drained_inline() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();
        db.resolve_identity("t2", "s2").await.unwrap();

        let alfa = handler(&db, "t1", "s1");
        let reply = text(
            alfa.call_tool("msg", json!({"to": "bravo", "body": "ping"}))
                .await
                .unwrap(),
        );
        assert!(reply.contains("Sent to bravo."));
        assert!(reply.contains("Wake requested for 1 idle recipient(s)"));
        assert!(reply.contains("1 nudge(s) sent"));
        assert!(db.pending_wakes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_recipient_names_the_roster() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();

        let alfa = handler(&db, "t1", "s1");
        let err = alfa
            .call_tool("msg", json!({"to": "zulu", "body": "hello?"}))
            .await
            .unwrap_err();
        let tool_err = err.downcast::<ToolError>().unwrap();
        assert_eq!(tool_err.code, ErrorCode::UnknownRecipient);
        assert!(tool_err.message.contains("active agents: alfa"));
    }

    #[tokio::test]
    async fn missing_body_is_reported_with_the_field() {
        let (db, _dir) = setup();
        db.resolve_identity("t1", "s1").await.unwrap();

        let alfa = handler(&db, "t1", "s1");
        let err = alfa
            .call_tool("msg", json!({"to": "all"}))
            .await
            .unwrap_err();
        let tool_err = err.downcast::<ToolError>().unwrap();
        assert_eq!(tool_err.code, ErrorCode::MissingRequiredField);
        assert_eq!(tool_err.field.as_deref(), Some("body"));
    }
}

mod task_tools_tests {
    use super::*;

    #[tokio::test]
    async fn task_set_then_clear_round_trip() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");

        let reply = text(
            me.call_tool("task_set", json!({"task": "wire the importer"}))
                .await
                .unwrap(),
        );
        assert!(reply.contains("Task recorded: wire the importer"));

        let reply = text(
            me.call_tool("task_set", json!({"task": "rework the importer"}))
                .await
                .unwrap(),
        );
        assert!(reply.contains("Superseded 1 earlier task(s)."));

        let reply = text(me.call_tool("task_clear", json!({})).await.unwrap());
        assert!(reply.starts_with("Done: rework the importer"));

        let reply = text(me.call_tool("task_clear", json!({})).await.unwrap());
        assert_eq!(reply, "No active task to clear.");
    }

    #[tokio::test]
    async fn blank_task_text_is_rejected() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");
        let err = me
            .call_tool("task_set", json!({"task": "   "}))
            .await
            .unwrap_err();
        let tool_err = err.downcast::<ToolError>().unwrap();
        assert_eq!(tool_err.code, ErrorCode::InvalidFieldValue);
        assert_eq!(tool_err.field.as_deref(), Some("task"));
    }

    #[tokio::test]
    async fn changes_shows_the_task_lifecycle() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");
        me.call_tool("task_set", json!({"task": "index rebuild"}))
            .await
            .unwrap();
        me.call_tool("task_clear", json!({})).await.unwrap();

        let reply = text(me.call_tool("changes", json!({})).await.unwrap());
        assert!(reply.contains("# Recent Changes"));
        assert!(reply.contains("started: index rebuild"));
        assert!(reply.contains("finished: index rebuild"));
    }
}

mod surface_tests {
    use super::*;

    #[tokio::test]
    async fn every_advertised_tool_dispatches() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");
        for tool in me.get_tools() {
            let result = me.call_tool(tool.name.as_ref(), json!({})).await;
            if let Err(e) = result {
                let tool_err = e.downcast::<ToolError>().unwrap();
                assert_ne!(
                    tool_err.code,
                    ErrorCode::UnknownTool,
                    "advertised tool {} is not dispatchable",
                    tool.name
                );
            }
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_error() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");
        let err = me
            .call_tool("frobnicate", json!({}))
            .await
            .unwrap_err();
        let tool_err = err.downcast::<ToolError>().unwrap();
        assert_eq!(tool_err.code, ErrorCode::UnknownTool);
    }

    #[tokio::test]
    async fn help_walks_the_working_loop() {
        let (db, _dir) = setup();
        let me = handler(&db, "t1", "s1");
        let reply = text(me.call_tool("help", json!({})).await.unwrap());
        assert!(reply.contains("whoami"));
        assert!(reply.contains("task_set"));
        assert!(reply.contains("msg"));
    }
}

mod degraded_tests {
    use super::*;

    #[tokio::test]
    async fn degraded_handler_answers_not_available_everywhere() {
        let (db, _dir) = setup();
        let me = ToolHandler::new(db.clone(), "t1".to_string(), "s1".to_string(), true);
        assert!(DEGRADED_NOTICE.contains("not available"));
        for tool in me.get_tools() {
            let reply = text(me.call_tool(tool.name.as_ref(), json!({})).await.unwrap());
            assert_eq!(reply, DEGRADED_NOTICE);
        }
        let reply = text(me.call_tool("frobnicate", json!({})).await.unwrap());
        assert_eq!(reply, DEGRADED_NOTICE);
    }

    #[tokio::test]
    async fn degraded_handler_touches_no_state() {
        let (db, _dir) = setup();
        let me = ToolHandler::new(db.clone(), "t1".to_string(), "s1".to_string(), true);
        me.call_tool("whoami", json!({})).await.unwrap();
        assert!(db.list_agents().await.unwrap().is_empty());
    }
}
