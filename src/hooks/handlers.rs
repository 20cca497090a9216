//! Handler logic per lifecycle event, separated from process IO so tests can
//! drive it against an in-memory store.

use crate::config::Scope;
use crate::db::{Coordinator, now_secs};
use crate::format::{format_elapsed, inbox_note};
use crate::hooks::{HookInput, HookOutput};
use crate::types::{Agent, FLAG_AWAITING_TASK};
use anyhow::Result;
use std::path::Path;

/// Host tools that modify files; only these get the lock/gate treatment.
const FILE_EDIT_TOOLS: [&str; 4] = ["Edit", "Write", "MultiEdit", "NotebookEdit"];

fn is_file_edit(tool_name: &str) -> bool {
    FILE_EDIT_TOOLS.contains(&tool_name)
}

/// Lock keys are project-relative so every session agrees on them.
fn relative_to_project(scope: &Scope, path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute()
        && let Ok(rel) = p.strip_prefix(&scope.project_dir)
    {
        return rel.to_string_lossy().into_owned();
    }
    path.trim_start_matches("./").to_string()
}

/// Find the calling agent without registering one. Handlers past session
/// start must not allocate identities.
async fn lookup(db: &Coordinator, terminal: &str, session: &str) -> Result<Option<Agent>> {
    if let Some(agent) = db.get_agent_by_session(session).await? {
        return Ok(Some(agent));
    }
    // Handle-less callers resolve under the shared fallback terminal.
    let terminal = if terminal.is_empty() && session.is_empty() {
        crate::db::identity::UNKNOWN_TERMINAL
    } else {
        terminal
    };
    if let Some(agent) = db.get_agent_by_terminal(terminal).await?
        && agent.is_active()
    {
        return Ok(Some(agent));
    }
    Ok(None)
}

/// Fetch, render, and mark the agent's undelivered messages.
async fn deliver_pending(db: &Coordinator, name: &str) -> Result<Option<String>> {
    let pending = db.pending_messages(name).await?;
    if pending.is_empty() {
        return Ok(None);
    }
    let ids: Vec<String> = pending.iter().map(|m| m.id.clone()).collect();
    db.mark_delivered(&ids, now_secs()).await?;
    Ok(Some(inbox_note(name, &pending)))
}

pub async fn session_start(
    db: &Coordinator,
    terminal: &str,
    input: &HookInput,
) -> Result<HookOutput> {
    let agent = db.resolve_identity(terminal, &input.session_id).await?;
    if let Err(e) = db.sweep_expired_messages(now_secs()).await {
        tracing::debug!("retention sweep skipped: {e:#}");
    }
    db.record_change(&agent.name, "session started").await?;

    let text = match deliver_pending(db, &agent.name).await? {
        Some(note) => note,
        None => {
            let mut line = format!("You are agent '{}' on this project.", agent.name);
            if !agent.current_task.is_empty() {
                line.push_str(&format!(" Resuming task: {}", agent.current_task));
            } else if !agent.last_task.is_empty() {
                line.push_str(&format!(" Your last task was: {}", agent.last_task));
            }
            line
        }
    };
    Ok(HookOutput::message(text))
}

pub async fn pre_tool(db: &Coordinator, terminal: &str, input: &HookInput) -> Result<HookOutput> {
    let agent = db.resolve_identity(terminal, &input.session_id).await?;
    let now = now_secs();
    let mut notes: Vec<String> = Vec::new();
    if let Some(note) = deliver_pending(db, &agent.name).await? {
        notes.push(note);
    }

    if is_file_edit(&input.tool_name) && !input.tool_input.file_path.is_empty() {
        if agent.flags.contains_key(FLAG_AWAITING_TASK) {
            let mut out = HookOutput::deny(format!(
                "You ({}) have no recorded task. Call task_set with a short description \
                 of what you're about to do, then retry this edit.",
                agent.name
            ));
            if !notes.is_empty() {
                out.message = Some(notes.join("\n"));
            }
            return Ok(out);
        }

        let rel = relative_to_project(db.scope(), &input.tool_input.file_path);
        if let Some(lock) = db.get_lock(&rel).await?
            && lock.agent_name != agent.name
        {
            notes.push(format!(
                "Heads up: `{}` is also being edited by {} (locked {} ago). \
                 Consider messaging them before making conflicting changes.",
                rel,
                lock.agent_name,
                format_elapsed(now - lock.locked_at),
            ));
        }
        db.acquire_lock(&rel, &agent.name, now).await?;
    }

    if notes.is_empty() {
        Ok(HookOutput::default())
    } else {
        Ok(HookOutput::message(notes.join("\n")))
    }
}

pub async fn post_tool(db: &Coordinator, terminal: &str, input: &HookInput) -> Result<HookOutput> {
    if !is_file_edit(&input.tool_name) || input.tool_input.file_path.is_empty() {
        return Ok(HookOutput::default());
    }
    let Some(agent) = lookup(db, terminal, &input.session_id).await? else {
        return Ok(HookOutput::default());
    };
    let rel = relative_to_project(db.scope(), &input.tool_input.file_path);
    db.release_lock(&rel, &agent.name).await?;
    Ok(HookOutput::default())
}

pub async fn stop(db: &Coordinator, terminal: &str, input: &HookInput) -> Result<HookOutput> {
    let Some(agent) = lookup(db, terminal, &input.session_id).await? else {
        return Ok(HookOutput::default());
    };
    db.clear_current_task(&agent.name).await?;
    db.set_flag(&agent.name, FLAG_AWAITING_TASK, "1").await?;
    Ok(HookOutput::default())
}

pub async fn session_end(
    db: &Coordinator,
    terminal: &str,
    input: &HookInput,
) -> Result<HookOutput> {
    let Some(agent) = lookup(db, terminal, &input.session_id).await? else {
        return Ok(HookOutput::default());
    };
    db.end_session(&agent.name, now_secs()).await?;
    db.record_change(&agent.name, "session ended").await?;
    Ok(HookOutput::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit_input(session: &str, path: &str) -> HookInput {
        HookInput {
            cwd: String::new(),
            session_id: session.to_string(),
            tool_name: "Edit".to_string(),
            tool_input: crate::hooks::ToolInput {
                file_path: path.to_string(),
            },
        }
    }

    async fn coordinator() -> (Coordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::open(dir.path()).unwrap();
        (Coordinator::in_memory(scope), dir)
    }

    mod gate_tests {
        use super::*;

        #[tokio::test]
        async fn edit_denied_while_awaiting_task() {
            let (db, _dir) = coordinator().await;
            let agent = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_flag(&agent.name, FLAG_AWAITING_TASK, "1")
                .await
                .unwrap();

            let out = pre_tool(&db, "t1", &edit_input("s1", "src/main.rs"))
                .await
                .unwrap();
            assert_eq!(out.decision.as_deref(), Some("deny"));
            assert!(out.reason.unwrap().contains("task_set"));
            // Denied edits must not leave a lock behind.
            assert!(db.get_lock("src/main.rs").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn edit_allowed_and_locked_once_task_is_set() {
            let (db, _dir) = coordinator().await;
            let agent = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_current_task(&agent.name, "wiring the parser")
                .await
                .unwrap();

            let out = pre_tool(&db, "t1", &edit_input("s1", "src/main.rs"))
                .await
                .unwrap();
            assert!(out.decision.is_none());
            let lock = db.get_lock("src/main.rs").await.unwrap().unwrap();
            assert_eq!(lock.agent_name, agent.name);
        }

        #[tokio::test]
        async fn non_edit_tools_bypass_the_gate() {
            let (db, _dir) = coordinator().await;
            let agent = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_flag(&agent.name, FLAG_AWAITING_TASK, "1")
                .await
                .unwrap();

            let mut input = edit_input("s1", "");
            input.tool_name = "Read".to_string();
            input.tool_input.file_path = "src/main.rs".to_string();
            let out = pre_tool(&db, "t1", &input).await.unwrap();
            assert!(out.decision.is_none());
        }
    }

    mod lock_flow_tests {
        use super::*;

        #[tokio::test]
        async fn conflicting_lock_warns_but_proceeds() {
            let (db, _dir) = coordinator().await;
            let alfa = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_current_task(&alfa.name, "task a").await.unwrap();
            pre_tool(&db, "t1", &edit_input("s1", "src/lib.rs"))
                .await
                .unwrap();

            let bravo = db.resolve_identity("t2", "s2").await.unwrap();
            db.set_current_task(&bravo.name, "task b").await.unwrap();
            let out = pre_tool(&db, "t2", &edit_input("s2", "src/lib.rs"))
                .await
                .unwrap();
            assert!(out.decision.is_none());
            let note = out.message.unwrap();
            assert!(note.contains("src/lib.rs"));
            assert!(note.contains(&alfa.name));
            // Takeover recorded.
            let lock = db.get_lock("src/lib.rs").await.unwrap().unwrap();
            assert_eq!(lock.agent_name, bravo.name);
        }

        #[tokio::test]
        async fn post_tool_releases_the_editors_lock() {
            let (db, _dir) = coordinator().await;
            let agent = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_current_task(&agent.name, "task").await.unwrap();
            pre_tool(&db, "t1", &edit_input("s1", "src/lib.rs"))
                .await
                .unwrap();
            post_tool(&db, "t1", &edit_input("s1", "src/lib.rs"))
                .await
                .unwrap();
            assert!(db.get_lock("src/lib.rs").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn absolute_paths_are_stored_project_relative() {
            let (db, dir) = coordinator().await;
            let agent = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_current_task(&agent.name, "task").await.unwrap();
            let abs = dir.path().join("src/deep/mod.rs");
            pre_tool(&db, "t1", &edit_input("s1", abs.to_str().unwrap()))
                .await
                .unwrap();
            assert!(db.get_lock("src/deep/mod.rs").await.unwrap().is_some());
        }
    }

    mod idle_tests {
        use super::*;

        #[tokio::test]
        async fn stop_parks_the_task_and_sets_the_gate() {
            let (db, _dir) = coordinator().await;
            let agent = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_current_task(&agent.name, "long migration")
                .await
                .unwrap();

            stop(&db, "t1", &HookInput {
                session_id: "s1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

            let updated = db.get_agent(&agent.name).await.unwrap().unwrap();
            assert!(updated.current_task.is_empty());
            assert_eq!(updated.last_task, "long migration");
            assert!(updated.flags.contains_key(FLAG_AWAITING_TASK));
            assert!(db.list_active_tasks().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn session_end_releases_locks_and_logs() {
            let (db, _dir) = coordinator().await;
            let agent = db.resolve_identity("t1", "s1").await.unwrap();
            db.set_current_task(&agent.name, "task").await.unwrap();
            pre_tool(&db, "t1", &edit_input("s1", "a.rs")).await.unwrap();

            session_end(&db, "t1", &HookInput {
                session_id: "s1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

            let ended = db.get_agent(&agent.name).await.unwrap().unwrap();
            assert!(!ended.is_active());
            assert!(db.get_lock("a.rs").await.unwrap().is_none());
            // No stop fired before session end; the task row must still close.
            assert!(db.list_active_tasks().await.unwrap().is_empty());
            let changes = db.recent_changes(5).await.unwrap();
            assert!(changes.iter().any(|c| c.summary == "session ended"));
        }
    }

    mod delivery_tests {
        use super::*;
        use crate::types::Priority;

        #[tokio::test]
        async fn pre_tool_delivers_pending_messages() {
            let (db, _dir) = coordinator().await;
            let alfa = db.resolve_identity("t1", "s1").await.unwrap();
            let bravo = db.resolve_identity("t2", "s2").await.unwrap();
            db.send_message(&alfa.name, &bravo.name, "lunch?", Priority::Normal)
                .await
                .unwrap();

            let mut input = HookInput {
                session_id: "s2".into(),
                ..Default::default()
            };
            input.tool_name = "Bash".into();
            let out = pre_tool(&db, "t2", &input).await.unwrap();
            assert!(out.message.unwrap().contains("lunch?"));
            assert!(db.pending_messages(&bravo.name).await.unwrap().is_empty());

            // Second invocation: nothing new, no noise.
            let out = pre_tool(&db, "t2", &input).await.unwrap();
            assert!(out.message.is_none());
        }
    }
}
