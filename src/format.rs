//! Output formatting utilities for markdown and hook payload text.

use crate::types::{Agent, ChangeEntry, FileLock, Message, Priority, Task};

/// Render a duration in whole seconds: `42s`, `3m 12s`, `1h 4m`.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn ago(now: i64, then: i64) -> String {
    format!("{} ago", format_elapsed(now - then))
}

fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent => "!!! ",
        Priority::High => "! ",
        Priority::Normal => "",
    }
}

/// Format the active agent roster as markdown.
pub fn format_agents_markdown(agents: &[Agent], now: i64) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Agents ({})\n\n", agents.len()));
    for agent in agents {
        md.push_str(&format_agent_short(agent, now));
    }
    if agents.is_empty() {
        md.push_str("No active agents.\n");
    }
    md
}

fn format_agent_short(agent: &Agent, now: i64) -> String {
    if agent.is_pending() {
        return format!("- **{}** (pre-registered, awaiting session)\n", agent.name);
    }
    let doing = if !agent.current_task.is_empty() {
        format!(" doing: {}", agent.current_task)
    } else if !agent.last_task.is_empty() {
        format!(" idle, last: {}", agent.last_task)
    } else {
        " idle".to_string()
    };
    let terminal = if agent.terminal_handle.is_empty() {
        String::new()
    } else {
        format!(" `{}`", agent.terminal_handle)
    };
    format!(
        "- **{}**{} ({}) -{}\n",
        agent.name,
        terminal,
        ago(now, agent.started_at),
        doing,
    )
}

/// Format an inbox as markdown, oldest first.
pub fn format_messages_markdown(messages: &[Message], now: i64) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Inbox ({})\n\n", messages.len()));
    if messages.is_empty() {
        md.push_str("No messages.\n");
        return md;
    }
    for message in messages {
        md.push_str(&format!(
            "- {}**{}** ({}): {}\n",
            priority_marker(message.priority),
            message.from_agent,
            ago(now, message.created_at),
            message.body,
        ));
    }
    md
}

/// Format recent changelog entries as markdown, newest first.
pub fn format_changes_markdown(entries: &[ChangeEntry], now: i64) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Recent Changes ({})\n\n", entries.len()));
    if entries.is_empty() {
        md.push_str("No recorded changes.\n");
        return md;
    }
    for entry in entries {
        md.push_str(&format!(
            "- `{}` **{}**: {} ({})\n",
            entry.id,
            entry.agent,
            entry.summary,
            ago(now, entry.created_at),
        ));
    }
    md
}

/// The combined project view: agents, active tasks, locks, recent changes.
pub fn format_dashboard_markdown(
    agents: &[Agent],
    tasks: &[Task],
    locks: &[FileLock],
    changes: &[ChangeEntry],
    now: i64,
) -> String {
    let mut md = String::new();
    md.push_str("# Crew Dashboard\n\n");

    md.push_str(&format!("## Agents ({})\n\n", agents.len()));
    for agent in agents {
        md.push_str(&format_agent_short(agent, now));
    }
    if agents.is_empty() {
        md.push_str("No active agents.\n");
    }
    md.push('\n');

    md.push_str(&format!("## Active Tasks ({})\n\n", tasks.len()));
    for task in tasks {
        let assignee = if task.assignee.is_empty() {
            String::new()
        } else {
            format!(" @{}", task.assignee)
        };
        let claimed = if task.claimed_at > 0 {
            format!(" (claimed {})", ago(now, task.claimed_at))
        } else {
            String::new()
        };
        md.push_str(&format!(
            "- `{}` {}{}{}\n",
            task.id, task.title, assignee, claimed
        ));
    }
    if tasks.is_empty() {
        md.push_str("No active tasks.\n");
    }
    md.push('\n');

    md.push_str(&format!("## File Locks ({})\n\n", locks.len()));
    for lock in locks {
        md.push_str(&format!(
            "- `{}` held by **{}** ({})\n",
            lock.file_path,
            lock.agent_name,
            ago(now, lock.locked_at),
        ));
    }
    if locks.is_empty() {
        md.push_str("No files locked.\n");
    }
    md.push('\n');

    md.push_str(&format!("## Recent Changes ({})\n\n", changes.len()));
    for entry in changes {
        md.push_str(&format!(
            "- **{}**: {} ({})\n",
            entry.agent,
            entry.summary,
            ago(now, entry.created_at),
        ));
    }
    if changes.is_empty() {
        md.push_str("Nothing recorded yet.\n");
    }

    md
}

/// Compact plain-text digest injected into hook payloads when messages are
/// waiting. One line per message so terminal context stays readable.
pub fn inbox_note(name: &str, messages: &[Message]) -> String {
    let mut note = format!(
        "You are agent '{}'. {} message(s) from your crew:\n",
        name,
        messages.len()
    );
    for message in messages {
        let tag = match message.priority {
            Priority::Urgent => "[urgent] ",
            Priority::High => "[high] ",
            Priority::Normal => "",
        };
        note.push_str(&format!("- {}{}: {}\n", tag, message.from_agent, message.body));
    }
    note
}
