//! Static help text.

use super::make_tool;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{Value, json};

const HELP_TEXT: &str = "\
# Crew coordination

You share this project with other agents. The crew tools keep everyone
aware of who is doing what.

Workflow:
1. `whoami` - confirm your crew name and read any waiting messages.
2. `task_set` - record what you are about to work on. File edits are
   held up until a task is recorded.
3. Edit files. Locks are advisory: you get a warning when someone else
   is in the same file, never a block.
4. `task_clear` - mark the task finished when you are done.

Talking to the crew:
- `msg` sends to one agent by name, or to 'all' for a broadcast.
  Idle recipients get a terminal nudge.
- `inbox` reads pending messages; messages also arrive automatically
  before your next tool use.
- `agents` and `dashboard` show who is active and what is in flight.
- `changes` lists the recent start/finish log.

Names come from a fixed radio-alphabet pool (alfa, bravo, ...) and stick
to your terminal, so the same pane keeps the same name across sessions.";

pub fn get_tools() -> Vec<Tool> {
    vec![make_tool(
        "help",
        "How the crew tools fit together.",
        json!({}),
        vec![],
    )]
}

pub fn help() -> Result<Value> {
    Ok(Value::String(HELP_TEXT.to_string()))
}
