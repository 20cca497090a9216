//! Terminal-local identity cache.
//!
//! One JSON file per terminal under `<scope>/cache/`, refreshed whenever
//! identity is resolved or the current task changes. `crew-mcp status` reads
//! it without touching the store, so a prompt line can render instantly.

use crate::config::Scope;
use crate::terminal::sanitize_handle;
use crate::types::Agent;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedIdentity {
    pub name: String,
    pub terminal_handle: String,
    pub session_handle: String,
    pub current_task: String,
    pub updated_at: i64,
}

impl CachedIdentity {
    pub fn from_agent(agent: &Agent, updated_at: i64) -> Self {
        Self {
            name: agent.name.clone(),
            terminal_handle: agent.terminal_handle.clone(),
            session_handle: agent.session_handle.clone(),
            current_task: agent.current_task.clone(),
            updated_at,
        }
    }
}

fn cache_path(scope: &Scope, terminal_handle: &str) -> std::path::PathBuf {
    scope
        .cache_dir()
        .join(format!("{}.json", sanitize_handle(terminal_handle)))
}

/// Write the cache entry for a terminal. Failures are the caller's to ignore;
/// the cache is advisory.
pub fn write_identity(scope: &Scope, terminal_handle: &str, entry: &CachedIdentity) -> Result<()> {
    let dir = scope.cache_dir();
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = cache_path(scope, terminal_handle);
    let body = serde_json::to_string_pretty(entry)?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Read the cache entry for a terminal, `None` when absent or unreadable.
pub fn read_identity(scope: &Scope, terminal_handle: &str) -> Option<CachedIdentity> {
    let path = cache_path(scope, terminal_handle);
    let body = fs::read_to_string(path).ok()?;
    serde_json::from_str(&body).ok()
}

/// Every cached identity in the scope, sorted by name. Unreadable entries are
/// skipped.
pub fn list_identities(scope: &Scope) -> Vec<CachedIdentity> {
    let Ok(entries) = fs::read_dir(scope.cache_dir()) else {
        return Vec::new();
    };
    let mut identities: Vec<CachedIdentity> = entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| {
            let body = fs::read_to_string(e.path()).ok()?;
            serde_json::from_str(&body).ok()
        })
        .collect();
    identities.sort_by(|a, b| a.name.cmp(&b.name));
    identities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_secs;

    #[test]
    fn roundtrips_through_the_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::open(dir.path()).unwrap();
        let agent = Agent::new("alfa", "tmux:%5", "sess-1", 100);
        let entry = CachedIdentity::from_agent(&agent, now_secs());
        write_identity(&scope, "tmux:%5", &entry).unwrap();
        let read = read_identity(&scope, "tmux:%5").unwrap();
        assert_eq!(read.name, "alfa");
        assert_eq!(read.session_handle, "sess-1");
    }

    #[test]
    fn missing_entry_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::open(dir.path()).unwrap();
        assert!(read_identity(&scope, "tmux:%9").is_none());
    }

    #[test]
    fn lists_every_cached_identity_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::open(dir.path()).unwrap();
        let now = now_secs();
        for (name, term) in [("bravo", "tmux:%2"), ("alfa", "tmux:%1")] {
            let agent = Agent::new(name, term, "sess", 100);
            write_identity(&scope, term, &CachedIdentity::from_agent(&agent, now)).unwrap();
        }
        let all = list_identities(&scope);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alfa");
        assert_eq!(all[1].name, "bravo");
    }
}
