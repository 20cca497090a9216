//! Coordination layer over the shared document store.

pub mod agents;
pub mod changelog;
pub mod identity;
pub mod locks;
pub mod messages;
pub mod sequence;
pub mod tasks;
pub mod wake;

use crate::config::Scope;
use crate::error::StoreError;
use crate::store::{HttpStore, MemStore, Store};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Collection kinds; full names are `crew_<project>__<kind>`.
pub const KIND_AGENTS: &str = "agents";
pub const KIND_MESSAGES: &str = "messages";
pub const KIND_FILE_LOCKS: &str = "file_locks";
pub const KIND_TASKS: &str = "tasks";
pub const KIND_WAKE_QUEUE: &str = "wake_queue";
pub const KIND_SEQUENCES: &str = "sequences";
pub const KIND_CHANGELOG: &str = "changelog";

/// Upper bound on any single fetch. The store cannot sort or aggregate, so
/// readers pull bounded sets and order client-side.
pub const FETCH_LIMIT: usize = 1024;

/// Handle to one project's coordination state.
#[derive(Clone)]
pub struct Coordinator {
    store: Store,
    scope: Scope,
}

impl Coordinator {
    /// Connect to the HTTP store named by the scope's config.
    pub fn connect(scope: Scope) -> Result<Self> {
        let http = HttpStore::new(
            &scope.config.store_url,
            Duration::from_secs(scope.config.store_timeout_secs),
        )?;
        Ok(Self {
            store: Store::new(Arc::new(http)),
            scope,
        })
    }

    /// Back the coordinator with an in-memory store (for testing).
    pub fn in_memory(scope: Scope) -> Self {
        let mem = Self::register_keys(MemStore::new(), &scope);
        Self {
            store: Store::new(Arc::new(mem)),
            scope,
        }
    }

    /// Like [`Coordinator::in_memory`], but hands back the fake for fault
    /// injection (for testing).
    pub fn in_memory_with_handle(scope: Scope) -> (Self, Arc<MemStore>) {
        let mem = Arc::new(Self::register_keys(MemStore::new(), &scope));
        (
            Self {
                store: Store::new(mem.clone()),
                scope,
            },
            mem,
        )
    }

    fn register_keys(mem: MemStore, scope: &Scope) -> MemStore {
        let slug = scope.project_slug();
        let name = |kind: &str| format!("crew_{slug}__{kind}");
        mem.with_primary_key(&name(KIND_AGENTS), "name")
            .with_primary_key(&name(KIND_FILE_LOCKS), "file_path")
            .with_primary_key(&name(KIND_SEQUENCES), "name")
    }

    /// Full store collection name for a kind within this project.
    pub fn collection(&self, kind: &str) -> String {
        format!("crew_{}__{}", self.scope.project_slug(), kind)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// One bounded read against the agents collection. Failure with an
    /// unavailable error means coordination should degrade to no-ops.
    pub async fn probe(&self) -> Result<(), StoreError> {
        self.store.probe(&self.collection(KIND_AGENTS)).await
    }
}

/// Current timestamp in whole seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
