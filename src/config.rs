//! Coordination scope discovery and configuration.
//!
//! A project opts into coordination by carrying a `.crew/` marker directory at
//! its root. Handlers and tools search upward from their working directory for
//! that marker; no marker means coordination is silently disabled for that
//! invocation.
//!
//! Configuration merges two tiers field-by-field, then environment overrides:
//! 1. **User** - `~/.crew/config.yaml`
//! 2. **Project** - `<project>/.crew/config.yaml`
//!
//! ## Environment Variables
//! - `CREW_STORE_URL` - Base URL of the document store
//! - `CREW_PROJECT` - Override the derived project slug
//! - `CREW_WAKE_COMMAND` - Shell template run to nudge a terminal
//! - `CREW_TERMINAL` - Override terminal handle detection

use anyhow::{Context, Result};
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Marker directory that roots a coordination scope.
pub const MARKER_DIR: &str = ".crew";

/// Fallback slug when the project directory name sanitizes to nothing.
const FALLBACK_SLUG: &str = "project";

/// Resolved configuration for one coordination scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewConfig {
    /// Base URL of the backing document store.
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Client-side timeout for individual store calls, in seconds.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    /// Messages older than this are purged by the retention sweep.
    #[serde(default = "default_retention_hours")]
    pub message_retention_hours: i64,

    /// Explicit project slug; derived from the project directory name when unset.
    #[serde(default)]
    pub project: Option<String>,

    /// Shell template run to nudge an idle terminal. `{terminal}` substitutes
    /// the full handle, `{pane}` the part after the multiplexer prefix.
    /// Unset means wakes are log-only.
    #[serde(default)]
    pub wake_command: Option<String>,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            store_timeout_secs: default_store_timeout_secs(),
            message_retention_hours: default_retention_hours(),
            project: None,
            wake_command: None,
        }
    }
}

fn default_store_url() -> String {
    "http://127.0.0.1:19530".to_string()
}

fn default_store_timeout_secs() -> u64 {
    5
}

fn default_retention_hours() -> i64 {
    24
}

/// Partial config as read from one YAML tier; merged field-by-field.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    store_url: Option<String>,
    store_timeout_secs: Option<u64>,
    message_retention_hours: Option<i64>,
    project: Option<String>,
    wake_command: Option<String>,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Overlay `other` on top of `self`; set fields in `other` win.
    fn overlay(mut self, other: ConfigFile) -> Self {
        self.store_url = other.store_url.or(self.store_url);
        self.store_timeout_secs = other.store_timeout_secs.or(self.store_timeout_secs);
        self.message_retention_hours = other
            .message_retention_hours
            .or(self.message_retention_hours);
        self.project = other.project.or(self.project);
        self.wake_command = other.wake_command.or(self.wake_command);
        self
    }

    fn into_config(self) -> CrewConfig {
        let defaults = CrewConfig::default();
        CrewConfig {
            store_url: self.store_url.unwrap_or(defaults.store_url),
            store_timeout_secs: self.store_timeout_secs.unwrap_or(defaults.store_timeout_secs),
            message_retention_hours: self
                .message_retention_hours
                .unwrap_or(defaults.message_retention_hours),
            project: self.project,
            wake_command: self.wake_command,
        }
    }
}

/// A discovered coordination scope: the marker directory, the project it
/// belongs to, and the merged configuration.
#[derive(Debug, Clone)]
pub struct Scope {
    /// The `.crew` marker directory.
    pub root: PathBuf,
    /// The directory containing the marker (the project root).
    pub project_dir: PathBuf,
    pub config: CrewConfig,
}

impl Scope {
    /// Search upward from `start` for the marker directory. Returns `None`
    /// when no ancestor carries one; callers treat that as "coordination off".
    pub fn discover(start: &Path) -> Option<Scope> {
        let mut dir = if start.is_absolute() {
            start.to_path_buf()
        } else {
            std::env::current_dir().ok()?.join(start)
        };
        loop {
            let marker = dir.join(MARKER_DIR);
            if marker.is_dir() {
                let config = load_merged_config(&marker);
                return Some(Scope {
                    root: marker,
                    project_dir: dir,
                    config,
                });
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Open a scope rooted at an explicit project directory, creating the
    /// marker if needed. Used by tests and the preregister path.
    pub fn open(project_dir: &Path) -> Result<Scope> {
        let marker = project_dir.join(MARKER_DIR);
        std::fs::create_dir_all(&marker)
            .with_context(|| format!("creating {}", marker.display()))?;
        let config = load_merged_config(&marker);
        Ok(Scope {
            root: marker,
            project_dir: project_dir.to_path_buf(),
            config,
        })
    }

    /// Sanitized project identifier used to namespace store collections.
    pub fn project_slug(&self) -> String {
        if let Some(ref explicit) = self.config.project {
            let slug = sanitize_slug(explicit);
            if !slug.is_empty() {
                return slug;
            }
        }
        let derived = self
            .project_dir
            .file_name()
            .map(|n| sanitize_slug(&n.to_string_lossy()))
            .unwrap_or_default();
        if derived.is_empty() {
            FALLBACK_SLUG.to_string()
        } else {
            derived
        }
    }

    /// Directory for per-terminal cache files.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Named mutex file serializing the wake queue processor.
    pub fn wake_lock_path(&self) -> PathBuf {
        self.root.join("wake.lock")
    }

    /// Named mutex file serializing sequence counter updates.
    pub fn seq_lock_path(&self) -> PathBuf {
        self.root.join("seq.lock")
    }
}

/// Merge user-tier and project-tier config files, then apply env overrides.
fn load_merged_config(marker: &Path) -> CrewConfig {
    let mut file = ConfigFile::default();

    if let Some(home) = dirs::home_dir() {
        let user_path = home.join(MARKER_DIR).join("config.yaml");
        if user_path.is_file() {
            match ConfigFile::load(&user_path) {
                Ok(user) => file = file.overlay(user),
                Err(e) => tracing::warn!("ignoring user config: {:#}", e),
            }
        }
    }

    let project_path = marker.join("config.yaml");
    if project_path.is_file() {
        match ConfigFile::load(&project_path) {
            Ok(project) => file = file.overlay(project),
            Err(e) => tracing::warn!("ignoring project config: {:#}", e),
        }
    }

    let mut config = file.into_config();
    if let Ok(url) = std::env::var("CREW_STORE_URL")
        && !url.is_empty()
    {
        config.store_url = url;
    }
    if let Ok(project) = std::env::var("CREW_PROJECT")
        && !project.is_empty()
    {
        config.project = Some(project);
    }
    if let Ok(cmd) = std::env::var("CREW_WAKE_COMMAND")
        && !cmd.is_empty()
    {
        config.wake_command = Some(cmd);
    }
    config
}

/// Reduce a name to a store-safe slug: snake_case, then alnum/underscore only.
/// Collection names must start with a letter or underscore.
pub fn sanitize_slug(name: &str) -> String {
    let snake = name.to_snake_case();
    let mut slug: String = snake
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("p{}", slug)
    } else {
        slug
    }
}
