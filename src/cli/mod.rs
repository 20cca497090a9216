//! CLI command definitions for crew-mcp
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use crate::hooks::HookEvent;
use clap::{Parser, Subcommand};

/// Crew coordination MCP server and lifecycle hooks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project directory to coordinate in (defaults to the current directory)
    #[arg(short, long, global = true)]
    pub project: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off (default), 2/stderr, or filename.
    /// Stdout is never an option: both serve and hook speak JSON on stdout.
    #[arg(short, long, default_value = "0", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP server (default if no subcommand given)
    Serve,

    /// Run one lifecycle hook: JSON payload on stdin, optional JSON on stdout
    Hook {
        /// Which lifecycle event fired
        #[arg(value_enum)]
        event: HookEvent,
    },

    /// Reserve a crew name ahead of a session; prints the reserved name
    Preregister,

    /// Show cached identities for this project's terminals (no store access)
    Status,
}
