//! Crew MCP Server Library
//!
//! This module exports the core components for testing and integration.

pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod flock;
pub mod format;
pub mod hooks;
pub mod store;
pub mod terminal;
pub mod tools;
pub mod types;
