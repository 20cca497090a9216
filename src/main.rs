//! Crew MCP Server
//!
//! A Rust MCP server coordinating multiple agent sessions working in the
//! same repository, backed by a shared document store.

use anyhow::Result;
use clap::Parser;
use crew_mcp::cache;
use crew_mcp::cli::{Cli, Command};
use crew_mcp::config::{MARKER_DIR, Scope};
use crew_mcp::db::{Coordinator, now_secs};
use crew_mcp::error::ToolError;
use crew_mcp::format::format_elapsed;
use crew_mcp::hooks;
use crew_mcp::terminal::detect_handle;
use crew_mcp::tools::ToolHandler;
use rmcp::{
    ErrorData, RoleServer, ServerHandler, ServiceExt,
    model::{
        CallToolRequestParams, CallToolResult, Content, InitializeResult, ListToolsResult,
        PaginatedRequestParams, ServerCapabilities,
    },
    service::RequestContext,
    transport::io::stdio,
};
use serde_json::{Value, json};
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How often the retention sweep runs while the server is up.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

const INSTRUCTIONS: &str = "\
Crew coordination for agents sharing a repository. Start: whoami \u{2192} \
task_set(\"what you are doing\") \u{2192} work \u{2192} task_clear(). \
Use msg to reach the others, help for the full guide.";

/// MCP server handler.
#[derive(Clone)]
struct CrewServer {
    tools: Arc<ToolHandler>,
}

impl ServerHandler for CrewServer {
    fn get_info(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: Default::default(),
            server_info: rmcp::model::Implementation {
                name: "crew-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            capabilities: ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability::default()),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.tools.get_tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        let tool_name = request.name.clone();
        let start = std::time::Instant::now();

        let args = Value::Object(request.arguments.unwrap_or_default());
        match self.tools.call_tool(&tool_name, args).await {
            Ok(result) => {
                let elapsed = start.elapsed();
                debug!(tool = %tool_name, duration_ms = elapsed.as_millis() as u64, "Tool call succeeded");

                let text = match result {
                    Value::String(s) => s,
                    other => serde_json::to_string_pretty(&other).unwrap_or_default(),
                };
                Ok(CallToolResult {
                    content: vec![Content::text(text)],
                    is_error: None,
                    meta: None,
                    structured_content: None,
                })
            }
            Err(e) => {
                let elapsed = start.elapsed();
                // Try to downcast to ToolError for structured response
                let error_json = match e.downcast::<ToolError>() {
                    Ok(tool_err) => {
                        warn!(
                            tool = %tool_name,
                            error_code = ?tool_err.code,
                            error_message = %tool_err.message,
                            duration_ms = elapsed.as_millis() as u64,
                            "Tool call failed"
                        );
                        serde_json::to_string(&tool_err).unwrap_or_else(|_| {
                            json!({ "error": tool_err.to_string() }).to_string()
                        })
                    }
                    Err(e) => {
                        warn!(
                            tool = %tool_name,
                            error = %e,
                            duration_ms = elapsed.as_millis() as u64,
                            "Tool call failed with internal error"
                        );
                        json!({
                            "code": "INTERNAL_ERROR",
                            "message": e.to_string()
                        })
                        .to_string()
                    }
                };
                Ok(CallToolResult {
                    content: vec![Content::text(error_json)],
                    is_error: Some(true),
                    meta: None,
                    structured_content: None,
                })
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, cli.verbose)?;

    let project_dir = match &cli.project {
        Some(p) => PathBuf::from(p),
        None => std::env::current_dir()?,
    };

    match cli.command {
        Some(Command::Hook { event }) => hooks::run(event).await,
        Some(Command::Preregister) => run_preregister(&project_dir).await,
        Some(Command::Status) => run_status(&project_dir),
        Some(Command::Serve) | None => run_server(&project_dir).await,
    }
}

/// Initialize logging based on the --log option. Stdout is deliberately not
/// offered: it carries MCP frames under `serve` and hook JSON under `hook`.
fn init_logging(log: &str, verbose: bool) -> Result<()> {
    match log {
        "0" | "off" => {
            // No logging
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(verbose))
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new().create(true).append(true).open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(verbose))
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Run the MCP server
async fn run_server(project_dir: &Path) -> Result<()> {
    let scope = Scope::open(project_dir)?;

    info!("Starting Crew MCP Server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Project: {} ({})",
        scope.project_slug(),
        scope.project_dir.display()
    );
    info!("Store: {}", scope.config.store_url);

    let db = Coordinator::connect(scope)?;

    // One cheap read decides whether this process serves real coordination
    // or degraded no-op responses.
    let degraded = match db.probe().await {
        Ok(()) => false,
        Err(e) => {
            warn!("Store probe failed ({}); serving in degraded mode", e);
            true
        }
    };

    let terminal_handle = detect_handle().unwrap_or_default();
    let session_handle = std::env::var("CREW_SESSION").unwrap_or_default();
    if terminal_handle.is_empty() {
        debug!("No terminal handle detected; identity will rely on session matching");
    }

    let tools = Arc::new(ToolHandler::new(
        db.clone(),
        terminal_handle,
        session_handle,
        degraded,
    ));

    if !degraded {
        spawn_retention_sweep(db);
    }

    let server = CrewServer { tools };

    // Run the stdio server
    info!("Server ready, listening on stdio");
    let transport = stdio();
    let service = server.serve(transport).await?;
    service.waiting().await?;

    Ok(())
}

/// Periodically purge messages past the retention window. The first tick
/// fires immediately, so stale rows from before this server started are
/// swept without waiting an hour.
fn spawn_retention_sweep(db: Coordinator) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match db.sweep_expired_messages(now_secs()).await {
                Ok(0) => {}
                Ok(n) => info!("Retention sweep purged {} message(s)", n),
                Err(e) => debug!("Retention sweep failed: {:#}", e),
            }
        }
    });
}

/// Reserve a pool name before any session starts and print it, so wrapper
/// scripts can hand an agent its identity up front.
async fn run_preregister(project_dir: &Path) -> Result<()> {
    let scope = Scope::open(project_dir)?;
    let db = Coordinator::connect(scope)?;
    let agent = db.preregister_agent().await?;
    println!("{}", agent.name);
    Ok(())
}

/// Print cached identities for this project's terminals. Reads only the
/// local cache files, so it works with the store down.
fn run_status(project_dir: &Path) -> Result<()> {
    let Some(scope) = Scope::discover(project_dir) else {
        println!("No coordination scope here (no {} marker).", MARKER_DIR);
        return Ok(());
    };

    let entries = cache::list_identities(&scope);
    if entries.is_empty() {
        println!("No cached identities for {}.", scope.project_slug());
        return Ok(());
    }

    let here = detect_handle().unwrap_or_default();
    let now = now_secs();
    for entry in entries {
        let marker = if !here.is_empty() && entry.terminal_handle == here {
            "*"
        } else {
            " "
        };
        let doing = if entry.current_task.is_empty() {
            "idle".to_string()
        } else {
            format!("doing: {}", entry.current_task)
        };
        println!(
            "{} {:<10} {:<16} {} (updated {} ago)",
            marker,
            entry.name,
            entry.terminal_handle,
            doing,
            format_elapsed(now - entry.updated_at),
        );
    }
    Ok(())
}
