//! mcp-tool-server: MCP server exposing built-in tools over stdio or HTTP/SSE
//!
//! Reads an optional JSON configuration file, applies CLI overrides and runs
//! the selected transport until end of input or a shutdown signal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_tool_server::config::{self, Config, TransportMode};
use mcp_tool_server::mcp::transport::{shutdown_signal, HttpTransport, SseTransport, StdioTransport};
use mcp_tool_server::mcp::McpServer;
use mcp_tool_server::tools::builtin_tools;

/// MCP server exposing a registry of tools over JSON-RPC 2.0.
///
/// Speaks newline-delimited JSON on stdin/stdout by default, or serves an
/// HTTP endpoint with SSE sessions.
#[derive(Parser, Debug)]
#[command(name = "mcp-tool-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve (overrides the configuration file)
    #[arg(short, long, value_enum)]
    transport: Option<TransportMode>,

    /// HTTP listen address, e.g. 127.0.0.1:3000 (implies --transport http)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Maximum concurrently open SSE sessions
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    max_sessions: Option<u32>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, cfg: &mut Config) {
        if let Some(bind) = self.bind {
            cfg.http.bind_address = bind.to_string();
            cfg.transport.mode = TransportMode::Http;
        }
        if let Some(mode) = self.transport {
            cfg.transport.mode = mode;
        }
        if let Some(max) = self.max_sessions {
            cfg.sse.max_sessions = usize::try_from(max).unwrap_or(usize::MAX);
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries protocol frames in stdio mode.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_server(cfg: &Config) -> Result<McpServer, mcp_tool_server::error::RegistryError> {
    let mut builder = McpServer::builder()
        .name(cfg.server.name.clone())
        .tools(builtin_tools());
    if let Some(instructions) = &cfg.server.instructions {
        builder = builder.instructions(instructions.clone());
    }
    builder.build()
}

async fn run_stdio(server: McpServer, cfg: &Config) -> std::io::Result<()> {
    info!("MCP server ready on stdio, waiting for client connection...");

    let dispatcher = server.dispatcher();
    StdioTransport::stdio()
        .with_delimiter(cfg.stdio.delimiter.clone())
        .with_max_message_bytes(cfg.stdio.max_message_bytes)
        .serve(&dispatcher, shutdown_signal())
        .await?;
    Ok(())
}

async fn run_http(server: McpServer, cfg: &Config) -> std::io::Result<()> {
    let addr = cfg
        .http
        .socket_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let sse = SseTransport::new(server.clone(), cfg.sse.options(&cfg.http));
    let sweeper = cfg
        .sse
        .idle_timeout()
        .map(|max_idle| sse.spawn_idle_sweeper(max_idle));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = HttpTransport::new(server, cfg.http.options())
        .with_sse(&sse)
        .serve(listener, shutdown_signal())
        .await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    sse.destroy();
    result
}

/// Entry point for the mcp-tool-server binary.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig read from: {}", default_path.display());
                    eprintln!("Compare with config/example-config.json");
                }
            }
            return ExitCode::FAILURE;
        }
    };

    args.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cfg.transport.mode,
        "Starting mcp-tool-server"
    );

    let server = match build_server(&cfg) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to build server");
            return ExitCode::FAILURE;
        }
    };

    info!(tools = ?server.registry().names().collect::<Vec<_>>(), "Tools registered");

    // Run the server
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match cfg.transport.mode {
            TransportMode::Stdio => run_stdio(server, &cfg).await,
            TransportMode::Http => run_http(server, &cfg).await,
        }
    });

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
