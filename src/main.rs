//! gandalf: local MCP server for project context and conversation recall.
//!
//! Usage:
//!   gandalf --mcp                  # Start MCP server on stdin/stdout
//!   gandalf info --stats           # Project info from the terminal
//!   gandalf files --types .rs      # Relevance-ranked file listing
//!   gandalf recall --limit 20      # Recent conversations
//!   gandalf search "cache layer"   # Search conversation history

use anyhow::Context;
use clap::{Parser, Subcommand};
use gandalf::server::{GandalfServer, ServerContext};
use gandalf::{fmt, tools};
use rmcp::ServiceExt;
use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gandalf")]
#[command(about = "Project context and conversation recall for AI coding assistants")]
#[command(version)]
struct Cli {
    /// Run as MCP server (stdin/stdout JSON-RPC)
    #[arg(long)]
    mcp: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active project and its git state
    Info {
        /// Include file counts by extension
        #[arg(short, long)]
        stats: bool,
    },

    /// List project files ranked by relevance
    Files {
        /// Extension filters, e.g. --types .rs --types .py
        #[arg(short, long = "types")]
        types: Vec<String>,

        /// Maximum files to list
        #[arg(short, long)]
        max: Option<i64>,

        /// Plain sorted listing instead of relevance ranking
        #[arg(long)]
        no_scoring: bool,
    },

    /// Recall recent conversations across assistants
    Recall {
        /// Maximum conversations
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Lookback window in days (0 = all)
        #[arg(short, long)]
        days: Option<i64>,

        /// Headers only, skip message bodies
        #[arg(long)]
        fast: bool,
    },

    /// Search conversation history
    Search {
        /// Substring to find (case-insensitive)
        query: String,

        /// Maximum matches
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Also scan message bodies
        #[arg(short, long)]
        content: bool,
    },
}

fn init_tracing(home: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(
        "gandalf=info"
            .parse()
            .expect("static tracing directive"),
    );

    // CRITICAL: Log to stderr only (stdout is JSON-RPC for MCP)
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if gandalf::env_truthy("MCP_DEBUG") {
        let logs = home.join("logs");
        if let Err(e) = std::fs::create_dir_all(&logs) {
            eprintln!("gandalf: cannot create log directory: {e}");
        }
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file_name = format!("gandalf_session_{}_{stamp}.log", std::process::id());
        let appender = tracing_appender::rolling::never(logs, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let home = gandalf::gandalf_home();
    let _log_guard = init_tracing(&home);

    let ctx = ServerContext::bootstrap(home).context("gandalf startup failed")?;

    if cli.mcp {
        run_mcp_server(ctx).await
    } else if let Some(cmd) = cli.command {
        run_cli(ctx, cmd)
    } else {
        eprintln!("Use --mcp to start the MCP server, or a subcommand for CLI mode.");
        eprintln!("Run with --help for more information.");
        std::process::exit(1);
    }
}

async fn run_mcp_server(ctx: ServerContext) -> anyhow::Result<()> {
    tracing::info!(project = %ctx.project.path.display(), "Starting MCP server");

    let server = GandalfServer::new(ctx);
    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

fn run_cli(ctx: ServerContext, cmd: Commands) -> anyhow::Result<()> {
    let color = std::io::stdout().is_terminal();
    let mut out = std::io::stdout().lock();

    match cmd {
        Commands::Info { stats } => {
            let result = tools::execute_project_info(
                &ctx.project,
                &ctx.cache,
                &ctx.weights,
                tools::ProjectInfoInput {
                    include_stats: stats,
                },
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            fmt::fmt_info(&mut out, &result, color)?;
        }

        Commands::Files {
            types,
            max,
            no_scoring,
        } => {
            let result = tools::execute_list_files(
                &ctx.project,
                &ctx.cache,
                &ctx.weights,
                "",
                tools::ListFilesInput {
                    file_types: types,
                    max_files: max,
                    use_relevance_scoring: !no_scoring,
                    include_hidden: true,
                },
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            fmt::fmt_files(&mut out, &result, color)?;
        }

        Commands::Recall { limit, days, fast } => {
            let result = tools::execute_recall(
                &ctx.aggregator,
                &ctx.weights,
                tools::RecallInput {
                    fast_mode: fast,
                    days_lookback: days,
                    limit: Some(limit),
                    workspace_filter: None,
                },
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            fmt::fmt_recall(&mut out, &result, color)?;
        }

        Commands::Search {
            query,
            limit,
            content,
        } => {
            let result = tools::execute_search(
                &ctx.aggregator,
                tools::SearchInput {
                    query,
                    limit: Some(limit),
                    include_content: content,
                    format: tools::TextFormat::Json,
                },
            )
            .map_err(|e| anyhow::anyhow!(e))?;
            fmt::fmt_search(&mut out, &result, color)?;
        }
    }

    Ok(())
}
