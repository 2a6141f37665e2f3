// Binary crate for emergent-mcp - uses library crate

use anyhow::Context;
use clap::{Parser, Subcommand};
use emergent_mcp::client::{ProcessConnector, ToolClient};
use emergent_mcp::config::Config;
use emergent_mcp::operations::file_manager::FileManager;
use emergent_mcp::server::{run_server, McpServer};
use emergent_mcp::tools::ToolRegistry;
use emergent_mcp::transport::StdioTransport;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "emergent-mcp")]
#[command(about = "Agent tool server with transactional file edits")]
#[command(
    long_about = "emergent-mcp exposes file, command, git and test tools to a calling agent over stdio JSON-RPC.\n\nUsage:\n  emergent-mcp serve\n  emergent-mcp call write_code --args '{\"filePath\":\"a.txt\",\"content\":\"hi\"}'\n  emergent-mcp rollback --steps 2"
)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tool server on stdin/stdout
    Serve,
    /// List the tools a spawned server advertises
    Tools,
    /// Call one tool through a spawned server
    Call {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Undo the most recent logged file mutations
    Rollback {
        #[arg(short = 'n', long, default_value_t = 1)]
        steps: usize,
    },
    /// Show the operation log, most recent last
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Serve => {
            let registry = ToolRegistry::new(&config).context("initializing tool registry")?;
            let server = McpServer::new(registry);
            tracing::info!(root = %config.project_root.display(), "serving tools on stdio");
            run_server(&server, &mut StdioTransport::stdio()).await?;
        }
        Commands::Tools => {
            let mut client = ToolClient::new(ProcessConnector::from_config(&config)?);
            let tools = client.list_tools().await;
            client.disconnect().await;
            print_json(&tools?)?;
        }
        Commands::Call { tool, args } => {
            let arguments: Value =
                serde_json::from_str(&args).context("--args must be a JSON value")?;
            let mut client = ToolClient::new(ProcessConnector::from_config(&config)?);
            let result = client.call_tool(&tool, arguments).await;
            client.disconnect().await;
            let result = result?;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Rollback { steps } => {
            let mut files = open_file_manager(&config)?;
            let undone = files.rollback(steps);
            tracing::info!(requested = steps, undone = undone.len(), "rollback finished");
            print_json(&undone)?;
        }
        Commands::History { limit } => {
            let files = open_file_manager(&config)?;
            print_json(&files.history(limit))?;
        }
        Commands::Config => {
            let mut effective = serde_json::to_value(&config)?;
            effective["backupDir"] = json!(config.resolved_backup_dir());
            effective["historyPath"] = json!(config.history_path());
            print_json(&effective)?;
        }
    }

    Ok(())
}

fn open_file_manager(config: &Config) -> anyhow::Result<FileManager> {
    let mut files = FileManager::new(&config.project_root, &config.backup_dir)?;
    files.initialize()?;
    Ok(files)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("emergent_mcp=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
