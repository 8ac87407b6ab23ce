mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "taskcell")]
#[command(about = "Session controller for long-running automation tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize taskcell configuration and workspace
    Onboard {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Inspect registered tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },

    /// Run one task in a fresh session and print the outcome
    Run {
        /// Task description handed to the driver
        #[arg(short, long)]
        task: String,

        /// Seconds to wait before the task is stopped (overrides config)
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Serve JSON-lines requests on stdin/stdout
    Stdio,

    /// Start the HTTP gateway (long-running daemon)
    Gateway {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// List all registered tools
    List,
    /// Show the parameter schema of a tool
    Info {
        /// Tool name
        tool_name: String,
    },
    /// Call a tool directly with JSON params
    Test {
        /// Tool name
        tool_name: String,
        /// JSON parameters (e.g. '{"action":"list_sessions"}')
        params: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON for `run` and `stdio`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Onboard { force } => {
            commands::onboard::run(force).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show().await?;
            }
            ConfigCommands::Path => {
                commands::config_cmd::path().await?;
            }
        },
        Commands::Tools { command } => match command {
            ToolsCommands::List => {
                commands::tools_cmd::list().await?;
            }
            ToolsCommands::Info { tool_name } => {
                commands::tools_cmd::info(&tool_name).await?;
            }
            ToolsCommands::Test { tool_name, params } => {
                commands::tools_cmd::test(&tool_name, &params).await?;
            }
        },
        Commands::Run { task, timeout } => {
            commands::run_cmd::run(task, timeout).await?;
        }
        Commands::Stdio => {
            commands::stdio::run().await?;
        }
        Commands::Gateway { port, host } => {
            commands::gateway::run(host, port).await?;
        }
    }

    Ok(())
}
