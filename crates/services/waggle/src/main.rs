//! Waggle unified binary.
//!
//! `waggle serve` runs the MCP server over stdio (default) or streamable
//! HTTP. `waggle guard ...` backs the pre-commit hook installed into agent
//! workspaces. `waggle config show` prints the effective configuration.

mod panic_hook;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use waggle_common::WaggleConfig;
use waggle_core::model::precommit_guard::{GuardMode, PrecommitGuardBmc};

#[derive(Parser)]
#[command(
    name = "waggle",
    version,
    about = "Coordination server for cooperating coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server.
    Serve {
        /// Transport to expose the tool surface on.
        #[arg(long, value_enum, default_value = "stdio")]
        transport: Transport,
        /// Emit JSON-formatted logs.
        #[arg(long)]
        json_logs: bool,
    },
    /// Pre-commit guard operations for agent workspaces.
    Guard {
        #[command(subcommand)]
        command: GuardCommand,
    },
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum GuardCommand {
    /// Install the reservation-checking pre-commit hook.
    Install {
        /// Workspace directory containing the .git to hook.
        #[arg(long, default_value = ".")]
        workspace: String,
        /// Project identifier the workspace belongs to.
        #[arg(long)]
        project: String,
    },
    /// Remove the waggle pre-commit hook.
    Uninstall {
        #[arg(long, default_value = ".")]
        workspace: String,
    },
    /// Check paths against other agents' active exclusive reservations.
    Check {
        #[arg(long)]
        project: String,
        #[arg(long, env = "AGENT_NAME")]
        agent: String,
        /// Read newline-separated paths from stdin.
        #[arg(long)]
        stdin: bool,
        /// Paths to check (alternative to --stdin).
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as JSON-ish key/value pairs.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    panic_hook::install();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { transport, json_logs } => {
            waggle_common::tracing_setup::setup_tracing(json_logs);
            let config = WaggleConfig::load()?;
            match transport {
                Transport::Stdio => waggle_mcp::run_stdio(config).await,
                Transport::Http => waggle_mcp::run_http(config).await,
            }
        }

        Command::Guard { command } => run_guard(command).await,

        Command::Config { command } => match command {
            ConfigCommand::Show => {
                let config = WaggleConfig::load()?;
                println!("server.host = {}", config.server.host);
                println!("server.port = {}", config.server.port);
                println!("server.http_path = {}", config.server.http_path);
                println!("storage.db_path = {}", config.storage.db_path);
                println!("storage.root = {}", config.storage.root);
                println!("storage.convert_images = {}", config.storage.convert_images);
                println!(
                    "contact.enforcement_enabled = {}",
                    config.contact.enforcement_enabled
                );
                println!(
                    "contact.auto_ttl_seconds = {}",
                    config.contact.auto_ttl_seconds
                );
                println!(
                    "reservations.enforcement_enabled = {}",
                    config.reservations.enforcement_enabled
                );
                println!("identity.ack_ttl_seconds = {}", config.identity.ack_ttl_seconds);
                println!("llm.enabled = {}", config.llm.enabled);
                Ok(())
            }
        },
    }
}

async fn run_guard(command: GuardCommand) -> Result<()> {
    match command {
        GuardCommand::Install { workspace, project } => {
            let workspace = std::fs::canonicalize(&workspace)?;
            let hook = PrecommitGuardBmc::install(&workspace, &project)?;
            eprintln!("installed pre-commit guard at {}", hook.display());
            Ok(())
        }

        GuardCommand::Uninstall { workspace } => {
            let workspace = std::fs::canonicalize(&workspace)?;
            if PrecommitGuardBmc::uninstall(&workspace)? {
                eprintln!("removed pre-commit guard");
            } else {
                eprintln!("no pre-commit guard installed");
            }
            Ok(())
        }

        GuardCommand::Check {
            project,
            agent,
            stdin,
            mut paths,
        } => {
            if stdin {
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                paths.extend(
                    buffer
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from),
                );
            }
            if paths.is_empty() {
                return Ok(());
            }

            let config = std::sync::Arc::new(WaggleConfig::load()?);
            let mm = waggle_core::ModelManager::new(config).await?;
            let ctx = waggle_core::Ctx::root_ctx();

            let project_rec = waggle_core::model::project::ProjectBmc::get_by_identifier(
                &ctx, &mm, &project,
            )
            .await?;
            let agent_rec = waggle_core::model::agent::AgentBmc::get_by_name(
                &ctx,
                &mm,
                project_rec.id,
                &agent,
            )
            .await?;

            let conflicts = PrecommitGuardBmc::check_paths(
                &ctx,
                &mm,
                project_rec.id,
                agent_rec.id,
                &paths,
            )
            .await?;

            if conflicts.is_empty() {
                return Ok(());
            }
            for conflict in &conflicts {
                eprintln!(
                    "[waggle-guard] {} conflicts with {} reserved by {} (expires {})",
                    conflict.path,
                    conflict.path_pattern,
                    conflict.holder,
                    conflict.expires_ts.and_utc().to_rfc3339(),
                );
            }
            match GuardMode::from_env() {
                GuardMode::Block => std::process::exit(1),
                GuardMode::Advisory | GuardMode::Bypass => Ok(()),
            }
        }
    }
}
