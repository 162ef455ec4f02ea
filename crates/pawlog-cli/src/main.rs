//! Pawlog CLI - offline pet care records from the command line

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::animal::run_animal;
use crate::commands::auth_cmd::run_auth;
use crate::commands::care::run_care;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::sync::{run_sync, run_sync_queue, run_sync_status, run_sync_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "pawlog=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Some(Commands::Animal { command }) => {
            run_animal(command, &resolve_db_path(cli.db_path)?).await?;
        }
        Some(Commands::Care { command }) => {
            run_care(command, &resolve_db_path(cli.db_path)?).await?;
        }
        Some(Commands::Sync { command }) => {
            let db_path = resolve_db_path(cli.db_path)?;
            match command.unwrap_or(SyncCommands::Run) {
                SyncCommands::Run => run_sync(&db_path, profile).await?,
                SyncCommands::Status { json } => run_sync_status(&db_path, json).await?,
                SyncCommands::Watch { probe_interval } => {
                    run_sync_watch(&db_path, profile, probe_interval).await?;
                }
                SyncCommands::Queue { json, drain } => {
                    run_sync_queue(&db_path, json, drain).await?;
                }
            }
        }
        Some(Commands::Auth { command }) => run_auth(command, profile).await?,
        Some(Commands::Config { command }) => run_config(command, profile)?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
