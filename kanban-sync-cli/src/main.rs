//! kanban-sync - keep a remote kanban board in sync from the terminal.
//!
//! Commands:
//! - `kanban-sync watch <board>`: Load a board and print changes until Ctrl-C
//! - `kanban-sync move <board> <task> <column>`: Move a task, optionally between neighbours
//! - `kanban-sync transitions <board>`: Print the allowed column-to-column moves
//!
//! Environment variables:
//! - KANBAN_SYNC_API_URL: REST base URL
//! - KANBAN_SYNC_WS_URL: Push channel base URL
//! - RUST_LOG: Log filter when `--debug` is not given
//!
//! Exit codes:
//! - 0: Success
//! - 1: Error

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn handle_result(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("kanban_sync=debug,kanban_sync_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let exit_code = match cli.command {
        Commands::Watch { board_id } => handle_result(commands::watch(config, &board_id).await),
        Commands::Move {
            board_id,
            task_id,
            column_id,
            after,
            before,
        } => handle_result(
            commands::move_task(
                config,
                &board_id,
                &task_id,
                &column_id,
                after.as_deref(),
                before.as_deref(),
            )
            .await,
        ),
        Commands::Transitions { board_id } => {
            handle_result(commands::transitions(config, &board_id).await)
        }
    };

    std::process::exit(exit_code);
}
