//! CLI definition for the kanban-sync command-line client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keep a remote kanban board in sync from the terminal.
///
/// Settings come from built-in defaults, then the optional `--config` file
/// (TOML, YAML or JSON), then `KANBAN_SYNC_*` environment variables. Nested
/// keys use `__`, e.g. `KANBAN_SYNC_RECONNECT__MAX_ATTEMPTS=10`.
#[derive(Parser, Debug)]
#[command(name = "kanban-sync")]
#[command(version)]
#[command(about = "Watch and move tasks on a remote kanban board")]
pub struct Cli {
    /// Enable debug output to stderr
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a board and print every change until interrupted
    Watch {
        /// Board id (hyphenated UUID)
        board_id: String,
    },

    /// Move a task into a column, optionally between two of its tasks
    Move {
        board_id: String,
        task_id: String,
        /// Target column
        column_id: String,
        /// Place the task right after this task
        #[arg(long, value_name = "TASK_ID")]
        after: Option<String>,
        /// Place the task right before this task
        #[arg(long, value_name = "TASK_ID")]
        before: Option<String>,
    },

    /// Print which columns each column may move tasks into
    Transitions {
        board_id: String,
    },
}
