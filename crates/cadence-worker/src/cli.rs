use clap::{Parser, Subcommand};

/// Recurring schedule worker: runs the execution loop and manages schedules
/// stored in the local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "cadence-worker", version)]
pub struct CliArgs {
    /// Path to config file (default: $CADENCE_CONFIG, then ~/.cadence/cadence.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the execution engine until Ctrl-C.
    Run,

    /// Validate a schedule config (JSON) and print its next send instants.
    Preview {
        #[arg(long)]
        file: String,
        #[arg(long, default_value = "10")]
        count: usize,
    },

    /// Validate a schedule config (JSON) and store it as a draft.
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        file: String,
        /// Activate right away
        #[arg(long)]
        activate: bool,
    },

    Activate { id: String },
    Pause { id: String },
    Resume { id: String },
    Cancel { id: String },

    /// List an owner's schedules, newest first.
    List {
        #[arg(long)]
        owner: String,
        /// draft, active, paused, completed or cancelled
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "0")]
        offset: u32,
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// List a schedule's occurrences in sequence order.
    Occurrences {
        id: String,
        #[arg(long, default_value = "0")]
        offset: u32,
        #[arg(long, default_value = "50")]
        limit: u32,
    },
}
