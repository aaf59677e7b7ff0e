use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

/// Normalize signals, evaluate rules and run workflows locally.
#[derive(Parser, Debug)]
#[command(name = "signalflow", version, about)]
pub struct Cli {
    /// Config profile; reads `{PROFILE}_`-prefixed variables first.
    #[arg(long, env = "SIGNALFLOW_PROFILE", default_value = "")]
    pub profile: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the normalized form of a raw signal file.
    Normalize {
        #[arg(long, env = "SIGNALFLOW_AGENCY")]
        agency: Uuid,

        /// JSON file: `{source, type, data, clientId?, urgency?, timestamp?, metadata?}`.
        file: PathBuf,
    },

    /// Evaluate every rule in a definitions directory against a context file.
    Evaluate {
        #[command(flatten)]
        store: StoreArgs,

        /// JSON file with `signal`, `client`, `project` and `context` keys,
        /// or a bare signal object.
        context: PathBuf,
    },

    /// Execute a workflow against a trigger payload.
    Run {
        #[command(flatten)]
        store: StoreArgs,

        /// Workflow `metadata.name`.
        #[arg(long)]
        workflow: String,

        /// Create a new execution even if this payload already ran.
        #[arg(long)]
        skip_idempotency_check: bool,

        /// JSON trigger payload.
        trigger: PathBuf,
    },

    /// Ingest a raw signal and route it through rules into workflows.
    Route {
        #[command(flatten)]
        store: StoreArgs,

        /// Raw signal JSON file.
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[arg(long, env = "SIGNALFLOW_AGENCY")]
    pub agency: Uuid,

    /// Directory of rule and workflow YAML definitions.
    #[arg(long, env = "SIGNALFLOW_DEFINITIONS", default_value = "definitions")]
    pub definitions: PathBuf,

    /// Use PostgreSQL from `PG_*` settings instead of the in-memory store.
    #[arg(long)]
    pub postgres: bool,
}
