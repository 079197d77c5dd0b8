//! CLI argument definitions using clap
//!
//! Commands:
//! - dbbroker create-instance --instance-id <id>
//! - dbbroker delete-instance --instance-id <id>
//! - dbbroker bind --instance-id <id> --binding-id <id>
//! - dbbroker unbind --instance-id <id> --binding-id <id>
//! - dbbroker exists --instance-id <id> [--binding-id <id>]
//! - dbbroker clean <value>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dbbroker - database-per-tenant service broker
#[derive(Parser, Debug)]
#[command(name = "dbbroker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the database for a service instance
    CreateInstance {
        #[arg(long)]
        instance_id: String,

        /// Service definition id (defaults to the catalog service)
        #[arg(long)]
        service_id: Option<String>,

        /// Plan id (defaults to the first catalog plan)
        #[arg(long)]
        plan_id: Option<String>,

        /// Explicit database name instead of the generated one
        #[arg(long)]
        database: Option<String>,
    },

    /// Drop the database of a service instance
    DeleteInstance {
        #[arg(long)]
        instance_id: String,

        #[arg(long)]
        database: Option<String>,
    },

    /// Create credentials on a service instance
    Bind {
        #[arg(long)]
        instance_id: String,

        #[arg(long)]
        binding_id: String,

        #[arg(long)]
        service_id: Option<String>,

        #[arg(long)]
        plan_id: Option<String>,

        /// Explicit username instead of the one derived from the binding id
        #[arg(long)]
        username: Option<String>,

        /// Explicit password instead of a generated one
        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        database: Option<String>,
    },

    /// Remove the credentials of a binding
    Unbind {
        #[arg(long)]
        instance_id: String,

        #[arg(long)]
        binding_id: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        database: Option<String>,
    },

    /// Report whether an instance (and optionally a binding) exists
    Exists {
        #[arg(long)]
        instance_id: String,

        #[arg(long)]
        binding_id: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        database: Option<String>,
    },

    /// Print a value with identifier-unsafe characters removed
    Clean {
        value: String,
    },
}

impl Command {
    /// Subcommand name as typed
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateInstance { .. } => "create-instance",
            Command::DeleteInstance { .. } => "delete-instance",
            Command::Bind { .. } => "bind",
            Command::Unbind { .. } => "unbind",
            Command::Exists { .. } => "exists",
            Command::Clean { .. } => "clean",
        }
    }

    /// Whether the command talks to the database server
    pub fn needs_connection(&self) -> bool {
        !matches!(self, Command::Clean { .. })
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
