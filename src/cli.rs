use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgfga")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Reconcile PostgreSQL roles, grants, databases and extensions against a declarative config",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (YAML, or TOML with a .toml extension)
    #[arg(short, long, env = "PGFGACONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (overrides general.loglevel)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// File holding the directory bind DN
    #[arg(long, global = true)]
    pub ldap_user_file: Option<PathBuf>,

    /// File holding the directory bind password
    #[arg(long, global = true)]
    pub ldap_password_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Reconcile the cluster, optionally repeating every --run-delay seconds
    Apply {
        /// Seconds between passes; 0 runs a single pass
        #[arg(long)]
        run_delay: Option<u64>,
    },

    /// Validate the configuration without touching the cluster
    Check,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
