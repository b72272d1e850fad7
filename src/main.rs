mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::ConfigSource;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "pgfga", &mut io::stdout());
        return Ok(());
    }

    let source = ConfigSource {
        path: paths::config_file(cli.config.as_deref())?,
        ldap_user_file: cli.ldap_user_file.clone(),
        ldap_password_file: cli.ldap_password_file.clone(),
    };

    // Initialize logging: -v/-q win over general.loglevel
    let log_level = match cli.verbose {
        0 => configured_level(&source),
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp_secs()
        .init();

    log::debug!("Running with config file {}", source.path.display());

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Apply { run_delay } => {
            let errors = commands::apply::run(&ctx, &source, run_delay);
            std::process::exit(engine::exit_status(errors));
        }
        Command::Check => commands::check::run(&ctx, &source),
        Command::Completions { .. } => Ok(()),
    }
}

/// Level from `general.loglevel`, `info` when the file cannot be read yet.
fn configured_level(source: &ConfigSource) -> log::LevelFilter {
    config::Config::load(&source.path)
        .ok()
        .and_then(|config| config.general.level_filter().ok())
        .unwrap_or(log::LevelFilter::Info)
}
