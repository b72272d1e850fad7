//! `pgfga apply` - reconcile the cluster, once or in a loop.

use anyhow::Result;
use std::thread;
use std::time::Duration;

use super::ConfigSource;
use crate::Context;
use crate::config::Config;
use crate::engine::Engine;
use crate::ui;

/// Run passes until the delay is 0, returning the accumulated error count.
///
/// The configuration is re-read before every pass. Connections are set up
/// from the first configuration that loads and kept for later passes.
pub fn run(ctx: &Context, source: &ConfigSource, run_delay: Option<u64>) -> usize {
    run_with(ctx, source, run_delay, build_engine)
}

fn build_engine(config: &Config) -> Result<Engine> {
    let cluster = pgkit::Client::new(config.connection()?)?;
    log::debug!("Connecting to {}", cluster.describe());
    let directory = ldapkit::Client::new(config.ldap.clone());
    Ok(Engine::new(cluster, directory))
}

fn run_with<F>(ctx: &Context, source: &ConfigSource, run_delay: Option<u64>, mut build: F) -> usize
where
    F: FnMut(&Config) -> Result<Engine>,
{
    let mut errors = 0;
    let mut engine: Option<Engine> = None;

    loop {
        let (pass_errors, configured_delay) = run_once(ctx, source, &mut engine, &mut build);
        errors += pass_errors;

        let delay = run_delay.or(configured_delay).unwrap_or(0);
        if delay == 0 {
            break;
        }
        log::debug!("Waiting {delay}s before the next pass");
        thread::sleep(Duration::from_secs(delay));
    }
    errors
}

/// One iteration: errors it produced and the delay the configuration asks for.
fn run_once<F>(
    ctx: &Context,
    source: &ConfigSource,
    engine: &mut Option<Engine>,
    build: &mut F,
) -> (usize, Option<u64>)
where
    F: FnMut(&Config) -> Result<Engine>,
{
    let config = match source.load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Could not load configuration: {e:#}");
            return (1, None);
        }
    };
    let delay = Some(config.general.run_delay);

    if engine.is_none() {
        match build(&config) {
            Ok(built) => *engine = Some(built),
            Err(e) => {
                log::error!("Could not set up connections: {e:#}");
                return (1, delay);
            }
        }
    }
    let Some(engine) = engine.as_mut() else {
        return (1, delay);
    };

    let now = chrono::Local::now().naive_local();
    match engine.run_pass(&config, now) {
        Ok(summary) => {
            if !ctx.quiet {
                ui::pass_summary(&summary);
            }
            (summary.error_count(), delay)
        }
        Err(e) => {
            log::error!("{e}");
            if !ctx.quiet {
                ui::error(&e.to_string());
            }
            (1, delay)
        }
    }
}
