//! `pgfga check` - validate the configuration offline.

use anyhow::{Result, bail};

use super::ConfigSource;
use crate::Context;
use crate::config::Config;
use crate::engine::expander;
use crate::ui;

pub fn run(ctx: &Context, source: &ConfigSource) -> Result<()> {
    let config = source.load()?;
    let problems = problems(&config);
    let warnings = warnings(&config);

    if !ctx.quiet {
        ui::header(&format!("Configuration {}", source.path.display()));
        ui::kv("users", &config.users.len().to_string());
        ui::kv("roles", &config.roles.len().to_string());
        ui::kv("databases", &config.databases.len().to_string());
        ui::kv("replication slots", &config.replication_slots.len().to_string());
        if ctx.verbose > 0 {
            ui::kv("strict", &format!("{:?}", config.strict));
            ui::kv("directory", &format!("{:?}", config.ldap));
        }
        for warning in &warnings {
            ui::warn(warning);
        }
    }

    if problems.is_empty() {
        if !ctx.quiet {
            ui::success("Configuration is valid");
        }
        return Ok(());
    }
    for problem in &problems {
        ui::error(problem);
    }
    bail!("{} problem(s) in {}", problems.len(), source.path.display())
}

fn problems(config: &Config) -> Vec<String> {
    let mut problems = expander::validate(config);
    if let Err(e) = config.connection() {
        problems.push(e.to_string());
    }
    problems
}

/// Settings that leave the configuration valid but switch a feature off.
fn warnings(config: &Config) -> Vec<String> {
    if !config.ldap.enabled || !config.ldap.mockdata.is_empty() {
        return Vec::new();
    }
    config
        .ldap
        .missing_settings()
        .into_iter()
        .map(|key| format!("ldap.{key} is not set, directory synchronisation will be disabled"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problems_of_valid_config() {
        let config = Config::from_yaml(
            "
ldap:
  enabled: false
postgresql:
  dsn:
    host: db1
users:
  alice:
    options: [login, createdb]
",
        )
        .unwrap();
        assert!(problems(&config).is_empty());
    }

    #[test]
    fn test_missing_directory_settings_are_warnings() {
        let config = Config::from_yaml(
            "
ldap:
  servers: [ldap1]
postgresql:
  dsn:
    host: db1
",
        )
        .unwrap();
        assert!(problems(&config).is_empty());
        let warnings = warnings(&config);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.starts_with("ldap.user ")));

        let disabled = Config::from_yaml("ldap:\n  enabled: false\n").unwrap();
        assert!(super::warnings(&disabled).is_empty());
    }

    #[test]
    fn test_problems_without_dsn() {
        let config = Config::from_yaml("ldap:\n  enabled: false\n").unwrap();
        let problems = problems(&config);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("dsn"));
    }

    #[test]
    fn test_run_fails_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "ldap:\n  enabled: false\npostgresql:\n  dsn: {host: db1}\nroles:\n  dba:\n    options: [FLY]\n",
        )
        .unwrap();
        let source = ConfigSource {
            path,
            ldap_user_file: None,
            ldap_password_file: None,
        };
        let ctx = Context {
            verbose: 0,
            quiet: true,
        };
        let err = run(&ctx, &source).unwrap_err();
        assert!(err.to_string().contains("1 problem(s)"));
    }
}
