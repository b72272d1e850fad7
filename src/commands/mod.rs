//! Sub-command implementations.

pub mod apply;
pub mod check;

use crate::config::Config;
use anyhow::Result;
use std::path::PathBuf;

/// Where the configuration comes from, re-read on every pass.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub ldap_user_file: Option<PathBuf>,
    pub ldap_password_file: Option<PathBuf>,
}

impl ConfigSource {
    /// Load the file and resolve directory credentials.
    pub fn load(&self) -> Result<Config> {
        let mut config = Config::load(&self.path)?;
        config.resolve_directory_credentials(
            self.ldap_user_file.as_deref(),
            self.ldap_password_file.as_deref(),
        )?;
        Ok(config)
    }
}
