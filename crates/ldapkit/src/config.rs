//! Directory connection settings.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A fixture attribute written either as one value or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Values {
    One(String),
    Many(Vec<String>),
}

impl Values {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Values::One(value) => vec![value],
            Values::Many(values) => values,
        }
    }
}

/// Fixture entries: DN -> attribute -> values.
pub type Fixtures = BTreeMap<String, BTreeMap<String, Values>>;

/// Settings of the `ldap` configuration section.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Directory sync can be switched off entirely
    pub enabled: bool,

    /// Host names or `ldap[s]://` URLs, tried in order
    pub servers: Vec<String>,

    pub port: u16,

    pub use_ssl: bool,

    /// Bind DN
    pub user: Option<String>,

    /// Bind password
    pub password: Option<String>,

    /// File holding the bind DN, used when `user` is not set
    pub userfile: Option<PathBuf>,

    /// File holding the bind password, used when `password` is not set
    pub passwordfile: Option<PathBuf>,

    /// Credentials are base64 encoded
    pub base64: bool,

    /// Default search base for group filters
    #[serde(alias = "ldapbasedn")]
    pub basedn: String,

    /// Attribute listing group members
    pub ldapattribute: String,

    /// Turns a bare group name into a filter, e.g. `(cn=%s)`
    pub filter_template: Option<String>,

    /// How many times the server list is walked before giving up
    pub conn_retries: u32,

    /// Prepended to every resolved member name
    pub prefix: String,

    /// Appended to every resolved member name
    pub suffix: String,

    /// Static entries served instead of a live directory
    pub mockdata: Fixtures,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            servers: Vec::new(),
            port: 636,
            use_ssl: true,
            user: None,
            password: None,
            userfile: None,
            passwordfile: None,
            base64: false,
            basedn: String::new(),
            ldapattribute: "memberUid".to_string(),
            filter_template: None,
            conn_retries: 1,
            prefix: String::new(),
            suffix: String::new(),
            mockdata: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("enabled", &self.enabled)
            .field("servers", &self.servers)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("userfile", &self.userfile)
            .field("passwordfile", &self.passwordfile)
            .field("base64", &self.base64)
            .field("basedn", &self.basedn)
            .field("ldapattribute", &self.ldapattribute)
            .field("filter_template", &self.filter_template)
            .field("conn_retries", &self.conn_retries)
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("mockdata", &self.mockdata.len())
            .finish()
    }
}

impl DirectoryConfig {
    /// Connection URL of one configured server.
    pub fn url(&self, server: &str) -> String {
        if server.contains("://") {
            return server.to_string();
        }
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{scheme}://{server}:{}", self.port)
    }

    /// Settings that are required for a live directory but missing.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.servers.is_empty() {
            missing.push("servers");
        }
        if self.user.as_deref().is_none_or(str::is_empty) {
            missing.push("user");
        }
        if self.password.as_deref().is_none_or(str::is_empty) {
            missing.push("password");
        }
        missing
    }

    /// Fill `user`/`password` from their files and decode base64 values.
    pub fn resolve_credentials(&mut self) -> Result<()> {
        if self.user.is_none()
            && let Some(path) = &self.userfile
        {
            self.user = Some(read_credential("user", path)?);
        }
        if self.password.is_none()
            && let Some(path) = &self.passwordfile
        {
            self.password = Some(read_credential("password", path)?);
        }
        if self.base64 {
            let source = PathBuf::from("base64");
            if let Some(user) = &self.user {
                self.user = Some(decode("user", &source, user)?);
            }
            if let Some(password) = &self.password {
                self.password = Some(decode("password", &source, password)?);
            }
        }
        Ok(())
    }
}

fn read_credential(name: &'static str, path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::Credential {
            name,
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn decode(name: &'static str, path: &Path, value: &str) -> Result<String> {
    let fail = |message: String| Error::Credential {
        name,
        path: path.to_path_buf(),
        message,
    };
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| fail(e.to_string()))?;
    String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|e| fail(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = DirectoryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.port, 636);
        assert_eq!(config.ldapattribute, "memberUid");
        assert_eq!(config.conn_retries, 1);
        assert_eq!(
            config.missing_settings(),
            vec!["servers", "user", "password"]
        );
    }

    #[test]
    fn test_url() {
        let mut config = DirectoryConfig::default();
        assert_eq!(config.url("ldap1"), "ldaps://ldap1:636");
        config.use_ssl = false;
        config.port = 389;
        assert_eq!(config.url("ldap1"), "ldap://ldap1:389");
        assert_eq!(config.url("ldaps://ldap2:6360"), "ldaps://ldap2:6360");
    }

    #[test]
    fn test_credentials_from_files_with_base64() {
        let mut user = NamedTempFile::new().unwrap();
        writeln!(user, "Y249cmVhZGVy").unwrap();
        let mut password = NamedTempFile::new().unwrap();
        writeln!(password, "c2VjcmV0").unwrap();

        let mut config = DirectoryConfig {
            userfile: Some(user.path().to_path_buf()),
            passwordfile: Some(password.path().to_path_buf()),
            base64: true,
            ..DirectoryConfig::default()
        };
        config.resolve_credentials().unwrap();
        assert_eq!(config.user.as_deref(), Some("cn=reader"));
        assert_eq!(config.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_inline_credentials_win_over_files() {
        let mut config = DirectoryConfig {
            user: Some("cn=inline".to_string()),
            userfile: Some(PathBuf::from("/nonexistent/user")),
            ..DirectoryConfig::default()
        };
        config.resolve_credentials().unwrap();
        assert_eq!(config.user.as_deref(), Some("cn=inline"));
    }

    #[test]
    fn test_missing_credential_file() {
        let mut config = DirectoryConfig {
            passwordfile: Some(PathBuf::from("/nonexistent/password")),
            ..DirectoryConfig::default()
        };
        let err = config.resolve_credentials().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/password"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DirectoryConfig {
            password: Some("hunter2".to_string()),
            ..DirectoryConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
