//! Desired-state configuration.
//!
//! Defaults are applied once, while deserializing. Sections and entries
//! may be left empty (`users:` or `alice:` with no value) and are then
//! filled from the defaults of their type.

use crate::paths;
use anyhow::{Context, Result, bail};
use ldapkit::DirectoryConfig;
use pgkit::{ConnectionConfig, Password};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Connection parameters that name files and are made absolute.
const PATH_PARAMETERS: &[&str] = &["sslkey", "sslcert", "sslrootcert"];

// ============================================================================
// Top level
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "null_as_default")]
    pub general: General,

    #[serde(deserialize_with = "null_as_default")]
    pub strict: Strict,

    #[serde(deserialize_with = "null_as_default")]
    pub ldap: DirectoryConfig,

    #[serde(deserialize_with = "null_as_default")]
    pub postgresql: Postgresql,

    #[serde(deserialize_with = "declarations")]
    pub users: BTreeMap<String, UserDecl>,

    #[serde(deserialize_with = "declarations")]
    pub roles: BTreeMap<String, RoleDecl>,

    #[serde(deserialize_with = "declarations")]
    pub databases: BTreeMap<String, DatabaseDecl>,

    #[serde(alias = "slots", deserialize_with = "declarations")]
    pub replication_slots: BTreeMap<String, SlotDecl>,
}

impl Config {
    /// Load a configuration file. `.toml` files are read as TOML, anything
    /// else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config = if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_yaml(&content)
        }
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Invalid YAML format")
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format")
    }

    /// Point the directory credential files at command line overrides and
    /// read them.
    pub fn resolve_directory_credentials(
        &mut self,
        user_file: Option<&Path>,
        password_file: Option<&Path>,
    ) -> Result<()> {
        if let Some(path) = user_file {
            self.ldap.userfile = Some(path.to_path_buf());
        }
        if let Some(path) = password_file {
            self.ldap.passwordfile = Some(path.to_path_buf());
        }
        if !self.ldap.enabled {
            return Ok(());
        }
        for file in [&mut self.ldap.userfile, &mut self.ldap.passwordfile]
            .into_iter()
            .flatten()
        {
            *file = paths::expand(&file.to_string_lossy());
        }
        self.ldap
            .resolve_credentials()
            .context("Could not read directory credentials")
    }

    /// Cluster connection settings with file parameters made absolute.
    pub fn connection(&self) -> Result<ConnectionConfig> {
        if self.postgresql.dsn.is_empty() {
            bail!("postgresql.dsn is empty, no cluster to connect to");
        }
        let params = self
            .postgresql
            .dsn
            .iter()
            .map(|(key, value)| {
                let value = value.to_string();
                if PATH_PARAMETERS.contains(&key.as_str()) {
                    let path = paths::absolute(&value);
                    (key.clone(), path.to_string_lossy().into_owned())
                } else {
                    (key.clone(), value)
                }
            })
            .collect();
        Ok(ConnectionConfig::new(params))
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct General {
    /// Log level name (`debug`, `info`, ...) or a numeric level
    pub loglevel: Option<Scalar>,

    /// Seconds between passes; 0 runs once
    #[serde(alias = "rundelay")]
    pub run_delay: u64,
}

impl General {
    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        use log::LevelFilter;

        let Some(level) = &self.loglevel else {
            return Ok(LevelFilter::Info);
        };
        if let Scalar::Int(number) = level {
            return Ok(match *number {
                40.. => LevelFilter::Error,
                30..=39 => LevelFilter::Warn,
                20..=29 => LevelFilter::Info,
                10..=19 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            });
        }
        Ok(match level.to_string().trim().to_lowercase().as_str() {
            "critical" | "error" => LevelFilter::Error,
            "warning" | "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" | "notset" => LevelFilter::Trace,
            other => bail!("Invalid log level: {other}"),
        })
    }
}

/// Which categories are pruned of undeclared objects after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Strict {
    #[serde(alias = "users")]
    pub roles: bool,
    pub databases: bool,
    pub extensions: bool,
}

impl Default for Strict {
    fn default() -> Self {
        Self {
            roles: true,
            databases: false,
            extensions: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Postgresql {
    /// libpq style `key: value` connection parameters
    #[serde(deserialize_with = "null_as_default")]
    pub dsn: BTreeMap<String, Scalar>,
}

// ============================================================================
// Declarations
// ============================================================================

/// Whether an object should exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

impl Ensure {
    /// `absent` (any case, surrounding blanks ignored) is absent, anything
    /// else present.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("absent") {
            Self::Absent
        } else {
            Self::Present
        }
    }
}

impl<'de> Deserialize<'de> for Ensure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<Scalar>::deserialize(deserializer)?;
        Ok(value.map_or(Self::Present, |v| Self::parse(&v.to_string())))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserDecl {
    pub ensure: Ensure,
    /// One of ldapgroup, ldapuser, password, md5, clientcert
    pub auth: Option<String>,
    /// Partial timestamp such as `2015` or `2020-06-30`
    pub expiry: Option<Scalar>,
    #[serde(deserialize_with = "null_as_default")]
    pub memberof: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub options: Vec<String>,
    #[serde(deserialize_with = "password")]
    pub password: Option<Password>,
    /// Group filter or bare group name (ldapgroup), defaults to the user name
    pub ldapfilter: Option<String>,
    pub ldapbasedn: Option<String>,
    pub ldapattribute: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl UserDecl {
    pub fn auth(&self) -> &str {
        self.auth.as_deref().unwrap_or("password")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoleDecl {
    pub ensure: Ensure,
    #[serde(deserialize_with = "null_as_default")]
    pub memberof: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseDecl {
    pub ensure: Ensure,
    /// Defaults to a role named after the database
    pub owner: Option<String>,
    #[serde(deserialize_with = "declarations")]
    pub extensions: BTreeMap<String, ExtensionDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtensionDecl {
    pub ensure: Ensure,
    pub schema: Option<String>,
    pub version: Option<Scalar>,
}

impl ExtensionDecl {
    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }

    pub fn version(&self) -> Option<String> {
        self.version.as_ref().map(ToString::to_string)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlotDecl {
    pub ensure: Ensure,
}

// ============================================================================
// Scalars
// ============================================================================

/// A value written either as a number or as a string (`expiry: 2015`,
/// `version: 1.1`, `port: 5432`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A name -> declaration map where both the map and each entry may be null.
fn declarations<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let raw = Option::<BTreeMap<String, Option<T>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, decl)| (name, decl.unwrap_or_default()))
        .collect())
}

fn password<'de, D>(deserializer: D) -> Result<Option<Password>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value
        .map(|v| v.to_string())
        .filter(|v| !v.is_empty())
        .map(Password::new))
}
