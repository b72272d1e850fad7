//! Core types: role options, role attributes, passwords and the fixed
//! allow-lists of objects this crate never creates or destroys.

use crate::error::{Error, Result};
use std::fmt;

/// Role every reassigned object ends up owned by.
pub const SUPERUSER_ROLE: &str = "postgres";

/// Operational role that is made a member of every database owner.
pub const OPEX_ROLE: &str = "opex";

/// Role that is made a member of every `<db>_readonly` role.
pub const READONLY_ROLE: &str = "readonly";

/// Roles that are never dropped, revoked or created.
pub const PROTECTED_ROLES: &[&str] = &[
    "postgres",
    "pg_monitor",
    "pg_read_all_settings",
    "pg_read_all_stats",
    "pg_stat_scan_tables",
    "pg_signal_backend",
    "pg_read_server_files",
    "pg_write_server_files",
    "pg_execute_server_program",
    "pg_database_owner",
    "pg_read_all_data",
    "pg_write_all_data",
    "pg_checkpoint",
    "pg_use_reserved_connections",
    "pg_create_subscription",
    "pg_maintain",
];

/// Databases that are never dropped.
pub const PROTECTED_DATABASES: &[&str] = &["postgres", "template0", "template1"];

/// Extensions every database ships with; never pruned.
pub const PROTECTED_EXTENSIONS: &[&str] = &["plpgsql"];

/// Whether a role belongs to the protected allow-list.
///
/// The `pg_` prefix is reserved by the server for predefined roles, so any
/// role carrying it counts as protected even when a newer server version
/// introduced it.
pub fn is_protected_role(name: &str) -> bool {
    PROTECTED_ROLES.contains(&name) || name.starts_with("pg_")
}

/// Whether a database belongs to the protected allow-list.
pub fn is_protected_database(name: &str) -> bool {
    PROTECTED_DATABASES.contains(&name)
}

/// Whether an extension belongs to the protected allow-list.
pub fn is_protected_extension(name: &str) -> bool {
    PROTECTED_EXTENSIONS.contains(&name)
}

/// Name of the read-only companion role of a database.
pub fn readonly_role_name(database: &str) -> String {
    format!("{database}_readonly")
}

/// A boolean capability of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleFlag {
    Superuser,
    CreateDb,
    CreateRole,
    Inherit,
    Login,
    Replication,
}

impl RoleFlag {
    /// All flags, in catalog column order.
    pub const ALL: [RoleFlag; 6] = [
        RoleFlag::Superuser,
        RoleFlag::CreateDb,
        RoleFlag::CreateRole,
        RoleFlag::Inherit,
        RoleFlag::Login,
        RoleFlag::Replication,
    ];

    /// SQL keyword enabling this flag.
    pub fn keyword(&self) -> &'static str {
        match self {
            RoleFlag::Superuser => "SUPERUSER",
            RoleFlag::CreateDb => "CREATEDB",
            RoleFlag::CreateRole => "CREATEROLE",
            RoleFlag::Inherit => "INHERIT",
            RoleFlag::Login => "LOGIN",
            RoleFlag::Replication => "REPLICATION",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "SUPERUSER" => Some(RoleFlag::Superuser),
            "CREATEDB" => Some(RoleFlag::CreateDb),
            // CREATEUSER is the pre-9.x spelling
            "CREATEROLE" | "CREATEUSER" => Some(RoleFlag::CreateRole),
            "INHERIT" => Some(RoleFlag::Inherit),
            "LOGIN" => Some(RoleFlag::Login),
            "REPLICATION" => Some(RoleFlag::Replication),
            _ => None,
        }
    }
}

/// One requested option, e.g. `LOGIN` or `NOSUPERUSER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleOption {
    pub flag: RoleFlag,
    pub enabled: bool,
}

impl RoleOption {
    pub const LOGIN: RoleOption = RoleOption {
        flag: RoleFlag::Login,
        enabled: true,
    };

    /// Parse a single option word. Case-insensitive; surrounding
    /// whitespace is ignored.
    pub fn parse(word: &str) -> Option<Self> {
        let word = word.trim().to_uppercase();
        if let Some(flag) = RoleFlag::from_keyword(&word) {
            return Some(RoleOption {
                flag,
                enabled: true,
            });
        }
        let flag = RoleFlag::from_keyword(word.strip_prefix("NO")?)?;
        Some(RoleOption {
            flag,
            enabled: false,
        })
    }

    /// Parse every option declared for a role.
    ///
    /// Fails with every unrecognised word at once so the whole role can be
    /// reported in a single message. At most one option per flag is kept;
    /// the last word for a flag wins.
    pub fn parse_all<S: AsRef<str>>(role: &str, words: &[S]) -> Result<Vec<Self>> {
        let mut options: Vec<Self> = Vec::new();
        let mut invalid = Vec::new();
        for word in words {
            match RoleOption::parse(word.as_ref()) {
                Some(option) => match options.iter_mut().find(|o| o.flag == option.flag) {
                    Some(existing) => *existing = option,
                    None => options.push(option),
                },
                None => invalid.push(word.as_ref().to_string()),
            }
        }
        if !invalid.is_empty() {
            return Err(Error::InvalidRoleOptions {
                role: role.to_string(),
                options: invalid,
            });
        }
        Ok(options)
    }

    /// Defaults for flags the declared options leave open, then the
    /// declared options.
    pub fn with_defaults(defaults: &[Self], declared: Vec<Self>) -> Vec<Self> {
        let mut options: Vec<Self> = defaults
            .iter()
            .filter(|d| !declared.iter().any(|o| o.flag == d.flag))
            .copied()
            .collect();
        options.extend(declared);
        options
    }

    /// Whether live attributes already match this option.
    pub fn is_satisfied_by(&self, attributes: &RoleAttributes) -> bool {
        attributes.get(self.flag) == self.enabled
    }
}

impl fmt::Display for RoleOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.enabled {
            f.write_str(self.flag.keyword())
        } else {
            write!(f, "NO{}", self.flag.keyword())
        }
    }
}

/// Live capability flags of a role (`pg_roles` columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleAttributes {
    pub superuser: bool,
    pub create_db: bool,
    pub create_role: bool,
    pub inherit: bool,
    pub login: bool,
    pub replication: bool,
}

impl Default for RoleAttributes {
    /// Attributes of a role created by a bare `CREATE ROLE`.
    fn default() -> Self {
        Self {
            superuser: false,
            create_db: false,
            create_role: false,
            inherit: true,
            login: false,
            replication: false,
        }
    }
}

impl RoleAttributes {
    pub fn get(&self, flag: RoleFlag) -> bool {
        match flag {
            RoleFlag::Superuser => self.superuser,
            RoleFlag::CreateDb => self.create_db,
            RoleFlag::CreateRole => self.create_role,
            RoleFlag::Inherit => self.inherit,
            RoleFlag::Login => self.login,
            RoleFlag::Replication => self.replication,
        }
    }

    pub fn set(&mut self, flag: RoleFlag, value: bool) {
        match flag {
            RoleFlag::Superuser => self.superuser = value,
            RoleFlag::CreateDb => self.create_db = value,
            RoleFlag::CreateRole => self.create_role = value,
            RoleFlag::Inherit => self.inherit = value,
            RoleFlag::Login => self.login = value,
            RoleFlag::Replication => self.replication = value,
        }
    }

    /// Attributes after applying an option.
    pub fn with(mut self, option: RoleOption) -> Self {
        self.set(option.flag, option.enabled);
        self
    }
}

/// A cleartext or pre-hashed password.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The value as declared.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***REDACTED***)")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option_case_and_whitespace() {
        assert_eq!(RoleOption::parse(" login "), Some(RoleOption::LOGIN));
        assert_eq!(
            RoleOption::parse("NoSuperUser"),
            Some(RoleOption {
                flag: RoleFlag::Superuser,
                enabled: false
            })
        );
        assert_eq!(RoleOption::parse("NO"), None);
        assert_eq!(RoleOption::parse("FLY"), None);
    }

    #[test]
    fn test_parse_createuser_alias() {
        let option = RoleOption::parse("CREATEUSER").unwrap();
        assert_eq!(option.flag, RoleFlag::CreateRole);
        assert!(option.enabled);
        assert_eq!(option.to_string(), "CREATEROLE");

        let option = RoleOption::parse("nocreateuser").unwrap();
        assert_eq!(option.to_string(), "NOCREATEROLE");
    }

    #[test]
    fn test_parse_all_collects_every_invalid_word() {
        let err = RoleOption::parse_all("alice", &["LOGIN", "FLY", "SWIM"]).unwrap_err();
        match err {
            Error::InvalidRoleOptions { role, options } => {
                assert_eq!(role, "alice");
                assert_eq!(options, vec!["FLY", "SWIM"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_all_deduplicates() {
        let options = RoleOption::parse_all("bob", &["login", "LOGIN", "createdb"]).unwrap();
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn test_parse_all_last_word_per_flag_wins() {
        let options = RoleOption::parse_all("bob", &["LOGIN", "createdb", "NOLOGIN"]).unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].to_string(), "NOLOGIN");
    }

    #[test]
    fn test_declared_options_override_defaults() {
        let declared = RoleOption::parse_all("svc", &["NOLOGIN", "CREATEDB"]).unwrap();
        let options = RoleOption::with_defaults(&[RoleOption::LOGIN], declared);
        let rendered: Vec<_> = options.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["NOLOGIN", "CREATEDB"]);

        let options = RoleOption::with_defaults(&[RoleOption::LOGIN], Vec::new());
        assert_eq!(options, vec![RoleOption::LOGIN]);
    }

    #[test]
    fn test_option_satisfied_by_attributes() {
        let attrs = RoleAttributes::default();
        assert!(!RoleOption::LOGIN.is_satisfied_by(&attrs));
        assert!(RoleOption::parse("INHERIT").unwrap().is_satisfied_by(&attrs));
        assert!(RoleOption::LOGIN.is_satisfied_by(&attrs.with(RoleOption::LOGIN)));
    }

    #[test]
    fn test_protected_objects() {
        assert!(is_protected_role("postgres"));
        assert!(is_protected_role("pg_monitor"));
        assert!(is_protected_role("pg_some_future_role"));
        assert!(!is_protected_role("operator"));
        assert!(is_protected_database("template0"));
        assert!(!is_protected_database("foo"));
        assert_eq!(readonly_role_name("foo"), "foo_readonly");
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2");
        assert!(!format!("{password:?}").contains("hunter2"));
        assert_eq!(password.expose(), "hunter2");
    }
}
