//! Turns declarations into concrete cluster operations.
//!
//! Expansion is the only step that talks to the directory: `ldapgroup`
//! users are resolved to their members here, so the resulting plan is a
//! plain list of [`Operation`]s the engine applies in order.

use crate::config::{
    Config, DatabaseDecl, Ensure, ExtensionDecl, RoleDecl, Scalar, SlotDecl, UserDecl,
};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use ldapkit::GroupQuery;
use pgkit::{Client, Managed, Password, RoleOption};
use std::fmt;

/// Completes a partial expiry such as `2015` or `2020-06`.
const EXPIRY_PADDING: &str = "2000-12-31 23:59:59";
const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Auth modes
// ============================================================================

/// How a user authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// A group role whose members come from a directory group
    LdapGroup,
    LdapUser,
    Password,
    Md5,
    ClientCert,
}

impl AuthMode {
    /// Strip everything but letters and digits and match case-insensitively.
    /// Unknown modes fall back to client certificates.
    pub fn normalize(raw: &str) -> Self {
        let word: String = raw
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_lowercase();
        match word.as_str() {
            "ldapgroup" => Self::LdapGroup,
            "ldapuser" => Self::LdapUser,
            "password" => Self::Password,
            "md5" => Self::Md5,
            "clientcert" => Self::ClientCert,
            _ => {
                log::debug!("Unknown auth mode '{raw}', using clientcert");
                Self::ClientCert
            }
        }
    }

    /// Whether the user authenticates out of band and must not have a
    /// password.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::LdapGroup | Self::LdapUser | Self::ClientCert)
    }
}

// ============================================================================
// Expiry
// ============================================================================

/// Parse a possibly partial expiry timestamp.
pub fn parse_expiry(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    let padded = match EXPIRY_PADDING.get(raw.len()..) {
        Some(rest) => format!("{raw}{rest}"),
        None => raw.to_string(),
    };
    NaiveDateTime::parse_from_str(&padded, EXPIRY_FORMAT)
        .with_context(|| format!("invalid expiry '{raw}'"))
}

/// Whether an expiry lies in the past. No expiry never expires.
pub fn is_expired(expiry: Option<&Scalar>, now: NaiveDateTime) -> Result<bool> {
    match expiry {
        Some(raw) => Ok(parse_expiry(&raw.to_string())? < now),
        None => Ok(false),
    }
}

// ============================================================================
// Operations
// ============================================================================

/// One idempotent cluster change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateRole {
        role: String,
        options: Vec<RoleOption>,
    },
    DropRole(String),
    SetPassword {
        role: String,
        password: Password,
    },
    ResetPassword(String),
    /// Make `grantee` a member of `granted`
    GrantRole {
        granted: String,
        grantee: String,
    },
    CreateDatabase {
        database: String,
        owner: Option<String>,
    },
    DropDatabase(String),
    CreateExtension {
        database: String,
        extension: String,
        schema: String,
        version: Option<String>,
    },
    DropExtension {
        database: String,
        extension: String,
    },
    CreateSlot(String),
    DropSlot(String),
}

impl Operation {
    /// Apply against the cluster, recording managed objects.
    pub fn apply(&self, cluster: &mut Client, managed: &mut Managed) -> pgkit::Result<bool> {
        match self {
            Operation::CreateRole { role, options } => cluster.create_role(managed, role, options),
            Operation::DropRole(role) => cluster.drop_role(role),
            Operation::SetPassword { role, password } => cluster.set_password(role, password),
            Operation::ResetPassword(role) => cluster.reset_password(role),
            Operation::GrantRole { granted, grantee } => {
                cluster.grant_role(managed, granted, grantee)
            }
            Operation::CreateDatabase { database, owner } => {
                cluster.create_database(managed, database, owner.as_deref())
            }
            Operation::DropDatabase(database) => cluster.drop_database(database),
            Operation::CreateExtension {
                database,
                extension,
                schema,
                version,
            } => cluster.create_extension(
                managed,
                database,
                extension,
                Some(schema),
                version.as_deref(),
            ),
            Operation::DropExtension {
                database,
                extension,
            } => cluster.drop_extension(database, extension),
            Operation::CreateSlot(slot) => cluster.create_replication_slot(slot),
            Operation::DropSlot(slot) => cluster.drop_replication_slot(slot),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateRole { role, .. } => write!(f, "create role {role}"),
            Operation::DropRole(role) => write!(f, "drop role {role}"),
            Operation::SetPassword { role, .. } => write!(f, "set password of {role}"),
            Operation::ResetPassword(role) => write!(f, "reset password of {role}"),
            Operation::GrantRole { granted, grantee } => write!(f, "grant {granted} to {grantee}"),
            Operation::CreateDatabase { database, .. } => write!(f, "create database {database}"),
            Operation::DropDatabase(database) => write!(f, "drop database {database}"),
            Operation::CreateExtension {
                database,
                extension,
                ..
            } => write!(f, "create extension {database}.{extension}"),
            Operation::DropExtension {
                database,
                extension,
            } => write!(f, "drop extension {database}.{extension}"),
            Operation::CreateSlot(slot) => write!(f, "create replication slot {slot}"),
            Operation::DropSlot(slot) => write!(f, "drop replication slot {slot}"),
        }
    }
}

// ============================================================================
// Expansion
// ============================================================================

/// Plan a user. Expired users are dropped like absent ones.
pub fn expand_user(
    name: &str,
    decl: &UserDecl,
    now: NaiveDateTime,
    directory: &mut ldapkit::Client,
) -> Result<Vec<Operation>> {
    let mut ensure = decl.ensure;
    if is_expired(decl.expiry.as_ref(), now)? {
        log::debug!("User {name} is expired");
        ensure = Ensure::Absent;
    }
    if ensure == Ensure::Absent {
        return Ok(vec![Operation::DropRole(name.to_string())]);
    }

    let auth = AuthMode::normalize(decl.auth());
    let declared = RoleOption::parse_all(name, &decl.options)?;
    let options = RoleOption::with_defaults(&[RoleOption::LOGIN], declared);

    let mut plan = Vec::new();
    if auth == AuthMode::LdapGroup {
        // options go on the members, not on the group
        plan.push(Operation::CreateRole {
            role: name.to_string(),
            options: Vec::new(),
        });
        for member in resolve_members(name, decl, directory)? {
            plan.push(Operation::CreateRole {
                role: member.clone(),
                options: options.clone(),
            });
            plan.push(Operation::GrantRole {
                granted: name.to_string(),
                grantee: member.clone(),
            });
            plan.push(Operation::ResetPassword(member));
        }
    } else {
        plan.push(Operation::CreateRole {
            role: name.to_string(),
            options,
        });
    }

    if auth.is_external() {
        plan.push(Operation::ResetPassword(name.to_string()));
    } else if let Some(password) = &decl.password {
        plan.push(Operation::SetPassword {
            role: name.to_string(),
            password: password.clone(),
        });
    }

    plan.extend(decl.memberof.iter().map(|parent| Operation::GrantRole {
        granted: parent.clone(),
        grantee: name.to_string(),
    }));
    Ok(plan)
}

fn resolve_members(
    name: &str,
    decl: &UserDecl,
    directory: &mut ldapkit::Client,
) -> Result<Vec<String>> {
    let query = GroupQuery {
        entity: name,
        filter: decl.ldapfilter.as_deref().unwrap_or(name),
        base_dn: decl.ldapbasedn.as_deref(),
        attribute: decl.ldapattribute.as_deref(),
        prefix: decl.prefix.as_deref(),
        suffix: decl.suffix.as_deref(),
    };
    let members = directory
        .resolve_group_members(&query)
        .with_context(|| format!("could not resolve members of group {name}"))?;
    log::debug!("Group {name} has {} member(s)", members.len());
    Ok(members.into_iter().collect())
}

/// Plan a role and its memberships.
pub fn expand_role(name: &str, decl: &RoleDecl) -> Result<Vec<Operation>> {
    if decl.ensure == Ensure::Absent {
        return Ok(vec![Operation::DropRole(name.to_string())]);
    }
    let options = RoleOption::parse_all(name, &decl.options)?;
    let mut plan = vec![Operation::CreateRole {
        role: name.to_string(),
        options,
    }];
    plan.extend(decl.memberof.iter().map(|parent| Operation::GrantRole {
        granted: parent.clone(),
        grantee: name.to_string(),
    }));
    Ok(plan)
}

/// Plan a database, without its extensions.
pub fn expand_database(name: &str, decl: &DatabaseDecl) -> Operation {
    match decl.ensure {
        Ensure::Absent => Operation::DropDatabase(name.to_string()),
        Ensure::Present => Operation::CreateDatabase {
            database: name.to_string(),
            owner: decl.owner.clone(),
        },
    }
}

pub fn expand_extension(database: &str, name: &str, decl: &ExtensionDecl) -> Operation {
    match decl.ensure {
        Ensure::Absent => Operation::DropExtension {
            database: database.to_string(),
            extension: name.to_string(),
        },
        Ensure::Present => Operation::CreateExtension {
            database: database.to_string(),
            extension: name.to_string(),
            schema: decl.schema().to_string(),
            version: decl.version(),
        },
    }
}

pub fn expand_slot(name: &str, decl: &SlotDecl) -> Operation {
    match decl.ensure {
        Ensure::Absent => Operation::DropSlot(name.to_string()),
        Ensure::Present => Operation::CreateSlot(name.to_string()),
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Problems found in declarations without contacting anything.
pub fn validate(config: &Config) -> Vec<String> {
    let mut problems = Vec::new();
    if let Err(e) = config.general.level_filter() {
        problems.push(format!("general: {e}"));
    }
    for (name, decl) in &config.users {
        if let Some(expiry) = &decl.expiry
            && let Err(e) = parse_expiry(&expiry.to_string())
        {
            problems.push(format!("user {name}: {e:#}"));
        }
        if let Err(e) = RoleOption::parse_all(name, &decl.options) {
            problems.push(format!("user {name}: {e}"));
        }
        let auth = AuthMode::normalize(decl.auth());
        if auth == AuthMode::LdapGroup
            && !decl.ldapfilter.as_deref().unwrap_or(name).contains('(')
            && config.ldap.filter_template.is_none()
        {
            problems.push(format!(
                "user {name}: ldapfilter {} has no \"(\" and ldap.filter_template is not set",
                decl.ldapfilter.as_deref().unwrap_or(name)
            ));
        }
    }
    for (name, decl) in &config.roles {
        if let Err(e) = RoleOption::parse_all(name, &decl.options) {
            problems.push(format!("role {name}: {e}"));
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ldapkit::DirectoryConfig;
    use pgkit::RoleFlag;

    fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn disabled_directory() -> ldapkit::Client {
        ldapkit::Client::new(DirectoryConfig {
            enabled: false,
            ..DirectoryConfig::default()
        })
    }

    fn fixture_directory() -> ldapkit::Client {
        let config: DirectoryConfig = serde_yaml::from_str(
            r"
filter_template: (cn=%s)
basedn: ou=groups,dc=example,dc=com
mockdata:
  cn=team1,ou=groups,dc=example,dc=com:
    cn: team1
    memberUid: [user1, user0, dummy]
",
        )
        .unwrap();
        ldapkit::Client::new(config)
    }

    #[test]
    fn test_auth_normalize() {
        assert_eq!(AuthMode::normalize("ldap-group"), AuthMode::LdapGroup);
        assert_eq!(AuthMode::normalize("LDAP_User"), AuthMode::LdapUser);
        assert_eq!(AuthMode::normalize(" md5 "), AuthMode::Md5);
        assert_eq!(AuthMode::normalize("password"), AuthMode::Password);
        assert_eq!(AuthMode::normalize("client cert"), AuthMode::ClientCert);
        assert_eq!(AuthMode::normalize("kerberos"), AuthMode::ClientCert);
        assert!(AuthMode::ClientCert.is_external());
        assert!(!AuthMode::Md5.is_external());
    }

    #[test]
    fn test_parse_expiry_pads_partial_values() {
        let year = parse_expiry("2015").unwrap();
        assert_eq!(year.to_string(), "2015-12-31 23:59:59");
        let month = parse_expiry("2020-07").unwrap();
        assert_eq!(month.to_string(), "2020-07-31 23:59:59");
        let day = parse_expiry("2020-06-15").unwrap();
        assert_eq!(day.to_string(), "2020-06-15 23:59:59");
    }

    #[test]
    fn test_expiry_year_only_is_expired() {
        let expiry = Scalar::Int(2015);
        assert!(is_expired(Some(&expiry), at(2016, 1, 1)).unwrap());
        assert!(!is_expired(Some(&expiry), at(2015, 12, 31)).unwrap());
        assert!(!is_expired(None, at(2099, 1, 1)).unwrap());
    }

    #[test]
    fn test_invalid_expiry() {
        assert!(parse_expiry("next year").is_err());
        assert!(parse_expiry("2015-13").is_err());
    }

    #[test]
    fn test_expired_user_is_dropped() {
        let decl = UserDecl {
            expiry: Some(Scalar::Int(2015)),
            ..UserDecl::default()
        };
        let plan = expand_user("old", &decl, at(2020, 1, 1), &mut disabled_directory()).unwrap();
        assert_eq!(plan, vec![Operation::DropRole("old".to_string())]);
    }

    #[test]
    fn test_password_user() {
        let decl = UserDecl {
            auth: Some("md5".to_string()),
            options: vec!["createdb".to_string()],
            password: Some(Password::new("s3cret")),
            memberof: vec!["dba".to_string()],
            ..UserDecl::default()
        };
        let plan = expand_user("alice", &decl, at(2020, 1, 1), &mut disabled_directory()).unwrap();
        assert_eq!(
            plan,
            vec![
                Operation::CreateRole {
                    role: "alice".to_string(),
                    options: vec![
                        RoleOption::LOGIN,
                        RoleOption {
                            flag: RoleFlag::CreateDb,
                            enabled: true
                        }
                    ],
                },
                Operation::SetPassword {
                    role: "alice".to_string(),
                    password: Password::new("s3cret"),
                },
                Operation::GrantRole {
                    granted: "dba".to_string(),
                    grantee: "alice".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_clientcert_user_resets_password() {
        let decl = UserDecl {
            auth: Some("clientcert".to_string()),
            password: Some(Password::new("ignored")),
            ..UserDecl::default()
        };
        let plan = expand_user("svc", &decl, at(2020, 1, 1), &mut disabled_directory()).unwrap();
        assert_eq!(plan[1], Operation::ResetPassword("svc".to_string()));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_invalid_options_fail_user() {
        let decl = UserDecl {
            options: vec!["FLY".to_string()],
            ..UserDecl::default()
        };
        let err = expand_user("alice", &decl, at(2020, 1, 1), &mut disabled_directory())
            .unwrap_err();
        assert!(err.to_string().contains("FLY"));
    }

    #[test]
    fn test_ldapgroup_expands_members() {
        let decl = UserDecl {
            auth: Some("ldapgroup".to_string()),
            ..UserDecl::default()
        };
        let plan = expand_user("team1", &decl, at(2020, 1, 1), &mut fixture_directory()).unwrap();
        let rendered: Vec<String> = plan.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            [
                "create role team1",
                "create role user0",
                "grant team1 to user0",
                "reset password of user0",
                "create role user1",
                "grant team1 to user1",
                "reset password of user1",
                "reset password of team1",
            ]
        );
        assert_eq!(
            plan[0],
            Operation::CreateRole {
                role: "team1".to_string(),
                options: Vec::new()
            }
        );
        assert!(matches!(
            &plan[1],
            Operation::CreateRole { options, .. } if options == &vec![RoleOption::LOGIN]
        ));
    }

    #[test]
    fn test_ldapgroup_with_disabled_directory_has_no_members() {
        let decl = UserDecl {
            auth: Some("ldapgroup".to_string()),
            ..UserDecl::default()
        };
        let plan = expand_user("team1", &decl, at(2020, 1, 1), &mut disabled_directory()).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_ldapgroup_member_template() {
        let decl = UserDecl {
            auth: Some("ldapgroup".to_string()),
            suffix: Some("@corp".to_string()),
            ..UserDecl::default()
        };
        let plan = expand_user("team1", &decl, at(2020, 1, 1), &mut fixture_directory()).unwrap();
        assert!(plan.contains(&Operation::ResetPassword("user0@corp".to_string())));
    }

    #[test]
    fn test_ldapgroup_suffix_keeps_connection_prefix() {
        let config: DirectoryConfig = serde_yaml::from_str(
            r"
filter_template: (cn=%s)
prefix: corp_
suffix: _ro
mockdata:
  cn=team1,ou=groups:
    cn: team1
    memberUid: [user0]
",
        )
        .unwrap();
        let decl = UserDecl {
            auth: Some("ldapgroup".to_string()),
            suffix: Some("@corp".to_string()),
            ..UserDecl::default()
        };
        let mut directory = ldapkit::Client::new(config);
        let plan = expand_user("team1", &decl, at(2020, 1, 1), &mut directory).unwrap();
        assert!(plan.contains(&Operation::ResetPassword("corp_user0@corp".to_string())));
    }

    #[test]
    fn test_declared_nologin_replaces_login_default() {
        let decl = UserDecl {
            auth: Some("clientcert".to_string()),
            options: vec!["NOLOGIN".to_string(), "CREATEDB".to_string()],
            ..UserDecl::default()
        };
        let plan = expand_user("svc", &decl, at(2020, 1, 1), &mut disabled_directory()).unwrap();
        let Operation::CreateRole { options, .. } = &plan[0] else {
            panic!("unexpected plan: {plan:?}");
        };
        let rendered: Vec<String> = options.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["NOLOGIN", "CREATEDB"]);
    }

    #[test]
    fn test_expand_role() {
        let decl = RoleDecl {
            options: vec!["nologin".to_string()],
            memberof: vec!["readers".to_string()],
            ..RoleDecl::default()
        };
        let plan = expand_role("auditors", &decl).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].to_string(), "grant readers to auditors");

        let absent = RoleDecl {
            ensure: Ensure::Absent,
            ..RoleDecl::default()
        };
        assert_eq!(
            expand_role("auditors", &absent).unwrap(),
            vec![Operation::DropRole("auditors".to_string())]
        );
    }

    #[test]
    fn test_expand_extension_defaults() {
        let op = expand_extension("shop", "pgcrypto", &ExtensionDecl::default());
        assert_eq!(
            op,
            Operation::CreateExtension {
                database: "shop".to_string(),
                extension: "pgcrypto".to_string(),
                schema: "public".to_string(),
                version: None,
            }
        );
    }

    #[test]
    fn test_validate() {
        let config = Config::from_yaml(
            r"
users:
  alice:
    options: [SUPERUSER, FLY]
  old:
    expiry: soon
  team1:
    auth: ldapgroup
roles:
  dba:
    options: [createuser]
",
        )
        .unwrap();
        let problems = validate(&config);
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("FLY")));
        assert!(problems.iter().any(|p| p.contains("soon")));
        assert!(problems.iter().any(|p| p.contains("filter_template")));
    }
}
