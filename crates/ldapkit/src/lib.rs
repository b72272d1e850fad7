//! # ldapkit
//!
//! Resolves directory groups into the account names of their members.
//!
//! A group is found by filter under a base DN; its membership attribute is
//! read and every value is turned into an account name:
//!
//! - plain values (`alice`) are account names already
//! - DNs of user entries resolve to their `sAMAccountName`
//! - DNs of entries that carry the membership attribute themselves are
//!   nested groups and are expanded in turn
//! - DNs that cannot be found are used verbatim
//!
//! ## Example
//!
//! ```no_run
//! use ldapkit::{Client, DirectoryConfig, GroupQuery};
//!
//! let config = DirectoryConfig {
//!     servers: vec!["ldap.example.com".to_string()],
//!     user: Some("cn=reader,dc=example,dc=com".to_string()),
//!     password: Some("secret".to_string()),
//!     filter_template: Some("(cn=%s)".to_string()),
//!     ..DirectoryConfig::default()
//! };
//! let mut client = Client::new(config);
//! let members = client.resolve_group_members(&GroupQuery::new("devs", "devs")).unwrap();
//! ```

#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod error;
pub mod filter;
pub mod template;

pub use config::DirectoryConfig;
pub use error::{Error, ErrorCategory, Result};
pub use template::Template;

use backend::{Backend, Entry, Scope, fixture::FixtureBackend, ldap::LdapBackend};
use std::collections::{BTreeSet, VecDeque};

/// Member name that never appears in a result.
///
/// Directories that require at least one member value commonly carry it.
pub const PLACEHOLDER_MEMBER: &str = "dummy";

const ACCOUNT_ATTRIBUTE: &str = "sAMAccountName";
const USER_CLASS: &str = "user";

/// Parameters of one group lookup. Unset fields fall back to the
/// connection-level settings.
#[derive(Debug, Clone, Default)]
pub struct GroupQuery<'a> {
    /// User or role the lookup is done for (used in error messages)
    pub entity: &'a str,
    /// Full filter, or a bare group name for `filter_template`
    pub filter: &'a str,
    pub base_dn: Option<&'a str>,
    pub attribute: Option<&'a str>,
    /// Prepended to every member name, instead of the configured `prefix`
    pub prefix: Option<&'a str>,
    /// Appended to every member name, instead of the configured `suffix`
    pub suffix: Option<&'a str>,
}

impl<'a> GroupQuery<'a> {
    pub fn new(entity: &'a str, filter: &'a str) -> Self {
        Self {
            entity,
            filter,
            ..Self::default()
        }
    }
}

/// How a single membership value was turned into a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The value had no `=` and is an account name as is
    Literal(String),
    /// The value was the DN of a user entry
    ResolvedToAccount(String),
    /// The value looked like a DN but no user was found there
    FallbackToRaw(String),
    /// The value was the DN of another group, with that group's member values
    NestedGroup { dn: String, members: Vec<String> },
}

/// High-level client for directory group lookups.
pub struct Client {
    config: DirectoryConfig,
    backend: Option<Box<dyn Backend>>,
}

impl Client {
    /// Create a client from configuration.
    ///
    /// Fixture data selects the offline backend. Without fixtures, missing
    /// servers or credentials disable the client for its whole lifetime.
    pub fn new(mut config: DirectoryConfig) -> Self {
        if !config.enabled {
            log::debug!("Directory synchronisation is disabled");
            return Self {
                config,
                backend: None,
            };
        }
        if !config.mockdata.is_empty() {
            log::debug!("Serving directory lookups from fixture data");
            let backend = FixtureBackend::from_fixtures(&config.mockdata);
            return Self::with_backend(config, Box::new(backend));
        }
        let missing = config.missing_settings();
        if !missing.is_empty() {
            for key in &missing {
                log::error!("Directory connection requires a value for '{key}'");
            }
            log::info!("Disabling directory synchronisation due to missing configuration");
            config.enabled = false;
            return Self {
                config,
                backend: None,
            };
        }
        let backend = LdapBackend::new(&config);
        Self::with_backend(config, Box::new(backend))
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(config: DirectoryConfig, backend: Box<dyn Backend>) -> Self {
        Self {
            config,
            backend: Some(backend),
        }
    }

    /// Whether lookups reach a directory at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.backend.is_some()
    }

    /// Connect ahead of the first lookup.
    ///
    /// Returns `None` without any network activity when disabled.
    pub fn connect(&mut self) -> Result<Option<&mut dyn Backend>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let Some(backend) = self.backend.as_mut() else {
            return Ok(None);
        };
        let backend: &mut dyn Backend = &mut **backend;
        backend.connect()?;
        Ok(Some(backend))
    }

    /// The filter a query searches with.
    pub fn effective_filter(&self, query: &GroupQuery<'_>) -> Result<String> {
        if query.filter.contains('(') {
            return Ok(query.filter.to_string());
        }
        let template =
            self.config
                .filter_template
                .as_deref()
                .ok_or_else(|| Error::MissingFilterTemplate {
                    entity: query.entity.to_string(),
                    filter: query.filter.to_string(),
                })?;
        template::fill_filter_template(template, query.filter).ok_or_else(|| {
            Error::InvalidFilterTemplate {
                template: template.to_string(),
            }
        })
    }

    /// Member name template of a query, each half falling back to the
    /// connection settings on its own.
    pub fn template(&self, query: &GroupQuery<'_>) -> Template {
        Template::new(
            query.prefix.unwrap_or(self.config.prefix.as_str()),
            query.suffix.unwrap_or(self.config.suffix.as_str()),
        )
    }

    /// Sorted, deduplicated member names of the groups a query matches.
    pub fn resolve_group_members(&mut self, query: &GroupQuery<'_>) -> Result<BTreeSet<String>> {
        if !self.is_enabled() {
            log::debug!(
                "Directory disabled, group of {} resolves to no members",
                query.entity
            );
            return Ok(BTreeSet::new());
        }
        let filter = self.effective_filter(query)?;
        let base = query.base_dn.unwrap_or(&self.config.basedn).to_string();
        let attribute = query
            .attribute
            .unwrap_or(&self.config.ldapattribute)
            .to_string();
        let template = self.template(query);

        let Some(backend) = self.connect()? else {
            return Ok(BTreeSet::new());
        };

        let groups = backend.search(&base, Scope::Subtree, &filter, &[attribute.as_str()])?;
        let mut visited: BTreeSet<String> = groups.iter().map(|g| g.dn.to_lowercase()).collect();
        let mut pending: VecDeque<String> = groups
            .iter()
            .flat_map(|g| g.values(&attribute).iter().cloned())
            .collect();
        let mut names = BTreeSet::new();

        while let Some(value) = pending.pop_front() {
            match resolve_member(backend, &value, &attribute)? {
                Resolution::Literal(name) | Resolution::ResolvedToAccount(name) => {
                    names.insert(name);
                }
                Resolution::FallbackToRaw(raw) => {
                    log::warn!("Could not find {raw} in directory, using it directly");
                    names.insert(raw);
                }
                Resolution::NestedGroup { dn, members } => {
                    if visited.insert(dn.to_lowercase()) {
                        log::debug!("Expanding nested group {dn}");
                        pending.extend(members);
                    } else {
                        log::debug!("Group {dn} already expanded, skipping");
                    }
                }
            }
        }

        Ok(names
            .into_iter()
            .filter(|name| name != PLACEHOLDER_MEMBER)
            .map(|name| template.apply(&name))
            .filter(|name| name != PLACEHOLDER_MEMBER)
            .collect())
    }
}

/// Turn one membership value into a name, or into a nested group.
pub fn resolve_member(
    backend: &mut dyn Backend,
    value: &str,
    attribute: &str,
) -> Result<Resolution> {
    if !value.contains('=') {
        return Ok(Resolution::Literal(value.to_string()));
    }
    let entries = backend.search(
        value,
        Scope::Base,
        "(objectClass=*)",
        &["objectClass", ACCOUNT_ATTRIBUTE, attribute],
    )?;
    let Some(entry) = entries.into_iter().next() else {
        return Ok(Resolution::FallbackToRaw(value.to_string()));
    };
    Ok(classify(entry, value, attribute))
}

fn classify(entry: Entry, value: &str, attribute: &str) -> Resolution {
    if entry.has_object_class(USER_CLASS)
        && let Some(account) = entry.values(ACCOUNT_ATTRIBUTE).first()
    {
        return Resolution::ResolvedToAccount(account.clone());
    }
    let members = entry.values(attribute);
    if !members.is_empty() {
        return Resolution::NestedGroup {
            members: members.to_vec(),
            dn: entry.dn,
        };
    }
    Resolution::FallbackToRaw(value.to_string())
}
