//! Reconciliation engine for pgfga
//!
//! One pass runs:
//! 1. Pre-flight - Refuse to touch a standby
//! 2. Users - Roles that log in, including directory group expansion
//! 3. Databases - Databases with their owners, operational grants and extensions
//! 4. Replication slots - Declared slots, undeclared ones are always dropped
//! 5. Roles - Group roles and their memberships
//! 6. Pruning - Undeclared objects per strict category
//!
//! Objects are processed one by one. A failure is recorded in the
//! [`PassSummary`] and the pass moves on; it also turns off pruning for
//! the category it happened in. A lost cluster connection ends the
//! current category early, the next category reconnects.

pub mod expander;
pub mod pruner;
pub mod summary;

use crate::config::{Config, Ensure, Strict};
use chrono::NaiveDateTime;
use expander::Operation;
use pgkit::{Client, Managed};
use std::collections::BTreeSet;
use summary::Category;

pub use summary::{PassSummary, exit_status};

/// Why a pass did not start.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("cluster {target} is a standby, refusing to apply changes")]
    Standby { target: String },

    #[error("could not check recovery state of {target}: {source}")]
    Probe {
        target: String,
        #[source]
        source: pgkit::Error,
    },
}

/// Applies configurations to one cluster.
pub struct Engine {
    cluster: Client,
    directory: ldapkit::Client,
}

/// State of the pass in progress, rebuilt from empty every pass.
struct Pass {
    managed: Managed,
    summary: PassSummary,
    /// Set when a statement failed because the cluster went away.
    connection_lost: bool,
}

impl Pass {
    /// Apply a plan for one object. Stops at the first failing operation.
    fn apply(
        &mut self,
        cluster: &mut Client,
        category: Category,
        object: &str,
        plan: &[Operation],
    ) -> bool {
        let mut changed = false;
        for operation in plan {
            log::debug!("Applying: {operation}");
            match operation.apply(cluster, &mut self.managed) {
                Ok(c) => changed |= c,
                Err(e) => {
                    let kind = e.category();
                    self.summary.fail(category, object, format!("{operation}: {e}"));
                    log::info!("{}: {}", kind.description(), kind.advice());
                    if !kind.is_isolated() {
                        self.connection_lost = true;
                    }
                    return false;
                }
            }
        }
        self.summary.record(changed);
        true
    }

    /// Whether the next object of a category should be processed. False
    /// once an object of the category lost the cluster connection.
    fn proceed(&self, category: Category) -> bool {
        if self.connection_lost {
            log::warn!("Skipping remaining {category}, the cluster connection was lost");
            return false;
        }
        true
    }

    /// Record a failure to plan an object.
    fn fail_expansion(&mut self, category: Category, object: &str, error: &anyhow::Error) {
        let message = match error.downcast_ref::<ldapkit::Error>() {
            Some(directory) => format!("{}: {error:#}", directory.category().description()),
            None => format!("{error:#}"),
        };
        self.summary.fail(category, object, message);
    }
}

impl Engine {
    pub fn new(cluster: Client, directory: ldapkit::Client) -> Self {
        Self { cluster, directory }
    }

    /// Run one full pass of a configuration.
    ///
    /// `now` decides which users have expired.
    pub fn run_pass(
        &mut self,
        config: &Config,
        now: NaiveDateTime,
    ) -> Result<PassSummary, PassError> {
        let target = self.cluster.describe();
        match self.cluster.is_standby() {
            Ok(false) => {}
            Ok(true) => return Err(PassError::Standby { target }),
            Err(source) => return Err(PassError::Probe { target, source }),
        }
        log::info!("Applying configuration to {target}");

        let mut pass = Pass {
            managed: Managed::new(),
            summary: PassSummary::default(),
            connection_lost: false,
        };

        self.process_users(&mut pass, config, now);
        self.process_databases(&mut pass, config);
        self.process_replication_slots(&mut pass, config);
        self.process_roles(&mut pass, config);
        self.prune(&mut pass, config.strict);

        log::info!(
            "Finished applying configuration: {} changed, {} unchanged, {} pruned, {} failed",
            pass.summary.changed,
            pass.summary.no_change,
            pass.summary.pruned,
            pass.summary.error_count()
        );
        Ok(pass.summary)
    }

    fn process_users(&mut self, pass: &mut Pass, config: &Config, now: NaiveDateTime) {
        pass.connection_lost = false;
        for (name, decl) in &config.users {
            if !pass.proceed(Category::Users) {
                break;
            }
            log::debug!("Processing user {name}");
            match expander::expand_user(name, decl, now, &mut self.directory) {
                Ok(plan) => {
                    pass.apply(&mut self.cluster, Category::Users, name, &plan);
                }
                Err(e) => pass.fail_expansion(Category::Users, name, &e),
            }
        }
    }

    fn process_databases(&mut self, pass: &mut Pass, config: &Config) {
        pass.connection_lost = false;
        for (name, decl) in &config.databases {
            if !pass.proceed(Category::Databases) {
                break;
            }
            log::debug!("Processing database {name}");
            let operation = expander::expand_database(name, decl);
            let applied = pass.apply(
                &mut self.cluster,
                Category::Databases,
                name,
                std::slice::from_ref(&operation),
            );
            if decl.ensure == Ensure::Absent {
                continue;
            }
            if !applied {
                if !decl.extensions.is_empty() {
                    log::warn!("Skipping extensions of database {name}, it could not be processed");
                }
                continue;
            }
            pass.managed.manage_extensions_of(name);
            for (extension, ext_decl) in &decl.extensions {
                if !pass.proceed(Category::Extensions) {
                    break;
                }
                let operation = expander::expand_extension(name, extension, ext_decl);
                pass.apply(
                    &mut self.cluster,
                    Category::Extensions,
                    &format!("{name}.{extension}"),
                    std::slice::from_ref(&operation),
                );
            }
        }
    }

    fn process_replication_slots(&mut self, pass: &mut Pass, config: &Config) {
        pass.connection_lost = false;
        let declared: BTreeSet<String> = config
            .replication_slots
            .iter()
            .filter(|(_, decl)| decl.ensure == Ensure::Present)
            .map(|(name, _)| name.clone())
            .collect();
        for (name, decl) in &config.replication_slots {
            if !pass.proceed(Category::ReplicationSlots) {
                break;
            }
            log::debug!("Processing replication slot {name}");
            let operation = expander::expand_slot(name, decl);
            pass.apply(
                &mut self.cluster,
                Category::ReplicationSlots,
                name,
                std::slice::from_ref(&operation),
            );
        }
        pruner::prune_replication_slots(&mut self.cluster, &declared, &mut pass.summary);
    }

    fn process_roles(&mut self, pass: &mut Pass, config: &Config) {
        pass.connection_lost = false;
        for (name, decl) in &config.roles {
            if !pass.proceed(Category::Roles) {
                break;
            }
            log::debug!("Processing role {name}");
            match expander::expand_role(name, decl) {
                Ok(plan) => {
                    pass.apply(&mut self.cluster, Category::Roles, name, &plan);
                }
                Err(e) => pass.fail_expansion(Category::Roles, name, &e),
            }
        }
    }

    fn prune(&mut self, pass: &mut Pass, strict: Strict) {
        let summary = &pass.summary;
        let roles = strict.roles
            && !summary.failed_in(Category::Users)
            && !summary.failed_in(Category::Roles);
        let databases = strict.databases && !summary.failed_in(Category::Databases);
        let extensions = strict.extensions && !summary.failed_in(Category::Extensions);

        if roles {
            log::debug!("Strictifying roles");
            pruner::strictify_roles(&mut self.cluster, &pass.managed, &mut pass.summary);
        } else if strict.roles {
            log::warn!("Not pruning roles, some users or roles failed this pass");
        }
        if databases {
            log::debug!("Strictifying databases");
            pruner::strictify_databases(&mut self.cluster, &pass.managed, &mut pass.summary);
        } else if strict.databases {
            log::warn!("Not pruning databases, some databases failed this pass");
        }
        if extensions {
            log::debug!("Strictifying extensions");
            pruner::strictify_extensions(&mut self.cluster, &pass.managed, &mut pass.summary);
        } else if strict.extensions {
            log::warn!("Not pruning extensions, some extensions failed this pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ldapkit::DirectoryConfig;
    use pgkit::backend::memory::MemoryBackend;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn engine(backend: &MemoryBackend, config: &Config) -> Engine {
        Engine::new(
            Client::with_backend(Box::new(backend.clone())),
            ldapkit::Client::new(config.ldap.clone()),
        )
    }

    fn run(backend: &MemoryBackend, yaml: &str) -> PassSummary {
        let config = Config::from_yaml(yaml).unwrap();
        engine(backend, &config).run_pass(&config, now()).unwrap()
    }

    fn member(c: &pgkit::backend::memory::MemoryCluster, granted: &str, grantee: &str) -> bool {
        c.memberships
            .contains(&(granted.to_string(), grantee.to_string()))
    }

    const DATABASE_FOO: &str = "
strict:
  databases: true
ldap:
  enabled: false
databases:
  foo:
";

    #[test]
    fn test_database_with_default_owner() {
        let backend = MemoryBackend::new().with_database("bar", "bar");
        let summary = run(&backend, DATABASE_FOO);
        assert!(summary.is_success(), "{:?}", summary.failures);

        backend.inspect(|c| {
            assert_eq!(c.databases["foo"].owner, "foo");
            assert!(member(c, "foo", "opex"));
            assert!(member(c, "foo_readonly", "readonly"));
            assert!(!c.databases.contains_key("bar"));
            assert!(!c.roles.contains_key("bar"));
            assert!(c.databases.contains_key("postgres"));
        });
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        let yaml = "
ldap:
  enabled: false
users:
  alice:
    password: s3cret
    options: [CREATEDB]
    memberof: [dba]
roles:
  dba:
    options: [NOLOGIN]
databases:
  shop:
    owner: alice
replication_slots:
  replica1:
";
        let backend = MemoryBackend::new();
        let first = run(&backend, yaml);
        assert!(first.is_success(), "{:?}", first.failures);
        assert!(first.changed > 0);

        backend.clear_journal();
        let second = run(&backend, yaml);
        assert!(second.is_success());
        assert_eq!(second.total_changes(), 0);
        assert!(backend.journal().is_empty(), "{:?}", backend.journal());
    }

    #[test]
    fn test_standby_aborts_without_writes() {
        let backend = MemoryBackend::new().standby();
        let config = Config::from_yaml(DATABASE_FOO).unwrap();
        let err = engine(&backend, &config)
            .run_pass(&config, now())
            .unwrap_err();
        assert!(matches!(err, PassError::Standby { .. }));
        assert!(backend.journal().is_empty());
    }

    #[test]
    fn test_unreachable_cluster_fails_preflight() {
        let backend = MemoryBackend::new();
        backend.modify(|c| c.unreachable = true);
        let config = Config::from_yaml(DATABASE_FOO).unwrap();
        let err = engine(&backend, &config)
            .run_pass(&config, now())
            .unwrap_err();
        assert!(matches!(err, PassError::Probe { .. }));
    }

    #[test]
    fn test_failed_user_disables_role_pruning() {
        let backend = MemoryBackend::new().with_role("operator");
        let summary = run(
            &backend,
            "
ldap:
  enabled: false
users:
  alice:
    options: [FLY]
  bob:
",
        );
        assert_eq!(summary.error_count(), 1);
        assert_eq!(summary.failures[0].category, Category::Users);
        assert_eq!(summary.failures[0].object, "alice");
        backend.inspect(|c| {
            assert!(c.roles.contains_key("operator"));
            assert!(c.roles.contains_key("bob"));
        });
    }

    #[test]
    fn test_roles_pruned_without_failures() {
        let backend = MemoryBackend::new()
            .with_role("operator")
            .with_membership("dba", "scot")
            .with_membership("dba", "john");
        let summary = run(
            &backend,
            "
ldap:
  enabled: false
roles:
  dba:
  scot:
    memberof: [dba]
  john:
",
        );
        assert!(summary.is_success(), "{:?}", summary.failures);
        backend.inspect(|c| {
            assert!(!c.roles.contains_key("operator"));
            assert!(member(c, "dba", "scot"));
            assert!(!member(c, "dba", "john"));
        });
    }

    #[test]
    fn test_expired_user_is_dropped() {
        let backend = MemoryBackend::new().with_login_role("old");
        let summary = run(
            &backend,
            "
ldap:
  enabled: false
strict:
  roles: false
users:
  old:
    expiry: 2015
  forever:
    expiry:
",
        );
        assert!(summary.is_success());
        backend.inspect(|c| {
            assert!(!c.roles.contains_key("old"));
            assert!(c.roles["forever"].attributes.login);
        });
    }

    #[test]
    fn test_ldapgroup_members_from_fixtures() {
        let backend = MemoryBackend::new();
        let summary = run(
            &backend,
            "
ldap:
  basedn: ou=groups,dc=example,dc=com
  filter_template: (cn=%s)
  mockdata:
    cn=team1,ou=groups,dc=example,dc=com:
      cn: team1
      memberUid: [user0, user1, dummy]
users:
  team1:
    auth: ldapgroup
",
        );
        assert!(summary.is_success(), "{:?}", summary.failures);
        backend.inspect(|c| {
            assert!(member(c, "team1", "user0"));
            assert!(member(c, "team1", "user1"));
            assert!(!c.roles.contains_key("dummy"));
            assert!(c.roles["user0"].attributes.login);
            assert!(!c.roles["team1"].attributes.login);
        });
    }

    #[test]
    fn test_missing_filter_template_fails_one_user() {
        let backend = MemoryBackend::new();
        let summary = run(
            &backend,
            "
ldap:
  mockdata:
    cn=team1,ou=groups:
      cn: team1
users:
  team1:
    auth: ldapgroup
  alice:
",
        );
        assert_eq!(summary.error_count(), 1);
        assert!(summary.failures[0].message.contains("filter_template"));
        assert!(
            summary.failures[0]
                .message
                .starts_with("Invalid directory configuration")
        );
        backend.inspect(|c| assert!(c.roles.contains_key("alice")));
    }

    #[test]
    fn test_extensions_of_failed_database_are_skipped() {
        let backend = MemoryBackend::new()
            .with_available_extension("pgcrypto", &["1.3"])
            .with_database("shop", "shop")
            .with_extension("shop", "hstore", "1.8")
            .rejecting("CREATE DATABASE \"broken\"");
        let summary = run(
            &backend,
            "
ldap:
  enabled: false
databases:
  shop:
    extensions:
      pgcrypto:
  broken:
    owner: postgres
    extensions:
      pgcrypto:
",
        );
        assert_eq!(summary.error_count(), 1);
        assert_eq!(summary.failures[0].category, Category::Databases);
        assert_eq!(summary.failures[0].object, "broken");
        backend.inspect(|c| {
            assert!(!c.databases.contains_key("broken"));
            assert!(c.databases["shop"].extensions.contains_key("pgcrypto"));
            assert!(!c.databases["shop"].extensions.contains_key("hstore"));
        });
    }

    #[test]
    fn test_unavailable_extension_disables_extension_pruning() {
        let backend = MemoryBackend::new()
            .with_database("shop", "shop")
            .with_extension("shop", "hstore", "1.8");
        let summary = run(
            &backend,
            "
ldap:
  enabled: false
databases:
  shop:
    extensions:
      postgis:
",
        );
        assert_eq!(summary.error_count(), 1);
        assert_eq!(summary.failures[0].category, Category::Extensions);
        assert_eq!(summary.failures[0].object, "shop.postgis");
        backend.inspect(|c| assert!(c.databases["shop"].extensions.contains_key("hstore")));
    }

    #[test]
    fn test_slots_pruned_unconditionally() {
        let backend = MemoryBackend::new().with_slot("stale");
        let summary = run(
            &backend,
            "
ldap:
  enabled: false
strict:
  roles: false
  databases: false
  extensions: false
slots:
  replica1:
",
        );
        assert!(summary.is_success());
        backend.inspect(|c| {
            assert_eq!(c.slots, BTreeSet::from(["replica1".to_string()]));
        });
    }

    #[test]
    fn test_declared_nologin_is_stable() {
        let yaml = "
ldap:
  enabled: false
users:
  svc:
    auth: clientcert
    options: [NOLOGIN]
";
        let backend = MemoryBackend::new();
        let first = run(&backend, yaml);
        assert!(first.is_success(), "{:?}", first.failures);
        assert!(!backend.inspect(|c| c.roles["svc"].attributes.login));

        backend.clear_journal();
        let second = run(&backend, yaml);
        assert_eq!(second.total_changes(), 0);
        assert!(backend.journal().is_empty(), "{:?}", backend.journal());
    }

    #[test]
    fn test_absent_extension_is_dropped() {
        let backend = MemoryBackend::new()
            .with_database("shop", "shop")
            .with_extension("shop", "hstore", "1.8");
        let yaml = "
ldap:
  enabled: false
strict:
  extensions: false
databases:
  shop:
    extensions:
      hstore:
        ensure: absent
";
        let first = run(&backend, yaml);
        assert!(first.is_success(), "{:?}", first.failures);
        assert!(backend.inspect(|c| c.databases["shop"].extensions.is_empty()));

        backend.clear_journal();
        let second = run(&backend, yaml);
        assert_eq!(second.total_changes(), 0);
        assert!(backend.journal().is_empty(), "{:?}", backend.journal());
    }

    #[test]
    fn test_lost_connection_skips_rest_of_category() {
        let backend = MemoryBackend::new().crashing_on("CREATE ROLE \"alice\"");
        let summary = run(
            &backend,
            "
ldap:
  enabled: false
users:
  alice:
  bob:
  carol:
",
        );
        let users: Vec<_> = summary
            .failures
            .iter()
            .filter(|f| f.category == Category::Users)
            .collect();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].object, "alice");
        assert!(users[0].message.contains("connection"));
        backend.inspect(|c| {
            assert!(!c.roles.contains_key("bob"));
            assert!(!c.roles.contains_key("carol"));
        });
        assert!(backend.journal().is_empty());
    }
}
