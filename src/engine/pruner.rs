//! Removal of live objects that no declaration accounts for.
//!
//! Each function compares what the pass recorded in [`Managed`] with the
//! live catalog, removes the difference through the same idempotent
//! primitives the apply phase uses, and returns whether anything changed.
//! Failures are recorded against their category and do not stop the
//! remaining removals.

use super::summary::{Category, PassSummary};
use pgkit::{Client, Managed, is_protected_database, is_protected_extension, is_protected_role};
use std::collections::BTreeSet;

/// Revoke undeclared memberships of managed roles, then drop every role
/// that is neither managed nor protected.
pub fn strictify_roles(cluster: &mut Client, managed: &Managed, summary: &mut PassSummary) -> bool {
    let mut changed = false;

    for (granted, grantees) in managed.grants() {
        let live = match cluster.list_grantees(granted) {
            Ok(live) => live,
            Err(e) => {
                summary.fail(Category::Roles, granted, e);
                continue;
            }
        };
        for grantee in live.iter().filter(|g| !grantees.contains(*g)) {
            match cluster.revoke_role(granted, grantee) {
                Ok(revoked) => {
                    changed |= revoked;
                    summary.pruned += usize::from(revoked);
                }
                Err(e) => summary.fail(Category::Roles, &format!("{granted} -> {grantee}"), e),
            }
        }
    }

    let keep = managed.roles();
    let live = match cluster.list_roles() {
        Ok(live) => live,
        Err(e) => {
            summary.fail(Category::Roles, "*", e);
            return changed;
        }
    };
    for role in live {
        if keep.contains(&role) || is_protected_role(&role) {
            continue;
        }
        match cluster.drop_role(&role) {
            Ok(dropped) => {
                changed |= dropped;
                summary.pruned += usize::from(dropped);
            }
            Err(e) => summary.fail(Category::Roles, &role, e),
        }
    }
    changed
}

/// Drop every database that is neither managed nor protected.
pub fn strictify_databases(
    cluster: &mut Client,
    managed: &Managed,
    summary: &mut PassSummary,
) -> bool {
    let live = match cluster.list_databases() {
        Ok(live) => live,
        Err(e) => {
            summary.fail(Category::Databases, "*", e);
            return false;
        }
    };
    let mut changed = false;
    for database in live {
        if managed.databases().contains(&database) || is_protected_database(&database) {
            continue;
        }
        match cluster.drop_database(&database) {
            Ok(dropped) => {
                changed |= dropped;
                summary.pruned += usize::from(dropped);
            }
            Err(e) => summary.fail(Category::Databases, &database, e),
        }
    }
    changed
}

/// Drop undeclared extensions from every database whose extensions are
/// managed this pass.
pub fn strictify_extensions(
    cluster: &mut Client,
    managed: &Managed,
    summary: &mut PassSummary,
) -> bool {
    let mut changed = false;
    for (database, declared) in managed.extensions() {
        let live = match cluster.list_extensions(database) {
            Ok(live) => live,
            Err(e) => {
                summary.fail(Category::Extensions, database, e);
                continue;
            }
        };
        for extension in live {
            if declared.contains(&extension) || is_protected_extension(&extension) {
                continue;
            }
            match cluster.drop_extension(database, &extension) {
                Ok(dropped) => {
                    changed |= dropped;
                    summary.pruned += usize::from(dropped);
                }
                Err(e) => summary.fail(Category::Extensions, &format!("{database}.{extension}"), e),
            }
        }
    }
    changed
}

/// Drop every live replication slot that is not declared present.
///
/// Unlike the other categories this is not gated by a strict flag.
pub fn prune_replication_slots(
    cluster: &mut Client,
    declared: &BTreeSet<String>,
    summary: &mut PassSummary,
) -> bool {
    let live = match cluster.list_replication_slots() {
        Ok(live) => live,
        Err(e) => {
            summary.fail(Category::ReplicationSlots, "*", e);
            return false;
        }
    };
    let mut changed = false;
    for slot in live.iter().filter(|s| !declared.contains(*s)) {
        match cluster.drop_replication_slot(slot) {
            Ok(dropped) => {
                changed |= dropped;
                summary.pruned += usize::from(dropped);
            }
            Err(e) => summary.fail(Category::ReplicationSlots, slot, e),
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgkit::backend::memory::MemoryBackend;

    fn client(backend: &MemoryBackend) -> Client {
        Client::with_backend(Box::new(backend.clone()))
    }

    #[test]
    fn test_strictify_roles_revokes_undeclared_grantee() {
        let backend = MemoryBackend::new()
            .with_membership("dba", "scot")
            .with_membership("dba", "john");
        let mut cluster = client(&backend);
        let mut managed = Managed::new();
        managed.record_grant("dba", "scot");
        managed.record_role("john");

        let mut summary = PassSummary::default();
        assert!(strictify_roles(&mut cluster, &managed, &mut summary));
        assert!(summary.is_success());
        backend.inspect(|c| {
            assert!(c.memberships.contains(&("dba".to_string(), "scot".to_string())));
            assert!(!c.memberships.contains(&("dba".to_string(), "john".to_string())));
        });
    }

    #[test]
    fn test_strictify_roles_drops_unmanaged_role() {
        let backend = MemoryBackend::new().with_role("dba").with_role("operator");
        let mut cluster = client(&backend);
        let mut managed = Managed::new();
        managed.record_role("dba");

        let mut summary = PassSummary::default();
        assert!(strictify_roles(&mut cluster, &managed, &mut summary));
        assert_eq!(summary.pruned, 1);
        backend.inspect(|c| {
            assert!(c.roles.contains_key("dba"));
            assert!(!c.roles.contains_key("operator"));
            assert!(c.roles.contains_key("postgres"));
        });
    }

    #[test]
    fn test_strictify_roles_nothing_to_do() {
        let backend = MemoryBackend::new().with_membership("dba", "scot");
        let mut cluster = client(&backend);
        let mut managed = Managed::new();
        managed.record_grant("dba", "scot");

        let mut summary = PassSummary::default();
        assert!(!strictify_roles(&mut cluster, &managed, &mut summary));
        assert!(backend.journal().is_empty());
    }

    #[test]
    fn test_strictify_databases_keeps_protected() {
        let backend = MemoryBackend::new()
            .with_database("shop", "shop")
            .with_database("bar", "bar");
        let mut cluster = client(&backend);
        let mut managed = Managed::new();
        managed.record_database("shop");

        let mut summary = PassSummary::default();
        assert!(strictify_databases(&mut cluster, &managed, &mut summary));
        backend.inspect(|c| {
            let names: Vec<&str> = c.databases.keys().map(String::as_str).collect();
            assert_eq!(names, ["postgres", "shop", "template0", "template1"]);
        });
    }

    #[test]
    fn test_strictify_extensions_only_in_managed_databases() {
        let backend = MemoryBackend::new()
            .with_database("shop", "shop")
            .with_database("legacy", "legacy")
            .with_extension("shop", "plpgsql", "1.0")
            .with_extension("shop", "pgcrypto", "1.3")
            .with_extension("shop", "hstore", "1.8")
            .with_extension("legacy", "hstore", "1.8");
        let mut cluster = client(&backend);
        let mut managed = Managed::new();
        managed.manage_extensions_of("shop");
        managed.record_extension("shop", "pgcrypto");

        let mut summary = PassSummary::default();
        assert!(strictify_extensions(&mut cluster, &managed, &mut summary));
        backend.inspect(|c| {
            let shop: Vec<&str> = c.databases["shop"].extensions.keys().map(String::as_str).collect();
            assert_eq!(shop, ["pgcrypto", "plpgsql"]);
            assert!(c.databases["legacy"].extensions.contains_key("hstore"));
        });
    }

    #[test]
    fn test_prune_replication_slots() {
        let backend = MemoryBackend::new().with_slot("replica1").with_slot("stale");
        let mut cluster = client(&backend);
        let declared = BTreeSet::from(["replica1".to_string()]);

        let mut summary = PassSummary::default();
        assert!(prune_replication_slots(&mut cluster, &declared, &mut summary));
        backend.inspect(|c| {
            assert_eq!(c.slots, BTreeSet::from(["replica1".to_string()]));
        });
    }

    #[test]
    fn test_prune_failure_is_recorded() {
        let backend = MemoryBackend::new().with_role("operator");
        backend.modify(|c| c.unreachable = true);
        let mut cluster = client(&backend);

        let mut summary = PassSummary::default();
        assert!(!strictify_roles(&mut cluster, &Managed::new(), &mut summary));
        assert!(summary.failed_in(Category::Roles));
    }
}
