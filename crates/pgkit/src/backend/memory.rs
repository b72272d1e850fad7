//! In-memory simulated cluster for tests.
//!
//! Behaves like a freshly initialised server with a `postgres` superuser
//! and the three default databases. Every mutating call is journaled with
//! the statement a live server would have received, so tests can assert
//! both on resulting state and on the absence of writes.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::sql;
use crate::types::{RoleAttributes, RoleOption};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A role of the simulated cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryRole {
    pub attributes: RoleAttributes,
    pub password: Option<String>,
}

/// A database of the simulated cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryDatabase {
    pub owner: String,
    pub allow_connections: bool,
    /// Extension -> installed version.
    pub extensions: BTreeMap<String, String>,
    /// Schema holding tables -> roles granted SELECT on all of them.
    pub schemas: BTreeMap<String, BTreeSet<String>>,
}

/// Complete state of the simulated cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCluster {
    pub current_user: String,
    pub in_recovery: bool,
    /// When set, every call fails as if the server were down.
    pub unreachable: bool,
    pub roles: BTreeMap<String, MemoryRole>,
    /// (granted, grantee) pairs.
    pub memberships: BTreeSet<(String, String)>,
    pub databases: BTreeMap<String, MemoryDatabase>,
    /// Extension -> versions shipped by the server; the first is the default.
    pub available_extensions: BTreeMap<String, Vec<String>>,
    pub slots: BTreeSet<String>,
    /// Statements containing any of these fragments fail.
    pub rejected: Vec<String>,
    /// Statements containing any of these fragments take the server down.
    pub crashing: Vec<String>,
    /// Statements executed so far.
    pub journal: Vec<String>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        let superuser = MemoryRole {
            attributes: RoleAttributes {
                superuser: true,
                create_db: true,
                create_role: true,
                inherit: true,
                login: true,
                replication: true,
            },
            password: None,
        };
        let database = |allow_connections| MemoryDatabase {
            owner: "postgres".to_string(),
            allow_connections,
            ..MemoryDatabase::default()
        };
        Self {
            current_user: "postgres".to_string(),
            in_recovery: false,
            unreachable: false,
            roles: BTreeMap::from([("postgres".to_string(), superuser)]),
            memberships: BTreeSet::new(),
            databases: BTreeMap::from([
                ("postgres".to_string(), database(true)),
                ("template0".to_string(), database(false)),
                ("template1".to_string(), database(true)),
            ]),
            available_extensions: BTreeMap::from([(
                "plpgsql".to_string(),
                vec!["1.0".to_string()],
            )]),
            slots: BTreeSet::new(),
            rejected: Vec::new(),
            crashing: Vec::new(),
            journal: Vec::new(),
        }
    }
}

/// Backend over a shared [`MemoryCluster`].
///
/// Clones share state, so a test can keep one handle while a client owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    cluster: Arc<Mutex<MemoryCluster>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryCluster> {
        self.cluster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a closure against the cluster state.
    pub fn inspect<R>(&self, f: impl FnOnce(&MemoryCluster) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate the cluster state directly, bypassing the journal.
    pub fn modify<R>(&self, f: impl FnOnce(&mut MemoryCluster) -> R) -> R {
        f(&mut self.lock())
    }

    /// Statements executed so far.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn with_role(self, role: &str) -> Self {
        self.modify(|c| {
            c.roles.entry(role.to_string()).or_default();
        });
        self
    }

    pub fn with_login_role(self, role: &str) -> Self {
        self.modify(|c| {
            c.roles.entry(role.to_string()).or_default().attributes.login = true;
        });
        self
    }

    pub fn with_membership(self, granted: &str, grantee: &str) -> Self {
        let this = self.with_role(granted).with_role(grantee);
        this.modify(|c| {
            c.memberships
                .insert((granted.to_string(), grantee.to_string()));
        });
        this
    }

    pub fn with_database(self, database: &str, owner: &str) -> Self {
        let this = self.with_role(owner);
        this.modify(|c| {
            c.databases.insert(
                database.to_string(),
                MemoryDatabase {
                    owner: owner.to_string(),
                    allow_connections: true,
                    ..MemoryDatabase::default()
                },
            );
        });
        this
    }

    /// Add a schema with tables to a database.
    pub fn with_table_schema(self, database: &str, schema: &str) -> Self {
        self.modify(|c| {
            if let Some(db) = c.databases.get_mut(database) {
                db.schemas.entry(schema.to_string()).or_default();
            }
        });
        self
    }

    pub fn with_available_extension(self, extension: &str, versions: &[&str]) -> Self {
        self.modify(|c| {
            c.available_extensions.insert(
                extension.to_string(),
                versions.iter().map(|v| (*v).to_string()).collect(),
            );
        });
        self
    }

    pub fn with_extension(self, database: &str, extension: &str, version: &str) -> Self {
        self.modify(|c| {
            if let Some(db) = c.databases.get_mut(database) {
                db.extensions
                    .insert(extension.to_string(), version.to_string());
            }
        });
        self
    }

    pub fn with_slot(self, slot: &str) -> Self {
        self.modify(|c| {
            c.slots.insert(slot.to_string());
        });
        self
    }

    pub fn with_current_user(self, role: &str) -> Self {
        let this = self.with_login_role(role);
        this.modify(|c| c.current_user = role.to_string());
        this
    }

    /// Make every statement containing `fragment` fail.
    pub fn rejecting(self, fragment: &str) -> Self {
        self.modify(|c| c.rejected.push(fragment.to_string()));
        self
    }

    /// Make the server go away when it receives a statement containing
    /// `fragment`.
    pub fn crashing_on(self, fragment: &str) -> Self {
        self.modify(|c| c.crashing.push(fragment.to_string()));
        self
    }

    pub fn standby(self) -> Self {
        self.modify(|c| c.in_recovery = true);
        self
    }

    fn read(&self) -> Result<MutexGuard<'_, MemoryCluster>> {
        let cluster = self.lock();
        if cluster.unreachable {
            return Err(Error::Connection {
                target: "memory".to_string(),
                message: "server closed the connection unexpectedly".to_string(),
            });
        }
        Ok(cluster)
    }

    fn write(&self, statement: String) -> Result<MutexGuard<'_, MemoryCluster>> {
        let mut cluster = self.read()?;
        if cluster.rejected.iter().any(|f| statement.contains(f.as_str())) {
            return Err(failed(statement, "permission denied"));
        }
        if cluster.crashing.iter().any(|f| statement.contains(f.as_str())) {
            cluster.unreachable = true;
            return Err(Error::Connection {
                target: "memory".to_string(),
                message: "server closed the connection unexpectedly".to_string(),
            });
        }
        cluster.journal.push(statement);
        Ok(cluster)
    }
}

fn failed(statement: String, message: impl std::fmt::Display) -> Error {
    Error::query(statement, message)
}

fn database_mut<'a>(
    cluster: &'a mut MemoryCluster,
    database: &str,
) -> Result<&'a mut MemoryDatabase> {
    cluster
        .databases
        .get_mut(database)
        .ok_or_else(|| Error::Connection {
            target: format!("memory dbname={database}"),
            message: format!("database \"{database}\" does not exist"),
        })
}

impl Backend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn current_user(&mut self) -> Result<String> {
        Ok(self.read()?.current_user.clone())
    }

    fn is_in_recovery(&mut self) -> Result<bool> {
        Ok(self.read()?.in_recovery)
    }

    fn list_roles(&mut self) -> Result<Vec<String>> {
        Ok(self.read()?.roles.keys().cloned().collect())
    }

    fn role_attributes(&mut self, role: &str) -> Result<Option<RoleAttributes>> {
        Ok(self.read()?.roles.get(role).map(|r| r.attributes))
    }

    fn create_role(&mut self, role: &str) -> Result<()> {
        let statement = sql::create_role(role);
        let mut cluster = self.write(statement.clone())?;
        if cluster.roles.contains_key(role) {
            return Err(failed(statement, format!("role \"{role}\" already exists")));
        }
        cluster.roles.insert(role.to_string(), MemoryRole::default());
        Ok(())
    }

    fn alter_role(&mut self, role: &str, option: RoleOption) -> Result<()> {
        let statement = sql::alter_role(role, option);
        let mut cluster = self.write(statement.clone())?;
        match cluster.roles.get_mut(role) {
            Some(r) => {
                r.attributes.set(option.flag, option.enabled);
                Ok(())
            }
            None => Err(failed(statement, format!("role \"{role}\" does not exist"))),
        }
    }

    fn reassign_owned(&mut self, database: &str, role: &str, new_owner: &str) -> Result<()> {
        let mut cluster = self.write(sql::reassign_owned(role, new_owner))?;
        let db = database_mut(&mut cluster, database)?;
        if db.owner == role {
            db.owner = new_owner.to_string();
        }
        Ok(())
    }

    fn drop_role(&mut self, role: &str) -> Result<()> {
        let statement = sql::drop_role(role);
        let mut cluster = self.write(statement.clone())?;
        if cluster.databases.values().any(|d| d.owner == role) {
            return Err(failed(
                statement,
                format!("role \"{role}\" cannot be dropped because some objects depend on it"),
            ));
        }
        if cluster.roles.remove(role).is_none() {
            return Err(failed(statement, format!("role \"{role}\" does not exist")));
        }
        cluster
            .memberships
            .retain(|(granted, grantee)| granted != role && grantee != role);
        Ok(())
    }

    fn password_hash(&mut self, role: &str) -> Result<Option<Option<String>>> {
        Ok(self.read()?.roles.get(role).map(|r| r.password.clone()))
    }

    fn set_password_hash(&mut self, role: &str, hash: Option<&str>) -> Result<()> {
        let statement = sql::set_password(role, hash);
        let mut cluster = self.write(statement.clone())?;
        match cluster.roles.get_mut(role) {
            Some(r) => {
                r.password = hash.map(str::to_string);
                Ok(())
            }
            None => Err(failed(statement, format!("role \"{role}\" does not exist"))),
        }
    }

    fn list_grantees(&mut self, granted: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .memberships
            .iter()
            .filter(|(g, _)| g == granted)
            .map(|(_, grantee)| grantee.clone())
            .collect())
    }

    fn grant_role(&mut self, granted: &str, grantee: &str) -> Result<()> {
        let statement = sql::grant_role(granted, grantee);
        let mut cluster = self.write(statement.clone())?;
        for role in [granted, grantee] {
            if !cluster.roles.contains_key(role) {
                return Err(failed(statement, format!("role \"{role}\" does not exist")));
            }
        }
        cluster
            .memberships
            .insert((granted.to_string(), grantee.to_string()));
        Ok(())
    }

    fn revoke_role(&mut self, granted: &str, grantee: &str) -> Result<()> {
        let mut cluster = self.write(sql::revoke_role(granted, grantee))?;
        cluster
            .memberships
            .remove(&(granted.to_string(), grantee.to_string()));
        Ok(())
    }

    fn list_databases(&mut self) -> Result<Vec<String>> {
        Ok(self.read()?.databases.keys().cloned().collect())
    }

    fn list_connectable_databases(&mut self) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .databases
            .iter()
            .filter(|(_, d)| d.allow_connections)
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn database_owner(&mut self, database: &str) -> Result<Option<String>> {
        Ok(self.read()?.databases.get(database).map(|d| d.owner.clone()))
    }

    fn create_database(&mut self, database: &str) -> Result<()> {
        let statement = sql::create_database(database);
        let mut cluster = self.write(statement.clone())?;
        if cluster.databases.contains_key(database) {
            return Err(failed(
                statement,
                format!("database \"{database}\" already exists"),
            ));
        }
        let owner = cluster.current_user.clone();
        cluster.databases.insert(
            database.to_string(),
            MemoryDatabase {
                owner,
                allow_connections: true,
                ..MemoryDatabase::default()
            },
        );
        Ok(())
    }

    fn set_database_owner(&mut self, database: &str, owner: &str) -> Result<()> {
        let statement = sql::set_database_owner(database, owner);
        let mut cluster = self.write(statement.clone())?;
        if !cluster.roles.contains_key(owner) {
            return Err(failed(statement, format!("role \"{owner}\" does not exist")));
        }
        database_mut(&mut cluster, database)?.owner = owner.to_string();
        Ok(())
    }

    fn drop_database(&mut self, database: &str) -> Result<()> {
        let statement = sql::drop_database(database);
        let mut cluster = self.write(statement.clone())?;
        if cluster.databases.remove(database).is_none() {
            return Err(failed(
                statement,
                format!("database \"{database}\" does not exist"),
            ));
        }
        Ok(())
    }

    fn schemas_missing_select(&mut self, database: &str, role: &str) -> Result<Vec<String>> {
        let mut cluster = self.read()?;
        let db = database_mut(&mut cluster, database)?;
        Ok(db
            .schemas
            .iter()
            .filter(|(_, grantees)| !grantees.contains(role))
            .map(|(schema, _)| schema.clone())
            .collect())
    }

    fn grant_select_on_schema(&mut self, database: &str, schema: &str, role: &str) -> Result<()> {
        let mut cluster = self.write(sql::grant_select_on_schema(schema, role))?;
        let db = database_mut(&mut cluster, database)?;
        db.schemas
            .entry(schema.to_string())
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    fn list_extensions(&mut self, database: &str) -> Result<Vec<String>> {
        let mut cluster = self.read()?;
        Ok(database_mut(&mut cluster, database)?
            .extensions
            .keys()
            .cloned()
            .collect())
    }

    fn extension_version(&mut self, database: &str, extension: &str) -> Result<Option<String>> {
        let mut cluster = self.read()?;
        Ok(database_mut(&mut cluster, database)?
            .extensions
            .get(extension)
            .cloned())
    }

    fn extension_available(
        &mut self,
        _database: &str,
        extension: &str,
        version: Option<&str>,
    ) -> Result<bool> {
        let cluster = self.read()?;
        Ok(match cluster.available_extensions.get(extension) {
            None => false,
            Some(versions) => version.is_none_or(|v| versions.iter().any(|have| have == v)),
        })
    }

    fn create_extension(
        &mut self,
        database: &str,
        extension: &str,
        schema: Option<&str>,
        version: Option<&str>,
    ) -> Result<()> {
        let statement = sql::create_extension(extension, schema, version);
        let mut cluster = self.write(statement.clone())?;
        let installed = match (version, cluster.available_extensions.get(extension)) {
            (Some(v), Some(versions)) if versions.iter().any(|have| have == v) => v.to_string(),
            (None, Some(versions)) if !versions.is_empty() => versions[0].clone(),
            _ => {
                return Err(failed(
                    statement,
                    format!("extension \"{extension}\" is not available"),
                ));
            }
        };
        database_mut(&mut cluster, database)?
            .extensions
            .entry(extension.to_string())
            .or_insert(installed);
        Ok(())
    }

    fn drop_extension(&mut self, database: &str, extension: &str) -> Result<()> {
        let mut cluster = self.write(sql::drop_extension(extension))?;
        database_mut(&mut cluster, database)?
            .extensions
            .remove(extension);
        Ok(())
    }

    fn list_replication_slots(&mut self) -> Result<Vec<String>> {
        Ok(self.read()?.slots.iter().cloned().collect())
    }

    fn create_replication_slot(&mut self, slot: &str) -> Result<()> {
        let statement = format!("SELECT pg_create_physical_replication_slot({})", sql::quote_literal(slot));
        let mut cluster = self.write(statement.clone())?;
        if !cluster.slots.insert(slot.to_string()) {
            return Err(failed(
                statement,
                format!("replication slot \"{slot}\" already exists"),
            ));
        }
        Ok(())
    }

    fn drop_replication_slot(&mut self, slot: &str) -> Result<()> {
        let statement = format!("SELECT pg_drop_replication_slot({})", sql::quote_literal(slot));
        let mut cluster = self.write(statement.clone())?;
        if !cluster.slots.remove(slot) {
            return Err(failed(
                statement,
                format!("replication slot \"{slot}\" does not exist"),
            ));
        }
        Ok(())
    }
}
