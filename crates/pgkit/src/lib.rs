//! # pgkit
//!
//! Idempotent administration primitives for a PostgreSQL cluster.
//!
//! Every mutating method of [`Client`] first inspects the live catalog and
//! only issues a statement when the cluster differs from what was asked
//! for. The returned `bool` says whether anything changed, so running the
//! same call twice yields `false` the second time.
//!
//! ## Example
//!
//! ```no_run
//! use pgkit::{Client, ConnectionConfig, Managed, RoleOption};
//!
//! let mut client = Client::new(ConnectionConfig::default()).unwrap();
//! let mut managed = Managed::new();
//!
//! client.create_role(&mut managed, "alice", &[RoleOption::LOGIN]).unwrap();
//! client.create_database(&mut managed, "shop", Some("alice")).unwrap();
//! ```

#![warn(clippy::all)]

pub mod backend;
pub mod connection;
pub mod error;
pub mod managed;
pub mod password;
pub mod sql;
pub mod types;

pub use connection::ConnectionConfig;
pub use error::{Error, ErrorCategory, Result};
pub use managed::Managed;
pub use types::{
    OPEX_ROLE, Password, READONLY_ROLE, RoleAttributes, RoleFlag, RoleOption, SUPERUSER_ROLE,
    is_protected_database, is_protected_extension, is_protected_role, readonly_role_name,
};

use backend::{Backend, postgres::PostgresBackend};

/// High-level client for cluster administration.
pub struct Client {
    backend: Box<dyn Backend>,
    current_user: Option<String>,
}

impl Client {
    /// Create a client for a live cluster.
    ///
    /// No connection is opened until the first call.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let backend = PostgresBackend::new(config)?;
        Ok(Self::with_backend(Box::new(backend)))
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            current_user: None,
        }
    }

    /// Connection target for log messages.
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Whether the cluster is a standby and must not receive writes.
    pub fn is_standby(&mut self) -> Result<bool> {
        self.backend.is_in_recovery()
    }

    /// Role this client is connected as.
    pub fn current_user(&mut self) -> Result<String> {
        if let Some(user) = &self.current_user {
            return Ok(user.clone());
        }
        let user = self.backend.current_user()?;
        self.current_user = Some(user.clone());
        Ok(user)
    }

    fn role_exists(&mut self, role: &str) -> Result<bool> {
        Ok(self.backend.role_attributes(role)?.is_some())
    }

    fn database_exists(&mut self, database: &str) -> Result<bool> {
        Ok(self.backend.database_owner(database)?.is_some())
    }

    // =========================================================================
    // Roles
    // =========================================================================

    /// Create a role if absent and bring its options in line.
    pub fn create_role(
        &mut self,
        managed: &mut Managed,
        role: &str,
        options: &[RoleOption],
    ) -> Result<bool> {
        managed.record_role(role);
        let mut changed = false;
        let attributes = match self.backend.role_attributes(role)? {
            Some(attributes) => attributes,
            None => {
                self.backend.create_role(role)?;
                log::info!("Created role '{role}'");
                changed = true;
                RoleAttributes::default()
            }
        };
        for option in options {
            if option.is_satisfied_by(&attributes) {
                continue;
            }
            self.backend.alter_role(role, *option)?;
            log::info!("Altered role '{role}' with {option}");
            changed = true;
        }
        Ok(changed)
    }

    /// Drop a role, reassigning whatever it owns in every database first.
    ///
    /// Never drops the role the client is connected as.
    pub fn drop_role(&mut self, role: &str) -> Result<bool> {
        if !self.role_exists(role)? {
            log::debug!("Role '{role}' does not exist, nothing to drop");
            return Ok(false);
        }
        if role == self.current_user()? || role == SUPERUSER_ROLE {
            log::debug!("Not dropping role '{role}', it is the connecting user or the superuser");
            return Ok(false);
        }
        for database in self.backend.list_connectable_databases()? {
            self.backend
                .reassign_owned(&database, role, SUPERUSER_ROLE)?;
        }
        self.backend.drop_role(role)?;
        log::info!("Dropped role '{role}'");
        Ok(true)
    }

    /// Set the password of an existing role.
    ///
    /// Cleartext is stored as an md5 verifier salted with the role name;
    /// values that are already verifiers are stored as given.
    pub fn set_password(&mut self, role: &str, password: &Password) -> Result<bool> {
        let current = self
            .backend
            .password_hash(role)?
            .ok_or_else(|| Error::MissingRole {
                role: role.to_string(),
            })?;
        let wanted = password::stored_form(role, password.expose());
        if current.as_deref() == Some(wanted.as_str()) {
            log::debug!("Password of role '{role}' is up to date");
            return Ok(false);
        }
        self.backend.set_password_hash(role, Some(&wanted))?;
        log::info!("Set password of role '{role}'");
        Ok(true)
    }

    /// Clear the password of a role.
    pub fn reset_password(&mut self, role: &str) -> Result<bool> {
        let current = match self.backend.password_hash(role)? {
            Some(current) => current,
            None => {
                return Err(Error::MissingRole {
                    role: role.to_string(),
                });
            }
        };
        if current.is_none() {
            log::debug!("Role '{role}' has no password");
            return Ok(false);
        }
        if role == self.current_user()? {
            log::debug!("Not resetting password of connecting user '{role}'");
            return Ok(false);
        }
        self.backend.set_password_hash(role, None)?;
        log::info!("Reset password of role '{role}'");
        Ok(true)
    }

    /// Make `grantee` a member of `granted`, creating either role if needed.
    pub fn grant_role(&mut self, managed: &mut Managed, granted: &str, grantee: &str) -> Result<bool> {
        let mut changed = self.create_role(managed, granted, &[])?;
        changed |= self.create_role(managed, grantee, &[])?;
        managed.record_grant(granted, grantee);
        if self.backend.is_member(granted, grantee)? {
            log::debug!("Role '{granted}' already granted to '{grantee}'");
            return Ok(changed);
        }
        self.backend.grant_role(granted, grantee)?;
        log::info!("Granted role '{granted}' to '{grantee}'");
        Ok(true)
    }

    /// Remove `grantee` from `granted`.
    pub fn revoke_role(&mut self, granted: &str, grantee: &str) -> Result<bool> {
        if !self.role_exists(granted)? || !self.role_exists(grantee)? {
            log::debug!("Not revoking '{granted}' from '{grantee}', a role does not exist");
            return Ok(false);
        }
        if grantee == self.current_user()? {
            log::debug!("Not revoking '{granted}' from connecting user '{grantee}'");
            return Ok(false);
        }
        if !self.backend.is_member(granted, grantee)? {
            return Ok(false);
        }
        self.backend.revoke_role(granted, grantee)?;
        log::info!("Revoked role '{granted}' from '{grantee}'");
        Ok(true)
    }

    // =========================================================================
    // Databases
    // =========================================================================

    /// Create a database, fix its owner and set up its operational grants.
    ///
    /// The owner defaults to a role named after the database. `opex`
    /// becomes a member of the owner, `readonly` a member of
    /// `<database>_readonly`, and that role is granted SELECT on every
    /// schema holding tables it cannot read yet.
    pub fn create_database(
        &mut self,
        managed: &mut Managed,
        database: &str,
        owner: Option<&str>,
    ) -> Result<bool> {
        let owner = owner.unwrap_or(database);
        managed.record_database(database);

        let mut changed = self.create_role(managed, owner, &[])?;
        let live_owner = match self.backend.database_owner(database)? {
            Some(live_owner) => live_owner,
            None => {
                self.backend.create_database(database)?;
                log::info!("Created database '{database}'");
                changed = true;
                self.backend
                    .database_owner(database)?
                    .ok_or_else(|| Error::MissingDatabase {
                        database: database.to_string(),
                    })?
            }
        };
        if live_owner != owner {
            self.backend.set_database_owner(database, owner)?;
            log::info!("Changed owner of database '{database}' to '{owner}'");
            changed = true;
        }

        changed |= self.grant_role(managed, owner, OPEX_ROLE)?;
        let readonly = readonly_role_name(database);
        changed |= self.grant_role(managed, &readonly, READONLY_ROLE)?;
        for schema in self.backend.schemas_missing_select(database, &readonly)? {
            self.backend
                .grant_select_on_schema(database, &schema, &readonly)?;
            log::info!("Granted SELECT on schema '{database}'.'{schema}' to '{readonly}'");
            changed = true;
        }
        Ok(changed)
    }

    /// Drop a database if it exists.
    pub fn drop_database(&mut self, database: &str) -> Result<bool> {
        if !self.database_exists(database)? {
            log::debug!("Database '{database}' does not exist, nothing to drop");
            return Ok(false);
        }
        self.backend.drop_database(database)?;
        log::info!("Dropped database '{database}'");
        Ok(true)
    }

    // =========================================================================
    // Extensions
    // =========================================================================

    /// Install an extension, recreating it when a pinned version differs.
    pub fn create_extension(
        &mut self,
        managed: &mut Managed,
        database: &str,
        extension: &str,
        schema: Option<&str>,
        version: Option<&str>,
    ) -> Result<bool> {
        if !self.database_exists(database)? {
            return Err(Error::MissingDatabase {
                database: database.to_string(),
            });
        }
        managed.record_extension(database, extension);

        let mut changed = false;
        let mut installed = self.backend.extension_version(database, extension)?;
        if let (Some(wanted), Some(live)) = (version, installed.as_deref())
            && wanted != live
        {
            self.backend.drop_extension(database, extension)?;
            log::info!("Dropped extension '{database}'.'{extension}' (version {live}, want {wanted})");
            installed = None;
            changed = true;
        }
        if installed.is_some() {
            log::debug!("Extension '{database}'.'{extension}' is installed");
            return Ok(changed);
        }
        if !self
            .backend
            .extension_available(database, extension, version)?
        {
            return Err(Error::ExtensionUnavailable {
                extension: extension.to_string(),
                database: database.to_string(),
                version: version.map(str::to_string),
            });
        }
        self.backend
            .create_extension(database, extension, schema, version)?;
        log::info!("Created extension '{database}'.'{extension}'");
        Ok(true)
    }

    /// Drop an extension if its database and the extension exist.
    pub fn drop_extension(&mut self, database: &str, extension: &str) -> Result<bool> {
        if !self.database_exists(database)? {
            log::debug!("Database '{database}' does not exist, not dropping extension '{extension}'");
            return Ok(false);
        }
        if self.backend.extension_version(database, extension)?.is_none() {
            return Ok(false);
        }
        self.backend.drop_extension(database, extension)?;
        log::info!("Dropped extension '{database}'.'{extension}'");
        Ok(true)
    }

    // =========================================================================
    // Replication slots
    // =========================================================================

    pub fn create_replication_slot(&mut self, slot: &str) -> Result<bool> {
        if self.list_replication_slots()?.iter().any(|s| s == slot) {
            log::debug!("Replication slot '{slot}' exists");
            return Ok(false);
        }
        self.backend.create_replication_slot(slot)?;
        log::info!("Created replication slot '{slot}'");
        Ok(true)
    }

    pub fn drop_replication_slot(&mut self, slot: &str) -> Result<bool> {
        if !self.list_replication_slots()?.iter().any(|s| s == slot) {
            return Ok(false);
        }
        self.backend.drop_replication_slot(slot)?;
        log::info!("Dropped replication slot '{slot}'");
        Ok(true)
    }

    // =========================================================================
    // Catalog reads
    // =========================================================================

    pub fn list_roles(&mut self) -> Result<Vec<String>> {
        self.backend.list_roles()
    }

    pub fn list_grantees(&mut self, granted: &str) -> Result<Vec<String>> {
        self.backend.list_grantees(granted)
    }

    pub fn list_databases(&mut self) -> Result<Vec<String>> {
        self.backend.list_databases()
    }

    pub fn list_extensions(&mut self, database: &str) -> Result<Vec<String>> {
        self.backend.list_extensions(database)
    }

    pub fn list_replication_slots(&mut self) -> Result<Vec<String>> {
        self.backend.list_replication_slots()
    }
}
