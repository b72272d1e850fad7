//! Backend abstraction for cluster operations.
//!
//! The [`Backend`] trait is the thin layer of catalog reads and single
//! statements. Idempotence, ordering and bookkeeping live in
//! [`crate::Client`], so every backend gets them for free.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::types::{RoleAttributes, RoleOption};

/// Backend trait for cluster operations.
///
/// Methods taking a `database` run against that database; all others run
/// against the maintenance database of the connection.
pub trait Backend {
    /// Connection target for log messages (never includes credentials).
    fn describe(&self) -> String;

    /// Role the backend is connected as.
    fn current_user(&mut self) -> Result<String>;

    /// Whether the server is a standby (`pg_is_in_recovery()`).
    fn is_in_recovery(&mut self) -> Result<bool>;

    // Roles

    fn list_roles(&mut self) -> Result<Vec<String>>;

    /// Attributes of a role, `None` if it does not exist.
    fn role_attributes(&mut self, role: &str) -> Result<Option<RoleAttributes>>;

    fn create_role(&mut self, role: &str) -> Result<()>;

    fn alter_role(&mut self, role: &str, option: RoleOption) -> Result<()>;

    /// Reassign everything `role` owns in `database` to `new_owner`.
    fn reassign_owned(&mut self, database: &str, role: &str, new_owner: &str) -> Result<()>;

    fn drop_role(&mut self, role: &str) -> Result<()>;

    /// Stored password verifier. Outer `None`: no such role.
    fn password_hash(&mut self, role: &str) -> Result<Option<Option<String>>>;

    fn set_password_hash(&mut self, role: &str, hash: Option<&str>) -> Result<()>;

    // Memberships

    /// Roles that are direct members of `granted`.
    fn list_grantees(&mut self, granted: &str) -> Result<Vec<String>>;

    fn grant_role(&mut self, granted: &str, grantee: &str) -> Result<()>;

    fn revoke_role(&mut self, granted: &str, grantee: &str) -> Result<()>;

    /// Whether `grantee` is a direct member of `granted`.
    fn is_member(&mut self, granted: &str, grantee: &str) -> Result<bool> {
        Ok(self.list_grantees(granted)?.iter().any(|g| g == grantee))
    }

    // Databases

    fn list_databases(&mut self) -> Result<Vec<String>>;

    /// Databases that accept connections (`datallowconn`).
    fn list_connectable_databases(&mut self) -> Result<Vec<String>>;

    /// Owner of a database, `None` if it does not exist.
    fn database_owner(&mut self, database: &str) -> Result<Option<String>>;

    fn create_database(&mut self, database: &str) -> Result<()>;

    fn set_database_owner(&mut self, database: &str, owner: &str) -> Result<()>;

    fn drop_database(&mut self, database: &str) -> Result<()>;

    /// Schemas in `database` holding a table `role` cannot SELECT from.
    fn schemas_missing_select(&mut self, database: &str, role: &str) -> Result<Vec<String>>;

    fn grant_select_on_schema(&mut self, database: &str, schema: &str, role: &str) -> Result<()>;

    // Extensions

    fn list_extensions(&mut self, database: &str) -> Result<Vec<String>>;

    /// Installed version of an extension, `None` if not installed.
    fn extension_version(&mut self, database: &str, extension: &str) -> Result<Option<String>>;

    /// Whether the server ships the extension (in the given version).
    fn extension_available(
        &mut self,
        database: &str,
        extension: &str,
        version: Option<&str>,
    ) -> Result<bool>;

    fn create_extension(
        &mut self,
        database: &str,
        extension: &str,
        schema: Option<&str>,
        version: Option<&str>,
    ) -> Result<()>;

    fn drop_extension(&mut self, database: &str, extension: &str) -> Result<()>;

    // Replication slots

    fn list_replication_slots(&mut self) -> Result<Vec<String>>;

    fn create_replication_slot(&mut self, slot: &str) -> Result<()>;

    fn drop_replication_slot(&mut self, slot: &str) -> Result<()>;
}
