//! Live PostgreSQL backend using `sqlx`.
//!
//! The crate exposes a blocking API, so the backend owns a current-thread
//! tokio runtime and drives every query to completion on it. One
//! connection per database is opened on first use and kept until it fails.

use crate::backend::Backend;
use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};
use crate::sql;
use crate::types::{RoleAttributes, RoleOption};
use sqlx::ConnectOptions;
use sqlx::postgres::PgConnection;
use std::collections::HashMap;
use tokio::runtime::Runtime;

/// Backend that talks to a live cluster.
pub struct PostgresBackend {
    config: ConnectionConfig,
    runtime: Runtime,
    connections: HashMap<String, PgConnection>,
}

type RoleRow = (bool, bool, bool, bool, bool, bool);

impl PostgresBackend {
    /// Create a backend. No connection is opened until the first query.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            config,
            runtime,
            connections: HashMap::new(),
        })
    }

    fn maintenance(&self) -> String {
        self.config.database().to_string()
    }

    fn ensure_connected(&mut self, database: &str) -> Result<()> {
        if self.connections.contains_key(database) {
            return Ok(());
        }
        let target = self.config.dsn_for(database);
        let options = self.config.connect_options(database)?;
        let timeout = self.config.connect_timeout()?;

        log::debug!("Connecting to {target}");
        let connection = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, options.connect()).await })
            .map_err(|_| Error::Timeout {
                target: target.clone(),
            })?
            .map_err(|e| Error::Connection {
                target,
                message: e.to_string(),
            })?;
        self.connections.insert(database.to_string(), connection);
        Ok(())
    }

    /// Map a driver result, forgetting the connection if it broke.
    fn settle<T>(
        &mut self,
        database: &str,
        statement: &str,
        result: std::result::Result<T, sqlx::Error>,
    ) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e @ (sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed)) => {
                self.connections.remove(database);
                Err(Error::Connection {
                    target: self.config.dsn_for(database),
                    message: e.to_string(),
                })
            }
            Err(e) => Err(Error::query(statement, e)),
        }
    }

    fn execute(&mut self, database: &str, statement: &str) -> Result<()> {
        self.ensure_connected(database)?;
        log::trace!("{database}: {statement}");
        let result = match self.connections.get_mut(database) {
            Some(conn) => self
                .runtime
                .block_on(sqlx::query(statement).execute(&mut *conn))
                .map(|_| ()),
            None => Err(sqlx::Error::WorkerCrashed),
        };
        self.settle(database, statement, result)
    }

    fn strings(&mut self, database: &str, query: &str, binds: &[&str]) -> Result<Vec<String>> {
        self.ensure_connected(database)?;
        let result = match self.connections.get_mut(database) {
            Some(conn) => {
                let mut q = sqlx::query_scalar::<_, String>(query);
                for bind in binds {
                    q = q.bind(*bind);
                }
                self.runtime.block_on(q.fetch_all(&mut *conn))
            }
            None => Err(sqlx::Error::WorkerCrashed),
        };
        self.settle(database, query, result)
    }

    fn optional_text(
        &mut self,
        database: &str,
        query: &str,
        binds: &[&str],
    ) -> Result<Option<Option<String>>> {
        self.ensure_connected(database)?;
        let result = match self.connections.get_mut(database) {
            Some(conn) => {
                let mut q = sqlx::query_scalar::<_, Option<String>>(query);
                for bind in binds {
                    q = q.bind(*bind);
                }
                self.runtime.block_on(q.fetch_optional(&mut *conn))
            }
            None => Err(sqlx::Error::WorkerCrashed),
        };
        self.settle(database, query, result)
    }

    fn exists(&mut self, database: &str, query: &str, binds: &[&str]) -> Result<bool> {
        Ok(!self.strings(database, query, binds)?.is_empty())
    }
}

impl Backend for PostgresBackend {
    fn describe(&self) -> String {
        self.config.dsn()
    }

    fn current_user(&mut self) -> Result<String> {
        let db = self.maintenance();
        let query = "SELECT current_user::text";
        self.strings(&db, query, &[])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::query(query, "no rows returned"))
    }

    fn is_in_recovery(&mut self) -> Result<bool> {
        let db = self.maintenance();
        let query = "SELECT pg_is_in_recovery()";
        self.ensure_connected(&db)?;
        let result = match self.connections.get_mut(&db) {
            Some(conn) => self
                .runtime
                .block_on(sqlx::query_scalar::<_, bool>(query).fetch_one(&mut *conn)),
            None => Err(sqlx::Error::WorkerCrashed),
        };
        self.settle(&db, query, result)
    }

    fn list_roles(&mut self) -> Result<Vec<String>> {
        let db = self.maintenance();
        self.strings(&db, "SELECT rolname::text FROM pg_roles ORDER BY 1", &[])
    }

    fn role_attributes(&mut self, role: &str) -> Result<Option<RoleAttributes>> {
        let db = self.maintenance();
        let query = "SELECT rolsuper, rolcreatedb, rolcreaterole, rolinherit, rolcanlogin, \
                     rolreplication FROM pg_roles WHERE rolname = $1";
        self.ensure_connected(&db)?;
        let result = match self.connections.get_mut(&db) {
            Some(conn) => self.runtime.block_on(
                sqlx::query_as::<_, RoleRow>(query)
                    .bind(role)
                    .fetch_optional(&mut *conn),
            ),
            None => Err(sqlx::Error::WorkerCrashed),
        };
        let row = self.settle(&db, query, result)?;
        Ok(row.map(
            |(superuser, create_db, create_role, inherit, login, replication)| RoleAttributes {
                superuser,
                create_db,
                create_role,
                inherit,
                login,
                replication,
            },
        ))
    }

    fn create_role(&mut self, role: &str) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::create_role(role))
    }

    fn alter_role(&mut self, role: &str, option: RoleOption) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::alter_role(role, option))
    }

    fn reassign_owned(&mut self, database: &str, role: &str, new_owner: &str) -> Result<()> {
        self.execute(database, &sql::reassign_owned(role, new_owner))
    }

    fn drop_role(&mut self, role: &str) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::drop_role(role))
    }

    fn password_hash(&mut self, role: &str) -> Result<Option<Option<String>>> {
        let db = self.maintenance();
        self.optional_text(
            &db,
            "SELECT rolpassword::text FROM pg_authid WHERE rolname = $1",
            &[role],
        )
    }

    fn set_password_hash(&mut self, role: &str, hash: Option<&str>) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::set_password(role, hash))
    }

    fn list_grantees(&mut self, granted: &str) -> Result<Vec<String>> {
        let db = self.maintenance();
        self.strings(
            &db,
            "SELECT DISTINCT m.rolname::text FROM pg_auth_members am \
             JOIN pg_roles r ON r.oid = am.roleid \
             JOIN pg_roles m ON m.oid = am.member \
             WHERE r.rolname = $1 ORDER BY 1",
            &[granted],
        )
    }

    fn grant_role(&mut self, granted: &str, grantee: &str) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::grant_role(granted, grantee))
    }

    fn revoke_role(&mut self, granted: &str, grantee: &str) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::revoke_role(granted, grantee))
    }

    fn is_member(&mut self, granted: &str, grantee: &str) -> Result<bool> {
        let db = self.maintenance();
        self.exists(
            &db,
            "SELECT m.rolname::text FROM pg_auth_members am \
             JOIN pg_roles r ON r.oid = am.roleid \
             JOIN pg_roles m ON m.oid = am.member \
             WHERE r.rolname = $1 AND m.rolname = $2",
            &[granted, grantee],
        )
    }

    fn list_databases(&mut self) -> Result<Vec<String>> {
        let db = self.maintenance();
        self.strings(&db, "SELECT datname::text FROM pg_database ORDER BY 1", &[])
    }

    fn list_connectable_databases(&mut self) -> Result<Vec<String>> {
        let db = self.maintenance();
        self.strings(
            &db,
            "SELECT datname::text FROM pg_database WHERE datallowconn ORDER BY 1",
            &[],
        )
    }

    fn database_owner(&mut self, database: &str) -> Result<Option<String>> {
        let db = self.maintenance();
        Ok(self
            .optional_text(
                &db,
                "SELECT pg_get_userbyid(datdba)::text FROM pg_database WHERE datname = $1",
                &[database],
            )?
            .flatten())
    }

    fn create_database(&mut self, database: &str) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::create_database(database))
    }

    fn set_database_owner(&mut self, database: &str, owner: &str) -> Result<()> {
        let db = self.maintenance();
        self.execute(&db, &sql::set_database_owner(database, owner))
    }

    fn drop_database(&mut self, database: &str) -> Result<()> {
        // A held connection would block the drop.
        self.connections.remove(database);
        let db = self.maintenance();
        self.execute(&db, &sql::drop_database(database))
    }

    fn schemas_missing_select(&mut self, database: &str, role: &str) -> Result<Vec<String>> {
        self.strings(
            database,
            "SELECT DISTINCT t.schemaname::text FROM pg_tables t \
             WHERE t.schemaname NOT IN ('pg_catalog', 'information_schema') \
             AND NOT has_table_privilege($1, \
                 quote_ident(t.schemaname) || '.' || quote_ident(t.tablename), 'SELECT') \
             ORDER BY 1",
            &[role],
        )
    }

    fn grant_select_on_schema(&mut self, database: &str, schema: &str, role: &str) -> Result<()> {
        self.execute(database, &sql::grant_select_on_schema(schema, role))
    }

    fn list_extensions(&mut self, database: &str) -> Result<Vec<String>> {
        self.strings(
            database,
            "SELECT extname::text FROM pg_extension ORDER BY 1",
            &[],
        )
    }

    fn extension_version(&mut self, database: &str, extension: &str) -> Result<Option<String>> {
        Ok(self
            .optional_text(
                database,
                "SELECT extversion::text FROM pg_extension WHERE extname = $1",
                &[extension],
            )?
            .flatten())
    }

    fn extension_available(
        &mut self,
        database: &str,
        extension: &str,
        version: Option<&str>,
    ) -> Result<bool> {
        match version {
            None => self.exists(
                database,
                "SELECT name::text FROM pg_available_extensions WHERE name = $1",
                &[extension],
            ),
            Some(version) => self.exists(
                database,
                "SELECT name::text FROM pg_available_extension_versions \
                 WHERE name = $1 AND version = $2",
                &[extension, version],
            ),
        }
    }

    fn create_extension(
        &mut self,
        database: &str,
        extension: &str,
        schema: Option<&str>,
        version: Option<&str>,
    ) -> Result<()> {
        self.execute(database, &sql::create_extension(extension, schema, version))
    }

    fn drop_extension(&mut self, database: &str, extension: &str) -> Result<()> {
        self.execute(database, &sql::drop_extension(extension))
    }

    fn list_replication_slots(&mut self) -> Result<Vec<String>> {
        let db = self.maintenance();
        self.strings(
            &db,
            "SELECT slot_name::text FROM pg_replication_slots ORDER BY 1",
            &[],
        )
    }

    fn create_replication_slot(&mut self, slot: &str) -> Result<()> {
        let db = self.maintenance();
        self.exists(
            &db,
            "SELECT slot_name::text FROM pg_create_physical_replication_slot($1)",
            &[slot],
        )
        .map(|_| ())
    }

    fn drop_replication_slot(&mut self, slot: &str) -> Result<()> {
        let db = self.maintenance();
        let statement = "SELECT pg_drop_replication_slot($1)";
        self.ensure_connected(&db)?;
        let result = match self.connections.get_mut(&db) {
            Some(conn) => self
                .runtime
                .block_on(sqlx::query(statement).bind(slot).execute(&mut *conn))
                .map(|_| ()),
            None => Err(sqlx::Error::WorkerCrashed),
        };
        self.settle(&db, statement, result)
    }
}
