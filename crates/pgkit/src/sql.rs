//! Statement rendering.
//!
//! Utility statements (`CREATE ROLE`, `GRANT`, ...) cannot take bind
//! parameters, so identifiers and literals are quoted here. Every backend
//! renders its statements through these functions so tests see exactly
//! what a live server would receive.

use crate::types::RoleOption;

/// Quote an identifier: `a"b` becomes `"a""b"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, switching to `E''` syntax when backslashes occur.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

pub fn create_role(role: &str) -> String {
    format!("CREATE ROLE {}", quote_ident(role))
}

pub fn alter_role(role: &str, option: RoleOption) -> String {
    format!("ALTER ROLE {} WITH {option}", quote_ident(role))
}

pub fn set_password(role: &str, hash: Option<&str>) -> String {
    match hash {
        Some(hash) => format!(
            "ALTER ROLE {} WITH ENCRYPTED PASSWORD {}",
            quote_ident(role),
            quote_literal(hash)
        ),
        None => format!("ALTER ROLE {} WITH PASSWORD NULL", quote_ident(role)),
    }
}

pub fn reassign_owned(role: &str, new_owner: &str) -> String {
    format!(
        "REASSIGN OWNED BY {} TO {}",
        quote_ident(role),
        quote_ident(new_owner)
    )
}

pub fn drop_role(role: &str) -> String {
    format!("DROP ROLE {}", quote_ident(role))
}

pub fn grant_role(granted: &str, grantee: &str) -> String {
    format!("GRANT {} TO {}", quote_ident(granted), quote_ident(grantee))
}

pub fn revoke_role(granted: &str, grantee: &str) -> String {
    format!(
        "REVOKE {} FROM {}",
        quote_ident(granted),
        quote_ident(grantee)
    )
}

pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE {}", quote_ident(database))
}

pub fn set_database_owner(database: &str, owner: &str) -> String {
    format!(
        "ALTER DATABASE {} OWNER TO {}",
        quote_ident(database),
        quote_ident(owner)
    )
}

pub fn drop_database(database: &str) -> String {
    format!("DROP DATABASE {}", quote_ident(database))
}

pub fn grant_select_on_schema(schema: &str, role: &str) -> String {
    format!(
        "GRANT SELECT ON ALL TABLES IN SCHEMA {} TO {}",
        quote_ident(schema),
        quote_ident(role)
    )
}

pub fn create_extension(extension: &str, schema: Option<&str>, version: Option<&str>) -> String {
    let mut statement = format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(extension));
    if let Some(schema) = schema {
        statement.push_str(&format!(" SCHEMA {}", quote_ident(schema)));
    }
    if let Some(version) = version {
        statement.push_str(&format!(" VERSION {}", quote_literal(version)));
    }
    statement
}

pub fn drop_extension(extension: &str) -> String {
    format!("DROP EXTENSION IF EXISTS {}", quote_ident(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("alice"), "\"alice\"");
        assert_eq!(quote_ident("a\"; DROP ROLE x; --"), "\"a\"\"; DROP ROLE x; --\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("1.1"), "'1.1'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("a\\b"), "E'a\\\\b'");
    }

    #[test]
    fn test_create_extension_clauses() {
        assert_eq!(
            create_extension("hstore", None, None),
            "CREATE EXTENSION IF NOT EXISTS \"hstore\""
        );
        assert_eq!(
            create_extension("postgis", Some("public"), Some("3.4")),
            "CREATE EXTENSION IF NOT EXISTS \"postgis\" SCHEMA \"public\" VERSION '3.4'"
        );
    }

    #[test]
    fn test_password_statements() {
        assert_eq!(
            set_password("bob", None),
            "ALTER ROLE \"bob\" WITH PASSWORD NULL"
        );
        assert!(set_password("bob", Some("md5abc")).ends_with("PASSWORD 'md5abc'"));
    }

    #[test]
    fn test_alter_role_renders_option() {
        let option = RoleOption::parse("nologin").unwrap();
        assert_eq!(alter_role("svc", option), "ALTER ROLE \"svc\" WITH NOLOGIN");
    }
}
