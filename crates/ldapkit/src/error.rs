//! Error types for directory lookups.

use std::path::PathBuf;
use thiserror::Error;

/// Categories of directory errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No directory server could be reached or bound to
    Connectivity,
    /// A filter, template or credential is unusable
    Configuration,
    /// A search was rejected by the server
    Query,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connectivity => "Directory unreachable",
            Self::Configuration => "Invalid directory configuration",
            Self::Query => "Directory search failed",
        }
    }
}

/// Errors that can occur while resolving directory groups.
#[derive(Debug, Error)]
pub enum Error {
    /// None of the configured servers accepted a connection
    #[error("no directory server reachable ({servers}): {message}")]
    Unreachable {
        /// Servers that were tried
        servers: String,
        /// Last connection error
        message: String,
    },

    /// The bind was rejected
    #[error("bind as {user} failed: {message}")]
    Bind {
        /// Bind DN
        user: String,
        /// Server result text
        message: String,
    },

    /// A bare group name was given but no template turns it into a filter
    #[error("ldapfilter {filter} for {entity} is without \"(\" and no filter_template is set")]
    MissingFilterTemplate {
        /// User or role the filter belongs to
        entity: String,
        /// The offending filter
        filter: String,
    },

    /// The filter template has no `%s` slot
    #[error("filter_template {template} has no %s placeholder")]
    InvalidFilterTemplate {
        /// The offending template
        template: String,
    },

    /// A filter could not be parsed
    #[error("invalid filter {filter}: {message}")]
    InvalidFilter {
        /// The offending filter
        filter: String,
        /// What was wrong with it
        message: String,
    },

    /// A search failed
    #[error("search under {base} failed: {message}")]
    Search {
        /// Search base
        base: String,
        /// Server or transport error
        message: String,
    },

    /// A credential could not be read or decoded
    #[error("cannot read ldap {name} from {}: {message}", path.display())]
    Credential {
        /// `user` or `password`
        name: &'static str,
        /// File it was read from
        path: PathBuf,
        /// Why it failed
        message: String,
    },
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unreachable { .. } | Error::Bind { .. } => ErrorCategory::Connectivity,
            Error::MissingFilterTemplate { .. }
            | Error::InvalidFilterTemplate { .. }
            | Error::InvalidFilter { .. }
            | Error::Credential { .. } => ErrorCategory::Configuration,
            Error::Search { .. } => ErrorCategory::Query,
        }
    }
}

/// Result type alias for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_template_names_filter_and_entity() {
        let err = Error::MissingFilterTemplate {
            entity: "team_devs".to_string(),
            filter: "team1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("team1"));
        assert!(msg.contains("team_devs"));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_unreachable_is_connectivity() {
        let err = Error::Unreachable {
            servers: "ldap1, ldap2".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Connectivity);
        assert_eq!(err.category().description(), "Directory unreachable");
    }
}
