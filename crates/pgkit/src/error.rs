//! Error types for cluster operations.
//!
//! Errors are categorized so the reconciliation engine can tell a dead
//! connection (which poisons every later step of a pass) apart from a
//! problem with one declared object (which only fails that object).

use thiserror::Error;

/// Categories of cluster errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The cluster (or one of its databases) could not be reached
    Connectivity,
    /// A declaration or connection parameter is invalid
    Configuration,
    /// A statement against a single object failed
    Object,
}

impl ErrorCategory {
    /// Whether later steps of the same pass should still be attempted.
    pub fn is_isolated(&self) -> bool {
        !matches!(self, Self::Connectivity)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connectivity => "Cluster unreachable",
            Self::Configuration => "Invalid declaration",
            Self::Object => "Statement failed",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Connectivity => "Check the postgresql dsn and that the cluster is running",
            Self::Configuration => "Fix the offending entry in the configuration file",
            Self::Object => "Check the server log for the failed statement",
        }
    }
}

/// Errors that can occur while administering a cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting to a database failed
    #[error("connection to {target} failed: {message}")]
    Connection {
        /// Connection target without credentials
        target: String,
        /// Driver error message
        message: String,
    },

    /// Connecting to a database did not finish in time
    #[error("connection to {target} timed out")]
    Timeout {
        /// Connection target without credentials
        target: String,
    },

    /// A statement was rejected by the server
    #[error("{statement}: {message}")]
    Query {
        /// Statement (or catalog query) that failed
        statement: String,
        /// Server or driver error message
        message: String,
    },

    /// A connection parameter could not be used
    #[error("invalid connection parameter {key}: {message}")]
    InvalidParameter {
        /// Parameter name
        key: String,
        /// What was wrong with it
        message: String,
    },

    /// Declared role options that are not recognised
    #[error("role {role} has invalid role options: {}", options.join(", "))]
    InvalidRoleOptions {
        /// Role being declared
        role: String,
        /// Unrecognised option words
        options: Vec<String>,
    },

    /// The role a statement needs does not exist
    #[error("role {role} does not exist")]
    MissingRole {
        /// Role name
        role: String,
    },

    /// The database a statement needs does not exist
    #[error("database {database} does not exist")]
    MissingDatabase {
        /// Database name
        database: String,
    },

    /// The requested extension (version) is not installed on the server
    #[error("extension {extension}{} is not available in database {database}", version.as_ref().map(|v| format!(" version {v}")).unwrap_or_default())]
    ExtensionUnavailable {
        /// Extension name
        extension: String,
        /// Database it was requested in
        database: String,
        /// Pinned version, if any
        version: Option<String>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Connection { .. } | Error::Timeout { .. } | Error::Io(_) => {
                ErrorCategory::Connectivity
            }
            Error::InvalidParameter { .. } | Error::InvalidRoleOptions { .. } => {
                ErrorCategory::Configuration
            }
            Error::Query { .. }
            | Error::MissingRole { .. }
            | Error::MissingDatabase { .. }
            | Error::ExtensionUnavailable { .. } => ErrorCategory::Object,
        }
    }

    pub(crate) fn query(statement: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Error::Query {
            statement: statement.into(),
            message: error.to_string(),
        }
    }
}

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;
