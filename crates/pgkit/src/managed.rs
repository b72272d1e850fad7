//! Objects declared or affirmed during one reconciliation pass.
//!
//! A fresh [`Managed`] is created at the start of every pass and handed by
//! reference to each primitive that records something. Pruning reads it
//! afterwards to decide what is undeclared.

use std::collections::{BTreeMap, BTreeSet};

/// Touched objects of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Managed {
    /// Granted role -> grantees declared for it.
    roles: BTreeMap<String, BTreeSet<String>>,
    databases: BTreeSet<String>,
    /// Database -> extensions declared in it. Only databases whose own
    /// step succeeded have an entry.
    extensions: BTreeMap<String, BTreeSet<String>>,
}

impl Managed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a role without any grantees.
    pub fn record_role(&mut self, role: &str) {
        self.roles.entry(role.to_string()).or_default();
    }

    /// Record that `grantee` is declared a member of `granted`.
    pub fn record_grant(&mut self, granted: &str, grantee: &str) {
        self.record_role(grantee);
        self.roles
            .entry(granted.to_string())
            .or_default()
            .insert(grantee.to_string());
    }

    pub fn record_database(&mut self, database: &str) {
        self.databases.insert(database.to_string());
    }

    /// Make a database eligible for extension pruning.
    pub fn manage_extensions_of(&mut self, database: &str) {
        self.extensions.entry(database.to_string()).or_default();
    }

    pub fn record_extension(&mut self, database: &str, extension: &str) {
        self.extensions
            .entry(database.to_string())
            .or_default()
            .insert(extension.to_string());
    }

    /// Granted roles with their declared grantees.
    pub fn grants(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.roles.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every role mentioned as granted role or grantee.
    pub fn roles(&self) -> BTreeSet<String> {
        self.roles
            .iter()
            .flat_map(|(granted, grantees)| std::iter::once(granted).chain(grantees))
            .cloned()
            .collect()
    }

    pub fn databases(&self) -> &BTreeSet<String> {
        &self.databases
    }

    /// Databases eligible for extension pruning with their declared extensions.
    pub fn extensions(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.extensions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.databases.is_empty() && self.extensions.is_empty()
    }
}
