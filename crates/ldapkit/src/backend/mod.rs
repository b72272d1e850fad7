//! Backend abstraction for directory searches.

pub mod fixture;
pub mod ldap;

use crate::error::Result;
use std::collections::BTreeMap;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the base entry itself
    Base,
    /// The base entry and everything below it
    Subtree,
}

/// A directory entry with the requested attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Entry {
    /// Values of an attribute; attribute names compare case-insensitively.
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    /// Whether the entry carries an object class.
    pub fn has_object_class(&self, class: &str) -> bool {
        self.values("objectClass")
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
    }
}

/// Backend trait for directory searches.
pub trait Backend {
    /// Servers or source this backend reads from, for log messages.
    fn describe(&self) -> String;

    /// Establish the connection ahead of the first search.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Search below `base`, returning only the requested attributes.
    ///
    /// A base that does not exist yields no entries rather than an error.
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>>;
}
