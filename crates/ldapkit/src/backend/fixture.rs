//! Offline backend serving static entries from configuration.

use crate::backend::{Backend, Entry, Scope};
use crate::config::Fixtures;
use crate::error::Result;
use crate::filter::Filter;

/// Backend over a fixed set of entries.
#[derive(Debug, Clone, Default)]
pub struct FixtureBackend {
    entries: Vec<Entry>,
}

impl FixtureBackend {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// Build from the `mockdata` configuration map.
    pub fn from_fixtures(fixtures: &Fixtures) -> Self {
        let entries = fixtures
            .iter()
            .map(|(dn, attributes)| Entry {
                dn: dn.clone(),
                attributes: attributes
                    .iter()
                    .map(|(name, values)| (name.clone(), values.clone().into_vec()))
                    .collect(),
            })
            .collect();
        Self::new(entries)
    }
}

fn in_scope(dn: &str, base: &str, scope: Scope) -> bool {
    let dn = normalize(dn);
    let base = normalize(base);
    match scope {
        Scope::Base => dn == base,
        Scope::Subtree => base.is_empty() || dn == base || dn.ends_with(&format!(",{base}")),
    }
}

fn normalize(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| rdn.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

impl Backend for FixtureBackend {
    fn describe(&self) -> String {
        format!("fixtures ({} entries)", self.entries.len())
    }

    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>> {
        let filter = Filter::parse(filter)?;
        Ok(self
            .entries
            .iter()
            .filter(|e| in_scope(&e.dn, base, scope) && filter.matches(e))
            .map(|e| Entry {
                dn: e.dn.clone(),
                attributes: e
                    .attributes
                    .iter()
                    .filter(|(name, _)| {
                        attributes.is_empty()
                            || attributes.iter().any(|a| a.eq_ignore_ascii_case(name))
                    })
                    .map(|(name, values)| (name.clone(), values.clone()))
                    .collect(),
            })
            .collect())
    }
}
