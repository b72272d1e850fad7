//! Live directory backend using `ldap3`'s synchronous connection.

use crate::backend::{Backend, Entry, Scope};
use crate::config::DirectoryConfig;
use crate::error::{Error, Result};
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, LdapError, LdapResult, SearchEntry, SearchResult};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const PAGE_SIZE: i32 = 100;
const NO_SUCH_OBJECT: u32 = 32;

/// Backend bound to the first reachable server of a list.
pub struct LdapBackend {
    urls: Vec<String>,
    user: String,
    password: String,
    rounds: u32,
    connection: Option<LdapConn>,
}

impl LdapBackend {
    /// Create a backend. Nothing is contacted until the first search.
    pub fn new(config: &DirectoryConfig) -> Self {
        Self {
            urls: config.servers.iter().map(|s| config.url(s)).collect(),
            user: config.user.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
            rounds: config.conn_retries.max(1),
            connection: None,
        }
    }

    fn bind(&self, ldap: &mut LdapConn) -> Result<()> {
        let fail = |message: String| Error::Bind {
            user: self.user.clone(),
            message,
        };
        ldap.simple_bind(&self.user, &self.password)
            .map_err(|e| fail(e.to_string()))?
            .success()
            .map_err(|e| fail(e.to_string()))?;
        Ok(())
    }

    fn search_error(&mut self, base: &str, error: LdapError) -> Error {
        if let LdapError::LdapResult { result } = &error {
            return Error::Search {
                base: base.to_string(),
                message: format!("rc={} {}", result.rc, result.text),
            };
        }
        // transport failure: reconnect on the next search
        self.connection = None;
        Error::Unreachable {
            servers: self.describe(),
            message: error.to_string(),
        }
    }
}

fn check(result: LdapResult) -> std::result::Result<(), LdapError> {
    if result.rc == NO_SUCH_OBJECT {
        return Ok(());
    }
    result.success().map(|_| ())
}

fn to_entry(entry: SearchEntry) -> Entry {
    Entry {
        dn: entry.dn,
        attributes: entry.attrs.into_iter().collect(),
    }
}

fn base_search(
    ldap: &mut LdapConn,
    base: &str,
    filter: &str,
    attributes: &[&str],
) -> std::result::Result<Vec<Entry>, LdapError> {
    let SearchResult(entries, result) =
        ldap.search(base, ldap3::Scope::Base, filter, attributes.to_vec())?;
    check(result)?;
    Ok(entries
        .into_iter()
        .map(|e| to_entry(SearchEntry::construct(e)))
        .collect())
}

fn paged_search(
    ldap: &mut LdapConn,
    base: &str,
    filter: &str,
    attributes: &[&str],
) -> std::result::Result<Vec<Entry>, LdapError> {
    let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
        Box::new(EntriesOnly::new()),
        Box::new(PagedResults::new(PAGE_SIZE)),
    ];
    let mut stream = ldap.streaming_search_with(
        adapters,
        base,
        ldap3::Scope::Subtree,
        filter,
        attributes.to_vec(),
    )?;
    let mut entries = Vec::new();
    while let Some(entry) = stream.next()? {
        entries.push(to_entry(SearchEntry::construct(entry)));
    }
    check(stream.result())?;
    Ok(entries)
}

impl Backend for LdapBackend {
    fn describe(&self) -> String {
        self.urls.join(", ")
    }

    fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let mut last_error = "no servers configured".to_string();
        for round in 1..=self.rounds {
            for url in &self.urls {
                log::debug!("Connecting to directory server {url} (round {round})");
                let settings = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);
                match LdapConn::with_settings(settings, url) {
                    Ok(mut ldap) => {
                        self.bind(&mut ldap)?;
                        log::debug!("Bound to directory server {url} as {}", self.user);
                        self.connection = Some(ldap);
                        return Ok(());
                    }
                    Err(e) => {
                        log::warn!("Directory server {url} unreachable: {e}");
                        last_error = e.to_string();
                    }
                }
            }
        }
        Err(Error::Unreachable {
            servers: self.describe(),
            message: last_error,
        })
    }

    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>> {
        self.connect()?;
        let result = match self.connection.as_mut() {
            Some(ldap) => match scope {
                Scope::Base => base_search(ldap, base, filter, attributes),
                Scope::Subtree => paged_search(ldap, base, filter, attributes),
            },
            None => {
                return Err(Error::Unreachable {
                    servers: self.describe(),
                    message: "not connected".to_string(),
                });
            }
        };
        result.map_err(|e| self.search_error(base, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_server() {
        let config = DirectoryConfig {
            servers: vec!["127.0.0.1".to_string()],
            port: 1,
            use_ssl: false,
            user: Some("cn=nobody".to_string()),
            password: Some("secret".to_string()),
            conn_retries: 0,
            ..DirectoryConfig::default()
        };
        let mut backend = LdapBackend::new(&config);
        assert_eq!(backend.describe(), "ldap://127.0.0.1:1");
        let err = backend.connect().unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }));
    }
}
