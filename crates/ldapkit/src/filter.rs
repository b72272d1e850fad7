//! Minimal RFC 4515 filter evaluation for fixture entries.
//!
//! Supports `&`, `|`, `!`, equality, presence (`attr=*`) and substring
//! wildcards. Attribute names and values compare case-insensitively.

use crate::backend::Entry;
use crate::error::{Error, Result};

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    /// Attribute and the value split on `*`; a single part means equality.
    Match(String, Vec<String>),
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input,
            chars: input.trim().chars().collect(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.chars.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Filter::Not(filter) => !filter.matches(entry),
            Filter::Present(attribute) => {
                attribute.eq_ignore_ascii_case("objectClass") || !entry.values(attribute).is_empty()
            }
            Filter::Match(attribute, parts) => entry
                .values(attribute)
                .iter()
                .any(|value| wildcard_match(parts, &value.to_lowercase())),
        }
    }
}

fn wildcard_match(parts: &[String], value: &str) -> bool {
    match parts {
        [] => false,
        [only] => only == value,
        [first, middle @ .., last] => {
            let Some(mut rest) = value.strip_prefix(first.as_str()) else {
                return false;
            };
            for part in middle {
                match rest.find(part.as_str()) {
                    Some(idx) => rest = &rest[idx + part.len()..],
                    None => return false,
                }
            }
            rest.len() >= last.len() && rest.ends_with(last.as_str())
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> Error {
        Error::InvalidFilter {
            filter: self.input.to_string(),
            message: format!("{message} at position {}", self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect('(')?;
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            _ => self.item()?,
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        while self.peek() == Some('(') {
            filters.push(self.filter()?);
        }
        if filters.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '=' || c == ')' || c == '(' {
                break;
            }
            self.pos += 1;
        }
        let attribute: String = self.chars[start..self.pos].iter().collect();
        let attribute = attribute.trim().to_string();
        if attribute.is_empty() {
            return Err(self.error("missing attribute"));
        }
        self.expect('=')?;

        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ')' || c == '(' {
                break;
            }
            self.pos += 1;
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        if value == "*" {
            return Ok(Filter::Present(attribute));
        }
        let parts = value
            .to_lowercase()
            .split('*')
            .map(str::to_string)
            .collect();
        Ok(Filter::Match(attribute, parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> Entry {
        Entry {
            dn: dn.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.iter().map(|s| (*s).to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_equality_is_case_insensitive() {
        let e = entry("cn=team1,ou=test", &[("cn", &["Team1"])]);
        assert!(Filter::parse("(cn=team1)").unwrap().matches(&e));
        assert!(Filter::parse("(CN=TEAM1)").unwrap().matches(&e));
        assert!(!Filter::parse("(cn=team2)").unwrap().matches(&e));
    }

    #[test]
    fn test_boolean_operators() {
        let e = entry(
            "cn=alice,ou=people",
            &[("objectClass", &["top", "user"]), ("sAMAccountName", &["alice"])],
        );
        assert!(
            Filter::parse("(&(objectClass=user)(sAMAccountName=*))")
                .unwrap()
                .matches(&e)
        );
        assert!(Filter::parse("(|(cn=x)(objectClass=user))").unwrap().matches(&e));
        assert!(!Filter::parse("(!(objectClass=user))").unwrap().matches(&e));
    }

    #[test]
    fn test_substring() {
        let e = entry("cn=team-blue,ou=test", &[("cn", &["team-blue"])]);
        assert!(Filter::parse("(cn=team-*)").unwrap().matches(&e));
        assert!(Filter::parse("(cn=*blue)").unwrap().matches(&e));
        assert!(Filter::parse("(cn=t*m*e)").unwrap().matches(&e));
        assert!(!Filter::parse("(cn=*red)").unwrap().matches(&e));
    }

    #[test]
    fn test_invalid_filters() {
        assert!(Filter::parse("cn=team1").is_err());
        assert!(Filter::parse("(cn=team1").is_err());
        assert!(Filter::parse("(&)").is_err());
        assert!(Filter::parse("(=x)").is_err());
    }
}
