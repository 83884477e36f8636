//! Enterprise directory client.
//!
//! Resolves a person's canonical identity - login, name, mail,
//! affiliation, human-subjects training expiry - by login id or by a
//! `cn=` search pattern. Principals are resolved per call and never
//! cached here.
//!
//! The directory itself is an external service; this module defines the
//! capability trait the engine consumes plus a deterministic in-memory
//! implementation used by tests and operational tooling.

use thiserror::Error;
use tracing::debug;

/// Errors that can occur during directory resolution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DirectoryError {
    /// No entry exists for the requested login id.
    #[error("no directory entry for {name}")]
    NotFound {
        /// The login id that was requested.
        name: String,
    },

    /// The entry exists but lacks a required attribute.
    #[error("directory entry for {name} has no {attribute} attribute")]
    MissingAttribute {
        /// The login id.
        name: String,
        /// The attribute that was required.
        attribute: &'static str,
    },

    /// The search pattern is not one of the supported `cn=` forms.
    #[error("invalid directory query: {query}")]
    InvalidQuery {
        /// The query that was rejected.
        query: String,
    },

    /// Backend failure from the directory service.
    #[error("directory backend error: {message}")]
    Backend {
        /// Error detail from the backend.
        message: String,
    },
}

/// One resolved directory entry.
///
/// Attributes the entry does not carry are `None`; a search with an
/// attribute list leaves unrequested attributes unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Canonical login id (`cn`).
    pub cn: String,
    /// Surname.
    pub sn: Option<String>,
    /// Given name.
    pub given_name: Option<String>,
    /// Mail address.
    pub mail: Option<String>,
    /// Organizational unit.
    pub ou: Option<String>,
    /// Job title.
    pub title: Option<String>,
    /// Faculty flag, when the directory records one.
    pub faculty: Option<bool>,
    /// Human-subjects training expiry (ISO date), when on file.
    pub trained_thru: Option<String>,
}

impl Principal {
    /// Display name assembled from given name and surname.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        match (&self.given_name, &self.sn) {
            (Some(given), Some(sn)) => Some(format!("{given} {sn}")),
            (Some(given), None) => Some(given.clone()),
            (None, Some(sn)) => Some(sn.clone()),
            (None, None) => None,
        }
    }
}

/// A completed human-subjects training on file for a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Training {
    /// Login id the training belongs to.
    pub username: String,
    /// Expiry date (ISO).
    pub expired: String,
    /// Completion date (ISO).
    pub completed: String,
    /// Course title.
    pub course: String,
}

/// Capability for directory resolution.
pub trait Directory: Send + Sync {
    /// Resolves the entry for one login id.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] when no such identity exists.
    fn lookup(&self, cn: &str) -> Result<Principal, DirectoryError>;

    /// Searches by `cn=` pattern, returning the requested attributes.
    ///
    /// Supported patterns are exact (`(cn=some.one)`) and trailing
    /// wildcard (`(cn=some.one*)`) only. An empty `attrs` list returns
    /// every attribute on file.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::InvalidQuery`] for unsupported patterns.
    fn search(&self, query: &str, attrs: &[&str]) -> Result<Vec<Principal>, DirectoryError>;

    /// The latest human-subjects training on file for one login id.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] when the person has no
    /// training on file.
    fn latest_training(&self, cn: &str) -> Result<Training, DirectoryError>;

    /// Returns the client name for logging.
    fn name(&self) -> &'static str;
}

/// A parsed `cn=` search pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnQuery {
    /// The login-id stem to match.
    pub stem: String,
    /// Whether the pattern ends in a trailing wildcard.
    pub wildcard: bool,
}

/// Parses an exact or trailing-wildcard `cn=` pattern.
///
/// # Errors
///
/// Returns [`DirectoryError::InvalidQuery`] for anything other than
/// `(cn=stem)` or `(cn=stem*)` with a non-empty stem.
pub fn parse_cn_query(query: &str) -> Result<CnQuery, DirectoryError> {
    let invalid = || DirectoryError::InvalidQuery {
        query: query.to_string(),
    };
    let inner = query
        .strip_prefix("(cn=")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let (stem, wildcard) = match inner.strip_suffix('*') {
        Some(stem) => (stem, true),
        None => (inner, false),
    };
    if stem.is_empty() || stem.contains(['*', '(', ')']) {
        return Err(invalid());
    }
    Ok(CnQuery {
        stem: stem.to_string(),
        wildcard,
    })
}

/// Deterministic in-memory directory.
///
/// Carries a small reference population; tests and operational tooling
/// use it where no enterprise directory is reachable.
pub struct MockDirectory {
    records: Vec<Principal>,
}

impl MockDirectory {
    /// Creates the directory with the reference population.
    #[must_use]
    pub fn new() -> Self {
        let entry = |cn: &str,
                     sn: &str,
                     given: &str,
                     mail: Option<&str>,
                     ou: &str,
                     title: &str,
                     faculty: Option<bool>,
                     trained_thru: &str| Principal {
            cn: cn.to_string(),
            sn: Some(sn.to_string()),
            given_name: Some(given.to_string()),
            mail: mail.map(str::to_string),
            ou: Some(ou.to_string()),
            title: Some(title.to_string()),
            faculty,
            trained_thru: (!trained_thru.is_empty()).then(|| trained_thru.to_string()),
        };
        Self {
            records: vec![
                entry(
                    "john.smith",
                    "Smith",
                    "John",
                    Some("john.smith@js.example"),
                    "Neurology",
                    "Chair of Department of Neurology",
                    Some(true),
                    "2012-01-01",
                ),
                entry(
                    "bill.student",
                    "Student",
                    "Bill",
                    Some("bill.student@js.example"),
                    "Neurology",
                    "Intern",
                    Some(false),
                    "2010-01-01",
                ),
                entry(
                    "carol.student",
                    "Student",
                    "Carol",
                    Some("carol.student@js.example"),
                    "Neurology",
                    "Intern",
                    None,
                    "",
                ),
                entry(
                    "some.one",
                    "One",
                    "Some",
                    Some("some.one@js.example"),
                    "Pathology",
                    "Research Associate",
                    Some(false),
                    "2012-06-01",
                ),
                entry(
                    "big.wig",
                    "Wig",
                    "Big",
                    Some("big.wig@js.example"),
                    "Administration",
                    "Executive Vice Chancellor",
                    Some(false),
                    "2012-06-01",
                ),
                entry(
                    "jill.student",
                    "Student",
                    "Jill",
                    Some("jill.student@js.example"),
                    "Pathology",
                    "Intern",
                    Some(false),
                    "2012-06-01",
                ),
                entry(
                    "koam.rin",
                    "Rin",
                    "Koam",
                    None,
                    "Pathology",
                    "Visiting Scholar",
                    Some(false),
                    "",
                ),
            ],
        }
    }

    /// Creates the directory with an explicit population.
    #[must_use]
    pub fn with_records(records: Vec<Principal>) -> Self {
        Self { records }
    }

    fn project(entry: &Principal, attrs: &[&str]) -> Principal {
        if attrs.is_empty() {
            return entry.clone();
        }
        let keep = |attribute: &str, value: &Option<String>| {
            attrs.contains(&attribute).then(|| value.clone()).flatten()
        };
        Principal {
            cn: entry.cn.clone(),
            sn: keep("sn", &entry.sn),
            given_name: keep("givenname", &entry.given_name),
            mail: keep("mail", &entry.mail),
            ou: keep("ou", &entry.ou),
            title: keep("title", &entry.title),
            faculty: attrs
                .contains(&"faculty")
                .then_some(entry.faculty)
                .flatten(),
            trained_thru: keep("trainedthru", &entry.trained_thru),
        }
    }
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory for MockDirectory {
    fn lookup(&self, cn: &str) -> Result<Principal, DirectoryError> {
        self.records
            .iter()
            .find(|entry| entry.cn == cn)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound {
                name: cn.to_string(),
            })
    }

    fn search(&self, query: &str, attrs: &[&str]) -> Result<Vec<Principal>, DirectoryError> {
        let parsed = parse_cn_query(query)?;
        debug!(query, "directory search");
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                if parsed.wildcard {
                    entry.cn.starts_with(&parsed.stem)
                } else {
                    entry.cn == parsed.stem
                }
            })
            .map(|entry| Self::project(entry, attrs))
            .collect())
    }

    fn latest_training(&self, cn: &str) -> Result<Training, DirectoryError> {
        let entry = self.lookup(cn)?;
        let expired = entry
            .trained_thru
            .ok_or_else(|| DirectoryError::NotFound {
                name: cn.to_string(),
            })?;
        Ok(Training {
            username: cn.to_string(),
            completed: expired.clone(),
            expired,
            course: "Human Subjects 101".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
