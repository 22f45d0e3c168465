//! Deployment namespaces
//!
//! A namespace names one deployment instance (for example `myapp-test`). It is
//! the prefix of every resource the instance owns and the scope of every
//! permission statement generated for it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Length of the truncated namespace used by length-constrained identifiers
/// such as load balancer and target group names.
pub const TRUNCATED_LEN: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("Namespace cannot be empty")]
    Empty,

    #[error("Invalid namespace '{0}': must start with a letter and contain only letters, digits and '-'")]
    InvalidCharacters(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(value: impl Into<String>) -> Result<Self, NamespaceError> {
        let value = value.into();
        if value.is_empty() {
            return Err(NamespaceError::Empty);
        }

        static NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = NAMESPACE_REGEX.get_or_init(|| {
            Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").expect("Invalid namespace regex")
        });
        if !re.is_match(&value) {
            return Err(NamespaceError::InvalidCharacters(value));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First five characters of the namespace.
    ///
    /// Load balancers and target groups get generated names that only keep
    /// this prefix of the stack name, so policies targeting them must use the
    /// same truncation or they will not match the provisioned resources.
    pub fn truncated(&self) -> &str {
        // Namespaces are ASCII, so byte slicing is char-safe.
        let end = self.0.len().min(TRUNCATED_LEN);
        &self.0[..end]
    }

    /// `<namespace>*`, the usual resource name pattern.
    pub fn pattern(&self) -> String {
        format!("{}*", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = NamespaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
