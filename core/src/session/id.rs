//! Hierarchical session identifiers
//!
//! A session id is a dot-separated path of decimal segments ("0", "0.1",
//! "0.1.0"). The path encodes ancestry: "0.1" is the second child of root
//! "0". Ids are immutable once assigned and the ancestry tree is discovered
//! by prefix matching, not by stored child lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error produced when parsing a hierarchical session id
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseSessionIdError {
    #[error("session id is empty")]
    Empty,

    #[error("session id segment {segment:?} is not a canonical decimal number")]
    BadSegment { segment: String },
}

/// Dot-separated hierarchical session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Root id from a counter value ("0", "1", ...)
    pub fn root(n: u64) -> Self {
        SessionId(n.to_string())
    }

    /// Child of this id with the given suffix ("0".child(1) == "0.1")
    pub fn child(&self, suffix: u64) -> Self {
        SessionId(format!("{}.{}", self.0, suffix))
    }

    /// Parse and validate a textual id
    pub fn parse(text: &str) -> Result<Self, ParseSessionIdError> {
        if text.is_empty() {
            return Err(ParseSessionIdError::Empty);
        }
        for segment in text.split('.') {
            let valid = segment
                .parse::<u64>()
                .map(|n| n.to_string() == segment)
                .unwrap_or(false);
            if !valid {
                return Err(ParseSessionIdError::BadSegment {
                    segment: segment.to_string(),
                });
            }
        }
        Ok(SessionId(text.to_string()))
    }

    /// True when `text` would parse as an id (used to keep aliases out of
    /// the id namespace)
    pub fn is_id_like(text: &str) -> bool {
        Self::parse(text).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of path segments; roots have depth 1
    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }

    pub fn is_root(&self) -> bool {
        !self.0.contains('.')
    }

    /// Parent id, or None for a root
    pub fn parent(&self) -> Option<SessionId> {
        self.0.rfind('.').map(|dot| SessionId(self.0[..dot].to_string()))
    }

    /// Final path segment as a number
    pub fn suffix(&self) -> u64 {
        let last = self.0.rsplit('.').next().unwrap_or(&self.0);
        last.parse().unwrap_or(0)
    }

    /// Strict descendant check: "0.1.2" descends from "0.1" and "0", never
    /// from itself, and "0.10" does not descend from "0.1"
    pub fn is_descendant_of(&self, ancestor: &SessionId) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(ancestor.0.as_str())
            && self.0.as_bytes()[ancestor.0.len()] == b'.'
    }

    fn segments(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.split('.').map(|s| s.parse::<u64>().unwrap_or(0))
    }
}

impl Ord for SessionId {
    /// Numeric per-segment order, so "0.2" sorts before "0.10"
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.segments().cmp(other.segments())
    }
}

impl PartialOrd for SessionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionId::parse(s)
    }
}
