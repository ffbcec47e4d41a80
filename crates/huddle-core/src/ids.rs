//! Type-safe identifiers for connections, identities and groups.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Maximum length (in characters) of a username or group name.
pub const MAX_NAME_LEN: usize = 64;

// ============================================================================
// Connection Handle
// ============================================================================

/// Opaque handle for one physical connection.
///
/// Assigned by the transport from a monotonic counter, so a handle is never
/// reused for a different connection within one process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ============================================================================
// Validated Names
// ============================================================================

/// Trims `raw` and checks it is usable as a display or group name.
fn validate_name(field: &'static str, raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(DomainError::invalid(field, raw, "must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::invalid(field, raw, "longer than 64 characters"));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(DomainError::invalid(field, raw, "contains control characters"));
    }

    Ok(trimmed.to_string())
}

/// A self-claimed display identity.
///
/// Construction goes through [`Username::parse`], so a `Username` value is
/// always non-empty, trimmed, and free of control characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Validates and wraps a claimed name.
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        validate_name("username", raw.as_ref()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Username {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Name of a multicast group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GroupName(String);

impl GroupName {
    /// Validates and wraps a group name.
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        validate_name("group name", raw.as_ref()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for GroupName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}
