//! Core types for Hive
//!
//! This module defines the fundamental session types used throughout the
//! workspace, using newtype patterns for semantic validation.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::{HiveError, SessionError};

/// Longest accepted session name
pub const MAX_SESSION_ID_LEN: usize = 128;

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Stable, unique name of one protocol session
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Create a validated session id
    pub fn new(id: impl Into<String>) -> Result<Self, HiveError> {
        let id = id.into();
        if id.is_empty() {
            return Err(invalid("session id must not be empty"));
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(invalid(format!(
                "session id longer than {} bytes",
                MAX_SESSION_ID_LEN
            )));
        }
        if id.trim() != id {
            return Err(invalid("session id has surrounding whitespace"));
        }
        if id.chars().any(char::is_control) {
            return Err(invalid("session id contains control characters"));
        }
        Ok(Self(id))
    }

    /// Borrow the session name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn invalid(reason: impl Into<String>) -> HiveError {
    HiveError::Session(SessionError::InvalidId {
        reason: reason.into(),
    })
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = HiveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl Deref for SessionId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Session Status
// ----------------------------------------------------------------------------

/// Lifecycle status of a session
///
/// `Connecting`, `Open` and `Close` mirror the protocol engine's connection
/// phases. `Disconnected` is reported for sessions that have no live registry
/// entry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Open,
    Close,
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Open => "open",
            SessionStatus::Close => "close",
            SessionStatus::Disconnected => "disconnected",
        }
    }

    /// Whether a socket may exist for a session in this status
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Open)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(SessionStatus::Connecting),
            "open" => Ok(SessionStatus::Open),
            "close" => Ok(SessionStatus::Close),
            "disconnected" => Ok(SessionStatus::Disconnected),
            other => Err(HiveError::storage(format!("unknown session status: {}", other))),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
