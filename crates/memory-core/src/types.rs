//! ============================================================================
//! Shared Types - Scopes, origins, and the caller-facing error type
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reserved scope name for the shared memory pool
pub const PUBLIC_SCOPE: &str = "public";

/// Ownership partition of a memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Private to one persona
    Persona(String),
    /// Shared pool visible to every persona
    Public,
}

impl Scope {
    /// Build a persona scope, rejecting blank identifiers and the reserved name
    pub fn persona(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(MemoryError::InvalidInput(
                "persona id must not be empty".to_string(),
            ));
        }
        if trimmed.eq_ignore_ascii_case(PUBLIC_SCOPE) {
            return Ok(Scope::Public);
        }
        Ok(Scope::Persona(trimmed.to_string()))
    }

    /// Reject persona scopes that `Scope::persona` would never produce:
    /// blank or padded ids and the reserved public name
    pub fn validate(&self) -> Result<()> {
        match self {
            Scope::Public => Ok(()),
            Scope::Persona(id) if id.trim().is_empty() => Err(MemoryError::InvalidInput(
                "persona id must not be empty".to_string(),
            )),
            Scope::Persona(id) if id.trim() != id => Err(MemoryError::InvalidInput(format!(
                "persona id {:?} has surrounding whitespace",
                id
            ))),
            Scope::Persona(id) if id.eq_ignore_ascii_case(PUBLIC_SCOPE) => Err(
                MemoryError::InvalidInput(format!("{:?} is reserved for the public pool", id)),
            ),
            Scope::Persona(_) => Ok(()),
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Scope::Public)
    }

    /// Persona id, or None for the public pool
    pub fn persona_id(&self) -> Option<&str> {
        match self {
            Scope::Persona(id) => Some(id),
            Scope::Public => None,
        }
    }

    /// Origin tag carried by memories that live in this scope
    pub fn origin(&self) -> Origin {
        match self {
            Scope::Persona(_) => Origin::Persona,
            Scope::Public => Origin::Public,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Persona(id) => write!(f, "{}", id),
            Scope::Public => write!(f, "{}", PUBLIC_SCOPE),
        }
    }
}

impl FromStr for Scope {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        Scope::persona(s)
    }
}

/// Where a retrieved memory came from, relative to the querying scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Persona,
    Public,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Persona => write!(f, "persona"),
            Origin::Public => write!(f, "public"),
        }
    }
}

/// Error types for memory operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum MemoryError {
    #[error("Memory not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence unavailable: {0}")]
    Persistence(String),
}

impl MemoryError {
    pub(crate) fn persistence(err: anyhow::Error) -> Self {
        MemoryError::Persistence(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
