//! Session tokens.
//!
//! Tokens are opaque to the tracker. The only thing checked on the way in
//! is their shape: the canonical hyphenated text form of a random UUID,
//! which is always [`TOKEN_LENGTH`] bytes long.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Length of a canonical session token.
pub const TOKEN_LENGTH: usize = 36;

/// Token validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The token does not have the canonical length.
    #[error("Malformed session token: expected {} bytes, got {0}", TOKEN_LENGTH)]
    BadLength(usize),
}

/// Check a candidate token's shape.
///
/// This is a cheap length check, not a uniqueness or entropy guarantee.
///
/// # Errors
///
/// Returns [`ValidationError::BadLength`] if the candidate is not exactly
/// [`TOKEN_LENGTH`] bytes.
pub fn validate(candidate: &str) -> Result<(), ValidationError> {
    if candidate.len() != TOKEN_LENGTH {
        return Err(ValidationError::BadLength(candidate.len()));
    }
    Ok(())
}

/// A session token that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Parse and validate a client-supplied token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed.
    pub fn parse(candidate: impl Into<String>) -> Result<Self, ValidationError> {
        let candidate = candidate.into();
        validate(&candidate)?;
        Ok(Self(candidate))
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of fresh session tokens.
pub trait TokenGenerator: Send + Sync {
    /// Produce a new, unique token.
    fn generate(&self) -> SessionToken;
}

/// Generates random (v4) UUID tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl TokenGenerator for UuidGenerator {
    fn generate(&self) -> SessionToken {
        // Hyphenated v4 text is always TOKEN_LENGTH bytes.
        SessionToken(uuid::Uuid::new_v4().hyphenated().to_string())
    }
}
