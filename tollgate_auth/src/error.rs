//! Errors surfaced by the auth service and its collaborators

use std::error::Error as StdError;

use thiserror::Error;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Message returned for any failed credential check
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
/// Message returned for any rejected access token
pub const INVALID_TOKEN: &str = "Invalid or expired token";
/// Message returned for any rejected refresh token
pub const INVALID_REFRESH_TOKEN: &str = "Invalid or expired refresh token";
/// Message returned when signing up with an email that is already taken
pub const EMAIL_EXISTS: &str = "Email already exists";

/// An error returned by an [`AuthService`](crate::AuthService) operation
///
/// Messages carried by `Unauthorized` and `Conflict` are safe to show to
/// callers. `Internal` carries the underlying cause for logging only.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The caller could not be authenticated
    #[error("{0}")]
    Unauthorized(&'static str),

    /// The request conflicts with existing state
    #[error("{0}")]
    Conflict(&'static str),

    /// Too many attempts were made in the current window
    #[error("too many requests")]
    TooManyRequests,

    /// An unexpected failure in a collaborator
    #[error("internal error")]
    Internal(#[source] BoxError),
}

impl AuthError {
    pub(crate) fn internal(source: impl Into<BoxError>) -> Self {
        Self::Internal(source.into())
    }

    /// Whether this error should be reported to the caller as unauthorized
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// The session cache could not complete an operation
#[derive(Debug, Error)]
#[error("session cache unavailable")]
pub struct SessionCacheError {
    #[from]
    source: BoxError,
}

/// Wraps a backend failure as a [`SessionCacheError`]
pub fn session_cache_error(source: impl Into<BoxError>) -> SessionCacheError {
    SessionCacheError {
        source: source.into(),
    }
}

impl From<SessionCacheError> for AuthError {
    fn from(e: SessionCacheError) -> Self {
        Self::internal(e)
    }
}

/// A password could not be hashed or a stored hash could not be checked
#[derive(Debug, Error)]
#[error("credential verification failed")]
pub struct CredentialError {
    #[from]
    source: BoxError,
}

pub(crate) fn credential_error(source: impl Into<BoxError>) -> CredentialError {
    CredentialError {
        source: source.into(),
    }
}

impl From<CredentialError> for AuthError {
    fn from(e: CredentialError) -> Self {
        Self::internal(e)
    }
}

/// An error returned by a [`PrincipalRepository`](crate::PrincipalRepository)
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Another principal already uses this email address
    #[error("email address is already registered")]
    DuplicateEmail,

    /// The backing store failed
    #[error("principal store unavailable")]
    Unavailable(#[source] BoxError),
}

impl From<RepositoryError> for AuthError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::DuplicateEmail => Self::Conflict(EMAIL_EXISTS),
            e => Self::internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_email_becomes_conflict() {
        let err = AuthError::from(RepositoryError::DuplicateEmail);
        assert!(matches!(err, AuthError::Conflict(EMAIL_EXISTS)));
    }

    #[test]
    fn internal_errors_keep_their_cause() {
        let err = AuthError::from(session_cache_error("connection reset"));
        let cause = err.source().and_then(|e| e.source());
        assert_eq!(cause.map(ToString::to_string).as_deref(), Some("connection reset"));
    }
}
