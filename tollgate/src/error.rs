//! Errors produced while signing and verifying tokens

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use thiserror::Error;

/// The token cannot be split into header, payload, and signature sections
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("malformed token")]
pub struct MalformedToken {
    _p: (),
}

pub(crate) const fn malformed_token() -> MalformedToken {
    MalformedToken { _p: () }
}

/// The token header section could not be decoded
#[derive(Debug, Error)]
#[error("malformed token header")]
pub struct MalformedHeader {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_header(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedHeader {
    MalformedHeader {
        source: source.into(),
    }
}

/// The token payload section could not be decoded
#[derive(Debug, Error)]
#[error("malformed token payload")]
pub struct MalformedPayload {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_payload(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedPayload {
    MalformedPayload {
        source: source.into(),
    }
}

/// The signature did not match the header and payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("signature mismatch")]
pub struct SignatureMismatch {
    _p: (),
}

pub(crate) const fn signature_mismatch() -> SignatureMismatch {
    SignatureMismatch { _p: () }
}

/// The signing secret is empty
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("signing secret must not be empty")]
pub struct EmptySecret {
    _p: (),
}

pub(crate) const fn empty_secret() -> EmptySecret {
    EmptySecret { _p: () }
}

/// Unexpected error (possibly a bug or an environment failure)
#[derive(Debug, Error)]
#[error("unexpected error")]
pub struct Unexpected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn unexpected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> Unexpected {
    Unexpected {
        source: source.into(),
    }
}

/// A payload failed validation at the signing or verification boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum InvalidPayload {
    /// The email claim is empty
    #[error("email claim is empty")]
    EmptyEmail,
    /// The nonce claim is empty
    #[error("nonce claim is empty")]
    EmptyNonce,
    /// The token would expire at or before the moment it was issued
    #[error("expiry must be later than issuance")]
    ExpiryNotAfterIssuance,
}

/// The token claims were rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ClaimsRejected {
    /// The header names an algorithm other than HS256
    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,
    /// The token is of a different kind than expected
    #[error("token kind mismatch")]
    WrongTokenKind,
    /// The token has expired
    #[error("token has expired")]
    TokenExpired,
    /// The payload is structurally valid but semantically unusable
    #[error(transparent)]
    InvalidPayload(#[from] InvalidPayload),
}

/// An error occurring while verifying a token
#[derive(Debug, Error)]
pub enum TokenVerifyError {
    /// The token is not a three-part compact token
    #[error(transparent)]
    Malformed(#[from] MalformedToken),

    /// The header section is not valid base64url JSON
    #[error(transparent)]
    MalformedHeader(#[from] MalformedHeader),

    /// The payload section is not valid base64url JSON
    #[error(transparent)]
    MalformedPayload(#[from] MalformedPayload),

    /// The signature is invalid
    #[error(transparent)]
    SignatureMismatch(#[from] SignatureMismatch),

    /// The claims were rejected
    #[error(transparent)]
    ClaimsRejected(#[from] ClaimsRejected),
}

/// An error occurring while signing a token
#[derive(Debug, Error)]
pub enum SigningError {
    /// The payload failed validation
    #[error(transparent)]
    InvalidPayload(#[from] InvalidPayload),

    /// The header or payload could not be serialized
    #[error("unable to serialize token section")]
    Serialization(#[from] serde_json::Error),
}
