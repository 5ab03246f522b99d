//! The claims carried by every access and refresh token

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tollgate_clock::{DurationSecs, UnixTime};

use crate::{error::InvalidPayload, Nonce};

/// Identifier of an authenticated principal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub u64);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The role granted to a principal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access
    Admin,
    /// Staff access
    Staff,
    /// Executive access, granted when no role is requested at sign-up
    #[default]
    Executive,
}

impl Role {
    /// The wire name of the role
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Executive => "executive",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role name is not one of `admin`, `staff` or `executive`
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "staff" => Ok(Self::Staff),
            "executive" => Ok(Self::Executive),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

/// Who a token was issued to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// The principal's identifier
    pub id: PrincipalId,
    /// The principal's email address
    pub email: String,
    /// The principal's given name
    pub first_name: String,
    /// The principal's family name
    pub last_name: String,
    /// The principal's role
    pub role: Role,
}

/// The payload of a signed token
///
/// An access token and its companion refresh token carry the same identity,
/// nonce and issuance time; only `exp` differs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[must_use]
pub struct TokenPayload {
    #[serde(flatten)]
    identity: Identity,
    nonce: Nonce,
    iat: UnixTime,
    exp: UnixTime,
}

impl TokenPayload {
    /// Builds a payload issued at `issued` that stays valid for `lifetime`
    pub fn new(identity: Identity, nonce: Nonce, issued: UnixTime, lifetime: DurationSecs) -> Self {
        Self {
            identity,
            nonce,
            iat: issued,
            exp: issued + lifetime,
        }
    }

    /// The same payload, re-expiring `lifetime` after its issuance time
    pub fn with_lifetime(&self, lifetime: DurationSecs) -> Self {
        Self {
            exp: self.iat + lifetime,
            ..self.clone()
        }
    }

    /// Checks the invariants every signed payload must hold
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), InvalidPayload> {
        if self.identity.email.trim().is_empty() {
            return Err(InvalidPayload::EmptyEmail);
        }

        if self.nonce.as_str().is_empty() {
            return Err(InvalidPayload::EmptyNonce);
        }

        if self.exp <= self.iat {
            return Err(InvalidPayload::ExpiryNotAfterIssuance);
        }

        Ok(())
    }

    /// The identity the token was issued to
    #[inline]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The principal identifier
    #[inline]
    pub fn principal_id(&self) -> PrincipalId {
        self.identity.id
    }

    /// The issuance nonce
    #[inline]
    pub fn nonce(&self) -> &crate::NonceRef {
        &self.nonce
    }

    /// When the token was issued
    #[inline]
    pub fn issued_at(&self) -> UnixTime {
        self.iat
    }

    /// When the token expires
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.exp
    }

    /// The total validity period of the token
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.exp - self.iat
    }
}
