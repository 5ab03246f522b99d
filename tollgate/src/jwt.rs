//! Compact HS256 tokens
//!
//! Tokens appear as three base64url sections separated by `.`:
//!
//! ```text
//! base64url(header).base64url(payload).base64url(signature)
//! ```
//!
//! The header names the signing algorithm (always `HS256`) and the token
//! kind (`at+jwt` for access tokens, `rt+jwt` for refresh tokens). The
//! payload is a JSON [`TokenPayload`]. The signature is an HMAC-SHA256 over
//! the first two sections, keyed with the shared [`HmacSecret`].
//!
//! Nothing in the header or payload is trusted until the signature has been
//! checked.
//!
//! ```
//! use tollgate::{Identity, Nonce, PrincipalId, Role, TokenCodec, TokenPayload};
//! use tollgate::jwt::HmacSecret;
//! use tollgate_clock::{Clock, DurationSecs, System};
//!
//! let codec = TokenCodec::new(HmacSecret::new(b"a very secret key".to_vec()).unwrap());
//!
//! let payload = TokenPayload::new(
//!     Identity {
//!         id: PrincipalId(1),
//!         email: "a@b.com".into(),
//!         first_name: "Ada".into(),
//!         last_name: "Lovelace".into(),
//!         role: Role::Admin,
//!     },
//!     Nonce::generate().unwrap(),
//!     System.now(),
//!     DurationSecs::from_mins(15),
//! );
//!
//! let token = codec.sign_access(&payload).unwrap();
//! let verified = codec.verify_access(&token).unwrap();
//! assert_eq!(verified, payload);
//! ```

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::{
    hmac,
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use tollgate_clock::{Clock, DurationSecs, System};

use crate::{
    error::{self, ClaimsRejected, SigningError, TokenVerifyError},
    AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, TokenPayload,
};

const ALGORITHM: &str = "HS256";

/// Which half of a token pair a token is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// A short-lived access token
    #[serde(rename = "at+jwt")]
    Access,
    /// A long-lived refresh token
    #[serde(rename = "rt+jwt")]
    Refresh,
}

impl TokenKind {
    /// The value of the `typ` header for this kind
    pub const fn typ(self) -> &'static str {
        match self {
            Self::Access => "at+jwt",
            Self::Refresh => "rt+jwt",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.typ())
    }
}

#[derive(Serialize)]
struct Headers {
    alg: &'static str,
    typ: TokenKind,
}

#[derive(Deserialize)]
struct UntrustedHeaders {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// Shared HMAC secret used to sign and verify tokens
#[derive(Clone)]
#[must_use]
pub struct HmacSecret {
    secret: Vec<u8>,
}

impl fmt::Debug for HmacSecret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("HmacSecret { secret }")
    }
}

impl HmacSecret {
    /// Wraps raw secret bytes
    ///
    /// # Errors
    ///
    /// The secret is empty.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, error::EmptySecret> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(error::empty_secret());
        }
        Ok(Self { secret })
    }

    /// Generates a random 256-bit secret
    ///
    /// # Errors
    ///
    /// The system random number generator failed.
    pub fn generate() -> Result<Self, error::Unexpected> {
        let mut secret = vec![0; 32];
        SystemRandom::new()
            .fill(&mut secret)
            .map_err(|_| error::unexpected("random number generator failure"))?;
        Ok(Self { secret })
    }

    /// The raw secret bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.secret
    }
}

/// Signs and verifies access and refresh tokens
#[derive(Clone)]
pub struct TokenCodec<C = System> {
    key: hmac::Key,
    leeway: DurationSecs,
    clock: C,
}

impl<C: fmt::Debug> fmt::Debug for TokenCodec<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("key", &"HS256")
            .field("leeway", &self.leeway)
            .field("clock", &self.clock)
            .finish()
    }
}

impl TokenCodec<System> {
    /// Constructs a codec that checks expiry against the system clock
    pub fn new(secret: HmacSecret) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            leeway: DurationSecs(0),
            clock: System,
        }
    }
}

impl<C> TokenCodec<C> {
    /// Uses the given clock for expiry checks
    pub fn with_clock<D>(self, clock: D) -> TokenCodec<D> {
        TokenCodec {
            key: self.key,
            leeway: self.leeway,
            clock,
        }
    }

    /// Accepts tokens up to `leeway` past their expiry
    pub fn with_leeway(self, leeway: DurationSecs) -> Self {
        Self { leeway, ..self }
    }

    /// The clock used for expiry checks
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Signs an access token for the payload
    ///
    /// # Errors
    ///
    /// The payload fails validation or cannot be serialized.
    pub fn sign_access(&self, payload: &TokenPayload) -> Result<AccessToken, SigningError> {
        self.sign(TokenKind::Access, payload).map(AccessToken::new)
    }

    /// Signs a refresh token for the payload
    ///
    /// # Errors
    ///
    /// The payload fails validation or cannot be serialized.
    pub fn sign_refresh(&self, payload: &TokenPayload) -> Result<RefreshToken, SigningError> {
        self.sign(TokenKind::Refresh, payload)
            .map(RefreshToken::new)
    }

    fn sign(&self, kind: TokenKind, payload: &TokenPayload) -> Result<String, SigningError> {
        payload.validate()?;

        let headers = serde_json::to_vec(&Headers {
            alg: ALGORITHM,
            typ: kind,
        })?;
        let body = serde_json::to_vec(payload)?;

        let mut compact = URL_SAFE_NO_PAD.encode(headers);
        compact.push('.');
        URL_SAFE_NO_PAD.encode_string(body, &mut compact);

        let signature = hmac::sign(&self.key, compact.as_bytes());
        compact.push('.');
        URL_SAFE_NO_PAD.encode_string(signature.as_ref(), &mut compact);

        Ok(compact)
    }
}

impl<C: Clock> TokenCodec<C> {
    /// Verifies an access token and returns its payload
    ///
    /// # Errors
    ///
    /// The token is malformed, forged, expired, or is a refresh token.
    pub fn verify_access(&self, token: &AccessTokenRef) -> Result<TokenPayload, TokenVerifyError> {
        self.verify(TokenKind::Access, token.as_str())
    }

    /// Verifies a refresh token and returns its payload
    ///
    /// # Errors
    ///
    /// The token is malformed, forged, expired, or is an access token.
    pub fn verify_refresh(
        &self,
        token: &RefreshTokenRef,
    ) -> Result<TokenPayload, TokenVerifyError> {
        self.verify(TokenKind::Refresh, token.as_str())
    }

    fn verify(&self, kind: TokenKind, token: &str) -> Result<TokenPayload, TokenVerifyError> {
        let (message, signature) = token.rsplit_once('.').ok_or_else(error::malformed_token)?;
        let (header, body) = message.split_once('.').ok_or_else(error::malformed_token)?;
        if header.is_empty() || body.is_empty() || body.contains('.') {
            return Err(error::malformed_token().into());
        }

        let header: UntrustedHeaders = decode_section(header).map_err(error::malformed_header)?;

        if header.alg != ALGORITHM {
            tracing::debug!(alg = %header.alg, "rejecting token with unsupported algorithm");
            return Err(ClaimsRejected::UnsupportedAlgorithm.into());
        }

        if header.typ.as_deref() != Some(kind.typ()) {
            return Err(ClaimsRejected::WrongTokenKind.into());
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| error::signature_mismatch())?;
        hmac::verify(&self.key, message.as_bytes(), &signature)
            .map_err(|_| error::signature_mismatch())?;

        let payload: TokenPayload = decode_section(body).map_err(error::malformed_payload)?;

        let now = self.clock.now();
        if now >= payload.expires_at() + self.leeway {
            return Err(ClaimsRejected::TokenExpired.into());
        }

        payload.validate().map_err(ClaimsRejected::from)?;

        Ok(payload)
    }
}

fn decode_section<T: serde::de::DeserializeOwned>(
    section: &str,
) -> Result<T, Box<dyn std::error::Error + Send + Sync + 'static>> {
    let bytes = URL_SAFE_NO_PAD.decode(section)?;
    Ok(serde_json::from_slice(&bytes)?)
}
