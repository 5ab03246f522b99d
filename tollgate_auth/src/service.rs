//! Issuance, rotation and revocation of token pairs

use std::{error::Error as StdError, fmt, sync::Arc};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::hmac;
use serde::{Deserialize, Serialize};
use tollgate::{
    AccessToken, AccessTokenRef, Nonce, RefreshToken, RefreshTokenRef, Role, TokenCodec,
    TokenPayload,
};
use tollgate_clock::{Clock, DurationSecs, System};

use crate::{
    config::AuthConfig,
    credentials::CredentialVerifier,
    error::{AuthError, INVALID_CREDENTIALS, INVALID_REFRESH_TOKEN, INVALID_TOKEN},
    principal::{NewPrincipal, Principal, PrincipalRepository},
    rate_limit::{NoopRateLimiter, RateLimitDecision, RateLimiter},
    session::{SessionCache, SessionKey},
};

const FINGERPRINT_LABEL: &[u8] = b"tollgate refresh-token fingerprint v1";

/// A freshly issued token pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    /// Nonce shared by both tokens
    pub nonce: Nonce,
    /// Short-lived token for authorizing requests
    pub access_token: AccessToken,
    /// Single-use token for obtaining the next pair
    pub refresh_token: RefreshToken,
}

/// Details of a new account
#[derive(Clone, PartialEq, Eq)]
pub struct SignUp {
    /// Email address
    pub email: String,
    /// Plaintext password
    pub password: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Requested role, or the default role
    pub role: Option<Role>,
}

impl fmt::Debug for SignUp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SignUp")
            .field("email", &self.email)
            .field("password", &"***")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("role", &self.role)
            .finish()
    }
}

/// Issues, rotates and revokes token pairs
///
/// Every issued pair records a session entry keyed by principal and nonce.
/// A refresh token is accepted only while that entry exists, and the
/// entry is consumed by the refresh that accepts it.
pub struct AuthService<C = System> {
    principals: Arc<dyn PrincipalRepository>,
    sessions: Arc<dyn SessionCache>,
    credentials: Arc<dyn CredentialVerifier>,
    rate_limiter: Arc<dyn RateLimiter>,
    codec: TokenCodec<C>,
    fingerprint_key: hmac::Key,
    access_ttl: DurationSecs,
    refresh_ttl: DurationSecs,
}

impl<C: fmt::Debug> fmt::Debug for AuthService<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("principals", &self.principals)
            .field("sessions", &self.sessions)
            .field("credentials", &self.credentials)
            .field("rate_limiter", &self.rate_limiter)
            .field("codec", &self.codec)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl<C> AuthService<C> {
    /// Constructs a service from its collaborators
    ///
    /// Sign-in attempts are not rate limited until
    /// [`with_rate_limiter`](Self::with_rate_limiter) is used.
    pub fn new(
        principals: Arc<dyn PrincipalRepository>,
        sessions: Arc<dyn SessionCache>,
        credentials: Arc<dyn CredentialVerifier>,
        codec: TokenCodec<C>,
        config: &AuthConfig,
    ) -> Self {
        let signing_key = hmac::Key::new(hmac::HMAC_SHA256, config.secret.as_bytes());
        let derived = hmac::sign(&signing_key, FINGERPRINT_LABEL);

        Self {
            principals,
            sessions,
            credentials,
            rate_limiter: Arc::new(NoopRateLimiter),
            codec,
            fingerprint_key: hmac::Key::new(hmac::HMAC_SHA256, derived.as_ref()),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    /// Limits sign-in attempts per email address
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// The codec used to sign and verify tokens
    pub fn codec(&self) -> &TokenCodec<C> {
        &self.codec
    }

    /// Lifetime of issued access tokens
    pub fn access_ttl(&self) -> DurationSecs {
        self.access_ttl
    }

    /// Lifetime of issued refresh tokens
    pub fn refresh_ttl(&self) -> DurationSecs {
        self.refresh_ttl
    }

    fn fingerprint(&self, token: &RefreshTokenRef) -> String {
        let tag = hmac::sign(&self.fingerprint_key, token.as_str().as_bytes());
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    }

    fn fingerprint_matches(&self, token: &RefreshTokenRef, stored: &str) -> bool {
        URL_SAFE_NO_PAD.decode(stored).map_or(false, |tag| {
            hmac::verify(&self.fingerprint_key, token.as_str().as_bytes(), &tag).is_ok()
        })
    }
}

impl<C: Clock> AuthService<C> {
    /// Registers a new principal and issues its first token pair
    ///
    /// # Errors
    ///
    /// `Conflict` if the email is already registered.
    #[tracing::instrument(skip_all, fields(email = %sign_up.email))]
    pub async fn sign_up(&self, sign_up: SignUp) -> Result<AuthTokens, AuthError> {
        if self.principals.find_by_email(&sign_up.email).await?.is_some() {
            tracing::debug!("email already registered");
            return Err(AuthError::Conflict(crate::error::EMAIL_EXISTS));
        }

        let password_hash = self.credentials.hash(&sign_up.password).await?;

        let principal = self
            .principals
            .create(NewPrincipal {
                email: sign_up.email,
                first_name: sign_up.first_name,
                last_name: sign_up.last_name,
                role: sign_up.role.unwrap_or_default(),
                password_hash,
            })
            .await?;

        tracing::info!(principal.id = %principal.id, "principal signed up");
        self.sign_in(&principal).await
    }

    /// Checks an email and password, returning the matching principal
    ///
    /// An unknown email and a wrong password are indistinguishable to the
    /// caller.
    ///
    /// # Errors
    ///
    /// `TooManyRequests` when attempts for this email are being throttled,
    /// otherwise `Unauthorized` if the credentials do not match.
    #[tracing::instrument(skip_all)]
    pub async fn validate_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        if self.rate_limiter.check(&email.to_lowercase()) == RateLimitDecision::Limited {
            tracing::info!("sign-in attempts throttled");
            return Err(AuthError::TooManyRequests);
        }

        let Some(principal) = self.principals.find_by_email(email).await? else {
            tracing::debug!("no principal with this email");
            return Err(AuthError::Unauthorized(INVALID_CREDENTIALS));
        };

        if !self
            .credentials
            .verify(password, &principal.password_hash)
            .await?
        {
            tracing::debug!(principal.id = %principal.id, "password mismatch");
            return Err(AuthError::Unauthorized(INVALID_CREDENTIALS));
        }

        Ok(principal)
    }

    /// Issues a new token pair under a fresh nonce
    ///
    /// # Errors
    ///
    /// The tokens cannot be signed or the session cannot be recorded.
    #[tracing::instrument(skip_all, fields(principal.id = %principal.id, nonce))]
    pub async fn sign_in(&self, principal: &Principal) -> Result<AuthTokens, AuthError> {
        let nonce = Nonce::generate().map_err(AuthError::internal)?;
        tracing::Span::current().record("nonce", nonce.as_str());

        let access = TokenPayload::new(
            principal.identity(),
            nonce.clone(),
            self.codec.clock().now(),
            self.access_ttl,
        );
        let refresh = access.with_lifetime(self.refresh_ttl);

        let access_token = self
            .codec
            .sign_access(&access)
            .map_err(AuthError::internal)?;
        let refresh_token = self
            .codec
            .sign_refresh(&refresh)
            .map_err(AuthError::internal)?;

        self.sessions
            .set(
                &SessionKey::refresh(principal.id, &nonce),
                &self.fingerprint(&refresh_token),
                self.refresh_ttl,
            )
            .await?;

        tracing::debug!("issued token pair");

        Ok(AuthTokens {
            nonce,
            access_token,
            refresh_token,
        })
    }

    /// Exchanges a refresh token for a new pair, consuming its session
    ///
    /// The session is taken before the token's fingerprint and principal are
    /// checked, so it is consumed even when the exchange then fails.
    ///
    /// # Errors
    ///
    /// Always `Unauthorized`. Failures that are not an outright rejection of
    /// the token are logged before being reported as such.
    #[tracing::instrument(skip_all, fields(principal.id, nonce))]
    #[allow(trivial_casts)]
    pub async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<AuthTokens, AuthError> {
        match self.rotate(refresh_token).await {
            Ok(tokens) => Ok(tokens),
            Err(AuthError::Unauthorized(message)) => Err(AuthError::Unauthorized(message)),
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn StdError,
                    "unexpected failure while refreshing tokens"
                );
                Err(AuthError::Unauthorized(INVALID_REFRESH_TOKEN))
            }
        }
    }

    #[allow(trivial_casts)]
    async fn rotate(&self, refresh_token: &RefreshTokenRef) -> Result<AuthTokens, AuthError> {
        let payload = self.codec.verify_refresh(refresh_token).map_err(|error| {
            tracing::debug!(error = &error as &dyn StdError, "refresh token rejected");
            AuthError::Unauthorized(INVALID_REFRESH_TOKEN)
        })?;

        let span = tracing::Span::current();
        span.record("principal.id", payload.principal_id().0);
        span.record("nonce", payload.nonce().as_str());

        let key = SessionKey::refresh(payload.principal_id(), payload.nonce());
        let (principal, stored) = tokio::join!(
            self.principals.find_by_id(payload.principal_id()),
            self.sessions.take(&key),
        );

        let Some(principal) = principal? else {
            tracing::debug!("principal no longer exists");
            return Err(AuthError::Unauthorized(INVALID_REFRESH_TOKEN));
        };

        let Some(stored) = stored? else {
            tracing::debug!("session already consumed or expired");
            return Err(AuthError::Unauthorized(INVALID_REFRESH_TOKEN));
        };

        if !self.fingerprint_matches(refresh_token, &stored) {
            tracing::warn!("refresh token does not match its session");
            return Err(AuthError::Unauthorized(INVALID_REFRESH_TOKEN));
        }

        self.sign_in(&principal).await
    }

    /// Resolves the principal a verified payload was issued to
    ///
    /// The session cache is not consulted.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the principal no longer exists.
    pub async fn verify(&self, payload: &TokenPayload) -> Result<Principal, AuthError> {
        self.principals
            .find_by_id(payload.principal_id())
            .await?
            .ok_or(AuthError::Unauthorized(INVALID_TOKEN))
    }

    /// Verifies an access token and resolves its principal
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the token is invalid or its principal is gone.
    #[tracing::instrument(skip_all)]
    #[allow(trivial_casts)]
    pub async fn authenticate(&self, access_token: &AccessTokenRef) -> Result<Principal, AuthError> {
        let payload = self.codec.verify_access(access_token).map_err(|error| {
            tracing::debug!(error = &error as &dyn StdError, "access token rejected");
            AuthError::Unauthorized(INVALID_TOKEN)
        })?;

        self.verify(&payload).await
    }

    /// Revokes the session of a refresh token
    ///
    /// Succeeds whether or not the session was still live.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the token is not a valid refresh token.
    #[tracing::instrument(skip_all, fields(principal.id, nonce))]
    #[allow(trivial_casts)]
    pub async fn sign_out(&self, refresh_token: &RefreshTokenRef) -> Result<(), AuthError> {
        let payload = self.codec.verify_refresh(refresh_token).map_err(|error| {
            tracing::debug!(error = &error as &dyn StdError, "refresh token rejected");
            AuthError::Unauthorized(INVALID_REFRESH_TOKEN)
        })?;

        let span = tracing::Span::current();
        span.record("principal.id", payload.principal_id().0);
        span.record("nonce", payload.nonce().as_str());

        let removed = self
            .sessions
            .delete(&SessionKey::refresh(payload.principal_id(), payload.nonce()))
            .await?;

        tracing::info!(removed, "signed out");
        Ok(())
    }
}
