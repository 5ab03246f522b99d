use tollgate::{jwt::HmacSecret, TokenCodec};
use tollgate_clock::DurationSecs;

/// Default access token lifetime: 15 minutes
pub const DEFAULT_ACCESS_TTL: DurationSecs = DurationSecs::from_mins(15);
/// Default refresh token lifetime: 7 days
pub const DEFAULT_REFRESH_TTL: DurationSecs = DurationSecs::from_days(7);

/// Settings shared by token issuance and verification
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Secret used to sign tokens and fingerprint refresh tokens
    pub secret: HmacSecret,
    /// Lifetime of access tokens
    pub access_ttl: DurationSecs,
    /// Lifetime of refresh tokens and their session entries
    pub refresh_ttl: DurationSecs,
    /// Grace period accepted past a token's expiry
    pub leeway: DurationSecs,
}

impl AuthConfig {
    /// Default lifetimes with the given signing secret
    pub fn new(secret: HmacSecret) -> Self {
        Self {
            secret,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            leeway: DurationSecs(0),
        }
    }

    /// Sets the access token lifetime
    pub fn with_access_ttl(mut self, ttl: DurationSecs) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Sets the refresh token lifetime
    pub fn with_refresh_ttl(mut self, ttl: DurationSecs) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Sets the expiry leeway
    pub fn with_leeway(mut self, leeway: DurationSecs) -> Self {
        self.leeway = leeway;
        self
    }

    /// A codec signing with this configuration's secret and leeway
    pub fn codec(&self) -> TokenCodec {
        TokenCodec::new(self.secret.clone()).with_leeway(self.leeway)
    }
}
