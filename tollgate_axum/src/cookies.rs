//! Delivery of tokens through http-only cookies

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tollgate::{AccessToken, RefreshToken};
use tollgate_auth::AuthTokens;
use tollgate_clock::DurationSecs;

/// Name of the cookie carrying the access token
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
/// Name of the cookie carrying the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Whether token responses also set cookies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CookieMode {
    /// Tokens are only returned in response bodies
    #[default]
    Disabled,
    /// Tokens are also set as http-only cookies
    Enabled {
        /// Restrict the cookies to HTTPS
        secure: bool,
    },
}

impl CookieMode {
    /// Whether cookies are in use
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    pub(crate) fn set_tokens(
        self,
        jar: CookieJar,
        tokens: &AuthTokens,
        access_ttl: DurationSecs,
        refresh_ttl: DurationSecs,
    ) -> CookieJar {
        let Self::Enabled { secure } = self else {
            return jar;
        };

        jar.add(token_cookie(
            ACCESS_TOKEN_COOKIE,
            tokens.access_token.as_str(),
            access_ttl,
            secure,
        ))
        .add(token_cookie(
            REFRESH_TOKEN_COOKIE,
            tokens.refresh_token.as_str(),
            refresh_ttl,
            secure,
        ))
    }

    pub(crate) fn clear_tokens(self, jar: CookieJar) -> CookieJar {
        if !self.is_enabled() {
            return jar;
        }

        jar.remove(Cookie::build(ACCESS_TOKEN_COOKIE).path("/"))
            .remove(Cookie::build(REFRESH_TOKEN_COOKIE).path("/"))
    }

    pub(crate) fn access_token(self, jar: &CookieJar) -> Option<AccessToken> {
        self.read(jar, ACCESS_TOKEN_COOKIE).map(AccessToken::new)
    }

    pub(crate) fn refresh_token(self, jar: &CookieJar) -> Option<RefreshToken> {
        self.read(jar, REFRESH_TOKEN_COOKIE).map(RefreshToken::new)
    }

    fn read(self, jar: &CookieJar, name: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }

        jar.get(name)
            .map(|c| c.value().trim())
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    }
}

fn token_cookie(name: &'static str, value: &str, ttl: DurationSecs, secure: bool) -> Cookie<'static> {
    let max_age = i64::try_from(ttl.0).unwrap_or(i64::MAX);

    Cookie::build((name, value.to_owned()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .build()
}
