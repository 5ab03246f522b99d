use std::{error::Error as StdError, fmt};

use axum::body::Body;
use axum_extra::extract::CookieJar;
use http::{Request, Response};
use tollgate::{AccessToken, TokenCodec, TokenPayload};
use tower_http::validate_request::{ValidateRequest, ValidateRequestHeaderLayer};

use crate::{cookies::CookieMode, util::unauthorized};

/// Verifies the access token of each request
///
/// The token is taken from an `Authorization: Bearer` header or, when
/// cookies are enabled, from the `access_token` cookie. On success the
/// verified [`TokenPayload`] is inserted into the request extensions.
/// Otherwise the request is answered with `401 Unauthorized`.
#[derive(Clone)]
pub struct VerifyAccessToken {
    codec: TokenCodec,
    cookies: CookieMode,
}

impl fmt::Debug for VerifyAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VerifyAccessToken")
            .field("codec", &self.codec)
            .field("cookies", &self.cookies)
            .finish()
    }
}

impl VerifyAccessToken {
    /// Verifies tokens with `codec`
    pub fn new(codec: TokenCodec, cookies: CookieMode) -> Self {
        Self { codec, cookies }
    }

    /// Wraps this verifier in a layer
    pub fn layer(self) -> ValidateRequestHeaderLayer<Self> {
        ValidateRequestHeaderLayer::custom(self)
    }
}

impl<ReqBody> ValidateRequest<ReqBody> for VerifyAccessToken {
    type ResponseBody = Body;

    #[allow(trivial_casts)]
    fn validate(
        &mut self,
        request: &mut Request<ReqBody>,
    ) -> Result<(), Response<Self::ResponseBody>> {
        let token = request
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .or_else(|| {
                self.cookies
                    .access_token(&CookieJar::from_headers(request.headers()))
            })
            .ok_or_else(|| {
                tracing::debug!("access token is missing or malformed");
                unauthorized("")
            })?;

        let payload = self.codec.verify_access(&token).map_err(|error| {
            tracing::debug!(error = &error as &dyn StdError, "access token rejected");
            unauthorized("")
        })?;

        tracing::trace!(principal.id = %payload.principal_id(), "access token was valid");
        let _ = request.extensions_mut().insert::<TokenPayload>(payload);

        Ok(())
    }
}

fn extract_bearer(auth: &str) -> Option<AccessToken> {
    if auth.len() <= 7 || !auth[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }

    let token = auth[7..].trim();
    (!token.is_empty()).then(|| AccessToken::new(token.to_owned()))
}
