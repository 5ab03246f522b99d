//! Axum routes for issuing, rotating and revoking `tollgate` token pairs
//!
//! [`router`] exposes the `/auth` endpoints backed by an
//! [`AuthService`]. Other routes can be protected with
//! [`AuthState::access_token_layer`] and read the caller through the
//! [`Authenticated`] extractor.
//!
//! ```no_run
//! use std::{net::SocketAddr, sync::Arc};
//!
//! use axum::{routing::get, Router};
//! use tollgate::jwt::HmacSecret;
//! use tollgate_auth::{
//!     session::in_memory::InMemorySessionCache, Argon2Verifier, AuthConfig, AuthService,
//!     InMemoryPrincipalRepository,
//! };
//! use tollgate_axum::{AuthState, Authenticated, CookieMode};
//!
//! async fn whoami(auth: Authenticated) -> String {
//!     format!("Hello, {}!", auth.principal.first_name)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthConfig::new(HmacSecret::generate()?);
//!     let service = AuthService::new(
//!         Arc::new(InMemoryPrincipalRepository::new()),
//!         Arc::new(InMemorySessionCache::new()),
//!         Arc::new(Argon2Verifier::new()?),
//!         config.codec(),
//!         &config,
//!     );
//!     let state = AuthState::new(Arc::new(service)).with_cookie_mode(CookieMode::Disabled);
//!
//!     let app = Router::new()
//!         .route("/whoami", get(whoami))
//!         .route_layer(state.access_token_layer())
//!         .with_state(state.clone())
//!         .merge(tollgate_axum::router(state));
//!
//!     let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], 3000))).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::sync::Arc;

use axum_extra::extract::CookieJar;
use http::StatusCode;
use tollgate_auth::{AuthService, AuthTokens};
use tower_http::validate_request::ValidateRequestHeaderLayer;

pub mod cookies;
pub mod correlation;
mod error;
mod extract;
mod routes;
pub mod util;
mod verify;

pub use cookies::CookieMode;
pub use error::ApiError;
pub use extract::Authenticated;
pub use routes::router;
pub use verify::VerifyAccessToken;

/// Shared state of the auth routes
#[derive(Clone, Debug)]
pub struct AuthState {
    service: Arc<AuthService>,
    cookies: CookieMode,
}

impl AuthState {
    /// Serves requests with `service`, returning tokens in bodies only
    pub fn new(service: Arc<AuthService>) -> Self {
        Self {
            service,
            cookies: CookieMode::Disabled,
        }
    }

    /// Sets whether tokens are also delivered and accepted as cookies
    pub fn with_cookie_mode(mut self, cookies: CookieMode) -> Self {
        self.cookies = cookies;
        self
    }

    /// The underlying auth service
    pub fn service(&self) -> &AuthService {
        &self.service
    }

    /// The configured cookie mode
    pub fn cookie_mode(&self) -> CookieMode {
        self.cookies
    }

    /// A layer that rejects requests without a valid access token
    pub fn access_token_layer(&self) -> ValidateRequestHeaderLayer<VerifyAccessToken> {
        VerifyAccessToken::new(self.service.codec().clone(), self.cookies).layer()
    }

    pub(crate) fn respond_with_tokens(
        &self,
        status: StatusCode,
        jar: CookieJar,
        tokens: AuthTokens,
    ) -> (StatusCode, CookieJar, axum::Json<AuthTokens>) {
        let jar = self.cookies.set_tokens(
            jar,
            &tokens,
            self.service.access_ttl(),
            self.service.refresh_ttl(),
        );
        (status, jar, axum::Json(tokens))
    }
}
