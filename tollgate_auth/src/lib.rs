//! Server-side issuance and rotation of `tollgate` token pairs
//!
//! An [`AuthService`] ties together a [`PrincipalRepository`], a
//! [`SessionCache`], a [`CredentialVerifier`] and a
//! [`TokenCodec`](tollgate::TokenCodec). Every issued pair is recorded in the
//! session cache under a key derived from the principal and the pair's
//! nonce; refreshing atomically consumes that entry before a new pair is
//! issued, so each refresh token can be used only once.
//!
//! ```
//! use std::sync::Arc;
//!
//! use tollgate::jwt::HmacSecret;
//! use tollgate_auth::{
//!     session::in_memory::InMemorySessionCache, Argon2Verifier, AuthConfig, AuthService,
//!     InMemoryPrincipalRepository, SignUp,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::new(HmacSecret::generate()?);
//! let service = AuthService::new(
//!     Arc::new(InMemoryPrincipalRepository::new()),
//!     Arc::new(InMemorySessionCache::new()),
//!     Arc::new(Argon2Verifier::with_cost(8, 1, 1)?),
//!     config.codec(),
//!     &config,
//! );
//!
//! let tokens = service
//!     .sign_up(SignUp {
//!         email: "a@b.com".into(),
//!         password: "Str0ng!Pass".into(),
//!         first_name: "Ada".into(),
//!         last_name: "Lovelace".into(),
//!         role: None,
//!     })
//!     .await?;
//!
//! let next = service.refresh(&tokens.refresh_token).await?;
//! assert_ne!(next.nonce, tokens.nonce);
//! assert!(service.refresh(&tokens.refresh_token).await.is_err());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
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

mod config;
pub mod credentials;
pub mod error;
mod principal;
pub mod rate_limit;
mod service;
pub mod session;

pub use config::{AuthConfig, DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL};
pub use credentials::{Argon2Verifier, CredentialVerifier, PasswordHash, PasswordHashRef};
pub use error::AuthError;
pub use principal::{InMemoryPrincipalRepository, NewPrincipal, Principal, PrincipalRepository};
pub use rate_limit::{FixedWindowRateLimiter, NoopRateLimiter, RateLimitDecision, RateLimiter};
pub use service::{AuthService, AuthTokens, SignUp};
pub use session::{SessionCache, SessionKey, SessionKeyRef};
