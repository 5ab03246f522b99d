//! Signed access and refresh tokens bound together by an issuance nonce
//!
//! Every successful sign-in or refresh issues a *pair* of tokens that share
//! the same [`Identity`], [`Nonce`] and issuance time. The short-lived
//! [`AccessToken`] authorizes requests; the long-lived [`RefreshToken`] can be
//! exchanged exactly once for a new pair. Both are compact HS256 tokens
//! produced by a [`TokenCodec`], distinguished by their `typ` header so that
//! one can never be accepted in place of the other.
//!
//! Secrets are redacted when formatted:
//!
//! ```
//! use tollgate::AccessToken;
//!
//! let token = AccessToken::from_static("eyJhbGciOiJIUzI1NiJ9.e30.c2lnbmF0dXJl");
//! assert_eq!(format!("{}", token), "***ACCESS TOKEN***");
//! assert_eq!(format!("{:#10?}", token), "\"eyJhbGciO…\"");
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

mod braids;
pub mod error;
pub mod jwt;
mod payload;

#[doc(inline)]
pub use braids::*;
#[doc(inline)]
pub use jwt::{TokenCodec, TokenKind};
#[doc(inline)]
pub use payload::{Identity, PrincipalId, Role, TokenPayload, UnknownRole};
