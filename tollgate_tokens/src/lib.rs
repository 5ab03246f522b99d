//! Client-side storage and renewal of `tollgate` token pairs
//!
//! A client holds the most recent token pair in a [`TokenStore`]. Reading
//! the store is cheap and synchronous so that it can be consulted on every
//! outgoing request. When the server rejects the access token, a
//! [`RefreshSource`] exchanges the stored refresh token for a new pair.
//!
//! ```
//! use tollgate::{AccessToken, RefreshToken};
//! use tollgate_tokens::{stores::InMemoryTokenStore, TokenPair, TokenStore};
//!
//! let store = InMemoryTokenStore::new();
//! store.set_tokens(TokenPair {
//!     access_token: AccessToken::from_static("access"),
//!     refresh_token: RefreshToken::from_static("refresh"),
//! });
//!
//! assert_eq!(store.access_token().unwrap().as_str(), "access");
//!
//! store.clear();
//! assert!(store.refresh_token().is_none());
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

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tollgate::{AccessToken, RefreshToken};

pub mod sources;
pub mod stores;

pub use sources::{RefreshError, RefreshSource};

/// An access token and the refresh token issued alongside it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Token attached to outgoing requests
    pub access_token: AccessToken,
    /// Token exchanged for the next pair
    pub refresh_token: RefreshToken,
}

/// Holds the tokens a client currently uses
///
/// Implementations must be cheap to read: the store is consulted for every
/// outgoing request.
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// The current access token
    fn access_token(&self) -> Option<Arc<AccessToken>>;

    /// The current refresh token
    fn refresh_token(&self) -> Option<Arc<RefreshToken>>;

    /// Replaces both tokens
    fn set_tokens(&self, tokens: TokenPair);

    /// Replaces the access token, keeping the current refresh token
    fn set_access_token(&self, token: AccessToken);

    /// Forgets both tokens
    fn clear(&self);
}

impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    fn access_token(&self) -> Option<Arc<AccessToken>> {
        T::access_token(self)
    }

    fn refresh_token(&self) -> Option<Arc<RefreshToken>> {
        T::refresh_token(self)
    }

    fn set_tokens(&self, tokens: TokenPair) {
        T::set_tokens(self, tokens)
    }

    fn set_access_token(&self, token: AccessToken) {
        T::set_access_token(self, token)
    }

    fn clear(&self) {
        T::clear(self)
    }
}
