//! Storage for issued refresh-token sessions
//!
//! Each sign-in or refresh records one session entry, keyed by the
//! principal and the issuance nonce, holding a fingerprint of the refresh
//! token. Refreshing *takes* the entry, so a given refresh token can be
//! exchanged at most once.

use std::fmt;

use aliri_braid::braid;
use async_trait::async_trait;
use tollgate::{NonceRef, PrincipalId};
use tollgate_clock::DurationSecs;

use crate::error::SessionCacheError;

pub mod in_memory;
#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

/// Key of a session entry
#[braid]
pub struct SessionKey;

impl SessionKey {
    /// The key under which the refresh session for `nonce` is stored
    ///
    /// ```
    /// use tollgate::{Nonce, PrincipalId};
    /// use tollgate_auth::session::SessionKey;
    ///
    /// let key = SessionKey::refresh(PrincipalId(7), &Nonce::from_static("abc"));
    /// assert_eq!(key.as_str(), "principal:7:rf:abc");
    /// ```
    pub fn refresh(principal: PrincipalId, nonce: &NonceRef) -> Self {
        Self::new(format!("principal:{}:rf:{}", principal, nonce.as_str()))
    }
}

/// A key-value store with per-entry expiry
#[async_trait]
pub trait SessionCache: Send + Sync + fmt::Debug {
    /// Gets the live value stored under `key`
    async fn get(&self, key: &SessionKeyRef) -> Result<Option<String>, SessionCacheError>;

    /// Stores `value` under `key`, expiring after `ttl`
    async fn set(
        &self,
        key: &SessionKeyRef,
        value: &str,
        ttl: DurationSecs,
    ) -> Result<(), SessionCacheError>;

    /// Removes `key`, returning whether a live entry was removed
    async fn delete(&self, key: &SessionKeyRef) -> Result<bool, SessionCacheError>;

    /// Atomically gets and removes the live value stored under `key`
    ///
    /// Of any number of concurrent calls for the same key, at most one
    /// observes the value.
    async fn take(&self, key: &SessionKeyRef) -> Result<Option<String>, SessionCacheError>;
}
