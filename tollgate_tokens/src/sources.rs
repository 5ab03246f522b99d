//! Sources of renewed token pairs

use std::{error::Error as StdError, fmt};

use async_trait::async_trait;
use thiserror::Error;
use tollgate::RefreshTokenRef;

use crate::TokenPair;

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;

#[cfg(feature = "http")]
pub use self::http::HttpRefreshSource;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Exchanges a refresh token for a new token pair
#[async_trait]
pub trait RefreshSource: Send + Sync + fmt::Debug {
    /// Requests a new pair using `refresh_token`
    ///
    /// # Errors
    ///
    /// The refresh token was rejected or the request could not be completed.
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, RefreshError>;
}

#[async_trait]
impl<T: RefreshSource + ?Sized> RefreshSource for std::sync::Arc<T> {
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, RefreshError> {
        T::refresh(self, refresh_token).await
    }
}

/// An error while renewing a token pair
#[derive(Debug, Error)]
pub enum RefreshError {
    /// No refresh token was available
    #[error("no refresh token available")]
    Missing,
    /// The server refused the refresh token
    #[error("refresh rejected with status {status}")]
    Rejected {
        /// HTTP status code of the response
        status: u16,
        /// Response body, as text
        body: String,
    },
    /// The request could not be sent or its response could not be read
    #[error("error sending refresh request")]
    Transport(#[source] BoxError),
    /// The refresh did not complete in time
    #[error("refresh timed out")]
    Timeout,
    /// The response did not contain a token pair
    #[error("unable to decode refresh response")]
    Decode(#[source] BoxError),
}

impl RefreshError {
    /// Wraps a transport failure
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Wraps a decoding failure
    pub fn decode(err: impl Into<BoxError>) -> Self {
        Self::Decode(err.into())
    }

    /// Whether the server explicitly refused the refresh token
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
