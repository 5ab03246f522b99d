//! Renewal against a `tollgate` server's refresh endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tollgate::{AccessToken, RefreshToken, RefreshTokenRef};

use super::{RefreshError, RefreshSource};
use crate::TokenPair;

/// Path of the refresh endpoint relative to the server's base URL
pub const DEFAULT_REFRESH_PATH: &str = "auth/refresh";

/// Time allowed for a single refresh request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a RefreshTokenRef,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: AccessToken,
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
}

/// Renews tokens by posting the refresh token to a server endpoint
///
/// The client passed in should not itself carry the refreshing middleware;
/// refresh requests are sent without an access token.
#[derive(Clone, Debug)]
pub struct HttpRefreshSource {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl HttpRefreshSource {
    /// Posts refresh requests to `url`
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Posts refresh requests to [`DEFAULT_REFRESH_PATH`] under `base`
    ///
    /// `base` should end with a `/` if it carries a path of its own.
    ///
    /// # Errors
    ///
    /// The joined URL is not valid.
    pub fn for_base_url(client: Client, base: &Url) -> Result<Self, RefreshError> {
        let url = base.join(DEFAULT_REFRESH_PATH).map_err(RefreshError::decode)?;
        Ok(Self::new(client, url))
    }

    /// Sets the time allowed for each refresh request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The endpoint refresh requests are sent to
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RefreshSource for HttpRefreshSource {
    #[tracing::instrument(err, skip_all, fields(url = %self.url))]
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, RefreshError> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(&RefreshRequest { refresh_token })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "refresh request rejected");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await.map_err(classify)?;
        let renewed: RefreshResponse =
            serde_json::from_slice(&body).map_err(RefreshError::decode)?;

        let refresh_token = renewed.refresh_token.unwrap_or_else(|| {
            tracing::debug!("response did not rotate the refresh token, keeping current");
            refresh_token.to_owned()
        });

        tracing::debug!("received renewed tokens");
        Ok(TokenPair {
            access_token: renewed.access_token,
            refresh_token,
        })
    }
}

fn classify(err: reqwest::Error) -> RefreshError {
    if err.is_timeout() {
        RefreshError::Timeout
    } else {
        RefreshError::transport(err)
    }
}
