use std::error::Error as StdError;

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::Serialize;
use tollgate_auth::AuthError;

/// An error returned from one of the auth routes
///
/// Rendered as a JSON body of the form
/// `{ "statusCode": 401, "message": "...", "error": "Unauthorized" }`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The auth service rejected the request
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request body was missing or invalid
    #[error("{0}")]
    BadRequest(String),

    /// The verified token payload was not found in the request extensions
    ///
    /// The route is missing the access token layer.
    #[error("token claims missing")]
    MissingClaims,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    status_code: u16,
    message: &'a str,
    error: &'a str,
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, &str) {
        match self {
            Self::Auth(AuthError::Unauthorized(message)) => (StatusCode::UNAUTHORIZED, *message),
            Self::Auth(AuthError::Conflict(message)) => (StatusCode::CONFLICT, *message),
            Self::Auth(AuthError::TooManyRequests) => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many attempts, try again later")
            }
            Self::Auth(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message.as_str()),
            Self::MissingClaims => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        }
    }
}

impl IntoResponse for ApiError {
    #[allow(trivial_casts)]
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = &self as &dyn StdError, "request failed");
        } else {
            tracing::debug!(%status, message, "request rejected");
        }

        let body = ErrorBody {
            status_code: status.as_u16(),
            message,
            error: status.canonical_reason().unwrap_or_default(),
        };

        (status, Json(body)).into_response()
    }
}
