use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts, Request},
    Json,
};
use http::request::Parts;
use serde::de::DeserializeOwned;
use tollgate::TokenPayload;
use tollgate_auth::Principal;
use validator::{Validate, ValidationErrors};

use crate::{ApiError, AuthState};

/// The principal behind a verified access token
///
/// Requires the route to sit behind
/// [`AuthState::access_token_layer`]; the principal is resolved through
/// [`AuthService::verify`](tollgate_auth::AuthService::verify).
#[derive(Clone, Debug)]
pub struct Authenticated {
    /// The resolved principal
    pub principal: Principal,
    /// The verified token payload
    pub payload: TokenPayload,
}

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let payload = parts
            .extensions
            .get::<TokenPayload>()
            .cloned()
            .ok_or(ApiError::MissingClaims)?;

        let state = AuthState::from_ref(state);
        let principal = state.service().verify(&payload).await?;

        Ok(Self { principal, payload })
    }
}

/// A JSON body that has passed its validation rules
pub(crate) struct ValidJson<T>(pub(crate) T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

        value
            .validate()
            .map_err(|errors| ApiError::BadRequest(describe(&errors)))?;

        Ok(Self(value))
    }
}

fn describe(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{field} is invalid"),
            })
        })
        .collect();

    messages.sort();
    messages.join("; ")
}
