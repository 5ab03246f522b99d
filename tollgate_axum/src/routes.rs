use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use tollgate::{Identity, RefreshToken, Role};
use tollgate_auth::{AuthTokens, SignUp};
use validator::Validate;

use crate::{
    correlation,
    extract::{Authenticated, ValidJson},
    ApiError, AuthState,
};

/// Builds the `/auth` routes
///
/// | route                      | success                  |
/// |----------------------------|--------------------------|
/// | `POST /auth/sign-up`       | `201` with a token pair  |
/// | `POST /auth/sign-in`       | `200` with a token pair  |
/// | `POST /auth/refresh`       | `200` with a token pair  |
/// | `POST /auth/refresh-token` | alias of `/auth/refresh` |
/// | `POST /auth/sign-out`      | `204`                    |
/// | `GET /auth/me`             | `200` with the identity  |
///
/// Every response carries an `x-correlation-id` header.
pub fn router(state: AuthState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(me))
        .route_layer(state.access_token_layer());

    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/refresh", post(refresh))
        .route("/auth/refresh-token", post(refresh))
        .route("/auth/sign-out", post(sign_out))
        .merge(protected)
        .layer(correlation::propagate_layer())
        .layer(correlation::trace_layer())
        .layer(correlation::set_layer())
        .with_state(state)
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SignUpBody {
    #[validate(email(message = "email must be an email"))]
    email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    password: String,
    #[validate(length(min = 1, message = "firstName should not be empty"))]
    first_name: String,
    #[validate(length(min = 1, message = "lastName should not be empty"))]
    last_name: String,
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Deserialize, Validate)]
struct SignInBody {
    #[validate(email(message = "email must be an email"))]
    email: String,
    #[validate(length(min = 1, message = "password should not be empty"))]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
}

type TokenResponse = (StatusCode, CookieJar, Json<AuthTokens>);

async fn sign_up(
    State(state): State<AuthState>,
    jar: CookieJar,
    ValidJson(body): ValidJson<SignUpBody>,
) -> Result<TokenResponse, ApiError> {
    let tokens = state
        .service()
        .sign_up(SignUp {
            email: body.email,
            password: body.password,
            first_name: body.first_name,
            last_name: body.last_name,
            role: body.role,
        })
        .await?;

    Ok(state.respond_with_tokens(StatusCode::CREATED, jar, tokens))
}

async fn sign_in(
    State(state): State<AuthState>,
    jar: CookieJar,
    ValidJson(body): ValidJson<SignInBody>,
) -> Result<TokenResponse, ApiError> {
    let principal = state
        .service()
        .validate_credentials(&body.email, &body.password)
        .await?;
    let tokens = state.service().sign_in(&principal).await?;

    Ok(state.respond_with_tokens(StatusCode::OK, jar, tokens))
}

async fn refresh(
    State(state): State<AuthState>,
    jar: CookieJar,
    body: Option<Json<RefreshBody>>,
) -> Result<TokenResponse, ApiError> {
    let token = refresh_token_from(&state, &jar, body)?;
    let tokens = state.service().refresh(&token).await?;

    Ok(state.respond_with_tokens(StatusCode::OK, jar, tokens))
}

async fn sign_out(
    State(state): State<AuthState>,
    jar: CookieJar,
    body: Option<Json<RefreshBody>>,
) -> Result<(StatusCode, CookieJar), ApiError> {
    let token = refresh_token_from(&state, &jar, body)?;
    state.service().sign_out(&token).await?;

    Ok((StatusCode::NO_CONTENT, state.cookie_mode().clear_tokens(jar)))
}

async fn me(auth: Authenticated) -> Json<Identity> {
    Json(auth.principal.identity())
}

fn refresh_token_from(
    state: &AuthState,
    jar: &CookieJar,
    body: Option<Json<RefreshBody>>,
) -> Result<RefreshToken, ApiError> {
    body.and_then(|Json(body)| body.refresh_token)
        .filter(|t| !t.as_str().is_empty())
        .or_else(|| state.cookie_mode().refresh_token(jar))
        .ok_or_else(|| ApiError::BadRequest("refreshToken should not be empty".into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use color_eyre::Result;
    use http::{header, Request, Response};
    use serde_json::{json, Value};
    use tollgate::jwt::HmacSecret;
    use tollgate_auth::{
        session::in_memory::InMemorySessionCache, Argon2Verifier, AuthConfig, AuthService,
        FixedWindowRateLimiter, InMemoryPrincipalRepository,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::CookieMode;

    fn app(cookies: CookieMode) -> Router {
        let config = AuthConfig::new(HmacSecret::new(b"router-secret".to_vec()).unwrap());
        let service = AuthService::new(
            Arc::new(InMemoryPrincipalRepository::new()),
            Arc::new(InMemorySessionCache::new()),
            Arc::new(Argon2Verifier::with_cost(8, 1, 1).unwrap()),
            config.codec(),
            &config,
        )
        .with_rate_limiter(Arc::new(FixedWindowRateLimiter::default()));

        router(AuthState::new(Arc::new(service)).with_cookie_mode(cookies))
    }

    async fn post(app: &Router, uri: &str, body: Value) -> Result<Response<Body>> {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?;
        Ok(app.clone().oneshot(req).await?)
    }

    async fn json_body(resp: Response<Body>) -> Result<Value> {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn ada() -> Value {
        json!({
            "email": "a@b.com",
            "password": "Str0ng!Pass",
            "firstName": "Ada",
            "lastName": "Lovelace",
        })
    }

    mod when_signing_up {
        use super::*;

        #[tokio::test]
        async fn returns_created_with_tokens() -> Result<()> {
            let app = app(CookieMode::Disabled);

            let resp = post(&app, "/auth/sign-up", ada()).await?;
            assert_eq!(resp.status(), StatusCode::CREATED);

            let body = json_body(resp).await?;
            for field in ["nonce", "accessToken", "refreshToken"] {
                assert!(
                    !body[field].as_str().unwrap_or_default().is_empty(),
                    "{field} missing"
                );
            }
            Ok(())
        }

        #[tokio::test]
        async fn duplicate_email_conflicts() -> Result<()> {
            let app = app(CookieMode::Disabled);
            post(&app, "/auth/sign-up", ada()).await?;

            let resp = post(&app, "/auth/sign-up", ada()).await?;

            assert_eq!(resp.status(), StatusCode::CONFLICT);
            assert_eq!(
                json_body(resp).await?,
                json!({
                    "statusCode": 409,
                    "message": "Email already exists",
                    "error": "Conflict",
                })
            );
            Ok(())
        }

        #[tokio::test]
        async fn invalid_body_is_a_bad_request() -> Result<()> {
            let app = app(CookieMode::Disabled);

            let resp = post(
                &app,
                "/auth/sign-up",
                json!({ "email": "nope", "password": "short", "firstName": "", "lastName": "L" }),
            )
            .await?;

            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let message = json_body(resp).await?["message"].to_string();
            assert!(message.contains("email must be an email"));
            assert!(message.contains("password must be at least 8 characters"));
            assert!(message.contains("firstName should not be empty"));
            Ok(())
        }
    }

    mod when_signing_in {
        use super::*;

        #[tokio::test]
        async fn returns_tokens_for_valid_credentials() -> Result<()> {
            let app = app(CookieMode::Disabled);
            post(&app, "/auth/sign-up", ada()).await?;

            let resp = post(
                &app,
                "/auth/sign-in",
                json!({ "email": "a@b.com", "password": "Str0ng!Pass" }),
            )
            .await?;

            assert_eq!(resp.status(), StatusCode::OK);
            Ok(())
        }

        #[tokio::test]
        async fn bad_password_is_unauthorized() -> Result<()> {
            let app = app(CookieMode::Disabled);
            post(&app, "/auth/sign-up", ada()).await?;

            let resp = post(
                &app,
                "/auth/sign-in",
                json!({ "email": "a@b.com", "password": "wrong-password" }),
            )
            .await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(json_body(resp).await?["message"], "Invalid credentials");
            Ok(())
        }

        #[tokio::test]
        async fn sixth_attempt_in_a_minute_is_throttled() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let attempt = json!({ "email": "x@y.com", "password": "whatever" });

            for _ in 0..5 {
                let resp = post(&app, "/auth/sign-in", attempt.clone()).await?;
                assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            }

            let resp = post(&app, "/auth/sign-in", attempt).await?;
            assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
            Ok(())
        }
    }

    mod when_refreshing {
        use super::*;

        #[tokio::test]
        async fn refresh_token_is_single_use() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let issued = json_body(post(&app, "/auth/sign-up", ada()).await?).await?;
            let request = json!({ "refreshToken": issued["refreshToken"] });

            let resp = post(&app, "/auth/refresh", request.clone()).await?;
            assert_eq!(resp.status(), StatusCode::OK);
            let rotated = json_body(resp).await?;
            assert_ne!(rotated["nonce"], issued["nonce"]);

            let resp = post(&app, "/auth/refresh", request).await?;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                json_body(resp).await?["message"],
                "Invalid or expired refresh token"
            );
            Ok(())
        }

        #[tokio::test]
        async fn legacy_path_is_an_alias() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let issued = json_body(post(&app, "/auth/sign-up", ada()).await?).await?;

            let resp = post(
                &app,
                "/auth/refresh-token",
                json!({ "refreshToken": issued["refreshToken"] }),
            )
            .await?;

            assert_eq!(resp.status(), StatusCode::OK);
            Ok(())
        }

        #[tokio::test]
        async fn missing_token_is_a_bad_request() -> Result<()> {
            let app = app(CookieMode::Disabled);

            let resp = post(&app, "/auth/refresh", json!({})).await?;

            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            Ok(())
        }
    }

    mod when_signing_out {
        use super::*;

        #[tokio::test]
        async fn consumes_the_refresh_token() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let issued = json_body(post(&app, "/auth/sign-up", ada()).await?).await?;
            let request = json!({ "refreshToken": issued["refreshToken"] });

            let resp = post(&app, "/auth/sign-out", request.clone()).await?;
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);

            let resp = post(&app, "/auth/refresh", request).await?;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            Ok(())
        }
    }

    mod when_calling_a_protected_route {
        use super::*;

        async fn get_me(app: &Router, authorization: Option<String>) -> Result<Response<Body>> {
            let mut req = Request::get("/auth/me");
            if let Some(value) = authorization {
                req = req.header(header::AUTHORIZATION, value);
            }
            Ok(app.clone().oneshot(req.body(Body::empty())?).await?)
        }

        #[tokio::test]
        async fn bearer_access_token_resolves_the_principal() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let issued = json_body(post(&app, "/auth/sign-up", ada()).await?).await?;
            let token = issued["accessToken"].as_str().unwrap_or_default();

            let resp = get_me(&app, Some(format!("Bearer {token}"))).await?;

            assert_eq!(resp.status(), StatusCode::OK);
            let me = json_body(resp).await?;
            assert_eq!(me["email"], "a@b.com");
            assert_eq!(me["role"], "executive");
            assert!(me.get("passwordHash").is_none());
            Ok(())
        }

        #[tokio::test]
        async fn missing_token_is_challenged() -> Result<()> {
            let app = app(CookieMode::Disabled);

            let resp = get_me(&app, None).await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                r#"Bearer error="invalid_token""#
            );
            Ok(())
        }

        #[tokio::test]
        async fn refresh_token_is_not_an_access_token() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let issued = json_body(post(&app, "/auth/sign-up", ada()).await?).await?;
            let token = issued["refreshToken"].as_str().unwrap_or_default();

            let resp = get_me(&app, Some(format!("Bearer {token}"))).await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            Ok(())
        }
    }

    mod when_using_cookies {
        use super::*;

        fn set_cookies(resp: &Response<Body>) -> Vec<String> {
            resp.headers()
                .get_all(header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_owned)
                .collect()
        }

        fn cookie_pair(set_cookie: &str) -> &str {
            set_cookie.split(';').next().unwrap_or_default()
        }

        #[tokio::test]
        async fn token_responses_set_http_only_cookies() -> Result<()> {
            let app = app(CookieMode::Enabled { secure: false });

            let resp = post(&app, "/auth/sign-up", ada()).await?;

            let cookies = set_cookies(&resp);
            let access = cookies
                .iter()
                .find(|c| c.starts_with("access_token="))
                .unwrap();
            assert!(access.contains("HttpOnly"));
            assert!(access.contains("Max-Age=900"));
            assert!(cookies
                .iter()
                .any(|c| c.starts_with("refresh_token=") && c.contains("Max-Age=604800")));
            Ok(())
        }

        #[tokio::test]
        async fn refresh_and_me_accept_cookies() -> Result<()> {
            let app = app(CookieMode::Enabled { secure: false });
            let resp = post(&app, "/auth/sign-up", ada()).await?;
            let cookies = set_cookies(&resp);
            let header_value = cookies
                .iter()
                .map(|c| cookie_pair(c))
                .collect::<Vec<_>>()
                .join("; ");

            let me = Request::get("/auth/me")
                .header(header::COOKIE, &header_value)
                .body(Body::empty())?;
            assert_eq!(app.clone().oneshot(me).await?.status(), StatusCode::OK);

            let refresh = Request::post("/auth/refresh")
                .header(header::COOKIE, &header_value)
                .body(Body::empty())?;
            assert_eq!(app.clone().oneshot(refresh).await?.status(), StatusCode::OK);
            Ok(())
        }

        #[tokio::test]
        async fn cookies_are_ignored_when_disabled() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let issued = json_body(post(&app, "/auth/sign-up", ada()).await?).await?;
            let token = issued["refreshToken"].as_str().unwrap_or_default();

            let refresh = Request::post("/auth/refresh")
                .header(header::COOKIE, format!("refresh_token={token}"))
                .body(Body::empty())?;

            assert_eq!(
                app.clone().oneshot(refresh).await?.status(),
                StatusCode::BAD_REQUEST
            );
            Ok(())
        }
    }

    mod when_correlating_requests {
        use super::*;

        #[tokio::test]
        async fn supplied_correlation_id_is_echoed() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let req = Request::get("/auth/me")
                .header("x-correlation-id", "corr-1")
                .body(Body::empty())?;

            let resp = app.oneshot(req).await?;

            assert_eq!(resp.headers().get("x-correlation-id").unwrap(), "corr-1");
            Ok(())
        }

        #[tokio::test]
        async fn request_id_is_used_as_a_fallback() -> Result<()> {
            let app = app(CookieMode::Disabled);
            let req = Request::get("/auth/me")
                .header("x-request-id", "req-7")
                .body(Body::empty())?;

            let resp = app.oneshot(req).await?;

            assert_eq!(resp.headers().get("x-correlation-id").unwrap(), "req-7");
            Ok(())
        }

        #[tokio::test]
        async fn an_id_is_generated_otherwise() -> Result<()> {
            let app = app(CookieMode::Disabled);

            let resp = post(&app, "/auth/sign-in", json!({})).await?;

            assert!(resp.headers().get("x-correlation-id").is_some());
            Ok(())
        }
    }
}
