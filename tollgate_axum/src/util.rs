//! Utilities for generating HTTP responses on authentication failures

use http::{header, HeaderValue, Response, StatusCode};

/// Build a `401 Unauthorized` response with the appropriate `www-authenticate`
/// header
///
/// The description provided will be automatically escaped to make sure it
/// is header-friendly.
///
/// The prepared response will have the form:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="invalid_token" error_description="{description}"
/// ```
///
/// `error_description` is omitted if `description` is empty.
pub fn unauthorized<Body: Default>(description: &str) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut()
        .insert(header::WWW_AUTHENTICATE, invalid_token(description));
    resp
}

fn invalid_token(description: &str) -> HeaderValue {
    const TERSE: HeaderValue = HeaderValue::from_static(r#"Bearer error="invalid_token""#);

    if description.is_empty() {
        return TERSE;
    }

    HeaderValue::try_from(format!(
        r#"Bearer error="invalid_token" error_description="{}""#,
        description.escape_default()
    ))
    .unwrap_or(TERSE)
}
