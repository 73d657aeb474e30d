//! HTTP basic authentication.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub const REALM: &str = r#"Basic realm="Authorization Required""#;

/// The exact `Authorization` header value a client must send.
#[derive(Clone)]
pub struct BasicAuth {
    expected: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            expected: format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))),
        }
    }

    pub fn accepts(&self, header: Option<&HeaderValue>) -> bool {
        header.is_some_and(|value| constant_time_eq(value.as_bytes(), self.expected.as_bytes()))
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BasicAuth(<redacted>)")
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn require_basic_auth(
    State(auth): State<BasicAuth>,
    request: Request,
    next: Next,
) -> Response {
    if auth.accepts(request.headers().get(header::AUTHORIZATION)) {
        return next.run(request).await;
    }
    tracing::debug!(uri = %request.uri(), "rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, REALM)],
        "Not Authorized",
    )
        .into_response()
}

/// Length leaks; contents do not.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_the_exact_credentials() {
        let auth = BasicAuth::new("admin", "password");
        let good = HeaderValue::from_static("Basic YWRtaW46cGFzc3dvcmQ=");
        let bad = HeaderValue::from_static("Basic YWRtaW46d3Jvbmc=");

        assert!(auth.accepts(Some(&good)));
        assert!(!auth.accepts(Some(&bad)));
        assert!(!auth.accepts(None));
    }

    #[test]
    fn comparison_handles_length_mismatch() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn debug_hides_the_secret() {
        let auth = BasicAuth::new("admin", "password");
        assert!(!format!("{auth:?}").contains("YWRtaW4"));
    }
}
