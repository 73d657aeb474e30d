//! Cross-origin support with wildcard origin patterns.
//!
//! Each allowed origin may contain `*`, which matches any run of characters:
//! `http://localhost:*` admits every local port and `http://*.server.com`
//! every subdomain. A lone `*` admits everything.

use axum::http::{HeaderName, HeaderValue, Method};
use regex::Regex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, warn};

use crate::config::CorsConfig;

/// Compiled origin patterns.
#[derive(Debug, Clone)]
pub struct OriginMatcher {
    patterns: Vec<Regex>,
}

impl OriginMatcher {
    pub fn new<S: AsRef<str>>(origins: &[S]) -> Self {
        let patterns = origins
            .iter()
            .filter_map(|origin| {
                let source = format!(
                    "^{}$",
                    regex::escape(origin.as_ref()).replace(r"\*", ".*")
                );
                Regex::new(&source)
                    .map_err(|e| warn!(origin = origin.as_ref(), %e, "ignoring bad CORS origin"))
                    .ok()
            })
            .collect();
        Self { patterns }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(origin))
    }
}

/// Comma-join a list the way it appears in an `Access-Control-Allow-*` header.
fn header_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the layer, or `None` when no origins are configured.
pub fn layer(cfg: &CorsConfig) -> Option<CorsLayer> {
    if cfg.allow_origins.is_empty() {
        return None;
    }
    let matcher = OriginMatcher::new(&cfg.allow_origins);
    let methods: Vec<Method> = cfg
        .allow_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = cfg
        .allow_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();
    debug!(
        origins = %header_list(&cfg.allow_origins),
        methods = %header_list(&cfg.allow_methods),
        headers = %header_list(&cfg.allow_headers),
        "CORS enabled"
    );

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _| {
                    origin.to_str().is_ok_and(|o| matcher.is_allowed(o))
                },
            ))
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true),
    )
}
