//! CSRF helpers.

/// Methods the server does not require a CSRF token for.
///
/// The match is exact and case-sensitive: `GET`, `HEAD`, `OPTIONS`, `TRACE`.
#[must_use]
pub fn csrf_safe_method(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "OPTIONS" | "TRACE")
}

/// Same-origin check (scheme, host and port) against the page origin.
///
/// Opaque origins never match, not even themselves.
#[must_use]
pub fn is_same_origin(target: &url::Url, page_origin: &url::Origin) -> bool {
    let origin = target.origin();
    origin.is_tuple() && &origin == page_origin
}

/// Whether a request should carry the CSRF header.
#[must_use]
pub fn needs_csrf_header(method: &http::Method, target: &url::Url, page_origin: &url::Origin) -> bool {
    !csrf_safe_method(method.as_str()) && is_same_origin(target, page_origin)
}
