use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default User-Agent string for dispatched requests
pub const DEFAULT_USER_AGENT: &str = concat!("omnidb-dispatch/", env!("CARGO_PKG_VERSION"));

/// Cookie the CSRF token is read from
pub const DEFAULT_CSRF_COOKIE: &str = "omnidb_csrftoken";

/// Header the CSRF token is sent in (display form)
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRFToken";

/// Fade duration of the loading indicator
pub const DEFAULT_FADE: Duration = Duration::from_millis(100);

/// Default response body cap (10 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Which URL schemes the transport accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportSecurity {
    /// Only `https://` targets are accepted
    #[default]
    TlsOnly,
    /// Plain `http://` targets are accepted too (local installs, mock servers)
    AllowInsecureHttp,
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DispatcherConfig {
    /// Prefix every call URL is appended to, verbatim. Must be `https://`
    /// unless `transport` is `allow_insecure_http`.
    /// Default: `https://127.0.0.1:8000/`
    pub base_url: String,

    /// Origin the UI was served from. Requests to any other origin are
    /// cross-domain: they carry neither the CSRF header nor cookies.
    /// Default: the origin of `base_url`
    pub page_origin: Option<String>,

    /// Default: `omnidb_csrftoken`
    pub csrf_cookie_name: String,

    /// Default: `X-CSRFToken`
    pub csrf_header_name: String,

    /// Loading indicator fade in/out duration. Default: `100ms`
    #[serde(with = "humantime_serde")]
    pub fade: Duration,

    /// Optional per-call timeout. Default: none, calls only end by
    /// completion or cancellation.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    pub user_agent: String,

    /// Maximum response body size in bytes. Default: 10 MiB
    pub max_body_size: usize,

    pub transport: TransportSecurity,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1:8000/".to_owned(),
            page_origin: None,
            csrf_cookie_name: DEFAULT_CSRF_COOKIE.to_owned(),
            csrf_header_name: DEFAULT_CSRF_HEADER.to_owned(),
            fade: DEFAULT_FADE,
            request_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            transport: TransportSecurity::TlsOnly,
        }
    }
}

impl DispatcherConfig {
    /// Configuration for a local instance reachable over plain HTTP
    #[must_use]
    pub fn local(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            transport: TransportSecurity::AllowInsecureHttp,
            ..Default::default()
        }
    }

    /// Origin used for the cross-domain check.
    ///
    /// # Errors
    /// Returns `DispatchError::InvalidUrl` if `page_origin` (or, when unset,
    /// `base_url`) cannot be parsed.
    pub fn resolved_page_origin(&self) -> Result<url::Origin, DispatchError> {
        let raw = self.page_origin.as_deref().unwrap_or(&self.base_url);
        parse_url(raw).map(|u| u.origin())
    }

    /// Check that URLs and header names are usable.
    ///
    /// # Errors
    /// Returns the first problem found: an unparsable URL, a base URL scheme
    /// the transport does not allow, an invalid header name or user agent, or
    /// a zero body size limit.
    pub fn validate(&self) -> Result<(), DispatchError> {
        check_scheme(&parse_url(&self.base_url)?, self.transport)?;
        self.resolved_page_origin()?;
        http::header::HeaderName::try_from(self.csrf_header_name.as_str())?;
        http::header::HeaderValue::try_from(self.user_agent.as_str())?;
        if self.max_body_size == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_body_size must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn parse_url(raw: &str) -> Result<url::Url, DispatchError> {
    url::Url::parse(raw).map_err(|e| DispatchError::InvalidUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })
}

/// Reject targets the transport security mode does not allow.
pub(crate) fn check_scheme(
    target: &url::Url,
    security: TransportSecurity,
) -> Result<(), DispatchError> {
    match (target.scheme(), security) {
        ("https", _) | ("http", TransportSecurity::AllowInsecureHttp) => Ok(()),
        (scheme, _) => Err(DispatchError::InsecureScheme {
            scheme: scheme.to_owned(),
        }),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.csrf_cookie_name, "omnidb_csrftoken");
        assert_eq!(cfg.csrf_header_name, "X-CSRFToken");
        assert_eq!(cfg.fade, Duration::from_millis(100));
        assert!(cfg.request_timeout.is_none());
        assert_eq!(cfg.transport, TransportSecurity::TlsOnly);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_checks_base_url_scheme() {
        let plain = DispatcherConfig {
            base_url: "http://127.0.0.1:8000/".to_owned(),
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            plain.validate(),
            Err(DispatchError::InsecureScheme { ref scheme }) if scheme == "http"
        ));

        assert!(DispatcherConfig::local("http://127.0.0.1:8000/").validate().is_ok());

        let ftp = DispatcherConfig::local("ftp://127.0.0.1/");
        assert!(matches!(
            ftp.validate(),
            Err(DispatchError::InsecureScheme { .. })
        ));
    }

    #[test]
    fn test_page_origin_defaults_to_base_url() {
        let cfg = DispatcherConfig::local("http://localhost:8000/omnidb/");
        let origin = cfg.resolved_page_origin().unwrap();
        assert_eq!(origin.ascii_serialization(), "http://localhost:8000");
    }

    #[test]
    fn test_explicit_page_origin() {
        let cfg = DispatcherConfig {
            page_origin: Some("https://ui.example.com".to_owned()),
            ..DispatcherConfig::default()
        };
        let origin = cfg.resolved_page_origin().unwrap();
        assert_eq!(origin.ascii_serialization(), "https://ui.example.com");
    }

    #[test]
    fn test_deserialize_humantime_and_snake_case() {
        let cfg: DispatcherConfig = serde_json::from_value(serde_json::json!({
            "base_url": "http://db-admin:8000/",
            "fade": "250ms",
            "request_timeout": "30s",
            "transport": "allow_insecure_http"
        }))
        .unwrap();

        assert_eq!(cfg.fade, Duration::from_millis(250));
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(cfg.csrf_cookie_name, DEFAULT_CSRF_COOKIE);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_json::from_value::<DispatcherConfig>(serde_json::json!({
            "base_path": "http://x/"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = DispatcherConfig {
            base_url: "not a url".to_owned(),
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(DispatchError::InvalidUrl { .. })
        ));

        let cfg = DispatcherConfig {
            csrf_header_name: "bad header".to_owned(),
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(DispatchError::InvalidHeaderName(_))
        ));
    }
}
