use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use omnidb_dispatch::DispatcherConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment overrides, e.g. `OMNIDB_DISPATCH__DISPATCHER__BASE_URL`.
pub const ENV_PREFIX: &str = "OMNIDB_DISPATCH__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Filter used when neither `RUST_LOG` nor `-v` is given
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Layered config: defaults -> YAML (if provided) -> env (`OMNIDB_DISPATCH__*`).
    ///
    /// # Errors
    /// Returns an error if the file is missing or any layer does not match
    /// the configuration schema
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use omnidb_dispatch::TransportSecurity;
    use std::io::Write;
    use std::time::Duration;

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.dispatcher, DispatcherConfig::default());
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let file = yaml_file(
            r"
dispatcher:
  base_url: http://localhost:8000/omnidb/
  transport: allow_insecure_http
  request_timeout: 30s
  fade: 0ms
logging:
  json: true
",
        );

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.dispatcher.base_url, "http://localhost:8000/omnidb/");
        assert_eq!(
            config.dispatcher.transport,
            TransportSecurity::AllowInsecureHttp
        );
        assert_eq!(
            config.dispatcher.request_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.dispatcher.fade, Duration::ZERO);
        assert_eq!(config.dispatcher.csrf_cookie_name, "omnidb_csrftoken");
        assert!(config.logging.json);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let file = yaml_file("dispatcher:\n  base_uri: http://localhost/\n");
        assert!(AppConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/omnidb.yaml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
