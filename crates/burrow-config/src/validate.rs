//! Configuration validation.
//!
//! Startup-fatal checks: malformed values detected here terminate the
//! process with a nonzero exit instead of failing at first use.

use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::{Config, ServerTlsConfig};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Check cross-field constraints after parsing.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        validate_tls(&self.server.http.ssl, "server.http.ssl")?;
        validate_tls(&self.server.socket.ssl, "server.socket.ssl")?;

        let target = &self.client.proxy.default_target;
        match Url::parse(target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::Invalid(format!(
                    "client.proxy.default_target must be http or https, got scheme '{}'",
                    url.scheme()
                )));
            }
            Err(e) => {
                return Err(ConfigError::Invalid(format!(
                    "client.proxy.default_target '{target}' is not an absolute URL: {e}"
                )));
            }
        }

        for rule in &self.client.proxy.rewrite_rules {
            Regex::new(&rule.pattern).map_err(|e| {
                ConfigError::Invalid(format!(
                    "rewrite pattern '{}' is not a valid regex: {e}",
                    rule.pattern
                ))
            })?;
        }

        if self.limits.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_frame_bytes must be nonzero".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_tls(tls: &ServerTlsConfig, section: &str) -> Result<(), ConfigError> {
    if tls.enabled {
        if tls.key.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{section}.enabled requires {section}.key"
            )));
        }
        if tls.cert.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{section}.enabled requires {section}.cert"
            )));
        }
    }
    Ok(())
}
