//! URL rewriting and target resolution.
//!
//! Rules run against the URL exactly as carried in the request envelope
//! (usually path + query). The first matching pattern wins and later
//! rules never see its output. A result that is still relative resolves
//! against the configured default target.

use regex::Regex;
use tracing::trace;
use url::Url;

use burrow_config::ProxyConfig;

use crate::errors::AgentError;

/// Compiled rewrite rules plus the base URL for relative requests.
#[derive(Debug)]
pub struct RewriteEngine {
    rules: Vec<(Regex, String)>,
    default_target: Url,
}

impl RewriteEngine {
    /// Compile the configured rules. Invalid patterns and a non-URL
    /// default target are startup-fatal.
    pub fn new(proxy: &ProxyConfig) -> Result<Self, AgentError> {
        let default_target =
            Url::parse(&proxy.default_target).map_err(|source| AgentError::InvalidUrl {
                url: proxy.default_target.clone(),
                source,
            })?;

        let rules = proxy
            .rewrite_rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.replacement.clone()))
                    .map_err(|source| AgentError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            default_target,
        })
    }

    /// Rewrite `raw` and resolve it to an absolute target URL.
    pub fn resolve(&self, raw: &str) -> Result<Url, AgentError> {
        let rewritten = self.apply_rules(raw);

        let target = if rewritten.starts_with("http://") || rewritten.starts_with("https://") {
            Url::parse(&rewritten)
        } else {
            self.default_target.join(&rewritten)
        };

        target.map_err(|source| AgentError::InvalidUrl {
            url: rewritten,
            source,
        })
    }

    /// First matching rule replaces the URL; later rules do not apply.
    fn apply_rules(&self, raw: &str) -> String {
        for (pattern, replacement) in &self.rules {
            if pattern.is_match(raw) {
                let rewritten = pattern.replace(raw, replacement.as_str()).into_owned();
                trace!(from = raw, to = %rewritten, pattern = %pattern, "rewrite rule applied");
                return rewritten;
            }
        }
        raw.to_string()
    }
}
