//! Host configuration.
//!
//! Values come from the process environment (after `.env` has been loaded by
//! the binary). Each setting has a `SNAPSOLVE_*` name and, where one existed,
//! a legacy fallback name. Placeholder values count as missing.

use std::time::Duration;

use reqwest::Url;
use snapsolve_providers::{is_placeholder_value, OpenAIConfig, S3Config};

use crate::error::ConfigError;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(2000);
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub endpoint_url: Option<String>,
    pub shared_secret: Option<String>,
    /// Used when a `processS3Image` message carries no `s3Bucket`.
    pub default_bucket: Option<String>,
    pub openai: OpenAIConfig,
    pub s3: S3Config,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Unset means tasks run to completion.
    pub task_timeout: Option<Duration>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            shared_secret: None,
            default_bucket: None,
            openai: OpenAIConfig::default(),
            s3: S3Config::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            task_timeout: None,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|name| std::env::var(name).ok())?;
        config.s3 = S3Config::from_env();
        Ok(config)
    }

    /// Builds the config from an arbitrary variable source. Only malformed
    /// numeric values are errors here; absence is reported by [`validate`].
    ///
    /// [`validate`]: HostConfig::validate
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !is_placeholder_value(v))
        };
        let either = |primary: &str, legacy: &str| get(primary).or_else(|| get(legacy));

        let ping_interval =
            parse_secs("SNAPSOLVE_PING_INTERVAL_SECS", get("SNAPSOLVE_PING_INTERVAL_SECS"))?
                .unwrap_or(DEFAULT_PING_INTERVAL);
        let ping_timeout =
            parse_secs("SNAPSOLVE_PING_TIMEOUT_SECS", get("SNAPSOLVE_PING_TIMEOUT_SECS"))?
                .unwrap_or(DEFAULT_PING_TIMEOUT);
        let shutdown_grace = match get("SNAPSOLVE_SHUTDOWN_GRACE_MS") {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| ConfigError::Invalid {
                name: "SNAPSOLVE_SHUTDOWN_GRACE_MS",
                reason: format!("`{raw}` is not a whole number of milliseconds"),
            })?),
            None => DEFAULT_SHUTDOWN_GRACE,
        };
        let task_timeout =
            parse_secs("SNAPSOLVE_TASK_TIMEOUT_SECS", get("SNAPSOLVE_TASK_TIMEOUT_SECS"))?;

        Ok(Self {
            endpoint_url: either("SNAPSOLVE_WSS_URL", "WSS_URL"),
            shared_secret: either("SNAPSOLVE_SHARED_SECRET", "WEBSOCKET_SHARED_SECRET"),
            default_bucket: either("SNAPSOLVE_S3_BUCKET", "S3_BUCKET_NAME"),
            openai: OpenAIConfig {
                api_key: get("OPENAI_API_KEY"),
                base_url: get("SNAPSOLVE_OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                model: either("SNAPSOLVE_MODEL", "OPENAI_MODEL")
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            },
            s3: S3Config::default(),
            ping_interval,
            ping_timeout,
            shutdown_grace,
            task_timeout,
        })
    }

    /// Checks everything `open()` needs. Reports every missing field at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.endpoint_url.is_none() {
            missing.push("SNAPSOLVE_WSS_URL");
        }
        if self.shared_secret.is_none() {
            missing.push("SNAPSOLVE_SHARED_SECRET");
        }
        if self.default_bucket.is_none() {
            missing.push("SNAPSOLVE_S3_BUCKET");
        }
        if self.openai.api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "SNAPSOLVE_PING_INTERVAL_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.connect_url().map(|_| ())
    }

    /// Endpoint with the shared secret appended as the `auth` query parameter.
    pub fn connect_url(&self) -> Result<Url, ConfigError> {
        let endpoint = self
            .endpoint_url
            .as_deref()
            .ok_or(ConfigError::Missing(vec!["SNAPSOLVE_WSS_URL"]))?;
        let secret = self
            .shared_secret
            .as_deref()
            .ok_or(ConfigError::Missing(vec!["SNAPSOLVE_SHARED_SECRET"]))?;
        let mut url = Url::parse(endpoint).map_err(|e| ConfigError::Invalid {
            name: "SNAPSOLVE_WSS_URL",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid {
                name: "SNAPSOLVE_WSS_URL",
                reason: format!("scheme `{}` is not ws or wss", url.scheme()),
            });
        }
        url.query_pairs_mut().append_pair("auth", secret);
        Ok(url)
    }

    pub fn is_ready(&self) -> bool {
        self.validate().is_ok()
    }
}

fn parse_secs(name: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::Invalid {
                name,
                reason: format!("`{raw}` is not a whole number of seconds"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SNAPSOLVE_WSS_URL", "wss://example.test/prod"),
            ("SNAPSOLVE_SHARED_SECRET", "s3cret"),
            ("SNAPSOLVE_S3_BUCKET", "exam-bucket"),
            ("OPENAI_API_KEY", "sk-test"),
        ]
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = HostConfig::from_lookup(lookup(&complete())).unwrap();
        assert_eq!(config.ping_interval, Duration::from_secs(60));
        assert_eq!(config.ping_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_grace, Duration::from_millis(2000));
        assert_eq!(config.task_timeout, None);
        assert_eq!(config.openai.model, "gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn legacy_names_are_honoured() {
        let config = HostConfig::from_lookup(lookup(&[
            ("WSS_URL", "wss://legacy.test"),
            ("WEBSOCKET_SHARED_SECRET", "abc"),
            ("S3_BUCKET_NAME", "legacy-bucket"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();
        assert_eq!(config.default_bucket.as_deref(), Some("legacy-bucket"));
        assert_eq!(config.openai.model, "gpt-4o-mini");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_reports_all_missing_fields() {
        let config = HostConfig::from_lookup(lookup(&[
            ("SNAPSOLVE_WSS_URL", "YOUR_WEBSOCKET_API_ENDPOINT_HERE"),
            ("SNAPSOLVE_SHARED_SECRET", "YourSuperSecretValueHere123!@#"),
        ]))
        .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::Missing(vec![
                "SNAPSOLVE_WSS_URL",
                "SNAPSOLVE_SHARED_SECRET",
                "SNAPSOLVE_S3_BUCKET",
                "OPENAI_API_KEY",
            ]))
        );
        assert!(!config.is_ready());
    }

    #[test]
    fn connect_url_carries_auth_parameter() {
        let config = HostConfig::from_lookup(lookup(&complete())).unwrap();
        let url = config.connect_url().unwrap();
        assert_eq!(url.as_str(), "wss://example.test/prod?auth=s3cret");
    }

    #[test]
    fn non_websocket_scheme_is_rejected() {
        let mut pairs = complete();
        pairs[0] = ("SNAPSOLVE_WSS_URL", "https://example.test");
        let config = HostConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "SNAPSOLVE_WSS_URL", .. })
        ));
    }

    #[test]
    fn malformed_numbers_fail_loading() {
        let mut pairs = complete();
        pairs.push(("SNAPSOLVE_PING_INTERVAL_SECS", "soon"));
        assert!(HostConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = complete();
        pairs.push(("SNAPSOLVE_TASK_TIMEOUT_SECS", "45"));
        let config = HostConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.task_timeout, Some(Duration::from_secs(45)));
    }
}
