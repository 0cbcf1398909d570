use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use thiserror::Error;

use crate::destination::DestinationCoordinates;
use crate::remote::RetryPolicy;

pub const KEY_OUTPUT_ID: &str = "OutputID";
pub const KEY_PROJECT_ID: &str = "ProjectID";
pub const KEY_DATASET_ID: &str = "DatasetID";
pub const KEY_TABLE_ID: &str = "TableID";
pub const KEY_MAX_RETRIES: &str = "MaxRetries";
pub const KEY_ENABLE_RETRIES: &str = "EnableRetries";

pub const DEFAULT_ENDPOINT: &str = "https://bigquerystorage.googleapis.com";
pub const ENV_ENDPOINT: &str = "WRITEAPI_ENDPOINT";
pub const ENV_ACCESS_TOKEN: &str = "WRITEAPI_ACCESS_TOKEN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required key '{0}'")]
    Missing(&'static str),
    #[error("key '{0}' is empty")]
    Empty(&'static str),
    #[error("key '{key}' is not a number: '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("key '{key}' is not a boolean: '{value}'")]
    InvalidBool { key: &'static str, value: String },
}

/// Host-provided per-instance configuration. Key lookup ignores case.
pub trait ConfigLookup {
    fn lookup(&self, key: &str) -> Option<String>;
}

impl ConfigLookup for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    }
}

impl ConfigLookup for BTreeMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    }
}

/// Options applied when a session opens its append handle.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Retry transient append failures at the transport level.
    pub write_retries: bool,
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            write_retries: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// One output instance as configured by the host at Init.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub coordinates: DestinationCoordinates,
    pub options: SessionOptions,
}

impl InstanceConfig {
    pub fn from_lookup(config: &impl ConfigLookup, defaults: &SessionOptions) -> Result<Self, ConfigError> {
        let instance_id = required(config, KEY_OUTPUT_ID)?;
        let coordinates = DestinationCoordinates::new(
            required(config, KEY_PROJECT_ID)?,
            required(config, KEY_DATASET_ID)?,
            required(config, KEY_TABLE_ID)?,
        );

        let mut options = defaults.clone();
        if let Some(raw) = optional(config, KEY_ENABLE_RETRIES) {
            options.write_retries = parse_bool(KEY_ENABLE_RETRIES, &raw)?;
        }
        if let Some(raw) = optional(config, KEY_MAX_RETRIES) {
            let max_retries = raw.parse::<usize>().map_err(|_| ConfigError::InvalidNumber {
                key: KEY_MAX_RETRIES,
                value: raw.clone(),
            })?;
            options.retry.max_retries = max_retries;
        }

        Ok(Self {
            instance_id,
            coordinates,
            options,
        })
    }
}

fn optional(config: &impl ConfigLookup, key: &'static str) -> Option<String> {
    config
        .lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(config: &impl ConfigLookup, key: &'static str) -> Result<String, ConfigError> {
    let value = config.lookup(key).ok_or(ConfigError::Missing(key))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Empty(key));
    }
    Ok(value.to_string())
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: raw.to_string(),
        }),
    }
}

/// Process-level output settings shared by every instance.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Base URL of the write service.
    pub endpoint: String,
    /// Bearer token sent with every request, when set.
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    /// Defaults for instances that do not override retry behaviour.
    pub session: SessionOptions,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            access_token: None,
            request_timeout: Duration::from_secs(30),
            session: SessionOptions::default(),
        }
    }
}

impl OutputSettings {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: vars(ENV_ENDPOINT)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.endpoint),
            access_token: vars(ENV_ACCESS_TOKEN).filter(|v| !v.trim().is_empty()),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reads_instance_keys_case_insensitively() {
        let cfg = config(&[
            ("outputid", "a"),
            ("PROJECTID", "p"),
            ("DatasetID", "d"),
            ("tableid", "t"),
        ]);
        let instance = InstanceConfig::from_lookup(&cfg, &SessionOptions::default()).unwrap();
        assert_eq!(instance.instance_id, "a");
        assert_eq!(instance.coordinates, DestinationCoordinates::new("p", "d", "t"));
        assert!(instance.options.write_retries);
    }

    #[test]
    fn missing_and_empty_keys_are_rejected() {
        let cfg = config(&[("OutputID", "a"), ("ProjectID", "p"), ("DatasetID", "d")]);
        assert_eq!(
            InstanceConfig::from_lookup(&cfg, &SessionOptions::default()).unwrap_err(),
            ConfigError::Missing(KEY_TABLE_ID)
        );

        let cfg = config(&[
            ("OutputID", "a"),
            ("ProjectID", "p"),
            ("DatasetID", "  "),
            ("TableID", "t"),
        ]);
        assert_eq!(
            InstanceConfig::from_lookup(&cfg, &SessionOptions::default()).unwrap_err(),
            ConfigError::Empty(KEY_DATASET_ID)
        );
    }

    #[test]
    fn retry_overrides() {
        let cfg = config(&[
            ("OutputID", "a"),
            ("ProjectID", "p"),
            ("DatasetID", "d"),
            ("TableID", "t"),
            ("EnableRetries", "off"),
            ("MaxRetries", "9"),
        ]);
        let instance = InstanceConfig::from_lookup(&cfg, &SessionOptions::default()).unwrap();
        assert!(!instance.options.write_retries);
        assert_eq!(instance.options.retry.max_retries, 9);

        let cfg = config(&[
            ("OutputID", "a"),
            ("ProjectID", "p"),
            ("DatasetID", "d"),
            ("TableID", "t"),
            ("MaxRetries", "many"),
        ]);
        assert!(matches!(
            InstanceConfig::from_lookup(&cfg, &SessionOptions::default()),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn settings_from_vars() {
        let settings = OutputSettings::from_vars(|key| match key {
            ENV_ENDPOINT => Some("http://localhost:9050".into()),
            ENV_ACCESS_TOKEN => Some(String::new()),
            _ => None,
        });
        assert_eq!(settings.endpoint, "http://localhost:9050");
        assert_eq!(settings.access_token, None);

        let settings = OutputSettings::from_vars(|_| None);
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
    }
}
