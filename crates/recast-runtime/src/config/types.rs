use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use recast_types::EmissionLimits;
use serde::{Deserialize, Serialize};

use crate::bridge::GuestSettings;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::runner::RunnerOptions;

/// Env value marking an entry that must be supplied at deploy time.
pub const REQUIRED_PLACEHOLDER: &str = "<required>";

/// A `transform.yaml` descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_topic: String,
    pub output_topics: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Expected SHA-256 of the compiled module, hex encoded.
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_max_output_records")]
    pub max_output_records: usize,
    pub timeout_ms: Option<u64>,
    pub max_memory_bytes: Option<u64>,
}

fn default_max_output_bytes() -> usize {
    EmissionLimits::DEFAULT_MAX_BYTES
}
fn default_max_output_records() -> usize {
    EmissionLimits::DEFAULT_MAX_RECORDS
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: default_max_output_bytes(),
            max_output_records: default_max_output_records(),
            timeout_ms: None,
            max_memory_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl TransformConfig {
    /// `<required>` env keys not covered by `overrides`, in key order.
    pub fn missing_env(&self, overrides: &HashMap<String, String>) -> Vec<String> {
        self.env
            .iter()
            .filter(|(key, value)| value.as_str() == REQUIRED_PLACEHOLDER && !overrides.contains_key(*key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// The guest environment: configured entries with `overrides` applied.
    ///
    /// # Errors
    ///
    /// Returns an error naming every `<required>` key left unset.
    pub fn resolved_env(&self, overrides: &HashMap<String, String>) -> Result<HashMap<String, String>> {
        let missing = self.missing_env(overrides);
        if !missing.is_empty() {
            bail!(
                "Missing required env value(s): {} (supply with --env KEY=VALUE)",
                missing.join(", ")
            );
        }
        let mut env: HashMap<String, String> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(env)
    }

    pub fn emission_limits(&self) -> EmissionLimits {
        EmissionLimits {
            max_bytes: self.limits.max_output_bytes,
            max_records: self.limits.max_output_records,
        }
    }

    /// Settings for instantiating this transform's guest.
    ///
    /// # Errors
    ///
    /// Returns an error if required env values are missing.
    pub fn guest_settings(&self, overrides: &HashMap<String, String>) -> Result<GuestSettings> {
        let mut settings = GuestSettings::new(self.name.clone())
            .output_topics(self.output_topics.iter().cloned())
            .emission(self.emission_limits())
            .timeout_ms(self.limits.timeout_ms)
            .max_memory_bytes(self.limits.max_memory_bytes);
        settings.env = self.resolved_env(overrides)?;
        Ok(settings)
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions::default()
            .retry(RetryPolicy {
                max_attempts: self.retry.max_attempts.max(1),
                backoff: true,
            })
            .timeout_ms(self.limits.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransformConfig {
        serde_yaml::from_str(
            r#"
name: double
input_topic: numbers
output_topics: [out]
env:
  SCALE: "2"
  API_KEY: <required>
"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_apply() {
        let c = config();
        assert!(c.description.is_none());
        assert_eq!(c.limits.max_output_bytes, EmissionLimits::DEFAULT_MAX_BYTES);
        assert_eq!(c.limits.max_output_records, EmissionLimits::DEFAULT_MAX_RECORDS);
        assert_eq!(c.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(c.limits.timeout_ms.is_none());
    }

    #[test]
    fn required_env_must_be_supplied() {
        let c = config();
        assert_eq!(c.missing_env(&HashMap::new()), vec!["API_KEY".to_string()]);
        let err = c.resolved_env(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("API_KEY"));

        let overrides = HashMap::from([
            ("API_KEY".to_string(), "secret".to_string()),
            ("SCALE".to_string(), "3".to_string()),
        ]);
        let env = c.resolved_env(&overrides).unwrap();
        assert_eq!(env["API_KEY"], "secret");
        assert_eq!(env["SCALE"], "3");
    }

    #[test]
    fn guest_settings_carry_limits() {
        let mut c = config();
        c.limits.max_output_records = 4;
        c.limits.timeout_ms = Some(250);
        let overrides = HashMap::from([("API_KEY".to_string(), "k".to_string())]);
        let settings = c.guest_settings(&overrides).unwrap();
        assert_eq!(settings.output_topics, vec!["out".to_string()]);
        assert_eq!(settings.emission.max_records, 4);
        assert_eq!(settings.timeout_ms, Some(250));
        assert_eq!(settings.guest_env()[EmissionLimits::MAX_RECORDS_ENV], "4");
        assert_eq!(c.runner_options().timeout_ms, Some(250));
    }
}
