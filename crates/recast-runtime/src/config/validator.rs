//! Semantic validation for parsed transform configuration values.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use crate::config::types::TransformConfig;

/// Validate a parsed transform configuration against the deploy-time env
/// overrides. Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &TransformConfig, overrides: &HashMap<String, String>) -> Result<()> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push("Transform name must not be empty".to_string());
    }

    if config.input_topic.trim().is_empty() {
        errors.push("input_topic must not be empty".to_string());
    }

    if config.output_topics.is_empty() {
        errors.push("output_topics must list at least one topic".to_string());
    }

    let mut seen = HashSet::new();
    for (i, topic) in config.output_topics.iter().enumerate() {
        if topic.trim().is_empty() {
            errors.push(format!("output_topics[{i}] is empty"));
        } else if !seen.insert(topic.as_str()) {
            errors.push(format!("Output topic '{topic}' is listed more than once"));
        }
    }

    if config.limits.max_output_bytes == 0 {
        errors.push("limits.max_output_bytes must be > 0".to_string());
    }
    if config.limits.max_output_records == 0 {
        errors.push("limits.max_output_records must be > 0".to_string());
    }
    if config.limits.timeout_ms == Some(0) {
        errors.push("limits.timeout_ms must be > 0".to_string());
    }
    if config.limits.max_memory_bytes == Some(0) {
        errors.push("limits.max_memory_bytes must be > 0".to_string());
    }
    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }

    if let Some(checksum) = &config.checksum {
        let checksum = checksum.trim();
        if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            errors.push(format!(
                "checksum '{checksum}' is not a hex-encoded SHA-256 digest"
            ));
        }
    }

    for key in config.missing_env(overrides) {
        errors.push(format!(
            "env '{key}' is required; supply it with --env {key}=VALUE"
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Transform validation failed:\n  - {}", errors.join("\n  - "));
    }
}
