//! Transform YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::TransformConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with values from `lookup`.
///
/// # Errors
///
/// Returns an error listing every referenced variable `lookup` cannot resolve.
pub fn substitute_vars_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut missing: Vec<String> = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        let var_name = &caps[1];
        lookup(var_name).unwrap_or_else(|| {
            if !missing.iter().any(|m| m == var_name) {
                missing.push(var_name.to_string());
            }
            String::new()
        })
    });
    let result = result.into_owned();

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result)
}

/// Substitute `${VAR_NAME}` patterns with process environment values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    substitute_vars_with(input, |name| std::env::var(name).ok())
}

/// Parse a transform YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<TransformConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: TransformConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse transform YAML")?;
    Ok(config)
}

/// Parse a transform YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<TransformConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transform file: {}", path.display()))?;
    parse_config_str(&content)
}
