pub mod check;
pub mod run;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use recast_runtime::config::TransformConfig;
use recast_runtime::wasm::{sha256_hex, verify_checksum};
use recast_runtime::{GuestSettings, WasmTransformModule};

/// Parse repeated `--env KEY=VALUE` flags. Later flags win.
pub fn parse_env_overrides(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid --env '{pair}', expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid --env '{pair}', key must not be empty");
        }
        overrides.insert(key.to_string(), value.to_string());
    }
    Ok(overrides)
}

/// Load a transform module, enforcing the configured checksum if any.
pub fn load_module(
    path: &Path,
    config: &TransformConfig,
    settings: GuestSettings,
) -> Result<WasmTransformModule> {
    if let Some(expected) = &config.checksum {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read module: {}", path.display()))?;
        if !verify_checksum(&bytes, expected) {
            bail!(
                "Checksum mismatch for {}: expected {}, got {}",
                path.display(),
                expected.trim(),
                sha256_hex(&bytes)
            );
        }
    }
    WasmTransformModule::from_file(path, settings)
        .with_context(|| format!("Failed to load module: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_parse_pairs() {
        let overrides =
            parse_env_overrides(&["A=1".to_string(), "B=x=y".to_string(), "A=2".to_string()])
                .unwrap();
        assert_eq!(overrides["A"], "2");
        assert_eq!(overrides["B"], "x=y");
    }

    #[test]
    fn env_overrides_reject_malformed() {
        assert!(parse_env_overrides(&["NOEQUALS".to_string()]).is_err());
        assert!(parse_env_overrides(&["=v".to_string()]).is_err());
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wat");
        std::fs::write(&path, "(module)").unwrap();
        let config: TransformConfig = config_from(&format!(
            "name: t\ninput_topic: in\noutput_topics: [out]\nchecksum: \"{}\"\n",
            "0".repeat(64)
        ));
        let err = load_module(&path, &config, GuestSettings::new("t"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Checksum mismatch"));
    }

    fn config_from(yaml: &str) -> TransformConfig {
        recast_runtime::config::parse_config_str(yaml).unwrap()
    }
}
