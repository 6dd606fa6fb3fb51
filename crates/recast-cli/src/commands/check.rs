use std::path::Path;

use anyhow::{Context, Result};
use recast_runtime::config::{parse_config, validate_config};
use recast_runtime::GuestFactory;

use super::{load_module, parse_env_overrides};

/// Execute the `check` command: validate the transform config and, when a
/// module is given, instantiate it and run its setup and teardown once.
pub fn execute(config_path: &Path, module_path: Option<&Path>, env: &[String]) -> Result<()> {
    let overrides = parse_env_overrides(env)?;
    let config = parse_config(config_path)
        .with_context(|| format!("Failed to parse transform: {}", config_path.display()))?;

    validate_config(&config, &overrides)?;
    println!("Transform config:  OK");

    if let Some(module_path) = module_path {
        let settings = config.guest_settings(&overrides)?;
        let module = load_module(module_path, &config, settings)?;
        let mut guest = module.instantiate(0)?;
        guest.setup().context("Guest setup failed")?;
        guest.teardown().context("Guest teardown failed")?;
        println!("Module:            OK");
    }

    println!("\nAll checks passed.");
    Ok(())
}
