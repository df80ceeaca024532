// Configuration loader
// Loads ~/.krypton/config.toml, or an explicit path, falling back to defaults

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;

/// Location of the user config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".krypton").join("config.toml"))
}

/// Load configuration
///
/// An explicit path must exist. Without one, `~/.krypton/config.toml` is read
/// when present and the built-in defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            load_config_from(path)?
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => load_config_from(&path)?,
            None => {
                tracing::info!("No config file found, using defaults");
                Config::default()
            }
        },
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Parse a config file without validating it
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}
