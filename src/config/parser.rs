use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads a configuration file and validates it
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use web_archive::config::load_config;
///
/// let config = load_config(Path::new("archive.toml")).unwrap();
/// println!("Max depth: {}", config.crawler.max_depth);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config = parse_config(path)?;
    validate(&config)?;
    Ok(config)
}

/// Reads and parses a configuration file without validating it
///
/// Command-line overrides are applied to the result before validation; the
/// seed URL in particular may only be given on the command line.
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let (config, _) = read_config(path)?;
    Ok(config)
}

/// Parses configuration text
///
/// `[crawler]`, `[output]` and `[assessment]` may each be omitted; every
/// field has a default except the seed URL.
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Hex-encoded SHA-256 of a configuration file
///
/// Recorded in the manifest so an archive can be traced back to the
/// settings that produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read(path)?;
    Ok(hash_bytes(&content))
}

/// Loads a configuration and the hash of the exact bytes it was parsed from
///
/// The returned config is parsed but not validated.
///
/// # Returns
///
/// * `Ok((Config, String))` - The parsed configuration and its file hash
/// * `Err(ConfigError)` - The file could not be read or is not valid TOML
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    read_config(path)
}

fn read_config(path: &Path) -> Result<(Config, String), ConfigError> {
    let bytes = std::fs::read(path)?;
    let hash = hash_bytes(&bytes);
    let content = String::from_utf8(bytes).map_err(|e| {
        ConfigError::Validation(format!("{} is not valid UTF-8: {}", path.display(), e))
    })?;
    let config = parse_config_str(&content)?;
    tracing::debug!("Parsed configuration from {} ({})", path.display(), hash);
    Ok((config, hash))
}

fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
