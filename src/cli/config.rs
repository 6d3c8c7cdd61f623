//! Node configuration file handling
//!
//! TOML with two tables:
//!
//! - `[node]`: [`DedupConfig`], every field optional (defaults apply)
//! - `[logging]`: subscriber level, overridden by `RUST_LOG`
//!
//! The `[node]` table is validated on load, so a bad file fails before a
//! node is built.

use biodedup::DedupConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub node: DedupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl FileConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: FileConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        config
            .node
            .validate()
            .map_err(|e| format!("Invalid [node] section in '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        write_with_parent(path, &contents)
    }

    /// Default configuration with comments
    pub fn generate_default_toml() -> String {
        let defaults = DedupConfig::default();
        format!(
            r#"# biodedup node configuration

[node]
# Minimum aggregate confidence to declare a duplicate (0.0 - 1.0)
deduplication_threshold = {threshold}

# Fingerprint digest: "sha256", "sha384" or "sha512"
hash_function = "{hash}"

# Generated key material size in bits
key_size = {key_size}

# Capacity of the local match set (oldest enrollments evicted first)
max_set_size = {max_set_size}

# Query registered peer shards during dedup checks
cross_shard_enabled = {cross_shard}

# Audit entries older than this are pruned
audit_retention_days = {retention}

# Identifier stamped on audit entries and intersection responses
shard_id = "{shard_id}"

# Per-shard intersection request timeout
shard_timeout_ms = {timeout}

# Fixed privacy noise seed; shards of one federation must agree on it
# noise_seed = 42

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
level = "{level}"
"#,
            threshold = defaults.deduplication_threshold,
            hash = defaults.hash_function.name(),
            key_size = defaults.key_size,
            max_set_size = defaults.max_set_size,
            cross_shard = defaults.cross_shard_enabled,
            retention = defaults.audit_retention_days,
            shard_id = defaults.shard_id,
            timeout = defaults.shard_timeout_ms,
            level = DEFAULT_LOG_LEVEL,
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        write_with_parent(config_path, &Self::generate_default_toml())
    }
}

fn write_with_parent(path: &Path, contents: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    fs::write(path, contents)
        .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

    Ok(())
}

/// `config init`: write defaults unless a file exists (or `force`)
pub fn init(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    FileConfig::create_default(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Explicit path, else the default path if it exists, else built-in defaults
pub fn resolve(path: Option<&str>) -> Result<FileConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => FileConfig::load(Path::new(path)),
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                FileConfig::load(&default_path)
            } else {
                Ok(FileConfig::default())
            }
        }
    }
}

/// Get the default config file path
///
/// - Linux: ~/.config/biodedup/config.toml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("biodedup")
        .join("config.toml")
}
