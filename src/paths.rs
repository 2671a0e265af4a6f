use std::path::{Path, PathBuf};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "COMPFLOW_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (COMPFLOW_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. COMPFLOW_CONFIG_DIR environment variable
/// 3. Current directory IF it already holds the file
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/compflow/{name}
/// - macOS: ~/Library/Application Support/compflow/{name}
/// - Windows: %APPDATA%\compflow\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.join(name);
    }
    if let Ok(current_dir) = std::env::current_dir() {
        if has_local_file(&current_dir, name) {
            return current_dir.join(name);
        }
    }
    platform_config_dir().join(name)
}

/// Get path to a log file next to the configuration
pub fn log_file(name: &str, config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.join(name);
    }
    dirs_next::data_dir()
        .map(|d| d.join("compflow"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(name)
}

fn has_local_file(dir: &Path, name: &str) -> bool {
    dir.join(name).is_file()
}

fn platform_config_dir() -> PathBuf {
    dirs_next::config_dir()
        .map(|d| d.join("compflow"))
        .unwrap_or_else(|| PathBuf::from("."))
}
