use crate::normalize::{DEFAULT_COUNTRY_CODE, PhoneNormalizer};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the database and project config.
pub const PROJECT_DIR: &str = ".convo";
pub const DB_FILE: &str = "convo.db";
pub const CONFIG_FILE: &str = "config.toml";
/// Environment variable overriding `server.bind`.
pub const BIND_ENV: &str = "CONVO_BIND";

#[must_use]
pub fn project_dir(root: &Path) -> PathBuf {
    root.join(PROJECT_DIR)
}

#[must_use]
pub fn db_path(root: &Path) -> PathBuf {
    project_dir(root).join(DB_FILE)
}

#[must_use]
pub fn config_path(root: &Path) -> PathBuf {
    project_dir(root).join(CONFIG_FILE)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub phone: PhoneConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneConfig {
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub delete_duplicates: bool,
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            page_size: default_page_size(),
            delete_duplicates: false,
            max_write_attempts: default_max_write_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl ProjectConfig {
    /// Reject values that parse but cannot be used.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending key.
    pub fn validate(&self) -> Result<()> {
        PhoneNormalizer::new(&self.phone.default_country_code)
            .context("phone.default_country_code")?;
        if self.migration.page_size == 0 {
            bail!("migration.page_size must be at least 1");
        }
        if self.migration.max_write_attempts == 0 {
            bail!("migration.max_write_attempts must be at least 1");
        }
        Ok(())
    }

    /// Phone normalizer for the configured default country code.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured country code is invalid.
    pub fn phone_normalizer(&self) -> Result<PhoneNormalizer> {
        PhoneNormalizer::new(&self.phone.default_country_code)
            .context("phone.default_country_code")
    }

    /// Bind address with the `CONVO_BIND` override applied.
    #[must_use]
    pub fn resolve_bind(&self, env_bind: Option<String>) -> String {
        env_bind
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.server.bind.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

/// Load `.convo/config.toml` under `project_root`, defaulting every section
/// when the file or a key is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed or
/// validated.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    Ok(config)
}

/// Write the default project config unless one already exists. Returns
/// whether a file was written.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_default_project_config(project_root: &Path) -> Result<bool> {
    let path = config_path(project_root);
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(&ProjectConfig::default())
        .context("Failed to serialize default config")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

/// # Errors
///
/// Returns an error if the user config exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("convo/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn default_country_code() -> String {
    DEFAULT_COUNTRY_CODE.to_string()
}

const fn default_limit() -> usize {
    1000
}

const fn default_page_size() -> usize {
    200
}

const fn default_max_write_attempts() -> u32 {
    2
}

const fn default_lock_ttl_secs() -> u64 {
    300
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
