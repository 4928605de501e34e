//! Configuration for plates

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Deployment environment; decides how far the compiled cache is trusted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl Environment {
    /// Production trusts cached artifacts without comparing modification times
    pub fn trusts_cache(&self) -> bool {
        *self == Environment::Production
    }
}

/// A module search location: `(base directory, path offset)`
///
/// The offset is the views directory inside each module, e.g. `Views/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLocation {
    pub base: PathBuf,

    #[serde(default = "default_module_offset")]
    pub offset: String,
}

fn default_module_offset() -> String {
    "Views/".to_string()
}

/// Main plates configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for views when no module matches
    #[serde(rename = "views-path")]
    pub views_path: PathBuf,

    /// File extension appended to logical template names
    pub extension: String,

    /// Directory used by the file cache for compiled artifacts
    #[serde(rename = "cache-path")]
    pub cache_path: PathBuf,

    /// Time-to-live for compiled artifacts, in seconds
    #[serde(rename = "cache-ttl-secs")]
    pub cache_ttl_secs: u64,

    pub environment: Environment,

    /// Minify rendered HTML
    #[serde(rename = "compress-content")]
    pub compress_content: bool,

    /// Keep HTML comments when minifying
    #[serde(rename = "minify-keep-comments")]
    pub minify_keep_comments: bool,

    /// Default locale for translation helpers
    pub locale: String,

    /// Root directory of locale files (`<locale-path>/<locale>/<file>.yml`)
    #[serde(rename = "locale-path")]
    pub locale_path: PathBuf,

    /// Maximum nesting of include/extends calls within one render
    #[serde(rename = "max-include-depth")]
    pub max_include_depth: usize,

    /// Additional substrings stripped from compiled source before execution
    #[serde(rename = "denylist-extra")]
    pub denylist_extra: Vec<String>,

    /// Module search scheme, first match wins
    pub modules: Vec<ModuleLocation>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            views_path: PathBuf::from("views"),
            extension: ".plate.html".to_string(),
            cache_path: default_cache_path(),
            cache_ttl_secs: 3600,
            environment: Environment::default(),
            compress_content: false,
            minify_keep_comments: false,
            locale: "english".to_string(),
            locale_path: PathBuf::from("lang"),
            max_include_depth: 32,
            denylist_extra: Vec::new(),
            modules: Vec::new(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plates")
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: plates.yml
        let local_config = PathBuf::from("plates.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/plates/plates.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("plates").join("plates.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.extension.is_empty() {
            return Err(eyre::eyre!("extension must not be empty"));
        }
        if self.max_include_depth == 0 {
            return Err(eyre::eyre!("max-include-depth must be at least 1"));
        }
        Ok(())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
