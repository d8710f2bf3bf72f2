use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::preview::{DEFAULT_PRELOAD_RADIUS, DEFAULT_WORKERS, LoaderConfig};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "page-preview";

pub const ENV_PRELOAD_RADIUS: &str = "PAGE_PREVIEW_PRELOAD_RADIUS";
pub const ENV_WORKERS: &str = "PAGE_PREVIEW_WORKERS";
pub const ENV_CAPACITY: &str = "PAGE_PREVIEW_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_preload_radius")]
    pub preload_radius: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Fixed cache capacity; derived from `preload_radius` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,

    #[serde(default)]
    pub clear_cache_on_background: bool,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_preload_radius() -> usize {
    DEFAULT_PRELOAD_RADIUS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            preload_radius: default_preload_radius(),
            workers: default_workers(),
            capacity: None,
            clear_cache_on_background: false,
        }
    }
}

/// `<config dir>/page-preview/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::load_from(&path),
                None => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Self = serde_yaml::from_str(content)?;
        if settings.version > CURRENT_VERSION {
            bail!(
                "settings version {} is newer than supported version {CURRENT_VERSION}",
                settings.version
            );
        }
        if settings.version < CURRENT_VERSION {
            migrate(&mut settings);
        }
        Ok(settings)
    }

    /// Overlay `PAGE_PREVIEW_*` environment variables on top of the file values
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(radius) = env_usize(ENV_PRELOAD_RADIUS)? {
            self.preload_radius = radius;
        }
        if let Some(workers) = env_usize(ENV_WORKERS)? {
            self.workers = workers;
        }
        if let Some(capacity) = env_usize(ENV_CAPACITY)? {
            self.capacity = Some(capacity);
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    #[must_use]
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            preload_radius: self.preload_radius,
            workers: self.workers.max(1),
            capacity: self.capacity,
            clear_cache_on_background: self.clear_cache_on_background,
        }
    }
}

fn migrate(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{CURRENT_VERSION}",
        settings.version
    );
    settings.version = CURRENT_VERSION;
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(value) => {
            let parsed = value
                .trim()
                .parse()
                .with_context(|| format!("{name} must be a non-negative integer, got '{value}'"))?;
            debug!("{name}={parsed} overrides config");
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}
