use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::world;

/// File name of the persisted settings inside the storage directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Persisted launcher settings.
///
/// Unknown or malformed fields fall back to their defaults so an old or
/// hand-edited file never prevents startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_world")]
    pub default_world: u32,
    #[serde(default = "default_plugin_repository")]
    pub plugin_repository: String,
}

fn default_world() -> u32 {
    world::DEFAULT_WORLD
}

fn default_plugin_repository() -> String {
    "https://plugins.caravel.gg/index".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_world: default_world(),
            plugin_repository: default_plugin_repository(),
        }
    }
}

/// Process-wide settings store.
///
/// Read once at startup and written back at shutdown; in between, values are
/// served from memory behind a lock so any thread may consult them.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads settings from `storage_dir`, degrading to defaults when the
    /// directory is unavailable or the file is missing or malformed.
    pub fn load(storage_dir: Option<&Path>) -> Self {
        let path = storage_dir.map(|dir| dir.join(SETTINGS_FILE));
        let settings = match &path {
            Some(path) => match fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(settings) => settings,
                    Err(err) => {
                        log::warn!(
                            "ignoring malformed settings at {}: {err}",
                            path.display()
                        );
                        Settings::default()
                    }
                },
                Err(_) => Settings::default(),
            },
            None => Settings::default(),
        };
        Self {
            path,
            inner: RwLock::new(settings),
        }
    }

    /// Store that never touches disk. `save` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(Settings::default()),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    pub fn default_world(&self) -> u32 {
        self.inner.read().default_world
    }

    pub fn set_default_world(&self, world: u32) {
        self.inner.write().default_world = world;
    }

    /// Resets the world selection to the built-in default.
    pub fn reset_default_world(&self) {
        self.inner.write().default_world = default_world();
    }

    pub fn plugin_repository(&self) -> String {
        self.inner.read().plugin_repository.clone()
    }

    pub fn set_plugin_repository(&self, url: impl Into<String>) {
        self.inner.write().plugin_repository = url.into();
    }

    /// Whether the configured repository is still the built-in default.
    pub fn has_default_plugin_repository(&self) -> bool {
        self.inner.read().plugin_repository == default_plugin_repository()
    }

    pub fn reset_plugin_repository(&self) {
        self.inner.write().plugin_repository = default_plugin_repository();
    }

    /// Resets every setting to its default.
    pub fn reset_defaults(&self) {
        *self.inner.write() = Settings::default();
    }

    /// Persists the current settings, creating the storage directory if
    /// needed. Does nothing for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory at {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(&*self.inner.read())
            .context("failed to serialize settings")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write settings at {}", path.display()))?;
        Ok(())
    }
}
