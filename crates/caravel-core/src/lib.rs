//! Shared launcher state: the process-wide settings store and world
//! addressing used by every other Caravel crate.

mod settings;
pub mod world;

pub use settings::{Settings, SettingsStore, SETTINGS_FILE};
