use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use caravel_client::ClientHandle;

/// Identity of a plugin, reported by its factory and its instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Stable id the archive manifest's `entry_point` attribute refers to.
    pub id: String,
    pub name: String,
    pub vendor: Option<String>,
    pub version: Option<String>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vendor: None,
            version: None,
        }
    }
}

/// What the execution loop should do after a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Run the next unit of work immediately.
    Immediate,
    /// Sleep for the given duration before the next unit of work.
    After(Duration),
}

/// The plugin's externally visible control affordance.
///
/// The host keeps a clone and clears the enabled flag once the plugin's
/// execution loop has exited.
#[derive(Debug, Clone)]
pub struct ControlEntry {
    label: String,
    enabled: Arc<AtomicBool>,
}

impl ControlEntry {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// The capability contract every Caravel plugin implements.
///
/// The host owns the instance exclusively once registered and drives it
/// through initialize → start → (pause ⇄ resume) → stop on a dedicated
/// thread. `tick` is one unit of work; iterations for one plugin are
/// strictly sequential.
pub trait Plugin: Send {
    fn descriptor(&self) -> PluginDescriptor;

    /// Builds the plugin's control affordance. Called once while the host
    /// initializes the plugin; a failure here discards the plugin.
    fn create_control(&self) -> Result<ControlEntry>;

    /// One-time setup against the running client, before the execution loop
    /// starts.
    fn setup(&mut self, _client: &ClientHandle) -> Result<()> {
        Ok(())
    }

    /// One unit of work. Errors terminate this plugin's loop only.
    fn tick(&mut self, client: &ClientHandle) -> Result<Cadence>;
}
