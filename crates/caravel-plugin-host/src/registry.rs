//! The host's active-plugin set.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use caravel_client::ClientHandle;
use caravel_plugin_sdk::Plugin;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::archive::PluginArchive;
use crate::error::PluginLoadError;
use crate::lifecycle::{PluginEvent, PluginHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId(pub u64);

impl PluginId {
    fn next(counter: &AtomicU64) -> Self {
        PluginId(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Concurrent set of registered plugins, keyed by identity.
///
/// The registry also owns the exit-event channel: when a plugin's loop
/// terminates, the host reaps its entry from the active set.
pub struct PluginRegistry {
    next_id: AtomicU64,
    plugins: RwLock<HashMap<PluginId, Arc<PluginHandle>>>,
    events_tx: Sender<PluginEvent>,
    events_rx: Receiver<PluginEvent>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            next_id: AtomicU64::new(0),
            plugins: RwLock::new(HashMap::new()),
            events_tx,
            events_rx,
        }
    }

    /// Loads and registers the plugin archive at `source`.
    pub fn load(&self, source: &Path) -> Result<Arc<PluginHandle>, PluginLoadError> {
        let archive = PluginArchive::open(source)?;
        let loaded = archive.instantiate()?;
        Ok(self.insert(loaded.plugin, Some(loaded.library)))
    }

    /// Registers an in-process plugin (no backing library).
    pub fn register(&self, plugin: Box<dyn Plugin>) -> Arc<PluginHandle> {
        self.insert(plugin, None)
    }

    fn insert(
        &self,
        plugin: Box<dyn Plugin>,
        library: Option<libloading::Library>,
    ) -> Arc<PluginHandle> {
        let id = PluginId::next(&self.next_id);
        let handle = Arc::new(PluginHandle::new(
            id,
            plugin,
            library,
            self.events_tx.clone(),
        ));
        self.plugins.write().insert(id, Arc::clone(&handle));
        log::info!("registered plugin {} as {:?}", handle.name(), id);
        handle
    }

    pub fn get(&self, id: PluginId) -> Option<Arc<PluginHandle>> {
        self.plugins.read().get(&id).cloned()
    }

    pub fn plugins(&self) -> Vec<Arc<PluginHandle>> {
        self.plugins.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Removes a plugin from the active set, waiting for its thread to wind
    /// down if it was running.
    pub fn remove(&self, id: PluginId) -> Option<Arc<PluginHandle>> {
        let handle = self.plugins.write().remove(&id);
        if let Some(handle) = &handle {
            handle.join();
            log::info!("removed plugin {} ({:?})", handle.name(), id);
        }
        handle
    }

    /// Exit notifications from plugin execution loops.
    pub fn events(&self) -> &Receiver<PluginEvent> {
        &self.events_rx
    }

    /// Initializes and starts every registered plugin against `client`.
    ///
    /// Failures are per-plugin: a plugin that refuses to initialize or start
    /// is logged and dropped from the set, the rest continue.
    pub fn start_all(&self, client: &Arc<ClientHandle>) {
        for handle in self.plugins() {
            if let Err(err) = handle.initialize(client) {
                log::error!("could not initialize plugin {}: {err}", handle.name());
                self.remove(handle.id());
                continue;
            }
            if let Err(err) = handle.start() {
                log::error!("could not start plugin {}: {err}", handle.name());
                self.remove(handle.id());
            }
        }
    }

    /// Requests a stop from every registered plugin.
    pub fn stop_all(&self) {
        for handle in self.plugins() {
            handle.stop();
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
