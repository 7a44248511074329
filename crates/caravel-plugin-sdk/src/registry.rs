use anyhow::Result;

use crate::plugin::{Plugin, PluginDescriptor};

/// Symbol every plugin archive must export.
pub const PLUGIN_ENTRYPOINT_SYMBOL: &[u8] = b"caravel_plugin_entrypoint";

/// ABI revision of the plugin contract. The host refuses archives built
/// against a different revision.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Constructs plugin instances. The factory is the archive-side half of the
/// host's entry-point resolution: the manifest names a factory id, the host
/// instantiates through it.
pub trait PluginFactory: Send + Sync {
    fn descriptor(&self) -> PluginDescriptor;

    /// Builds a fresh plugin instance. Equivalent to a no-argument
    /// constructor; failures surface to the host as a load error.
    fn create(&self) -> Result<Box<dyn Plugin>>;
}

/// The set of factories an archive exports.
pub struct PluginModule {
    factories: Vec<Box<dyn PluginFactory>>,
}

impl PluginModule {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn register_factory(&mut self, factory: Box<dyn PluginFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PluginFactory> {
        self.factories.iter().map(|factory| factory.as_ref())
    }

    /// Looks up a factory by its descriptor id.
    pub fn find(&self, id: &str) -> Option<&dyn PluginFactory> {
        self.iter().find(|factory| factory.descriptor().id == id)
    }

    pub fn into_factories(self) -> Vec<Box<dyn PluginFactory>> {
        self.factories
    }
}

impl Default for PluginModule {
    fn default() -> Self {
        Self::new()
    }
}

/// Value returned by an archive's entry point.
pub struct PluginExport {
    abi_version: u32,
    module: PluginModule,
}

impl PluginExport {
    pub fn new(module: PluginModule) -> Self {
        Self {
            abi_version: PLUGIN_ABI_VERSION,
            module,
        }
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn module(&self) -> &PluginModule {
        &self.module
    }

    pub fn into_module(self) -> PluginModule {
        self.module
    }
}
