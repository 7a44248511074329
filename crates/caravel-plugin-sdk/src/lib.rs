//! Caravel Plugin SDK
//! ==================
//!
//! Types and abstractions for building Caravel plugins: the [`Plugin`]
//! capability contract the host's lifecycle runtime drives, the factory and
//! module types an archive exports, and the entry-point declaration macro.

mod plugin;
mod registry;

pub use plugin::{Cadence, ControlEntry, Plugin, PluginDescriptor};
pub use registry::{
    PluginExport, PluginFactory, PluginModule, PLUGIN_ABI_VERSION, PLUGIN_ENTRYPOINT_SYMBOL,
};

/// Common imports for plugin authors.
pub mod prelude {
    pub use crate::{
        declare_caravel_plugins, Cadence, ControlEntry, Plugin, PluginDescriptor, PluginExport,
        PluginFactory, PluginModule,
    };
    pub use caravel_client::{ClientContext, ClientHandle};
}

/// Declare the entry point of a dynamic Caravel plugin archive.
///
/// The macro expects one or more expressions evaluating to types that
/// implement [`PluginFactory`]. Each factory is registered in the exported
/// [`PluginModule`]; the archive manifest's `entry_point` attribute names
/// the factory the host instantiates.
///
/// # Example
///
/// ```ignore
/// use caravel_plugin_sdk::{declare_caravel_plugins, PluginFactory};
///
/// struct ClockFactory;
///
/// impl PluginFactory for ClockFactory { /* ... */ }
///
/// declare_caravel_plugins!(ClockFactory);
/// ```
#[macro_export]
macro_rules! declare_caravel_plugins {
    ($($factory:expr),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn caravel_plugin_entrypoint() -> $crate::PluginExport {
            let mut module = $crate::PluginModule::new();
            $(module.register_factory(Box::new($factory));)+
            $crate::PluginExport::new(module)
        }
    };
}
