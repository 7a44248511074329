//! The client module contract and the handle the launcher hands to plugins.
//!
//! A client pack is a dynamic library exporting [`CLIENT_ENTRYPOINT_SYMBOL`],
//! which returns a versioned [`ClientExport`]. The host instantiates the
//! client through it and drives `initialize` then `start`, exactly once, in
//! that order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use libloading::Library;
use parking_lot::Mutex;
use thiserror::Error;

use crate::binary::ClientBinary;

/// Symbol every client pack must export.
pub const CLIENT_ENTRYPOINT_SYMBOL: &[u8] = b"caravel_client_entrypoint";

/// ABI revision of the client contract this host speaks.
pub const CLIENT_ABI_VERSION: u32 = 1;

/// Startup inputs handed to the client: the selected world and the parameter
/// pairs scraped from that world's parameter page.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub world: u32,
    pub parameters: HashMap<String, String>,
}

impl ClientContext {
    pub fn new(world: u32, parameters: HashMap<String, String>) -> Self {
        Self { world, parameters }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// Lifecycle interface of the hosted client module.
pub trait GameClient: Send {
    fn initialize(&mut self, context: &ClientContext) -> Result<()>;
    fn start(&mut self) -> Result<()>;
}

/// Value returned by the client pack's entry point.
pub struct ClientExport {
    pub abi_version: u32,
    pub create: fn() -> Box<dyn GameClient>,
}

/// Declares the entry point of a client pack built against this crate.
#[macro_export]
macro_rules! declare_caravel_client {
    ($client:ty) => {
        #[no_mangle]
        pub extern "C" fn caravel_client_entrypoint() -> $crate::ClientExport {
            fn construct() -> Box<dyn $crate::GameClient> {
                Box::new(<$client as Default>::default())
            }
            $crate::ClientExport {
                abi_version: $crate::CLIENT_ABI_VERSION,
                create: construct,
            }
        }
    };
}

#[derive(Debug, Error)]
pub enum ClientLoadError {
    #[error("failed to load the client module: {0}")]
    Library(#[from] libloading::Error),
    #[error("client module reports ABI version {found}, this host supports {supported}")]
    AbiMismatch { found: u32, supported: u32 },
    #[error("could not materialize the client binary: {0}")]
    Io(#[from] std::io::Error),
    #[error("client failed to {stage}: {source}")]
    Client {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// The running client. Shared read-only between the host and every plugin;
/// superseding the client means building a new handle, never mutating this
/// one.
pub struct ClientHandle {
    context: ClientContext,
    revision: Option<u16>,
    client: Mutex<Box<dyn GameClient>>,
    _library: Option<Library>,
}

impl ClientHandle {
    /// Loads the client module from `binary`, instantiates it, and drives
    /// `initialize` then `start`.
    pub fn load(
        binary: &ClientBinary,
        context: ClientContext,
    ) -> Result<Arc<Self>, ClientLoadError> {
        let path = binary.materialize()?;
        // Safety: the pack is trusted code the launcher exists to run; its
        // entry point must match the declared ABI, which is checked below.
        let (library, export) = unsafe {
            let library = Library::new(&path)?;
            let entry: libloading::Symbol<unsafe extern "C" fn() -> ClientExport> =
                library.get(CLIENT_ENTRYPOINT_SYMBOL)?;
            let export = entry();
            (library, export)
        };
        if export.abi_version != CLIENT_ABI_VERSION {
            return Err(ClientLoadError::AbiMismatch {
                found: export.abi_version,
                supported: CLIENT_ABI_VERSION,
            });
        }
        let client = (export.create)();
        Self::activate(client, context, binary.revision(), Some(library))
    }

    /// Wraps an in-process client implementation, driving the same
    /// `initialize`/`start` sequence as [`ClientHandle::load`].
    pub fn in_process(
        client: Box<dyn GameClient>,
        context: ClientContext,
        revision: Option<u16>,
    ) -> Result<Arc<Self>, ClientLoadError> {
        Self::activate(client, context, revision, None)
    }

    fn activate(
        mut client: Box<dyn GameClient>,
        context: ClientContext,
        revision: Option<u16>,
        library: Option<Library>,
    ) -> Result<Arc<Self>, ClientLoadError> {
        client
            .initialize(&context)
            .map_err(|source| ClientLoadError::Client {
                stage: "initialize",
                source,
            })?;
        client.start().map_err(|source| ClientLoadError::Client {
            stage: "start",
            source,
        })?;
        log::info!(
            "client started for world {} (revision {})",
            context.world,
            revision.map_or_else(|| "unknown".to_string(), |revision| revision.to_string())
        );
        Ok(Arc::new(Self {
            context,
            revision,
            client: Mutex::new(client),
            _library: library,
        }))
    }

    pub fn world(&self) -> u32 {
        self.context.world
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.context.parameter(name)
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.context.parameters
    }

    pub fn revision(&self) -> Option<u16> {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        initialized_world: Option<u32>,
        started: bool,
    }

    impl GameClient for RecordingClient {
        fn initialize(&mut self, context: &ClientContext) -> Result<()> {
            self.initialized_world = Some(context.world);
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            anyhow::ensure!(self.initialized_world.is_some(), "started before initialize");
            self.started = true;
            Ok(())
        }
    }

    struct FailingClient;

    impl GameClient for FailingClient {
        fn initialize(&mut self, _context: &ClientContext) -> Result<()> {
            anyhow::bail!("no world data")
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn in_process_client_is_initialized_then_started() {
        let mut parameters = HashMap::new();
        parameters.insert("mode".to_string(), "live".to_string());
        let handle = ClientHandle::in_process(
            Box::new(RecordingClient::default()),
            ClientContext::new(5, parameters),
            Some(210),
        )
        .unwrap();
        assert_eq!(handle.world(), 5);
        assert_eq!(handle.parameter("mode"), Some("live"));
        assert_eq!(handle.parameter("absent"), None);
        assert_eq!(handle.revision(), Some(210));
    }

    #[test]
    fn initialize_failure_is_reported_with_its_stage() {
        let err = ClientHandle::in_process(
            Box::new(FailingClient),
            ClientContext::default(),
            None,
        )
        .err()
        .expect("initialize should fail");
        match err {
            ClientLoadError::Client { stage, .. } => assert_eq!(stage, "initialize"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
