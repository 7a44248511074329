//! Client acquisition and hosting: deciding whether the cached client pack
//! is current, downloading a fresh one with progress reporting, and loading
//! the resulting module so the launcher can drive its lifecycle.

mod acquire;
mod binary;
mod handle;

pub use acquire::{
    acquire, acquire_async, AcquireError, AcquireHandle, AcquireState, RemoteOracle,
    VersionOracle, CLIENT_PACK_FILE,
};
pub use binary::{BinaryOrigin, ClientBinary};
pub use handle::{
    ClientContext, ClientExport, ClientHandle, ClientLoadError, GameClient, CLIENT_ABI_VERSION,
    CLIENT_ENTRYPOINT_SYMBOL,
};
