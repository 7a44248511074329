use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving and loading a plugin archive.
///
/// Each of these is scoped to one archive: the host logs it, skips the
/// archive, and carries on.
#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("plugin archive not found at {0}")]
    MissingArchive(PathBuf),
    #[error("plugin archive at {0} has no manifest")]
    MissingManifest(PathBuf),
    #[error("the manifest for {0} does not declare an entry point")]
    MissingEntryPoint(PathBuf),
    #[error("invalid manifest at {0}: {1}")]
    InvalidManifest(PathBuf, #[source] serde_json::Error),
    #[error("failed to load the plugin library: {0}")]
    Library(#[from] libloading::Error),
    #[error("entry point `{entry_point}` not found in {path}")]
    EntryPointNotFound { path: PathBuf, entry_point: String },
    #[error("{path} is not a Caravel plugin: {reason}")]
    NotAPlugin { path: PathBuf, reason: String },
    #[error("failed to construct plugin `{entry_point}`: {reason}")]
    ConstructionFailed { entry_point: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid lifecycle requests. Ordering violations are reported loudly
/// rather than ignored: they indicate a host bug, not a plugin bug.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("the plugin is already initialized")]
    AlreadyInitialized,
    #[error("the plugin must be initialized first")]
    NotInitialized,
    #[error("the plugin has already been started")]
    AlreadyStarted,
    #[error("the plugin has already stopped")]
    AlreadyStopped,
    #[error("failed to create the plugin control: {0}")]
    Control(#[source] anyhow::Error),
    #[error("plugin setup failed: {0}")]
    Setup(#[source] anyhow::Error),
    #[error("could not spawn the plugin thread: {0}")]
    Spawn(#[from] std::io::Error),
}
