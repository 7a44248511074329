//! Plugin archive resolution and dynamic loading.
//!
//! An archive is either a bundle directory (`Foo.cvplug/` containing
//! `manifest.json` and `plugin.cvplug`) or a bare library file with a
//! manifest beside it. Loading is two-staged: [`PluginArchive::open`]
//! resolves and validates the manifest without touching the library;
//! [`PluginArchive::instantiate`] performs the dynamic load and
//! construction.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use caravel_plugin_sdk::{Plugin, PluginExport, PLUGIN_ABI_VERSION, PLUGIN_ENTRYPOINT_SYMBOL};
use libloading::Library;
use serde::Deserialize;

use crate::error::PluginLoadError;

/// Manifest file name inside a bundle (or beside a bare library).
pub const MANIFEST_FILE: &str = "manifest.json";

/// Library file name inside a bundle.
pub const BUNDLE_LIBRARY_FILE: &str = "plugin.cvplug";

/// Archive metadata. Everything is optional at parse time; the one hard
/// requirement, the entry point, is enforced by [`PluginArchive::open`].
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub entry_point: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub vendor: Option<String>,
    pub description: Option<String>,
}

/// A resolved plugin archive, ready to be instantiated.
#[derive(Debug)]
pub struct PluginArchive {
    source: PathBuf,
    library_path: PathBuf,
    entry_point: String,
    manifest: PluginManifest,
}

/// A constructed plugin together with the library that backs its code. The
/// library must outlive the plugin, so the two travel together until the
/// execution thread drops them in order.
pub struct LoadedPlugin {
    pub(crate) plugin: Box<dyn Plugin>,
    pub(crate) library: Library,
}

impl PluginArchive {
    /// Resolves the archive layout and manifest at `source`.
    pub fn open(source: &Path) -> Result<Self, PluginLoadError> {
        if !source.exists() {
            return Err(PluginLoadError::MissingArchive(source.to_path_buf()));
        }
        let (library_path, manifest_path) = locate(source)?;
        let Some(manifest_path) = manifest_path else {
            return Err(PluginLoadError::MissingManifest(source.to_path_buf()));
        };
        let raw = fs::read_to_string(&manifest_path)?;
        let manifest: PluginManifest = serde_json::from_str(&raw)
            .map_err(|err| PluginLoadError::InvalidManifest(manifest_path.clone(), err))?;
        let Some(entry_point) = manifest.entry_point.clone() else {
            return Err(PluginLoadError::MissingEntryPoint(source.to_path_buf()));
        };
        Ok(Self {
            source: source.to_path_buf(),
            library_path,
            entry_point,
            manifest,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Loads the archive's library, resolves the declared entry point, and
    /// constructs the plugin.
    pub fn instantiate(&self) -> Result<LoadedPlugin, PluginLoadError> {
        // Safety: plugins are unsandboxed by design; the entry point is the
        // SDK-declared symbol and the export's ABI tag is checked before the
        // module is used.
        let (library, export) = unsafe {
            let library = Library::new(&self.library_path)?;
            let entry: libloading::Symbol<unsafe extern "C" fn() -> PluginExport> = library
                .get(PLUGIN_ENTRYPOINT_SYMBOL)
                .map_err(|_| PluginLoadError::EntryPointNotFound {
                    path: self.library_path.clone(),
                    entry_point: self.entry_point.clone(),
                })?;
            let export = entry();
            (library, export)
        };
        if export.abi_version() != PLUGIN_ABI_VERSION {
            return Err(PluginLoadError::NotAPlugin {
                path: self.library_path.clone(),
                reason: format!(
                    "module reports ABI version {}, this host supports {}",
                    export.abi_version(),
                    PLUGIN_ABI_VERSION
                ),
            });
        }
        let module = export.into_module();
        let Some(factory) = module.find(&self.entry_point) else {
            return Err(PluginLoadError::EntryPointNotFound {
                path: self.library_path.clone(),
                entry_point: self.entry_point.clone(),
            });
        };
        let plugin = panic::catch_unwind(AssertUnwindSafe(|| factory.create()))
            .map_err(|_| PluginLoadError::ConstructionFailed {
                entry_point: self.entry_point.clone(),
                reason: "the factory panicked".to_string(),
            })?
            .map_err(|err| PluginLoadError::ConstructionFailed {
                entry_point: self.entry_point.clone(),
                reason: format!("{err:#}"),
            })?;
        log::info!(
            "instantiated plugin `{}` from {}",
            self.entry_point,
            self.source.display()
        );
        Ok(LoadedPlugin { plugin, library })
    }
}

/// Resolves the library and manifest paths for an archive source.
fn locate(source: &Path) -> Result<(PathBuf, Option<PathBuf>), PluginLoadError> {
    if source.is_dir() {
        let library = source.join(BUNDLE_LIBRARY_FILE);
        if !library.is_file() {
            return Err(PluginLoadError::MissingArchive(library));
        }
        let manifest = source.join(MANIFEST_FILE);
        return Ok((library, manifest.is_file().then_some(manifest)));
    }
    // Bare library file: prefer `<stem>.json`, fall back to a shared
    // `manifest.json` in the same directory.
    let mut candidates = Vec::new();
    if let Some(stem) = source.file_stem() {
        let mut named = PathBuf::from(stem);
        named.set_extension("json");
        if let Some(parent) = source.parent() {
            candidates.push(parent.join(named));
        }
    }
    if let Some(parent) = source.parent() {
        candidates.push(parent.join(MANIFEST_FILE));
    }
    let manifest = candidates.into_iter().find(|candidate| candidate.is_file());
    Ok((source.to_path_buf(), manifest))
}
