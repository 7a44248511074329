//! Bulk plugin loading from address lists and remote repository indexes.
//!
//! Every address is attempted independently: one bad archive never aborts
//! the batch, and failures are collected per address for the caller to
//! surface.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::archive::{BUNDLE_LIBRARY_FILE, MANIFEST_FILE};
use crate::lifecycle::PluginHandle;
use crate::registry::PluginRegistry;

/// One address that could not be loaded.
#[derive(Debug)]
pub struct BulkFailure {
    pub address: String,
    pub error: anyhow::Error,
}

/// Outcome of a batch load.
#[derive(Debug, Default)]
pub struct BulkLoadReport {
    pub loaded: Vec<String>,
    pub failures: Vec<BulkFailure>,
}

/// Attempts to load every address in `addresses`.
///
/// An address is either a local archive path or an `http(s)` base address
/// of a remote bundle (serving `manifest.json` and `plugin.cvplug`), which
/// is fetched into `plugins_dir` before loading.
pub fn load_plugins(
    registry: &PluginRegistry,
    addresses: &[String],
    plugins_dir: Option<&Path>,
) -> BulkLoadReport {
    let mut report = BulkLoadReport::default();
    for address in addresses {
        let address = address.trim();
        if address.is_empty() {
            continue;
        }
        match load_one(registry, address, plugins_dir) {
            Ok(handle) => report.loaded.push(handle.name().to_string()),
            Err(error) => {
                log::warn!("failed to load the plugin at {address}, ignoring: {error:#}");
                report.failures.push(BulkFailure {
                    address: address.to_string(),
                    error,
                });
            }
        }
    }
    report
}

/// Fetches the newline-delimited address list at `index_url` and loads every
/// entry. Lines starting with `#` are comments.
pub fn load_from_repository(
    registry: &PluginRegistry,
    index_url: &str,
    plugins_dir: Option<&Path>,
) -> Result<BulkLoadReport> {
    let listing = caravel_net::fetch_text(index_url)
        .with_context(|| format!("could not fetch the plugin repository index at {index_url}"))?;
    let addresses: Vec<String> = listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    Ok(load_plugins(registry, &addresses, plugins_dir))
}

fn load_one(
    registry: &PluginRegistry,
    address: &str,
    plugins_dir: Option<&Path>,
) -> Result<Arc<PluginHandle>> {
    if address.starts_with("http://") || address.starts_with("https://") {
        let dir = plugins_dir
            .context("no storage directory available for downloading remote plugins")?;
        let bundle = fetch_remote_bundle(address, dir)?;
        Ok(registry.load(&bundle)?)
    } else {
        Ok(registry.load(Path::new(address))?)
    }
}

/// Downloads a remote bundle (manifest first, then the library) into its own
/// directory under `plugins_dir`.
fn fetch_remote_bundle(base: &str, plugins_dir: &Path) -> Result<PathBuf> {
    let base = base.trim_end_matches('/');
    let slug: String = base
        .rsplit('/')
        .next()
        .unwrap_or("plugin")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let bundle = plugins_dir.join(slug);
    fs::create_dir_all(&bundle)
        .with_context(|| format!("could not create {}", bundle.display()))?;

    let manifest = caravel_net::fetch_bytes(&format!("{base}/{MANIFEST_FILE}"))
        .with_context(|| format!("could not fetch the manifest from {base}"))?;
    fs::write(bundle.join(MANIFEST_FILE), manifest)?;

    let library = caravel_net::fetch_bytes(&format!("{base}/{BUNDLE_LIBRARY_FILE}"))
        .with_context(|| format!("could not fetch the plugin library from {base}"))?;
    fs::write(bundle.join(BUNDLE_LIBRARY_FILE), library)?;

    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir_all, File};

    use tempfile::tempdir;

    use crate::error::PluginLoadError;

    use super::*;

    #[test]
    fn failures_are_collected_per_address_without_aborting_the_batch() {
        let dir = tempdir().unwrap();

        // One archive with no manifest at all, one whose manifest lacks the
        // entry-point attribute, one that does not exist.
        let unmanifested = dir.path().join("First.cvplug");
        create_dir_all(&unmanifested).unwrap();
        File::create(unmanifested.join(BUNDLE_LIBRARY_FILE)).unwrap();

        let undeclared = dir.path().join("Second.cvplug");
        create_dir_all(&undeclared).unwrap();
        File::create(undeclared.join(BUNDLE_LIBRARY_FILE)).unwrap();
        fs::write(undeclared.join(MANIFEST_FILE), r#"{ "name": "Second" }"#).unwrap();

        let registry = PluginRegistry::new();
        let addresses = vec![
            unmanifested.display().to_string(),
            undeclared.display().to_string(),
            dir.path().join("Absent.cvplug").display().to_string(),
            String::new(),
        ];
        let report = load_plugins(&registry, &addresses, None);

        assert!(report.loaded.is_empty());
        assert_eq!(report.failures.len(), 3);
        assert!(registry.is_empty());

        let undeclared_failure = report
            .failures
            .iter()
            .find(|failure| failure.address.contains("Second"))
            .unwrap();
        assert!(matches!(
            undeclared_failure.error.downcast_ref::<PluginLoadError>(),
            Some(PluginLoadError::MissingEntryPoint(_))
        ));
    }

    #[test]
    fn remote_addresses_without_a_storage_directory_fail_cleanly() {
        let registry = PluginRegistry::new();
        let addresses = vec!["http://plugins.invalid/clock".to_string()];
        let report = load_plugins(&registry, &addresses, None);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0]
            .error
            .to_string()
            .contains("no storage directory"));
    }
}
