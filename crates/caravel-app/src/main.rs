//! The `caravel` binary: wires acquisition, client startup, and the plugin
//! host together and keeps the process alive until shutdown.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use caravel_client::{
    acquire_async, AcquireHandle, AcquireState, ClientBinary, ClientContext, ClientHandle,
};
use caravel_core::{world, SettingsStore};
use caravel_net::Progress;
use caravel_plugin_host::{
    load_from_repository, load_plugins, BulkLoadReport, ExitOutcome, PluginRegistry,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "caravel", version, about = "Launcher and plugin host for the Caravel client")]
struct Cli {
    /// Game world to connect to. Ignored with a warning if its host does
    /// not resolve.
    #[arg(long)]
    world: Option<u32>,

    /// Directory for the cached client, downloaded plugins, and settings.
    /// Defaults to `~/.caravel`; if unusable, Caravel runs cacheless.
    #[arg(long, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// Plugin archive to load: a local path or an http(s) bundle address.
    /// May be given multiple times.
    #[arg(long = "plugin", value_name = "SOURCE")]
    plugins: Vec<String>,

    /// Also load every plugin listed by the configured repository index.
    #[arg(long)]
    from_repository: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Cli::parse();

    let storage_dir = resolve_storage_dir(args.storage_dir);
    let settings = SettingsStore::load(storage_dir.as_deref());

    if let Some(world) = args.world {
        if world::is_valid_world(world) {
            settings.set_default_world(world);
        } else {
            log::warn!("world {world} does not resolve, ignoring the argument");
        }
    } else if !world::is_valid_world(settings.default_world()) {
        log::warn!(
            "configured world {} does not resolve, falling back to {}",
            settings.default_world(),
            world::DEFAULT_WORLD
        );
        settings.reset_default_world();
    }
    let world = settings.default_world();

    // Load plugins while the client downloads; they are only started once a
    // client handle exists.
    let registry = PluginRegistry::new();
    let plugins_dir = storage_dir.as_ref().map(|dir| dir.join("plugins"));
    let report = load_plugins(&registry, &args.plugins, plugins_dir.as_deref());
    log_bulk_report(&report);
    if args.from_repository {
        match load_repository_plugins(&registry, &settings, plugins_dir.as_deref()) {
            Ok(report) => log_bulk_report(&report),
            Err(err) => log::warn!("could not load plugins from the repository: {err:#}"),
        }
    }

    let acquisition = acquire_async(world, storage_dir.clone());
    let binary = wait_for_client(&acquisition)?;

    let parameters = caravel_net::fetch_parameters(world).unwrap_or_else(|err| {
        log::warn!("could not fetch client parameters: {err}");
        HashMap::new()
    });
    let client = ClientHandle::load(&binary, ClientContext::new(world, parameters))
        .context("could not start the client")?;

    registry.start_all(&client);
    log::info!(
        "hosting {} plugin(s) against world {world}",
        registry.len()
    );

    run_until_shutdown(&registry)?;

    registry.stop_all();
    for handle in registry.plugins() {
        registry.remove(handle.id());
    }
    if let Err(err) = settings.save() {
        log::warn!("could not save settings: {err:#}");
    }
    Ok(())
}

/// Picks the storage directory: the explicit argument, else `~/.caravel`.
/// Returns `None` (cacheless mode) when the directory cannot be created or
/// written.
fn resolve_storage_dir(requested: Option<PathBuf>) -> Option<PathBuf> {
    let dir = requested.or_else(|| dirs::home_dir().map(|home| home.join(".caravel")))?;
    if let Err(err) = fs::create_dir_all(&dir) {
        log::warn!(
            "could not create the storage directory at {}: {err}",
            dir.display()
        );
        return None;
    }
    let probe = dir.join(".write-probe");
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            Some(dir)
        }
        Err(err) => {
            log::warn!(
                "storage directory at {} is not writable: {err}",
                dir.display()
            );
            None
        }
    }
}

/// Polls the acquisition worker, logging progress, until it completes.
/// Acquisition failure is terminal: without a client there is nothing to
/// host.
fn wait_for_client(acquisition: &AcquireHandle) -> Result<Arc<ClientBinary>> {
    let mut last_progress = None;
    loop {
        match acquisition.snapshot() {
            AcquireState::Completed(binary) => return Ok(binary),
            AcquireState::Failed(reason) => {
                anyhow::bail!("could not acquire the client: {reason}")
            }
            AcquireState::Checking => {}
            AcquireState::Downloading(progress) => {
                if last_progress != Some(progress) {
                    match progress {
                        Progress::Percent(percent) => {
                            log::info!("downloading the client: {percent}%")
                        }
                        Progress::Indeterminate => log::info!("downloading the client..."),
                    }
                    last_progress = Some(progress);
                }
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Loads the repository index from settings, falling back to the default
/// index once if the configured one cannot be fetched.
fn load_repository_plugins(
    registry: &PluginRegistry,
    settings: &SettingsStore,
    plugins_dir: Option<&std::path::Path>,
) -> Result<BulkLoadReport> {
    match load_from_repository(registry, &settings.plugin_repository(), plugins_dir) {
        Ok(report) => Ok(report),
        Err(err) if !settings.has_default_plugin_repository() => {
            log::warn!(
                "configured plugin repository failed ({err:#}); retrying with the default"
            );
            settings.reset_plugin_repository();
            load_from_repository(registry, &settings.plugin_repository(), plugins_dir)
        }
        Err(err) => Err(err),
    }
}

fn log_bulk_report(report: &BulkLoadReport) {
    for name in &report.loaded {
        log::info!("loaded plugin {name}");
    }
    for failure in &report.failures {
        log::warn!(
            "plugin at {} was skipped: {:#}",
            failure.address,
            failure.error
        );
    }
}

/// Blocks until ctrl-c, reaping plugins whose loops exit in the meantime.
fn run_until_shutdown(registry: &PluginRegistry) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("could not install the shutdown handler")?;

    loop {
        crossbeam_channel::select! {
            recv(shutdown_rx) -> _ => {
                log::info!("shutdown requested");
                return Ok(());
            }
            recv(registry.events()) -> event => {
                if let Ok(event) = event {
                    match &event.outcome {
                        ExitOutcome::Stopped => log::info!("plugin {} stopped", event.name),
                        ExitOutcome::Failed(reason) => {
                            log::warn!("plugin {} failed: {reason}", event.name)
                        }
                    }
                    registry.remove(event.id);
                }
            }
        }
    }
}
