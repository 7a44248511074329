//! Client pack acquisition: prefer a cached copy whose revision the oracle
//! confirms as current, otherwise download a fresh one.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use caravel_core::world;
use caravel_net::{DownloadError, Progress};
use parking_lot::Mutex;
use thiserror::Error;

use crate::binary::{BinaryOrigin, ClientBinary};

/// File name of the cached client pack inside the storage directory.
pub const CLIENT_PACK_FILE: &str = "clientpack";

const CLIENT_PACK_PART_FILE: &str = "clientpack.part";

/// Acquisition is the one failure the launcher surfaces as terminal: without
/// a client there is nothing to host.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("could not download the client: {0}")]
    Download(#[from] DownloadError),
    #[error("could not store the client: {0}")]
    Io(#[from] std::io::Error),
}

/// Answers whether a revision is the current one. The production
/// implementation asks the remote oracle; tests substitute verdicts.
pub trait VersionOracle {
    fn is_current(&self, revision: u16) -> bool;
}

/// Oracle backed by the version handshake against the default world host.
#[derive(Debug, Default)]
pub struct RemoteOracle;

impl VersionOracle for RemoteOracle {
    fn is_current(&self, revision: u16) -> bool {
        caravel_net::is_current(revision)
    }
}

/// Snapshot of the acquisition worker's progress.
#[derive(Debug, Clone)]
pub enum AcquireState {
    Checking,
    Downloading(Progress),
    Completed(Arc<ClientBinary>),
    Failed(String),
}

/// Handle returned by [`acquire_async`] for polling progress off the worker
/// thread.
#[derive(Clone)]
pub struct AcquireHandle {
    state: Arc<Mutex<AcquireState>>,
}

impl AcquireHandle {
    pub fn snapshot(&self) -> AcquireState {
        self.state.lock().clone()
    }
}

/// Acquires the client pack for `world` on a background thread.
pub fn acquire_async(world: u32, storage_dir: Option<PathBuf>) -> AcquireHandle {
    let state = Arc::new(Mutex::new(AcquireState::Checking));
    let state_for_thread = Arc::clone(&state);
    thread::spawn(move || {
        let url = world::client_pack_url(world);
        let result = acquire(&url, &RemoteOracle, storage_dir.as_deref(), |progress| {
            *state_for_thread.lock() = AcquireState::Downloading(progress);
        });
        *state_for_thread.lock() = match result {
            Ok(binary) => AcquireState::Completed(Arc::new(binary)),
            Err(err) => {
                log::error!("client acquisition failed: {err}");
                AcquireState::Failed(err.to_string())
            }
        };
    });
    AcquireHandle { state }
}

/// Produces a usable client pack from `pack_url`, consulting `oracle` to
/// decide whether a cached copy is still current.
///
/// A successful download is fully buffered, written to a `.part` file, and
/// renamed into place so the cache is never left half-written. Without a
/// storage directory the bytes stay in memory.
pub fn acquire(
    pack_url: &str,
    oracle: &dyn VersionOracle,
    storage_dir: Option<&Path>,
    mut report: impl FnMut(Progress),
) -> Result<ClientBinary, AcquireError> {
    let Some(dir) = storage_dir else {
        log::info!("no writable storage directory, streaming the client into memory");
        let bytes = caravel_net::fetch_with_progress(pack_url, &mut report)?;
        return Ok(ClientBinary::from_bytes(bytes));
    };

    let cached = dir.join(CLIENT_PACK_FILE);
    if cached.is_file() {
        match ClientBinary::from_file(&cached, BinaryOrigin::Cache) {
            Ok(binary) => match binary.revision() {
                Some(revision) if oracle.is_current(revision) => {
                    log::info!("cached client revision {revision} is current");
                    return Ok(binary);
                }
                Some(revision) => {
                    log::info!("cached client revision {revision} is out of date");
                }
                None => {
                    log::warn!("no revision found in the cached client, treating it as out of date");
                }
            },
            Err(err) => log::warn!("could not read the cached client: {err}"),
        }
    }

    let bytes = caravel_net::fetch_with_progress(pack_url, &mut report)?;
    let part = dir.join(CLIENT_PACK_PART_FILE);
    fs::write(&part, &bytes)?;
    fs::rename(&part, &cached)?;
    log::info!("downloaded a fresh client to {}", cached.display());
    Ok(ClientBinary::from_file(cached, BinaryOrigin::Download)?)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use caravel_net::REVISION_MARKER;
    use tempfile::tempdir;

    use super::*;

    struct FixedOracle(bool);

    impl VersionOracle for FixedOracle {
        fn is_current(&self, _revision: u16) -> bool {
            self.0
        }
    }

    fn pack_with_revision(revision: u16) -> Vec<u8> {
        let mut bytes = vec![3u8; 64];
        bytes.extend_from_slice(&REVISION_MARKER);
        bytes.extend_from_slice(&revision.to_be_bytes());
        bytes
    }

    fn pack_server(body: Vec<u8>) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).unwrap();
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(header.as_bytes()).unwrap();
            socket.write_all(&body).unwrap();
        });
        (format!("http://{address}/clientpack"), server)
    }

    #[test]
    fn current_cache_is_reused_without_downloading() {
        let dir = tempdir().unwrap();
        let pack = pack_with_revision(200);
        fs::write(dir.path().join(CLIENT_PACK_FILE), &pack).unwrap();

        // The URL is never fetched; an unresolvable host proves it.
        let binary = acquire(
            "http://pack.invalid/clientpack",
            &FixedOracle(true),
            Some(dir.path()),
            |_| {},
        )
        .unwrap();
        assert_eq!(binary.origin(), BinaryOrigin::Cache);
        assert_eq!(binary.bytes(), pack.as_slice());
    }

    #[test]
    fn outdated_cache_triggers_a_fresh_download() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CLIENT_PACK_FILE), pack_with_revision(100)).unwrap();

        let fresh = pack_with_revision(101);
        let (url, server) = pack_server(fresh.clone());
        let binary = acquire(&url, &FixedOracle(false), Some(dir.path()), |_| {}).unwrap();
        server.join().unwrap();

        assert_eq!(binary.origin(), BinaryOrigin::Download);
        assert_eq!(binary.bytes(), fresh.as_slice());
        assert_eq!(
            fs::read(dir.path().join(CLIENT_PACK_FILE)).unwrap(),
            fresh
        );
        assert!(!dir.path().join(CLIENT_PACK_PART_FILE).exists());
    }

    #[test]
    fn markerless_cache_is_treated_as_stale() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CLIENT_PACK_FILE), vec![0u8; 50]).unwrap();

        let fresh = pack_with_revision(55);
        let (url, server) = pack_server(fresh.clone());
        // The oracle would say "current", but extraction never gets that far.
        let binary = acquire(&url, &FixedOracle(true), Some(dir.path()), |_| {}).unwrap();
        server.join().unwrap();
        assert_eq!(binary.origin(), BinaryOrigin::Download);
        assert_eq!(binary.bytes(), fresh.as_slice());
    }

    #[test]
    fn missing_storage_directory_streams_into_memory() {
        let fresh = pack_with_revision(77);
        let (url, server) = pack_server(fresh.clone());
        let mut saw_progress = false;
        let binary = acquire(&url, &FixedOracle(true), None, |_| saw_progress = true).unwrap();
        server.join().unwrap();
        assert_eq!(binary.origin(), BinaryOrigin::Memory);
        assert_eq!(binary.revision(), Some(77));
        assert!(saw_progress);
    }

    #[test]
    fn download_failure_is_terminal() {
        let dir = tempdir().unwrap();
        let result = acquire(
            "http://pack.invalid/clientpack",
            &FixedOracle(false),
            Some(dir.path()),
            |_| {},
        );
        assert!(matches!(result, Err(AcquireError::Download(_))));
        assert!(!dir.path().join(CLIENT_PACK_FILE).exists());
    }
}
