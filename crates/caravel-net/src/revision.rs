//! Revision discovery and the oracle handshake.
//!
//! The client pack embeds its revision as a big-endian `u16` directly after
//! a fixed marker sequence. The marker is an artifact of how the pack is
//! produced, so extraction is best-effort: a miss means "assume outdated",
//! never a hard failure. Likewise the oracle handshake maps every I/O
//! problem to "not current" so an unreachable oracle cannot block startup.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use caravel_core::world;

use crate::stream;

/// Marker bytes preceding the embedded revision.
pub const REVISION_MARKER: [u8; 7] = [17, 2, 0xFD, 17, 1, 0xF7, 17];

const HANDSHAKE_OPCODE: u8 = 15;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Scans `bytes` for the revision marker and reads the revision that
/// follows it. Returns `None` when the marker is absent or truncated.
pub fn extract_revision(bytes: &[u8]) -> Option<u16> {
    let marker = stream::find_pattern(bytes, &REVISION_MARKER)?;
    let start = marker + REVISION_MARKER.len();
    let tail = bytes.get(start..start + 2)?;
    Some(u16::from_be_bytes([tail[0], tail[1]]))
}

/// Asks the default oracle whether `revision` is the current one.
pub fn is_current(revision: u16) -> bool {
    let host = world::host_for_world(world::DEFAULT_WORLD);
    is_current_at((host.as_str(), world::ORACLE_PORT), revision)
}

/// Asks the oracle at `endpoint` whether `revision` is the current one.
/// Any I/O failure is treated as "not current".
pub fn is_current_at<A: ToSocketAddrs>(endpoint: A, revision: u16) -> bool {
    match handshake(endpoint, revision) {
        Ok(current) => current,
        Err(err) => {
            log::debug!("revision handshake failed, treating {revision} as outdated: {err}");
            false
        }
    }
}

fn handshake<A: ToSocketAddrs>(endpoint: A, revision: u16) -> io::Result<bool> {
    let address = endpoint.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "oracle endpoint did not resolve")
    })?;
    let mut socket = TcpStream::connect_timeout(&address, HANDSHAKE_TIMEOUT)?;
    socket.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    socket.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let mut request = [0u8; 5];
    request[0] = HANDSHAKE_OPCODE;
    request[1..].copy_from_slice(&i32::from(revision).to_be_bytes());
    socket.write_all(&request)?;
    socket.flush()?;

    let mut response = [0u8; 1];
    socket.read_exact(&mut response)?;
    Ok(response[0] == 0)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn extracts_revision_after_marker() {
        let mut bytes = vec![0u8; 32];
        bytes.extend_from_slice(&REVISION_MARKER);
        bytes.extend_from_slice(&231u16.to_be_bytes());
        bytes.extend_from_slice(&[9, 9, 9]);
        assert_eq!(extract_revision(&bytes), Some(231));
    }

    #[test]
    fn extracts_revision_at_buffer_start_and_max_value() {
        let mut bytes = REVISION_MARKER.to_vec();
        bytes.extend_from_slice(&u16::MAX.to_be_bytes());
        assert_eq!(extract_revision(&bytes), Some(u16::MAX));
    }

    #[test]
    fn missing_marker_yields_none() {
        assert_eq!(extract_revision(&[0u8; 50]), None);
    }

    #[test]
    fn truncated_revision_yields_none() {
        let mut bytes = vec![1, 2, 3];
        bytes.extend_from_slice(&REVISION_MARKER);
        bytes.push(0);
        assert_eq!(extract_revision(&bytes), None);
    }

    fn oracle_fixture(respond: Option<u8>) -> (std::net::SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 5];
            socket.read_exact(&mut request).unwrap();
            if let Some(byte) = respond {
                socket.write_all(&[byte]).unwrap();
            }
            request.to_vec()
        });
        (address, server)
    }

    #[test]
    fn zero_response_means_current() {
        let (address, server) = oracle_fixture(Some(0));
        assert!(is_current_at(address, 231));
        let request = server.join().unwrap();
        assert_eq!(request[0], 15);
        assert_eq!(&request[1..], &231i32.to_be_bytes());
    }

    #[test]
    fn nonzero_response_means_outdated() {
        let (address, server) = oracle_fixture(Some(1));
        assert!(!is_current_at(address, 231));
        server.join().unwrap();
    }

    #[test]
    fn dropped_connection_means_outdated() {
        let (address, server) = oracle_fixture(None);
        assert!(!is_current_at(address, 231));
        server.join().unwrap();
    }

    #[test]
    fn unreachable_oracle_means_outdated() {
        // Bind-then-drop guarantees nothing is listening on the port.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        assert!(!is_current_at(address, 231));
    }
}
