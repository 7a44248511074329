//! Blocking HTTP fetches with percentage progress reporting.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::stream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress of an in-flight download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The remote did not report a content length.
    Indeterminate,
    /// Percentage of the declared content length received so far.
    Percent(u8),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Fetches `url`, reporting progress as the body arrives.
///
/// With a known content length the callback sees `Percent` values that are
/// strictly increasing, starting at 0 and ending at 100, each value at most
/// once. Without one it sees a single `Indeterminate`. The body is fully
/// buffered before this returns.
pub fn fetch_with_progress(
    url: &str,
    mut on_progress: impl FnMut(Progress),
) -> Result<Vec<u8>, DownloadError> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None)
        .build()?;
    let response = client.get(url).send()?;
    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }

    match response.content_length() {
        Some(total) if total > 0 => {
            on_progress(Progress::Percent(0));
            let mut received = 0u64;
            let mut reported = 0u8;
            let bytes = stream::read_to_end_with_progress(response, |chunk| {
                received += chunk as u64;
                let percent = (received.saturating_mul(100) / total).min(100) as u8;
                if percent > reported {
                    reported = percent;
                    on_progress(Progress::Percent(percent));
                }
            })?;
            if reported < 100 {
                on_progress(Progress::Percent(100));
            }
            Ok(bytes)
        }
        _ => {
            on_progress(Progress::Indeterminate);
            Ok(stream::read_to_end_with_progress(response, |_| {})?)
        }
    }
}

/// Fetches `url` without progress reporting.
pub fn fetch_bytes(url: &str) -> Result<Vec<u8>, DownloadError> {
    fetch_with_progress(url, |_| {})
}

/// Fetches `url` and interprets the body as UTF-8 text.
pub fn fetch_text(url: &str) -> Result<String, DownloadError> {
    let bytes = fetch_bytes(url)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// One-shot HTTP server answering a single request with `body`.
    fn http_fixture(body: Vec<u8>, with_length: bool) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let mut seen = Vec::new();
            loop {
                let read = socket.read(&mut request).unwrap();
                seen.extend_from_slice(&request[..read]);
                if read == 0 || seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let header = if with_length {
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
            } else {
                "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string()
            };
            socket.write_all(header.as_bytes()).unwrap();
            socket.write_all(&body).unwrap();
        });
        (format!("http://{address}/pack"), server)
    }

    #[test]
    fn known_length_reports_bounded_monotonic_percentages() {
        let body = vec![42u8; 64 * 1024];
        let (url, server) = http_fixture(body.clone(), true);

        let mut seen = Vec::new();
        let bytes = fetch_with_progress(&url, |progress| seen.push(progress)).unwrap();
        server.join().unwrap();

        assert_eq!(bytes, body);
        assert_eq!(seen.first(), Some(&Progress::Percent(0)));
        assert_eq!(seen.last(), Some(&Progress::Percent(100)));
        let percents: Vec<u8> = seen
            .iter()
            .map(|progress| match progress {
                Progress::Percent(value) => *value,
                Progress::Indeterminate => panic!("unexpected indeterminate progress"),
            })
            .collect();
        assert!(percents.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(percents.iter().filter(|&&value| value == 0).count(), 1);
        assert_eq!(percents.iter().filter(|&&value| value == 100).count(), 1);
    }

    #[test]
    fn unknown_length_reports_indeterminate_once() {
        let body = vec![7u8; 4096];
        let (url, server) = http_fixture(body.clone(), false);

        let mut seen = Vec::new();
        let bytes = fetch_with_progress(&url, |progress| seen.push(progress)).unwrap();
        server.join().unwrap();

        assert_eq!(bytes, body);
        assert_eq!(seen, vec![Progress::Indeterminate]);
    }

    #[test]
    fn error_status_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).unwrap();
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
        });

        let result = fetch_bytes(&format!("http://{address}/pack"));
        server.join().unwrap();
        assert!(matches!(result, Err(DownloadError::Status(status)) if status.as_u16() == 404));
    }
}
