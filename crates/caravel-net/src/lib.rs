//! Network plumbing for the Caravel launcher: byte-stream helpers, the
//! revision oracle handshake, progress-reporting HTTP downloads, and the
//! client parameter page.

mod download;
mod params;
mod revision;
pub mod stream;

pub use download::{fetch_bytes, fetch_text, fetch_with_progress, DownloadError, Progress};
pub use params::{fetch_parameters, parse_parameters};
pub use revision::{extract_revision, is_current, is_current_at, REVISION_MARKER};
