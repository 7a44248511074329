//! Small byte-stream helpers shared by the downloader and the revision
//! scanner.

use std::io::{self, Read};

const CHUNK_SIZE: usize = 8 * 1024;

/// Reads `reader` to completion, invoking `on_chunk` with the size of each
/// chunk as it arrives.
pub fn read_to_end_with_progress<R: Read>(
    mut reader: R,
    mut on_chunk: impl FnMut(usize),
) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&buffer[..read]);
        on_chunk(read);
    }
    Ok(bytes)
}

/// Returns the index of the first occurrence of `needle` in `haystack`.
pub fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_everything_and_reports_chunk_sizes() {
        let data = vec![7u8; 20_000];
        let mut reported = 0usize;
        let bytes = read_to_end_with_progress(&data[..], |chunk| reported += chunk).unwrap();
        assert_eq!(bytes, data);
        assert_eq!(reported, data.len());
    }

    #[test]
    fn empty_reader_reports_nothing() {
        let mut calls = 0;
        let bytes = read_to_end_with_progress(&[][..], |_| calls += 1).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn finds_pattern_at_any_offset() {
        assert_eq!(find_pattern(b"abcdef", b"abc"), Some(0));
        assert_eq!(find_pattern(b"abcdef", b"cde"), Some(2));
        assert_eq!(find_pattern(b"abcdef", b"def"), Some(3));
    }

    #[test]
    fn absent_or_degenerate_patterns_are_not_found() {
        assert_eq!(find_pattern(b"abcdef", b"xyz"), None);
        assert_eq!(find_pattern(b"ab", b"abc"), None);
        assert_eq!(find_pattern(b"abcdef", b""), None);
    }
}
