//! Smol utilities for logging

use std::ascii;

/// Renders raw bytes as an ASCII-safe string for log lines
pub fn ascii_escape(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|&b| ascii::escape_default(b))
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escapes_control_and_high_bytes() {
        assert_eq!(ascii_escape(b"ok"), "ok");
        assert_eq!(ascii_escape(b"\r\n"), "\\r\\n");
        assert_eq!(ascii_escape(&[0xff]), "\\xff");
    }
}
