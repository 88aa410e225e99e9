//! Helpers for filesystem manipulations

use crate::errors::{Error, Result};

/// Normalizes a request path into a webroot-relative path.
///
/// The following operations are performed:
///
/// 1. The leading `'/'` is stripped; a path that doesn't start with one is
///    not in origin form and is rejected.
/// 2. Runs of `'/'` collapse into a single `'/'`.
/// 3. Percent-encoded bytes are decoded; bogus encodings like `b"%zz"` are
///    rejected.
pub fn normalize_path(path: &[u8]) -> Result<Vec<u8>> {
    if path.first() != Some(&b'/') {
        return Err(Error::PathNotInOriginForm);
    }

    let mut normalized = Vec::with_capacity(path.len() - 1);
    let mut rest = &path[1..];

    while let Some(&byte) = rest.first() {
        match byte {
            b'/' => {
                // collapse the whole run; drop it entirely at the front
                if !normalized.is_empty() {
                    normalized.push(b'/');
                }
                while rest.first() == Some(&b'/') {
                    rest = &rest[1..];
                }
            }
            b'%' => {
                if rest.len() < 3 {
                    return Err(Error::IllegalPercentEncoding);
                }
                normalized.push(decode_percent(rest[1], rest[2])?);
                rest = &rest[3..];
            }
            other => {
                normalized.push(other);
                rest = &rest[1..];
            }
        }
    }

    Ok(normalized)
}

fn decode_percent(high: u8, low: u8) -> Result<u8> {
    let high = hexit_value(high)?;
    let low = hexit_value(low)?;
    Ok(high << 4 | low)
}

fn hexit_value(x: u8) -> Result<u8> {
    match x {
        b'0'..=b'9' => Ok(x - b'0'),
        b'A'..=b'F' => Ok(x - b'A' + 10),
        b'a'..=b'f' => Ok(x - b'a' + 10),
        _ => Err(Error::IllegalPercentEncoding),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strips_leading_slashes() {
        assert_eq!(normalize_path(b"/blah").unwrap(), b"blah");
        assert_eq!(normalize_path(b"//bleh").unwrap(), b"bleh");
    }

    #[test]
    fn collapses_embedded_slash_runs() {
        assert_eq!(normalize_path(b"/foo//bar").unwrap(), b"foo/bar");
        assert_eq!(normalize_path(b"/foo///bar/baz").unwrap(), b"foo/bar/baz");
    }

    #[test]
    fn decodes_percent_sequences() {
        assert_eq!(normalize_path(b"/foo%20bar").unwrap(), b"foo bar");
        assert_eq!(normalize_path(b"/trail%20").unwrap(), b"trail ");
        assert_eq!(normalize_path(b"/%2F").unwrap(), b"/");
    }

    #[test]
    fn rejects_bogus_percent_sequences() {
        assert!(normalize_path(b"/bog%us").is_err());
        assert!(normalize_path(b"/short%2").is_err());
    }

    #[test]
    fn rejects_paths_not_in_origin_form() {
        assert!(normalize_path(b"bogus").is_err());
        assert!(normalize_path(b"").is_err());
    }
}
