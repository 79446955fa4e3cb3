//! String encoding conversion for packet payloads.
//!
//! The client speaks three encodings: UTF-8, CP932 (Japanese) and CP1252
//! (western). CP932 and CP1252 go through encoding_rs; UTF-8 is handled
//! directly.

use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

use crate::error::PacketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Cp932,
    Cp1252,
}

/// Encode `s` into raw bytes, optionally appending a NUL terminator.
pub fn to_bytes(encoding: Encoding, s: &str, null_terminate: bool) -> Result<Vec<u8>, PacketError> {
    let mut out = match encoding {
        Encoding::Utf8 => s.as_bytes().to_vec(),
        Encoding::Cp932 => {
            let (bytes, _, had_errors) = SHIFT_JIS.encode(s);
            if had_errors {
                return Err(PacketError::BadEncoding);
            }
            bytes.into_owned()
        }
        Encoding::Cp1252 => {
            let (bytes, _, had_errors) = WINDOWS_1252.encode(s);
            if had_errors {
                return Err(PacketError::BadEncoding);
            }
            bytes.into_owned()
        }
    };

    if null_terminate {
        out.push(0);
    }

    Ok(out)
}

/// Decode raw bytes into a string. The bytes must not contain an embedded
/// NUL terminator; trim it before calling.
pub fn from_bytes(encoding: Encoding, bytes: &[u8]) -> Result<String, PacketError> {
    match encoding {
        Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| PacketError::BadEncoding),
        Encoding::Cp932 => {
            let (s, _, had_errors) = SHIFT_JIS.decode(bytes);
            if had_errors {
                return Err(PacketError::BadEncoding);
            }
            Ok(s.into_owned())
        }
        Encoding::Cp1252 => {
            let (s, _, had_errors) = WINDOWS_1252.decode(bytes);
            if had_errors {
                return Err(PacketError::BadEncoding);
            }
            Ok(s.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_roundtrip() {
        let bytes = to_bytes(Encoding::Utf8, "hello", false).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(from_bytes(Encoding::Utf8, &bytes).unwrap(), "hello");
    }

    #[test]
    fn test_cp932_roundtrip() {
        let bytes = to_bytes(Encoding::Cp932, "日本語", false).unwrap();
        // Shift-JIS encodes each of these as two bytes.
        assert_eq!(bytes.len(), 6);
        assert_eq!(from_bytes(Encoding::Cp932, &bytes).unwrap(), "日本語");
    }

    #[test]
    fn test_cp1252_roundtrip() {
        let bytes = to_bytes(Encoding::Cp1252, "café", false).unwrap();
        assert_eq!(bytes, [0x63, 0x61, 0x66, 0xE9]);
        assert_eq!(from_bytes(Encoding::Cp1252, &bytes).unwrap(), "café");
    }

    #[test]
    fn test_null_terminator() {
        let bytes = to_bytes(Encoding::Utf8, "ab", true).unwrap();
        assert_eq!(bytes, [b'a', b'b', 0]);
    }

    #[test]
    fn test_unencodable_fails() {
        // CP1252 has no mapping for kanji.
        assert!(to_bytes(Encoding::Cp1252, "日", false).is_err());
    }
}
