//! UCS2 hex decoding for SMS bodies.
//!
//! In text mode with a UCS2 character set the modem reports message bodies
//! as a hex string of big-endian 16-bit code units (`0041` is `A`).

use gsmlink_core::{Error, Result};

/// Decode a UCS2 hex string.
///
/// Fails with [`Error::Decode`] if the input is not hex or does not hold a
/// whole number of 16-bit code units. Unpaired surrogates are replaced
/// with U+FFFD.
pub fn decode_ucs2(hex_text: &str) -> Result<String> {
    let bytes = hex::decode(hex_text.trim())
        .map_err(|e| Error::Decode(format!("invalid UCS2 hex: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "UCS2 payload is {} bytes, not a whole number of code units",
            bytes.len()
        )));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Decode `text` as UCS2 hex, returning it unchanged if that fails.
pub fn decode_ucs2_or_raw(text: &str) -> String {
    match decode_ucs2(text) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::trace!(error = %e, "body is not UCS2, keeping raw text");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_code_unit() {
        assert_eq!(decode_ucs2("0041").unwrap(), "A");
    }

    #[test]
    fn decodes_vietnamese_text() {
        // "Xin chào"
        assert_eq!(
            decode_ucs2("00580069006E0020006300680061002000E0006F").unwrap(),
            "Xin cha\u{e0}o"
        );
    }

    #[test]
    fn decodes_surrogate_pair() {
        assert_eq!(decode_ucs2("D83DDE00").unwrap(), "\u{1F600}");
    }

    #[test]
    fn odd_hex_length_is_decode_error() {
        assert!(matches!(decode_ucs2("004"), Err(Error::Decode(_))));
    }

    #[test]
    fn odd_byte_length_is_decode_error() {
        assert!(matches!(decode_ucs2("004142"), Err(Error::Decode(_))));
    }

    #[test]
    fn non_hex_is_decode_error() {
        assert!(matches!(decode_ucs2("Hello there"), Err(Error::Decode(_))));
    }

    #[test]
    fn fallback_keeps_raw_text() {
        assert_eq!(decode_ucs2_or_raw("004"), "004");
        assert_eq!(decode_ucs2_or_raw("Hi mom"), "Hi mom");
        assert_eq!(decode_ucs2_or_raw("0041"), "A");
    }
}
