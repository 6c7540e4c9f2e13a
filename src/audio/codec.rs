//! # Base64 Byte Codec
//!
//! The synthesis service returns audio as standard Base64 text. This module
//! turns that text back into the exact bytes it represents.

use crate::audio::{AudioError, RawAudio};
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

/// Standard alphabet with canonical padding. Non-zero bits left over in the
/// final character are ignored, matching browser `atob`.
const ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Decode standard-alphabet Base64 into raw bytes.
///
/// ## Rules:
/// - ASCII whitespace is stripped before decoding
/// - Padding is accepted, but the stripped length must be a multiple of 4
/// - Unused trailing bits in the last symbol are ignored (`TR==` decodes like `TQ==`)
/// - Any character outside the alphabet fails with `MalformedEncoding`
///
/// ## Returns:
/// - **Ok(RawAudio)**: The decoded bytes, `len * 3 / 4` minus padding
/// - **Err(AudioError::MalformedEncoding)**: Input was not valid Base64
pub fn decode(text: &str) -> Result<RawAudio, AudioError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if compact.len() % 4 != 0 {
        return Err(AudioError::MalformedEncoding(format!(
            "length {} is not a multiple of 4",
            compact.len()
        )));
    }

    ENGINE
        .decode(compact.as_bytes())
        .map(RawAudio::from)
        .map_err(|e| AudioError::MalformedEncoding(e.to_string()))
}

/// Encode raw bytes as padded standard Base64.
pub fn encode(bytes: &[u8]) -> String {
    ENGINE.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_values() {
        assert_eq!(&*decode("AIA=").unwrap(), &[0x00, 0x80]);
        assert_eq!(&*decode("/38=").unwrap(), &[0xFF, 0x7F]);
        assert_eq!(&*decode("TWFu").unwrap(), b"Man");
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_various_lengths() {
        // Lengths 0..=7 cover every padding case
        for len in 0..8u8 {
            let bytes: Vec<u8> = (0..len).map(|i| i.wrapping_mul(37).wrapping_add(200)).collect();
            let encoded = encode(&bytes);
            assert_eq!(&*decode(&encoded).unwrap(), bytes.as_slice());
        }
    }

    #[test]
    fn test_whitespace_is_stripped() {
        assert_eq!(&*decode(" TW\nFu \t").unwrap(), b"Man");
    }

    #[test]
    fn test_rejects_bad_length() {
        let err = decode("TWF").unwrap_err();
        assert!(matches!(err, AudioError::MalformedEncoding(_)));
    }

    #[test]
    fn test_rejects_characters_outside_alphabet() {
        assert!(matches!(decode("TW*u"), Err(AudioError::MalformedEncoding(_))));
        // URL-safe alphabet is not the standard one
        assert!(matches!(decode("_-8="), Err(AudioError::MalformedEncoding(_))));
    }

    #[test]
    fn test_rejects_misplaced_padding() {
        assert!(matches!(decode("T=Fu"), Err(AudioError::MalformedEncoding(_))));
        assert!(matches!(decode("TQ=="), Ok(_)));
        assert!(matches!(decode("TQ=A"), Err(AudioError::MalformedEncoding(_))));
    }

    #[test]
    fn test_trailing_bits_are_ignored() {
        assert_eq!(&*decode("TR==").unwrap(), b"M");
        assert_eq!(&*decode("TWG=").unwrap(), b"Ma");
        assert_eq!(encode(b"M"), "TQ==");
    }
}
