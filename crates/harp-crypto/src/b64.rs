//! URL-safe base64 used by every key string and wire-adjacent text field.
//!
//! Encoding is unpadded; decoding accepts padded and unpadded input.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use harp_core::{HarpError, HarpResult};
use zeroize::Zeroizing;

use crate::secret::SecretBuffer;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode(data: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(data)
}

pub fn decode(text: &str) -> HarpResult<Vec<u8>> {
    URL_SAFE_LENIENT
        .decode(text.trim())
        .map_err(|e| HarpError::input(format!("base64url decode: {e}")))
}

/// Decode secret material straight into a [`SecretBuffer`], wiping the
/// intermediate allocation. Errors are reported as invalid key material.
pub fn decode_secret(text: &str) -> HarpResult<SecretBuffer> {
    let raw = Zeroizing::new(
        URL_SAFE_LENIENT
            .decode(text.trim())
            .map_err(|_| HarpError::key_material("key payload is not valid base64url"))?,
    );
    Ok(SecretBuffer::from_slice(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_padding() {
        assert_eq!(decode("YQ==").unwrap(), b"a");
        assert_eq!(decode("YQ").unwrap(), b"a");
    }

    #[test]
    fn test_encode_is_unpadded_url_safe() {
        assert_eq!(encode(&[0xfb, 0xff]), "-_8");
    }

    #[test]
    fn test_decode_secret_rejects_garbage() {
        let err = decode_secret("not base64 !!").unwrap_err();
        assert!(matches!(err, HarpError::InvalidKeyMaterial(_)));
    }
}
