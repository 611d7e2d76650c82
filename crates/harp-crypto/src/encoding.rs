//! Reversible text encodings (`encoding:<name>`).

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use data_encoding::{BASE32, BASE32HEX};
use harp_core::{HarpError, HarpResult};

use crate::transformer::{TransformContext, Transformer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Hex,
    Base32,
    Base32Hex,
    Base64,
    Base64Raw,
    Base64Url,
    Base64UrlRaw,
    Base85,
}

impl Encoding {
    pub fn from_name(name: &str) -> HarpResult<Self> {
        let enc = match name.to_ascii_lowercase().as_str() {
            "identity" => Self::Identity,
            "hex" | "base16" => Self::Hex,
            "base32" => Self::Base32,
            "base32hex" => Self::Base32Hex,
            "base64" => Self::Base64,
            "base64raw" => Self::Base64Raw,
            "base64url" => Self::Base64Url,
            "base64urlraw" => Self::Base64UrlRaw,
            "base85" | "ascii85" => Self::Base85,
            other => {
                return Err(HarpError::UnsupportedPrimitive(format!(
                    "encoding:{other}"
                )))
            }
        };
        Ok(enc)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Hex => "hex",
            Self::Base32 => "base32",
            Self::Base32Hex => "base32hex",
            Self::Base64 => "base64",
            Self::Base64Raw => "base64raw",
            Self::Base64Url => "base64url",
            Self::Base64UrlRaw => "base64urlraw",
            Self::Base85 => "base85",
        }
    }

    pub fn encode(&self, input: &[u8]) -> Vec<u8> {
        match self {
            Self::Identity => input.to_vec(),
            Self::Hex => hex::encode(input).into_bytes(),
            Self::Base32 => BASE32.encode(input).into_bytes(),
            Self::Base32Hex => BASE32HEX.encode(input).into_bytes(),
            Self::Base64 => STANDARD.encode(input).into_bytes(),
            Self::Base64Raw => STANDARD_NO_PAD.encode(input).into_bytes(),
            Self::Base64Url => URL_SAFE.encode(input).into_bytes(),
            Self::Base64UrlRaw => URL_SAFE_NO_PAD.encode(input).into_bytes(),
            Self::Base85 => ascii85::encode(input),
        }
    }

    pub fn decode(&self, input: &[u8]) -> HarpResult<Vec<u8>> {
        let fail = |e: &dyn std::fmt::Display| {
            HarpError::input(format!("invalid {} input: {e}", self.name()))
        };
        match self {
            Self::Identity => Ok(input.to_vec()),
            Self::Hex => hex::decode(trim_ascii(input)).map_err(|e| fail(&e)),
            Self::Base32 => BASE32.decode(trim_ascii(input)).map_err(|e| fail(&e)),
            Self::Base32Hex => BASE32HEX.decode(trim_ascii(input)).map_err(|e| fail(&e)),
            Self::Base64 => STANDARD.decode(trim_ascii(input)).map_err(|e| fail(&e)),
            Self::Base64Raw => STANDARD_NO_PAD.decode(trim_ascii(input)).map_err(|e| fail(&e)),
            Self::Base64Url => URL_SAFE.decode(trim_ascii(input)).map_err(|e| fail(&e)),
            Self::Base64UrlRaw => URL_SAFE_NO_PAD.decode(trim_ascii(input)).map_err(|e| fail(&e)),
            Self::Base85 => ascii85::decode(input).map_err(|e| fail(&e)),
        }
    }
}

impl Transformer for Encoding {
    fn to(&self, _ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        Ok(self.encode(input))
    }

    fn from(&self, _ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.decode(input)
    }
}

/// Strip surrounding whitespace so values piped through `echo` still decode.
fn trim_ascii(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    let end = input
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &input[start..end]
}

/// ASCII85 with `z` for all-zero groups and no `<~ ~>` delimiters.
mod ascii85 {
    const BASE: u32 = 85;
    const OFFSET: u8 = b'!';

    pub fn encode(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len().div_ceil(4) * 5);
        for chunk in input.chunks(4) {
            let mut group = [0u8; 4];
            group[..chunk.len()].copy_from_slice(chunk);
            let mut value = u32::from_be_bytes(group);

            if chunk.len() == 4 && value == 0 {
                out.push(b'z');
                continue;
            }

            let mut digits = [0u8; 5];
            for d in digits.iter_mut().rev() {
                *d = (value % BASE) as u8 + OFFSET;
                value /= BASE;
            }
            out.extend_from_slice(&digits[..chunk.len() + 1]);
        }
        out
    }

    pub fn decode(input: &[u8]) -> Result<Vec<u8>, String> {
        let mut out = Vec::with_capacity(input.len() / 5 * 4 + 4);
        let mut digits = [0u8; 5];
        let mut n = 0;

        for (pos, &c) in input.iter().enumerate() {
            if c.is_ascii_whitespace() {
                continue;
            }
            if c == b'z' {
                if n != 0 {
                    return Err(format!("'z' inside a group at offset {pos}"));
                }
                out.extend_from_slice(&[0u8; 4]);
                continue;
            }
            if !(OFFSET..=b'u').contains(&c) {
                return Err(format!("invalid character at offset {pos}"));
            }
            digits[n] = c - OFFSET;
            n += 1;
            if n == 5 {
                out.extend_from_slice(&group_value(&digits)?.to_be_bytes());
                n = 0;
            }
        }

        match n {
            0 => {}
            1 => return Err("truncated final group".into()),
            _ => {
                for d in digits.iter_mut().skip(n) {
                    *d = (BASE - 1) as u8;
                }
                let bytes = group_value(&digits)?.to_be_bytes();
                out.extend_from_slice(&bytes[..n - 1]);
            }
        }
        Ok(out)
    }

    fn group_value(digits: &[u8; 5]) -> Result<u32, String> {
        digits
            .iter()
            .try_fold(0u32, |acc, &d| {
                acc.checked_mul(BASE)?.checked_add(u32::from(d))
            })
            .ok_or_else(|| "group overflows 32 bits".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_roundtrip() {
        let data = b"\x00\x01harp secret container\xff\x00\x00\x00\x00";
        for name in [
            "identity",
            "hex",
            "base32",
            "base32hex",
            "base64",
            "base64raw",
            "base64url",
            "base64urlraw",
            "base85",
        ] {
            let enc = Encoding::from_name(name).unwrap();
            let text = enc.encode(data);
            assert_eq!(enc.decode(&text).unwrap(), data, "{name}");
        }
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(Encoding::Base64.encode(b"hello"), b"aGVsbG8=");
        assert_eq!(Encoding::Base64Raw.encode(b"hello"), b"aGVsbG8");
        assert_eq!(Encoding::Base32.encode(b"f"), b"MY======");
        assert_eq!(Encoding::Base85.encode(b"Man "), b"9jqo^");
        assert_eq!(Encoding::Base85.encode(&[0, 0, 0, 0]), b"z");
    }

    #[test]
    fn test_base85_partial_groups() {
        for len in 0..9 {
            let data: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let text = Encoding::Base85.encode(&data);
            assert_eq!(Encoding::Base85.decode(&text).unwrap(), data, "len {len}");
        }
    }

    #[test]
    fn test_decode_trims_whitespace() {
        assert_eq!(Encoding::Hex.decode(b" 6869\n").unwrap(), b"hi");
    }

    #[test]
    fn test_invalid_input() {
        assert!(Encoding::Hex.decode(b"zz").is_err());
        assert!(Encoding::Base85.decode(b"~~~~~").is_err());
        assert!(Encoding::Base85.decode(b"9").is_err());
        assert!(matches!(
            Encoding::Base64.decode(b"@@@").unwrap_err(),
            HarpError::InputValidation(_)
        ));
    }

    #[test]
    fn test_unknown_name() {
        assert!(Encoding::from_name("base58").is_err());
    }

    proptest! {
        #[test]
        fn base85_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=1024)) {
            let text = Encoding::Base85.encode(&data);
            prop_assert!(text.iter().all(|c| c.is_ascii_graphic()));
            prop_assert_eq!(Encoding::Base85.decode(&text).unwrap(), data);
        }
    }
}
