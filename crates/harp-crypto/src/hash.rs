//! One-way digests (`hash:<name>`).

use blake2::digest::consts::{U32, U48, U64};
use blake2::{Blake2b, Blake2s256};
use harp_core::{HarpError, HarpResult};
use sha2::Digest;

use crate::transformer::{TransformContext, Transformer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md4,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_224,
    Sha512_256,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Blake2b256,
    Blake2b384,
    Blake2b512,
    Blake2s256,
    Ripemd160,
}

impl HashAlgorithm {
    pub fn from_name(name: &str) -> HarpResult<Self> {
        let alg = match name.to_ascii_lowercase().as_str() {
            "md4" => Self::Md4,
            "md5" => Self::Md5,
            "sha1" => Self::Sha1,
            "sha224" => Self::Sha224,
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            "sha512/224" | "sha512-224" => Self::Sha512_224,
            "sha512/256" | "sha512-256" => Self::Sha512_256,
            "sha3-224" => Self::Sha3_224,
            "sha3-256" => Self::Sha3_256,
            "sha3-384" => Self::Sha3_384,
            "sha3-512" => Self::Sha3_512,
            "blake2b-256" => Self::Blake2b256,
            "blake2b-384" => Self::Blake2b384,
            "blake2b-512" => Self::Blake2b512,
            "blake2s-256" => Self::Blake2s256,
            "ripemd160" => Self::Ripemd160,
            other => return Err(HarpError::UnsupportedPrimitive(format!("hash:{other}"))),
        };
        Ok(alg)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Md4 => "md4",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Sha512_224 => "sha512/224",
            Self::Sha512_256 => "sha512/256",
            Self::Sha3_224 => "sha3-224",
            Self::Sha3_256 => "sha3-256",
            Self::Sha3_384 => "sha3-384",
            Self::Sha3_512 => "sha3-512",
            Self::Blake2b256 => "blake2b-256",
            Self::Blake2b384 => "blake2b-384",
            Self::Blake2b512 => "blake2b-512",
            Self::Blake2s256 => "blake2s-256",
            Self::Ripemd160 => "ripemd160",
        }
    }

    pub fn digest(&self, input: &[u8]) -> Vec<u8> {
        match self {
            Self::Md4 => md4::Md4::digest(input).to_vec(),
            Self::Md5 => md5::Md5::digest(input).to_vec(),
            Self::Sha1 => sha1::Sha1::digest(input).to_vec(),
            Self::Sha224 => sha2::Sha224::digest(input).to_vec(),
            Self::Sha256 => sha2::Sha256::digest(input).to_vec(),
            Self::Sha384 => sha2::Sha384::digest(input).to_vec(),
            Self::Sha512 => sha2::Sha512::digest(input).to_vec(),
            Self::Sha512_224 => sha2::Sha512_224::digest(input).to_vec(),
            Self::Sha512_256 => sha2::Sha512_256::digest(input).to_vec(),
            Self::Sha3_224 => sha3::Sha3_224::digest(input).to_vec(),
            Self::Sha3_256 => sha3::Sha3_256::digest(input).to_vec(),
            Self::Sha3_384 => sha3::Sha3_384::digest(input).to_vec(),
            Self::Sha3_512 => sha3::Sha3_512::digest(input).to_vec(),
            Self::Blake2b256 => Blake2b::<U32>::digest(input).to_vec(),
            Self::Blake2b384 => Blake2b::<U48>::digest(input).to_vec(),
            Self::Blake2b512 => Blake2b::<U64>::digest(input).to_vec(),
            Self::Blake2s256 => Blake2s256::digest(input).to_vec(),
            Self::Ripemd160 => ripemd::Ripemd160::digest(input).to_vec(),
        }
    }
}

impl Transformer for HashAlgorithm {
    fn to(&self, _ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        Ok(self.digest(input))
    }

    fn from(&self, _ctx: &TransformContext, _input: &[u8]) -> HarpResult<Vec<u8>> {
        Err(HarpError::input(format!(
            "hash:{} is one-way and cannot be reversed",
            self.name()
        )))
    }
}
