//! Container wire codec.
//!
//! All integers are big-endian and unsigned. The codec only checks framing;
//! it never touches key material.

use harp_core::limits::{Limits, MAX_CONTAINER_SIZE, MAX_RECIPIENTS};
use harp_core::{HarpError, HarpResult};
use harp_crypto::{GCM_NONCE_SIZE, TAG_SIZE, XNONCE_SIZE};

pub const MAGIC: &[u8; 4] = b"HARP";
pub const CONTAINER_VERSION: u8 = 0x02;

/// Header flags. Only the low three bits are defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const DETERMINISTIC: u8 = 0b0000_0001;
    pub const NO_CONTAINER_IDENTITY: u8 = 0b0000_0010;
    pub const AES_GCM: u8 = 0b0000_0100;
    const RESERVED: u8 = 0b1111_1000;

    pub fn from_bits(bits: u8) -> HarpResult<Self> {
        if bits & Self::RESERVED != 0 {
            return Err(HarpError::UnsupportedContainerVersion(format!(
                "reserved flag bits set ({:#04x})",
                bits & Self::RESERVED
            )));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn set(mut self, bit: u8, on: bool) -> Self {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
        self
    }

    pub fn deterministic(self) -> bool {
        self.0 & Self::DETERMINISTIC != 0
    }

    pub fn no_container_identity(self) -> bool {
        self.0 & Self::NO_CONTAINER_IDENTITY != 0
    }

    pub fn aes_gcm(self) -> bool {
        self.0 & Self::AES_GCM != 0
    }

    /// Outer nonce length implied by the AEAD bit.
    pub fn nonce_len(self) -> usize {
        if self.aes_gcm() {
            GCM_NONCE_SIZE
        } else {
            XNONCE_SIZE
        }
    }
}

/// One wrapped copy of the container key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientBlock {
    /// Identity version the block was made for (0 legacy, 1 modern, 2 NIST).
    pub version: u8,
    /// Ephemeral public key.
    pub epub: Vec<u8>,
    /// AEAD-wrapped container key, tag included.
    pub wrapped: Vec<u8>,
}

impl RecipientBlock {
    fn write_to(&self, out: &mut Vec<u8>) -> HarpResult<()> {
        let epub_len = u8::try_from(self.epub.len())
            .map_err(|_| HarpError::input("ephemeral public key longer than 255 bytes"))?;
        let wrap_len = u16::try_from(self.wrapped.len())
            .map_err(|_| HarpError::input("wrapped key longer than 65535 bytes"))?;
        out.push(self.version);
        out.push(epub_len);
        out.extend_from_slice(&self.epub);
        out.extend_from_slice(&wrap_len.to_be_bytes());
        out.extend_from_slice(&self.wrapped);
        Ok(())
    }

    fn read_from(cur: &mut Cursor<'_>) -> HarpResult<Self> {
        let version = cur.u8("recipient version")?;
        let epub_len = cur.u8("ephemeral key length")? as usize;
        let epub = cur.take(epub_len, "ephemeral key")?.to_vec();
        let wrap_len = cur.u16("wrapped key length")? as usize;
        let wrapped = cur.take(wrap_len, "wrapped key")?.to_vec();
        Ok(Self {
            version,
            epub,
            wrapped,
        })
    }
}

/// A parsed (or about-to-be-written) container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedContainer {
    pub flags: Flags,
    pub recipients: Vec<RecipientBlock>,
    pub nonce: Vec<u8>,
    /// Ciphertext with the AEAD tag appended.
    pub ciphertext: Vec<u8>,
}

impl SealedContainer {
    /// Associated data for the outer AEAD:
    /// `magic || version || flags || recip_count || blocks`.
    pub fn aad(&self) -> HarpResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.header_len());
        self.write_header(&mut out)?;
        Ok(out)
    }

    /// Serialize to the wire form.
    pub fn to_bytes(&self) -> HarpResult<Vec<u8>> {
        if self.nonce.len() != self.flags.nonce_len() {
            return Err(HarpError::input(format!(
                "nonce is {} bytes, flags require {}",
                self.nonce.len(),
                self.flags.nonce_len()
            )));
        }
        HarpError::check_size(
            "container ciphertext",
            self.ciphertext.len() as u64,
            MAX_CONTAINER_SIZE,
        )?;

        let mut out =
            Vec::with_capacity(self.header_len() + self.nonce.len() + 4 + self.ciphertext.len());
        self.write_header(&mut out)?;
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    /// Parse and frame-check a container.
    ///
    /// The ciphertext length cap is enforced before the ciphertext is read,
    /// so an oversized claim fails without touching the payload.
    pub fn parse(data: &[u8]) -> HarpResult<Self> {
        Self::parse_with(data, &Limits::default())
    }

    /// [`parse`](Self::parse) under caller-tightened limits.
    pub fn parse_with(data: &[u8], limits: &Limits) -> HarpResult<Self> {
        let mut cur = Cursor::new(data);

        if cur.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(HarpError::malformed("bad magic"));
        }
        let version = cur.u8("version")?;
        if version != CONTAINER_VERSION {
            return Err(HarpError::UnsupportedContainerVersion(format!(
                "{version:#04x}"
            )));
        }
        let flags = Flags::from_bits(cur.u8("flags")?)?;

        let count = cur.u16("recipient count")? as usize;
        if count > limits.max_recipients {
            return Err(HarpError::malformed(format!(
                "{count} recipients exceeds the limit of {}",
                limits.max_recipients
            )));
        }
        // Only a DCKD container without a container identity may have none.
        if count == 0 && !(flags.deterministic() && flags.no_container_identity()) {
            return Err(HarpError::malformed("container has no recipients"));
        }
        let recipients = (0..count)
            .map(|_| RecipientBlock::read_from(&mut cur))
            .collect::<HarpResult<Vec<_>>>()?;

        let nonce = cur.take(flags.nonce_len(), "nonce")?.to_vec();

        let cipher_len = cur.u32("ciphertext length")? as u64;
        HarpError::check_size("container ciphertext", cipher_len, limits.max_container_size)?;
        if cipher_len < TAG_SIZE as u64 {
            return Err(HarpError::malformed("ciphertext shorter than its tag"));
        }
        let ciphertext = cur.take(cipher_len as usize, "ciphertext")?.to_vec();

        if cur.remaining() != 0 {
            return Err(HarpError::malformed(format!(
                "{} trailing bytes after ciphertext",
                cur.remaining()
            )));
        }

        Ok(Self {
            flags,
            recipients,
            nonce,
            ciphertext,
        })
    }

    fn header_len(&self) -> usize {
        MAGIC.len()
            + 4
            + self
                .recipients
                .iter()
                .map(|b| 4 + b.epub.len() + b.wrapped.len())
                .sum::<usize>()
    }

    fn write_header(&self, out: &mut Vec<u8>) -> HarpResult<()> {
        if self.recipients.len() > MAX_RECIPIENTS {
            return Err(HarpError::input(format!(
                "{} recipients exceeds the limit of {MAX_RECIPIENTS}",
                self.recipients.len()
            )));
        }
        out.extend_from_slice(MAGIC);
        out.push(CONTAINER_VERSION);
        out.push(self.flags.bits());
        out.extend_from_slice(&(self.recipients.len() as u16).to_be_bytes());
        for block in &self.recipients {
            block.write_to(out)?;
        }
        Ok(())
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> HarpResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(HarpError::malformed(format!(
                "truncated {what}: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> HarpResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> HarpResult<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> HarpResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
