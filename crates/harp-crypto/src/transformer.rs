//! Value transformer: one `to`/`from` interface over the whole catalog.
//!
//! `to` encodes, encrypts, signs, compresses or hashes; `from` reverses it
//! (decode, decrypt, verify, decompress). Hashes have no `from`.

use std::io::{Read, Write};

use harp_core::{limits, HarpError, HarpResult};

use crate::catalog::Catalog;

/// Per-call parameters.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// Associated data bound into AEAD tags (ignored by non-AEAD primitives).
    pub aad: Option<Vec<u8>>,
    /// Signature output is the signature only; `from` then expects
    /// `detached_signature` and the original message as input.
    pub detached: bool,
    /// Prefer the deterministic variant of the signature scheme.
    pub deterministic: bool,
    /// Input to a signature primitive is already a digest.
    pub prehashed: bool,
    /// Signature to check in detached mode.
    pub detached_signature: Option<Vec<u8>>,
}

impl TransformContext {
    pub fn with_aad(aad: impl Into<Vec<u8>>) -> Self {
        Self {
            aad: Some(aad.into()),
            ..Default::default()
        }
    }

    pub fn aad(&self) -> &[u8] {
        self.aad.as_deref().unwrap_or_default()
    }
}

/// Direction of a transform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encode,
    Decode,
}

/// Uniform codec interface.
///
/// Implementations must be safe to share between threads: any per-call state
/// (nonces, RNG draws) is created inside the call.
pub trait Transformer: Send + Sync {
    fn to(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>>;

    fn from(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>>;

    fn apply(&self, direction: Direction, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        match direction {
            Direction::Encode => self.to(ctx, input),
            Direction::Decode => self.from(ctx, input),
        }
    }
}

impl<T: Transformer + ?Sized> Transformer for Box<T> {
    fn to(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        (**self).to(ctx, input)
    }

    fn from(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        (**self).from(ctx, input)
    }
}

impl<T: Transformer + ?Sized> Transformer for std::sync::Arc<T> {
    fn to(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        (**self).to(ctx, input)
    }

    fn from(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        (**self).from(ctx, input)
    }
}

/// One-shot transform of an in-memory value with a key string, using the
/// process-wide catalog.
pub fn transform(
    direction: Direction,
    key: &str,
    ctx: &TransformContext,
    input: &[u8],
) -> HarpResult<Vec<u8>> {
    HarpError::check_size("transform input", input.len() as u64, limits::MAX_CONTAINER_SIZE)?;
    let primitive = Catalog::current().parse(key)?;
    let output = primitive.apply(direction, ctx, input)?;
    tracing::debug!(
        algorithm = primitive.algorithm(),
        ?direction,
        input_len = input.len(),
        output_len = output.len(),
        "value transformed"
    );
    Ok(output)
}

/// Stream variant of [`transform`]: drains `reader` (capped at the container
/// size limit) and writes the whole result to `writer`. Nothing is written
/// when the transform fails.
pub fn transform_stream<R: Read, W: Write>(
    direction: Direction,
    key: &str,
    ctx: &TransformContext,
    reader: R,
    mut writer: W,
) -> HarpResult<u64> {
    let input = harp_core::io::read_capped_sync(reader, limits::MAX_CONTAINER_SIZE)?;
    let output = transform(direction, key, ctx, &input)?;
    writer.write_all(&output)?;
    writer.flush()?;
    Ok(output.len() as u64)
}
