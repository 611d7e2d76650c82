//! harp-core: shared plumbing for the secret container toolchain
//!
//! - `error`: the error taxonomy every library crate returns
//! - `limits`: byte-count and fan-out caps enforced across the pipeline
//! - `fips`: process-wide FIPS flag, set once at start-up
//! - `config`: `harp.toml` schema
//! - `io`: collaborator interfaces (capped reader, secret prompt)

pub mod config;
pub mod error;
pub mod fips;
pub mod io;
pub mod limits;

pub use error::{ErrorKind, HarpError, HarpResult};
