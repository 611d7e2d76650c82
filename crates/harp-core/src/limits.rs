//! Hard caps shared by the codec, the orchestrators, and the I/O collaborators.

use std::time::Duration;

/// 1 MiB
pub const MIB: u64 = 1024 * 1024;

/// Maximum serialized bundle size and maximum container ciphertext length.
pub const MAX_CONTAINER_SIZE: u64 = 25 * MIB;

/// Maximum number of recipient blocks accepted when parsing a container.
pub const MAX_RECIPIENTS: usize = 1024;

/// Maximum length of a single secret value inside a package.
pub const MAX_VALUE_SIZE: u64 = MIB;

/// Reader collaborators must deliver their input within this window,
/// measured from the first byte.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Effective caps for one job. Configuration may only tighten the hard caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_container_size: u64,
    pub max_recipients: usize,
    pub max_value_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_container_size: MAX_CONTAINER_SIZE,
            max_recipients: MAX_RECIPIENTS,
            max_value_size: MAX_VALUE_SIZE,
        }
    }
}

impl Limits {
    /// Clamp requested values to the hard caps.
    pub fn tightened(max_container_size: u64, max_recipients: usize, max_value_size: u64) -> Self {
        Self {
            max_container_size: max_container_size.min(MAX_CONTAINER_SIZE),
            max_recipients: max_recipients.min(MAX_RECIPIENTS),
            max_value_size: max_value_size.min(MAX_VALUE_SIZE),
        }
    }
}
