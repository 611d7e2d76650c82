//! Process-wide FIPS flag.
//!
//! Set once at start-up (from config or `HARP_FIPS`) and read-only after.
//! When nothing initialises it explicitly, the first read probes the
//! environment.

use std::sync::OnceLock;

use crate::error::{HarpError, HarpResult};

/// Environment variable probed when the flag is read before `init`.
pub const FIPS_ENV: &str = "HARP_FIPS";

static FIPS_MODE: OnceLock<bool> = OnceLock::new();

/// Fix the FIPS flag for the lifetime of the process.
///
/// Re-initialising with the same value is a no-op; trying to flip an already
/// fixed flag is a config error.
pub fn init(enabled: bool) -> HarpResult<()> {
    let current = *FIPS_MODE.get_or_init(|| enabled);
    if current != enabled {
        return Err(HarpError::Config(format!(
            "FIPS mode already fixed to {current}, refusing to switch to {enabled}"
        )));
    }
    if enabled {
        tracing::info!("FIPS mode enabled: primitive catalog restricted");
    }
    Ok(())
}

/// Whether the process runs in FIPS mode.
pub fn enabled() -> bool {
    *FIPS_MODE.get_or_init(probe_env)
}

fn probe_env() -> bool {
    std::env::var(FIPS_ENV)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
