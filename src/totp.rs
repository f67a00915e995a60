use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::hotp::{self, Algorithm, HotpOptions, InvalidOptionsError, Secret};

/// The default period of a TOTP code in seconds
pub const DEFAULT_STEP: u64 = 30;

/// Immutable configuration for TOTP code derivation and verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpOptions {
    /// Number of decimal digits in the produced code
    pub digits: u8,
    /// Hash algorithm for the HMAC computation
    pub algorithm: Algorithm,
    /// Length of one time step in seconds
    pub step: u64,
    /// Number of adjacent steps probed on either side during verification.
    /// Cost grows linearly with `2 * window + 1`, so keep it small (10 or
    /// fewer steps of drift is already generous).
    pub window: u32,
}

impl Default for TotpOptions {
    fn default() -> Self {
        Self {
            digits: 6,
            algorithm: Algorithm::Sha1,
            step: DEFAULT_STEP,
            window: 0,
        }
    }
}

impl TotpOptions {
    /// Set the number of digits
    #[must_use]
    pub const fn digits(mut self, digits: u8) -> Self {
        self.digits = digits;
        self
    }

    /// Set the hash algorithm
    #[must_use]
    pub const fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the step length in seconds
    #[must_use]
    pub const fn step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    /// Set the verification window
    #[must_use]
    pub const fn window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }

    /// Check the record against the permitted ranges
    pub fn validate(&self) -> Result<(), InvalidOptionsError> {
        self.code_options().validate()?;
        if self.step == 0 {
            return Err(InvalidOptionsError::Step);
        }
        Ok(())
    }

    const fn code_options(&self) -> HotpOptions {
        HotpOptions {
            digits: self.digits,
            algorithm: self.algorithm,
        }
    }
}

/// Map an epoch timestamp to a counter value
///
/// # Errors
///
/// Fails when `step` is zero.
pub fn counter_at(epoch_seconds: u64, step: u64) -> Result<u64, InvalidOptionsError> {
    if step == 0 {
        return Err(InvalidOptionsError::Step);
    }
    Ok(epoch_seconds / step)
}

/// Generate the TOTP code for an explicit epoch timestamp
pub fn generate_at(
    secret: &Secret,
    options: &TotpOptions,
    epoch_seconds: u64,
) -> Result<CompactString, InvalidOptionsError> {
    let counter = counter_at(epoch_seconds, options.step)?;
    hotp::generate(secret, counter, &options.code_options())
}

/// Generate the TOTP code at the given wall-clock time
pub fn generate(
    secret: &Secret,
    options: &TotpOptions,
    at: SystemTime,
) -> Result<CompactString, InvalidOptionsError> {
    generate_at(secret, options, epoch_seconds(at))
}

/// Verify a candidate code around an explicit epoch timestamp
///
/// Counters from `-window` to `+window` around the derived counter are
/// probed in ascending order. Every offset is evaluated and the outcomes
/// are combined with OR, so response timing does not reveal which offset
/// matched. A code matching nowhere in the window is an ordinary `false`.
pub fn verify_at(
    secret: &Secret,
    code: &str,
    options: &TotpOptions,
    epoch_seconds: u64,
) -> Result<bool, InvalidOptionsError> {
    options.validate()?;
    let counter = counter_at(epoch_seconds, options.step)?;
    let code_options = options.code_options();

    let mut matched = false;
    for offset in -i64::from(options.window)..=i64::from(options.window) {
        // Offsets that fall off either end of the counter range cannot match.
        let Some(probe) = counter.checked_add_signed(offset) else {
            continue;
        };
        matched |= hotp::verify(secret, probe, code, &code_options)?;
    }
    trace!(
        counter,
        window = options.window,
        step = options.step,
        digits = options.digits,
        algorithm = options.algorithm.as_str(),
        matched,
        "totp verification"
    );
    Ok(matched)
}

/// Verify a candidate code at the given wall-clock time
pub fn verify(
    secret: &Secret,
    code: &str,
    options: &TotpOptions,
    at: SystemTime,
) -> Result<bool, InvalidOptionsError> {
    verify_at(secret, code, options, epoch_seconds(at))
}

// SAFE: The timestamp is always after the UNIX epoch.
#[allow(clippy::unwrap_used)]
fn epoch_seconds(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs()
}
