use std::fmt;
use std::str::FromStr;

use compact_str::{CompactString, format_compact};
use rand::Rng;
use ring::{constant_time, hmac};
use serde::{Deserialize, Serialize};
use tracing::trace;
use zeroize::Zeroize;

use crate::base32;

/// Smallest permitted code length, per RFC 4226 section 4
pub const MIN_DIGITS: u8 = 6;

/// Largest permitted code length. RFC 4226 appendix E allows 9-digit codes;
/// dynamic truncation yields only 31 bits, so longer codes gain no entropy.
pub const MAX_DIGITS: u8 = 9;

/// The default length of a generated secret in bytes
pub const DEFAULT_SECRET_LENGTH: usize = 32;

/// Shared OTP secret
///
/// The byte buffer is wiped when the secret is dropped, and the `Debug`
/// representation never shows key material.
#[derive(Clone)]
pub struct Secret(Box<[u8]>);

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Secret {
    /// Create a new secret from a byte array
    pub fn new(secret: &[u8]) -> Self {
        Self(secret.into())
    }

    /// Draw a fresh secret of `length` bytes from the system CSPRNG
    pub fn generate(length: usize) -> Self {
        Self::generate_with_rng(length, &mut rand::rng())
    }

    /// Draw a fresh secret of `length` bytes with a caller-supplied rng
    pub fn generate_with_rng(length: usize, rng: &mut impl Rng) -> Self {
        let mut secret = vec![0u8; length];
        rng.fill(secret.as_mut_slice());
        Self(secret.into_boxed_slice())
    }

    /// Create a new secret from a base32 encoded string
    pub fn try_from_base32(secret: impl AsRef<str>) -> Result<Self, base32::DecodeError> {
        let secret = base32::decode(secret.as_ref())?.into_boxed_slice();
        Ok(Self(secret))
    }

    /// Render the secret as unpadded base32 text
    pub fn to_base32(&self) -> String {
        base32::encode(&self.0, false)
    }
}

/// Generate a fresh random secret, rendered as unpadded base32 text
pub fn generate_secret(length: usize) -> String {
    Secret::generate(length).to_base32()
}

/// Hash algorithm driving the HMAC computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algorithm {
    /// HMAC-SHA1, the RFC 4226 default and what authenticator apps expect
    Sha1,
    /// HMAC-SHA256
    Sha256,
    /// HMAC-SHA512
    Sha512,
}

impl Algorithm {
    /// Canonical name of the algorithm
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    fn hmac(self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = UnsupportedAlgorithmError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(UnsupportedAlgorithmError { name: name.into() }),
        }
    }
}

/// Error type for hash algorithm names outside the supported set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported hash algorithm: {name}")]
pub struct UnsupportedAlgorithmError {
    /// The rejected algorithm name
    pub name: CompactString,
}

/// Error type for code options outside the permitted ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOptionsError {
    /// The requested code length is outside the RFC 4226 range
    #[error("digits must be between {} and {}, got {digits}", MIN_DIGITS, MAX_DIGITS)]
    Digits {
        /// The rejected digit count
        digits: u8,
    },
    /// The TOTP step length is zero
    #[error("step must be a positive number of seconds")]
    Step,
}

/// Immutable configuration for HOTP code derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotpOptions {
    /// Number of decimal digits in the produced code
    pub digits: u8,
    /// Hash algorithm for the HMAC computation
    pub algorithm: Algorithm,
}

impl Default for HotpOptions {
    fn default() -> Self {
        Self {
            digits: 6,
            algorithm: Algorithm::Sha1,
        }
    }
}

impl HotpOptions {
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

    /// Check the record against the permitted ranges
    pub fn validate(&self) -> Result<(), InvalidOptionsError> {
        if self.digits < MIN_DIGITS || self.digits > MAX_DIGITS {
            return Err(InvalidOptionsError::Digits {
                digits: self.digits,
            });
        }
        Ok(())
    }
}

// Dynamic truncation (RFC 4226 section 5.3): the last nibble of the digest
// selects a 4-byte window whose top bit is cleared, leaving a 31-bit integer.
fn truncate(digest: &[u8], digits: u8) -> u32 {
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let truncated = u32::from(digest[offset] & 0x7f) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);
    truncated % 10u32.pow(u32::from(digits))
}

/// Generate the HOTP code for one counter value
///
/// The counter is serialized as 8 big-endian bytes, run through HMAC with
/// the configured algorithm and dynamically truncated. The result is a
/// decimal string of exactly `digits` characters, zero-padded on the left.
pub fn generate(
    secret: &Secret,
    counter: u64,
    options: &HotpOptions,
) -> Result<CompactString, InvalidOptionsError> {
    options.validate()?;
    let key = hmac::Key::new(options.algorithm.hmac(), secret.as_ref());
    let signature = hmac::sign(&key, &counter.to_be_bytes());
    let code = truncate(signature.as_ref(), options.digits);
    Ok(format_compact!(
        "{:0width$}",
        code,
        width = usize::from(options.digits)
    ))
}

/// Verify a candidate code against one counter value
///
/// The comparison runs in constant time; a candidate of the wrong length is
/// an immediate non-match. A mismatch is an ordinary `false`, never an
/// error.
pub fn verify(
    secret: &Secret,
    counter: u64,
    code: &str,
    options: &HotpOptions,
) -> Result<bool, InvalidOptionsError> {
    let expected = generate(secret, counter, options)?;
    let matched =
        constant_time::verify_slices_are_equal(expected.as_bytes(), code.as_bytes()).is_ok();
    trace!(counter, matched, "hotp verification");
    Ok(matched)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const RFC4226_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn rfc4226_appendix_d_vectors() {
        let secret = Secret::new(RFC4226_SECRET);
        let options = HotpOptions::default();
        let expected = [
            "755224", "287082", "359152", "969429", "338314", "254676", "287922", "162583",
            "399871", "520489",
        ];
        for (counter, want) in expected.iter().enumerate() {
            let code = generate(&secret, counter as u64, &options).unwrap();
            assert_eq!(code, *want, "counter {counter}");
        }
    }

    #[test]
    fn truncation_example_from_section_5_4() {
        let digest = [
            0x1f, 0x86, 0x98, 0x69, 0x0e, 0x02, 0xca, 0x16, 0x61, 0x85, 0x50, 0xef, 0x7f, 0x19,
            0xda, 0x8e, 0x94, 0x5b, 0x55, 0x5a,
        ];
        assert_eq!(truncate(&digest, 9), 357_872_921);
        assert_eq!(truncate(&digest, 6), 872_921);
    }

    #[test]
    fn codes_are_zero_padded_to_the_requested_width() {
        let secret = Secret::new(RFC4226_SECRET);
        for digits in MIN_DIGITS..=MAX_DIGITS {
            let options = HotpOptions::default().digits(digits);
            for counter in 0..32 {
                let code = generate(&secret, counter, &options).unwrap();
                assert_eq!(code.len(), usize::from(digits));
                assert!(code.bytes().all(|b| b.is_ascii_digit()));
            }
        }
    }

    #[test]
    fn digits_outside_the_range_are_rejected() {
        let secret = Secret::new(RFC4226_SECRET);
        for digits in [0, 5, 10, 255] {
            let options = HotpOptions::default().digits(digits);
            assert_eq!(
                generate(&secret, 0, &options),
                Err(InvalidOptionsError::Digits { digits })
            );
            assert_eq!(
                verify(&secret, 0, "755224", &options),
                Err(InvalidOptionsError::Digits { digits })
            );
        }
    }

    #[test]
    fn verify_accepts_the_matching_code_only() {
        let secret = Secret::new(RFC4226_SECRET);
        let options = HotpOptions::default();
        assert!(verify(&secret, 0, "755224", &options).unwrap());
        assert!(!verify(&secret, 1, "755224", &options).unwrap());
        assert!(!verify(&secret, 0, "755225", &options).unwrap());
    }

    #[test]
    fn verify_treats_wrong_length_candidates_as_mismatch() {
        let secret = Secret::new(RFC4226_SECRET);
        let options = HotpOptions::default();
        assert!(!verify(&secret, 0, "", &options).unwrap());
        assert!(!verify(&secret, 0, "75522", &options).unwrap());
        assert!(!verify(&secret, 0, "7552240", &options).unwrap());
    }

    #[test]
    fn base32_secret_matches_raw_bytes() {
        let raw = Secret::new(RFC4226_SECRET);
        let decoded = Secret::try_from_base32("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
        assert_eq!(decoded.as_ref(), RFC4226_SECRET);
        let options = HotpOptions::default();
        assert_eq!(
            generate(&raw, 7, &options).unwrap(),
            generate(&decoded, 7, &options).unwrap()
        );
    }

    #[test]
    fn sha256_and_sha512_produce_codes_of_the_requested_width() {
        let secret = Secret::new(RFC4226_SECRET);
        for algorithm in [Algorithm::Sha256, Algorithm::Sha512] {
            let options = HotpOptions::default().digits(8).algorithm(algorithm);
            let code = generate(&secret, 0, &options).unwrap();
            assert_eq!(code.len(), 8);
            assert!(verify(&secret, 0, &code, &options).unwrap());
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let secret = Secret::new(RFC4226_SECRET);
        let options = HotpOptions::default().digits(8).algorithm(Algorithm::Sha512);
        assert_eq!(
            generate(&secret, 42, &options).unwrap(),
            generate(&secret, 42, &options).unwrap()
        );
    }

    #[test]
    fn algorithm_names_parse_case_insensitively() {
        assert_eq!("sha1".parse::<Algorithm>().unwrap(), Algorithm::Sha1);
        assert_eq!("SHA-256".parse::<Algorithm>().unwrap(), Algorithm::Sha256);
        assert_eq!("Sha512".parse::<Algorithm>().unwrap(), Algorithm::Sha512);
        let err = "md5".parse::<Algorithm>().unwrap_err();
        assert_eq!(err.name, "md5");
    }

    #[test]
    fn algorithm_serde_uses_canonical_names() {
        let json = serde_json::to_string(&Algorithm::Sha256).unwrap();
        assert_eq!(json, "\"SHA256\"");
        let parsed: Algorithm = serde_json::from_str("\"SHA512\"").unwrap();
        assert_eq!(parsed, Algorithm::Sha512);
    }

    #[test]
    fn generated_secrets_are_unpadded_base32_of_the_requested_length() {
        let encoded = generate_secret(20);
        assert_eq!(encoded.len(), 32);
        assert!(!encoded.contains('='));
        assert_eq!(Secret::try_from_base32(&encoded).unwrap().as_ref().len(), 20);

        let encoded = generate_secret(DEFAULT_SECRET_LENGTH);
        assert_eq!(
            Secret::try_from_base32(&encoded).unwrap().as_ref().len(),
            DEFAULT_SECRET_LENGTH
        );
    }

    #[test]
    fn generated_secrets_differ_between_draws() {
        assert_ne!(generate_secret(32), generate_secret(32));
    }

    #[test]
    fn debug_output_hides_key_material() {
        let secret = Secret::new(b"super secret bytes");
        let rendered = format!("{secret:?}");
        assert!(rendered.contains("len"));
        assert!(!rendered.contains("super"));
    }
}
