//! Proof-of-work difficulty predicate.

use serde::{Deserialize, Serialize};
use std::fmt;

use medledger_common::{Digest, Error, Result};

/// Number of leading zero hex digits a block hash must have.
///
/// The predicate is monotonic in the digit count: a hash satisfying
/// difficulty `n` satisfies every difficulty below `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    /// Four leading zero hex digits (16 bits).
    pub const DEFAULT: Self = Self(4);

    /// A SHA-256 digest has 64 hex digits.
    pub const MAX_ZEROS: u8 = 64;

    /// Create a difficulty.
    ///
    /// # Errors
    /// - `InvalidInput` if `zeros` exceeds [`Self::MAX_ZEROS`]
    pub fn new(zeros: u8) -> Result<Self> {
        if zeros > Self::MAX_ZEROS {
            return Err(Error::InvalidInput(format!(
                "Difficulty must be at most {} leading zeros, got {}",
                Self::MAX_ZEROS,
                zeros
            )));
        }
        Ok(Self(zeros))
    }

    /// Required leading zero hex digits.
    pub fn zeros(&self) -> u8 {
        self.0
    }

    /// Whether `hash` satisfies this difficulty.
    pub fn is_satisfied_by(&self, hash: &Digest) -> bool {
        hash.leading_zero_nibbles() >= u32::from(self.0)
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = Error;

    fn try_from(zeros: u8) -> Result<Self> {
        Self::new(zeros)
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> Self {
        d.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_with_prefix(prefix: &[u8]) -> Digest {
        let mut bytes = [0xffu8; 32];
        bytes[..prefix.len()].copy_from_slice(prefix);
        Digest::from_bytes(bytes)
    }

    #[test]
    fn test_zero_difficulty_accepts_everything() {
        let d = Difficulty::new(0).unwrap();
        assert!(d.is_satisfied_by(&digest_with_prefix(&[0xff])));
    }

    #[test]
    fn test_leading_zero_hex_digits() {
        let d = Difficulty::DEFAULT;
        assert!(d.is_satisfied_by(&digest_with_prefix(&[0x00, 0x00, 0xab])));
        assert!(!d.is_satisfied_by(&digest_with_prefix(&[0x00, 0x0f, 0xab])));

        let odd = Difficulty::new(3).unwrap();
        assert!(odd.is_satisfied_by(&digest_with_prefix(&[0x00, 0x0f])));
        assert!(!odd.is_satisfied_by(&digest_with_prefix(&[0x00, 0x1f])));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(Difficulty::new(64).is_ok());
        assert!(Difficulty::new(65).is_err());
        assert!(serde_json::from_str::<Difficulty>("65").is_err());
        assert_eq!(serde_json::from_str::<Difficulty>("2").unwrap().zeros(), 2);
    }
}
