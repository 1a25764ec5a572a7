//! Content fingerprints for optimistic concurrency
//!
//! Provides [`Fingerprint`], a strongly-typed SHA-256 digest of a document's
//! persisted bytes. Plans record the fingerprint they were generated against;
//! apply refuses to run when the live document no longer matches.

use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Textual prefix naming the digest algorithm
pub const FINGERPRINT_PREFIX: &str = "sha256:";

/// A 32-byte SHA-256 digest of a document's bytes
///
/// Immutable and cheap to clone (Copy). Displays as `sha256:<hex>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create a fingerprint from raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create fingerprint from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FingerprintError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Fingerprint arbitrary bytes
    ///
    /// Total and deterministic: identical input always yields an identical
    /// fingerprint.
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&digest);
        Self(arr)
    }

    /// Hex digest without the algorithm prefix
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short string representation (first 12 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{FINGERPRINT_PREFIX}{}", hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = match s.split_once(':') {
            Some(("sha256", rest)) => rest,
            Some((algo, _)) => return Err(FingerprintError::UnsupportedAlgorithm(algo.to_string())),
            None => s,
        };
        let bytes = hex::decode(hex_part)?;
        Self::from_slice(&bytes)
    }
}

impl AsRef<[u8; 32]> for Fingerprint {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct FingerprintVisitor;

        impl<'de> serde::de::Visitor<'de> for FingerprintVisitor {
            type Value = Fingerprint;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("a sha256 fingerprint as 'sha256:<hex>' or raw bytes")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                value.parse().map_err(serde::de::Error::custom)
            }

            fn visit_bytes<E>(self, value: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Fingerprint::from_slice(value).map_err(serde::de::Error::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(FingerprintVisitor)
        } else {
            deserializer.deserialize_bytes(FingerprintVisitor)
        }
    }
}

/// Errors that can occur when parsing fingerprints
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Invalid digest length
    #[error("invalid fingerprint length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex decoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Prefix names an algorithm other than sha256
    #[error("unsupported fingerprint algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fingerprint_compute_deterministic() {
        let data = b"hello world";
        assert_eq!(Fingerprint::compute(data), Fingerprint::compute(data));
    }

    #[test]
    fn fingerprint_known_vector() {
        let fp = Fingerprint::compute(b"");
        assert_eq!(
            fp.to_string(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn fingerprint_single_byte_change_differs() {
        assert_ne!(Fingerprint::compute(b"abc"), Fingerprint::compute(b"abd"));
    }

    #[test]
    fn fingerprint_parse_prefixed_and_bare() {
        let fp = Fingerprint::compute(b"doc");
        let prefixed: Fingerprint = fp.to_string().parse().unwrap();
        let bare: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(prefixed, fp);
        assert_eq!(bare, fp);
    }

    #[test]
    fn fingerprint_parse_rejects_other_algorithm() {
        let err = "md5:abcd".parse::<Fingerprint>().unwrap_err();
        assert!(matches!(err, FingerprintError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn fingerprint_parse_rejects_short_digest() {
        let err = "sha256:abcd".parse::<Fingerprint>().unwrap_err();
        assert!(matches!(err, FingerprintError::InvalidLength { actual: 2, .. }));
    }

    #[test]
    fn fingerprint_serde_json_string() {
        let fp = Fingerprint::compute(b"serde");
        let json = serde_json::to_string(&fp).unwrap();
        assert!(json.starts_with("\"sha256:"));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    proptest! {
        #[test]
        fn fingerprint_stable_across_calls(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let a = Fingerprint::compute(&data);
            let b = Fingerprint::compute(&data.clone());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn fingerprint_display_parse_identity(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let fp = Fingerprint::compute(&data);
            let parsed: Fingerprint = fp.to_string().parse().unwrap();
            prop_assert_eq!(parsed, fp);
        }
    }
}
