//! Content fingerprints used as optimistic-concurrency tokens.
//!
//! A fingerprint is always computed from a fresh read. Nothing in this crate
//! caches one across operations.

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Lowercase hex SHA-256 of a file's exact bytes. Deserializing goes through
/// [`Fingerprint::parse`], so a stored value is always a full digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Accepts a caller-supplied hex digest (any case, surrounding whitespace ignored).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.len() == 64 && normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(normalized))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("not a SHA-256 hex digest: {raw:?}"))
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bytes of a file together with the fingerprint of exactly those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
}

/// Reads the file once. `Ok(None)` means the file does not exist; every
/// other failure is an error.
pub fn read_current(path: &Path) -> Result<Option<Snapshot>> {
    match fs::read(path) {
        Ok(bytes) => {
            let fingerprint = Fingerprint::of(&bytes);
            Ok(Some(Snapshot { bytes, fingerprint }))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(VaultError::io("read", path, err)),
    }
}

pub fn fingerprint_file(path: &Path) -> Result<Option<Fingerprint>> {
    Ok(read_current(path)?.map(|snapshot| snapshot.fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    #[test]
    fn known_digest_for_hello() {
        assert_eq!(
            Fingerprint::of(b"hello").as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn missing_file_is_absent_not_an_error() {
        let path = std::env::temp_dir().join(format!("scribe-missing-{}", Uuid::now_v7()));
        assert_eq!(fingerprint_file(&path).expect("fingerprint"), None);
    }

    #[test]
    fn unreadable_target_is_an_error_not_absent() {
        let dir = std::env::temp_dir().join(format!("scribe-dir-{}", Uuid::now_v7()));
        fs::create_dir_all(&dir).expect("dir");
        let err = fingerprint_file(&dir).expect_err("directories cannot be fingerprinted");
        assert!(matches!(err, VaultError::Io { op: "read", .. }));
    }

    #[test]
    fn parse_normalizes_case_and_rejects_garbage() {
        let fp = Fingerprint::of(b"abc");
        let upper = fp.as_str().to_ascii_uppercase();
        assert_eq!(Fingerprint::parse(&format!(" {upper} ")), Some(fp.clone()));
        assert_eq!(Fingerprint::parse("abc"), None);
        assert_eq!(Fingerprint::parse(&"z".repeat(64)), None);
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn deserialize_rejects_anything_but_a_full_digest() {
        let fp = Fingerprint::of(b"abc");
        let json = serde_json::to_string(&fp).expect("serialize");
        assert_eq!(json, format!("\"{fp}\""));
        let back: Fingerprint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, fp);

        assert!(serde_json::from_str::<Fingerprint>("\"abc\"").is_err());
        assert!(serde_json::from_str::<Fingerprint>(&format!("\"{}\"", "g".repeat(64))).is_err());
    }

    proptest! {
        #[test]
        fn fingerprint_is_deterministic_and_content_sensitive(
            bytes in prop::collection::vec(any::<u8>(), 0..256),
            extra in any::<u8>(),
        ) {
            prop_assert_eq!(Fingerprint::of(&bytes), Fingerprint::of(&bytes));
            let mut changed = bytes.clone();
            changed.push(extra);
            prop_assert_ne!(Fingerprint::of(&bytes), Fingerprint::of(&changed));
        }
    }
}
