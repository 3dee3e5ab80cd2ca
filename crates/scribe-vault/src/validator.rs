use crate::fingerprint::Fingerprint;
use crate::intent::{MutationIntent, MutationOp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a mutation was refused. These are expected outcomes of optimistic
/// concurrency, not faults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    HashMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },
    NotFound,
    AlreadyExists,
    NoChange,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::HashMismatch { .. } => "HASH_MISMATCH",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NoChange => "NO_CHANGE",
        }
    }

    /// The file changed underneath the caller; re-read and retry.
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashMismatch { expected, actual } => write!(
                f,
                "HASH_MISMATCH: file changed since it was read (expected {}, found {})",
                expected.short(),
                actual.short()
            ),
            Self::NotFound => f.write_str("NOT_FOUND: file no longer exists"),
            Self::AlreadyExists => f.write_str("ALREADY_EXISTS: file was created concurrently"),
            Self::NoChange => f.write_str("NO_CHANGE: new content is identical to the file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

/// Compares an intent against the fingerprint read just now (`None` when the
/// file is absent). Pure; performs no I/O.
pub fn validate(intent: &MutationIntent, actual: Option<&Fingerprint>) -> Verdict {
    let reason = match (intent.op(), actual) {
        (MutationOp::Create { .. }, None) => return Verdict::Accept,
        (MutationOp::Create { .. }, Some(_)) => RejectReason::AlreadyExists,
        (MutationOp::Update { .. } | MutationOp::Delete { .. }, None) => RejectReason::NotFound,
        (MutationOp::Update { expected, .. } | MutationOp::Delete { expected }, Some(actual))
            if expected != actual =>
        {
            RejectReason::HashMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            }
        }
        (MutationOp::Update { content, .. }, Some(actual)) if Fingerprint::of(content) == *actual => {
            RejectReason::NoChange
        }
        (MutationOp::Update { .. } | MutationOp::Delete { .. }, Some(_)) => return Verdict::Accept,
    };
    Verdict::Reject(reason)
}
