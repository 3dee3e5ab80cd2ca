//! Versioned, hash-validated file mutation.
//!
//! Every change to a file goes through [`VersionedFileService::commit_mutation`],
//! which re-reads the file, checks it still matches what the caller observed,
//! archives the content being replaced, and swaps in the new bytes atomically.

mod archive;
mod atomic;
mod cancel;
mod error;
mod fingerprint;
mod intent;
mod locks;
mod retention;
mod service;
mod validator;

pub use archive::{HeadRecord, VersionArchive, VersionRecord};
pub use atomic::AtomicWriter;
pub use cancel::CancelToken;
pub use error::{Result, VaultError};
pub use fingerprint::{Fingerprint, Snapshot, fingerprint_file, read_current};
pub use intent::{MutationIntent, MutationKind, MutationOp, Observation};
pub use locks::PathLocks;
pub use retention::{AnyOf, KeepAll, MaxAge, MaxVersions, RetentionPolicy, policy_from_config, prune};
pub use service::{CommitOutcome, CommitReceipt, ServiceConfig, VersionedFileService};
pub use validator::{RejectReason, Verdict, validate};
