use crate::archive::{HeadRecord, VersionArchive, VersionRecord};
use crate::atomic::AtomicWriter;
use crate::cancel::CancelToken;
use crate::error::{Result, VaultError};
use crate::fingerprint::{Fingerprint, fingerprint_file, read_current};
use crate::intent::{MutationIntent, MutationKind, MutationOp, Observation};
use crate::locks::{PathLocks, acquire};
use crate::retention::{RetentionPolicy, prune};
use crate::validator::{RejectReason, Verdict, validate};
use chrono::Utc;
use scribe_core::ArchiveConfig;
use scribe_observe::Observer;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub archive_root: PathBuf,
}

impl ServiceConfig {
    pub fn for_workspace(workspace: &Path, archive: &ArchiveConfig) -> Self {
        Self {
            archive_root: archive.resolve_root(workspace),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    pub path: PathBuf,
    pub kind: MutationKind,
    /// Identity of the content now on disk. For deletes, the id the delete
    /// was recorded under.
    pub version_id: Uuid,
    /// Fingerprint of the new content; `None` after a delete.
    pub fingerprint: Option<Fingerprint>,
    /// The superseded content, when there was any to keep.
    pub archived: Option<VersionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    Rejected(RejectReason),
    Cancelled,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    pub fn receipt(&self) -> Option<&CommitReceipt> {
        match self {
            Self::Committed(receipt) => Some(receipt),
            _ => None,
        }
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Committed(_) => "committed",
            Self::Rejected(_) => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Entry point for every file mutation: observe, validate, archive, apply,
/// serialized per path.
pub struct VersionedFileService {
    archive: VersionArchive,
    writer: AtomicWriter,
    locks: PathLocks,
    observer: Arc<Observer>,
}

impl VersionedFileService {
    pub fn new(config: ServiceConfig, observer: Arc<Observer>) -> Self {
        Self {
            archive: VersionArchive::new(config.archive_root, observer.clone()),
            writer: AtomicWriter::new(observer.clone()),
            locks: PathLocks::new(),
            observer,
        }
    }

    pub fn archive(&self) -> &VersionArchive {
        &self.archive
    }

    pub fn read_current_fingerprint(&self, path: &Path) -> Result<Option<Fingerprint>> {
        ensure_absolute(path)?;
        fingerprint_file(path)
    }

    /// Reads `path` now and names the observed content. The returned
    /// observation is what mutation intents are built from.
    pub fn observe(&self, path: &Path) -> Result<Observation> {
        Ok(self.observe_content(path)?.0)
    }

    /// Like [`VersionedFileService::observe`], also returning the bytes the
    /// fingerprint was computed from.
    pub fn observe_content(&self, path: &Path) -> Result<(Observation, Option<Vec<u8>>)> {
        ensure_absolute(path)?;
        let snapshot = read_current(path)?;
        let fingerprint = snapshot.as_ref().map(|s| s.fingerprint.clone());
        let version_id = match (&fingerprint, self.archive.head(path)?) {
            (Some(current), Some(head)) if head.fingerprint == *current => head.version_id,
            _ => Uuid::now_v7(),
        };
        let observation = Observation {
            path: path.to_path_buf(),
            fingerprint,
            version_id,
            observed_at: Utc::now(),
        };
        Ok((observation, snapshot.map(|s| s.bytes)))
    }

    pub fn commit_mutation(
        &self,
        intent: MutationIntent,
        cancel: &CancelToken,
    ) -> Result<CommitOutcome> {
        let target = intent.target().to_path_buf();
        ensure_absolute(&target)?;
        let kind = intent.kind();

        let lock = self.locks.lock_for(&target);
        let _guard = acquire(&lock);
        if cancel.is_cancelled() {
            return Ok(self.cancelled(&target, kind));
        }

        let current = read_current(&target)?;
        let actual = current.as_ref().map(|snapshot| &snapshot.fingerprint);
        if let Verdict::Reject(reason) = validate(&intent, actual) {
            self.observer.verbose_log(&format!(
                "rejected {kind} {}: {}",
                target.display(),
                reason.code()
            ));
            return Ok(CommitOutcome::Rejected(reason));
        }
        if cancel.is_cancelled() {
            return Ok(self.cancelled(&target, kind));
        }

        // Past this point the mutation runs to completion.
        let archived = match current {
            Some(snapshot) if kind != MutationKind::Create && !snapshot.bytes.is_empty() => {
                Some(self.archive.archive(
                    &target,
                    &snapshot.bytes,
                    intent.prior_version_id(),
                    Some(intent.new_version_id()),
                )?)
            }
            _ => None,
        };

        let fingerprint = match intent.op() {
            MutationOp::Create { content } | MutationOp::Update { content, .. } => {
                self.writer.write(&target, content)?;
                Some(Fingerprint::of(content))
            }
            MutationOp::Delete { .. } => {
                self.writer.remove(&target)?;
                None
            }
        };

        let head = fingerprint.clone().map(|fingerprint| HeadRecord {
            version_id: intent.new_version_id(),
            fingerprint,
            updated_at: Utc::now(),
        });
        // The file is already replaced; a stale head only costs the next
        // observation a fresh version id.
        if let Err(err) = self.archive.set_head(&target, head) {
            self.observer.warn_log(&format!(
                "failed to record head for {}: {err}",
                target.display()
            ));
        }

        self.observer.verbose_log(&format!(
            "committed {kind} {} version={}",
            target.display(),
            intent.new_version_id()
        ));
        Ok(CommitOutcome::Committed(CommitReceipt {
            path: target,
            kind,
            version_id: intent.new_version_id(),
            fingerprint,
            archived,
        }))
    }

    pub fn get_version(&self, path: &Path, version_id: Uuid) -> Result<Option<Vec<u8>>> {
        ensure_absolute(path)?;
        self.archive.retrieve(path, version_id)
    }

    pub fn list_versions(&self, path: &Path) -> Result<Vec<Uuid>> {
        ensure_absolute(path)?;
        self.archive.list_versions(path)
    }

    pub fn version_records(&self, path: &Path) -> Result<Vec<VersionRecord>> {
        ensure_absolute(path)?;
        self.archive.records(path)
    }

    /// Builds an intent that brings back an archived version, validated
    /// against the file as it is now. `None` when the version is unknown.
    pub fn restore_intent(&self, path: &Path, version_id: Uuid) -> Result<Option<MutationIntent>> {
        let Some(content) = self.get_version(path, version_id)? else {
            return Ok(None);
        };
        Ok(Some(self.observe(path)?.into_write(content)))
    }

    pub fn prune_versions(&self, path: &Path, policy: &dyn RetentionPolicy) -> Result<Vec<Uuid>> {
        ensure_absolute(path)?;
        let lock = self.locks.lock_for(path);
        let _guard = acquire(&lock);
        let removed = prune(&self.archive, path, policy, Utc::now())?;
        if !removed.is_empty() {
            self.observer.verbose_log(&format!(
                "pruned {} version(s) of {}",
                removed.len(),
                path.display()
            ));
        }
        Ok(removed)
    }

    fn cancelled(&self, target: &Path, kind: MutationKind) -> CommitOutcome {
        self.observer
            .verbose_log(&format!("cancelled {kind} {}", target.display()));
        CommitOutcome::Cancelled
    }
}

fn ensure_absolute(path: &Path) -> Result<()> {
    if path.is_absolute() && path.file_name().is_some() {
        Ok(())
    } else {
        Err(VaultError::InvalidPath {
            path: path.to_path_buf(),
        })
    }
}
