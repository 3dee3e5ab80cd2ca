use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a mutation does. Updates and deletes carry the fingerprint the
/// caller last observed; creates carry none because the file must be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    Create { content: Vec<u8> },
    Update { expected: Fingerprint, content: Vec<u8> },
    Delete { expected: Fingerprint },
}

impl MutationOp {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Create { .. } => MutationKind::Create,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete { .. } => MutationKind::Delete,
        }
    }
}

/// A fresh read of a path, taken when a mutation is proposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub path: PathBuf,
    pub fingerprint: Option<Fingerprint>,
    /// Identity of the observed content. Becomes the archived version id if
    /// this content is later superseded.
    pub version_id: Uuid,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn exists(&self) -> bool {
        self.fingerprint.is_some()
    }

    /// Create when the file was absent, update otherwise.
    pub fn into_write(self, content: impl Into<Vec<u8>>) -> MutationIntent {
        let content = content.into();
        let op = match self.fingerprint {
            Some(expected) => MutationOp::Update { expected, content },
            None => MutationOp::Create { content },
        };
        MutationIntent::new(self.path, op, self.version_id)
    }

    /// `None` when the file was absent at observation time.
    pub fn into_update(self, content: impl Into<Vec<u8>>) -> Option<MutationIntent> {
        let expected = self.fingerprint?;
        Some(MutationIntent::new(
            self.path,
            MutationOp::Update {
                expected,
                content: content.into(),
            },
            self.version_id,
        ))
    }

    /// `None` when the file was absent at observation time.
    pub fn into_delete(self) -> Option<MutationIntent> {
        let expected = self.fingerprint?;
        Some(MutationIntent::new(
            self.path,
            MutationOp::Delete { expected },
            self.version_id,
        ))
    }
}

/// A proposed mutation. Consumed by a single commit attempt; build a new one
/// from a fresh observation to retry.
#[derive(Debug, PartialEq, Eq)]
pub struct MutationIntent {
    target: PathBuf,
    op: MutationOp,
    prior_version_id: Uuid,
    new_version_id: Uuid,
    created_at: DateTime<Utc>,
}

impl MutationIntent {
    pub fn new(target: impl Into<PathBuf>, op: MutationOp, prior_version_id: Uuid) -> Self {
        Self {
            target: target.into(),
            op,
            prior_version_id,
            new_version_id: Uuid::now_v7(),
            created_at: Utc::now(),
        }
    }

    pub fn create(target: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self::new(
            target,
            MutationOp::Create {
                content: content.into(),
            },
            Uuid::now_v7(),
        )
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn op(&self) -> &MutationOp {
        &self.op
    }

    pub fn kind(&self) -> MutationKind {
        self.op.kind()
    }

    pub fn expected_prior(&self) -> Option<&Fingerprint> {
        match &self.op {
            MutationOp::Create { .. } => None,
            MutationOp::Update { expected, .. } | MutationOp::Delete { expected } => Some(expected),
        }
    }

    pub fn proposed_content(&self) -> Option<&[u8]> {
        match &self.op {
            MutationOp::Create { content } | MutationOp::Update { content, .. } => Some(content),
            MutationOp::Delete { .. } => None,
        }
    }

    pub fn prior_version_id(&self) -> Uuid {
        self.prior_version_id
    }

    pub fn new_version_id(&self) -> Uuid {
        self.new_version_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
