use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, VaultError>;

/// Faults that abort a mutation. Stale-state rejections are not errors; see
/// [`crate::RejectReason`].
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("atomic rename onto {} failed: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("version {version_id} of {} is already archived with different content", path.display())]
    ArchiveConflict { path: PathBuf, version_id: Uuid },
    #[error("failed to encode archive record {}: {source}", path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("mutation target must be an absolute file path: {}", path.display())]
    InvalidPath { path: PathBuf },
}

impl VaultError {
    pub(crate) fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Underlying OS error kind, when the fault came from the filesystem.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source, .. } | Self::Persist { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::Persist { path, .. }
            | Self::ArchiveConflict { path, .. }
            | Self::Serde { path, .. }
            | Self::InvalidPath { path } => path,
        }
    }
}
