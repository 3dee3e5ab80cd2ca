//! Durable store of superseded file versions.
//!
//! Layout under the archive root, one bucket per tracked path:
//!
//! ```text
//! <root>/<sha256(path)>/path.txt
//! <root>/<sha256(path)>/index.jsonl        append-only VersionRecord log
//! <root>/<sha256(path)>/head.json          version id of the live content
//! <root>/<sha256(path)>/blobs/<id>.blob
//! <root>/<sha256(path)>/meta/<id>.json
//! ```

use crate::atomic::AtomicWriter;
use crate::error::{Result, VaultError};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use scribe_observe::Observer;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use walkdir::WalkDir;

/// Metadata for one archived version. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: Uuid,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    pub archived_at: DateTime<Utc>,
    /// Version archived before this one for the same path.
    pub previous: Option<Uuid>,
    /// Version that superseded this content.
    pub next: Option<Uuid>,
}

/// Identity of the content currently on disk, as of the last commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRecord {
    pub version_id: Uuid,
    pub fingerprint: Fingerprint,
    pub updated_at: DateTime<Utc>,
}

pub struct VersionArchive {
    root: PathBuf,
    writer: AtomicWriter,
    observer: Arc<Observer>,
}

impl VersionArchive {
    /// Directories are created lazily on first archive.
    pub fn new(root: impl Into<PathBuf>, observer: Arc<Observer>) -> Self {
        Self {
            root: root.into(),
            writer: AtomicWriter::new(observer.clone()),
            observer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_key(path: &Path) -> String {
        Fingerprint::of(path.to_string_lossy().as_bytes()).to_string()
    }

    /// Stores `content` as `version_id` of `path`. Re-archiving the same id
    /// with the same bytes is a no-op that returns the existing record.
    pub fn archive(
        &self,
        path: &Path,
        content: &[u8],
        version_id: Uuid,
        next: Option<Uuid>,
    ) -> Result<VersionRecord> {
        let fingerprint = Fingerprint::of(content);
        if let Some(existing) = self.metadata(path, version_id)? {
            if existing.fingerprint != fingerprint {
                return Err(VaultError::ArchiveConflict {
                    path: path.to_path_buf(),
                    version_id,
                });
            }
            return self.repair(path, content, existing);
        }

        let bucket = self.bucket_dir(path);
        for dir in [bucket.join("blobs"), bucket.join("meta")] {
            fs::create_dir_all(&dir).map_err(|e| VaultError::io("create directory", &dir, e))?;
        }
        self.ensure_path_file(path)?;

        let record = VersionRecord {
            version_id,
            path: path.to_path_buf(),
            fingerprint,
            size_bytes: content.len() as u64,
            archived_at: Utc::now(),
            previous: self.records(path)?.last().map(|r| r.version_id),
            next,
        };
        self.writer.write(&self.blob_path(path, version_id), content)?;
        let meta_path = self.meta_path(path, version_id);
        self.writer.write(&meta_path, &encode(&meta_path, &record)?)?;
        self.append_index(path, &record)?;
        self.observer.verbose_log(&format!(
            "archived {} version={} sha256={}",
            path.display(),
            version_id,
            record.fingerprint.short()
        ));
        Ok(record)
    }

    /// Bytes of an archived version, verified against the recorded
    /// fingerprint. Missing or corrupt versions are `Ok(None)`.
    pub fn retrieve(&self, path: &Path, version_id: Uuid) -> Result<Option<Vec<u8>>> {
        let Some(record) = self.metadata(path, version_id)? else {
            return Ok(None);
        };
        let blob_path = self.blob_path(path, version_id);
        let bytes = match fs::read(&blob_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.observer.warn_log(&format!(
                    "archived blob missing for {} version={version_id}",
                    path.display()
                ));
                return Ok(None);
            }
            Err(err) => return Err(VaultError::io("read archived blob", &blob_path, err)),
        };
        if Fingerprint::of(&bytes) != record.fingerprint {
            self.observer.warn_log(&format!(
                "archived blob failed verification for {} version={version_id}",
                path.display()
            ));
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    pub fn list_versions(&self, path: &Path) -> Result<Vec<Uuid>> {
        Ok(self.records(path)?.into_iter().map(|r| r.version_id).collect())
    }

    /// Records for `path` in the order they were archived.
    pub fn records(&self, path: &Path) -> Result<Vec<VersionRecord>> {
        let index_path = self.index_path(path);
        let raw = match fs::read_to_string(&index_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(VaultError::io("read version index", &index_path, err)),
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<VersionRecord>(line) {
                Ok(record) => {
                    if seen.insert(record.version_id) {
                        out.push(record);
                    }
                }
                // A torn trailing append after a crash; the metadata file is
                // still authoritative for that version.
                Err(err) => self.observer.warn_log(&format!(
                    "skipping malformed index line in {}: {err}",
                    index_path.display()
                )),
            }
        }
        Ok(out)
    }

    pub fn metadata(&self, path: &Path, version_id: Uuid) -> Result<Option<VersionRecord>> {
        self.read_json(&self.meta_path(path, version_id))
    }

    pub fn head(&self, path: &Path) -> Result<Option<HeadRecord>> {
        self.read_json(&self.head_path(path))
    }

    /// `None` clears the head, e.g. after the file was deleted.
    pub fn set_head(&self, path: &Path, head: Option<HeadRecord>) -> Result<()> {
        let head_path = self.head_path(path);
        match head {
            Some(head) => self.writer.write(&head_path, &encode(&head_path, &head)?),
            None => match fs::remove_file(&head_path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(VaultError::io("clear head", &head_path, err)),
            },
        }
    }

    /// Every path that has ever been archived or had a head recorded.
    pub fn tracked_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                VaultError::io("scan archive", &path, e.into())
            })?;
            if entry.file_type().is_file() && entry.file_name() == "path.txt" {
                let raw = fs::read_to_string(entry.path())
                    .map_err(|e| VaultError::io("read tracked path", entry.path(), e))?;
                out.push(PathBuf::from(raw));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Drops one version from the index and deletes its blob and metadata.
    /// Returns `false` when the version was not present.
    pub fn remove_version(&self, path: &Path, version_id: Uuid) -> Result<bool> {
        let records = self.records(path)?;
        if !records.iter().any(|r| r.version_id == version_id) {
            return Ok(false);
        }
        let mut index = Vec::new();
        for record in records.iter().filter(|r| r.version_id != version_id) {
            index.extend(encode_line(&self.index_path(path), record)?);
        }
        self.writer.write(&self.index_path(path), &index)?;
        for file in [self.meta_path(path, version_id), self.blob_path(path, version_id)] {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(VaultError::io("remove archived version", &file, err)),
            }
        }
        Ok(true)
    }

    fn ensure_path_file(&self, path: &Path) -> Result<()> {
        let path_file = self.bucket_dir(path).join("path.txt");
        if path_file.exists() {
            return Ok(());
        }
        self.writer
            .write(&path_file, path.to_string_lossy().as_bytes())
    }

    // Completes an archive that was interrupted after its metadata landed.
    fn repair(&self, path: &Path, content: &[u8], record: VersionRecord) -> Result<VersionRecord> {
        self.ensure_path_file(path)?;
        if self.retrieve(path, record.version_id)?.is_none() {
            self.writer
                .write(&self.blob_path(path, record.version_id), content)?;
        }
        if !self
            .records(path)?
            .iter()
            .any(|r| r.version_id == record.version_id)
        {
            self.append_index(path, &record)?;
        }
        Ok(record)
    }

    fn append_index(&self, path: &Path, record: &VersionRecord) -> Result<()> {
        let index_path = self.index_path(path);
        let line = encode_line(&index_path, record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .map_err(|e| VaultError::io("open version index", &index_path, e))?;
        file.write_all(&line)
            .and_then(|()| file.sync_data())
            .map_err(|e| VaultError::io("append version index", &index_path, e))
    }

    fn read_json<T: DeserializeOwned>(&self, file: &Path) -> Result<Option<T>> {
        let raw = match fs::read(file) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(VaultError::io("read archive record", file, err)),
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.observer.warn_log(&format!(
                    "ignoring unreadable archive record {}: {err}",
                    file.display()
                ));
                Ok(None)
            }
        }
    }

    fn bucket_dir(&self, path: &Path) -> PathBuf {
        self.root.join(Self::bucket_key(path))
    }

    fn blob_path(&self, path: &Path, version_id: Uuid) -> PathBuf {
        self.bucket_dir(path)
            .join("blobs")
            .join(format!("{version_id}.blob"))
    }

    fn meta_path(&self, path: &Path, version_id: Uuid) -> PathBuf {
        self.bucket_dir(path)
            .join("meta")
            .join(format!("{version_id}.json"))
    }

    fn index_path(&self, path: &Path) -> PathBuf {
        self.bucket_dir(path).join("index.jsonl")
    }

    fn head_path(&self, path: &Path) -> PathBuf {
        self.bucket_dir(path).join("head.json")
    }
}

fn encode<T: Serialize>(file: &Path, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|source| VaultError::Serde {
        path: file.to_path_buf(),
        source,
    })
}

fn encode_line<T: Serialize>(file: &Path, value: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(value).map_err(|source| VaultError::Serde {
        path: file.to_path_buf(),
        source,
    })?;
    line.push(b'\n');
    Ok(line)
}
