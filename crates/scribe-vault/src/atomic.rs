use crate::error::{Result, VaultError};
use scribe_observe::Observer;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, PersistError};

const TEMP_PREFIX: &str = ".scribe-";
const TEMP_SUFFIX: &str = ".tmp";

/// Replaces whole files through a sibling temp file and a rename, so a reader
/// sees either the old bytes or the new bytes and never a mix.
pub struct AtomicWriter {
    observer: Arc<Observer>,
}

impl AtomicWriter {
    pub fn new(observer: Arc<Observer>) -> Self {
        Self { observer }
    }

    pub fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.write_with_hook(path, content, |_| Ok(()))
    }

    /// Same as [`AtomicWriter::write`], with `before_rename` invoked once the
    /// temp file is durable but before it replaces `path`. An error from the
    /// hook aborts the write and leaves `path` untouched.
    pub fn write_with_hook<F>(&self, path: &Path, content: &[u8], before_rename: F) -> Result<()>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| VaultError::InvalidPath {
                path: path.to_path_buf(),
            })?;
        fs::create_dir_all(parent).map_err(|e| VaultError::io("create directory", parent, e))?;

        let permissions = fs::metadata(path)
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.permissions());

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(parent)
            .map_err(|e| VaultError::io("create temp file", parent, e))?;
        let tmp_path = tmp.path().to_path_buf();

        let staged = stage(tmp.as_file_mut(), content, permissions)
            .and_then(|()| before_rename(&tmp_path));
        if let Err(source) = staged {
            self.discard(tmp);
            return Err(VaultError::io("write temp file", &tmp_path, source));
        }

        match tmp.persist(path) {
            Ok(_) => {
                sync_dir(parent);
                Ok(())
            }
            Err(PersistError { error, file }) => {
                self.discard(file);
                Err(VaultError::Persist {
                    path: path.to_path_buf(),
                    source: error,
                })
            }
        }
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| VaultError::io("remove", path, e))?;
        if let Some(parent) = path.parent() {
            sync_dir(parent);
        }
        Ok(())
    }

    fn discard(&self, tmp: NamedTempFile) {
        let tmp_path = tmp.path().to_path_buf();
        if let Err(err) = tmp.close() {
            self.observer.warn_log(&format!(
                "failed to remove temp file {}: {err}",
                tmp_path.display()
            ));
        }
    }
}

fn stage(file: &mut File, content: &[u8], permissions: Option<fs::Permissions>) -> io::Result<()> {
    file.write_all(content)?;
    file.flush()?;
    file.sync_all()?;
    if let Some(permissions) = permissions {
        file.set_permissions(permissions)?;
    }
    Ok(())
}

// Best effort: the rename is already visible; this only narrows the window
// in which a power loss could forget it.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}
