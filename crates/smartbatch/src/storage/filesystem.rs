use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::{checksum, Artifact, ArtifactStore};
use crate::error::StorageError;
use crate::job::GenerationId;
use crate::template::DocumentFormat;

/// Move `src` onto `dst`, replacing it. Tries `rename` first and falls back
/// to copy + delete (cross-device moves).
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Stores artifacts as `<root>/<generation_id>/document-<index:04>.<ext>`.
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        log::debug!(
            "Artifact store at {} ({})",
            crate::sanitize::redact_path(&root),
            crate::sanitize::hash_path(&root)
        );
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_location(
        generation_id: &GenerationId,
        index: usize,
        format: DocumentFormat,
    ) -> String {
        format!(
            "{}/document-{:04}.{}",
            generation_id,
            index,
            format.extension()
        )
    }

    /// Maps a store-relative location to a path under `root`. Absolute paths
    /// and `..` components are rejected.
    fn resolve(&self, location: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(location);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || location.is_empty() {
            return Err(StorageError::OutsideStore(relative.to_path_buf()));
        }
        Ok(self.root.join(relative))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Writes `content` to a fresh temp file next to `target` (O_EXCL), then
    /// moves it into place so readers never see a partial document.
    fn write_atomically(&self, target: &Path, content: &[u8]) -> Result<(), StorageError> {
        let dir = target.parent().unwrap_or(&self.root);
        let temp_path = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| StorageError::WriteFile {
                path: temp_path.clone(),
                source: e,
            })?;

        let written = file
            .write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: temp_path.clone(),
                source: e,
            });
        drop(file);

        if let Err(e) = written.and_then(|_| move_file(&temp_path, target)) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }
}

impl ArtifactStore for FileArtifactStore {
    fn write(
        &self,
        generation_id: &GenerationId,
        index: usize,
        format: DocumentFormat,
        content: &[u8],
    ) -> Result<Artifact, StorageError> {
        let location = Self::document_location(generation_id, index, format);
        let target = self.resolve(&location)?;
        if let Some(parent) = target.parent() {
            self.ensure_directory(parent)?;
        }

        self.write_atomically(&target, content)?;
        log::debug!(
            "Stored document {} of {} ({} bytes)",
            index,
            generation_id.short(),
            content.len()
        );

        Ok(Artifact {
            location,
            size: content.len() as u64,
            format,
            checksum: checksum(content),
        })
    }

    fn read(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(location)?;
        std::fs::read(&path).map_err(|e| StorageError::ReadFile { path, source: e })
    }

    fn purge(&self, generation_id: &GenerationId) -> Result<(), StorageError> {
        let dir = self.resolve(generation_id.as_str())?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFile {
                path: dir,
                source: e,
            }),
        }
    }
}
