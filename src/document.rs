use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The full UTF-8 contents of one file, read once.
///
/// A document is never mutated in place. Writing replaces the whole file
/// with new text, and only if the file still holds what was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    path: PathBuf,
    content: String,
    fingerprint: u64,
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("File I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File is not valid UTF-8: {path}")]
    InvalidUtf8 {
        path: PathBuf,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("File changed on disk since it was read: {path}")]
    StaleDocument { path: PathBuf },

    #[error("Path has no parent directory: {0}")]
    NoParent(PathBuf),
}

impl DocumentError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        DocumentError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// xxh3 fingerprint of a text.
pub fn fingerprint(text: &str) -> u64 {
    xxh3_64(text.as_bytes())
}

impl TextDocument {
    /// Read the full contents of `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| DocumentError::io(path, e))?;
        let content = String::from_utf8(bytes).map_err(|source| DocumentError::InvalidUtf8 {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "read document");
        Ok(Self {
            path: path.to_path_buf(),
            fingerprint: fingerprint(&content),
            content,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Replace the whole file with `new_content`.
    ///
    /// The write always happens, even when `new_content` equals what was
    /// read, and the modification time is always bumped.
    pub fn write(&self, new_content: &str) -> Result<(), DocumentError> {
        let on_disk = fs::read(&self.path).map_err(|e| DocumentError::io(&self.path, e))?;
        if xxh3_64(&on_disk) != self.fingerprint {
            return Err(DocumentError::StaleDocument {
                path: self.path.clone(),
            });
        }

        atomic_write(&self.path, new_content.as_bytes())?;

        let now = filetime::FileTime::now();
        filetime::set_file_mtime(&self.path, now).map_err(|e| DocumentError::io(&self.path, e))?;

        let changed = new_content != self.content;
        tracing::debug!(
            path = %self.path.display(),
            bytes = new_content.len(),
            changed,
            "wrote document"
        );
        Ok(())
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full new content lands or the old file is left as it was.
/// The original file's permissions are carried over.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), DocumentError> {
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Err(DocumentError::NoParent(path.to_path_buf())),
    };

    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| DocumentError::io(path, e))?;

    temp.write_all(content)
        .map_err(|e| DocumentError::io(path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| DocumentError::io(path, e))?;

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())
            .map_err(|e| DocumentError::io(path, e))?;
    }

    temp.persist(path)
        .map_err(|e| DocumentError::io(path, e.error))?;

    Ok(())
}
