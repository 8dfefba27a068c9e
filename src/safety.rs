use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories inside a workspace that patches must never touch.
const FORBIDDEN_DIRS: &[&str] = &[".git", ".dart_tool", "build"];

/// Keeps patch targets inside the workspace they were declared for.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    /// Canonical workspace root
    workspace_root: PathBuf,
    /// Canonical forbidden directories that exist under the root
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside workspace: {path} (workspace: {workspace})")]
    OutsideWorkspace { path: PathBuf, workspace: PathBuf },

    #[error("Path is in forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("Failed to resolve path {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn canonicalize(path: &Path) -> Result<PathBuf, SafetyError> {
    path.canonicalize()
        .map_err(|source| SafetyError::Canonicalize {
            path: path.to_path_buf(),
            source,
        })
}

impl WorkspaceGuard {
    /// Create a guard rooted at `workspace_root`, resolving symlinks.
    pub fn new(workspace_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let workspace_root = canonicalize(workspace_root.as_ref())?;

        let forbidden_paths = FORBIDDEN_DIRS
            .iter()
            .filter_map(|dir| workspace_root.join(dir).canonicalize().ok())
            .collect();

        Ok(Self {
            workspace_root,
            forbidden_paths,
        })
    }

    pub fn root(&self) -> &Path {
        &self.workspace_root
    }

    /// Resolve `path` against the root and check it is safe to edit.
    ///
    /// The file must exist. Returns its canonical path.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        };

        let canonical = canonicalize(&absolute)?;

        if !canonical.starts_with(&self.workspace_root) {
            return Err(SafetyError::OutsideWorkspace {
                path: canonical,
                workspace: self.workspace_root.clone(),
            });
        }

        if let Some(forbidden) = self
            .forbidden_paths
            .iter()
            .find(|forbidden| canonical.starts_with(forbidden))
        {
            return Err(SafetyError::ForbiddenPath {
                path: canonical.clone(),
                forbidden: forbidden.clone(),
            });
        }

        Ok(canonical)
    }
}
