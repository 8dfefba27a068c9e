//! Patch applicator - runs patch definitions against a workspace
//!
//! This module provides high-level patch application that:
//! - Resolves each patch's file through the [`WorkspaceGuard`]
//! - Runs patches one at a time, in declaration order
//! - Stops at the first error: a missing required fragment or a file that
//!   cannot be resolved, read or written
//! - Reports one result per patch

use crate::config::schema::{PatchConfig, PatchDefinition};
use crate::patch::{PatchError, PatchOperation, PatchOutcome, PlannedWrite};
use crate::safety::{SafetyError, WorkspaceGuard};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result of running a single patch
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked for success/failure"]
pub enum PatchResult {
    /// New content was written
    Applied { file: PathBuf },
    /// File was re-saved with unchanged content
    Rewritten { file: PathBuf },
    /// Precondition said there was nothing to do; file untouched
    AlreadyApplied { file: PathBuf },
    /// Check mode: the patch would write new content
    Planned { file: PathBuf },
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchResult::Applied { file } => write!(f, "Applied patch to {}", file.display()),
            PatchResult::Rewritten { file } => {
                write!(f, "Rewrote {} (content unchanged)", file.display())
            }
            PatchResult::AlreadyApplied { file } => {
                write!(f, "Already applied to {}", file.display())
            }
            PatchResult::Planned { file } => write!(f, "Would change {}", file.display()),
        }
    }
}

impl From<PatchOutcome> for PatchResult {
    fn from(outcome: PatchOutcome) -> Self {
        match outcome {
            PatchOutcome::Applied { file } => PatchResult::Applied { file },
            PatchOutcome::Rewritten { file } => PatchResult::Rewritten { file },
            PatchOutcome::AlreadyApplied { file } => PatchResult::AlreadyApplied { file },
        }
    }
}

/// Errors during patch application
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("{}: {source}", .file.display())]
    Patch {
        file: PathBuf,
        #[source]
        source: PatchError,
    },

    #[error("not run: patch '{after}' failed")]
    Aborted { after: String },
}

impl ApplicationError {
    /// True for a missing required fragment.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplicationError::Patch { source, .. } if source.is_fatal())
    }

    /// True when this error stops an apply run. Every error raised by the
    /// patch itself does; only the `Aborted` placeholder does not.
    pub fn aborts_run(&self) -> bool {
        !matches!(self, ApplicationError::Aborted { .. })
    }
}

pub type PatchReport = Vec<(String, Result<PatchResult, ApplicationError>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Apply,
    Check,
}

/// Apply every patch of `config`, in order.
///
/// Each patch is a full read, transform, write cycle, so later patches see
/// the writes of earlier ones. After the first error the remaining patches
/// are reported as [`ApplicationError::Aborted`] and nothing else is written.
pub fn apply_patches(config: &PatchConfig, guard: &WorkspaceGuard) -> PatchReport {
    run_patches(config, guard, Mode::Apply)
}

/// Evaluate every patch of `config` without writing anything.
///
/// `Planned` means "would write new content". Errors are reported but do
/// not stop the check of later patches.
pub fn check_patches(config: &PatchConfig, guard: &WorkspaceGuard) -> PatchReport {
    run_patches(config, guard, Mode::Check)
}

/// Resolve the file a patch targets.
pub fn resolve_patch_file(
    config: &PatchConfig,
    patch: &PatchDefinition,
    guard: &WorkspaceGuard,
) -> Result<PathBuf, SafetyError> {
    if config.meta.workspace_relative {
        guard.validate_path(&patch.file)
    } else {
        Ok(PathBuf::from(&patch.file))
    }
}

fn run_patches(config: &PatchConfig, guard: &WorkspaceGuard, mode: Mode) -> PatchReport {
    let mut results = Vec::with_capacity(config.patches.len());
    let mut failed: Option<String> = None;

    for patch in &config.patches {
        if let Some(after) = &failed {
            results.push((
                patch.id.clone(),
                Err(ApplicationError::Aborted {
                    after: after.clone(),
                }),
            ));
            continue;
        }

        let result = run_patch(config, patch, guard, mode);
        match &result {
            Ok(outcome) => {
                tracing::info!(patch = %patch.id, result = %outcome, "patch finished");
            }
            Err(err) => {
                tracing::warn!(
                    patch = %patch.id,
                    error = %err,
                    missing_fragment = err.is_fatal(),
                    "patch failed"
                );
                if mode == Mode::Apply && err.aborts_run() {
                    failed = Some(patch.id.clone());
                }
            }
        }
        results.push((patch.id.clone(), result));
    }

    results
}

fn run_patch(
    config: &PatchConfig,
    patch: &PatchDefinition,
    guard: &WorkspaceGuard,
    mode: Mode,
) -> Result<PatchResult, ApplicationError> {
    let file = resolve_patch_file(config, patch, guard)?;
    tracing::debug!(
        patch = %patch.id,
        rule = patch.operation.kind(),
        file = %file.display(),
        "running patch"
    );

    let operation = PatchOperation::new(&file, patch.operation.clone());
    let with_file = |source: PatchError| ApplicationError::Patch {
        file: file.clone(),
        source,
    };

    match mode {
        Mode::Apply => operation.apply().map(PatchResult::from).map_err(with_file),
        Mode::Check => {
            let plan = operation.plan().map_err(with_file)?;
            Ok(match plan.planned_write() {
                PlannedWrite::Changed => PatchResult::Planned { file },
                PlannedWrite::Unchanged | PlannedWrite::Skip => {
                    PatchResult::AlreadyApplied { file }
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Metadata;
    use crate::patch::PatchRule;
    use std::fs;

    fn config(patches: Vec<PatchDefinition>) -> PatchConfig {
        PatchConfig {
            meta: Metadata {
                name: "test".to_string(),
                description: None,
                workspace_relative: true,
            },
            patches,
        }
    }

    fn definition(id: &str, file: &str, operation: PatchRule) -> PatchDefinition {
        PatchDefinition {
            id: id.to_string(),
            file: file.to_string(),
            operation,
        }
    }

    #[test]
    fn test_patch_result_display() {
        let applied = PatchResult::Applied {
            file: PathBuf::from("/tmp/main.dart"),
        };
        assert!(applied.to_string().contains("Applied"));

        let rewritten = PatchResult::Rewritten {
            file: PathBuf::from("/tmp/main.dart"),
        };
        assert!(rewritten.to_string().contains("unchanged"));

        let planned = PatchResult::Planned {
            file: PathBuf::from("/tmp/main.dart"),
        };
        assert!(planned.to_string().contains("Would change"));
    }

    #[test]
    fn test_later_patches_see_earlier_writes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "keep\nCUT\ndrop\n").unwrap();
        let guard = WorkspaceGuard::new(dir.path()).unwrap();

        let config = config(vec![
            definition(
                "truncate",
                "a.txt",
                PatchRule::TruncateAtMarker {
                    marker: "CUT".to_string(),
                },
            ),
            definition(
                "append",
                "a.txt",
                PatchRule::AppendIfAbsent {
                    marker: "tail".to_string(),
                    line: "tail".to_string(),
                },
            ),
        ]);

        let results = apply_patches(&config, &guard);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, Ok(PatchResult::Applied { .. })));
        assert!(matches!(results[1].1, Ok(PatchResult::Applied { .. })));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "keep\ntail\n"
        );
    }

    #[test]
    fn test_fatal_error_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "content\n").unwrap();
        let guard = WorkspaceGuard::new(dir.path()).unwrap();

        let config = config(vec![
            definition(
                "replace",
                "a.txt",
                PatchRule::ReplaceFragment {
                    fragment: "missing".to_string(),
                    replacement: "x".to_string(),
                },
            ),
            definition(
                "append",
                "a.txt",
                PatchRule::AppendIfAbsent {
                    marker: "tail".to_string(),
                    line: "tail".to_string(),
                },
            ),
        ]);

        let results = apply_patches(&config, &guard);
        assert!(matches!(&results[0].1, Err(e) if e.is_fatal()));
        assert!(matches!(
            &results[1].1,
            Err(ApplicationError::Aborted { after }) if after == "replace"
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "content\n"
        );
    }

    #[test]
    fn test_check_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "abc\\n\\n").unwrap();
        let guard = WorkspaceGuard::new(dir.path()).unwrap();

        let config = config(vec![
            definition(
                "trim",
                "a.txt",
                PatchRule::TrimTrailingEscape {
                    escape: "\\n".to_string(),
                },
            ),
            definition(
                "replace",
                "a.txt",
                PatchRule::ReplaceFragment {
                    fragment: "missing".to_string(),
                    replacement: "x".to_string(),
                },
            ),
            definition(
                "artifact",
                "a.txt",
                PatchRule::RemoveArtifact {
                    artifact: "zzz".to_string(),
                    write_unchanged: true,
                },
            ),
        ]);

        let results = check_patches(&config, &guard);
        assert!(matches!(results[0].1, Ok(PatchResult::Planned { .. })));
        assert!(matches!(&results[1].1, Err(e) if e.is_fatal()));
        assert!(matches!(
            results[2].1,
            Ok(PatchResult::AlreadyApplied { .. })
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "abc\\n\\n"
        );
    }

    #[test]
    fn test_missing_file_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "keep\nCUT\n").unwrap();
        let guard = WorkspaceGuard::new(dir.path()).unwrap();

        let config = config(vec![
            definition(
                "gone",
                "absent.txt",
                PatchRule::TruncateAtMarker {
                    marker: "m".to_string(),
                },
            ),
            definition(
                "later",
                "b.txt",
                PatchRule::TruncateAtMarker {
                    marker: "CUT".to_string(),
                },
            ),
        ]);

        let results = apply_patches(&config, &guard);
        assert!(matches!(results[0].1, Err(ApplicationError::Safety(_))));
        assert!(matches!(
            &results[1].1,
            Err(ApplicationError::Aborted { after }) if after == "gone"
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "keep\nCUT\n"
        );

        // Checking never aborts.
        let checked = check_patches(&config, &guard);
        assert!(matches!(checked[0].1, Err(ApplicationError::Safety(_))));
        assert!(matches!(checked[1].1, Ok(PatchResult::Planned { .. })));
    }

    #[test]
    fn test_invalid_utf8_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.txt"), [0xff, 0xfe]).unwrap();
        fs::write(dir.path().join("b.txt"), "keep\nCUT\n").unwrap();
        let guard = WorkspaceGuard::new(dir.path()).unwrap();

        let config = config(vec![
            definition(
                "bad",
                "bad.txt",
                PatchRule::TruncateAtMarker {
                    marker: "m".to_string(),
                },
            ),
            definition(
                "later",
                "b.txt",
                PatchRule::TruncateAtMarker {
                    marker: "CUT".to_string(),
                },
            ),
        ]);

        let results = apply_patches(&config, &guard);
        assert!(matches!(
            &results[0].1,
            Err(ApplicationError::Patch {
                source: PatchError::Document(_),
                ..
            })
        ));
        assert!(matches!(results[1].1, Err(ApplicationError::Aborted { .. })));
        assert_eq!(
            fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "keep\nCUT\n"
        );
    }
}
