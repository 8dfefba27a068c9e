use crate::document::{DocumentError, TextDocument};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The two characters `\` and `n`, as left behind by a botched escape.
pub const LITERAL_NEWLINE_ESCAPE: &str = "\\n";

/// Minimum normalized similarity for a line to be reported as a near miss.
const NEAR_MISS_THRESHOLD: f64 = 0.6;

const PREVIEW_CHARS: usize = 60;

/// A guarded, literal transformation of a whole text.
///
/// Every rule is a pure function from old text to new text plus a flag
/// saying whether its precondition held. Whether the result gets written
/// is decided by [`PatchPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PatchRule {
    /// Append `line` unless `marker` already occurs anywhere.
    AppendIfAbsent { marker: String, line: String },
    /// Delete every occurrence of `artifact`.
    RemoveArtifact {
        artifact: String,
        /// Re-save the file even when the artifact is absent.
        #[serde(default = "default_true")]
        write_unchanged: bool,
    },
    /// Replace the first occurrence of `fragment`. A missing fragment is fatal.
    ReplaceFragment {
        fragment: String,
        replacement: String,
    },
    /// Strip `escape` off the end until it no longer terminates the text.
    TrimTrailingEscape {
        #[serde(default = "default_escape")]
        escape: String,
    },
    /// Drop everything from `marker` to the end of the text.
    TruncateAtMarker { marker: String },
}

fn default_true() -> bool {
    true
}

fn default_escape() -> String {
    LITERAL_NEWLINE_ESCAPE.to_string()
}

/// Output of a rule: the new text and whether the precondition held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub text: String,
    pub applied: bool,
}

/// Closest line to a fragment that could not be found.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMiss {
    /// 1-indexed line number in the searched text
    pub line: usize,
    /// Normalized Levenshtein similarity in [0, 1]
    pub similarity: f64,
}

impl fmt::Display for NearMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "closest match at line {} ({:.0}% similar)",
            self.line,
            self.similarity * 100.0
        )
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Required fragment not found: {preview:?}{}", near_miss_suffix(.closest))]
    MissingRequiredFragment {
        preview: String,
        closest: Option<NearMiss>,
    },

    #[error(transparent)]
    Document(#[from] DocumentError),
}

fn near_miss_suffix(closest: &Option<NearMiss>) -> String {
    match closest {
        Some(near) => format!(" ({near})"),
        None => String::new(),
    }
}

impl PatchError {
    /// True for errors that must stop all further work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PatchError::MissingRequiredFragment { .. })
    }
}

impl PatchRule {
    pub fn kind(&self) -> &'static str {
        match self {
            PatchRule::AppendIfAbsent { .. } => "append-if-absent",
            PatchRule::RemoveArtifact { .. } => "remove-artifact",
            PatchRule::ReplaceFragment { .. } => "replace-fragment",
            PatchRule::TrimTrailingEscape { .. } => "trim-trailing-escape",
            PatchRule::TruncateAtMarker { .. } => "truncate-at-marker",
        }
    }

    /// Whether the file is re-saved even when the rule's precondition did
    /// not hold.
    pub fn writes_unchanged(&self) -> bool {
        match self {
            PatchRule::AppendIfAbsent { .. } | PatchRule::ReplaceFragment { .. } => false,
            PatchRule::RemoveArtifact {
                write_unchanged, ..
            } => *write_unchanged,
            PatchRule::TrimTrailingEscape { .. } | PatchRule::TruncateAtMarker { .. } => true,
        }
    }

    /// Apply the rule to `text` without touching the filesystem.
    pub fn transform(&self, text: &str) -> Result<Transformed, PatchError> {
        match self {
            PatchRule::AppendIfAbsent { marker, line } => {
                if text.contains(marker.as_str()) {
                    return Ok(unchanged(text));
                }
                let mut out = with_single_trailing_newline(text);
                out.push_str(line);
                if !line.ends_with('\n') {
                    out.push('\n');
                }
                Ok(Transformed {
                    text: out,
                    applied: true,
                })
            }
            PatchRule::RemoveArtifact { artifact, .. } => {
                if artifact.is_empty() || !text.contains(artifact.as_str()) {
                    return Ok(unchanged(text));
                }
                Ok(Transformed {
                    text: text.replace(artifact.as_str(), ""),
                    applied: true,
                })
            }
            PatchRule::ReplaceFragment {
                fragment,
                replacement,
            } => {
                if fragment.is_empty() || !text.contains(fragment.as_str()) {
                    return Err(PatchError::MissingRequiredFragment {
                        preview: preview(fragment),
                        closest: closest_line(text, fragment),
                    });
                }
                Ok(Transformed {
                    text: text.replacen(fragment.as_str(), replacement, 1),
                    applied: true,
                })
            }
            PatchRule::TrimTrailingEscape { escape } => {
                let mut rest = text;
                if !escape.is_empty() {
                    while let Some(stripped) = rest.strip_suffix(escape.as_str()) {
                        rest = stripped;
                    }
                }
                let out = with_single_trailing_newline(rest);
                Ok(Transformed {
                    applied: out != text,
                    text: out,
                })
            }
            PatchRule::TruncateAtMarker { marker } => {
                let (kept, found) = match text.find(marker.as_str()) {
                    Some(idx) if !marker.is_empty() => (&text[..idx], true),
                    _ => (text, false),
                };
                Ok(Transformed {
                    text: with_single_trailing_newline(kept),
                    applied: found,
                })
            }
        }
    }
}

fn unchanged(text: &str) -> Transformed {
    Transformed {
        text: text.to_string(),
        applied: false,
    }
}

/// Trailing whitespace as `str.rstrip()` sees it: Unicode whitespace plus
/// the information separators `\x1c`..=`\x1f`.
fn is_trailing_space(c: char) -> bool {
    c.is_whitespace() || ('\x1c'..='\x1f').contains(&c)
}

/// Trim trailing whitespace and end with exactly one `\n`.
pub fn with_single_trailing_newline(text: &str) -> String {
    let trimmed = text.trim_end_matches(is_trailing_space);
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push_str(trimmed);
    out.push('\n');
    out
}

fn preview(fragment: &str) -> String {
    let first = fragment
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.chars().count() > PREVIEW_CHARS {
        let cut: String = first.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}

/// Find the line of `text` most similar to the first non-blank line of
/// `fragment`.
fn closest_line(text: &str, fragment: &str) -> Option<NearMiss> {
    let needle = fragment.lines().map(str::trim).find(|l| !l.is_empty())?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| NearMiss {
            line: idx + 1,
            similarity: strsim::normalized_levenshtein(needle, line.trim()),
        })
        .filter(|near| near.similarity >= NEAR_MISS_THRESHOLD)
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity).then(b.line.cmp(&a.line)))
}

/// A rule bound to the file it edits.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOperation does nothing until apply() is called"]
pub struct PatchOperation {
    pub file: PathBuf,
    pub rule: PatchRule,
}

/// Result of running a [`PatchOperation`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome should be checked for applied/already-applied"]
pub enum PatchOutcome {
    /// New content was written
    Applied { file: PathBuf },
    /// The file was re-saved with identical content
    Rewritten { file: PathBuf },
    /// Nothing was written
    AlreadyApplied { file: PathBuf },
}

/// What committing a plan would do to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedWrite {
    Changed,
    Unchanged,
    Skip,
}

impl PatchOperation {
    pub fn new(file: impl Into<PathBuf>, rule: PatchRule) -> Self {
        Self {
            file: file.into(),
            rule,
        }
    }

    /// Read the file and compute the new text without writing anything.
    pub fn plan(&self) -> Result<PatchPlan, PatchError> {
        let document = TextDocument::read(&self.file)?;
        let transformed = self.rule.transform(document.content())?;
        Ok(PatchPlan {
            document,
            transformed,
            write_unchanged: self.rule.writes_unchanged(),
        })
    }

    /// Read, transform and (if the rule says so) write back.
    pub fn apply(&self) -> Result<PatchOutcome, PatchError> {
        let outcome = self.plan()?.commit()?;
        tracing::info!(
            file = %self.file.display(),
            rule = self.rule.kind(),
            outcome = ?outcome,
            "patch operation finished"
        );
        Ok(outcome)
    }
}

/// A computed, not yet written patch.
#[derive(Debug, Clone)]
#[must_use = "PatchPlan does nothing until commit() is called"]
pub struct PatchPlan {
    document: TextDocument,
    transformed: Transformed,
    write_unchanged: bool,
}

impl PatchPlan {
    pub fn file(&self) -> &Path {
        self.document.path()
    }

    pub fn original(&self) -> &str {
        self.document.content()
    }

    pub fn patched(&self) -> &str {
        &self.transformed.text
    }

    pub fn planned_write(&self) -> PlannedWrite {
        if !self.transformed.applied && !self.write_unchanged {
            PlannedWrite::Skip
        } else if self.transformed.text != self.document.content() {
            PlannedWrite::Changed
        } else {
            PlannedWrite::Unchanged
        }
    }

    pub fn commit(self) -> Result<PatchOutcome, PatchError> {
        let file = self.document.path().to_path_buf();
        match self.planned_write() {
            PlannedWrite::Skip => Ok(PatchOutcome::AlreadyApplied { file }),
            PlannedWrite::Changed => {
                self.document.write(&self.transformed.text)?;
                Ok(PatchOutcome::Applied { file })
            }
            PlannedWrite::Unchanged => {
                self.document.write(&self.transformed.text)?;
                Ok(PatchOutcome::Rewritten { file })
            }
        }
    }
}
