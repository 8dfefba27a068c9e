use crate::patch::PatchRule;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        let mut seen = HashSet::new();
        for patch in &self.patches {
            let patch_id = if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
                None
            } else {
                if !seen.insert(patch.id.as_str()) {
                    issues.push(ValidationIssue::DuplicateId(patch.id.clone()));
                }
                Some(patch.id.clone())
            };

            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: patch_id.clone(),
                    field: "file",
                });
            }

            let (field, value) = match &patch.operation {
                PatchRule::AppendIfAbsent { marker, line } => {
                    if line.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: patch_id.clone(),
                            field: "operation.line",
                        });
                    }
                    ("operation.marker", marker)
                }
                PatchRule::RemoveArtifact { artifact, .. } => ("operation.artifact", artifact),
                PatchRule::ReplaceFragment { fragment, .. } => ("operation.fragment", fragment),
                PatchRule::TrimTrailingEscape { escape } => ("operation.escape", escape),
                PatchRule::TruncateAtMarker { marker } => ("operation.marker", marker),
            };
            if value.is_empty() {
                issues.push(ValidationIssue::MissingField { patch_id, field });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Resolve `file` against the workspace root instead of the cwd
    #[serde(default)]
    pub workspace_relative: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    pub file: String,
    pub operation: PatchRule,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    DuplicateId(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId(id) => write!(f, "patch id '{id}' is used more than once"),
        }
    }
}
