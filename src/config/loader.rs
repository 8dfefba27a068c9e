use crate::config::schema::{PatchConfig, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read patch config from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse patch config TOML{}: {source}", path_suffix(.path))]
    Toml {
        path: Option<PathBuf>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid patch config{}: {source}", path_suffix(.path))]
    Validation {
        path: Option<PathBuf>,
        #[source]
        source: ValidationError,
    },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" ({})", path.display()),
        None => String::new(),
    }
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchConfig, ConfigError> {
    let config: PatchConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ValidationIssue;
    use crate::patch::PatchRule;

    #[test]
    fn test_load_minimal() {
        let config = load_from_str(
            r#"
[meta]
name = "fixes"
workspace_relative = true

[[patches]]
id = "strip-artifact"
file = "lib/log_monitor.dart"

[patches.operation]
type = "remove-artifact"
artifact = "*** End Patch"
"#,
        )
        .unwrap();

        assert_eq!(config.meta.name, "fixes");
        assert!(config.meta.workspace_relative);
        assert_eq!(
            config.patches[0].operation,
            PatchRule::RemoveArtifact {
                artifact: "*** End Patch".to_string(),
                write_unchanged: true,
            }
        );
    }

    #[test]
    fn test_validation_collects_all_issues() {
        let err = load_from_str(
            r#"
[[patches]]
id = "a"
file = ""

[patches.operation]
type = "truncate-at-marker"
marker = ""

[[patches]]
id = "a"
file = "lib/main.dart"

[patches.operation]
type = "trim-trailing-escape"
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation { source, path } => {
                assert!(path.is_none());
                assert_eq!(
                    source.issues,
                    vec![
                        ValidationIssue::MissingField {
                            patch_id: Some("a".to_string()),
                            field: "file",
                        },
                        ValidationIssue::MissingField {
                            patch_id: Some("a".to_string()),
                            field: "operation.marker",
                        },
                        ValidationIssue::DuplicateId("a".to_string()),
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_config_rejected() {
        let err = load_from_str("").unwrap_err();
        assert!(err.to_string().contains("contains no patches"));
    }

    #[test]
    fn test_unknown_operation_type() {
        let err = load_from_str(
            r#"
[[patches]]
id = "x"
file = "a.txt"

[patches.operation]
type = "rewrite-everything"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn test_load_from_path_attaches_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[[patches]]\nid = 3\n").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { path: Some(_), .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
