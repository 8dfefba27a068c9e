//! Integration tests for patch config loading and application

use std::fs;
use tempfile::TempDir;
use text_patcher::config::{
    apply_patches, check_patches, load_from_path, load_from_str, ApplicationError, ConfigError,
    PatchResult,
};
use text_patcher::{PatchError, PatchRule, WorkspaceGuard};

fn setup_test_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(
        dir.path().join("lib/main.dart"),
        "void main() {\n  runApp(const App());\n}\n\nclass TestStats {\n  int n = 0;\n}\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_load_patch_config_basic() {
    let toml = r#"
[meta]
name = "main-fixes"
description = "Trim the main app"
workspace_relative = true

[[patches]]
id = "truncate"
file = "lib/main.dart"

[patches.operation]
type = "truncate-at-marker"
marker = "class TestStats {"
"#;

    let config = load_from_str(toml).expect("Failed to parse config");

    assert_eq!(config.meta.name, "main-fixes");
    assert_eq!(config.meta.description.as_deref(), Some("Trim the main app"));
    assert!(config.meta.workspace_relative);
    assert_eq!(config.patches.len(), 1);
    assert_eq!(
        config.patches[0].operation,
        PatchRule::TruncateAtMarker {
            marker: "class TestStats {".to_string()
        }
    );
}

#[test]
fn test_multiline_fragment_from_toml() {
    let toml = r#"
[[patches]]
id = "replace"
file = "lib/main.dart"

[patches.operation]
type = "replace-fragment"
fragment = """
void main() {
  runApp(const App());
}"""
replacement = """
void main() => runApp(const App());"""
"#;

    let config = load_from_str(toml).unwrap();
    let PatchRule::ReplaceFragment { fragment, .. } = &config.patches[0].operation else {
        panic!("expected replace-fragment");
    };
    assert_eq!(fragment, "void main() {\n  runApp(const App());\n}");
}

#[test]
fn test_apply_from_file() {
    let workspace = setup_test_workspace();
    let patch_file = workspace.path().join("fixes.toml");
    fs::write(
        &patch_file,
        r#"
[meta]
workspace_relative = true

[[patches]]
id = "replace"
file = "lib/main.dart"

[patches.operation]
type = "replace-fragment"
fragment = """
void main() {
  runApp(const App());
}"""
replacement = "void main() => runApp(const App());"

[[patches]]
id = "truncate"
file = "lib/main.dart"

[patches.operation]
type = "truncate-at-marker"
marker = "class TestStats {"
"#,
    )
    .unwrap();

    let config = load_from_path(&patch_file).unwrap();
    let guard = WorkspaceGuard::new(workspace.path()).unwrap();

    let pending = check_patches(&config, &guard);
    assert!(pending
        .iter()
        .all(|(_, r)| matches!(r, Ok(PatchResult::Planned { .. }))));

    let results = apply_patches(&config, &guard);
    assert_eq!(results[0].0, "replace");
    assert!(matches!(results[0].1, Ok(PatchResult::Applied { .. })));
    assert!(matches!(results[1].1, Ok(PatchResult::Applied { .. })));

    assert_eq!(
        fs::read_to_string(workspace.path().join("lib/main.dart")).unwrap(),
        "void main() => runApp(const App());\n"
    );
}

#[test]
fn test_second_apply_of_replace_is_fatal() {
    let workspace = setup_test_workspace();
    let config = load_from_str(
        r#"
[meta]
workspace_relative = true

[[patches]]
id = "replace"
file = "lib/main.dart"

[patches.operation]
type = "replace-fragment"
fragment = "runApp(const App());"
replacement = "runApp(App());"
"#,
    )
    .unwrap();
    let guard = WorkspaceGuard::new(workspace.path()).unwrap();

    let first = apply_patches(&config, &guard);
    assert!(matches!(first[0].1, Ok(PatchResult::Applied { .. })));
    let after_first = fs::read_to_string(workspace.path().join("lib/main.dart")).unwrap();

    let second = apply_patches(&config, &guard);
    match &second[0].1 {
        Err(ApplicationError::Patch {
            source: PatchError::MissingRequiredFragment { closest, .. },
            ..
        }) => {
            assert_eq!(closest.as_ref().map(|c| c.line), Some(2));
        }
        other => panic!("expected missing fragment, got {other:?}"),
    }
    assert_eq!(
        fs::read_to_string(workspace.path().join("lib/main.dart")).unwrap(),
        after_first
    );
}

#[test]
fn test_workspace_escape_rejected() {
    let outer = TempDir::new().unwrap();
    let workspace = outer.path().join("app");
    fs::create_dir(&workspace).unwrap();
    fs::write(outer.path().join("other.dart"), "x").unwrap();

    let config = load_from_str(
        r#"
[meta]
workspace_relative = true

[[patches]]
id = "escape"
file = "../other.dart"

[patches.operation]
type = "truncate-at-marker"
marker = "x"
"#,
    )
    .unwrap();
    let guard = WorkspaceGuard::new(&workspace).unwrap();

    let results = apply_patches(&config, &guard);
    assert!(matches!(results[0].1, Err(ApplicationError::Safety(_))));
    assert_eq!(fs::read_to_string(outer.path().join("other.dart")).unwrap(), "x");
}

#[test]
fn test_load_missing_file() {
    let err = load_from_path("/nonexistent/patches.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_shipped_patch_files_match_builtins() {
    use text_patcher::builtin::{self, BuiltinAction};

    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("patches");
    for name in ["log-monitor.toml", "main-app.toml"] {
        let config = load_from_path(dir.join(name)).unwrap();
        assert!(config.meta.workspace_relative);
        for patch in &config.patches {
            let op = builtin::find(&patch.id).expect("patch id should name a built-in");
            assert_eq!(op.file, patch.file);
            assert_eq!(op.action, BuiltinAction::Patch(patch.operation.clone()));
        }
    }
}
