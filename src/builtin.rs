//! Built-in one-shot operations for the log monitor and main app sources.
//!
//! Every parameter is fixed here; running one takes nothing but a
//! workspace root.

use crate::patch::{PatchRule, LITERAL_NEWLINE_ESCAPE};

pub const LOG_MONITOR: &str = "lib/log_monitor.dart";
pub const MAIN_APP: &str = "lib/main.dart";

const TWO_DIGITS_MARKER: &str = "String _twoDigits";
const TWO_DIGITS_HELPER: &str =
    "String _twoDigits(int value) => value.toString().padLeft(2, '0');";

const PATCH_ARTIFACT: &str =
    "*** End Patch\"}{\"}*** End Patch**Errabcdefghijklmnopqrstuvwxy}";

const START_AUTOMATION_WITH_RESULT: &str = "    try {
      // 안드로이드 네이티브로 자동화 시작
      final result = await nativeChannel.invokeMethod('startAutomation', {
        'packageName': _selectedPackage,
      });";

const START_AUTOMATION: &str = "    try {
      await nativeChannel.invokeMethod('startAutomation', {
        'packageName': _selectedPackage,
      });";

const TEST_STATS_MARKER: &str = "class TestStats {";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinAction {
    Patch(PatchRule),
    /// Print lines `start..=end`
    Inspect { start: usize, end: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinOperation {
    pub name: &'static str,
    pub summary: &'static str,
    /// Workspace-relative target
    pub file: &'static str,
    pub action: BuiltinAction,
}

pub fn catalog() -> Vec<BuiltinOperation> {
    vec![
        BuiltinOperation {
            name: "append-two-digits",
            summary: "Append the _twoDigits helper unless it is already defined",
            file: LOG_MONITOR,
            action: BuiltinAction::Patch(PatchRule::AppendIfAbsent {
                marker: TWO_DIGITS_MARKER.to_string(),
                line: TWO_DIGITS_HELPER.to_string(),
            }),
        },
        BuiltinOperation {
            name: "cleanup-log-monitor",
            summary: "Strip a corrupted patch terminator left in the log monitor",
            file: LOG_MONITOR,
            action: BuiltinAction::Patch(PatchRule::RemoveArtifact {
                artifact: PATCH_ARTIFACT.to_string(),
                write_unchanged: true,
            }),
        },
        BuiltinOperation {
            name: "replace-result",
            summary: "Drop the unused `result` binding around startAutomation",
            file: MAIN_APP,
            action: BuiltinAction::Patch(PatchRule::ReplaceFragment {
                fragment: START_AUTOMATION_WITH_RESULT.to_string(),
                replacement: START_AUTOMATION.to_string(),
            }),
        },
        BuiltinOperation {
            name: "trim-escapes",
            summary: "Remove literal \\n sequences trailing the log monitor",
            file: LOG_MONITOR,
            action: BuiltinAction::Patch(PatchRule::TrimTrailingEscape {
                escape: LITERAL_NEWLINE_ESCAPE.to_string(),
            }),
        },
        BuiltinOperation {
            name: "inspect-main",
            summary: "Print lines 600-630 of the main app",
            file: MAIN_APP,
            action: BuiltinAction::Inspect {
                start: 600,
                end: 630,
            },
        },
        BuiltinOperation {
            name: "truncate-test-stats",
            summary: "Cut the main app at the TestStats class",
            file: MAIN_APP,
            action: BuiltinAction::Patch(PatchRule::TruncateAtMarker {
                marker: TEST_STATS_MARKER.to_string(),
            }),
        },
    ]
}

pub fn find(name: &str) -> Option<BuiltinOperation> {
    catalog().into_iter().find(|op| op.name == name)
}
