//! Text Patcher: guarded, idempotent literal text patching
//!
//! Each patch reads one file's full text, checks a single literal
//! precondition, applies a deterministic transformation and writes the
//! whole file back, or leaves it alone.
//!
//! # Architecture
//!
//! Every rule is a pure [`PatchRule::transform`] from old text to new
//! text plus an `applied` flag. A thin I/O shell ([`PatchOperation`])
//! reads the [`TextDocument`], decides whether to write, and performs the
//! full-file overwrite. Rules can be declared in TOML patch files
//! ([`config`]) or taken from the [`builtin`] catalog.
//!
//! # Safety
//!
//! - Atomic file writes (tempfile + fsync + rename)
//! - Writes refuse to clobber a file that changed since it was read
//! - Workspace boundary enforcement
//! - UTF-8 validation
//! - Idempotent operations
//!
//! # Example
//!
//! ```no_run
//! use text_patcher::{PatchOperation, PatchRule};
//!
//! let op = PatchOperation::new(
//!     "lib/log_monitor.dart",
//!     PatchRule::TruncateAtMarker {
//!         marker: "class TestStats {".to_string(),
//!     },
//! );
//!
//! match op.apply() {
//!     Ok(outcome) => println!("Patch finished: {:?}", outcome),
//!     Err(e) => eprintln!("Patch failed: {}", e),
//! }
//! ```

pub mod builtin;
pub mod config;
pub mod document;
pub mod patch;
pub mod range;
pub mod safety;

// Re-exports
pub use config::{
    apply_patches, check_patches, load_from_path, load_from_str, ApplicationError, ConfigError,
    PatchConfig, PatchResult,
};
pub use document::{DocumentError, TextDocument};
pub use patch::{
    with_single_trailing_newline, NearMiss, PatchError, PatchOperation, PatchOutcome, PatchPlan,
    PatchRule, PlannedWrite, Transformed, LITERAL_NEWLINE_ESCAPE,
};
pub use range::{lines_in_range, LineRange, ListingFormat, NumberedLine, RangeError, RangePrinter};
pub use safety::{SafetyError, WorkspaceGuard};
