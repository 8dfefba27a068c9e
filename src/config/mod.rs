pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    apply_patches, check_patches, resolve_patch_file, ApplicationError, PatchReport, PatchResult,
};
pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{Metadata, PatchConfig, PatchDefinition, ValidationError, ValidationIssue};
