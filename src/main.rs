use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use text_patcher::builtin::{self, BuiltinAction};
use text_patcher::config::{
    apply_patches, check_patches, load_from_path, resolve_patch_file, ApplicationError,
    PatchReport, PatchResult,
};
use text_patcher::{
    LineRange, ListingFormat, PatchError, PatchOperation, PatchOutcome, RangePrinter,
    WorkspaceGuard,
};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Exit status for a missing required fragment, distinct from other failures.
const EXIT_MISSING_FRAGMENT: i32 = 2;
const EXIT_FAILURE: i32 = 1;

const WORKSPACE_ENV: &str = "TEXT_PATCHER_WORKSPACE";

#[derive(Parser)]
#[command(name = "text-patcher")]
#[command(about = "Guarded, idempotent literal text patching", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug events to stderr (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one built-in operation
    Run {
        /// Name of the operation (see `list`)
        name: String,

        /// Path to workspace root (defaults to $TEXT_PATCHER_WORKSPACE, then cwd)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },

    /// Apply patches from TOML patch files
    Apply {
        /// Path to workspace root (defaults to $TEXT_PATCHER_WORKSPACE, then cwd)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Specific patch file to apply (otherwise applies all in patches/)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Check status of patches without applying
    Status {
        /// Path to workspace root (defaults to $TEXT_PATCHER_WORKSPACE, then cwd)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Specific patch file to check (otherwise checks all in patches/)
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },

    /// Print a numbered, inclusive line range of a file
    Print {
        file: PathBuf,

        /// First line (1-indexed)
        #[arg(short, long)]
        start: usize,

        /// Last line (inclusive)
        #[arg(short, long)]
        end: usize,

        /// Emit one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// List built-in operations
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { name, workspace } => cmd_run(&name, workspace),

        Commands::Apply {
            workspace,
            patches,
            dry_run,
            diff,
        } => cmd_apply(workspace, patches, dry_run, diff),

        Commands::Status { workspace, patches } => cmd_status(workspace, patches),

        Commands::Print {
            file,
            start,
            end,
            json,
        } => cmd_print(file, start, end, json),

        Commands::List => cmd_list(),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("text_patcher=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Resolve workspace path.
///
/// Priority order:
/// 1. Explicit --workspace flag
/// 2. TEXT_PATCHER_WORKSPACE environment variable
/// 3. Current directory
fn resolve_workspace(cli_workspace: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_workspace {
        return path
            .canonicalize()
            .with_context(|| format!("workspace not found: {}", path.display()));
    }

    if let Ok(env_path) = env::var(WORKSPACE_ENV) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!("Warning: {WORKSPACE_ENV} is set but path doesn't exist: {env_path}").yellow()
        );
    }

    Ok(env::current_dir()?)
}

/// Discover all .toml patch files in a patches/ directory.
///
/// Discovery order:
/// 1. `<workspace>/patches`
/// 2. `./patches` relative to the current working directory
fn discover_patch_files(workspace: &Path) -> Result<Vec<PathBuf>> {
    let cwd_patches_dir = env::current_dir().ok().map(|cwd| cwd.join("patches"));
    let candidate_dirs: Vec<PathBuf> = std::iter::once(workspace.join("patches"))
        .chain(cwd_patches_dir)
        .collect();

    for patches_dir in candidate_dirs {
        if !patches_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml patch files found in either ./patches or {}/patches",
        workspace.display()
    )
}

fn patch_files(workspace: &Path, patches: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    match patches {
        Some(path) => Ok(vec![path]),
        None => discover_patch_files(workspace),
    }
}

/// Show unified diff between original and modified content.
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn exit_code_for(fatal: bool) -> i32 {
    if fatal {
        EXIT_MISSING_FRAGMENT
    } else {
        EXIT_FAILURE
    }
}

fn cmd_run(name: &str, workspace: Option<PathBuf>) -> Result<()> {
    let operation = builtin::find(name).with_context(|| {
        format!("unknown operation '{name}' (run `text-patcher list` to see the catalog)")
    })?;
    let workspace = resolve_workspace(workspace)?;
    let guard = WorkspaceGuard::new(&workspace)?;
    let file = guard.validate_path(operation.file)?;

    match operation.action {
        BuiltinAction::Inspect { start, end } => {
            let range = LineRange::new(start, end)?;
            let stdout = io::stdout();
            RangePrinter::new(&file, range).print(&mut stdout.lock(), ListingFormat::Human)?;
            Ok(())
        }
        BuiltinAction::Patch(rule) => match PatchOperation::new(&file, rule).apply() {
            Ok(PatchOutcome::Applied { file }) => {
                println!("{} {}: Applied to {}", "✓".green(), name, file.display());
                Ok(())
            }
            Ok(PatchOutcome::Rewritten { file }) => {
                println!(
                    "{} {}: Rewrote {} (no change)",
                    "⊙".yellow(),
                    name,
                    file.display()
                );
                Ok(())
            }
            Ok(PatchOutcome::AlreadyApplied { file }) => {
                println!(
                    "{} {}: Already applied to {}",
                    "⊙".yellow(),
                    name,
                    file.display()
                );
                Ok(())
            }
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), name, e);
                eprintln!("  File: {}", file.display());
                if let PatchError::MissingRequiredFragment { .. } = e {
                    eprintln!("  {}", "CONFLICT: required fragment is not present".red());
                    eprintln!("  Nothing was written.");
                }
                std::process::exit(exit_code_for(e.is_fatal()));
            }
        },
    }
}

fn cmd_apply(
    workspace: Option<PathBuf>,
    patches: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let workspace = resolve_workspace(workspace)?;
    let guard = WorkspaceGuard::new(&workspace)?;
    let patch_files = patch_files(&workspace, patches)?;

    println!("Workspace: {}", workspace.display());
    println!();

    let mut total_applied = 0;
    let mut total_rewritten = 0;
    let mut total_already_applied = 0;
    let mut total_failed = 0;
    let mut fatal = false;
    let mut stopped = false;

    for patch_file in patch_files {
        println!("Loading patches from {}...", patch_file.display());

        let config = load_from_path(&patch_file)?;

        if dry_run {
            println!("{}", "  [DRY RUN - nothing will be written]".cyan());
            if show_diff {
                for patch in &config.patches {
                    let Ok(file) = resolve_patch_file(&config, patch, &guard) else {
                        continue;
                    };
                    if let Ok(plan) = PatchOperation::new(&file, patch.operation.clone()).plan() {
                        if plan.original() != plan.patched() {
                            display_diff(plan.file(), plan.original(), plan.patched());
                        }
                    }
                }
            }
        }

        // Only read files that the patches will touch.
        let mut file_contents_before: HashMap<PathBuf, String> = HashMap::new();
        if show_diff && !dry_run {
            for patch in &config.patches {
                if let Ok(file) = resolve_patch_file(&config, patch, &guard) {
                    if let Ok(content) = fs::read_to_string(&file) {
                        file_contents_before.entry(file).or_insert(content);
                    }
                }
            }
        }

        let results = if dry_run {
            check_patches(&config, &guard)
        } else {
            apply_patches(&config, &guard)
        };

        for (patch_id, result) in results {
            match result {
                Ok(PatchResult::Applied { file }) => {
                    println!(
                        "{} {}: Applied to {}",
                        "✓".green(),
                        patch_id,
                        file.display()
                    );
                    total_applied += 1;
                }
                Ok(PatchResult::Planned { file }) => {
                    println!(
                        "{} {}: Would apply to {}",
                        "✓".green(),
                        patch_id,
                        file.display()
                    );
                    total_applied += 1;
                }
                Ok(PatchResult::Rewritten { file }) => {
                    println!(
                        "{} {}: Rewrote {} (no change)",
                        "⊙".yellow(),
                        patch_id,
                        file.display()
                    );
                    total_rewritten += 1;
                }
                Ok(PatchResult::AlreadyApplied { file }) => {
                    println!(
                        "{} {}: Already applied to {}",
                        "⊙".yellow(),
                        patch_id,
                        file.display()
                    );
                    total_already_applied += 1;
                }
                Err(e) => {
                    eprintln!("{} {}: Error - {}", "✗".red(), patch_id, e);
                    total_failed += 1;
                    stopped |= e.aborts_run();

                    match &e {
                        ApplicationError::Patch {
                            file,
                            source: PatchError::MissingRequiredFragment { .. },
                        } => {
                            fatal = true;
                            eprintln!("  {}", "CONFLICT: required fragment is not present".red());
                            eprintln!("  File: {}", file.display());
                            eprintln!("  Possible causes:");
                            eprintln!("    - The fragment was already replaced by hand");
                            eprintln!("    - Surrounding code was reformatted or edited");
                        }
                        ApplicationError::Patch { source, .. } => {
                            eprintln!("  Patch error: {}", source);
                        }
                        _ => {}
                    }
                }
            }
        }

        if show_diff && !dry_run {
            let mut files: Vec<_> = file_contents_before.into_iter().collect();
            files.sort();
            for (file, before) in files {
                if let Ok(after) = fs::read_to_string(&file) {
                    if before != after {
                        display_diff(&file, &before, &after);
                    }
                }
            }
        }

        println!();

        if stopped && !dry_run {
            break;
        }
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!("  {} rewritten", format!("{}", total_rewritten).yellow());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(exit_code_for(fatal));
    }

    Ok(())
}

fn cmd_status(workspace: Option<PathBuf>, patches: Option<PathBuf>) -> Result<()> {
    let workspace = resolve_workspace(workspace)?;
    let guard = WorkspaceGuard::new(&workspace)?;
    let patch_files = patch_files(&workspace, patches)?;

    println!("{}", "Patch Status Report".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    let mut applied = Vec::new();
    let mut pending = Vec::new();
    let mut failing = Vec::new();
    let mut any_missing_fragment = false;

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;
        let results: PatchReport = check_patches(&config, &guard);

        for (patch_id, result) in results {
            match result {
                Ok(PatchResult::Planned { .. }) => pending.push(patch_id),
                Ok(_) => applied.push(patch_id),
                Err(e) => {
                    any_missing_fragment |= e.is_fatal();
                    failing.push((patch_id, e.to_string()));
                }
            }
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "UP TO DATE".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {}", id);
        }
        println!();
    }

    if !pending.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊙".yellow(),
            "PENDING".yellow().bold(),
            pending.len()
        );
        for id in &pending {
            println!("  - {}", id);
        }
        println!();
    }

    if !failing.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✗".red(),
            "FAILING".red().bold(),
            failing.len()
        );
        for (id, reason) in &failing {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
        std::process::exit(exit_code_for(any_missing_fragment));
    }

    Ok(())
}

fn cmd_print(file: PathBuf, start: usize, end: usize, json: bool) -> Result<()> {
    let range = LineRange::new(start, end)?;
    let format = if json {
        ListingFormat::JsonLines
    } else {
        ListingFormat::Human
    };
    let stdout = io::stdout();
    RangePrinter::new(file, range).print(&mut stdout.lock(), format)?;
    Ok(())
}

fn cmd_list() -> Result<()> {
    println!("{}", "Built-in operations".bold());
    for op in builtin::catalog() {
        let kind = match &op.action {
            BuiltinAction::Patch(rule) => rule.kind().to_string(),
            BuiltinAction::Inspect { start, end } => format!("print {start}-{end}"),
        };
        println!(
            "  {:<22} {:<22} {}",
            op.name.bold(),
            kind.cyan(),
            op.file.dimmed()
        );
        println!("  {:<22} {}", "", op.summary);
    }
    Ok(())
}
