//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "promptstack", version, about = "AI suggestions for prose, reviewed as diffs")]
pub struct Cli {
    /// Config file to use instead of the XDG default.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the line diff between two files.
    Diff(DiffArgs),
    /// Apply the changes between a document and a revised copy, or a patch.
    Apply(ApplyArgs),
    /// Report token usage for a document and its selected context.
    Budget(BudgetArgs),
    /// Ask the configured provider for suggestions on a document.
    Suggest(SuggestArgs),
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    pub original: PathBuf,
    pub modified: PathBuf,
    /// Mark changed words inside modified lines.
    #[arg(long)]
    pub words: bool,
}

/// Options shared by every command that applies a diff.
#[derive(Debug, Args)]
pub struct ApplyOptions {
    /// Apply only these hunks (0-based, comma separated).
    #[arg(long, value_delimiter = ',', value_name = "N,..")]
    pub hunks: Vec<usize>,
    /// Confirm each hunk on stdin before it is applied.
    #[arg(long, conflicts_with = "hunks")]
    pub step: bool,
    /// Write the result back to the document instead of printing it.
    #[arg(long)]
    pub write: bool,
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    pub document: PathBuf,
    /// Revised copy of the document, or a unified diff with `--patch`.
    pub change: PathBuf,
    #[arg(long)]
    pub patch: bool,
    #[command(flatten)]
    pub options: ApplyOptions,
}

/// Where supporting context comes from.
#[derive(Debug, Args)]
pub struct ContextArgs {
    /// Directory of prompt library files.
    #[arg(long, value_name = "DIR")]
    pub library: Option<PathBuf>,
    /// Directory of earlier compositions.
    #[arg(long, value_name = "DIR")]
    pub history: Option<PathBuf>,
    /// Always include this library or history entry (by file stem).
    #[arg(short, long = "reference", value_name = "ID")]
    pub references: Vec<String>,
}

#[derive(Debug, Args)]
pub struct BudgetArgs {
    pub document: PathBuf,
    #[command(flatten)]
    pub context: ContextArgs,
}

#[derive(Debug, Args)]
pub struct SuggestArgs {
    pub document: PathBuf,
    #[command(flatten)]
    pub context: ContextArgs,
    /// Apply the suggestion with this index after listing.
    #[arg(long, value_name = "N")]
    pub apply: Option<usize>,
    #[command(flatten)]
    pub options: ApplyOptions,
}
