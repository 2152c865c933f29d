use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use phased::{ExcludedUnitPolicy, ExclusionToken};
use std::path::PathBuf;

use crate::paths::DEFAULT_TARGET;

#[derive(Parser)]
#[command(name = "rigger")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Resumable installer that runs every step as a dedicated service account", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run (or resume) the installation
    Install(InstallArgs),

    /// Show the recorded state of every unit
    Status(TargetArgs),

    /// Forget one unit's progress so the next run restarts it from scratch
    Reset {
        /// Unit id, as listed by `rigger units`
        unit: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// List optional features and their categories
    Features,

    /// List installation units in run order
    Units,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct TargetArgs {
    /// Installation target; each target keeps its own run records
    #[arg(short, long, default_value = DEFAULT_TARGET)]
    pub target: String,
}

#[derive(Parser)]
pub struct InstallArgs {
    /// Install config (default: <config dir>/install.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Exclusion list (default: <config dir>/exclusions, if present)
    #[arg(long)]
    pub exclude_file: Option<PathBuf>,

    /// Exclude a feature, or a whole category as `category:<name>`
    #[arg(short = 'x', long = "exclude", value_name = "TOKEN")]
    pub exclude: Vec<ExclusionToken>,

    /// Continue the previous run with its recorded config and exclusions
    #[arg(short, long)]
    pub resume: bool,

    /// Run a single unit
    #[arg(short, long, value_name = "ID")]
    pub unit: Option<String>,

    #[command(flatten)]
    pub target: TargetArgs,

    /// What happens to a completed unit whose feature is now excluded
    #[arg(long, value_enum, default_value_t = ExcludedState::Preserve)]
    pub excluded_state: ExcludedState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ExcludedState {
    /// Leave it completed
    Preserve,
    /// Record it as skipped
    Reset,
}

impl From<ExcludedState> for ExcludedUnitPolicy {
    fn from(state: ExcludedState) -> Self {
        match state {
            ExcludedState::Preserve => Self::Preserve,
            ExcludedState::Reset => Self::Reset,
        }
    }
}
