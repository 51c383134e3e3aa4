// SPDX-License-Identifier: BSD-3-Clause
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Format {
    Json,
    Llvm,
}

impl Format {
    /// `.json` is JSON, anything else is assumed to be LLVM bitcode.
    pub fn guess(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Llvm,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => write!(f, "json"),
            Format::Llvm => write!(f, "llvm"),
        }
    }
}

/// Resolve the possible targets of every call site, including calls through
/// function pointers
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Print every instruction's points-to states
    #[arg(long)]
    pub debug: bool,

    /// Input format (default: guessed from the file extension)
    #[arg(long)]
    pub format: Option<Format>,

    /// Print the call graph as JSON
    #[arg(long)]
    pub json: bool,

    /// Give up after this many function visits
    #[arg(long)]
    pub max_dequeues: Option<usize>,

    /// Collect and report metrics
    #[arg(long)]
    pub metrics: bool,

    /// Program to analyze (LLVM bitcode or JSON)
    #[arg()]
    pub module: PathBuf,

    /// Quiet
    #[arg(long)]
    pub quiet: bool,

    /// Tracing
    #[arg(long)]
    pub tracing: bool,
}
