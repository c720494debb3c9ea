//! CLI type definitions
//!
//! Clap command structures for the `sage-council` binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sage-council")]
#[command(about = "Sage Council - consultation orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .sage-council/config.yaml)
    #[arg(short, long, global = true, env = "SAGE_COUNCIL_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask the council a question
    Consult(ConsultArgs),

    /// Probe every sage and show system health
    Health,
}

#[derive(Args, Debug)]
pub struct ConsultArgs {
    /// What to ask
    pub content: String,

    /// Query kind (knowledge, task, incident, search, general)
    #[arg(short, long, default_value = "general")]
    pub kind: String,

    /// Priority (low, medium, high, critical)
    #[arg(short, long, default_value = "medium")]
    pub priority: String,

    /// Who is asking
    #[arg(short, long, default_value = "cli")]
    pub requester: String,

    /// Context entry as key=json (repeatable; non-JSON values are taken as strings)
    #[arg(short = 'C', long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// Force a collaboration pattern (sequential, parallel, hierarchical, adaptive)
    #[arg(long)]
    pub pattern: Option<String>,

    /// Consultation deadline in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,
}
