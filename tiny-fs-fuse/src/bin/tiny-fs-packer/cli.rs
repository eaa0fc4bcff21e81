use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Image file path
    #[arg(long, short)]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh image
    Format,

    /// Import a host directory tree into the image root
    Pack {
        /// Source directory on the host
        #[arg(long, short)]
        source: PathBuf,
    },

    /// List a directory inside the image
    Ls { path: Option<String> },

    /// Print a file inside the image
    Cat { path: String },

    /// Check consistency, optionally repairing fixable issues
    Fsck {
        #[arg(long)]
        fix: bool,
    },

    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        op: SnapshotOp,
    },
}

#[derive(Subcommand)]
pub enum SnapshotOp {
    Create { name: String },
    List,
    Delete { name: String },
    Restore { name: String },
}
