use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decrypt every audiobook in a directory into a portable library
    Normalize {
        /// Activation bytes used to decrypt the source files
        activation_bytes: String,

        /// Directory containing the source audiobooks
        source_dir: PathBuf,

        /// Library root (defaults to the source directory)
        destination_dir: Option<PathBuf>,
    },

    /// Convert already decrypted mkv containers into portable entries
    Portable {
        /// Library root receiving `<author>/<title>/`
        #[arg(short, long)]
        destination: PathBuf,

        /// Intermediate containers to convert
        #[arg(required = true)]
        mkv: Vec<PathBuf>,
    },

    /// Show author, title and chapters of an mkv container
    Info {
        /// Container to inspect
        mkv: PathBuf,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-container every dashcam clip in a directory to mkv
    Dashcam {
        /// Directory containing the clips
        source_dir: PathBuf,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Where to write the TOML file
        path: PathBuf,
    },
}
