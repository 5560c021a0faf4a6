//! Audiobook metadata recovered from the container diagnostic report.

pub mod parser;

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub use parser::parse_mkv_info;

use crate::error::Result;
use crate::fs::sanitize_file_name;
use crate::media::{MediaCommandBuilder, MediaExecutor};

/// Value used when the report carries no author or title
pub const UNKNOWN: &str = "Unknown";

/// A named time range inside the intermediate container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub uid: String,
    /// Timecode as printed by the diagnostic tool, e.g. `00:12:01.500000000`
    pub start: String,
    pub end: String,
    pub name: String,
}

/// Author, title and chapters of one book, in encounter order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkvInfo {
    pub author: String,
    pub title: String,
    pub chapters: Vec<Chapter>,
}

impl MkvInfo {
    /// `"{author} - {title}"` made safe for use as a file name
    pub fn base_file_name(&self) -> String {
        sanitize_file_name(&format!("{} - {}", self.author, self.title))
    }

    /// Pretty-printed JSON record, as printed by `info --json`
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Run the diagnostic tool against `mkv_path` and parse its report
pub async fn read_mkv_info(
    executor: &dyn MediaExecutor,
    commands: &MediaCommandBuilder,
    mkv_path: &Path,
) -> Result<MkvInfo> {
    info!("Reading metadata from {}", mkv_path.display());

    let report = executor.capture(&commands.mkv_info(mkv_path)).await?;
    let info = parse_mkv_info(&report)?;

    info!(
        "Found \"{}\" by {} with {} chapters",
        info.title,
        info.author,
        info.chapters.len()
    );
    Ok(info)
}
