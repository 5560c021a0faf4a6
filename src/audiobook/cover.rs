use std::path::{Path, PathBuf};
use tracing::info;

use super::AudiobookStages;
use crate::error::Result;
use crate::fs::copy_file;
use crate::metadata::MkvInfo;

/// Extra copies of the cover; some players only look for these names
pub const COVER_ALIASES: [&str; 2] = ["folder.jpg", "cover.jpg"];

impl AudiobookStages<'_> {
    /// Extract the embedded picture of `mkv_path` into `destination_dir` and
    /// return the path of the canonical `<author - title>.jpeg`.
    pub async fn extract_cover(
        &self,
        mkv_path: &Path,
        destination_dir: &Path,
        info: &MkvInfo,
    ) -> Result<PathBuf> {
        let jpeg_path = destination_dir.join(format!("{}.jpeg", info.base_file_name()));
        info!("Extracting cover art to {}", jpeg_path.display());

        let command = self
            .commands
            .extract_cover(mkv_path, &jpeg_path, destination_dir);
        self.executor.run(&command).await?;

        for alias in COVER_ALIASES {
            copy_file(&jpeg_path, destination_dir.join(alias)).await?;
        }

        Ok(jpeg_path)
    }
}
