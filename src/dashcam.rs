use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DashcamConfig;
use crate::error::{PortabookError, Result};
use crate::fs::list_files_with_extension;
use crate::media::{MediaCommandBuilder, MediaExecutor};

/// Re-container every clip in `source_dir` to mkv next to the original.
///
/// Clips are converted one after another; the first failure stops the batch.
/// Returns the paths of the produced files.
pub async fn convert_directory(
    executor: &dyn MediaExecutor,
    commands: &MediaCommandBuilder,
    config: &DashcamConfig,
    source_dir: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let clips = list_files_with_extension(source_dir, &config.source_extension)?;
    info!(
        "Found {} {} clips in {}",
        clips.len(),
        config.source_extension,
        source_dir.display()
    );

    let mut converted = Vec::with_capacity(clips.len());
    for clip in clips {
        if cancel.is_cancelled() {
            return Err(PortabookError::Cancelled);
        }

        let (Some(file_name), Some(stem)) = (clip.file_name(), clip.file_stem()) else {
            continue;
        };
        let file_name = file_name.to_string_lossy();
        let mkv_file_name = format!("{}.mkv", stem.to_string_lossy());

        let command = commands.remux_to_mkv(&file_name, &mkv_file_name, source_dir);
        if let Err(e) = executor.run(&command).await {
            error!("FAILED to convert {}: {}", file_name, e);
            return Err(e);
        }

        info!("Successfully converted {}", file_name);
        converted.push(source_dir.join(mkv_file_name));
    }

    Ok(converted)
}
