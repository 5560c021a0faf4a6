use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use super::AudiobookStages;
use crate::error::{PortabookError, Result};
use crate::fs::{MoveOptions, move_file};
use crate::metadata::{MkvInfo, read_mkv_info};

/// Folder under the destination holding the untouched source files
pub const AAX_BACKUP_DIR: &str = "_aax_backups";
/// Folder under the destination holding the intermediate containers
pub const MKV_BACKUP_DIR: &str = "_mkv_backups";

/// Result of decrypting one source file
#[derive(Debug, Clone, Serialize)]
pub struct DecryptedBook {
    /// Where the original source now lives
    pub source_backup: PathBuf,
    /// Final location of the intermediate container
    pub mkv_path: PathBuf,
    pub info: MkvInfo,
}

impl AudiobookStages<'_> {
    /// Decrypt `source_path` into an intermediate container under
    /// `destination_dir`, read its metadata and move both files into the
    /// backup folders. The source path is not used again afterwards.
    pub async fn decrypt_to_mkv(
        &self,
        activation_bytes: &str,
        source_path: &Path,
        destination_dir: &Path,
    ) -> Result<DecryptedBook> {
        if activation_bytes.trim().is_empty() {
            return Err(PortabookError::Validation(
                "activation bytes must not be empty".to_string(),
            ));
        }

        let file_name = source_path.file_name().ok_or_else(|| {
            PortabookError::Validation(format!("{} has no file name", source_path.display()))
        })?;

        info!("Decrypting {}", source_path.display());

        let temp_mkv = destination_dir.join(format!("{}.mkv", Uuid::new_v4()));
        let command = self
            .commands
            .decrypt_to_mkv(activation_bytes, source_path, &temp_mkv);
        self.executor.run(&command).await?;

        let info = read_mkv_info(self.executor, self.commands, &temp_mkv).await?;

        let source_backup =
            available_backup_path(destination_dir.join(AAX_BACKUP_DIR).join(file_name));
        move_file(source_path, &source_backup, MoveOptions { create_parents: true }).await?;
        info!("Backed up source to {}", source_backup.display());

        let mkv_path = available_backup_path(
            destination_dir
                .join(MKV_BACKUP_DIR)
                .join(format!("{}.mkv", info.base_file_name())),
        );
        move_file(&temp_mkv, &mkv_path, MoveOptions { create_parents: true }).await?;
        info!("Stored intermediate container at {}", mkv_path.display());

        Ok(DecryptedBook {
            source_backup,
            mkv_path,
            info,
        })
    }
}

/// `path` itself when free, otherwise `path` with a timestamp before the
/// extension so an earlier backup is never overwritten.
fn available_backup_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Local::now().format("%Y%m%d-%H%M%S");

    let mut counter = 0;
    loop {
        let suffix = if counter == 0 {
            stamp.to_string()
        } else {
            format!("{}-{}", stamp, counter)
        };
        let candidate = path.with_file_name(format!("{}.{}{}", stem, suffix, extension));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
