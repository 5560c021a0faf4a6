// Audiobook normalization stages
//
// - Decrypt: source container -> intermediate mkv, plus backups of both
// - Cover: embedded picture -> jpeg, folder.jpg and cover.jpg
// - Chapters: one tagged mp3 per chapter and an m3u playlist

pub mod chapters;
pub mod cover;
pub mod decrypt;

use crate::config::AudiobookConfig;
use crate::media::{MediaCommandBuilder, MediaExecutor};

pub use decrypt::{AAX_BACKUP_DIR, DecryptedBook, MKV_BACKUP_DIR};

/// Everything a stage needs to issue commands
pub struct AudiobookStages<'a> {
    executor: &'a dyn MediaExecutor,
    commands: &'a MediaCommandBuilder,
    config: &'a AudiobookConfig,
    show_progress: bool,
}

impl<'a> AudiobookStages<'a> {
    pub fn new(
        executor: &'a dyn MediaExecutor,
        commands: &'a MediaCommandBuilder,
        config: &'a AudiobookConfig,
    ) -> Self {
        Self {
            executor,
            commands,
            config,
            show_progress: false,
        }
    }

    /// Draw a progress bar while splitting chapters
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}
