use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::audiobook::AudiobookStages;
use crate::config::Config;
use crate::dashcam;
use crate::error::{PortabookError, Result};
use crate::fs::{absolute_path, list_files_with_extension, make_directories, sanitize_file_name};
use crate::media::{MediaCommandBuilder, MediaExecutor, MediaExecutorFactory};
use crate::metadata::{MkvInfo, read_mkv_info};

/// One finished book in the portable library
#[derive(Debug, Clone, Serialize)]
pub struct PortableEntry {
    /// `<root>/<author>/<title>`
    pub directory: PathBuf,
    pub playlist: PathBuf,
    pub cover: PathBuf,
    pub info: MkvInfo,
}

pub struct Workflow {
    config: Config,
    executor: Box<dyn MediaExecutor>,
    commands: MediaCommandBuilder,
    cancel: CancellationToken,
    show_progress: bool,
}

impl Workflow {
    /// Create a workflow running real external processes
    pub fn new(config: Config) -> Result<Self> {
        let cancel = CancellationToken::new();
        let executor = MediaExecutorFactory::create_executor(&config.pipeline, cancel.clone());
        Self::build(config, executor, cancel)
    }

    /// Create a workflow on top of a custom executor
    pub fn with_executor(config: Config, executor: Box<dyn MediaExecutor>) -> Result<Self> {
        Self::build(config, executor, CancellationToken::new())
    }

    fn build(config: Config, executor: Box<dyn MediaExecutor>, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;
        let commands = MediaCommandBuilder::new(&config.tools);

        Ok(Self {
            config,
            executor,
            commands,
            cancel,
            show_progress: false,
        })
    }

    /// Show a progress bar while chapters are split
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Token that aborts the running process and skips the remaining work
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn stages(&self) -> AudiobookStages<'_> {
        AudiobookStages::new(self.executor.as_ref(), &self.commands, &self.config.audiobook)
            .with_progress(self.show_progress)
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PortabookError::Cancelled);
        }
        Ok(())
    }

    /// Check that both external tools can be launched
    pub async fn check_tools(&self) -> Result<()> {
        let transcoder = self
            .commands
            .version_check(self.commands.transcoder_path(), "-version");
        let diagnostic = self
            .commands
            .version_check(self.commands.diagnostic_path(), "--version");

        for command in [transcoder, diagnostic] {
            self.executor.run(&command).await?;
            info!("{} is available", command.binary_path);
        }
        Ok(())
    }

    /// Read author, title and chapters of an intermediate container
    pub async fn read_metadata<P: AsRef<Path>>(&self, mkv_path: P) -> Result<MkvInfo> {
        read_mkv_info(self.executor.as_ref(), &self.commands, mkv_path.as_ref()).await
    }

    /// Turn an intermediate container into `<destination_root>/<author>/<title>/`
    /// with cover art, one mp3 per chapter and a playlist. Metadata is read
    /// from the container when not supplied.
    ///
    /// Relative paths are resolved against the current directory before any
    /// tool runs, since the tools run inside the book directory.
    pub async fn convert_to_portable<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        mkv_path: P,
        destination_root: Q,
        info: Option<MkvInfo>,
    ) -> Result<PortableEntry> {
        let mkv_path = absolute_path(mkv_path)?;
        let mkv_path = mkv_path.as_path();
        let destination_root = absolute_path(destination_root)?;
        self.ensure_not_cancelled()?;

        let info = match info {
            Some(info) => info,
            None => self.read_metadata(mkv_path).await?,
        };

        let directory = destination_root
            .join(sanitize_file_name(&info.author))
            .join(sanitize_file_name(&info.title));
        make_directories(&directory).await?;
        info!("Writing portable audiobook to {}", directory.display());

        let stages = self.stages();
        let cover = stages
            .extract_cover(mkv_path, &directory, &info)
            .await
            .inspect_err(|e| error!("Cover extraction failed for {}: {}", mkv_path.display(), e))?;
        let playlist = stages
            .split_chapters(mkv_path, &cover, &directory, &info)
            .await
            .inspect_err(|e| error!("Chapter split failed for {}: {}", mkv_path.display(), e))?;

        Ok(PortableEntry {
            directory,
            playlist,
            cover,
            info,
        })
    }

    /// Convert several intermediate containers, stopping at the first failure
    pub async fn convert_many_to_portable<Q: AsRef<Path>>(
        &self,
        mkv_paths: &[PathBuf],
        destination_root: Q,
    ) -> Result<Vec<PortableEntry>> {
        let destination_root = destination_root.as_ref();
        if mkv_paths.is_empty() {
            return Err(PortabookError::Validation(
                "no containers given to convert".to_string(),
            ));
        }
        if destination_root.as_os_str().is_empty() {
            return Err(PortabookError::Validation(
                "destination must not be empty".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(mkv_paths.len());
        for mkv_path in mkv_paths {
            entries.push(self.convert_to_portable(mkv_path, destination_root, None).await?);
        }
        Ok(entries)
    }

    /// Decrypt one source file into the backups and the portable library
    pub async fn normalize_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        activation_bytes: &str,
        source_path: P,
        destination_dir: Q,
    ) -> Result<PortableEntry> {
        let source_path = absolute_path(source_path)?;
        let source_path = source_path.as_path();
        let destination_dir = absolute_path(destination_dir)?;
        let destination_dir = destination_dir.as_path();
        self.ensure_not_cancelled()?;

        info!("Normalizing {}", source_path.display());

        let book = self
            .stages()
            .decrypt_to_mkv(activation_bytes, source_path, destination_dir)
            .await
            .inspect_err(|e| error!("Decrypt failed for {}: {}", source_path.display(), e))?;

        // Normalized at this point; now make it portable
        let entry = self
            .convert_to_portable(&book.mkv_path, destination_dir, Some(book.info))
            .await?;

        info!("Successfully normalized {}", source_path.display());
        Ok(entry)
    }

    /// Normalize every source file in `source_dir`. Output goes to
    /// `destination_dir`, which defaults to `source_dir`.
    ///
    /// Files are processed `pipeline.concurrency` at a time (one by default)
    /// in file name order. The first failure stops the batch.
    pub async fn normalize_all<P: AsRef<Path>>(
        &self,
        activation_bytes: &str,
        source_dir: P,
        destination_dir: Option<&Path>,
    ) -> Result<Vec<PortableEntry>> {
        if activation_bytes.trim().is_empty() {
            return Err(PortabookError::Validation(
                "activation bytes must not be empty".to_string(),
            ));
        }

        let source_dir = absolute_path(source_dir)?;
        let source_dir = source_dir.as_path();
        let destination_dir = match destination_dir {
            Some(dir) => absolute_path(dir)?,
            None => source_dir.to_path_buf(),
        };
        let destination_dir = destination_dir.as_path();

        let sources = list_files_with_extension(source_dir, &self.config.audiobook.source_extension)?;
        info!(
            "Found {} audiobooks to process in {}",
            sources.len(),
            source_dir.display()
        );

        make_directories(destination_dir).await?;
        ensure_writable(destination_dir)?;

        stream::iter(sources)
            .map(|source| async move {
                self.normalize_file(activation_bytes, &source, destination_dir).await
            })
            .buffered(self.config.pipeline.concurrency)
            .try_collect()
            .await
    }

    /// Re-container every dashcam clip in `source_dir`
    pub async fn convert_dashcam<P: AsRef<Path>>(&self, source_dir: P) -> Result<Vec<PathBuf>> {
        let source_dir = absolute_path(source_dir)?;
        dashcam::convert_directory(
            self.executor.as_ref(),
            &self.commands,
            &self.config.dashcam,
            &source_dir,
            &self.cancel,
        )
        .await
    }
}

fn ensure_writable(dir: &Path) -> Result<()> {
    let metadata = std::fs::metadata(dir)
        .map_err(|e| PortabookError::file_system("inspect", dir, e))?;
    if metadata.permissions().readonly() {
        return Err(PortabookError::Validation(format!(
            "{} is not writable",
            dir.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MockMediaExecutor;

    fn workflow(executor: MockMediaExecutor) -> Workflow {
        Workflow::with_executor(Config::default(), Box::new(executor)).unwrap()
    }

    #[tokio::test]
    async fn test_blank_activation_bytes_rejected_before_listing() {
        let mut executor = MockMediaExecutor::new();
        executor.expect_run().never();

        let err = workflow(executor)
            .normalize_all("  ", "/does/not/exist", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortabookError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_source_directory_is_validation_error() {
        let executor = MockMediaExecutor::new();
        let err = workflow(executor)
            .normalize_all("cafebabe", "/does/not/exist", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortabookError::Validation(_)));
    }

    #[tokio::test]
    async fn test_empty_source_directory_yields_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = MockMediaExecutor::new();
        executor.expect_run().never();

        let entries = workflow(executor)
            .normalize_all("cafebabe", dir.path(), None)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_check_tools_reports_missing_binary() {
        let mut executor = MockMediaExecutor::new();
        executor.expect_run().times(1).returning(|cmd| {
            Err(PortabookError::Launch {
                binary: cmd.binary_path.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });

        let err = workflow(executor).check_tools().await.unwrap_err();
        assert!(matches!(err, PortabookError::Launch { binary, .. } if binary == "ffmpeg"));
    }

    #[test]
    fn test_read_only_destination_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut permissions = std::fs::metadata(dir.path()).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(dir.path(), permissions.clone()).unwrap();

        let result = ensure_writable(dir.path());

        permissions.set_readonly(false);
        std::fs::set_permissions(dir.path(), permissions).unwrap();
        assert!(matches!(result, Err(PortabookError::Validation(_))));
    }
}
