use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::AudiobookStages;
use crate::error::{PortabookError, Result};
use crate::fs::sanitize_file_name;
use crate::metadata::{Chapter, MkvInfo};

/// First line of every playlist
pub const PLAYLIST_HEADER: &str = "#EXTM3U";

fn chapter_stem(index: usize, chapter: &Chapter) -> String {
    let name = sanitize_file_name(&chapter.name);
    if name.trim().is_empty() {
        format!("Chapter {:03}", index + 1)
    } else {
        name
    }
}

/// Mp3 file names for every chapter, in order. Names that would clash with an
/// earlier one (ignoring case) get the chapter number appended, ` (N)`.
pub fn chapter_file_names(chapters: &[Chapter]) -> Vec<String> {
    let mut taken = HashSet::new();
    chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| {
            let stem = chapter_stem(index, chapter);
            let mut name = stem.clone();
            let mut number = index + 1;
            while !taken.insert(name.to_lowercase()) {
                name = format!("{} ({})", stem, number);
                number += 1;
            }
            format!("{}.mp3", name)
        })
        .collect()
}

fn progress_bar(visible: bool, length: usize) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(length as u64);
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

async fn append_line(playlist_path: &Path, line: &str) -> Result<()> {
    let mut playlist = OpenOptions::new()
        .append(true)
        .open(playlist_path)
        .await
        .map_err(|e| PortabookError::file_system("open playlist", playlist_path, e))?;
    playlist
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(|e| PortabookError::file_system("append to playlist", playlist_path, e))?;
    playlist.flush().await?;
    Ok(())
}

impl AudiobookStages<'_> {
    /// Cut every chapter of `mkv_path` into its own mp3 inside
    /// `destination_dir` and list them in `<author - title>.m3u`.
    ///
    /// Chapters are encoded one at a time in order and each file is appended
    /// to the playlist only after it was written. The first failure stops the
    /// remaining chapters; what was written so far stays on disk.
    pub async fn split_chapters(
        &self,
        mkv_path: &Path,
        jpeg_path: &Path,
        destination_dir: &Path,
        info: &MkvInfo,
    ) -> Result<PathBuf> {
        let playlist_path = destination_dir.join(format!("{}.m3u", info.base_file_name()));

        fs::write(&playlist_path, format!("{}\n", PLAYLIST_HEADER))
            .await
            .map_err(|e| PortabookError::file_system("write playlist", &playlist_path, e))?;

        let bar = progress_bar(self.show_progress, info.chapters.len());

        let file_names = chapter_file_names(&info.chapters);
        for (chapter, mp3_file_name) in info.chapters.iter().zip(file_names) {
            info!("Creating {}", mp3_file_name);
            bar.set_message(mp3_file_name.clone());

            let command = self.commands.chapter_to_mp3(
                jpeg_path,
                mkv_path,
                chapter,
                info,
                &self.config.audio_bitrate,
                &mp3_file_name,
                destination_dir,
            );
            if let Err(e) = self.executor.run(&command).await {
                bar.abandon_with_message(format!("failed at {}", mp3_file_name));
                return Err(e);
            }

            append_line(&playlist_path, &format!("./{}", mp3_file_name)).await?;
            bar.inc(1);
            info!("Finished creating {}", mp3_file_name);
        }

        bar.finish_with_message("done");
        Ok(playlist_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudiobookConfig, ToolsConfig};
    use crate::media::{MediaCommandBuilder, MockMediaExecutor};
    use mockall::Sequence;

    fn chapter(uid: &str, start: &str, end: &str, name: &str) -> Chapter {
        Chapter {
            uid: uid.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            name: name.to_string(),
        }
    }

    fn three_chapters() -> MkvInfo {
        MkvInfo {
            author: "Jane Doe".to_string(),
            title: "A Book".to_string(),
            chapters: vec![
                chapter("1", "00:00:00.000", "00:10:00.000", "Chapter 1"),
                chapter("2", "00:10:00.000", "00:20:00.000", "Chapter 2"),
                chapter("3", "00:20:00.000", "00:30:00.000", "Chapter 3"),
            ],
        }
    }

    fn read_playlist(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("Jane Doe - A Book.m3u"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_chapters_are_encoded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let info = three_chapters();

        let mut executor = MockMediaExecutor::new();
        let mut seq = Sequence::new();
        for name in ["Chapter 1", "Chapter 2", "Chapter 3"] {
            let title = format!("title={}", name);
            let file_name = format!("./{}.mp3", name);
            executor
                .expect_run()
                .withf(move |cmd| {
                    cmd.has_arg(&title) && cmd.args.last().is_some_and(|a| *a == *file_name)
                })
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let commands = MediaCommandBuilder::new(&ToolsConfig::default());
        let config = AudiobookConfig::default();
        let stages = AudiobookStages::new(&executor, &commands, &config);

        let playlist = stages
            .split_chapters(Path::new("/lib/a.mkv"), Path::new("/lib/a.jpeg"), dir.path(), &info)
            .await
            .unwrap();

        assert_eq!(playlist, dir.path().join("Jane Doe - A Book.m3u"));
        assert_eq!(
            read_playlist(dir.path()),
            vec!["#EXTM3U", "./Chapter 1.mp3", "./Chapter 2.mp3", "./Chapter 3.mp3"]
        );
    }

    #[tokio::test]
    async fn test_failed_chapter_stops_the_split() {
        let dir = tempfile::tempdir().unwrap();
        let info = three_chapters();

        let mut executor = MockMediaExecutor::new();
        let mut seq = Sequence::new();
        executor
            .expect_run()
            .withf(|cmd| cmd.has_arg("title=Chapter 1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        executor
            .expect_run()
            .withf(|cmd| cmd.has_arg("title=Chapter 2"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(PortabookError::Exit {
                    binary: "ffmpeg".to_string(),
                    code: Some(69),
                })
            });

        let commands = MediaCommandBuilder::new(&ToolsConfig::default());
        let config = AudiobookConfig::default();
        let stages = AudiobookStages::new(&executor, &commands, &config);

        let err = stages
            .split_chapters(Path::new("/lib/a.mkv"), Path::new("/lib/a.jpeg"), dir.path(), &info)
            .await
            .unwrap_err();

        match err {
            PortabookError::Exit { binary, code } => {
                assert_eq!(binary, "ffmpeg");
                assert_eq!(code, Some(69));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(read_playlist(dir.path()), vec!["#EXTM3U", "./Chapter 1.mp3"]);
    }

    #[tokio::test]
    async fn test_rerun_rewrites_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let info = three_chapters();
        std::fs::write(dir.path().join("Jane Doe - A Book.m3u"), "#EXTM3U\n./stale.mp3\n").unwrap();

        let mut executor = MockMediaExecutor::new();
        executor.expect_run().times(3).returning(|_| Ok(()));

        let commands = MediaCommandBuilder::new(&ToolsConfig::default());
        let config = AudiobookConfig::default();
        let stages = AudiobookStages::new(&executor, &commands, &config).with_progress(false);

        stages
            .split_chapters(Path::new("/lib/a.mkv"), Path::new("/lib/a.jpeg"), dir.path(), &info)
            .await
            .unwrap();

        let lines = read_playlist(dir.path());
        assert_eq!(lines.len(), 4);
        assert!(!lines.iter().any(|l| l.contains("stale")));
    }

    #[test]
    fn test_chapter_file_names() {
        let chapters = vec![
            chapter("1", "0", "1", "Chapter 1"),
            chapter("2", "0", "1", "Part 2: Rising"),
            chapter("3", "0", "1", "con"),
        ];
        assert_eq!(
            chapter_file_names(&chapters),
            vec!["Chapter 1.mp3", "Part 2 - Rising.mp3", "Chapter 003.mp3"]
        );
    }

    #[test]
    fn test_clashing_chapter_names_get_numbered() {
        let chapters = vec![
            chapter("1", "0", "1", "Intro"),
            chapter("2", "1", "2", "Part 1: Start"),
            chapter("3", "2", "3", "Part 1 - Start"),
            chapter("4", "3", "4", "intro"),
            chapter("5", "4", "5", "Intro"),
        ];
        assert_eq!(
            chapter_file_names(&chapters),
            vec![
                "Intro.mp3",
                "Part 1 - Start.mp3",
                "Part 1 - Start (3).mp3",
                "intro (4).mp3",
                "Intro (5).mp3",
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_chapter_names_write_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = three_chapters();
        for chapter in &mut info.chapters {
            chapter.name = "Untitled".to_string();
        }

        let mut executor = MockMediaExecutor::new();
        let mut seq = Sequence::new();
        for file_name in ["./Untitled.mp3", "./Untitled (2).mp3", "./Untitled (3).mp3"] {
            executor
                .expect_run()
                .withf(move |cmd| cmd.args.last().is_some_and(|a| *a == *file_name))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let commands = MediaCommandBuilder::new(&ToolsConfig::default());
        let config = AudiobookConfig::default();
        let stages = AudiobookStages::new(&executor, &commands, &config);

        stages
            .split_chapters(Path::new("/lib/a.mkv"), Path::new("/lib/a.jpeg"), dir.path(), &info)
            .await
            .unwrap();

        assert_eq!(
            read_playlist(dir.path()),
            vec!["#EXTM3U", "./Untitled.mp3", "./Untitled (2).mp3", "./Untitled (3).mp3"]
        );
    }
}
