use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::config::ToolsConfig;
use crate::metadata::{Chapter, MkvInfo};

/// Abstract external tool invocation. Argument order is significant.
///
/// Arguments are kept as `OsString` so paths reach the tool byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            working_dir: None,
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Whether `arg` appears verbatim among the arguments
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a.as_os_str() == arg)
    }

    /// Run inside `dir`
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref())
    }

    /// Add output file. A bare relative name gets a `./` prefix so a name
    /// starting with `-` is not read as an option.
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        let path = path.as_ref();
        if path.is_relative() && !path.starts_with(".") {
            self.arg(Path::new(".").join(path))
        } else {
            self.arg(path)
        }
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn hide_banner(self) -> Self {
        self.arg("-hide_banner")
    }

    /// Set video codec
    pub fn video_codec<S: AsRef<OsStr>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: AsRef<OsStr>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set audio bitrate
    pub fn audio_bitrate<S: AsRef<OsStr>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Copy video stream
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Copy audio stream
    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Disable subtitles
    pub fn no_subtitles(self) -> Self {
        self.arg("-sn")
    }

    /// Select streams by input index
    pub fn map<S: AsRef<OsStr>>(self, spec: S) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Take global metadata from an input index
    pub fn map_metadata<S: AsRef<OsStr>>(self, spec: S) -> Self {
        self.arg("-map_metadata").arg(spec)
    }

    /// Set an output metadata tag
    pub fn metadata(self, key: &str, value: &str) -> Self {
        self.arg("-metadata").arg(format!("{}={}", key, value))
    }

    /// Cut to the `[start, end)` range
    pub fn time_range(self, start: &str, end: &str) -> Self {
        self.arg("-ss").arg(start).arg("-to").arg(end)
    }

    /// The file name (or path) of the output, which is always the last argument
    pub fn output_path(&self) -> Option<PathBuf> {
        let last = PathBuf::from(self.args.last()?);
        Some(match &self.working_dir {
            Some(dir) if last.is_relative() => dir.join(last),
            _ => last,
        })
    }
}

/// Builder for every tool invocation the pipeline makes
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    transcoder_path: String,
    diagnostic_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            transcoder_path: tools.transcoder_path.clone(),
            diagnostic_path: tools.diagnostic_path.clone(),
        }
    }

    pub fn transcoder_path(&self) -> &str {
        &self.transcoder_path
    }

    pub fn diagnostic_path(&self) -> &str {
        &self.diagnostic_path
    }

    /// Decrypt the source and copy its audio and picture streams untouched
    pub fn decrypt_to_mkv<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        activation_bytes: &str,
        source_path: P,
        mkv_path: Q,
    ) -> MediaCommand {
        MediaCommand::new(&self.transcoder_path, "Decrypt and demux")
            .hide_banner()
            .arg("-activation_bytes")
            .arg(activation_bytes)
            .overwrite()
            .input(source_path)
            // keep the picture, some players display it
            .copy_video()
            .copy_audio()
            .no_subtitles()
            .output(mkv_path)
    }

    /// Dump the container structure as text
    pub fn mkv_info<P: AsRef<Path>>(&self, mkv_path: P) -> MediaCommand {
        MediaCommand::new(&self.diagnostic_path, "Read container metadata").output(mkv_path)
    }

    /// Copy only the embedded picture out of the container
    pub fn extract_cover<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        &self,
        mkv_path: P,
        jpeg_path: Q,
        working_dir: R,
    ) -> MediaCommand {
        MediaCommand::new(&self.transcoder_path, "Cover extraction")
            .hide_banner()
            .overwrite()
            .input(mkv_path)
            .copy_video()
            .no_audio()
            .no_subtitles()
            .output(jpeg_path)
            .current_dir(working_dir)
    }

    /// Cut one chapter into a tagged mp3 with the cover attached.
    ///
    /// The cover is input 0 and the container input 1; `-map_metadata` and
    /// `-map` refer to those indices.
    #[allow(clippy::too_many_arguments)]
    pub fn chapter_to_mp3<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        &self,
        jpeg_path: P,
        mkv_path: Q,
        chapter: &Chapter,
        info: &MkvInfo,
        audio_bitrate: &str,
        mp3_file_name: &str,
        working_dir: R,
    ) -> MediaCommand {
        MediaCommand::new(
            &self.transcoder_path,
            format!("Chapter split ({})", chapter.name),
        )
        .overwrite()
        .hide_banner()
        .input(jpeg_path)
        .input(mkv_path)
        .time_range(&chapter.start, &chapter.end)
        .map_metadata("0")
        .map("0")
        .map("1")
        .metadata("title", &chapter.name)
        .metadata("artist", &info.author)
        .metadata("album", &info.title)
        .metadata("genre", "audiobook")
        .audio_codec("libmp3lame")
        .audio_bitrate(audio_bitrate)
        // https://trac.ffmpeg.org/wiki/Seeking#Cuttingsmallsections
        .arg("-avoid_negative_ts")
        .arg("1")
        // ID3v2.3 for older players
        .arg("-id3v2_version")
        .arg("3")
        .no_subtitles()
        .copy_video()
        .output(mp3_file_name)
        .current_dir(working_dir)
    }

    /// Re-container a clip without touching its streams
    pub fn remux_to_mkv<P: AsRef<Path>>(
        &self,
        file_name: &str,
        mkv_file_name: &str,
        working_dir: P,
    ) -> MediaCommand {
        MediaCommand::new(&self.transcoder_path, format!("Remux {}", file_name))
            .input(file_name)
            .copy_video()
            .copy_audio()
            .output(mkv_file_name)
            .current_dir(working_dir)
    }

    /// Build version check command
    pub fn version_check(&self, binary_path: &str, flag: &str) -> MediaCommand {
        MediaCommand::new(binary_path, "Version check").arg(flag)
    }
}
