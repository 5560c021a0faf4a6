//! Filesystem helpers: safe file names, moves across directories and
//! recursive directory creation.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{PortabookError, Result};

/// Replacement for every character that is illegal in a file name
const INVALID_CHARACTER_REPLACEMENT: &str = " - ";

static RESERVED_DEVICE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(nul|prn|con|lpt[0-9]|com[0-9]|aux)(\.|$)")
        .expect("reserved device name pattern is valid")
});

fn is_invalid_character(c: char) -> bool {
    c.is_ascii_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// Turn an arbitrary string into a name that is safe on common filesystems.
///
/// Control characters and `/ \ : * ? " < > |` become `" - "`, a leading
/// reserved device name (`con`, `NUL.txt`, `lpt1`...) is removed together
/// with its dot, leading and trailing dots are stripped and double spaces are
/// collapsed. The result is stable: sanitizing it again changes nothing.
pub fn sanitize_file_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        if is_invalid_character(c) {
            name.push_str(INVALID_CHARACTER_REPLACEMENT);
        } else {
            name.push(c);
        }
    }

    // Stripping a device name can expose dots or another device name
    loop {
        let stripped = RESERVED_DEVICE_NAME
            .replace(&name, "")
            .trim_matches('.')
            .to_string();
        if stripped.len() == name.len() {
            break;
        }
        name = stripped;
    }

    while name.contains("  ") {
        name = name.replace("  ", " ");
    }

    name
}

/// Options for [`move_file`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOptions {
    /// Create the destination directory tree before moving
    pub create_parents: bool,
}

/// Move `source` to `destination`.
///
/// Falls back to copy and remove when a rename is not possible, e.g. when the
/// destination lives on another device.
pub async fn move_file<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    destination: Q,
    options: MoveOptions,
) -> Result<()> {
    let source = source.as_ref();
    let destination = destination.as_ref();

    if options.create_parents {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            make_directories(parent).await?;
        }
    }

    debug!("Moving {} -> {}", source.display(), destination.display());

    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PortabookError::file_system("move", source, e))
        }
        Err(e) => {
            warn!(
                "Rename of {} failed ({}), copying instead",
                source.display(),
                e
            );
            fs::copy(source, destination)
                .await
                .map_err(|e| PortabookError::file_system("copy", source, e))?;
            fs::remove_file(source)
                .await
                .map_err(|e| PortabookError::file_system("remove", source, e))?;
            Ok(())
        }
    }
}

/// `path` resolved against the current directory. The path does not need to
/// exist and symlinks are left alone.
pub fn absolute_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    std::path::absolute(path).map_err(|e| PortabookError::file_system("resolve", path, e))
}

/// Recursively create `path`. Succeeds when it already exists.
pub async fn make_directories<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path)
        .await
        .map_err(|e| PortabookError::file_system("create directory", path, e))
}

/// Copy a file, reporting the destination on failure
pub async fn copy_file<P: AsRef<Path>, Q: AsRef<Path>>(source: P, destination: Q) -> Result<()> {
    let destination = destination.as_ref();
    fs::copy(source.as_ref(), destination)
        .await
        .map_err(|e| PortabookError::file_system("copy to", destination, e))?;
    Ok(())
}

/// List the files directly inside `directory` whose extension matches
/// `extension` (with leading dot) case-insensitively. Sorted by file name.
pub fn list_files_with_extension<P: AsRef<Path>>(directory: P, extension: &str) -> Result<Vec<PathBuf>> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
        return Err(PortabookError::Validation(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    let wanted = extension.trim_start_matches('.').to_lowercase();
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let io_error = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            PortabookError::file_system("read directory", directory, io_error)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.to_lowercase() == wanted);

        if matches {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}
