//! Utility functions for the installer

use crate::{Result, InstallerError};
use std::fs;
use std::path::{Path, PathBuf};

/// Line terminator used when files are written back
#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

const UTF8_BOM: char = '\u{FEFF}';

/// Validate and create directory if it doesn't exist
pub fn validate_and_create_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(InstallerError::invalid_path("path is empty"));
    }

    let abs_path = absolute_path(path)?;

    ensure_directory_exists(&abs_path)?;

    if !abs_path.is_dir() {
        return Err(InstallerError::invalid_path(
            format!("Path is not a directory: {:?}", abs_path)
        ));
    }

    Ok(abs_path)
}

/// Anchor a relative path at the current directory.
// Avoid canonicalize on Windows to prevent verbatim prefix (\\?\) in stored config/display
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(InstallerError::invalid_path("directory path is empty"));
    }
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| InstallerError::invalid_path(
                format!("Failed to create directory {:?}: {}", path, e)
            ))?;
        log::debug!("Created directory: {:?}", path);
    }
    Ok(())
}

/// First ancestor of `path` (itself included) that exists on disk
pub fn nearest_existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| !p.as_os_str().is_empty() && p.exists())
}

/// Read a text file as lines, dropping a leading UTF-8 BOM
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(&content);
    Ok(content.lines().map(str::to_string).collect())
}

/// Write lines as UTF-8 without a BOM, every line terminated
pub fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = String::with_capacity(lines.iter().map(|l| l.len() + 2).sum());
    for line in lines {
        content.push_str(line);
        content.push_str(LINE_ENDING);
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn is_command_available(command: &str) -> bool {
    which::which(command).is_ok()
}

pub fn show_version() {
    println!("ALMAZ COD installer version: {}", crate::config::VERSION);
}

/// Format file size in human readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
