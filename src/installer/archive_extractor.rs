//! ZIP extraction with per-entry progress, a free-space precheck and
//! cooperative cancellation.

use crate::events::{ensure_not_cancelled, percent, Reporter};
use crate::utils::{self, format_file_size};
use crate::{InstallerError, Result};
use encoding_rs::IBM866;
use log::{debug, info, warn};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

/// Source of free-space figures for a destination directory.
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Asks the file system that holds `path` (or its nearest existing parent).
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let existing = utils::nearest_existing_ancestor(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no existing parent directory for {}", path.display()),
            )
        })?;
        fs2::available_space(existing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Extracted { entries: usize, bytes: u64 },
    /// Nothing was written
    InsufficientSpace { required: u64, available: u64 },
}

pub struct ArchiveExtractor {
    space_probe: Box<dyn SpaceProbe>,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self::with_space_probe(FsSpaceProbe)
    }

    pub fn with_space_probe(probe: impl SpaceProbe + 'static) -> Self {
        Self {
            space_probe: Box::new(probe),
        }
    }

    pub fn validate_input(archive: &Path, destination: &Path) -> Result<()> {
        if archive.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(InstallerError::invalid_path("archive path must not be empty"));
        }
        if destination.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(InstallerError::invalid_path("destination folder must not be empty"));
        }
        if !archive.is_file() {
            return Err(InstallerError::invalid_path(format!(
                "archive not found: {}",
                archive.display()
            )));
        }
        Ok(())
    }

    /// Sum of the uncompressed sizes of every entry.
    pub fn required_space(archive: &Path) -> Result<u64> {
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        let mut total = 0u64;
        for index in 0..zip.len() {
            total = total.saturating_add(zip.by_index(index)?.size());
        }
        Ok(total)
    }

    /// Extract `archive` into `destination`, overwriting existing files.
    ///
    /// Cancellation surfaces as [`InstallerError::Cancelled`] without a
    /// status line; the caller reports it once.
    pub fn extract(
        &self,
        archive: &Path,
        destination: &Path,
        token: &CancellationToken,
        reporter: &Reporter,
    ) -> Result<ExtractOutcome> {
        reporter.status("Starting extraction...");
        Self::validate_input(archive, destination)?;

        let required = Self::required_space(archive)?;
        let available = self.space_probe.available_space(destination)?;
        if available < required {
            warn!(
                "Not enough space for {:?}: required {} bytes, available {} bytes",
                archive, required, available
            );
            reporter.status(format!(
                "Not enough disk space to extract the archive: required {}, available {}",
                format_file_size(required),
                format_file_size(available)
            ));
            return Ok(ExtractOutcome::InsufficientSpace { required, available });
        }

        match self.extract_entries(archive, destination, token, reporter) {
            Ok(outcome) => {
                info!("Extracted {:?} into {:?}", archive, destination);
                reporter.status("Extraction completed successfully.");
                Ok(outcome)
            }
            Err(InstallerError::Cancelled) => {
                info!("Extraction of {:?} cancelled", archive);
                Err(InstallerError::Cancelled)
            }
            Err(e) => {
                reporter.status(format!("Extraction error: {}", e));
                Err(e)
            }
        }
    }

    /// [`extract`](Self::extract) for callers with no orchestrator above
    /// them: cancellation is reported on the channel as well.
    pub fn extract_standalone(
        &self,
        archive: &Path,
        destination: &Path,
        token: &CancellationToken,
        reporter: &Reporter,
    ) -> Result<ExtractOutcome> {
        let result = self.extract(archive, destination, token, reporter);
        if matches!(result, Err(InstallerError::Cancelled)) {
            reporter.status("Extraction was cancelled.");
            reporter.cancelled();
        }
        result
    }

    fn extract_entries(
        &self,
        archive: &Path,
        destination: &Path,
        token: &CancellationToken,
        reporter: &Reporter,
    ) -> Result<ExtractOutcome> {
        utils::ensure_directory_exists(destination)?;

        let mut zip = ZipArchive::new(File::open(archive)?)?;
        let total = zip.len();
        let mut bytes = 0u64;

        for index in 0..total {
            ensure_not_cancelled(token)?;

            let mut entry = zip.by_index(index)?;
            let name = decode_entry_name(entry.name_raw(), entry.name());

            match safe_relative_path(&name) {
                Some(relative) => {
                    let target = destination.join(relative);
                    if entry.is_dir() {
                        utils::ensure_directory_exists(&target)?;
                    } else {
                        if let Some(parent) = target.parent() {
                            utils::ensure_directory_exists(parent)?;
                        }
                        let mut out = File::create(&target)?;
                        bytes += io::copy(&mut entry, &mut out)?;
                        debug!("Extracted {:?}", target);
                    }
                }
                None => {
                    warn!("Skipping archive entry outside destination: {}", name);
                    reporter.status(format!("Skipping entry outside destination: {}", name));
                }
            }

            reporter.progress(percent(index + 1, total));
            reporter.status(format!("Extracting: {}", name));
        }

        Ok(ExtractOutcome::Extracted { entries: total, bytes })
    }
}

/// Re-read the raw entry name through the DOS Cyrillic code page (CP866).
///
/// The re-decoded name wins unless it is blank or carries a replacement
/// marker, in which case the name as stored by the archive is kept.
pub fn decode_entry_name(raw: &[u8], stored: &str) -> String {
    let (decoded, _) = IBM866.decode_without_bom_handling(raw);
    if !decoded.trim().is_empty() && !decoded.contains('\u{FFFD}') && !decoded.contains('?') {
        decoded.into_owned()
    } else {
        stored.to_string()
    }
}

/// Relative path for an entry name, or `None` if it would leave the
/// destination directory.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    if name.starts_with('/') || name.starts_with('\\') {
        return None;
    }
    let mut path = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            // Drive letters and alternate data streams
            p if cfg!(windows) && p.contains(':') => return None,
            p => path.push(p),
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{drain, InstallEvent};
    use std::fs;
    use std::io::Write;
    use zip::write::FileOptions;

    pub(crate) struct FixedSpace(pub u64);

    impl SpaceProbe for FixedSpace {
        fn available_space(&self, _path: &Path) -> io::Result<u64> {
            Ok(self.0)
        }
    }

    /// Write a zip at `path`; names ending in `/` become directories.
    pub(crate) fn build_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    fn progress_values(events: &[InstallEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                InstallEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_extracts_every_entry_with_one_progress_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        build_zip(&archive, &[("docs/", ""), ("docs/readme.txt", "hello"), ("root.txt", "top")]);
        let dest = dir.path().join("out");

        let (reporter, mut rx) = Reporter::channel();
        let extractor = ArchiveExtractor::with_space_probe(FixedSpace(u64::MAX));
        let outcome = extractor
            .extract(&archive, &dest, &CancellationToken::new(), &reporter)
            .unwrap();

        assert_eq!(outcome, ExtractOutcome::Extracted { entries: 3, bytes: 8 });
        assert_eq!(fs::read_to_string(dest.join("docs").join("readme.txt")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(dest.join("root.txt")).unwrap(), "top");

        let events = drain(&mut rx);
        let progress = progress_values(&events);
        assert_eq!(progress, vec![33, 66, 100]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(events.contains(&InstallEvent::Status("Extracting: docs/readme.txt".to_string())));
    }

    #[test]
    fn test_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(&archive, &[("file.txt", "new")]);
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("file.txt"), "old contents").unwrap();

        let extractor = ArchiveExtractor::with_space_probe(FixedSpace(u64::MAX));
        extractor
            .extract(&archive, &dest, &CancellationToken::new(), &Reporter::silent())
            .unwrap();
        assert_eq!(fs::read_to_string(dest.join("file.txt")).unwrap(), "new");
    }

    #[test]
    fn test_insufficient_space_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(&archive, &[("big.txt", "0123456789")]);
        let dest = dir.path().join("never-created");

        let (reporter, mut rx) = Reporter::channel();
        let extractor = ArchiveExtractor::with_space_probe(FixedSpace(3));
        let outcome = extractor
            .extract(&archive, &dest, &CancellationToken::new(), &reporter)
            .unwrap();

        assert_eq!(outcome, ExtractOutcome::InsufficientSpace { required: 10, available: 3 });
        assert!(!dest.exists());
        let events = drain(&mut rx);
        assert!(progress_values(&events).is_empty());
        assert!(events.iter().any(|e| matches!(e, InstallEvent::Status(s) if s.starts_with("Not enough disk space"))));
    }

    #[test]
    fn test_cancelled_token_stops_before_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(&archive, &[("one.txt", "1"), ("two.txt", "2")]);
        let dest = dir.path().join("out");
        let token = CancellationToken::new();
        token.cancel();

        let (reporter, mut rx) = Reporter::channel();
        let extractor = ArchiveExtractor::with_space_probe(FixedSpace(u64::MAX));
        let err = extractor.extract(&archive, &dest, &token, &reporter).unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.join("one.txt").exists());
        let events = drain(&mut rx);
        assert!(progress_values(&events).is_empty());
        assert!(!events.iter().any(|e| matches!(e, InstallEvent::Status(s) if s.starts_with("Extraction error"))));
    }

    #[test]
    fn test_standalone_extraction_reports_cancel_once() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(&archive, &[("one.txt", "1")]);
        let token = CancellationToken::new();
        token.cancel();

        let (reporter, mut rx) = Reporter::channel();
        let extractor = ArchiveExtractor::with_space_probe(FixedSpace(u64::MAX));
        let err = extractor
            .extract_standalone(&archive, &dir.path().join("out"), &token, &reporter)
            .unwrap_err();

        assert!(err.is_cancelled());
        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| **e == InstallEvent::Cancelled).count(), 1);
        assert!(events.contains(&InstallEvent::Status("Extraction was cancelled.".to_string())));
    }

    #[test]
    fn test_standalone_extraction_success_has_no_cancel_event() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(&archive, &[("one.txt", "1")]);

        let (reporter, mut rx) = Reporter::channel();
        ArchiveExtractor::with_space_probe(FixedSpace(u64::MAX))
            .extract_standalone(&archive, &dir.path().join("out"), &CancellationToken::new(), &reporter)
            .unwrap();
        assert!(!drain(&mut rx).contains(&InstallEvent::Cancelled));
    }

    #[test]
    fn test_entries_escaping_destination_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        build_zip(&archive, &[("../evil.txt", "x"), ("ok.txt", "y")]);
        let dest = dir.path().join("out");

        let (reporter, mut rx) = Reporter::channel();
        let extractor = ArchiveExtractor::with_space_probe(FixedSpace(u64::MAX));
        extractor
            .extract(&archive, &dest, &CancellationToken::new(), &reporter)
            .unwrap();

        assert!(!dir.path().join("evil.txt").exists());
        assert!(dest.join("ok.txt").exists());
        assert_eq!(progress_values(&drain(&mut rx)), vec![50, 100]);
    }

    #[test]
    fn test_missing_archive_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArchiveExtractor::validate_input(&dir.path().join("nope.zip"), dir.path()).unwrap_err();
        assert!(matches!(err, InstallerError::InvalidPath { .. }));
        let err = ArchiveExtractor::validate_input(Path::new("a.zip"), Path::new("  ")).unwrap_err();
        assert!(matches!(err, InstallerError::InvalidPath { .. }));
    }

    #[test]
    fn test_decode_entry_name() {
        // "Привет.txt" in CP866
        let raw = b"\x8F\xE0\xA8\xA2\xA5\xE2.txt";
        assert_eq!(decode_entry_name(raw, "garbled.txt"), "Привет.txt");
        assert_eq!(decode_entry_name(b"dir/file.txt", "dir/file.txt"), "dir/file.txt");
        assert_eq!(decode_entry_name(b"what?.txt", "stored.txt"), "stored.txt");
        assert_eq!(decode_entry_name(b"   ", "stored.txt"), "stored.txt");
    }

    #[test]
    fn test_safe_relative_path() {
        assert_eq!(safe_relative_path("a/b/c.txt"), Some(PathBuf::from("a").join("b").join("c.txt")));
        assert_eq!(safe_relative_path("./a"), Some(PathBuf::from("a")));
        assert_eq!(safe_relative_path("../a"), None);
        assert_eq!(safe_relative_path("/etc/passwd"), None);
        assert_eq!(safe_relative_path("\\server\\share"), None);
        assert_eq!(safe_relative_path("/"), None);
    }

    #[cfg(windows)]
    #[test]
    fn test_drive_letters_are_rejected() {
        assert_eq!(safe_relative_path("C:\\x"), None);
        assert_eq!(safe_relative_path("dir/file.txt:stream"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_colon_is_a_plain_character_on_unix() {
        assert_eq!(safe_relative_path("a:b.txt"), Some(PathBuf::from("a:b.txt")));
        assert_eq!(safe_relative_path("logs/12:00.cif"), Some(PathBuf::from("logs").join("12:00.cif")));
    }
}
