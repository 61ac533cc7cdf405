//! Line-level rewriting of the toolchain's settings files and scripts.
//!
//! Every edit is a whole-file read-modify-write; output is UTF-8 without a
//! BOM.

use crate::config::SettingsFileEdit;
use crate::events::{ensure_not_cancelled, Reporter};
use crate::utils;
use crate::{InstallerError, Result};
use log::{debug, info};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tokio_util::sync::CancellationToken;

pub const CCTBX_PYTHON_PREFIX: &str = "set cctbxPython=";
pub const COD_PROCESSOR_PREFIX: &str = "set CODprocessorPath=";

pub struct FileConfigPatcher<'a> {
    token: &'a CancellationToken,
    reporter: &'a Reporter,
}

impl<'a> FileConfigPatcher<'a> {
    pub fn new(token: &'a CancellationToken, reporter: &'a Reporter) -> Self {
        Self { token, reporter }
    }

    /// Patch `<destination>/COD/<edit.file_name>` in place and return its path.
    pub fn patch_settings_file(
        &self,
        root: &Path,
        destination: &Path,
        reference_cif: &str,
        edit: &SettingsFileEdit,
    ) -> Result<PathBuf> {
        ensure_not_cancelled(self.token)?;

        let settings_path = destination.join("COD").join(&edit.file_name);
        let reference = destination
            .join("cifStandart4RIR")
            .join(reference_cif)
            .display()
            .to_string();

        let mut lines = utils::read_lines(&settings_path)?;
        apply_settings_edit(&mut lines, edit, root, &reference)
            .map_err(|message| InstallerError::patch(settings_path.display().to_string(), message))?;
        utils::write_lines(&settings_path, &lines)?;

        info!("Updated settings file {:?}", settings_path);
        self.reporter
            .status(format!("Updated settings file: {}", settings_path.display()));

        ensure_not_cancelled(self.token)?;
        Ok(settings_path)
    }

    /// Point the launcher's first two lines at the cctbx interpreter and
    /// the COD processor folder under `destination`.
    pub fn patch_launcher_script(&self, script: &Path, destination: &Path) -> Result<()> {
        ensure_not_cancelled(self.token)?;
        self.reporter
            .status(format!("Editing file: {}", script.display()));

        let mut lines = utils::read_lines(script)?;
        if lines.len() < 2 {
            return Err(InstallerError::patch(
                script.display().to_string(),
                format!("expected at least 2 lines, found {}", lines.len()),
            ));
        }

        let [interpreter, processor] = launcher_lines(destination);
        lines[0] = interpreter;
        lines[1] = processor;
        utils::write_lines(script, &lines)?;
        debug!("Patched launcher {:?}", script);

        ensure_not_cancelled(self.token)
    }

    /// Insert `header` as the first line of `file`.
    ///
    /// Applying this twice leaves two header lines.
    pub fn prepend_header(&self, file: &Path, header: &str) -> Result<()> {
        ensure_not_cancelled(self.token)?;

        prepend_line(file, header)?;
        self.reporter
            .status(format!("Editing file: {}", file.display()));

        ensure_not_cancelled(self.token)
    }
}

/// Read `file`, put `line` in front and write it back.
pub fn prepend_line(file: &Path, line: &str) -> Result<()> {
    let mut lines = utils::read_lines(file)?;
    lines.insert(0, line.to_string());
    utils::write_lines(file, &lines)
}

/// The `cif`, `cif_hkl` and `cif_corrupted` folders for slot `n`.
pub fn settings_paths(root: &Path, n: u32) -> [String; 3] {
    let slot = n.to_string();
    ["cif", "cif_hkl", "cif_corrupted"].map(|dir| root.join(dir).join(&slot).display().to_string())
}

pub fn launcher_lines(destination: &Path) -> [String; 2] {
    let interpreter = destination
        .join("cctbx")
        .join("cctbx_build")
        .join("bin")
        .join("cctbx.python.bat");
    let processor = destination.join("COD");
    [
        format!("{}{}", CCTBX_PYTHON_PREFIX, interpreter.display()),
        format!("{}{}{}", COD_PROCESSOR_PREFIX, processor.display(), MAIN_SEPARATOR),
    ]
}

/// Apply both edit modes to an in-memory line array.
pub fn apply_settings_edit(
    lines: &mut [String],
    edit: &SettingsFileEdit,
    root: &Path,
    reference: &str,
) -> std::result::Result<(), String> {
    let required = edit.required_line_count();
    if lines.len() < required {
        return Err(format!(
            "template has {} lines, at least {} required",
            lines.len(),
            required
        ));
    }

    for (i, base) in edit.base_indices.iter().enumerate() {
        let paths = settings_paths(root, edit.start_index + i as u32);
        for (offset, path) in paths.into_iter().enumerate() {
            lines[base + offset] = path;
        }
    }

    for &index in &edit.indices_to_update {
        lines[index] = reference.to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{drain, InstallEvent};
    use std::fs;

    fn template(count: usize) -> String {
        (0..count).map(|i| format!("placeholder {}\n", i)).collect()
    }

    fn setup_settings(dest: &Path, edit: &SettingsFileEdit, count: usize) -> PathBuf {
        let cod = dest.join("COD");
        fs::create_dir_all(&cod).unwrap();
        let path = cod.join(&edit.file_name);
        fs::write(&path, template(count)).unwrap();
        path
    }

    #[test]
    fn test_settings_file_gets_computed_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("inst");
        let dest = dir.path().join("dest");
        let edit = SettingsFileEdit::new("1stProcessSettingsAllCifs.txt", &[0, 4, 8], &[3, 7, 11], 1);
        let path = setup_settings(&dest, &edit, 14);

        let token = CancellationToken::new();
        let (reporter, mut rx) = Reporter::channel();
        FileConfigPatcher::new(&token, &reporter)
            .patch_settings_file(&root, &dest, "al2o3_73724.cif", &edit)
            .unwrap();

        let lines = utils::read_lines(&path).unwrap();
        assert_eq!(lines.len(), 14);
        for (i, base) in edit.base_indices.iter().enumerate() {
            let n = (1 + i).to_string();
            assert_eq!(lines[*base], root.join("cif").join(&n).display().to_string());
            assert_eq!(lines[base + 1], root.join("cif_hkl").join(&n).display().to_string());
            assert_eq!(lines[base + 2], root.join("cif_corrupted").join(&n).display().to_string());
        }
        let reference = dest.join("cifStandart4RIR").join("al2o3_73724.cif").display().to_string();
        for index in [3, 7, 11] {
            assert_eq!(lines[index], reference);
        }
        assert_eq!(lines[12], "placeholder 12");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], InstallEvent::Status(s) if s.starts_with("Updated settings file")));
    }

    #[test]
    fn test_settings_patch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();
        let edit = SettingsFileEdit::new("2ndProcessSettingsAllCifs.txt", &[0, 4], &[3, 7], 4);
        let path = setup_settings(&dest, &edit, 8);

        let token = CancellationToken::new();
        let reporter = Reporter::silent();
        let patcher = FileConfigPatcher::new(&token, &reporter);
        patcher.patch_settings_file(&dest, &dest, "ref.cif", &edit).unwrap();
        let first = fs::read(&path).unwrap();
        patcher.patch_settings_file(&dest, &dest, "ref.cif", &edit).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_short_template_is_rejected_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();
        let edit = SettingsFileEdit::new("3rdProcessSettingsAllCifs.txt", &[0, 4], &[3, 7], 6);
        let path = setup_settings(&dest, &edit, 5);
        let before = fs::read(&path).unwrap();

        let token = CancellationToken::new();
        let reporter = Reporter::silent();
        let err = FileConfigPatcher::new(&token, &reporter)
            .patch_settings_file(&dest, &dest, "ref.cif", &edit)
            .unwrap_err();
        assert!(matches!(err, InstallerError::Patch { .. }));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_cancelled_token_raises_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let reporter = Reporter::silent();
        let patcher = FileConfigPatcher::new(&token, &reporter);

        // The file does not even exist: cancellation wins.
        let edit = SettingsFileEdit::new("missing.txt", &[0], &[3], 1);
        let err = patcher
            .patch_settings_file(dir.path(), dir.path(), "ref.cif", &edit)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(patcher.prepend_header(&dir.path().join("x.py"), "#").unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cancel_during_patch_keeps_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().to_path_buf();
        let edit = SettingsFileEdit::new("4thProcessSettingsAllCifs.txt", &[0, 4], &[3, 7], 8);
        let path = setup_settings(&dest, &edit, 8);

        // Cancelled right after the "Updated settings file" status
        let token = CancellationToken::new();
        let reporter = Reporter::silent().cancelling_on_status(&token);
        let err = FileConfigPatcher::new(&token, &reporter)
            .patch_settings_file(&dest, &dest, "ref.cif", &edit)
            .unwrap_err();

        assert!(err.is_cancelled());
        let lines = utils::read_lines(&path).unwrap();
        assert_eq!(lines[0], dest.join("cif").join("8").display().to_string());
        assert_eq!(lines[4], dest.join("cif").join("9").display().to_string());
    }

    #[test]
    fn test_cancel_during_header_prepend_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("Wavelength.py");
        fs::write(&script, "print(1)\n").unwrap();

        let token = CancellationToken::new();
        let reporter = Reporter::silent().cancelling_on_status(&token);
        let patcher = FileConfigPatcher::new(&token, &reporter);
        assert!(patcher.prepend_header(&script, "# -*- coding: utf-8 -*-").unwrap_err().is_cancelled());
        assert_eq!(utils::read_lines(&script).unwrap(), vec!["# -*- coding: utf-8 -*-", "print(1)"]);

        // Later calls stop before touching the file
        assert!(patcher.prepend_header(&script, "#").unwrap_err().is_cancelled());
        assert_eq!(utils::read_lines(&script).unwrap().len(), 2);
    }

    #[test]
    fn test_launcher_script_first_two_lines() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("almaz");
        let script = dir.path().join("runAllCifs.bat");
        fs::write(&script, "set cctbxPython=OLD\nset CODprocessorPath=OLD\npython run.py\n").unwrap();

        let token = CancellationToken::new();
        let reporter = Reporter::silent();
        FileConfigPatcher::new(&token, &reporter)
            .patch_launcher_script(&script, &dest)
            .unwrap();

        let lines = utils::read_lines(&script).unwrap();
        let expected_python = dest.join("cctbx").join("cctbx_build").join("bin").join("cctbx.python.bat");
        assert_eq!(lines[0], format!("set cctbxPython={}", expected_python.display()));
        assert_eq!(
            lines[1],
            format!("set CODprocessorPath={}{}", dest.join("COD").display(), MAIN_SEPARATOR)
        );
        assert_eq!(lines[2], "python run.py");
    }

    #[test]
    fn test_launcher_script_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.bat");
        fs::write(&script, "only one line\n").unwrap();
        let token = CancellationToken::new();
        let reporter = Reporter::silent();
        let err = FileConfigPatcher::new(&token, &reporter)
            .patch_launcher_script(&script, dir.path())
            .unwrap_err();
        assert!(matches!(err, InstallerError::Patch { .. }));
    }

    #[test]
    fn test_prepend_header_is_not_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("TreeWalker.py");
        fs::write(&script, "import os\n").unwrap();

        let token = CancellationToken::new();
        let reporter = Reporter::silent();
        let patcher = FileConfigPatcher::new(&token, &reporter);
        patcher.prepend_header(&script, "# -*- coding: utf-8 -*-").unwrap();
        patcher.prepend_header(&script, "# -*- coding: utf-8 -*-").unwrap();

        // Re-running duplicates the header; kept as-is.
        assert_eq!(
            utils::read_lines(&script).unwrap(),
            vec!["# -*- coding: utf-8 -*-", "# -*- coding: utf-8 -*-", "import os"]
        );
    }
}
