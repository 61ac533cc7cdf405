// src/installer/process_runner.rs

use crate::events::Reporter;
use crate::installer::file_patcher::prepend_line;
use crate::utils;
use log::{debug, info, warn};
use std::io;
use std::path::Path;
use std::process::Command;

/// Switches the Windows console to UTF-8 before the script body runs.
pub const CONSOLE_CODEPAGE_DIRECTIVE: &str = "chcp 65001 >nul";

/// Coarse result of one script run. Nothing here is an error to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptRunStatus {
    /// Exit code as reported by the OS; not interpreted further
    Completed(Option<i32>),
    MissingScript,
    MissingShell(String),
    SpawnFailed(String),
    Failed(String),
}

impl ScriptRunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Seam between the orchestrator and the OS process layer.
pub trait ScriptRunner: Send + Sync {
    fn run_script(&self, script: &Path, reporter: &Reporter) -> ScriptRunStatus;
}

/// Runs batch scripts through the platform shell and blocks until they exit.
pub struct ProcessRunner {
    shell: String,
    shell_args: Vec<String>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        if cfg!(windows) {
            Self::with_shell("cmd", &["/C"])
        } else {
            Self::with_shell("sh", &[])
        }
    }

    pub fn with_shell(shell: &str, args: &[&str]) -> Self {
        Self {
            shell: shell.to_string(),
            shell_args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Создает `Command` для скрипта; рабочая папка - папка скрипта.
    /// `script` must already be absolute, the shell resolves it from that folder.
    fn create_command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.args(&self.shell_args).arg(script);
        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        // stdio is inherited: the console window shows the script's output
        cmd
    }
}

impl ScriptRunner for ProcessRunner {
    fn run_script(&self, script: &Path, reporter: &Reporter) -> ScriptRunStatus {
        if !script.is_file() {
            warn!("Script not found: {:?}", script);
            reporter.status(format!("File not found: {}", script.display()));
            return ScriptRunStatus::MissingScript;
        }

        let script = match utils::absolute_path(script) {
            Ok(path) => path,
            Err(e) => {
                reporter.status(format!("Unexpected error: {}", e));
                return ScriptRunStatus::Failed(e.to_string());
            }
        };
        let script = script.as_path();

        if !utils::is_command_available(&self.shell) {
            warn!("Shell '{}' is not available", self.shell);
            reporter.status(format!("Failed to start process: '{}' not found", self.shell));
            return ScriptRunStatus::MissingShell(self.shell.clone());
        }

        // Re-running prepends the directive again.
        if let Err(e) = prepend_line(script, CONSOLE_CODEPAGE_DIRECTIVE) {
            reporter.status(format!("Unexpected error: {}", e));
            return ScriptRunStatus::Failed(e.to_string());
        }

        info!("Running {:?}", script);
        let mut child = match self.create_command(script).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                reporter.status(format!("Failed to start process: {}", e));
                return ScriptRunStatus::MissingShell(self.shell.clone());
            }
            Err(e) => {
                reporter.status(format!("Failed to start process: {}", e));
                return ScriptRunStatus::SpawnFailed(e.to_string());
            }
        };

        match child.wait() {
            Ok(status) => {
                debug!("{:?} exited with {}", script, status);
                ScriptRunStatus::Completed(status.code())
            }
            Err(e) => {
                reporter.status(format!("Execution error: {}", e));
                ScriptRunStatus::Failed(e.to_string())
            }
        }
    }
}
