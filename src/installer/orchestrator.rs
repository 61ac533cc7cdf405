//! Installation workflow as an explicit state machine.
//!
//! [`InstallPlan::stages`] is the transition table; [`InstallOrchestrator::run`]
//! walks it from [`InstallStage::ValidateRoot`] to [`InstallStage::Done`],
//! checking the cancellation token between stages. Side effects of finished
//! stages are never rolled back.

use crate::config::InstallPlan;
use crate::events::Reporter;
use crate::installer::archive_extractor::{ArchiveExtractor, ExtractOutcome};
use crate::installer::file_patcher::FileConfigPatcher;
use crate::installer::process_runner::{ProcessRunner, ScriptRunner};
use crate::{InstallerError, Result};
use log::{error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    ValidateRoot,
    ExtractArchive(usize),
    PatchSettingsFile(usize),
    PatchLauncherScript,
    PatchInterpreterScript(usize),
    RunLauncherScript,
    RunToolchainInstallScript,
    Done,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStage::ValidateRoot => write!(f, "validate install root"),
            InstallStage::ExtractArchive(i) => write!(f, "extract archive #{}", i + 1),
            InstallStage::PatchSettingsFile(i) => write!(f, "patch settings file #{}", i + 1),
            InstallStage::PatchLauncherScript => write!(f, "patch launcher script"),
            InstallStage::PatchInterpreterScript(i) => write!(f, "patch interpreter script #{}", i + 1),
            InstallStage::RunLauncherScript => write!(f, "run launcher script"),
            InstallStage::RunToolchainInstallScript => write!(f, "run toolchain install script"),
            InstallStage::Done => write!(f, "done"),
        }
    }
}

impl InstallPlan {
    /// Ordered transition table, `Done` included.
    pub fn stages(&self) -> Vec<InstallStage> {
        let mut stages = vec![InstallStage::ValidateRoot];
        stages.extend((0..self.archives.len()).map(InstallStage::ExtractArchive));
        stages.extend((0..self.settings_files.len()).map(InstallStage::PatchSettingsFile));
        stages.push(InstallStage::PatchLauncherScript);
        stages.extend((0..self.interpreter_scripts.len()).map(InstallStage::PatchInterpreterScript));
        stages.push(InstallStage::RunLauncherScript);
        stages.push(InstallStage::RunToolchainInstallScript);
        stages.push(InstallStage::Done);
        stages
    }

    pub fn next_stage(&self, stage: InstallStage) -> InstallStage {
        let stages = self.stages();
        stages
            .iter()
            .position(|s| *s == stage)
            .and_then(|i| stages.get(i + 1).copied())
            .unwrap_or(InstallStage::Done)
    }
}

/// Everything one installation run needs; created per invocation.
#[derive(Debug, Clone)]
pub struct InstallationContext {
    /// Holds the archives, receives their contents and roots the `cif*` paths
    pub install_root: PathBuf,
    /// Where `COD/`, `cctbx/` and `cifStandart4RIR/` are expected
    pub destination: PathBuf,
    pub token: CancellationToken,
    pub reporter: Reporter,
}

impl InstallationContext {
    pub fn new(
        install_root: PathBuf,
        destination: Option<PathBuf>,
        token: CancellationToken,
        reporter: Reporter,
    ) -> Self {
        let destination = destination
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| install_root.clone());
        Self {
            install_root,
            destination,
            token,
            reporter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Completed,
    Cancelled,
    /// Stages before `stage` took effect and stay that way
    Aborted { stage: InstallStage, message: String },
    MissingRoot,
}

pub struct InstallOrchestrator {
    plan: InstallPlan,
    extractor: ArchiveExtractor,
    runner: Box<dyn ScriptRunner>,
}

impl InstallOrchestrator {
    pub fn new(plan: InstallPlan) -> Self {
        Self::with_components(plan, ArchiveExtractor::new(), ProcessRunner::new())
    }

    pub fn with_components(
        plan: InstallPlan,
        extractor: ArchiveExtractor,
        runner: impl ScriptRunner + 'static,
    ) -> Self {
        Self {
            plan,
            extractor,
            runner: Box::new(runner),
        }
    }

    pub fn plan(&self) -> &InstallPlan {
        &self.plan
    }

    /// Run the whole table and report the terminal event.
    pub fn run(&self, ctx: &InstallationContext) -> InstallOutcome {
        let reporter = &ctx.reporter;
        reporter.status("Starting installation...");

        let outcome = self.drive(ctx);
        match &outcome {
            InstallOutcome::MissingRoot => {
                reporter.status("Installation folder is not specified.");
                return outcome;
            }
            InstallOutcome::Completed => {
                info!("Installation completed in {:?}", ctx.install_root);
                reporter.done();
            }
            InstallOutcome::Cancelled => {
                info!("Installation cancelled");
                reporter.status("Installation was cancelled.");
                reporter.cancelled();
            }
            InstallOutcome::Aborted { stage, message } => {
                error!("Installation aborted at '{}': {}", stage, message);
                reporter.status(format!("Error: {}", message));
                reporter.failed(message.clone());
            }
        }
        reporter.status("Installation process finished.");
        outcome
    }

    fn drive(&self, ctx: &InstallationContext) -> InstallOutcome {
        let mut stage = InstallStage::ValidateRoot;
        loop {
            if stage == InstallStage::Done {
                return InstallOutcome::Completed;
            }
            if stage != InstallStage::ValidateRoot && ctx.token.is_cancelled() {
                return InstallOutcome::Cancelled;
            }

            match self.execute_stage(stage, ctx) {
                Ok(()) => stage = self.plan.next_stage(stage),
                Err(InstallerError::Cancelled) => return InstallOutcome::Cancelled,
                Err(_) if stage == InstallStage::ValidateRoot => return InstallOutcome::MissingRoot,
                Err(e) => {
                    return InstallOutcome::Aborted {
                        stage,
                        message: e.to_string(),
                    }
                }
            }
        }
    }

    /// Execute a single stage. Public so each transition can be driven on
    /// its own.
    pub fn execute_stage(&self, stage: InstallStage, ctx: &InstallationContext) -> Result<()> {
        let reporter = &ctx.reporter;
        let patcher = FileConfigPatcher::new(&ctx.token, reporter);

        match stage {
            InstallStage::ValidateRoot => {
                if ctx.install_root.as_os_str().to_string_lossy().trim().is_empty() {
                    return Err(InstallerError::invalid_path("installation folder is not specified"));
                }
                reporter.status(format!("Extracting {}...", self.plan.archives.join(", ")));
                Ok(())
            }
            InstallStage::ExtractArchive(i) => {
                let name = self.plan.archives.get(i).ok_or_else(|| missing_item("archive", i))?;
                let archive = ctx.install_root.join(name);
                if !archive.is_file() {
                    warn!("Archive {:?} not found, skipping", archive);
                    reporter.status(format!("Archive {} not found.", name));
                    return Ok(());
                }
                match self.extractor.extract(&archive, &ctx.install_root, &ctx.token, reporter)? {
                    ExtractOutcome::Extracted { entries, .. } => {
                        info!("{}: {} entries extracted", name, entries);
                    }
                    ExtractOutcome::InsufficientSpace { .. } => {
                        warn!("{} skipped: not enough disk space", name);
                    }
                }
                Ok(())
            }
            InstallStage::PatchSettingsFile(i) => {
                let edit = self.plan.settings_files.get(i).ok_or_else(|| missing_item("settings file", i))?;
                if i == 0 {
                    reporter.status("Editing files...");
                }
                patcher.patch_settings_file(
                    &ctx.install_root,
                    &ctx.destination,
                    &self.plan.reference_cif,
                    edit,
                )?;
                Ok(())
            }
            InstallStage::PatchLauncherScript => {
                let script = ctx.destination.join(&self.plan.launcher_script);
                patcher.patch_launcher_script(&script, &ctx.destination)
            }
            InstallStage::PatchInterpreterScript(i) => {
                let name = self
                    .plan
                    .interpreter_scripts
                    .get(i)
                    .ok_or_else(|| missing_item("interpreter script", i))?;
                let script = ctx.destination.join("COD").join(name);
                patcher.prepend_header(&script, &self.plan.source_encoding_header)
            }
            InstallStage::RunLauncherScript => {
                self.run_script(&self.plan.launcher_script, ctx);
                Ok(())
            }
            InstallStage::RunToolchainInstallScript => {
                self.run_script(&self.plan.toolchain_install_script, ctx);
                Ok(())
            }
            InstallStage::Done => Ok(()),
        }
    }

    fn run_script(&self, relative: &Path, ctx: &InstallationContext) {
        let script = ctx.destination.join(relative);
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| relative.display().to_string());
        ctx.reporter.status(format!("Running {}...", name));
        let status = self.runner.run_script(&script, &ctx.reporter);
        if !status.is_completed() {
            warn!("{} did not run: {:?}", name, status);
        }
    }
}

fn missing_item(what: &str, index: usize) -> InstallerError {
    InstallerError::config(format!("no {} at position {}", what, index))
}
