pub mod archive_extractor;
pub mod file_patcher;
pub mod process_runner;
pub mod orchestrator;

pub use archive_extractor::{ArchiveExtractor, ExtractOutcome, FsSpaceProbe, SpaceProbe};
pub use file_patcher::FileConfigPatcher;
pub use process_runner::{ProcessRunner, ScriptRunStatus, ScriptRunner};
pub use orchestrator::{InstallOrchestrator, InstallOutcome, InstallStage, InstallationContext};
