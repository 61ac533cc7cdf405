use almaz_installer::{
    cli::{Cli, Commands},
    config::{ConfigManager, InstallPlan},
    downloader::Downloader,
    events::{InstallEvent, Reporter},
    installer::{ArchiveExtractor, ExtractOutcome, InstallOrchestrator, InstallOutcome, InstallationContext},
    utils, InstallerError, Result,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging with default INFO (DEBUG if --debug)
    let mut builder = env_logger::Builder::from_default_env();
    if cli.debug { builder.filter_level(LevelFilter::Debug); } else { builder.filter_level(LevelFilter::Info); }
    let _ = builder.try_init();

    // Run the application
    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config_manager = ConfigManager::new(cli.config.clone())?;

    // Ctrl-C is the cancel button
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling...");
            signal_token.cancel();
        }
    });

    match cli.command {
        Some(Commands::Download { url, folder, skip_check }) => {
            download(&mut config_manager, url, folder, skip_check, &token).await
        }
        Some(Commands::Unzip { archive, destination }) => {
            let archive = archive
                .or_else(|| config_manager.get_config().downloaded_archive.clone())
                .ok_or_else(|| InstallerError::config("No archive given and nothing has been downloaded yet"))?;
            let destination = destination
                .or_else(|| archive.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."));
            extract(archive, destination, &token).await.map(|_| ())
        }
        Some(Commands::ExtractApp { archive, destination }) => {
            // Each application archive gets a folder named after it
            let stem = archive
                .file_stem()
                .ok_or_else(|| InstallerError::invalid_path(archive.display().to_string()))?;
            let target = utils::absolute_path(&destination.join(stem))?;
            if extract(archive, target.clone(), &token).await? {
                config_manager.set_install_path(target)?;
            }
            Ok(())
        }
        Some(Commands::Install { root, destination }) => {
            install(&mut config_manager, root, destination, &token).await
        }
        Some(Commands::ShowConfig) => {
            println!("{}", config_manager.get_config_summary());
            Ok(())
        }
        Some(Commands::Version) => {
            utils::show_version();
            Ok(())
        }
        None => {
            utils::show_version();
            println!("Use --help to see available commands");
            Ok(())
        }
    }
}

async fn download(
    config_manager: &mut ConfigManager,
    url: Option<String>,
    folder: Option<PathBuf>,
    skip_check: bool,
    token: &CancellationToken,
) -> Result<()> {
    let url = url.unwrap_or_else(|| config_manager.get_config().download_url.clone());
    let folder = match folder.or_else(|| config_manager.get_config().download_folder.clone()) {
        Some(folder) => Some(utils::validate_and_create_path(&folder)?),
        None => None,
    };

    let (reporter, rx) = Reporter::channel();
    let renderer = spawn_renderer(rx);

    if !Downloader::is_valid_url(&url, &reporter) {
        drop(reporter);
        let _ = renderer.await;
        return Err(InstallerError::download(format!("Invalid URL: {}", url)));
    }
    config_manager.set_download_url(&url)?;

    let downloader = Downloader::new()?;
    if !skip_check && !downloader.check_url_availability(&url, &reporter).await {
        reporter.status("URL is not available.");
        drop(reporter);
        let _ = renderer.await;
        return Err(InstallerError::download(format!("URL is not available: {}", url)));
    }

    info!("Downloading {}", url);
    let archive = downloader
        .download_file(&url, folder.as_deref(), token, &reporter)
        .await;
    drop(reporter);
    let _ = renderer.await;

    match (archive, folder) {
        (Some(archive), Some(folder)) => {
            config_manager.set_download_result(folder, archive.clone())?;
            println!("Archive saved to {}", archive.display());
            Ok(())
        }
        _ if token.is_cancelled() => Ok(()),
        // No folder is the same as the user backing out
        (_, None) => Ok(()),
        _ => Err(InstallerError::download("Download did not complete")),
    }
}

/// `Ok(true)` when the archive was fully extracted.
async fn extract(archive: PathBuf, destination: PathBuf, token: &CancellationToken) -> Result<bool> {
    let (reporter, rx) = Reporter::channel();
    let renderer = spawn_renderer(rx);

    let task_token = token.clone();
    let result = tokio::task::spawn_blocking(move || {
        ArchiveExtractor::new().extract_standalone(&archive, &destination, &task_token, &reporter)
    })
    .await
    .map_err(|e| InstallerError::extraction(format!("Extraction task failed: {}", e)))?;
    let _ = renderer.await;

    match result {
        Ok(ExtractOutcome::Extracted { entries, bytes }) => {
            info!("Extracted {} entries ({})", entries, utils::format_file_size(bytes));
            Ok(true)
        }
        Ok(ExtractOutcome::InsufficientSpace { required, available }) => Err(InstallerError::extraction(format!(
            "Not enough disk space: required {}, available {}",
            utils::format_file_size(required),
            utils::format_file_size(available)
        ))),
        Err(InstallerError::Cancelled) => {
            warn!("Extraction cancelled");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn install(
    config_manager: &mut ConfigManager,
    root: Option<PathBuf>,
    destination: Option<PathBuf>,
    token: &CancellationToken,
) -> Result<()> {
    // Paths end up inside the toolchain's files, so they must be absolute.
    // An unset root is reported by the orchestrator itself
    let root = match root
        .or_else(|| config_manager.get_config().install_path.clone())
        .filter(|r| !r.as_os_str().is_empty())
    {
        Some(root) => {
            let root = utils::validate_and_create_path(&root)?;
            config_manager.set_install_path(root.clone())?;
            Some(root)
        }
        None => None,
    };
    let destination = match destination
        .or_else(|| config_manager.get_config().destination_path.clone())
        .filter(|d| !d.as_os_str().is_empty())
    {
        Some(destination) => {
            let destination = utils::validate_and_create_path(&destination)?;
            config_manager.set_destination_path(destination.clone())?;
            Some(destination)
        }
        None => None,
    };

    let (reporter, rx) = Reporter::channel();
    let renderer = spawn_renderer(rx);
    let ctx = InstallationContext::new(root.unwrap_or_default(), destination, token.clone(), reporter);

    let outcome = tokio::task::spawn_blocking(move || {
        InstallOrchestrator::new(InstallPlan::default()).run(&ctx)
    })
    .await
    .map_err(|e| InstallerError::install(format!("Installation task failed: {}", e)))?;
    let _ = renderer.await;

    match outcome {
        InstallOutcome::Completed => {
            println!("Installation completed successfully!");
            Ok(())
        }
        InstallOutcome::Cancelled => Ok(()),
        InstallOutcome::MissingRoot => Err(InstallerError::install(
            "Installation folder is not specified (use --root)",
        )),
        InstallOutcome::Aborted { stage, message } => Err(InstallerError::install(format!(
            "aborted at '{}': {}",
            stage, message
        ))),
    }
}

/// Draw events on a progress bar until every reporter is dropped.
fn spawn_renderer(mut rx: UnboundedReceiver<InstallEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        while let Some(event) = rx.recv().await {
            match event {
                InstallEvent::Progress(percent) => pb.set_position(percent as u64),
                InstallEvent::Status(message) => pb.println(message),
                InstallEvent::Done => pb.finish_with_message("Done"),
                InstallEvent::Cancelled => pb.abandon_with_message("Cancelled"),
                InstallEvent::Failed(message) => pb.abandon_with_message(message),
            }
        }

        if !pb.is_finished() {
            pb.finish_and_clear();
        }
    })
}
