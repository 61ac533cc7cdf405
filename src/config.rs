//! Configuration management for the installer
//!
//! Two kinds of configuration live here: the persisted user choices
//! ([`InstallerConfig`], stored as JSON) and the fixed file-system contract
//! of the COD toolchain ([`InstallPlan`]).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::{Result, InstallerError};
use log::{info, debug};

// Constants
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_DOWNLOAD_URL: &str = "http://www.crystallography.net/archives/cod-cifs-mysql.zip";
pub const CONFIG_DIR_NAME: &str = "almaz-installer";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Line-level edit of one `*ProcessSettingsAllCifs.txt` file.
///
/// For every `i`, the three lines starting at `base_indices[i]` receive the
/// `cif`, `cif_hkl` and `cif_corrupted` folders numbered `start_index + i`;
/// every line in `indices_to_update` receives the reference CIF path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFileEdit {
    pub file_name: String,
    pub base_indices: Vec<usize>,
    pub indices_to_update: Vec<usize>,
    pub start_index: u32,
}

impl SettingsFileEdit {
    pub fn new(file_name: &str, base_indices: &[usize], indices_to_update: &[usize], start_index: u32) -> Self {
        Self {
            file_name: file_name.to_string(),
            base_indices: base_indices.to_vec(),
            indices_to_update: indices_to_update.to_vec(),
            start_index,
        }
    }

    /// Smallest line count a template must have for this edit to apply.
    pub fn required_line_count(&self) -> usize {
        let injected = self.base_indices.iter().map(|i| i + 3).max().unwrap_or(0);
        let fixed = self.indices_to_update.iter().map(|i| i + 1).max().unwrap_or(0);
        injected.max(fixed)
    }
}

/// Names and layout the COD toolchain expects on disk.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub archives: Vec<String>,
    pub settings_files: Vec<SettingsFileEdit>,
    pub reference_cif: String,
    pub interpreter_scripts: Vec<String>,
    pub source_encoding_header: String,
    pub launcher_script: PathBuf,
    pub toolchain_install_script: PathBuf,
}

impl Default for InstallPlan {
    fn default() -> Self {
        Self {
            archives: vec![
                "COD.ZIP".to_string(),
                "cifStandart4RIR.zip".to_string(),
                "cctbx_Fixed.zip".to_string(),
            ],
            settings_files: vec![
                SettingsFileEdit::new("1stProcessSettingsAllCifs.txt", &[0, 4, 8], &[3, 7, 11], 1),
                SettingsFileEdit::new("2ndProcessSettingsAllCifs.txt", &[0, 4], &[3, 7], 4),
                SettingsFileEdit::new("3rdProcessSettingsAllCifs.txt", &[0, 4], &[3, 7], 6),
                SettingsFileEdit::new("4thProcessSettingsAllCifs.txt", &[0, 4], &[3, 7], 8),
            ],
            reference_cif: "al2o3_73724.cif".to_string(),
            interpreter_scripts: vec![
                "TreeWalker.py".to_string(),
                "TreeWalkerDelEmptyFolders.py".to_string(),
                "TreeWalkerSelector.py".to_string(),
                "Wavelength.py".to_string(),
            ],
            source_encoding_header: "# -*- coding: utf-8 -*-".to_string(),
            launcher_script: Path::new("COD").join("runAllCifs.bat"),
            toolchain_install_script: Path::new("cctbx").join("cctbx_install_script.bat"),
        }
    }
}

/// User choices remembered between invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub download_folder: Option<PathBuf>,
    #[serde(default)]
    pub downloaded_archive: Option<PathBuf>,
    #[serde(default)]
    pub install_path: Option<PathBuf>,
    #[serde(default)]
    pub destination_path: Option<PathBuf>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            version: VERSION.to_string(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            download_folder: None,
            downloaded_archive: None,
            install_path: None,
            destination_path: None,
        }
    }
}

#[derive(Clone)]
pub struct ConfigManager {
    config: InstallerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);

        let mut manager = Self {
            config: InstallerConfig::default(),
            config_path,
        };

        // Try to load existing config
        if manager.config_path.exists() {
            manager.load_config()?;
        }

        Ok(manager)
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn get_config(&self) -> &InstallerConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut InstallerConfig {
        &mut self.config
    }

    pub fn set_download_url(&mut self, url: &str) -> Result<()> {
        if self.config.download_url == url {
            return Ok(());
        }
        self.config.download_url = url.to_string();
        self.save_config()
    }

    pub fn set_download_result(&mut self, folder: PathBuf, archive: PathBuf) -> Result<()> {
        self.config.download_folder = Some(folder);
        self.config.downloaded_archive = Some(archive);
        self.save_config()
    }

    pub fn set_install_path(&mut self, path: PathBuf) -> Result<()> {
        // Avoid redundant saves if path is unchanged
        if self.config.install_path.as_ref() == Some(&path) {
            return Ok(());
        }
        if path.as_os_str().is_empty() {
            return Err(InstallerError::config("install path must not be empty"));
        }
        self.config.install_path = Some(path);
        self.save_config()
    }

    pub fn set_destination_path(&mut self, path: PathBuf) -> Result<()> {
        if self.config.destination_path.as_ref() == Some(&path) {
            return Ok(());
        }
        self.config.destination_path = Some(path);
        self.save_config()
    }

    pub fn get_config_summary(&self) -> String {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "Not set".to_string())
        };

        format!(
            "ALMAZ COD Installer Configuration\n\
             =================================\n\n\
             Config file: {}\n\
             Download URL: {}\n\
             Download folder: {}\n\
             Downloaded archive: {}\n\
             Install path: {}\n\
             Destination path: {}",
            self.config_path.display(),
            self.config.download_url,
            show(&self.config.download_folder),
            show(&self.config.downloaded_archive),
            show(&self.config.install_path),
            show(&self.config.destination_path),
        )
    }

    pub fn save_config(&self) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, json)?;

        debug!("Configuration saved to: {:?}", self.config_path);
        Ok(())
    }

    pub fn load_config(&mut self) -> Result<()> {
        if !self.config_path.exists() {
            info!("No configuration file found, using defaults");
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        self.config = serde_json::from_str(&content)?;

        debug!("Configuration loaded from: {:?}", self.config_path);
        Ok(())
    }
}
