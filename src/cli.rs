//! Command-line interface for the ALMAZ COD installer

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "almaz-installer")]
#[command(about = "ALMAZ COD installer - downloads and sets up the COD processing toolchain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Use this configuration file instead of the default one
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the COD archive (alias: dl)
    #[command(alias = "dl")]
    Download {
        /// Archive URL; the last saved URL is used when omitted
        #[arg(long)]
        url: Option<String>,
        /// Target folder; the last saved folder is used when omitted
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Do not send a HEAD request before downloading
        #[arg(long)]
        skip_check: bool,
    },

    /// Unpack the downloaded COD archive
    Unzip {
        /// Archive to unpack; defaults to the last download
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Destination folder; defaults to the archive's folder
        #[arg(long)]
        destination: Option<PathBuf>,
    },

    /// Unpack the application archive into its own folder
    ExtractApp {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        destination: PathBuf,
    },

    /// Run the full installation (alias: i)
    #[command(alias = "i")]
    Install {
        /// Folder holding COD.ZIP, cifStandart4RIR.zip and cctbx_Fixed.zip
        #[arg(long)]
        root: Option<PathBuf>,
        /// Folder with COD/, cctbx/ and cifStandart4RIR/; defaults to root
        #[arg(long)]
        destination: Option<PathBuf>,
    },

    /// Show the saved configuration
    ShowConfig,

    /// Show version
    Version,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
