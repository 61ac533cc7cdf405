//! ALMAZ COD installer
//!
//! Downloads the Crystallography Open Database archive, unpacks the
//! processing toolchain next to it and wires the two together.

pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod installer;
pub mod utils;

pub use error::{Result, InstallerError};
