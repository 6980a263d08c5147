//! Forwardfile configuration for k4wd

mod forwardfile;
pub mod serde_utils;

pub use forwardfile::{Forwardfile, DEFAULT_BACKEND_TIMEOUT};

use crate::error::ConfigError;
use std::path::Path;

/// Default Forwardfile name, resolved against the working directory
pub const DEFAULT_FORWARDFILE: &str = "Forwardfile";

/// Load and validate a Forwardfile
pub fn load_config(path: &Path) -> Result<Forwardfile, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Forwardfile::parse(&content, path)
}
