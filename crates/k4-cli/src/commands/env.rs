//! Env command implementation

use std::path::Path;

use anyhow::{Context, Result};

use k4_core::envfile::{EnvFormat, Envfile};

/// Print the addresses published by the k4wd instance running `forwardfile`
pub fn env_command(forwardfile: &Path, format: EnvFormat) -> Result<()> {
    let envfile = Envfile::new(forwardfile).context("Failed to locate env file")?;
    let content = envfile.load(format)?;
    print!("{}", content);
    Ok(())
}
