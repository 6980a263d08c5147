//! Env file status sink
//!
//! Publishes the local address of every active forward so other shells can pick
//! them up with `k4wd -e`. The file lives in the system temp directory and is
//! keyed by the absolute Forwardfile path, so several Forwardfiles can run side
//! by side.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use crate::error::SinkError;
use crate::traits::StatusSink;
use crate::types::StatusEntry;

const FILE_PREFIX: &str = "k4wd_env_";
const VAR_SUFFIX: &str = "ADDR";

/// Rendering of the published addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvFormat {
    /// `export NAME_ADDR=host:port`
    #[default]
    Export,
    /// `NAME_ADDR=host:port`
    NoExport,
    /// Raw JSON document
    Json,
    /// `$Env:NAME_ADDR="host:port"`
    PowerShell,
    /// `set NAME_ADDR=host:port`
    Cmd,
}

impl FromStr for EnvFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env" => Ok(EnvFormat::Export),
            "no-export" => Ok(EnvFormat::NoExport),
            "json" => Ok(EnvFormat::Json),
            "ps" => Ok(EnvFormat::PowerShell),
            "cmd" => Ok(EnvFormat::Cmd),
            other => Err(format!(
                "unknown format '{}' (expected env, no-export, json, ps or cmd)",
                other
            )),
        }
    }
}

impl fmt::Display for EnvFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvFormat::Export => "env",
            EnvFormat::NoExport => "no-export",
            EnvFormat::Json => "json",
            EnvFormat::PowerShell => "ps",
            EnvFormat::Cmd => "cmd",
        };
        f.write_str(s)
    }
}

/// One published variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub addr: String,
    pub value: String,
}

impl EnvEntry {
    fn from_status(entry: &StatusEntry) -> Self {
        Self {
            addr: variable_name(&entry.name),
            value: entry.address(),
        }
    }

    fn render(&self, format: EnvFormat) -> String {
        match format {
            EnvFormat::Export => format!("export {}={}\n", self.addr, self.value),
            EnvFormat::NoExport => format!("{}={}\n", self.addr, self.value),
            EnvFormat::PowerShell => format!("$Env:{}=\"{}\"\n", self.addr, self.value),
            EnvFormat::Cmd => format!("set {}={}\n", self.addr, self.value),
            EnvFormat::Json => unreachable!("json is served from the raw file"),
        }
    }
}

/// `my-db.primary` becomes `MY_DB_PRIMARY_ADDR`
pub fn variable_name(forward: &str) -> String {
    let base: String = forward
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}", base, VAR_SUFFIX)
}

/// File-backed status sink
#[derive(Debug)]
pub struct Envfile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Envfile {
    /// Env file for the given Forwardfile, in the system temp directory
    pub fn new(forwardfile: &Path) -> io::Result<Self> {
        Self::in_dir(forwardfile, &std::env::temp_dir())
    }

    /// Env file for the given Forwardfile, in `dir`
    pub fn in_dir(forwardfile: &Path, dir: &Path) -> io::Result<Self> {
        let abs = if forwardfile.is_absolute() {
            forwardfile.to_path_buf()
        } else {
            std::env::current_dir()?.join(forwardfile)
        };
        let digest = Sha256::digest(abs.to_string_lossy().as_bytes());
        Ok(Self {
            path: dir.join(format!("{}{}", FILE_PREFIX, hex::encode(digest))),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the published addresses
    pub fn load(&self, format: EnvFormat) -> Result<String, SinkError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SinkError::Unavailable(self.path.clone()))
            }
            Err(source) => {
                return Err(SinkError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if format == EnvFormat::Json {
            return Ok(data);
        }

        let entries: Vec<EnvEntry> = serde_json::from_str(&data)?;
        Ok(entries.iter().map(|e| e.render(format)).collect())
    }

    fn io_error(&self, source: io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StatusSink for Envfile {
    fn update(&self, entries: &[StatusEntry]) -> Result<(), SinkError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let published: Vec<EnvEntry> = entries
            .iter()
            .filter(|e| e.active)
            .map(EnvEntry::from_status)
            .collect();
        let data = serde_json::to_string_pretty(&published)?;

        // Write then rename so readers never observe a partial file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn remove(&self) -> Result<(), SinkError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
