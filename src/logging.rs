use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "DRIVE_GALLERY_LOG";
pub const FILE_ENV: &str = "DRIVE_GALLERY_LOG_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Headless runs own stderr.
    Stderr,
    /// The TUI owns the terminal; logs go to `DRIVE_GALLERY_LOG_FILE` or nowhere.
    FileFromEnv,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(target: Target) -> Result<()> {
    match target {
        Target::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow!("logging: {err}")),
        Target::FileFromEnv => {
            let Some(path) = env::var_os(FILE_ENV).map(PathBuf::from) else {
                return Ok(());
            };
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("logging: open {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|err| anyhow!("logging: {err}"))
        }
    }
}
