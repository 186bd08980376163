use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "LARDER_DATA_DIR";

pub struct Config {
    /// Directory holding the five source CSV files.
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve the data directory: `--data-dir`, then `$LARDER_DATA_DIR`, then
    /// the platform data directory.
    pub fn load(override_dir: Option<&Path>) -> Result<Self> {
        let env_dir = std::env::var_os(DATA_DIR_ENV).map(PathBuf::from);
        let data_dir = match resolve_data_dir(override_dir, env_dir) {
            Some(dir) => dir,
            None => ProjectDirs::from("", "", "larder")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };

        if !data_dir.is_dir() {
            anyhow::bail!(
                "Data directory not found: {} (use --data-dir or set {DATA_DIR_ENV})",
                data_dir.display()
            );
        }
        tracing::debug!(dir = %data_dir.display(), "using data directory");

        Ok(Config { data_dir })
    }
}

fn resolve_data_dir(flag: Option<&Path>, env: Option<PathBuf>) -> Option<PathBuf> {
    flag.map(Path::to_path_buf)
        .or(env.filter(|p| !p.as_os_str().is_empty()))
}
