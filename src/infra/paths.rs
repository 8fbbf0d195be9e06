// src/infra/paths.rs — XDG-compliant path management
//
// All paths respect the HOMEMINER_HOME environment variable for isolation.
// When HOMEMINER_HOME is set, config and data live under that directory.
// When unset, config uses ~/.homeminer/ and data uses XDG_DATA_HOME/homeminer.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use std::sync::OnceLock;

static PROJECT_DIRS: OnceLock<Option<ProjectDirs>> = OnceLock::new();

fn project_dirs() -> Option<&'static ProjectDirs> {
    PROJECT_DIRS
        .get_or_init(|| ProjectDirs::from("", "", "homeminer"))
        .as_ref()
}

/// Returns the HOMEMINER_HOME override, if set.
fn homeminer_home() -> Option<PathBuf> {
    std::env::var_os("HOMEMINER_HOME").map(PathBuf::from)
}

/// Home directory, or the working directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $HOMEMINER_HOME/ or ~/.homeminer/
pub fn config_dir() -> PathBuf {
    if let Some(home) = homeminer_home() {
        return home;
    }
    dirs_home().join(".homeminer")
}

/// Data directory: $HOMEMINER_HOME/data/ or ~/.local/share/homeminer/
pub fn data_dir() -> PathBuf {
    if let Some(home) = homeminer_home() {
        return home.join("data");
    }
    match project_dirs() {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

/// Database path
pub fn db_path() -> PathBuf {
    data_dir().join("homeminer.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure all required directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir()] {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}
