// src/infra/paths.rs — Config and data locations
//
// PROMPTKOI_HOME overrides everything. Otherwise config lives in
// ~/.promptkoi/ and data under XDG_DATA_HOME/promptkoi.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn promptkoi_home() -> Option<PathBuf> {
    std::env::var_os("PROMPTKOI_HOME").map(PathBuf::from)
}

/// Configuration directory: $PROMPTKOI_HOME/ or ~/.promptkoi/
pub fn config_dir() -> PathBuf {
    if let Some(home) = promptkoi_home() {
        return home;
    }
    BaseDirs::new()
        .map(|b| b.home_dir().join(".promptkoi"))
        .unwrap_or_else(|| PathBuf::from(".promptkoi"))
}

/// Data directory: $PROMPTKOI_HOME/data/ or the platform data dir.
pub fn data_dir() -> PathBuf {
    if let Some(home) = promptkoi_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "promptkoi")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn db_path() -> PathBuf {
    data_dir().join("tasks.db")
}

/// Create the data directory if needed.
pub fn ensure_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir())
}
