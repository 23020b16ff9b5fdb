// src/infra/paths.rs - Config and data directory resolution
//
// CLIMATECHAT_HOME overrides everything: config lives directly in it and
// data under `data/`. Otherwise config uses ~/.climatechat/ and data uses
// the platform data dir (XDG_DATA_HOME/climatechat on Linux).

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn climatechat_home() -> Option<PathBuf> {
    std::env::var_os("CLIMATECHAT_HOME").map(PathBuf::from)
}

/// Home directory, or the working directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $CLIMATECHAT_HOME/ or ~/.climatechat/
pub fn config_dir() -> PathBuf {
    if let Some(home) = climatechat_home() {
        return home;
    }
    dirs_home().join(".climatechat")
}

/// Data directory: $CLIMATECHAT_HOME/data/ or the platform data dir
pub fn data_dir() -> PathBuf {
    if let Some(home) = climatechat_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "climatechat")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Saved conversation transcripts
pub fn transcripts_dir() -> PathBuf {
    data_dir().join("transcripts")
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
