use std::path::PathBuf;

use directories::ProjectDirs;

/// Directory for persistent state (working copies, history database).
///
/// Falls back to `./.autoport` when the platform has no notion of a data dir.
pub fn data_dir() -> PathBuf {
    ProjectDirs::from("dev", "autoport", "autoport")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".autoport"))
}

pub fn default_storage_root() -> PathBuf {
    data_dir().join("repositories")
}

pub fn default_database_path() -> PathBuf {
    data_dir().join("history.sqlite")
}
