use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use git::{DEFAULT_WEB_BASE, IdentifierError, RepositoryIdentifier};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils::assets::{default_database_path, default_storage_root};

use super::forge::GITHUB_API_BASE;

pub const DEFAULT_UPSTREAM_MERGE_MARKER: &str = "Resources/Changelog/Changelog.yml";

/// Files touched by so many changes that they connect everything to everything.
pub const DEFAULT_HIGH_CHURN_PATHS: &[&str] = &[
    "Resources/Prototypes/Entities/Structures/Machines/lathe.yml",
    "Resources/Prototypes/tags.yml",
    "Resources/Prototypes/Loadouts/loadout_groups.yml",
    "Resources/Prototypes/Entities/Mobs/NPCs/animals.yml",
    "Resources/Prototypes/Entities/Objects/Fun/toys.yml",
    "Resources/Prototypes/Loadouts/Miscellaneous/trinkets.yml",
    "Resources/Prototypes/_Impstation/Loadouts/Miscellaneous/trinkets.yml",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {0} repository configured")]
    MissingRepository(&'static str),
    #[error(transparent)]
    InvalidRepository(#[from] IdentifierError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub max_message_length: usize,
    pub min_flush_interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
            min_flush_interval_ms: 1000,
        }
    }
}

impl StatusConfig {
    pub fn min_flush_interval(&self) -> Duration {
        Duration::from_millis(self.min_flush_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Changes touching this path are upstream merges and never count as
    /// ancestors or descendants.
    pub upstream_merge_marker_path: String,
    pub high_churn_paths: Vec<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            upstream_merge_marker_path: DEFAULT_UPSTREAM_MERGE_MARKER.to_string(),
            high_churn_paths: DEFAULT_HIGH_CHURN_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PorterConfig {
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    /// Fork that receives the port pull requests, `org/name`.
    pub home_repository: Option<String>,
    /// Fork the porting branches are pushed to, `org/name`.
    pub work_repository: Option<String>,
    pub committer_name: String,
    pub committer_email: String,
    pub forge_api_base: String,
    pub forge_web_base: String,
    pub external_diff_tool: Option<String>,
    pub conflict_round_timeout_secs: u64,
    pub status: StatusConfig,
    pub history: HistoryConfig,
}

impl Default for PorterConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            database_path: default_database_path(),
            home_repository: None,
            work_repository: None,
            committer_name: "autoport".to_string(),
            committer_email: "autoport@users.noreply.github.com".to_string(),
            forge_api_base: GITHUB_API_BASE.to_string(),
            forge_web_base: DEFAULT_WEB_BASE.to_string(),
            external_diff_tool: None,
            conflict_round_timeout_secs: 15 * 60,
            status: StatusConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl PorterConfig {
    /// `~/.config/autoport/config.toml` on Linux.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autoport").join("config.toml"))
    }

    /// Load config from disk, returning defaults if it is missing or unreadable.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "Ignoring invalid config file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn home_repository_id(&self) -> Result<RepositoryIdentifier, ConfigError> {
        Self::parse_repository(self.home_repository.as_deref(), "home")
    }

    pub fn work_repository_id(&self) -> Result<RepositoryIdentifier, ConfigError> {
        Self::parse_repository(self.work_repository.as_deref(), "work")
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.conflict_round_timeout_secs)
    }

    fn parse_repository(
        raw: Option<&str>,
        role: &'static str,
    ) -> Result<RepositoryIdentifier, ConfigError> {
        let raw = raw.ok_or(ConfigError::MissingRepository(role))?;
        Ok(raw.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PorterConfig::load_from(&dir.path().join("absent.toml"));
        assert_eq!(config, PorterConfig::default());
        assert_eq!(config.status.max_message_length, 2000);
        assert_eq!(config.round_timeout(), Duration::from_secs(900));
        assert_eq!(config.history.high_churn_paths.len(), 7);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "home_repository = \"TeamStarcup/Starcup\"\n\n[status]\nmin_flush_interval_ms = 250\n",
        )
        .unwrap();

        let config = PorterConfig::load_from(&path);
        assert_eq!(
            config.home_repository_id().unwrap().to_string(),
            "teamstarcup/starcup"
        );
        assert_eq!(config.status.min_flush_interval(), Duration::from_millis(250));
        assert_eq!(config.status.max_message_length, 2000);
        assert!(matches!(
            config.work_repository_id(),
            Err(ConfigError::MissingRepository("work"))
        ));
    }

    #[test]
    fn invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "status = 12").unwrap();
        assert_eq!(PorterConfig::load_from(&path), PorterConfig::default());
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = PorterConfig {
            work_repository: Some("porter/starcup".into()),
            external_diff_tool: Some("difft".into()),
            ..PorterConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(PorterConfig::load_from(&path), config);
    }
}
