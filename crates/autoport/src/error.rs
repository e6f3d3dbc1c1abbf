use git::IdentifierError;
use services::services::{
    config::ConfigError, conflicts::RoundError, forge::ForgeError, history::HistoryError,
    project::ProjectError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("No GitHub token. Pass --token or set GITHUB_TOKEN.")]
    MissingToken,

    #[error("Invalid change or repository: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open the history database: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Conflict round rejected the decision: {0}")]
    Round(#[from] RoundError),

    #[error("Port failed: {0}")]
    PortFailed(String),
}
