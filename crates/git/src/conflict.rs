use serde::{Deserialize, Serialize};

use crate::{LocalRepository, RepositoryError};

/// Which side of a conflicted path to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Ours,
    Theirs,
}

impl Side {
    pub fn flag(self) -> &'static str {
        match self {
            Side::Ours => "--ours",
            Side::Theirs => "--theirs",
        }
    }
}

/// Decision for one conflicted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Resolution {
    Unselected,
    Ours,
    Theirs,
    /// Replace the file with operator supplied text.
    Manual(String),
    /// Stage the file as it stands, markers included, to fix up later.
    Deferred,
}

impl Resolution {
    pub fn is_decided(&self) -> bool {
        !matches!(self, Resolution::Unselected)
    }
}

/// One unmerged path as seen at the time the conflict was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    path: String,
    content: Option<String>,
    diff: String,
    resolution: Resolution,
}

impl MergeConflict {
    pub fn new(path: impl Into<String>, content: Option<String>, diff: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content,
            diff: diff.into(),
            resolution: Resolution::Unselected,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Working tree content at detection time; `None` for binary or deleted files.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn diff(&self) -> &str {
        &self.diff
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn proposed_content(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Manual(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.resolution.is_decided()
    }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    pub fn take_ours(&mut self) {
        self.resolution = Resolution::Ours;
    }

    pub fn take_theirs(&mut self) {
        self.resolution = Resolution::Theirs;
    }

    pub fn take_manual(&mut self, text: impl Into<String>) {
        self.resolution = Resolution::Manual(text.into());
    }

    pub fn defer(&mut self) {
        self.resolution = Resolution::Deferred;
    }

    /// Write the decision into the working tree and stage the path.
    pub async fn resolve(&self, repo: &LocalRepository) -> Result<(), RepositoryError> {
        match &self.resolution {
            Resolution::Unselected => return Err(RepositoryError::Unresolved(self.path.clone())),
            Resolution::Ours => repo.checkout_side(Side::Ours, &self.path).await?,
            Resolution::Theirs => repo.checkout_side(Side::Theirs, &self.path).await?,
            Resolution::Manual(text) => repo.write_worktree_file(&self.path, text).await?,
            Resolution::Deferred => {}
        }
        repo.add_path(&self.path).await
    }
}
