use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utils::text::slugify;

pub const DEFAULT_WEB_BASE: &str = "https://github.com/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("invalid repository identifier: {0}")]
    InvalidRepository(String),
    #[error("invalid pull request identifier: {0}")]
    InvalidChange(String),
}

/// `org/name` of a hosted repository, lowercased on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RepositoryIdentifier {
    org: String,
    name: String,
}

impl RepositoryIdentifier {
    pub fn new(org: &str, name: &str) -> Result<Self, IdentifierError> {
        let org = org.trim().to_lowercase();
        let name = name.trim().trim_end_matches(".git").to_lowercase();
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(&org) || !valid(&name) {
            return Err(IdentifierError::InvalidRepository(format!("{org}/{name}")));
        }
        Ok(Self { org, name })
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remote name and on-disk directory name, e.g. `org-name`.
    pub fn slug(&self) -> String {
        slugify(&self.to_string())
    }

    pub fn url(&self) -> String {
        self.url_with_base(DEFAULT_WEB_BASE)
    }

    pub fn url_with_base(&self, base: &str) -> String {
        format!("{}/{}/{}", base.trim_end_matches('/'), self.org, self.name)
    }

    /// Parse `https://host/org/name[/anything]`.
    pub fn from_url(raw: &str) -> Result<Self, IdentifierError> {
        let invalid = || IdentifierError::InvalidRepository(raw.to_string());
        let parsed = Url::parse(raw.trim()).map_err(|_| invalid())?;
        let mut segments = parsed
            .path_segments()
            .ok_or_else(invalid)?
            .filter(|s| !s.is_empty());
        let (Some(org), Some(name)) = (segments.next(), segments.next()) else {
            return Err(invalid());
        };
        Self::new(org, name)
    }
}

impl fmt::Display for RepositoryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

impl FromStr for RepositoryIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains("://") {
            return Self::from_url(s);
        }
        match s.split_once('/') {
            Some((org, name)) if !name.contains('/') => Self::new(org, name),
            _ => Err(IdentifierError::InvalidRepository(s.to_string())),
        }
    }
}

impl From<RepositoryIdentifier> for String {
    fn from(id: RepositoryIdentifier) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RepositoryIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A pull request: repository plus number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChangeIdentifier {
    repository: RepositoryIdentifier,
    number: u64,
}

impl ChangeIdentifier {
    pub fn new(repository: RepositoryIdentifier, number: u64) -> Self {
        Self { repository, number }
    }

    pub fn repository(&self) -> &RepositoryIdentifier {
        &self.repository
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn url(&self) -> String {
        format!("{}/pull/{}", self.repository.url(), self.number)
    }

    pub fn branch_slug(&self) -> String {
        slugify(&format!(
            "port-{}-{}-{}",
            self.repository.org, self.repository.name, self.number
        ))
    }

    /// Parse `https://host/org/name/pull/N`.
    pub fn from_url(raw: &str) -> Result<Self, IdentifierError> {
        let invalid = || IdentifierError::InvalidChange(raw.to_string());
        let parsed = Url::parse(raw.trim()).map_err(|_| invalid())?;
        let segments: Vec<&str> = parsed
            .path_segments()
            .ok_or_else(invalid)?
            .filter(|s| !s.is_empty())
            .collect();
        match segments.as_slice() {
            [org, name, "pull" | "pulls", number, ..] => {
                let number = number.parse().map_err(|_| invalid())?;
                Ok(Self::new(RepositoryIdentifier::new(org, name)?, number))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ChangeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repository, self.number)
    }
}

impl FromStr for ChangeIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains("://") {
            return Self::from_url(s);
        }
        let (repo, number) = s
            .split_once('#')
            .ok_or_else(|| IdentifierError::InvalidChange(s.to_string()))?;
        let number = number
            .parse()
            .map_err(|_| IdentifierError::InvalidChange(s.to_string()))?;
        Ok(Self::new(repo.parse()?, number))
    }
}

impl From<ChangeIdentifier> for String {
    fn from(id: ChangeIdentifier) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ChangeIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_equality_ignores_case() {
        let a = RepositoryIdentifier::new("TeamStarcup", "Starcup").unwrap();
        let b = RepositoryIdentifier::new("teamstarcup", "STARCUP").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "teamstarcup/starcup");
    }

    #[test]
    fn repository_derives_slug_and_url() {
        let id: RepositoryIdentifier = "space-wizards/space-station-14".parse().unwrap();
        assert_eq!(id.slug(), "space-wizards-space-station-14");
        assert_eq!(
            id.url(),
            "https://github.com/space-wizards/space-station-14"
        );
        assert_eq!(id.url_with_base("/tmp/forge"), "/tmp/forge/space-wizards/space-station-14");
    }

    #[test]
    fn repository_parses_urls() {
        let id = RepositoryIdentifier::from_url("https://github.com/Org/Repo.git").unwrap();
        assert_eq!(id.to_string(), "org/repo");
        let id: RepositoryIdentifier = "https://github.com/org/repo/tree/main".parse().unwrap();
        assert_eq!(id.to_string(), "org/repo");
        assert!(RepositoryIdentifier::from_url("https://github.com/org").is_err());
        assert!("just-a-name".parse::<RepositoryIdentifier>().is_err());
        assert!("a/b/c".parse::<RepositoryIdentifier>().is_err());
    }

    #[test]
    fn change_parses_both_forms() {
        let from_url = ChangeIdentifier::from_url("https://github.com/Org/Repo/pull/123/files").unwrap();
        let from_short: ChangeIdentifier = "org/repo#123".parse().unwrap();
        assert_eq!(from_url, from_short);
        assert_eq!(from_url.number(), 123);
        assert_eq!(from_url.to_string(), "org/repo#123");
        assert_eq!(from_url.url(), "https://github.com/org/repo/pull/123");
        assert!(ChangeIdentifier::from_url("https://github.com/org/repo/issues/1").is_err());
        assert!("org/repo#abc".parse::<ChangeIdentifier>().is_err());
    }

    #[test]
    fn change_branch_slug_is_deterministic() {
        let id: ChangeIdentifier = "Space-Wizards/RobustToolbox#42".parse().unwrap();
        assert_eq!(id.branch_slug(), "port-space-wizards-robusttoolbox-42");
    }

    #[test]
    fn identifiers_serialize_as_strings() {
        let id: ChangeIdentifier = "org/repo#7".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"org/repo#7\"");
        let back: ChangeIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
