//! Repository and CI-provider identity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::RawRepositoryId;

/// The five CI providers this system speaks to, behind one adapter interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiProvider {
    GitHub,
    GitLab,
    Jenkins,
    CircleCi,
    Travis,
}

impl CiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiProvider::GitHub => "github",
            CiProvider::GitLab => "gitlab",
            CiProvider::Jenkins => "jenkins",
            CiProvider::CircleCi => "circleci",
            CiProvider::Travis => "travis",
        }
    }
}

/// Immutable identity of a physical VCS repository. One per repository,
/// never duplicated per `RepoConfig` that imports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRepository {
    pub id: RawRepositoryId,
    /// `owner/repo`, globally unique.
    pub full_name: String,
    /// The CI provider's own identifier for this repository.
    pub provider_repo_id: String,
    pub provider: CiProvider,
    pub default_branch: String,
    pub private: bool,
    pub primary_language: Option<String>,
    /// Byte count per language, as reported by the provider's languages API.
    pub language_bytes: HashMap<String, u64>,
}

impl RawRepository {
    pub fn new(
        full_name: impl Into<String>,
        provider_repo_id: impl Into<String>,
        provider: CiProvider,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            id: RawRepositoryId::new(),
            full_name: full_name.into(),
            provider_repo_id: provider_repo_id.into(),
            provider,
            default_branch: default_branch.into(),
            private: false,
            primary_language: None,
            language_bytes: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_str_roundtrips_distinctly() {
        let all = [
            CiProvider::GitHub,
            CiProvider::GitLab,
            CiProvider::Jenkins,
            CiProvider::CircleCi,
            CiProvider::Travis,
        ];
        let names: std::collections::HashSet<_> = all.iter().map(|p| p.as_str()).collect();
        assert_eq!(names.len(), all.len());
    }
}
