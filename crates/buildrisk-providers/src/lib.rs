//! CI provider adapters behind a single uniform interface (§4.1).

pub mod adapter;
pub mod circleci;
pub mod error;
pub mod github;
pub mod gitlab;
pub mod jenkins;
pub mod models;
pub mod normalize;
pub mod registry;
pub mod travis;

pub use adapter::CiProviderAdapter;
pub use circleci::CircleCiAdapter;
pub use error::{ProviderError, Result};
pub use github::GitHubAdapter;
pub use gitlab::GitLabAdapter;
pub use jenkins::JenkinsAdapter;
pub use models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};
pub use registry::ProviderRegistry;
pub use travis::TravisAdapter;
