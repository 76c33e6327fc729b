//! Newtype identifiers, wrapping a UUID rather than passing bare `String`s
//! around.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(RawRepositoryId);
uuid_id!(RawBuildRunId);
uuid_id!(RepoConfigId);
uuid_id!(IngestionBuildId);
uuid_id!(TrainingBuildId);
uuid_id!(FeatureAuditLogId);
uuid_id!(CorrelationId);
