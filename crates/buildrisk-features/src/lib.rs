//! The feature DAG: registry, scheduler, node contract, and extractors
//! (§4.5, §4.6).

pub mod dag;
pub mod error;
pub mod extractors;
pub mod node;
pub mod registry;
pub mod runtime;

pub use dag::{plan_for_features, SelectedPlan};
pub use error::{FeatureError, Result};
pub use node::{ExtractorNode, NodeContext};
pub use registry::{lookup, FeatureDataType, FeatureSpec, ListSeparator, ValidRange, FEATURE_REGISTRY};
pub use runtime::{DagOutcome, FeatureDagRuntime};
