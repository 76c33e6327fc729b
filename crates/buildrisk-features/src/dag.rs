//! Topological scheduling over extractor nodes, generalized from a
//! repo-dependency Kahn's-algorithm-with-levels planner to feature-extractor
//! nodes (§4.5 step 3: "group into levels ... run one level at a time").

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use buildrisk_domain::ResourceKind;

use crate::error::{FeatureError, Result};
use crate::node::ExtractorNode;
use crate::registry::{lookup, FEATURE_REGISTRY};

pub struct SelectedPlan {
    /// Nodes grouped by level; nodes within a level have no dependency on
    /// each other and may run concurrently.
    pub levels: Vec<Vec<Arc<dyn ExtractorNode>>>,
    pub required_resources: HashSet<ResourceKind>,
}

/// From a requested feature set, compute (a) the producing nodes, (b) the
/// transitive closure over feature dependencies' producing nodes, then
/// topologically order those nodes into levels.
pub fn plan_for_features(
    requested_features: &[String],
    available_nodes: &[Arc<dyn ExtractorNode>],
) -> Result<SelectedPlan> {
    let nodes_by_name: HashMap<&str, Arc<dyn ExtractorNode>> = available_nodes
        .iter()
        .map(|n| (n.name(), n.clone()))
        .collect();

    let mut selected_features: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = requested_features.iter().cloned().collect();

    while let Some(feature) = queue.pop_front() {
        if !selected_features.insert(feature.clone()) {
            continue;
        }
        let spec = lookup(&feature).ok_or_else(|| FeatureError::UnknownFeature(feature.clone()))?;
        for dep in spec.feature_deps {
            queue.push_back(dep.to_string());
        }
    }

    let mut selected_node_names: HashSet<&'static str> = HashSet::new();
    for feature in &selected_features {
        if let Some(spec) = lookup(feature) {
            selected_node_names.insert(spec.producing_node);
        }
    }

    let mut selected_nodes: Vec<Arc<dyn ExtractorNode>> = selected_node_names
        .iter()
        .filter_map(|name| nodes_by_name.get(name).cloned())
        .collect();
    selected_nodes.sort_by_key(|n| n.name());

    let required_resources: HashSet<ResourceKind> = selected_nodes
        .iter()
        .flat_map(|n| n.requires_resources().iter().copied())
        .collect();

    let levels = topological_levels(&selected_nodes)?;

    Ok(SelectedPlan {
        levels,
        required_resources,
    })
}

fn topological_levels(nodes: &[Arc<dyn ExtractorNode>]) -> Result<Vec<Vec<Arc<dyn ExtractorNode>>>> {
    let by_name: HashMap<&str, Arc<dyn ExtractorNode>> =
        nodes.iter().map(|n| (n.name(), n.clone())).collect();

    // Edge: node A's declared feature-dependency resolves to node B's
    // producing_node → B must run before A.
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.name(), 0)).collect();
    let mut downstream: HashMap<&str, Vec<&str>> = nodes.iter().map(|n| (n.name(), vec![])).collect();

    for node in nodes {
        let mut upstream_nodes: HashSet<&str> = HashSet::new();
        for feature_dep in node.requires_features() {
            if let Some(spec) = FEATURE_REGISTRY.get(feature_dep) {
                if by_name.contains_key(spec.producing_node) && spec.producing_node != node.name() {
                    upstream_nodes.insert(spec.producing_node);
                }
            }
        }
        for upstream in upstream_nodes {
            downstream.get_mut(upstream).unwrap().push(node.name());
            *in_degree.get_mut(node.name()).unwrap() += 1;
        }
    }

    let mut queue: VecDeque<(&str, usize)> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| (name, 0usize))
        .collect();

    let mut by_level: HashMap<usize, Vec<&str>> = HashMap::new();
    let mut visited = 0usize;

    while let Some((name, level)) = queue.pop_front() {
        by_level.entry(level).or_default().push(name);
        visited += 1;
        for &next in &downstream[name] {
            let deg = in_degree.get_mut(next).unwrap();
            *deg -= 1;
            if *deg == 0 {
                queue.push_back((next, level + 1));
            }
        }
    }

    if visited != nodes.len() {
        let remaining: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        return Err(FeatureError::DependencyCycle(remaining));
    }

    let max_level = by_level.keys().copied().max().unwrap_or(0);
    let mut levels = Vec::with_capacity(max_level + 1);
    for level in 0..=max_level {
        let mut names = by_level.remove(&level).unwrap_or_default();
        names.sort_unstable();
        levels.push(names.into_iter().map(|n| by_name[n].clone()).collect());
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use buildrisk_domain::FeatureMap;

    struct StubNode {
        name: &'static str,
        produces: &'static [&'static str],
        requires_features: &'static [&'static str],
    }

    #[async_trait]
    impl ExtractorNode for StubNode {
        fn name(&self) -> &'static str {
            self.name
        }
        fn features_produced(&self) -> &'static [&'static str] {
            self.produces
        }
        fn requires_resources(&self) -> &'static [ResourceKind] {
            &[]
        }
        fn requires_features(&self) -> &'static [&'static str] {
            self.requires_features
        }
        async fn execute(&self, _ctx: &crate::node::NodeContext) -> anyhow::Result<FeatureMap> {
            Ok(FeatureMap::new())
        }
    }

    #[test]
    fn diff_features_run_after_commit_info_due_to_feature_dependency() {
        let commit_info: Arc<dyn ExtractorNode> = Arc::new(StubNode {
            name: "git_commit_info",
            produces: &["git_prev_built_commit"],
            requires_features: &[],
        });
        let diff: Arc<dyn ExtractorNode> = Arc::new(StubNode {
            name: "git_diff_features",
            produces: &["gh_diff_src_churn"],
            requires_features: &["git_prev_built_commit"],
        });

        let plan = plan_for_features(
            &["gh_diff_src_churn".to_string()],
            &[commit_info.clone(), diff.clone()],
        )
        .unwrap();

        assert_eq!(plan.levels.len(), 2);
        assert_eq!(plan.levels[0][0].name(), "git_commit_info");
        assert_eq!(plan.levels[1][0].name(), "git_diff_features");
    }

    #[test]
    fn unknown_requested_feature_is_an_error() {
        let err = plan_for_features(&["not_a_real_feature".to_string()], &[]).unwrap_err();
        assert!(matches!(err, FeatureError::UnknownFeature(_)));
    }
}
