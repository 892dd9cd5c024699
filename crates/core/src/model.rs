use crate::time::EpochMs;
use serde::{Deserialize, Serialize};

/// Numeric identifier as assigned by the test-management server.
pub type Id = i64;

/// Separator used when rendering a node path for humans and for stage-mapping keys.
pub const PATH_SEPARATOR: &str = " / ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A project; the root of both trees.
    Project,
    Release,
    Cycle,
    Suite,
    /// A design-tree module.
    Module,
}

/// Structural role of a node, independent of which tree it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Root,
    Container,
    LeafHolder,
}

impl NodeKind {
    pub fn role(self) -> NodeRole {
        match self {
            NodeKind::Project => NodeRole::Root,
            NodeKind::Release | NodeKind::Cycle | NodeKind::Module => NodeRole::Container,
            NodeKind::Suite => NodeRole::LeafHolder,
        }
    }
}

/// A node of either hierarchy.
///
/// `path` always starts at the project and ends with `name`; build children
/// through [`TreeNode::child`] so that no ancestor is ever dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeNode {
    pub kind: NodeKind,
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub path: Vec<String>,
    pub has_children: bool,
    /// Runs in a suite (execution tree) or child modules (design tree), when known.
    pub leaf_count: Option<usize>,
}

impl TreeNode {
    pub fn project(id: Id, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: NodeKind::Project,
            id,
            project_id: id,
            path: vec![name.clone()],
            name,
            has_children: false,
            leaf_count: None,
        }
    }

    pub fn child(&self, kind: NodeKind, id: Id, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut path = self.path.clone();
        path.push(name.clone());
        Self {
            kind,
            id,
            project_id: self.project_id,
            name,
            path,
            has_children: false,
            leaf_count: None,
        }
    }

    pub fn with_leaf_count(mut self, count: usize) -> Self {
        self.leaf_count = Some(count);
        self.has_children = count > 0;
        self
    }

    pub fn root_name(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or(&self.name)
    }

    pub fn display_path(&self) -> String {
        self.path.join(PATH_SEPARATOR)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Approved,
    Other,
}

/// An authored test case read from the design tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceLeaf {
    pub id: Id,
    pub name: String,
    pub approval: ApprovalState,
}

/// Snapshot of a design subtree, built once per mirroring invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MirrorSubtree {
    pub container_id: Id,
    pub container_name: String,
    pub leaves: Vec<SourceLeaf>,
    pub children: Vec<MirrorSubtree>,
}

impl MirrorSubtree {
    pub fn new(container_id: Id, container_name: impl Into<String>) -> Self {
        Self {
            container_id,
            container_name: container_name.into(),
            leaves: vec![],
            children: vec![],
        }
    }

    /// Direct plus descendant leaves.
    pub fn total_leaves(&self) -> usize {
        self.leaves.len() + self.children.iter().map(MirrorSubtree::total_leaves).sum::<usize>()
    }

    pub fn total_containers(&self) -> usize {
        1 + self.children.iter().map(MirrorSubtree::total_containers).sum::<usize>()
    }
}

/// One destination run produced while mirroring; appended once per source leaf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedLeaf {
    pub destination_id: Option<Id>,
    pub name: String,
    pub source_leaf_id: Id,
    pub container_name: String,
    pub test_case_version_id: Option<Id>,
    pub created: bool,
    pub failure_reason: Option<String>,
}

impl CreatedLeaf {
    pub fn created(
        leaf: &SourceLeaf,
        container_name: &str,
        destination_id: Id,
        test_case_version_id: Option<Id>,
    ) -> Self {
        Self {
            destination_id: Some(destination_id),
            name: leaf.name.clone(),
            source_leaf_id: leaf.id,
            container_name: container_name.to_string(),
            test_case_version_id,
            created: true,
            failure_reason: None,
        }
    }

    pub fn failed(leaf: &SourceLeaf, container_name: &str, reason: impl Into<String>) -> Self {
        Self {
            destination_id: None,
            name: leaf.name.clone(),
            source_leaf_id: leaf.id,
            container_name: container_name.to_string(),
            test_case_version_id: None,
            created: false,
            failure_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub name: String,
    pub external_id: String,
    pub start: EpochMs,
    pub end: EpochMs,
    pub status: EventStatus,
}

/// All events of one logical stage for one project, as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageBundle {
    pub test_stage: String,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<String>,
    pub clock_drift_ms: i64,
    pub events: Vec<NormalizedEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub test_stage: String,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<String>,
    pub event_count: usize,
}

/// Run-level roll-up written next to the per-stage bundles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub extracted_at: String,
    pub total_test_stages: usize,
    pub total_events: usize,
    pub test_stages: Vec<BundleSummary>,
}

impl ExportSummary {
    pub fn from_bundles(extracted_at: String, bundles: &[StageBundle]) -> Self {
        Self {
            extracted_at,
            total_test_stages: bundles.len(),
            total_events: bundles.iter().map(|b| b.events.len()).sum(),
            test_stages: bundles
                .iter()
                .map(|b| BundleSummary {
                    test_stage: b.test_stage.clone(),
                    project_name: b.project_name.clone(),
                    lab_id: b.lab_id.clone(),
                    event_count: b.events.len(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RecommendationStatus {
    NotReady,
    NoHistory,
    Ready,
    Error,
    WontBeReady,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationMetadata {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub build_name: String,
    pub test_stage: String,
    #[serde(default)]
    pub test_group_id: String,
    #[serde(default)]
    pub test_selection_enabled: bool,
    #[serde(default)]
    pub is_full_run: bool,
    pub status: RecommendationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_run_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedTest {
    pub test_name: String,
}

/// What the recommendation source returns for one stage of one build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResponse {
    pub metadata: RecommendationMetadata,
    #[serde(default)]
    pub excluded_tests: Vec<ExcludedTest>,
}

/// A selectable value of the test-run status field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStatus {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub test_run_id: Id,
    pub test_name: String,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub total_recommendations: usize,
    pub successfully_applied: usize,
    pub failed: usize,
}

impl ApplySummary {
    pub fn from_results(results: &[ApplyResult]) -> Self {
        let applied = results.iter().filter(|r| r.applied).count();
        Self {
            total_recommendations: results.len(),
            successfully_applied: applied,
            failed: results.len() - applied,
        }
    }
}

/// Record of one `recommend` run, saved for later review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRecord {
    pub timestamp: String,
    pub project: String,
    pub project_id: Id,
    pub test_stage: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_id: Option<String>,
    pub path: String,
    pub skip_status: String,
    pub sealights_metadata: RecommendationMetadata,
    pub recommendations: Vec<ApplyResult>,
    pub summary: ApplySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_extends_parent_path() {
        let project = TreeNode::project(7, "Shop");
        let cycle = project.child(NodeKind::Cycle, 10, "Release 1");
        let suite = cycle.child(NodeKind::Suite, 11, "Login");
        assert_eq!(suite.path, vec!["Shop", "Release 1", "Login"]);
        assert_eq!(suite.path.last().map(String::as_str), Some("Login"));
        assert_eq!(suite.project_id, 7);
        assert_eq!(suite.root_name(), "Shop");
        assert_eq!(suite.display_path(), "Shop / Release 1 / Login");
    }

    #[test]
    fn leaf_count_drives_has_children() {
        let project = TreeNode::project(1, "P");
        let empty = project.child(NodeKind::Suite, 2, "Empty").with_leaf_count(0);
        let full = project.child(NodeKind::Suite, 3, "Full").with_leaf_count(4);
        assert!(!empty.has_children);
        assert!(full.has_children);
        assert_eq!(full.leaf_count, Some(4));
    }

    #[test]
    fn subtree_counts_are_recursive() {
        let leaf = |id: Id| SourceLeaf {
            id,
            name: format!("T{id}"),
            approval: ApprovalState::Approved,
        };
        let mut root = MirrorSubtree::new(1, "Login");
        root.leaves = vec![leaf(1), leaf(2)];
        let mut edge = MirrorSubtree::new(2, "Edge");
        edge.leaves = vec![leaf(3)];
        edge.children.push(MirrorSubtree::new(3, "Empty"));
        root.children.push(edge);
        assert_eq!(root.total_leaves(), 3);
        assert_eq!(root.total_containers(), 3);
    }

    #[test]
    fn bundle_serializes_with_camel_case_keys() {
        let bundle = StageBundle {
            test_stage: "Regression".into(),
            project_name: "Shop".into(),
            lab_id: None,
            clock_drift_ms: 12,
            events: vec![NormalizedEvent {
                name: "T1".into(),
                external_id: "TC-1".into(),
                start: 1,
                end: 2,
                status: EventStatus::Passed,
            }],
        };
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["testStage"], "Regression");
        assert_eq!(json["clockDriftMs"], 12);
        assert_eq!(json["events"][0]["externalId"], "TC-1");
        assert_eq!(json["events"][0]["status"], "passed");
        assert!(json.get("labId").is_none());
    }
}
