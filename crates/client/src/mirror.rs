//! Recreate a design subtree as cycles, suites and runs in the execution tree.
//!
//! Per node, in order: a cycle when the node has child modules, a suite when
//! it has test cases (inside that cycle, or the anchor if the cycle could not
//! be made), one run per test case, then the children under the new cycle.
//! Failures are recorded and traversal continues; every source leaf yields
//! exactly one [`CreatedLeaf`].

use crate::api::{parent_params, project_path, CreatedRow, ParentType};
use crate::error_log::{ErrorEntry, ErrorSink, Failure};
use crate::hierarchy::BoxFuture;
use crate::transport::{Transport, TransportError};
use qbridge_core::{CreatedLeaf, Id, MirrorSubtree, NodeKind, SourceLeaf, TreeNode};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorKind {
    /// The project itself.
    Root,
    Release,
    Cycle,
    Suite,
}

/// Where a mirrored subtree is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub kind: AnchorKind,
    pub id: Id,
}

impl Anchor {
    pub fn root() -> Self {
        Self {
            kind: AnchorKind::Root,
            id: 0,
        }
    }

    pub fn new(kind: AnchorKind, id: Id) -> Self {
        match kind {
            AnchorKind::Root => Self::root(),
            _ => Self { kind, id },
        }
    }

    /// Anchor for an execution-tree node; modules cannot hold runs.
    pub fn for_node(node: &TreeNode) -> Option<Self> {
        let kind = match node.kind {
            NodeKind::Project => AnchorKind::Root,
            NodeKind::Release => AnchorKind::Release,
            NodeKind::Cycle => AnchorKind::Cycle,
            NodeKind::Suite => AnchorKind::Suite,
            NodeKind::Module => return None,
        };
        Some(Self::new(kind, node.id))
    }

    fn cycle_parent(self) -> Result<Vec<(&'static str, String)>, CreateError> {
        match self.kind {
            AnchorKind::Root => Ok(parent_params(0, ParentType::Root)),
            AnchorKind::Release => Ok(parent_params(self.id, ParentType::Release)),
            AnchorKind::Cycle => Ok(parent_params(self.id, ParentType::TestCycle)),
            AnchorKind::Suite => Err(CreateError::CycleUnderSuite),
        }
    }

    fn suite_parent(self) -> Vec<(&'static str, String)> {
        match self.kind {
            AnchorKind::Root => vec![],
            AnchorKind::Release => parent_params(self.id, ParentType::Release),
            AnchorKind::Cycle => parent_params(self.id, ParentType::TestCycle),
            AnchorKind::Suite => parent_params(self.id, ParentType::TestSuite),
        }
    }
}

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("a test cycle cannot be created inside a test suite")]
    CycleUnderSuite,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Failure for CreateError {
    fn status_code(&self) -> Option<u16> {
        match self {
            CreateError::Transport(e) => e.status_code(),
            CreateError::CycleUnderSuite => None,
        }
    }

    fn response_body(&self) -> Option<&str> {
        match self {
            CreateError::Transport(e) => e.response_body(),
            CreateError::CycleUnderSuite => None,
        }
    }
}

pub struct MirrorEngine {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ErrorSink>,
    project_id: Id,
}

impl MirrorEngine {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn ErrorSink>, project_id: Id) -> Self {
        Self {
            transport,
            sink,
            project_id,
        }
    }

    /// Mirror `subtree` under `anchor`, returning one record per source leaf
    /// in pre-order.
    pub async fn mirror(&self, subtree: &MirrorSubtree, anchor: Anchor) -> Vec<CreatedLeaf> {
        let mut out = Vec::with_capacity(subtree.total_leaves());
        self.mirror_node(subtree, anchor, &mut out).await;
        let created = out.iter().filter(|l| l.created).count();
        info!(
            "mirrored \"{}\": {created} runs created, {} failed",
            subtree.container_name,
            out.len() - created
        );
        out
    }

    fn mirror_node<'a>(
        &'a self,
        node: &'a MirrorSubtree,
        anchor: Anchor,
        out: &'a mut Vec<CreatedLeaf>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let name = node.container_name.as_str();
            let mut current = anchor;

            if !node.children.is_empty() {
                match self.create_cycle(name, anchor).await {
                    Ok(id) => current = Anchor::new(AnchorKind::Cycle, id),
                    Err(e) => {
                        warn!("test cycle \"{name}\" not created, continuing under parent");
                        self.sink.record(ErrorEntry::hierarchy("test-cycle", name, &e));
                    }
                }
            }

            if !node.leaves.is_empty() {
                match self.create_suite(name, current).await {
                    Ok(suite_id) => {
                        for leaf in &node.leaves {
                            let record = self.create_run(leaf, suite_id, name).await;
                            out.push(record);
                        }
                    }
                    Err(e) => {
                        warn!("test suite \"{name}\" not created; {} runs skipped", node.leaves.len());
                        self.sink.record(ErrorEntry::hierarchy("test-suite", name, &e));
                        let reason = format!("test suite not created: {e}");
                        out.extend(
                            node.leaves
                                .iter()
                                .map(|leaf| CreatedLeaf::failed(leaf, name, reason.as_str())),
                        );
                    }
                }
            }

            for child in &node.children {
                self.mirror_node(child, current, &mut *out).await;
            }
        })
    }

    async fn create_cycle(&self, name: &str, parent: Anchor) -> Result<Id, CreateError> {
        let params = parent.cycle_parent()?;
        let path = project_path(self.project_id, "test-cycles");
        let resp = self
            .transport
            .post(&path, &params, &json!({ "name": name }))
            .await?;
        let row: CreatedRow = resp.decode(&path)?;
        debug!("created test cycle \"{name}\" ({})", row.id);
        Ok(row.id)
    }

    async fn create_suite(&self, name: &str, parent: Anchor) -> Result<Id, CreateError> {
        let params = parent.suite_parent();
        let path = project_path(self.project_id, "test-suites");
        let resp = self
            .transport
            .post(&path, &params, &json!({ "name": name }))
            .await?;
        let row: CreatedRow = resp.decode(&path)?;
        debug!("created test suite \"{name}\" ({})", row.id);
        Ok(row.id)
    }

    async fn create_run(&self, leaf: &SourceLeaf, suite_id: Id, suite_name: &str) -> CreatedLeaf {
        let path = project_path(self.project_id, "test-runs");
        let body = json!({ "name": leaf.name, "test_case": { "id": leaf.id } });
        let result = async {
            let resp = self
                .transport
                .post(&path, &parent_params(suite_id, ParentType::TestSuite), &body)
                .await?;
            resp.decode::<CreatedRow>(&path)
        }
        .await;

        match result {
            Ok(row) => CreatedLeaf::created(leaf, suite_name, row.id, row.test_case_version_id),
            Err(e) => {
                self.sink.record(ErrorEntry::test_run(&leaf.name, suite_name, &e));
                CreatedLeaf::failed(leaf, suite_name, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_parent_params() {
        assert_eq!(
            Anchor::root().cycle_parent().unwrap(),
            vec![("parentId", "0".to_string()), ("parentType", "root".to_string())]
        );
        assert_eq!(
            Anchor::new(AnchorKind::Release, 5).cycle_parent().unwrap()[1].1,
            "release"
        );
        assert!(matches!(
            Anchor::new(AnchorKind::Suite, 9).cycle_parent(),
            Err(CreateError::CycleUnderSuite)
        ));
        assert!(Anchor::root().suite_parent().is_empty());
        assert_eq!(Anchor::new(AnchorKind::Suite, 9).suite_parent()[1].1, "test-suite");
        assert_eq!(Anchor::new(AnchorKind::Root, 42).id, 0);
    }

    #[test]
    fn modules_are_not_anchors() {
        let project = TreeNode::project(1, "P");
        let module = project.child(NodeKind::Module, 2, "M");
        assert!(Anchor::for_node(&module).is_none());
        let cycle = project.child(NodeKind::Cycle, 3, "C");
        assert_eq!(Anchor::for_node(&cycle), Some(Anchor::new(AnchorKind::Cycle, 3)));
    }
}
