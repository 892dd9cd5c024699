//! Child enumeration over the execution tree (releases, cycles, suites) and
//! the design tree (modules, test cases) behind one reader interface.

use crate::api::{
    get_list, parent_params, project_path, NodeRow, ParentType, ProjectRow, RunRow, TestCaseRow,
};
use crate::transport::{Params, Transport, TransportError};
use async_trait::async_trait;
use qbridge_core::{
    sort_items, ApprovalState, Id, MirrorSubtree, NodeKind, SourceLeaf, TreeNode,
};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lists a node's children in the order the web UI shows them.
///
/// A relationship that cannot be looked up counts as empty; it never stops
/// the remaining relationships from being listed.
#[async_trait]
pub trait HierarchyReader: Send + Sync {
    async fn children(&self, node: &TreeNode) -> Vec<TreeNode>;

    fn format_path(&self, node: &TreeNode) -> String;
}

pub async fn list_projects(transport: &dyn Transport) -> Result<Vec<TreeNode>, TransportError> {
    let rows: Vec<ProjectRow> = get_list(transport, "/projects", &[]).await?;
    Ok(rows
        .into_iter()
        .map(|p| TreeNode::project(p.id, p.name))
        .collect())
}

/// Sorted rows of one relationship, or nothing if the lookup failed.
async fn lookup(transport: &dyn Transport, path: &str, params: &Params<'_>) -> Vec<NodeRow> {
    match get_list::<NodeRow>(transport, path, params).await {
        Ok(mut rows) => {
            sort_items(&mut rows);
            rows
        }
        Err(e) => {
            debug!("no children via {path} {params:?}: {e}");
            vec![]
        }
    }
}

pub struct ExecutionTreeReader {
    transport: Arc<dyn Transport>,
}

impl ExecutionTreeReader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn runs(&self, project_id: Id, suite_id: Id) -> Result<Vec<RunRow>, TransportError> {
        get_list(
            &*self.transport,
            &project_path(project_id, "test-runs"),
            &parent_params(suite_id, ParentType::TestSuite),
        )
        .await
    }

    async fn run_count(&self, project_id: Id, suite_id: Id) -> usize {
        self.runs(project_id, suite_id)
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }

    async fn suite_nodes(&self, parent: &TreeNode, rows: Vec<NodeRow>) -> Vec<TreeNode> {
        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let count = self.run_count(parent.project_id, row.id).await;
            nodes.push(parent.child(NodeKind::Suite, row.id, row.name).with_leaf_count(count));
        }
        nodes
    }

    async fn project_children(&self, project: &TreeNode) -> Vec<TreeNode> {
        let t = &*self.transport;
        let pid = project.project_id;

        let releases = lookup(t, &project_path(pid, "releases"), &[]).await;
        let containers: Vec<TreeNode> = if !releases.is_empty() {
            releases
                .into_iter()
                .map(|r| project.child(NodeKind::Release, r.id, r.name))
                .collect()
        } else {
            lookup(
                t,
                &project_path(pid, "test-cycles"),
                &parent_params(0, ParentType::Root),
            )
            .await
            .into_iter()
            .map(|c| project.child(NodeKind::Cycle, c.id, c.name))
            .collect()
        };

        let suites = lookup(t, &project_path(pid, "test-suites"), &[]).await;
        let mut children = self.suite_nodes(project, suites).await;
        children.extend(containers);
        children
    }

    async fn cycle_children(&self, node: &TreeNode) -> Vec<TreeNode> {
        let t = &*self.transport;
        let pid = node.project_id;
        let cycles_path = project_path(pid, "test-cycles");

        let suites = lookup(
            t,
            &project_path(pid, "test-suites"),
            &parent_params(node.id, ParentType::TestCycle),
        )
        .await;

        let mut cycles = lookup(t, &cycles_path, &parent_params(node.id, ParentType::Release)).await;
        cycles.extend(lookup(t, &cycles_path, &parent_params(node.id, ParentType::TestCycle)).await);
        let mut seen = HashSet::new();
        cycles.retain(|c| seen.insert(c.id));
        sort_items(&mut cycles);

        let mut children = self.suite_nodes(node, suites).await;
        children.extend(
            cycles
                .into_iter()
                .map(|c| node.child(NodeKind::Cycle, c.id, c.name)),
        );
        children
    }

    async fn suite_children(&self, node: &TreeNode) -> Vec<TreeNode> {
        let rows = lookup(
            &*self.transport,
            &project_path(node.project_id, "test-suites"),
            &parent_params(node.id, ParentType::TestSuite),
        )
        .await;
        self.suite_nodes(node, rows).await
    }
}

#[async_trait]
impl HierarchyReader for ExecutionTreeReader {
    async fn children(&self, node: &TreeNode) -> Vec<TreeNode> {
        match node.kind {
            NodeKind::Project => self.project_children(node).await,
            NodeKind::Release | NodeKind::Cycle => self.cycle_children(node).await,
            NodeKind::Suite => self.suite_children(node).await,
            NodeKind::Module => vec![],
        }
    }

    fn format_path(&self, node: &TreeNode) -> String {
        match node.leaf_count {
            Some(n) => format!("{} ({n} runs)", node.display_path()),
            None => node.display_path(),
        }
    }
}

/// Whether a test case carries the approved status property.
///
/// Approved means a `Status` property whose value name is `Approved` or whose
/// raw value is 202. A case with no properties is not approved.
pub fn approval_of(tc: &TestCaseRow) -> ApprovalState {
    let approved = tc.properties.iter().flatten().any(|p| {
        p.field_name.as_deref() == Some("Status")
            && (p.field_value_name.as_deref() == Some("Approved")
                || match &p.field_value {
                    Some(Value::String(s)) => s == "202",
                    Some(Value::Number(n)) => n.as_i64() == Some(202),
                    _ => false,
                })
    });
    if approved {
        ApprovalState::Approved
    } else {
        ApprovalState::Other
    }
}

pub struct DesignTreeReader {
    transport: Arc<dyn Transport>,
}

impl DesignTreeReader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn child_rows(&self, project_id: Id, module_id: Id) -> Vec<NodeRow> {
        lookup(
            &*self.transport,
            &project_path(project_id, "modules"),
            &[("parentId", module_id.to_string())],
        )
        .await
    }

    async fn module_nodes(&self, parent: &TreeNode, rows: Vec<NodeRow>) -> Vec<TreeNode> {
        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let count = self.child_rows(parent.project_id, row.id).await.len();
            nodes.push(parent.child(NodeKind::Module, row.id, row.name).with_leaf_count(count));
        }
        nodes
    }

    /// Top-level modules of a project: those with no parent, parent 0, or a
    /// parent outside the module list.
    pub async fn root_modules(&self, project: &TreeNode) -> Result<Vec<TreeNode>, TransportError> {
        let rows: Vec<NodeRow> = get_list(
            &*self.transport,
            &project_path(project.project_id, "modules"),
            &[],
        )
        .await?;
        let ids: HashSet<Id> = rows.iter().map(|m| m.id).collect();
        let mut roots: Vec<NodeRow> = rows
            .into_iter()
            .filter(|m| match m.parent_id {
                None | Some(0) => true,
                Some(p) => !ids.contains(&p),
            })
            .collect();
        sort_items(&mut roots);
        Ok(self.module_nodes(project, roots).await)
    }

    /// Test cases directly inside a module, in UI order.
    pub async fn test_cases(&self, project_id: Id, module_id: Id) -> Result<Vec<TestCaseRow>, TransportError> {
        let mut cases: Vec<TestCaseRow> = get_list(
            &*self.transport,
            &project_path(project_id, "test-cases"),
            &parent_params(module_id, ParentType::Module),
        )
        .await?;
        sort_items(&mut cases);
        Ok(cases)
    }

    /// Snapshot a module and everything below it.
    pub fn build_subtree(
        &self,
        project_id: Id,
        module_id: Id,
        module_name: String,
        include_unapproved: bool,
    ) -> BoxFuture<'_, MirrorSubtree> {
        Box::pin(async move {
            let mut subtree = MirrorSubtree::new(module_id, module_name);

            let cases = match self.test_cases(project_id, module_id).await {
                Ok(cases) => cases,
                Err(e) => {
                    warn!("could not list test cases of module \"{}\": {e}", subtree.container_name);
                    vec![]
                }
            };
            let total = cases.len();
            subtree.leaves = cases
                .into_iter()
                .map(|tc| SourceLeaf {
                    approval: approval_of(&tc),
                    id: tc.id,
                    name: tc.name,
                })
                .filter(|leaf| include_unapproved || leaf.approval == ApprovalState::Approved)
                .collect();
            if subtree.leaves.len() < total {
                info!(
                    "module \"{}\": {} of {total} test cases skipped as unapproved",
                    subtree.container_name,
                    total - subtree.leaves.len()
                );
            }

            for child in self.child_rows(project_id, module_id).await {
                let sub = self
                    .build_subtree(project_id, child.id, child.name, include_unapproved)
                    .await;
                subtree.children.push(sub);
            }
            subtree
        })
    }
}

#[async_trait]
impl HierarchyReader for DesignTreeReader {
    async fn children(&self, node: &TreeNode) -> Vec<TreeNode> {
        match node.kind {
            NodeKind::Project => self.root_modules(node).await.unwrap_or_else(|e| {
                warn!("could not list modules of {}: {e}", node.name);
                vec![]
            }),
            NodeKind::Module => {
                let rows = self.child_rows(node.project_id, node.id).await;
                self.module_nodes(node, rows).await
            }
            _ => vec![],
        }
    }

    fn format_path(&self, node: &TreeNode) -> String {
        match node.leaf_count {
            Some(n) if n > 0 => format!("{} ({n} sub-modules)", node.display_path()),
            _ => node.display_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(props: Value) -> TestCaseRow {
        serde_json::from_value(json!({ "id": 1, "name": "T", "properties": props })).unwrap()
    }

    #[test]
    fn approval_conventions() {
        let by_name = case(json!([{ "field_name": "Status", "field_value_name": "Approved" }]));
        let by_code = case(json!([{ "field_name": "Status", "field_value": "202" }]));
        let by_num = case(json!([{ "field_name": "Status", "field_value": 202 }]));
        let draft = case(json!([{ "field_name": "Status", "field_value_name": "New", "field_value": 201 }]));
        let other_field = case(json!([{ "field_name": "Priority", "field_value_name": "Approved" }]));
        let none: TestCaseRow = serde_json::from_value(json!({ "id": 2, "name": "U" })).unwrap();

        assert_eq!(approval_of(&by_name), ApprovalState::Approved);
        assert_eq!(approval_of(&by_code), ApprovalState::Approved);
        assert_eq!(approval_of(&by_num), ApprovalState::Approved);
        assert_eq!(approval_of(&draft), ApprovalState::Other);
        assert_eq!(approval_of(&other_field), ApprovalState::Other);
        assert_eq!(approval_of(&none), ApprovalState::Other);
    }
}
