mod common;

use common::FakeTransport;
use qbridge_client::{list_projects, DesignTreeReader, ExecutionTreeReader, HierarchyReader};
use qbridge_core::{NodeKind, TreeNode};
use serde_json::json;
use std::sync::Arc;

fn names(nodes: &[TreeNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.name.as_str()).collect()
}

#[tokio::test]
async fn projects_accept_paginated_envelope() {
    let fake = FakeTransport::new();
    fake.on_get(
        "/projects",
        &[],
        json!({ "items": [{ "id": 1, "name": "Shop" }, { "id": 2, "name": "Bank" }] }),
    );
    let projects = list_projects(&fake).await.unwrap();
    assert_eq!(names(&projects), vec!["Shop", "Bank"]);
    assert!(projects.iter().all(|p| p.kind == NodeKind::Project));
}

#[tokio::test]
async fn suites_come_before_cycles_and_sort_by_position() {
    let fake = Arc::new(FakeTransport::new());
    fake.on_get(
        "/projects/1/test-suites",
        &[("parentId", "5"), ("parentType", "test-cycle")],
        json!([
            { "id": 3, "name": "c", "pid": "TS-30" },
            { "id": 1, "name": "a", "pid": "TS-10" },
            { "id": 2, "name": "b", "pid": "TS-20" },
        ]),
    );
    fake.on_get(
        "/projects/1/test-cycles",
        &[("parentId", "5"), ("parentType", "test-cycle")],
        json!([{ "id": 9, "name": "Nested", "order": 2 }, { "id": 8, "name": "First", "order": 1 }]),
    );
    fake.on_get(
        "/projects/1/test-runs",
        &[("parentId", "2"), ("parentType", "test-suite")],
        json!([{ "id": 100, "name": "r1" }, { "id": 101, "name": "r2" }]),
    );

    let project = TreeNode::project(1, "Shop");
    let cycle = project.child(NodeKind::Cycle, 5, "Sprint");
    let reader = ExecutionTreeReader::new(fake);
    let children = reader.children(&cycle).await;

    assert_eq!(names(&children), vec!["a", "b", "c", "First", "Nested"]);
    assert_eq!(children[1].leaf_count, Some(2));
    assert_eq!(children[0].leaf_count, Some(0));
    assert!(children[3].leaf_count.is_none());
    assert_eq!(reader.format_path(&children[1]), "Shop / Sprint / b (2 runs)");
    assert_eq!(reader.format_path(&children[3]), "Shop / Sprint / First");
}

#[tokio::test]
async fn failed_relationship_does_not_hide_the_others() {
    let fake = Arc::new(FakeTransport::new());
    fake.fail_get(
        "/projects/1/test-cycles",
        &[("parentId", "4"), ("parentType", "release")],
    );
    fake.on_get(
        "/projects/1/test-cycles",
        &[("parentId", "4"), ("parentType", "test-cycle")],
        json!([{ "id": 7, "name": "Only" }]),
    );

    let release = TreeNode::project(1, "Shop").child(NodeKind::Release, 4, "R1");
    let children = ExecutionTreeReader::new(fake).children(&release).await;
    assert_eq!(names(&children), vec!["Only"]);
    assert_eq!(children[0].path, vec!["Shop", "R1", "Only"]);
}

#[tokio::test]
async fn cycles_found_twice_are_listed_once() {
    let fake = Arc::new(FakeTransport::new());
    let cycles = json!([{ "id": 12, "name": "Two" }, { "id": 11, "name": "One" }]);
    fake.on_get(
        "/projects/1/test-cycles",
        &[("parentId", "4"), ("parentType", "release")],
        cycles.clone(),
    );
    fake.on_get(
        "/projects/1/test-cycles",
        &[("parentId", "4"), ("parentType", "test-cycle")],
        cycles,
    );
    let release = TreeNode::project(1, "Shop").child(NodeKind::Release, 4, "R1");
    let children = ExecutionTreeReader::new(fake).children(&release).await;
    assert_eq!(names(&children), vec!["One", "Two"]);
}

#[tokio::test]
async fn project_without_releases_lists_root_cycles() {
    let fake = Arc::new(FakeTransport::new());
    fake.on_get("/projects/1/releases", &[], json!([]));
    fake.on_get(
        "/projects/1/test-cycles",
        &[("parentId", "0"), ("parentType", "root")],
        json!([{ "id": 20, "name": "Nightly" }]),
    );
    fake.on_get("/projects/1/test-suites", &[], json!([{ "id": 30, "name": "Loose" }]));

    let project = TreeNode::project(1, "Shop");
    let children = ExecutionTreeReader::new(fake).children(&project).await;
    assert_eq!(names(&children), vec!["Loose", "Nightly"]);
    assert_eq!(children[0].kind, NodeKind::Suite);
    assert_eq!(children[1].kind, NodeKind::Cycle);
}

#[tokio::test]
async fn project_with_releases_lists_them() {
    let fake = Arc::new(FakeTransport::new());
    fake.on_get(
        "/projects/1/releases",
        &[],
        json!([{ "id": 3, "name": "R2", "order": 2 }, { "id": 2, "name": "R1", "order": 1 }]),
    );
    fake.on_get(
        "/projects/1/test-cycles",
        &[("parentId", "0"), ("parentType", "root")],
        json!([{ "id": 20, "name": "Hidden" }]),
    );
    let children = ExecutionTreeReader::new(fake)
        .children(&TreeNode::project(1, "Shop"))
        .await;
    assert_eq!(names(&children), vec!["R1", "R2"]);
    assert!(children.iter().all(|c| c.kind == NodeKind::Release));
}

#[tokio::test]
async fn sub_suites_fall_back_to_id_order() {
    let fake = Arc::new(FakeTransport::new());
    fake.on_get(
        "/projects/1/test-suites",
        &[("parentId", "6"), ("parentType", "test-suite")],
        json!([
            { "id": 9, "name": "x" },
            { "id": 4, "name": "y", "pid": "TS-1" },
            { "id": 7, "name": "z" },
        ]),
    );
    let suite = TreeNode::project(1, "Shop").child(NodeKind::Suite, 6, "S");
    let children = ExecutionTreeReader::new(fake).children(&suite).await;
    assert_eq!(names(&children), vec!["y", "z", "x"]);
}

#[tokio::test]
async fn root_modules_exclude_nested_ones() {
    let fake = Arc::new(FakeTransport::new());
    fake.on_get(
        "/projects/1/modules",
        &[],
        json!([
            { "id": 10, "name": "Login", "order": 1 },
            { "id": 11, "name": "Edge", "order": 1, "parent_id": 10 },
            { "id": 12, "name": "Checkout", "order": 3, "parent_id": 0 },
            { "id": 13, "name": "Orphan", "order": 2, "parent_id": 99 },
        ]),
    );
    fake.on_get(
        "/projects/1/modules",
        &[("parentId", "10")],
        json!([{ "id": 11, "name": "Edge", "parent_id": 10 }]),
    );

    let reader = DesignTreeReader::new(fake);
    let project = TreeNode::project(1, "Shop");
    let roots = reader.children(&project).await;
    assert_eq!(names(&roots), vec!["Login", "Orphan", "Checkout"]);
    assert_eq!(reader.format_path(&roots[0]), "Shop / Login (1 sub-modules)");
    assert_eq!(reader.format_path(&roots[1]), "Shop / Orphan");

    let nested = reader.children(&roots[0]).await;
    assert_eq!(nested[0].path, vec!["Shop", "Login", "Edge"]);
    assert!(reader.children(&nested[0]).await.is_empty());
}
