//! Typed rows of the test-management REST API and the request paths that return them.

use crate::transport::{Params, Transport, TransportError};
use qbridge_core::{Id, Ordered};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The relationship a child is looked up or created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentType {
    Root,
    Release,
    TestCycle,
    TestSuite,
    Module,
}

impl ParentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParentType::Root => "root",
            ParentType::Release => "release",
            ParentType::TestCycle => "test-cycle",
            ParentType::TestSuite => "test-suite",
            ParentType::Module => "module",
        }
    }
}

pub fn parent_params(parent_id: Id, parent_type: ParentType) -> Vec<(&'static str, String)> {
    vec![
        ("parentId", parent_id.to_string()),
        ("parentType", parent_type.as_str().to_string()),
    ]
}

pub fn project_path(project_id: Id, rest: &str) -> String {
    format!("/projects/{project_id}/{rest}")
}

/// Accept both a bare array and a paginated `{ "items": [...] }` envelope.
pub fn decode_list<T: DeserializeOwned>(data: &Value) -> Result<Vec<T>, serde_json::Error> {
    let items = match data {
        Value::Array(_) => data.clone(),
        Value::Object(map) => map.get("items").cloned().unwrap_or(Value::Array(vec![])),
        _ => Value::Array(vec![]),
    };
    serde_json::from_value(items)
}

pub async fn get_list<T: DeserializeOwned>(
    transport: &dyn Transport,
    path: &str,
    params: &Params<'_>,
) -> Result<Vec<T>, TransportError> {
    let resp = transport.get(path, params).await?;
    decode_list(&resp.data).map_err(|source| TransportError::Decode {
        path: path.to_string(),
        source,
    })
}

/// Numeric value of a position field; `"TS-12"` reads as 12.
pub fn position_from(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.rsplit(|c: char| !c.is_ascii_digit()).next()?.parse().ok(),
        _ => None,
    }
}

fn lenient_position<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let v: Option<Value> = Option::deserialize(d)?;
    Ok(v.as_ref().and_then(position_from))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRow {
    pub id: Id,
    pub name: String,
}

/// Release, test cycle, test suite or module.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeRow {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default, deserialize_with = "lenient_position")]
    pub pid: Option<i64>,
    #[serde(default)]
    pub parent_id: Option<Id>,
}

impl Ordered for NodeRow {
    fn order(&self) -> Option<i64> {
        self.order
    }
    fn position(&self) -> Option<i64> {
        self.pid
    }
    fn identifier(&self) -> Option<i64> {
        Some(self.id)
    }
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PropertyRow {
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub field_value: Option<Value>,
    #[serde(default)]
    pub field_value_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TestCaseRow {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default, deserialize_with = "lenient_position")]
    pub pid: Option<i64>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub properties: Option<Vec<PropertyRow>>,
}

impl Ordered for TestCaseRow {
    fn order(&self) -> Option<i64> {
        self.order
    }
    fn position(&self) -> Option<i64> {
        self.pid
    }
    fn identifier(&self) -> Option<i64> {
        Some(self.id)
    }
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct IdRef {
    pub id: Id,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RunRow {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub test_case: Option<IdRef>,
    #[serde(default)]
    pub test_case_version_id: Option<Id>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StatusRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TestLogRow {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub status: Option<StatusRef>,
    #[serde(default)]
    pub exe_start_date: Option<String>,
    #[serde(default)]
    pub exe_end_date: Option<String>,
    #[serde(default)]
    pub user_id: Option<Id>,
    #[serde(default)]
    pub test_case_version_id: Option<Id>,
    #[serde(default)]
    pub test_case: Option<IdRef>,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

impl TestLogRow {
    /// The test case a log was executed against.
    pub fn test_case_id(&self) -> Option<Id> {
        self.test_case.map(|t| t.id).or(self.test_case_version_id)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserRow {
    pub id: Id,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserRow {
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().or(self.username.as_deref())
    }

    /// Display name, else `first last`, else the username, else the email.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        self.username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| format!("user_{}", self.id))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AllowedValue {
    pub value: Value,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FieldRow {
    pub id: Id,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub allowed_values: Option<Vec<AllowedValue>>,
}

/// Body of a created entity; only the identifiers matter.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CreatedRow {
    pub id: Id,
    #[serde(default)]
    pub test_case_version_id: Option<Id>,
}
