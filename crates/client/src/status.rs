use crate::api::{decode_list, project_path, AllowedValue, FieldRow, RunRow};
use crate::error_log::{ErrorEntry, ErrorSink, Failure};
use crate::transport::{Transport, TransportError};
use qbridge_core::{format_iso, now_ms, ApplyResult, CreatedLeaf, Id, RunStatus};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status field not found or has no allowed values in project {0}")]
    FieldNotFound(Id),
    #[error("no test run status named \"{name}\" (available: {available})")]
    UnknownStatus { name: String, available: String },
    #[error("test run {0} has no test case version")]
    NoVersion(Id),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Failure for StatusError {
    fn status_code(&self) -> Option<u16> {
        match self {
            StatusError::Transport(e) => e.status_code(),
            _ => None,
        }
    }

    fn response_body(&self) -> Option<&str> {
        match self {
            StatusError::Transport(e) => e.response_body(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct StatusField {
    field_id: Id,
    statuses: Vec<RunStatus>,
}

/// Status-field lookups for one invocation, keyed by project.
#[derive(Debug, Default)]
pub struct StatusContext {
    fields: HashMap<Id, StatusField>,
}

impl StatusContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_id(&self, project_id: Id) -> Option<Id> {
        self.fields.get(&project_id).map(|f| f.field_id)
    }
}

/// A run to update.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTarget {
    pub test_run_id: Id,
    pub test_name: String,
    pub test_case_version_id: Option<Id>,
}

impl RunTarget {
    /// Only created runs have something to update.
    pub fn from_created(leaf: &CreatedLeaf) -> Option<Self> {
        Some(Self {
            test_run_id: leaf.destination_id.filter(|_| leaf.created)?,
            test_name: leaf.name.clone(),
            test_case_version_id: leaf.test_case_version_id,
        })
    }
}

impl From<&RunRow> for RunTarget {
    fn from(run: &RunRow) -> Self {
        Self {
            test_run_id: run.id,
            test_name: run.name.clone(),
            test_case_version_id: run.test_case_version_id,
        }
    }
}

fn value_id(v: &Value) -> Option<Id> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn active_statuses(values: &[AllowedValue]) -> Vec<RunStatus> {
    values
        .iter()
        .filter(|v| v.is_active)
        .filter_map(|v| {
            Some(RunStatus {
                id: value_id(&v.value)?,
                name: v.label.clone(),
                color: v.color.clone(),
            })
        })
        .collect()
}

pub struct StatusApplier {
    transport: Arc<dyn Transport>,
}

impl StatusApplier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Active values of the test-run `Status` field.
    pub async fn available_statuses(
        &self,
        ctx: &mut StatusContext,
        project_id: Id,
    ) -> Result<Vec<RunStatus>, StatusError> {
        if let Some(field) = ctx.fields.get(&project_id) {
            return Ok(field.statuses.clone());
        }
        let path = project_path(project_id, "settings/test-runs/fields");
        let resp = self.transport.get(&path, &[]).await?;
        let fields: Vec<FieldRow> = decode_list(&resp.data)
            .map_err(|source| TransportError::Decode { path, source })?;
        let field = fields
            .into_iter()
            .find(|f| {
                f.label.as_deref() == Some("Status")
                    || f.original_name.as_deref() == Some("StatusTestRun")
            })
            .ok_or(StatusError::FieldNotFound(project_id))?;
        let values = field
            .allowed_values
            .as_deref()
            .ok_or(StatusError::FieldNotFound(project_id))?;
        let statuses = active_statuses(values);
        debug!(
            "project {project_id}: status field {} with {} active values",
            field.id,
            statuses.len()
        );
        ctx.fields.insert(
            project_id,
            StatusField {
                field_id: field.id,
                statuses: statuses.clone(),
            },
        );
        Ok(statuses)
    }

    /// Case-insensitive lookup by name.
    pub async fn find_status(
        &self,
        ctx: &mut StatusContext,
        project_id: Id,
        name: &str,
    ) -> Result<Option<RunStatus>, StatusError> {
        let statuses = self.available_statuses(ctx, project_id).await?;
        Ok(statuses
            .into_iter()
            .find(|s| s.name.to_lowercase() == name.to_lowercase()))
    }

    /// Like [`find_status`](Self::find_status), but a missing status is an error
    /// listing what is available.
    pub async fn require_status(
        &self,
        ctx: &mut StatusContext,
        project_id: Id,
        name: &str,
    ) -> Result<RunStatus, StatusError> {
        if let Some(found) = self.find_status(ctx, project_id, name).await? {
            return Ok(found);
        }
        let available = self
            .available_statuses(ctx, project_id)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect::<Vec<_>>()
            .join(", ");
        Err(StatusError::UnknownStatus {
            name: name.to_string(),
            available,
        })
    }

    /// Apply `status` to each run; one request per run, each failure isolated.
    pub async fn apply(
        &self,
        project_id: Id,
        runs: &[RunTarget],
        status: &RunStatus,
        sink: &dyn ErrorSink,
    ) -> Vec<ApplyResult> {
        let mut results = Vec::with_capacity(runs.len());
        for run in runs {
            let outcome = self.update_run(project_id, run, status.id).await;
            let error = match outcome {
                Ok(()) => None,
                Err(e) => {
                    sink.record(ErrorEntry::version(
                        &run.test_name,
                        run.test_run_id,
                        run.test_case_version_id,
                        &e,
                    ));
                    Some(e.to_string())
                }
            };
            results.push(ApplyResult {
                test_run_id: run.test_run_id,
                test_name: run.test_name.clone(),
                applied: error.is_none(),
                error,
            });
        }
        let applied = results.iter().filter(|r| r.applied).count();
        info!("status \"{}\" applied to {applied}/{} runs", status.name, runs.len());
        results
    }

    async fn update_run(&self, project_id: Id, run: &RunTarget, status_id: Id) -> Result<(), StatusError> {
        let version = match run.test_case_version_id {
            Some(v) => v,
            None => {
                let path = project_path(project_id, &format!("test-runs/{}", run.test_run_id));
                let row: RunRow = self.transport.get(&path, &[]).await?.decode(&path)?;
                row.test_case_version_id
                    .ok_or(StatusError::NoVersion(run.test_run_id))?
            }
        };
        let now = format_iso(now_ms());
        let log = json!({
            "status": { "id": status_id },
            "exe_start_date": now,
            "exe_end_date": now,
            "test_case_version_id": version,
        });
        let path = project_path(project_id, &format!("test-runs/{}/test-logs", run.test_run_id));
        self.transport.post(&path, &[], &log).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbridge_core::{ApprovalState, SourceLeaf};

    #[test]
    fn only_created_leaves_become_targets() {
        let leaf = SourceLeaf {
            id: 1,
            name: "T1".into(),
            approval: ApprovalState::Approved,
        };
        let ok = CreatedLeaf::created(&leaf, "Login", 100, Some(7));
        let target = RunTarget::from_created(&ok).unwrap();
        assert_eq!(target.test_run_id, 100);
        assert_eq!(target.test_case_version_id, Some(7));
        assert!(RunTarget::from_created(&CreatedLeaf::failed(&leaf, "Login", "x")).is_none());
    }

    #[test]
    fn inactive_and_unparseable_values_are_dropped() {
        let values: Vec<AllowedValue> = serde_json::from_value(json!([
            { "value": 601, "label": "Passed", "is_active": true },
            { "value": "602", "label": "Failed", "is_active": true, "color": "red" },
            { "value": 603, "label": "Old", "is_active": false },
            { "value": "x", "label": "Broken", "is_active": true },
            { "value": 604, "label": "Unflagged" },
        ]))
        .unwrap();
        let statuses = active_statuses(&values);
        let names: Vec<_> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Passed", "Failed"]);
        assert_eq!(statuses[1].id, 602);
    }
}
