//! Daily per-user execution report: who ran what, when, and for how long.

use crate::model::{Id, PATH_SEPARATOR};
use crate::selection::StageMapping;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const UNKNOWN_USER: &str = "Unknown";

/// One execution log, attributed to a user and placed in the tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub test_name: String,
    pub test_case_id: Id,
    /// UTC day the execution ended, `YYYY-MM-DD`.
    pub execution_date: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: f64,
    pub status: String,
    pub user: String,
    pub user_email: String,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_cycle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_suite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_stage: Option<String>,
}

/// Minutes between two instants, rounded to two decimals.
pub fn duration_minutes(start_ms: i64, end_ms: i64) -> f64 {
    ((end_ms - start_ms) as f64 / 600.0).round() / 100.0
}

/// Stage of an execution, trying `project / cycle / suite`, then
/// `project / suite`, then the bare suite and the bare cycle.
pub fn execution_stage(mapping: &StageMapping, exec: &Execution) -> Option<String> {
    let project = &exec.project_name;
    let mut keys = vec![];
    if let (Some(cycle), Some(suite)) = (&exec.test_cycle, &exec.test_suite) {
        keys.push(format!("{project}{PATH_SEPARATOR}{cycle}{PATH_SEPARATOR}{suite}"));
    }
    if let Some(suite) = &exec.test_suite {
        keys.push(format!("{project}{PATH_SEPARATOR}{suite}"));
        keys.push(suite.clone());
    }
    if let Some(cycle) = &exec.test_cycle {
        keys.push(cycle.clone());
    }
    keys.iter().find_map(|k| mapping.get(k)).map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyUserReport {
    pub date: String,
    pub user: String,
    pub user_email: String,
    pub tests: Vec<Execution>,
}

/// Group by `(date, user email)`; newest day first, then by user name.
/// Executions keep their input order inside a group.
pub fn group_by_day_and_user(executions: &[Execution]) -> Vec<DailyUserReport> {
    let mut groups: BTreeMap<(String, String), DailyUserReport> = BTreeMap::new();
    for exec in executions {
        groups
            .entry((exec.execution_date.clone(), exec.user_email.clone()))
            .or_insert_with(|| DailyUserReport {
                date: exec.execution_date.clone(),
                user: exec.user.clone(),
                user_email: exec.user_email.clone(),
                tests: vec![],
            })
            .tests
            .push(exec.clone());
    }
    let mut reports: Vec<_> = groups.into_values().collect();
    reports.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.user.cmp(&b.user)));
    reports
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_executions: usize,
    pub unique_users: usize,
    pub unique_tests: usize,
    pub projects: Vec<String>,
    /// Only present when a stage mapping is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_stages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub report_generated: String,
    pub period: ReportPeriod,
    pub summary: ReportSummary,
    pub executions_by_date_and_user: Vec<DailyUserReport>,
    pub all_executions: Vec<Execution>,
}

fn first_seen<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(str::to_string)
        .collect()
}

impl ExecutionReport {
    pub fn build(
        report_generated: String,
        period: ReportPeriod,
        executions: Vec<Execution>,
        with_stages: bool,
    ) -> Self {
        let summary = ReportSummary {
            total_executions: executions.len(),
            unique_users: executions.iter().map(|e| &e.user_email).collect::<BTreeSet<_>>().len(),
            unique_tests: executions.iter().map(|e| e.test_case_id).collect::<BTreeSet<_>>().len(),
            projects: first_seen(executions.iter().map(|e| e.project_name.as_str())),
            test_stages: with_stages
                .then(|| first_seen(executions.iter().filter_map(|e| e.test_stage.as_deref()))),
        };
        Self {
            report_generated,
            period,
            summary,
            executions_by_date_and_user: group_by_day_and_user(&executions),
            all_executions: executions,
        }
    }

    /// One row per execution, newest day first.
    pub fn to_csv(&self) -> String {
        let mut rows: Vec<&Execution> = self.all_executions.iter().collect();
        rows.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));

        let mut out = String::from(
            "Date,User,User Email,Project,Test Cycle,Test Suite,Test Stage,Test Name,Test Case ID,Duration (minutes),Status",
        );
        for e in rows {
            let text = [
                e.execution_date.as_str(),
                e.user.as_str(),
                e.user_email.as_str(),
                e.project_name.as_str(),
                e.test_cycle.as_deref().unwrap_or(""),
                e.test_suite.as_deref().unwrap_or(""),
                e.test_stage.as_deref().unwrap_or(""),
                e.test_name.as_str(),
            ]
            .map(csv_field)
            .join(",");
            out.push('\n');
            out.push_str(&format!(
                "{text},{},{},{}",
                e.test_case_id,
                e.duration_minutes,
                csv_field(&e.status)
            ));
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(date: &str, user: &str, case: Id) -> Execution {
        Execution {
            test_name: format!("Case {case}"),
            test_case_id: case,
            execution_date: date.into(),
            start_time: format!("{date}T10:00:00Z"),
            end_time: format!("{date}T10:01:30Z"),
            duration_minutes: 1.5,
            status: "Passed".into(),
            user: user.into(),
            user_email: format!("{}@shop.io", user.to_lowercase()),
            project_name: "Shop".into(),
            test_cycle: Some("Sprint".into()),
            test_suite: Some("Login".into()),
            test_stage: None,
        }
    }

    #[test]
    fn duration_rounds_to_hundredths() {
        assert_eq!(duration_minutes(0, 90_000), 1.5);
        assert_eq!(duration_minutes(0, 1_000), 0.02);
        assert_eq!(duration_minutes(0, 0), 0.0);
    }

    #[test]
    fn stage_lookup_prefers_the_most_specific_key() {
        let mut mapping = StageMapping::default();
        mapping.insert("Sprint", "Nightly");
        let mut e = exec("2024-03-05", "Ann", 1);
        assert_eq!(execution_stage(&mapping, &e).as_deref(), Some("Nightly"));

        mapping.insert("Login", "Smoke");
        assert_eq!(execution_stage(&mapping, &e).as_deref(), Some("Smoke"));
        mapping.insert("Shop / Sprint / Login", "Regression");
        assert_eq!(execution_stage(&mapping, &e).as_deref(), Some("Regression"));

        e.test_cycle = None;
        assert_eq!(execution_stage(&mapping, &e).as_deref(), Some("Smoke"));
        e.test_suite = None;
        assert_eq!(execution_stage(&mapping, &e), None);
    }

    #[test]
    fn groups_newest_day_first_then_by_user() {
        let execs = vec![
            exec("2024-03-04", "Bob", 1),
            exec("2024-03-05", "Bob", 2),
            exec("2024-03-05", "Ann", 3),
            exec("2024-03-05", "Bob", 4),
        ];
        let groups = group_by_day_and_user(&execs);
        let keys: Vec<_> = groups.iter().map(|g| (g.date.as_str(), g.user.as_str(), g.tests.len())).collect();
        assert_eq!(
            keys,
            vec![("2024-03-05", "Ann", 1), ("2024-03-05", "Bob", 2), ("2024-03-04", "Bob", 1)]
        );
        let bob: Vec<_> = groups[1].tests.iter().map(|t| t.test_case_id).collect();
        assert_eq!(bob, vec![2, 4]);
    }

    #[test]
    fn summary_counts_distinct_users_and_tests() {
        let mut staged = exec("2024-03-05", "Ann", 1);
        staged.test_stage = Some("Smoke".into());
        let execs = vec![staged, exec("2024-03-05", "Bob", 1), exec("2024-03-06", "Ann", 2)];
        let period = ReportPeriod {
            start: "2024-02-28".into(),
            end: "2024-03-06".into(),
        };

        let report = ExecutionReport::build("now".into(), period.clone(), execs.clone(), true);
        assert_eq!(report.summary.total_executions, 3);
        assert_eq!(report.summary.unique_users, 2);
        assert_eq!(report.summary.unique_tests, 2);
        assert_eq!(report.summary.projects, vec!["Shop"]);
        assert_eq!(report.summary.test_stages, Some(vec!["Smoke".to_string()]));
        assert_eq!(report.executions_by_date_and_user.len(), 3);

        let plain = ExecutionReport::build("now".into(), period, execs, false);
        assert_eq!(plain.summary.test_stages, None);
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json["summary"].get("testStages").is_none());
        assert_eq!(json["allExecutions"][0]["testCycle"], "Sprint");
    }

    #[test]
    fn csv_quotes_text_and_sorts_newest_first() {
        let mut odd = exec("2024-03-04", "Bob", 7);
        odd.test_name = "Say \"hi\", twice".into();
        let period = ReportPeriod {
            start: "ALL TIME".into(),
            end: "2024-03-05".into(),
        };
        let report = ExecutionReport::build(
            "now".into(),
            period,
            vec![odd, exec("2024-03-05", "Ann", 1)],
            false,
        );
        let csv = report.to_csv();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Date,User,"));
        assert_eq!(
            lines[1],
            "\"2024-03-05\",\"Ann\",\"ann@shop.io\",\"Shop\",\"Sprint\",\"Login\",\"\",\"Case 1\",1,1.5,\"Passed\""
        );
        assert!(lines[2].contains("\"Say \"\"hi\"\", twice\",7,1.5,"));
    }
}
