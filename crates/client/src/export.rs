//! Execution-history export: per-stage event bundles on disk.

use crate::api::{get_list, parent_params, project_path, NodeRow, ParentType, RunRow, TestCaseRow, TestLogRow, UserRow};
use crate::hierarchy::list_projects;
use crate::transport::Transport;
use anyhow::{bail, Context};
use qbridge_core::{
    duration_minutes, execution_stage, format_date, format_iso, materialize, merge_events,
    parse_timestamp, Config, EpochMs, Execution, ExecutionReport, ExportSummary, Id, RawLog,
    RecommendationRecord, ReportPeriod, StageBundle, StageMapping, TreeNode, PATH_SEPARATOR,
    UNKNOWN_USER,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_DAYS: i64 = 7;
/// Look-back used when everything is requested.
pub const ALL_DAYS: i64 = 3650;
pub const SUMMARY_FILE: &str = "_summary.json";
/// Period start label of a report that covers everything.
pub const ALL_TIME: &str = "ALL TIME";

const DAY_MS: i64 = 86_400_000;

/// File name of a bundle: lower-case, runs of anything other than ASCII
/// letters, digits and `-` collapsed to a single `_`.
pub fn bundle_file_name(project_name: &str, test_stage: &str) -> String {
    let mut safe = String::new();
    for c in format!("{project_name}___{test_stage}").chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            safe.push(c.to_ascii_lowercase());
        } else if !safe.ends_with('_') {
            safe.push('_');
        }
    }
    format!("{safe}.json")
}

/// Writes bundles into one directory, merging with what is already there.
pub struct BundleWriter {
    dir: PathBuf,
}

impl BundleWriter {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a bundle. Events already on disk for the same project and stage
    /// are kept and merged in start order. Returns the path and what was written.
    pub fn write(&self, mut bundle: StageBundle) -> anyhow::Result<(PathBuf, StageBundle)> {
        let path = self
            .dir
            .join(bundle_file_name(&bundle.project_name, &bundle.test_stage));
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let existing: StageBundle = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            bundle.events = merge_events(existing.events, std::mem::take(&mut bundle.events));
        }
        std::fs::write(&path, serde_json::to_string_pretty(&bundle)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok((path, bundle))
    }

    pub fn write_summary(&self, extracted_at: String, bundles: &[StageBundle]) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(SUMMARY_FILE);
        let summary = ExportSummary::from_bundles(extracted_at, bundles);
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Save a daily execution report as `test-execution-report-<date>.json`
    /// and a `.csv` of the same executions. Returns both paths.
    pub fn write_report(&self, report: &ExecutionReport, date: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
        let json_path = self.dir.join(format!("test-execution-report-{date}.json"));
        std::fs::write(&json_path, serde_json::to_string_pretty(report)?)
            .with_context(|| format!("writing {}", json_path.display()))?;
        let csv_path = json_path.with_extension("csv");
        std::fs::write(&csv_path, report.to_csv())
            .with_context(|| format!("writing {}", csv_path.display()))?;
        Ok((json_path, csv_path))
    }

    /// Save the outcome of a recommendation run as `recommendations_<timestamp>.json`.
    pub fn write_record(&self, record: &RecommendationRecord) -> anyhow::Result<PathBuf> {
        let stamp = record.timestamp.replace([':', '.'], "-");
        let path = self.dir.join(format!("recommendations_{stamp}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(record)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWindow {
    pub start_ms: EpochMs,
    pub end_ms: EpochMs,
}

impl ExportWindow {
    /// The `days` days up to `now`. Negative counts give an empty-width window.
    pub fn last_days(now: EpochMs, days: i64) -> Self {
        Self {
            start_ms: now.saturating_sub(days.max(0).saturating_mul(DAY_MS)),
            end_ms: now,
        }
    }

    /// Logs are dated by when they ended; a log with no end is never inside.
    pub fn contains(&self, log: &TestLogRow) -> bool {
        log.exe_end_date
            .as_deref()
            .and_then(parse_timestamp)
            .is_some_and(|t| t >= self.start_ms && t <= self.end_ms)
    }
}

/// Bundles written by one export run, one per file on disk.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub bundles: Vec<StageBundle>,
    pub paths: Vec<PathBuf>,
    pub total_logs: usize,
    pub summary_path: Option<PathBuf>,
}

impl ExportReport {
    pub fn total_events(&self) -> usize {
        self.bundles.iter().map(|b| b.events.len()).sum()
    }

    /// Record a written bundle. A later write to the same file already holds
    /// the earlier events, so it replaces the earlier entry.
    fn record(&mut self, path: PathBuf, bundle: StageBundle) {
        match self.paths.iter().position(|p| *p == path) {
            Some(i) => self.bundles[i] = bundle,
            None => {
                self.paths.push(path);
                self.bundles.push(bundle);
            }
        }
    }
}

/// A suite to export, and the cycle it sits in (if any).
struct SuiteSource {
    id: Id,
    cycle: Option<String>,
    suite: String,
}

impl SuiteSource {
    /// `cycle / suite`, or the bare suite name at project level.
    fn name(&self) -> String {
        match &self.cycle {
            Some(cycle) => format!("{cycle}{PATH_SEPARATOR}{}", self.suite),
            None => self.suite.clone(),
        }
    }
}

/// An in-window execution log with its test case resolved.
struct LogEntry {
    name: String,
    external_id: String,
    case_id: Id,
    status: Option<String>,
    started: Option<String>,
    ended: Option<String>,
    user_id: Option<Id>,
    submitted_by: Option<String>,
}

/// Users by id, for attributing logs.
#[derive(Default)]
struct UserDirectory {
    emails: HashMap<Id, String>,
    names: HashMap<Id, String>,
}

impl UserDirectory {
    fn new(users: &[UserRow]) -> Self {
        let mut dir = Self::default();
        for u in users {
            let email = u.email().map(str::to_string).unwrap_or_else(|| format!("user_{}", u.id));
            dir.emails.insert(u.id, email);
            dir.names.insert(u.id, u.display_name());
        }
        dir
    }

    /// `(name, email)` of whoever ran a log.
    fn attribute(&self, entry: &LogEntry) -> (String, String) {
        if let Some(id) = entry.user_id {
            let email = self.emails.get(&id).cloned().unwrap_or_else(|| format!("user_{id}"));
            let name = self.names.get(&id).cloned().unwrap_or_else(|| email.clone());
            return (name, email);
        }
        match &entry.submitted_by {
            Some(by) => (by.clone(), by.clone()),
            None => (UNKNOWN_USER.to_string(), UNKNOWN_USER.to_string()),
        }
    }
}

pub struct Exporter {
    transport: Arc<dyn Transport>,
    mapping: StageMapping,
    labs: BTreeMap<String, String>,
}

impl Exporter {
    pub fn new(transport: Arc<dyn Transport>, cfg: &Config) -> Self {
        Self {
            transport,
            mapping: cfg.test_stage_mapping.clone(),
            labs: cfg.user_lab_mapping.clone(),
        }
    }

    /// Stage for a suite: the mapping of `project / suite`, else the suite name.
    pub fn stage_for(&self, project_name: &str, suite_name: &str) -> String {
        let key = format!("{project_name}{PATH_SEPARATOR}{suite_name}");
        self.mapping
            .get(&key)
            .map(str::to_string)
            .unwrap_or_else(|| suite_name.to_string())
    }

    /// Export every project (or just `project_id`) within `window`, adjusting
    /// all timestamps by `drift_ms`.
    pub async fn run(
        &self,
        window: ExportWindow,
        project_id: Option<Id>,
        drift_ms: i64,
        writer: &BundleWriter,
    ) -> anyhow::Result<ExportReport> {
        let t = &*self.transport;

        let users: Vec<UserRow> = get_list(t, "/users", &[]).await.context("listing users")?;
        let emails: HashMap<Id, String> = users
            .iter()
            .filter_map(|u| Some((u.id, u.email()?.to_string())))
            .collect();
        info!("{} users", emails.len());

        let projects = self.projects(project_id).await?;
        let mut report = ExportReport::default();
        for project in &projects {
            info!("processing project {} ({})", project.name, project.id);
            for suite in self.suites(project).await {
                let entries = self.suite_logs(project, &suite, window).await;
                if entries.is_empty() {
                    debug!("suite \"{}\": no logs in range", suite.name());
                    continue;
                }
                report.total_logs += entries.len();

                let raws: Vec<RawLog> = entries
                    .into_iter()
                    .map(|e| RawLog {
                        user_email: e.user_id.and_then(|id| emails.get(&id).cloned()),
                        name: e.name,
                        external_id: e.external_id,
                        status: e.status,
                        started: e.started,
                        ended: e.ended,
                    })
                    .collect();
                let lab_id = raws
                    .first()
                    .and_then(|r| r.user_email.as_deref())
                    .and_then(|email| self.labs.get(email))
                    .cloned();
                let bundle = StageBundle {
                    test_stage: self.stage_for(&project.name, &suite.name()),
                    project_name: project.name.clone(),
                    lab_id,
                    clock_drift_ms: drift_ms,
                    events: materialize(&raws, drift_ms),
                };
                match writer.write(bundle) {
                    Ok((path, written)) => {
                        info!("wrote {} events to {}", written.events.len(), path.display());
                        report.record(path, written);
                    }
                    Err(e) => warn!("could not write bundle for suite \"{}\": {e:#}", suite.name()),
                }
            }
        }

        if !report.bundles.is_empty() {
            let path = writer.write_summary(format_iso(window.end_ms), &report.bundles)?;
            report.summary_path = Some(path);
        }
        Ok(report)
    }

    /// Every execution in `window`, attributed to its user and tagged with
    /// cycle, suite and mapped stage. With `stage`, only that stage is kept.
    pub async fn executions(
        &self,
        window: ExportWindow,
        project_id: Option<Id>,
        stage: Option<&str>,
    ) -> anyhow::Result<Vec<Execution>> {
        let t = &*self.transport;
        let users = match get_list::<UserRow>(t, "/users", &[]).await {
            Ok(users) => users,
            Err(e) => {
                warn!("could not list users, executions keep raw user ids: {e}");
                vec![]
            }
        };
        let directory = UserDirectory::new(&users);

        let projects = self.projects(project_id).await?;
        let mut out = vec![];
        for project in &projects {
            info!("processing project {} ({})", project.name, project.id);
            for suite in self.suites(project).await {
                for entry in self.suite_logs(project, &suite, window).await {
                    let Some(end) = entry.ended.as_deref().and_then(parse_timestamp) else {
                        continue;
                    };
                    let start = entry.started.as_deref().and_then(parse_timestamp).unwrap_or(end);
                    let (user, user_email) = directory.attribute(&entry);
                    let mut exec = Execution {
                        test_name: entry.name,
                        test_case_id: entry.case_id,
                        execution_date: format_date(end),
                        start_time: entry.started.unwrap_or_default(),
                        end_time: entry.ended.unwrap_or_default(),
                        duration_minutes: duration_minutes(start, end),
                        status: entry.status.unwrap_or_default(),
                        user,
                        user_email,
                        project_name: project.name.clone(),
                        test_cycle: suite.cycle.clone(),
                        test_suite: Some(suite.suite.clone()),
                        test_stage: None,
                    };
                    exec.test_stage = execution_stage(&self.mapping, &exec);
                    out.push(exec);
                }
            }
        }

        if let Some(stage) = stage {
            let before = out.len();
            out.retain(|e| e.test_stage.as_deref() == Some(stage));
            info!("{}/{before} executions in stage \"{stage}\"", out.len());
        }
        Ok(out)
    }

    /// Daily per-user report over `window`. `all_time` only changes how the
    /// period is labelled.
    pub async fn report(
        &self,
        window: ExportWindow,
        all_time: bool,
        project_id: Option<Id>,
        stage: Option<&str>,
    ) -> anyhow::Result<ExecutionReport> {
        let executions = self.executions(window, project_id, stage).await?;
        let period = ReportPeriod {
            start: if all_time {
                ALL_TIME.to_string()
            } else {
                format_date(window.start_ms)
            },
            end: format_date(window.end_ms),
        };
        Ok(ExecutionReport::build(
            format_iso(window.end_ms),
            period,
            executions,
            !self.mapping.is_empty(),
        ))
    }

    /// All projects, or just `project_id` (an error if it does not exist).
    async fn projects(&self, project_id: Option<Id>) -> anyhow::Result<Vec<TreeNode>> {
        let mut projects = list_projects(&*self.transport).await.context("listing projects")?;
        if let Some(id) = project_id {
            projects.retain(|p| p.id == id);
            if projects.is_empty() {
                bail!("project with ID {id} not found");
            }
        }
        Ok(projects)
    }

    /// Suites inside every cycle, then project-level suites.
    async fn suites(&self, project: &TreeNode) -> Vec<SuiteSource> {
        let t = &*self.transport;
        let pid = project.project_id;
        let suites_path = project_path(pid, "test-suites");
        let mut out = vec![];

        let cycles: Vec<NodeRow> = get_list(t, &project_path(pid, "test-cycles"), &[])
            .await
            .unwrap_or_default();
        for cycle in cycles {
            match get_list::<NodeRow>(t, &suites_path, &parent_params(cycle.id, ParentType::TestCycle)).await {
                Ok(rows) => out.extend(rows.into_iter().map(|s| SuiteSource {
                    id: s.id,
                    cycle: Some(cycle.name.clone()),
                    suite: s.name,
                })),
                Err(e) => warn!("could not list suites of cycle \"{}\": {e}", cycle.name),
            }
        }

        match get_list::<NodeRow>(t, &suites_path, &[]).await {
            Ok(rows) => out.extend(rows.into_iter().map(|s| SuiteSource {
                id: s.id,
                cycle: None,
                suite: s.name,
            })),
            Err(e) => warn!("could not list project-level suites of {}: {e}", project.name),
        }
        out
    }

    async fn suite_logs(&self, project: &TreeNode, suite: &SuiteSource, window: ExportWindow) -> Vec<LogEntry> {
        let t = &*self.transport;
        let pid = project.project_id;
        let runs: Vec<RunRow> = match get_list(
            t,
            &project_path(pid, "test-runs"),
            &parent_params(suite.id, ParentType::TestSuite),
        )
        .await
        {
            Ok(runs) => runs,
            Err(e) => {
                warn!("could not list runs of suite \"{}\": {e}", suite.name());
                return vec![];
            }
        };

        let mut cases: HashMap<Id, Option<TestCaseRow>> = HashMap::new();
        let mut entries = vec![];
        for run in &runs {
            let path = project_path(pid, &format!("test-runs/{}/test-logs", run.id));
            let logs: Vec<TestLogRow> = match get_list(t, &path, &[]).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("could not fetch logs of run {}: {e}", run.id);
                    continue;
                }
            };
            for log in logs.into_iter().filter(|l| window.contains(l)) {
                let Some(case_id) = log.test_case_id() else {
                    continue;
                };
                if !cases.contains_key(&case_id) {
                    let case_path = project_path(pid, &format!("test-cases/{case_id}"));
                    let fetched = match t.get(&case_path, &[]).await {
                        Ok(resp) => resp.decode::<TestCaseRow>(&case_path).ok(),
                        Err(_) => None,
                    };
                    cases.insert(case_id, fetched);
                }
                let (name, external_id) = match cases.get(&case_id).and_then(Option::as_ref) {
                    Some(tc) => (
                        tc.name.clone(),
                        tc.external_id.clone().unwrap_or_else(|| tc.id.to_string()),
                    ),
                    None => {
                        let name = if run.name.is_empty() {
                            format!("Test Case {case_id}")
                        } else {
                            run.name.clone()
                        };
                        (name, case_id.to_string())
                    }
                };
                entries.push(LogEntry {
                    name,
                    external_id,
                    case_id,
                    status: log.status.and_then(|s| s.name),
                    started: log.exe_start_date,
                    ended: log.exe_end_date,
                    user_id: log.user_id,
                    submitted_by: log.submitted_by,
                });
            }
        }
        entries
    }
}
