use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use qbridge_client::api::{project_path, NodeRow};
use qbridge_client::error_log::DEFAULT_LOG_FILE;
use qbridge_client::export::{ALL_DAYS, DEFAULT_DAYS};
use qbridge_client::hierarchy::BoxFuture;
use qbridge_client::recommendations::source_from_config;
use qbridge_client::{
    estimate_drift, is_actionable, list_projects, Anchor, AnchorKind, BundleWriter,
    DesignTreeReader, ErrorLog, ExecutionTreeReader, ExportWindow, Exporter, HierarchyReader,
    HttpTransport, MirrorEngine, RecommendationRequest, RunTarget, StatusApplier, StatusContext,
    SyncEndpointClock, Transport, TransportClock,
};
use qbridge_core::{
    filter_by_stage_and_exclusion, format_date, format_iso, now_ms, ApplySummary, Config, ExclusionSet, Id,
    RecommendationRecord, TreeNode, DEFAULT_CONFIG_FILE, PATH_SEPARATOR,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "qbridge", version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory for bundles, result files and the error log
    #[arg(long, default_value = "output")]
    output: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AnchorArg {
    Root,
    Release,
    Cycle,
    Suite,
}

impl From<AnchorArg> for AnchorKind {
    fn from(a: AnchorArg) -> Self {
        match a {
            AnchorArg::Root => AnchorKind::Root,
            AnchorArg::Release => AnchorKind::Release,
            AnchorArg::Cycle => AnchorKind::Cycle,
            AnchorArg::Suite => AnchorKind::Suite,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List projects
    Projects,

    /// Mirror a design module into the execution tree and mark recommended skips
    Import {
        #[arg(long)]
        project: Id,
        #[arg(long, value_enum, default_value_t = AnchorArg::Root)]
        anchor: AnchorArg,
        #[arg(long)]
        anchor_id: Option<Id>,
        #[arg(long)]
        module: Id,
        #[arg(long)]
        include_unapproved: bool,
        #[arg(long)]
        user: Option<String>,
        /// Status to apply to skipped runs; saved to the configuration
        #[arg(long)]
        skip_status: Option<String>,
        /// Only report what would be created
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply recommendations to the runs of an existing suite
    Recommend {
        #[arg(long)]
        project: Id,
        #[arg(long)]
        suite: Id,
        /// Suite path as shown by `tree`, e.g. "Shop / Sprint 4 / Login"
        #[arg(long)]
        path: String,
        /// Stage to use (and remember) when the path has no mapping
        #[arg(long)]
        stage: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        skip_status: Option<String>,
    },

    /// Export execution history as per-stage event bundles
    Extract {
        #[arg(long, default_value_t = DEFAULT_DAYS, conflicts_with = "all", value_parser = days_parser())]
        days: i64,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        project: Option<Id>,
    },

    /// Report executions per day and user, as JSON and CSV
    Report {
        #[arg(long, default_value_t = DEFAULT_DAYS, conflicts_with = "all", value_parser = days_parser())]
        days: i64,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        project: Option<Id>,
        /// Keep only executions mapped to this stage
        #[arg(long)]
        stage: Option<String>,
    },

    /// Print the execution tree, or the design tree with --modules
    Tree {
        #[arg(long)]
        project: Id,
        #[arg(long)]
        modules: bool,
    },
}

fn days_parser() -> clap::builder::RangedI64ValueParser<i64> {
    clap::value_parser!(i64).range(1..=ALL_DAYS)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let run_id = Uuid::new_v4();
    info!(%run_id, "qbridge starting");

    let mut cfg = Config::load_from(&cli.config)?;
    let http = HttpTransport::from_config(&cfg)?;
    http.authenticate().await.context("authenticating")?;
    let transport: Arc<dyn Transport> = Arc::new(http);

    match cli.cmd {
        Cmd::Projects => {
            let projects = list_projects(&*transport).await.context("listing projects")?;
            for p in &projects {
                println!("{:>8}  {}", p.id, p.name);
            }
            println!("{} projects", projects.len());
        }
        Cmd::Import {
            project,
            anchor,
            anchor_id,
            module,
            include_unapproved,
            user,
            skip_status,
            dry_run,
        } => {
            remember_skip_status(&mut cfg, &cli.config, skip_status)?;
            let anchor = match (AnchorKind::from(anchor), anchor_id) {
                (AnchorKind::Root, _) => Anchor::root(),
                (kind, Some(id)) => Anchor::new(kind, id),
                (kind, None) => bail!("--anchor-id is required for a {kind:?} anchor"),
            };
            let opts = ImportOpts {
                project,
                anchor,
                module,
                include_unapproved,
                user,
                dry_run,
            };
            import(&cfg, transport, &cli.output, opts).await?;
        }
        Cmd::Recommend {
            project,
            suite,
            path,
            stage,
            user,
            skip_status,
        } => {
            remember_skip_status(&mut cfg, &cli.config, skip_status)?;
            let opts = RecommendOpts {
                project,
                suite,
                path,
                stage,
                user,
            };
            recommend(&mut cfg, &cli.config, transport, &cli.output, opts).await?;
        }
        Cmd::Extract { days, all, project } => {
            let days = if all { ALL_DAYS } else { days };
            extract(&cfg, transport, &cli.output, days, project).await?;
        }
        Cmd::Report {
            days,
            all,
            project,
            stage,
        } => {
            let days = if all { ALL_DAYS } else { days };
            report(&cfg, transport, &cli.output, days, all, project, stage).await?;
        }
        Cmd::Tree { project, modules } => {
            let root = find_project(&*transport, project).await?;
            let reader: Box<dyn HierarchyReader> = if modules {
                Box::new(DesignTreeReader::new(transport))
            } else {
                Box::new(ExecutionTreeReader::new(transport))
            };
            println!("{}", reader.format_path(&root));
            print_tree(&*reader, &root).await;
        }
    }
    Ok(())
}

fn remember_skip_status(cfg: &mut Config, path: &Path, skip_status: Option<String>) -> anyhow::Result<()> {
    let Some(name) = skip_status else {
        return Ok(());
    };
    if cfg.skip_status_name() != name {
        cfg.recommendations.skip_status_name = Some(name);
        cfg.save_to(path)
            .with_context(|| format!("saving {}", path.display()))?;
        info!("skip status saved to {}", path.display());
    }
    Ok(())
}

async fn find_project(transport: &dyn Transport, project_id: Id) -> anyhow::Result<TreeNode> {
    list_projects(transport)
        .await
        .context("listing projects")?
        .into_iter()
        .find(|p| p.id == project_id)
        .with_context(|| format!("project with ID {project_id} not found"))
}

fn print_tree<'a>(reader: &'a dyn HierarchyReader, node: &'a TreeNode) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        for child in reader.children(node).await {
            println!("{}", reader.format_path(&child));
            print_tree(reader, &child).await;
        }
    })
}

struct ImportOpts {
    project: Id,
    anchor: Anchor,
    module: Id,
    include_unapproved: bool,
    user: Option<String>,
    dry_run: bool,
}

async fn import(
    cfg: &Config,
    transport: Arc<dyn Transport>,
    output: &Path,
    opts: ImportOpts,
) -> anyhow::Result<()> {
    let project = find_project(&*transport, opts.project).await?;
    let module_path = project_path(project.id, &format!("modules/{}", opts.module));
    let module: NodeRow = transport
        .get(&module_path, &[])
        .await
        .and_then(|r| r.decode(&module_path))
        .with_context(|| format!("module {} not found", opts.module))?;

    let subtree = DesignTreeReader::new(transport.clone())
        .build_subtree(project.id, module.id, module.name, opts.include_unapproved)
        .await;
    if subtree.total_leaves() == 0 {
        bail!("module \"{}\" has no test cases to import", subtree.container_name);
    }
    println!(
        "{} test cases in {} containers under \"{}\"",
        subtree.total_leaves(),
        subtree.total_containers(),
        subtree.container_name
    );
    if opts.dry_run {
        println!("dry run: nothing created");
        return Ok(());
    }

    let applier = StatusApplier::new(transport.clone());
    let mut ctx = StatusContext::new();
    let status = applier
        .require_status(&mut ctx, project.id, cfg.skip_status_name())
        .await
        .context("resolving skip status")?;
    let user = cfg.select_user(opts.user.as_deref())?;

    let source = source_from_config(cfg, &std::env::current_dir()?)?;
    let response = source
        .recommendations(&RecommendationRequest {
            project_name: project.name.clone(),
            test_stage: None,
            user_email: user.email.clone(),
            lab_id: user.lab_id.clone(),
        })
        .await
        .context("loading recommendations")?;
    let stage = response.metadata.test_stage.clone();
    let exclusions = ExclusionSet::from_response(&response);
    if is_actionable(&response) && exclusions.is_empty() {
        bail!("no excluded tests in the recommendations for \"{stage}\"");
    }

    let errors = Arc::new(ErrorLog::create(output, DEFAULT_LOG_FILE)?);
    let engine = MirrorEngine::new(transport.clone(), errors.clone(), project.id);
    let records = engine.mirror(&subtree, opts.anchor).await;
    let created = records.iter().filter(|r| r.created).count();
    println!("{created}/{} test runs created", records.len());

    if !is_actionable(&response) {
        println!(
            "recommendations for \"{stage}\" not applicable ({:?}, full run: {}); nothing skipped",
            response.metadata.status, response.metadata.is_full_run
        );
    } else {
        let selection = filter_by_stage_and_exclusion(
            &records,
            &cfg.test_stage_mapping,
            &project.name,
            &stage,
            &exclusions,
        );
        println!(
            "stage \"{stage}\": {} runs in stage, {} selected for skipping",
            selection.in_stage,
            selection.selected.len()
        );
        let targets: Vec<RunTarget> = selection.selected.iter().filter_map(RunTarget::from_created).collect();
        let results = applier.apply(project.id, &targets, &status, &*errors).await;
        let summary = ApplySummary::from_results(&results);
        println!(
            "\"{}\" applied to {}/{} runs",
            status.name, summary.successfully_applied, summary.total_recommendations
        );
    }

    errors.write_summary();
    if errors.has_errors() {
        println!("{} errors logged to {}", errors.summary().total, errors.path().display());
    }
    Ok(())
}

struct RecommendOpts {
    project: Id,
    suite: Id,
    path: String,
    stage: Option<String>,
    user: Option<String>,
}

async fn recommend(
    cfg: &mut Config,
    config_path: &Path,
    transport: Arc<dyn Transport>,
    output: &Path,
    opts: RecommendOpts,
) -> anyhow::Result<()> {
    let project = find_project(&*transport, opts.project).await?;
    let segments: Vec<String> = opts.path.split(PATH_SEPARATOR).map(str::to_string).collect();

    let stage = match (cfg.test_stage_mapping.resolve_path(&segments), opts.stage) {
        (Some(hit), _) => {
            info!("stage \"{}\" from mapping \"{}\"", hit.stage, hit.key);
            hit.stage
        }
        (None, Some(stage)) => {
            cfg.test_stage_mapping.insert(opts.path.clone(), stage.clone());
            cfg.save_to(config_path)
                .with_context(|| format!("saving {}", config_path.display()))?;
            info!("mapping \"{}\" -> \"{stage}\" saved", opts.path);
            stage
        }
        (None, None) => bail!("no test stage mapped for \"{}\"; pass --stage", opts.path),
    };
    let user = cfg.select_user(opts.user.as_deref())?;

    let applier = StatusApplier::new(transport.clone());
    let mut ctx = StatusContext::new();
    let status = applier
        .require_status(&mut ctx, project.id, cfg.skip_status_name())
        .await
        .context("resolving skip status")?;

    let source = source_from_config(cfg, &std::env::current_dir()?)?;
    let response = source
        .recommendations(&RecommendationRequest {
            project_name: project.name.clone(),
            test_stage: Some(stage.clone()),
            user_email: user.email.clone(),
            lab_id: user.lab_id.clone(),
        })
        .await
        .context("loading recommendations")?;
    let exclusions = ExclusionSet::from_response(&response);
    if is_actionable(&response) && exclusions.is_empty() {
        bail!("no excluded tests in the recommendations for \"{stage}\"");
    }

    let runs = ExecutionTreeReader::new(transport.clone())
        .runs(project.id, opts.suite)
        .await
        .with_context(|| format!("listing runs of suite {}", opts.suite))?;
    let targets: Vec<RunTarget> = runs
        .iter()
        .filter(|r| exclusions.contains(&r.name))
        .map(RunTarget::from)
        .collect();
    println!("{} runs in suite, {} recommended to skip", runs.len(), targets.len());

    let errors = ErrorLog::create(output, DEFAULT_LOG_FILE)?;
    let results = if is_actionable(&response) {
        applier.apply(project.id, &targets, &status, &errors).await
    } else {
        println!("recommendations not applicable; nothing skipped");
        vec![]
    };
    let summary = ApplySummary::from_results(&results);
    println!(
        "\"{}\" applied to {}/{} runs",
        status.name, summary.successfully_applied, summary.total_recommendations
    );

    let record = RecommendationRecord {
        timestamp: format_iso(now_ms()),
        project: project.name.clone(),
        project_id: project.id,
        test_stage: stage,
        user: user.email,
        lab_id: user.lab_id,
        path: opts.path,
        skip_status: status.name.clone(),
        sealights_metadata: response.metadata,
        recommendations: results,
        summary,
    };
    let saved = BundleWriter::new(output)?.write_record(&record)?;
    println!("results saved to {}", saved.display());
    errors.write_summary();
    Ok(())
}

async fn extract(
    cfg: &Config,
    transport: Arc<dyn Transport>,
    output: &Path,
    days: i64,
    project: Option<Id>,
) -> anyhow::Result<()> {
    let drift_ms = estimate_drift(
        &TransportClock::new(transport.clone()),
        &SyncEndpointClock::from_config(cfg),
    )
    .await;
    let window = ExportWindow::last_days(now_ms(), days);
    info!(
        "extracting logs from {} to {}",
        format_iso(window.start_ms),
        format_iso(window.end_ms)
    );

    let writer = BundleWriter::new(output)?;
    let report = Exporter::new(transport, cfg)
        .run(window, project, drift_ms, &writer)
        .await?;
    println!(
        "{} logs, {} events in {} bundles (clock drift {drift_ms}ms)",
        report.total_logs,
        report.total_events(),
        report.bundles.len()
    );
    if let Some(path) = &report.summary_path {
        println!("summary: {}", path.display());
    }
    Ok(())
}

async fn report(
    cfg: &Config,
    transport: Arc<dyn Transport>,
    output: &Path,
    days: i64,
    all_time: bool,
    project: Option<Id>,
    stage: Option<String>,
) -> anyhow::Result<()> {
    let window = ExportWindow::last_days(now_ms(), days);
    let report = Exporter::new(transport, cfg)
        .report(window, all_time, project, stage.as_deref())
        .await?;
    if report.all_executions.is_empty() {
        println!("no executions between {} and {}", report.period.start, report.period.end);
        if stage.is_some() && !cfg.test_stage_mapping.is_empty() {
            let stages: BTreeSet<&str> = cfg.test_stage_mapping.stages().collect();
            println!("mapped stages: {}", stages.into_iter().collect::<Vec<_>>().join(", "));
        }
        return Ok(());
    }

    println!("executions {} to {}", report.period.start, report.period.end);
    for day in &report.executions_by_date_and_user {
        println!("{}  {} ({}): {} tests", day.date, day.user, day.user_email, day.tests.len());
        for t in &day.tests {
            println!(
                "    [{}] {} (ID: {}) {} min{}",
                t.status,
                t.test_name,
                t.test_case_id,
                t.duration_minutes,
                t.test_stage.as_deref().map(|s| format!(" [{s}]")).unwrap_or_default()
            );
        }
    }

    let summary = &report.summary;
    println!(
        "{} executions, {} users, {} tests in {}",
        summary.total_executions,
        summary.unique_users,
        summary.unique_tests,
        summary.projects.join(", ")
    );
    let (json_path, csv_path) =
        BundleWriter::new(output)?.write_report(&report, &format_date(now_ms()))?;
    println!("report saved to {} and {}", json_path.display(), csv_path.display());
    Ok(())
}
