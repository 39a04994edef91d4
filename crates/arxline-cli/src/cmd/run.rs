//! `arxline run` - harvest an owner's papers
//!
//! The metadata, source and references stages run side by side on their own
//! threads and only meet again in the final report.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use arxline_arxiv::{ArxivClient, Assignment, MetadataStage, PaperId};
use arxline_core::{
    SharedProgress, SharedTelemetry, Telemetry, cleanup_tmp_files, is_shutdown_requested,
    wait_or_abandon,
};
use arxline_semantic_scholar::{ReferencesStage, ReferencesSummary, S2Client};
use arxline_source::{
    PaperOutcome, PaperPipeline, RunSummary, SkipCache, SourceConfig, run_all, scan_corpus,
    sweep_stale_scratch,
};

use crate::config::Config;

/// Exit code after SIGINT/SIGTERM
const EXIT_INTERRUPTED: u8 = 130;
/// Exit code when the single requested paper failed
const EXIT_PAPER_FAILED: u8 = 2;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Owner id as listed in the assignments file
    pub owner: String,

    /// Process at most this many papers from the assigned range
    pub max_papers: Option<usize>,

    /// Process one paper only (references + source)
    #[arg(long)]
    pub paper: Option<String>,

    /// Number of parallel download workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Copy .bib files regardless of size
    #[arg(long)]
    pub no_skip_large_bib: bool,

    /// Size above which .bib files are skipped, in MB
    #[arg(long)]
    pub bib_threshold_mb: Option<f64>,

    /// Count papers without any source as failed instead of skipped
    #[arg(long)]
    pub fail_missing_source: bool,

    /// Highest version number tried per paper
    #[arg(long)]
    pub max_versions: Option<u32>,

    /// Stages to run (comma-separated)
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_value = "metadata,source,references"
    )]
    pub stages: Vec<Stage>,

    /// Data directory (papers land in <data-dir>/<owner>/)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Assignments CSV
    #[arg(long)]
    pub assignments: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
pub enum Stage {
    Metadata,
    Source,
    References,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Source => "source",
            Self::References => "references",
        }
    }
}

/// What a stage thread hands back
enum StageResult {
    Metadata(usize),
    Source(RunSummary),
    References(ReferencesSummary),
}

impl StageResult {
    fn log(&self) {
        match self {
            Self::Metadata(n) => log::info!("Metadata stage: {n} papers with metadata"),
            Self::Source(s) => s.log(),
            Self::References(s) => s.log(),
        }
    }
}

/// Everything shared by the stage threads
struct RunContext {
    owner: String,
    data_root: PathBuf,
    cache_dir: PathBuf,
    source_config: SourceConfig,
    reference_workers: usize,
    arxiv: Arc<ArxivClient>,
    s2: Arc<S2Client>,
    telemetry: SharedTelemetry,
    progress: SharedProgress,
}

impl RunContext {
    fn cache_path(&self, kind: &str) -> PathBuf {
        self.cache_dir.join(format!("{}_{kind}.json", self.owner))
    }
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| config.output.data_dir.clone());
    let data_root = data_dir.join(&args.owner);
    let cache_dir = config.output.cache_dir.clone();
    std::fs::create_dir_all(&data_root)
        .with_context(|| format!("Cannot create {}", data_root.display()))?;
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Cannot create {}", cache_dir.display()))?;

    let swept = sweep_stale_scratch(&data_root);
    if swept > 0 {
        log::info!("Removed {swept} scratch directories left by an earlier run");
    }
    match cleanup_tmp_files(&cache_dir) {
        Ok(0) => {}
        Ok(n) => log::info!("Removed {n} partial cache files"),
        Err(e) => log::warn!("Cannot clean {}: {e}", cache_dir.display()),
    }

    let telemetry = Telemetry::shared();
    let ctx = Arc::new(RunContext {
        owner: args.owner.clone(),
        data_root,
        cache_dir,
        source_config: source_config(&args, config),
        reference_workers: config.workers.references,
        arxiv: Arc::new(ArxivClient::new(config.arxiv_config(), Some(telemetry.clone()))),
        s2: Arc::new(S2Client::new(config.s2_config(), Some(telemetry.clone()))),
        telemetry,
        progress: progress.clone(),
    });

    match &args.paper {
        Some(paper) => run_single(&ctx, paper, &args.stages),
        None => run_owner(&ctx, &args, config),
    }
}

fn source_config(args: &RunArgs, config: &Config) -> SourceConfig {
    let mut source = config.source_config();
    if let Some(w) = args.workers {
        source.workers = w;
    }
    if let Some(mb) = args.bib_threshold_mb {
        source = source.with_bib_threshold_mb(mb);
    }
    if args.no_skip_large_bib {
        source.collect.skip_large_bib = false;
    }
    if args.fail_missing_source {
        source.skip_missing_source = false;
    }
    if let Some(n) = args.max_versions {
        source.max_versions = n;
    }
    source
}

fn run_owner(ctx: &Arc<RunContext>, args: &RunArgs, config: &Config) -> Result<ExitCode> {
    let assignments = args
        .assignments
        .clone()
        .unwrap_or_else(|| config.output.assignments.clone());
    let assignment = Assignment::lookup(&assignments, &args.owner)?;
    let mut ids = assignment.paper_ids();
    if let Some(n) = args.max_papers {
        ids.truncate(n);
    }
    log::info!(
        "{}: {} papers ({} to {})",
        args.owner,
        ids.len(),
        ids.first().map(PaperId::as_str).unwrap_or("-"),
        ids.last().map(PaperId::as_str).unwrap_or("-"),
    );
    let ids = Arc::new(ids);

    let mut handles = Vec::new();
    for stage in [Stage::Metadata, Stage::Source, Stage::References] {
        if !args.stages.contains(&stage) {
            continue;
        }
        let telemetry = ctx.telemetry.clone();
        let (ctx, ids) = (Arc::clone(ctx), Arc::clone(&ids));
        let handle = spawn_stage(stage, telemetry, move || run_stage(stage, &ctx, &ids))?;
        handles.push((stage, handle));
    }

    let mut failed_stages = 0;
    for (stage, handle) in handles {
        match wait_or_abandon(handle) {
            None => return Ok(interrupted(ctx, "performance_report.json")),
            Some(Ok(Ok(result))) => result.log(),
            Some(Ok(Err(e))) => {
                log::error!("{} stage failed: {e:#}", stage.name());
                failed_stages += 1;
            }
            Some(Err(_)) => {
                log::error!("{} stage panicked", stage.name());
                failed_stages += 1;
            }
        }
    }
    if is_shutdown_requested() {
        return Ok(interrupted(ctx, "performance_report.json"));
    }

    match scan_corpus(&ctx.data_root) {
        Ok(stats) => {
            stats.apply_to(&ctx.telemetry);
            if ctx.progress.is_tty() {
                stats.print();
            } else {
                stats.log();
            }
        }
        Err(e) => log::warn!("Cannot scan {}: {e}", ctx.data_root.display()),
    }
    write_report(ctx, "performance_report.json");

    if failed_stages > 0 {
        log::error!("{failed_stages} stage(s) failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Run one stage to completion on the calling thread.
fn run_stage(stage: Stage, ctx: &RunContext, ids: &[PaperId]) -> Result<StageResult> {
    match stage {
        Stage::Metadata => {
            let line = ctx.progress.stage_line("metadata");
            line.set_message(format!("{} papers", ids.len()));
            let metadata = MetadataStage {
                source: &*ctx.arxiv,
                data_root: ctx.data_root.clone(),
                cache_path: ctx.cache_path("metadata"),
                telemetry: ctx.telemetry.clone(),
            };
            let n = metadata.run(ids);
            line.finish_and_clear();
            Ok(StageResult::Metadata(n?))
        }
        Stage::Source => {
            let pb = ctx.progress.papers_bar("source", ids.len() as u64);
            let cache = SkipCache::load(&ctx.cache_path("downloaded"));
            let pipeline = PaperPipeline {
                source: &*ctx.arxiv,
                cache: &cache,
                data_root: ctx.data_root.clone(),
                config: ctx.source_config.clone(),
                telemetry: ctx.telemetry.clone(),
            };
            let summary = run_all(&pipeline, ids, &pb);
            pb.finish_and_clear();
            Ok(StageResult::Source(summary?))
        }
        Stage::References => {
            let pb = ctx.progress.papers_bar("references", ids.len() as u64);
            let references = ReferencesStage {
                source: &*ctx.s2,
                data_root: ctx.data_root.clone(),
                cache_path: ctx.cache_path("references"),
                workers: ctx.reference_workers,
                telemetry: ctx.telemetry.clone(),
            };
            let summary = references.run(ids, &pb);
            pb.finish_and_clear();
            Ok(StageResult::References(summary?))
        }
    }
}

fn spawn_stage<F>(
    stage: Stage,
    telemetry: SharedTelemetry,
    f: F,
) -> Result<JoinHandle<Result<StageResult>>>
where
    F: FnOnce() -> Result<StageResult> + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("stage-{}", stage.name()))
        .spawn(move || {
            let start = Instant::now();
            let result = f();
            telemetry.record_stage(stage.name(), start.elapsed());
            result
        })
        .with_context(|| format!("Failed to start {} stage", stage.name()))
}

/// `--paper ID`: references and source for one paper, no metadata stage.
fn run_single(ctx: &Arc<RunContext>, paper: &str, stages: &[Stage]) -> Result<ExitCode> {
    let id: PaperId = paper
        .parse()
        .with_context(|| format!("Invalid paper id: {paper}"))?;
    let ids = [id.clone()];
    log::info!("Single-paper mode: {id}");

    for stage in [Stage::References, Stage::Source] {
        if !stages.contains(&stage) || is_shutdown_requested() {
            continue;
        }
        let start = Instant::now();
        let result = run_stage(stage, ctx, &ids);
        ctx.telemetry.record_stage(stage.name(), start.elapsed());
        match result {
            Ok(StageResult::Source(summary)) => {
                summary.log();
                let outcome = summary.outcomes.first().map(|(_, o)| *o);
                if let Some(outcome) = outcome {
                    log::info!("{id}: {outcome}");
                }
                if is_shutdown_requested() {
                    return Ok(interrupted(ctx, "performance_report_single.json"));
                }
                write_report(ctx, "performance_report_single.json");
                if outcome == Some(PaperOutcome::Failed) {
                    return Ok(ExitCode::from(EXIT_PAPER_FAILED));
                }
                return Ok(ExitCode::SUCCESS);
            }
            Ok(other) => other.log(),
            Err(e) => log::error!("{} stage failed: {e:#}", stage.name()),
        }
    }
    if is_shutdown_requested() {
        return Ok(interrupted(ctx, "performance_report_single.json"));
    }
    write_report(ctx, "performance_report_single.json");
    Ok(ExitCode::SUCCESS)
}

fn write_report(ctx: &RunContext, file_name: &str) {
    let report = ctx.telemetry.report();
    let path = ctx.data_root.join(file_name);
    match report.write(&path) {
        Ok(()) => log::info!("Performance report saved to {}", path.display()),
        Err(e) => log::error!("Cannot write {}: {e}", path.display()),
    }
    if ctx.progress.is_tty() {
        report.print();
    } else {
        report.log();
    }
}

/// Save what telemetry has so far and leave without joining stage threads.
fn interrupted(ctx: &RunContext, report_name: &str) -> ExitCode {
    log::warn!("Interrupted. Progress is saved; rerun the same command to resume.");
    let path = ctx.data_root.join(report_name);
    if let Err(e) = ctx.telemetry.report().write(&path) {
        log::warn!("Cannot write {}: {e}", path.display());
    }
    ExitCode::from(EXIT_INTERRUPTED)
}
