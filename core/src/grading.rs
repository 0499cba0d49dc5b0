pub mod error {
    #[allow(unused_imports)]
    pub(crate) use anyhow::{anyhow, bail, ensure, Context as _};
    pub use anyhow::{Error, Result};
}
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use colored::Colorize;
use error::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;

use crate::build::ShellBuild;
use crate::config::Config;
use crate::report::{LedgerEntry, ResultsLedger, TextReport};
use crate::testing::{Catalog, RunnerSettings, SuiteSummary, TestRunner};

/// A directory holding one submission (typically a cloned repository).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub dir: PathBuf,
}

impl Candidate {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            id: fsutil::file_name_str(&dir),
            dir,
        }
    }

    /// Every non-hidden subdirectory of `root`, sorted by name.
    pub fn discover(root: impl AsRef<Path>) -> Result<Vec<Self>> {
        let dirs = fsutil::list_subdirs(&root).context("Failed to list candidates")?;
        Ok(dirs
            .into_iter()
            .map(Self::new)
            .filter(|c| !c.id.starts_with('.'))
            .collect())
    }

    pub fn build_dir(&self, subdir: impl AsRef<Path>) -> PathBuf {
        self.dir.join(subdir)
    }
}

/// Narrows `candidates` to the one named `only`, if given.
pub fn select_target(candidates: Vec<Candidate>, only: Option<&str>) -> Result<Vec<Candidate>> {
    let Some(only) = only else {
        return Ok(candidates)
    };
    let selected: Vec<_> = candidates.into_iter().filter(|c| c.id == only).collect();
    ensure!(!selected.is_empty(), "No such candidate: '{}'", only);
    Ok(selected)
}

#[derive(Debug)]
pub struct GradeReport {
    pub candidate: Candidate,
    pub summaries: Vec<SuiteSummary>,
    pub report: TextReport,
    pub report_file: PathBuf,
}

impl GradeReport {
    pub fn num_passed(&self) -> usize {
        self.summaries.iter().map(|s| s.passed).sum()
    }

    pub fn num_tests(&self) -> usize {
        self.summaries.iter().map(|s| s.total).sum()
    }
}

/// Everything shared by the workers of one grading run.
#[derive(Debug)]
pub struct GradingSession {
    catalog: Catalog,
    build: ShellBuild,
    build_subdir: PathBuf,
    settings: RunnerSettings,
    ledger: ResultsLedger,
    outputs_root: PathBuf,
    reports_dir: PathBuf,
    results_file: PathBuf,
}

impl GradingSession {
    pub const OUTPUTS_DIRNAME: &str = "test_outputs";
    pub const REPORTS_DIRNAME: &str = "reports";
    pub const RESULTS_FILENAME: &str = "results.json";

    pub fn new(cfg: &Config, catalog: Catalog, started_at: DateTime<Local>) -> Self {
        let work = &cfg.output.working_dir;
        Self {
            catalog,
            build: ShellBuild::from_config(&cfg.build),
            build_subdir: cfg.build.subdir.clone(),
            settings: RunnerSettings::from_config(cfg),
            ledger: ResultsLedger::new(),
            outputs_root: work
                .join(Self::OUTPUTS_DIRNAME)
                .join(started_at.format("%Y%m%d%H%M%S").to_string()),
            reports_dir: work.join(Self::REPORTS_DIRNAME),
            results_file: work.join(Self::RESULTS_FILENAME),
        }
    }

    /// Loads the catalog named by `cfg`, keeping only `suites` when non-empty.
    pub fn from_config(cfg: &Config, suites: &[String]) -> Result<Self> {
        let mut catalog = Catalog::load(&cfg.catalog.root, &cfg.policy, &cfg.build.extract)
            .with_context(|| format!("Failed to load testcases from {:?}", cfg.catalog.root))?;
        catalog.retain_suites(suites);
        ensure!(
            !catalog.suites.is_empty(),
            "No test suite found in {:?}",
            cfg.catalog.root
        );
        log::info!(
            "Loaded {} tests in {} suites",
            catalog.num_tests(),
            catalog.suites.len()
        );
        Ok(Self::new(cfg, catalog, Local::now()))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &ResultsLedger {
        &self.ledger
    }

    pub fn settings_mut(&mut self) -> &mut RunnerSettings {
        &mut self.settings
    }

    pub fn verdicts_of(&self, candidate: &str) -> Vec<LedgerEntry> {
        self.ledger
            .entries()
            .into_iter()
            .filter(|e| e.candidate == candidate)
            .collect()
    }

    /// Runs the whole catalog against one candidate and saves its report.
    pub async fn grade_candidate(&self, cand: &Candidate) -> Result<GradeReport> {
        log::debug!("Grading {} ({:?})", cand.id, cand.dir);
        let mut report = TextReport::new(&cand.id)
            .with_ledger(self.ledger.clone())
            .with_outputs_dir(self.outputs_root.join(&cand.id));

        let runner = TestRunner::new(&self.build, cand.build_dir(&self.build_subdir))
            .settings(self.settings.clone());
        let summaries = runner.run_catalog(&self.catalog, &mut report).await;

        let report_file = report
            .save(&self.reports_dir)
            .with_context(|| format!("Failed to save report of {}", cand.id))?;

        Ok(GradeReport {
            candidate: cand.clone(),
            summaries,
            report,
            report_file,
        })
    }

    /// Grades candidates in parallel, at most `workers` at a time.
    /// Results come back in the order of `candidates`.
    pub async fn grade_all(
        self: Arc<Self>,
        candidates: Vec<Candidate>,
        workers: usize,
    ) -> Vec<(Candidate, Result<GradeReport>)> {
        let sem = Arc::new(Semaphore::new(workers.max(1)));
        let style = ProgressStyle::default_bar()
            .template("{spinner} {msg}")
            .unwrap();
        let progress_bar_container = MultiProgress::new();

        let mut handles = Vec::with_capacity(candidates.len());
        for cand in candidates {
            let bar = progress_bar_container
                .add(ProgressBar::new_spinner())
                .with_style(style.clone())
                .with_message(format!("{} ... {}", cand.id, "waiting".dimmed()));
            let session = self.clone();
            let sem = sem.clone();
            let task_cand = cand.clone();

            let handle = tokio::spawn(async move {
                let cand = task_cand;
                let _permit = sem.acquire_owned().await?;
                bar.set_message(format!("{} ...", cand.id));
                bar.enable_steady_tick(Duration::from_millis(80));

                let res = session.grade_candidate(&cand).await;
                bar.finish_with_message(match &res {
                    Ok(r) => format!("{} ... {}/{} passed", cand.id, r.num_passed(), r.num_tests())
                        .cyan()
                        .to_string(),
                    Err(e) => format!("{} ... {:#}", cand.id, e).red().to_string(),
                });
                res
            });
            handles.push((cand, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (cand, handle) in handles {
            let res = match handle.await {
                Ok(res) => res,
                Err(e) => Err(anyhow!("Grading task of {} panicked: {}", cand.id, e)),
            };
            results.push((cand, res));
        }
        results
    }

    /// Writes every verdict recorded so far to `<working_dir>/results.json`.
    pub fn write_ledger(&self) -> Result<&Path> {
        self.ledger
            .write_json(&self.results_file)
            .context("Failed to save results")?;
        Ok(&self.results_file)
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
