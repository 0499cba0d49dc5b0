use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use grader_core::{
    grading::{self, Candidate, GradingSession},
    style,
};

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Directory whose subdirectories are the candidates
    #[arg()] // positional argument
    pub candidates_dir: PathBuf,

    /// Grade only this candidate (also GRADER_TARGET_ONLY)
    #[arg(long)]
    pub only: Option<String>,

    /// Run only these suites
    #[arg(short, long)]
    pub suite: Vec<String>,

    /// Number of candidates graded at once
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let (cfg, env) = util::load_config(global_args)?;
    let session = Arc::new(GradingSession::from_config(&cfg, &args.suite)?);

    let only = args.only.as_deref().or(env.target_only.as_deref());
    let candidates = grading::select_target(Candidate::discover(&args.candidates_dir)?, only)?;
    let jobs = args.jobs.unwrap_or_else(grading::default_worker_count);
    log::info!(
        "Grading {} candidates with {} workers",
        candidates.len(),
        jobs
    );

    let results = session.clone().grade_all(candidates, jobs).await;
    println!();

    let mut num_errors = 0;
    for (cand, res) in &results {
        match res {
            Ok(r) => {
                style::print_candidate_summary(&cand.id, &r.summaries, &session.verdicts_of(&cand.id));
                style::print_suite_scores(&r.summaries);
            }
            Err(e) => {
                num_errors += 1;
                log::error!("{}: {:#}", cand.id, e);
            }
        }
    }

    let ledger_file = session.write_ledger()?;
    println!(
        "Results saved to {}",
        util::replace_homedir_to_tilde(ledger_file)
            .to_string_lossy()
            .bold()
    );

    anyhow::ensure!(num_errors == 0, "{} candidates could not be graded", num_errors);
    Ok(())
}

