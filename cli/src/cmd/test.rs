use std::path::PathBuf;

use anyhow::Context as _;
use grader_core::{
    grading::{Candidate, GradingSession},
    style,
    testing::OutcomeKind,
};

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Candidate directory (the one containing the build subdir)
    #[arg(default_value = "./")]
    pub candidate_dir: PathBuf,

    /// Run only these suites
    #[arg(short, long)]
    pub suite: Vec<String>,

    /// Runs per repeatable test
    #[arg(short = 'n', long)]
    pub iterations: Option<u32>,

    /// Hide expected/actual output of failed tests
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let (cfg, _) = util::load_config(global_args)?;
    let mut session = GradingSession::from_config(&cfg, &args.suite)?;
    if let Some(n) = args.iterations {
        session.settings_mut().iterations = n.max(1);
    }

    let dir = args
        .candidate_dir
        .canonicalize()
        .with_context(|| format!("No such directory: {:?}", args.candidate_dir))?;
    let cand = Candidate::new(dir);
    let res = session.grade_candidate(&cand).await?;

    style::print_report(&res.report);

    let verdicts = session.verdicts_of(&cand.id);
    if !args.quiet {
        for v in verdicts.iter().filter(|v| v.verdict != OutcomeKind::Passed) {
            let expected = session
                .catalog()
                .suites
                .iter()
                .find(|s| s.name == v.suite)
                .and_then(|s| s.tests.iter().find(|t| t.name == v.test))
                .and_then(|t| t.primary_reference())
                .map_or("", |r| r.content.as_str());
            style::print_output_detail(
                &format!("{}/{}", v.suite, v.test),
                v.verdict,
                expected,
                res.report.attachment(&v.suite, &v.test),
            );
        }
    }

    println!();
    style::print_candidate_summary(&cand.id, &res.summaries, &verdicts);
    println!(
        "Report saved to {}",
        util::replace_homedir_to_tilde(&res.report_file).to_string_lossy()
    );
    Ok(())
}
