use std::path::PathBuf;

use colored::Colorize;
use grader_core::similarity::{self, Metric, DEFAULT_PASS_THRESHOLD};

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// File holding the candidate's output
    #[arg()]
    pub actual: PathBuf,

    /// Reference output file
    #[arg()]
    pub expected: PathBuf,

    /// Judge with the order-sensitive metric
    #[arg(short, long)]
    pub ordered: bool,

    #[arg(short, long, default_value_t = DEFAULT_PASS_THRESHOLD)]
    pub threshold: f64,
}

pub fn exec(args: &Args, _: &GlobalArgs) -> SubcmdResult {
    let actual = fsutil::read_to_string(&args.actual)?;
    let expected = fsutil::read_to_string(&args.expected)?;

    let ordered = similarity::ordered_score(&actual, &expected);
    let set = similarity::set_score(&actual, &expected);
    println!("{:<8} {:.4}", Metric::Ordered.to_string(), ordered);
    println!("{:<8} {:.4}", Metric::Set.to_string(), set);

    let metric = Metric::for_order_sensitive(args.ordered);
    let score = if args.ordered { ordered } else { set };
    let verdict = if score >= args.threshold {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    println!("{} by {} (threshold {})", verdict, metric, args.threshold);
    Ok(())
}
