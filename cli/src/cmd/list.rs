use colored::Colorize;
use grader_core::testing::Catalog;

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// List only these suites
    #[arg(short, long)]
    pub suite: Vec<String>,
}

pub fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let (cfg, _) = util::load_config(global_args)?;
    let mut catalog = Catalog::load(&cfg.catalog.root, &cfg.policy, &cfg.build.extract)?;
    catalog.retain_suites(&args.suite);

    for suite in &catalog.suites {
        println!("{} ({} tests)", suite.name.bold(), suite.tests.len());
        for t in &suite.tests {
            let mut flags = Vec::new();
            if t.order_sensitive {
                flags.push("ordered".yellow().to_string());
            }
            if t.repeatable {
                flags.push(format!("x{}", cfg.run.iterations).magenta().to_string());
            }
            if t.references.len() > 1 {
                flags.push(format!("{} refs", t.references.len()).cyan().to_string());
            }
            for (k, v) in &t.build_params {
                flags.push(format!("{}={}", k, v).dimmed().to_string());
            }
            println!("  {:<25} {}", t.name, flags.join(" "));
        }
    }
    println!(
        "{} tests in {}",
        catalog.num_tests(),
        util::replace_homedir_to_tilde(&catalog.root).to_string_lossy()
    );
    Ok(())
}
