use std::path::PathBuf;

use anyhow::ensure;
use grader_core::{print_success, Config};

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(default_value = "./")]
    dir: PathBuf,

    /// Overwrite an existing config
    #[arg(short, long)]
    force: bool,
}

pub fn exec(args: &Args, _: &GlobalArgs) -> SubcmdResult {
    let path = args.dir.join(Config::FILENAME);
    ensure!(
        args.force || !path.exists(),
        "{:?} already exists (use --force to overwrite)",
        path
    );
    fsutil::write_with_mkdir(&path, Config::example_toml())?;
    print_success!(
        "Successfully wrote example config. (path: {})",
        path.to_string_lossy()
    );
    Ok(())
}
