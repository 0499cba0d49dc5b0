use std::{
    path::{Path, PathBuf},
    process::exit,
};

use grader_core::config::{Config, EnvOverrides};

use crate::cmd::GlobalArgs;

pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current dir: {}", e);
        exit(1);
    })
}

/// Loads `--config` or the nearest `grader.toml`, then applies `GRADER_*` overrides.
pub fn load_config(global_args: &GlobalArgs) -> anyhow::Result<(Config, EnvOverrides)> {
    let mut cfg = match &global_args.config {
        Some(path) => Config::from_toml_file(path.clone())?,
        None => Config::from_file_finding_in_ancestors(self::current_dir())?,
    };
    let env = EnvOverrides::from_env()?;
    cfg.apply_env(&env);
    if let Some(path) = &cfg.source_config_file {
        log::debug!("Using config {:?}", self::replace_homedir_to_tilde(path));
    }
    Ok((cfg, env))
}

pub fn replace_homedir_to_tilde(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    let Some(home_dir) = ::dirs::home_dir() else {
        return path
    };
    path.strip_prefix(home_dir)
        .map(|path| Path::new("~").join(path))
        .unwrap_or(path)
}
