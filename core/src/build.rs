use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;

use crate::config::BuildConfig;
use crate::str_interp::{self, InterpError};
use crate::testing::BoundedCommand;

/// Named values substituted into the compile command (`#{framesize}` etc.).
pub type BuildParams = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cannot spawn: {0}")]
    Spawn(#[source] io::Error),

    #[error("return code {0}")]
    ExitCode(i32),

    #[error("timed out after {}s", .0.as_secs_f32())]
    TimedOut(Duration),

    #[error("invalid command template: {0}")]
    Template(#[from] InterpError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BuildStep {
    #[strum(serialize = "clean")]
    Clean,
    #[strum(serialize = "build")]
    Compile,
}

/// Cleans and compiles a candidate's working directory.
#[async_trait]
pub trait Build: Send + Sync {
    async fn clean(&self, workdir: &Path, timeout: Duration) -> Result<(), BuildError>;

    async fn compile(
        &self,
        workdir: &Path,
        timeout: Duration,
        params: &BuildParams,
    ) -> Result<(), BuildError>;
}

/// [`Build`] that runs configured command lines (typically `make`) through a shell.
#[derive(Debug, Clone)]
pub struct ShellBuild {
    shell: PathBuf,
    clean_cmd: String,
    compile_cmd: String,
    defaults: BuildParams,
}

impl ShellBuild {
    const DEFAULT_SHELL: &str = "/bin/sh";
    const STDERR_LOG_MAX_BYTES: usize = 64 << 10;

    pub fn new(clean_cmd: impl Into<String>, compile_cmd: impl Into<String>) -> Self {
        Self {
            shell: Self::DEFAULT_SHELL.into(),
            clean_cmd: clean_cmd.into(),
            compile_cmd: compile_cmd.into(),
            defaults: BuildParams::new(),
        }
    }

    pub fn from_config(cfg: &BuildConfig) -> Self {
        Self::new(&cfg.clean, &cfg.compile)
            .shell(&cfg.shell)
            .default_params(cfg.params.clone())
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn default_params(mut self, params: BuildParams) -> Self {
        self.defaults = params;
        self
    }

    /// Compile command line with `params` layered over the defaults.
    pub fn compile_command(&self, workdir: &Path, params: &BuildParams) -> str_interp::Result {
        let mut vars: HashMap<&str, String> = self
            .defaults
            .iter()
            .chain(params)
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        vars.insert("buildDir", workdir.to_string_lossy().into_owned());
        str_interp::interp(&self.compile_cmd, &vars)
    }

    fn clean_command(&self, workdir: &Path) -> str_interp::Result {
        let vars: HashMap<&str, String> =
            HashMap::from([("buildDir", workdir.to_string_lossy().into_owned())]);
        str_interp::interp(&self.clean_cmd, &vars)
    }

    async fn run_step(&self, cmd: String, workdir: &Path, timeout: Duration) -> Result<(), BuildError> {
        log::debug!("{}$ {}", workdir.to_string_lossy(), cmd);
        let out = BoundedCommand::new(cmd, workdir)
            .shell(&self.shell)
            .timeout(timeout)
            .capture_max_bytes(0, Self::STDERR_LOG_MAX_BYTES)
            .run()
            .await
            .map_err(BuildError::Spawn)?;

        if out.timed_out {
            return Err(BuildError::TimedOut(timeout));
        }
        match out.status {
            Some(0) => Ok(()),
            Some(code) => {
                log::debug!("stderr:\n{}", out.stderr_lossy());
                Err(BuildError::ExitCode(code))
            }
            None => Err(BuildError::TimedOut(timeout)),
        }
    }
}

#[async_trait]
impl Build for ShellBuild {
    async fn clean(&self, workdir: &Path, timeout: Duration) -> Result<(), BuildError> {
        let cmd = self.clean_command(workdir)?;
        self.run_step(cmd, workdir, timeout).await
    }

    async fn compile(
        &self,
        workdir: &Path,
        timeout: Duration,
        params: &BuildParams,
    ) -> Result<(), BuildError> {
        let cmd = self.compile_command(workdir, params)?;
        self.run_step(cmd, workdir, timeout).await
    }
}
