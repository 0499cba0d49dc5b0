use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use anyhow::{ensure, Context as _};
use lazy_regex::Regex;
use rust_embed::RustEmbed;
use serde::Deserialize;

use crate::serdable::PatternList;
use crate::similarity::DEFAULT_PASS_THRESHOLD;
use crate::str_interp;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub source_config_file: Option<PathBuf>,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub build: BuildConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogConfig {
    pub root: PathBuf,
}

/// Suite-level allow-lists, keyed by suite name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub order_sensitive: BTreeMap<String, PatternList>,
    #[serde(default)]
    pub repeatable: BTreeMap<String, PatternList>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "BuildConfig::default_shell")]
    pub shell: PathBuf,
    #[serde(default = "BuildConfig::default_subdir")]
    pub subdir: PathBuf,
    pub clean: String,
    pub compile: String,
    #[serde(default = "BuildConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "BuildConfig::default_preclean_timeout_secs")]
    pub preclean_timeout_secs: u64,
    /// Default values for the `#{...}` variables of `compile`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub extract: Vec<ParamExtraction>,
}

/// Pulls build parameters out of a suite's reference outputs.
/// The n-th capture of `pattern` becomes the value of `names[n]`; the rule only
/// applies when the number of captures equals the number of names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParamExtraction {
    pub suite: String,
    pub pattern: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunConfig {
    pub command: String,
    #[serde(default = "RunConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "RunConfig::default_iterations")]
    pub iterations: u32,
    #[serde(default = "RunConfig::default_pass_threshold")]
    pub pass_threshold: f64,
    #[serde(default = "RunConfig::default_stdout_max")]
    pub stdout_capture_max_bytes: usize,
    #[serde(default = "RunConfig::default_stderr_max")]
    pub stderr_capture_max_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    pub working_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("grader-out"),
        }
    }
}

/// Overrides read from `GRADER_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvOverrides {
    pub iterations: Option<u32>,
    pub pass_threshold: Option<f64>,
    pub working_dir: Option<PathBuf>,
    pub target_only: Option<String>,
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

impl Config {
    pub const FILENAME: &str = "grader.toml";

    pub fn example_toml() -> String {
        let file = Asset::get(Self::FILENAME).expect("example config is embedded at build time");
        String::from_utf8_lossy(file.data.as_ref()).into_owned()
    }

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: PathBuf) -> anyhow::Result<Self> {
        let toml = fsutil::read_to_string(&filepath).context("Cannot read a file")?;
        let mut cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid config TOML: {:?}", filepath))?;
        cfg.validate()
            .with_context(|| format!("Invalid config: {:?}", filepath))?;
        if let Some(dir) = filepath.parent() {
            cfg.resolve_relative_paths(dir);
        }
        cfg.source_config_file = Some(filepath);
        Ok(cfg)
    }

    /// Find config file ancestor dirs, including current dir.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let cur_dir = cur_dir.as_ref();
        cur_dir
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
            .with_context(|| format!("Cannot find '{}' in any parent dir", Self::FILENAME))
    }

    pub fn from_file_finding_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_filepath = Config::find_file_in_ancestors(cur_dir)?;
        Self::from_toml_file(config_filepath)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.run.pass_threshold;
        ensure!(
            (0.0..=1.0).contains(&threshold),
            "run.pass_threshold must be within [0, 1], got {}",
            threshold
        );
        ensure!(self.run.iterations >= 1, "run.iterations must be >= 1");
        ensure!(self.run.timeout_secs >= 1, "run.timeout_secs must be >= 1");
        ensure!(self.build.timeout_secs >= 1, "build.timeout_secs must be >= 1");

        str_interp::variables(&self.run.command).context("Invalid run.command")?;
        str_interp::variables(&self.build.clean).context("Invalid build.clean")?;
        str_interp::variables(&self.build.compile).context("Invalid build.compile")?;

        for rule in &self.build.extract {
            Regex::new(&rule.pattern).with_context(|| {
                format!("Invalid build.extract pattern for suite '{}'", rule.suite)
            })?;
        }
        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for path in [&mut self.catalog.root, &mut self.output.working_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn apply_env(&mut self, env: &EnvOverrides) {
        if let Some(n) = env.iterations {
            self.run.iterations = n.max(1);
        }
        if let Some(t) = env.pass_threshold {
            self.run.pass_threshold = t.clamp(0.0, 1.0);
        }
        if let Some(dir) = &env.working_dir {
            self.output.working_dir = dir.clone();
        }
    }
}

impl PolicyConfig {
    pub fn is_order_sensitive(&self, suite: &str, test: &str) -> bool {
        Self::listed(&self.order_sensitive, suite, test)
    }

    pub fn is_repeatable(&self, suite: &str, test: &str) -> bool {
        Self::listed(&self.repeatable, suite, test)
    }

    fn listed(lists: &BTreeMap<String, PatternList>, suite: &str, test: &str) -> bool {
        lists.get(suite).map_or(false, |list| list.contains(test))
    }
}

impl BuildConfig {
    fn default_shell() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn default_subdir() -> PathBuf {
        PathBuf::from("src")
    }

    fn default_timeout_secs() -> u64 {
        15
    }

    fn default_preclean_timeout_secs() -> u64 {
        1
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn preclean_timeout(&self) -> Duration {
        Duration::from_secs(self.preclean_timeout_secs)
    }

    pub fn extraction_for(&self, suite: &str) -> Option<&ParamExtraction> {
        self.extract.iter().find(|rule| rule.suite == suite)
    }
}

impl RunConfig {
    fn default_timeout_secs() -> u64 {
        15
    }

    fn default_iterations() -> u32 {
        10
    }

    fn default_pass_threshold() -> f64 {
        DEFAULT_PASS_THRESHOLD
    }

    fn default_stdout_max() -> usize {
        8 << 20
    }

    fn default_stderr_max() -> usize {
        1 << 20
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EnvOverrides {
    pub const PREFIX: &str = "GRADER_";

    pub fn from_env() -> anyhow::Result<Self> {
        envy::prefixed(Self::PREFIX)
            .from_env::<Self>()
            .with_context(|| format!("Invalid {}* environment variable", Self::PREFIX))
    }
}
