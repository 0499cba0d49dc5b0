use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use lazy_regex::Regex;

use crate::build::BuildParams;
use crate::config::{ParamExtraction, PolicyConfig};

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Fs(#[from] fsutil::Error),

    #[error("Invalid parameter pattern for suite '{suite}': {source}")]
    InvalidPattern {
        suite: String,
        #[source]
        source: regex::Error,
    },
}

/// Acceptable output for a test. Any one matching reference is sufficient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceOutput {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub input_path: PathBuf,
    pub input: String,
    pub references: Vec<ReferenceOutput>,
    pub order_sensitive: bool,
    pub repeatable: bool,
    /// Overrides for the compile step, extracted from the primary reference.
    pub build_params: BuildParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    pub name: String,
    pub dir: PathBuf,
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub root: PathBuf,
    pub suites: Vec<TestSuite>,
}

impl TestCase {
    const INPUT_EXT: &str = "txt";
    const RESULT_MARKER: &str = "_result";

    /// In-memory test case; `input_path` is left empty.
    pub fn new<I, S>(name: impl Into<String>, input: impl Into<String>, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let references = references
            .into_iter()
            .enumerate()
            .map(|(i, content)| ReferenceOutput {
                path: PathBuf::from(format!("{}{}{}.txt", name, Self::RESULT_MARKER, i)),
                content: content.into(),
            })
            .collect();
        Self {
            name,
            input_path: PathBuf::new(),
            input: input.into(),
            references,
            order_sensitive: false,
            repeatable: false,
            build_params: BuildParams::new(),
        }
    }

    pub fn order_sensitive(mut self, yes: bool) -> Self {
        self.order_sensitive = yes;
        self
    }

    pub fn repeatable(mut self, yes: bool) -> Self {
        self.repeatable = yes;
        self
    }

    /// `t1_result.txt`, `t1_result2.txt`, `t1_result_alt.txt` all belong to `t1`.
    fn name_from_reference_path(path: &Path) -> Option<String> {
        let stem = fsutil::file_stem_str(path);
        let i = stem.rfind(Self::RESULT_MARKER)?;
        let name = &stem[..i];
        (!name.is_empty()).then(|| name.to_owned())
    }

    /// The reference named exactly `<test>_result.txt`, else the first one.
    pub fn primary_reference(&self) -> Option<&ReferenceOutput> {
        let primary = format!("{}{}", self.name, Self::RESULT_MARKER);
        self.references
            .iter()
            .find(|r| fsutil::file_stem_str(&r.path) == primary)
            .or_else(|| self.references.first())
    }
}

/// Compiled form of a [`ParamExtraction`] rule.
#[derive(Debug, Clone)]
pub struct ParamExtractor {
    pattern: Regex,
    names: Vec<String>,
}

impl ParamExtractor {
    pub fn new(rule: &ParamExtraction) -> Result<Self> {
        let pattern = Regex::new(&rule.pattern).map_err(|source| CatalogError::InvalidPattern {
            suite: rule.suite.clone(),
            source,
        })?;
        Ok(Self {
            pattern,
            names: rule.names.clone(),
        })
    }

    /// Uses the first capture group of every match (or the whole match if the
    /// pattern has no groups). Yields nothing unless there is one value per name.
    /// ```
    /// use grader_core::config::ParamExtraction;
    /// use grader_core::testing::ParamExtractor;
    ///
    /// let ex = ParamExtractor::new(&ParamExtraction {
    ///     suite: "assignment3".into(),
    ///     pattern: r"Size = (\d+)".into(),
    ///     names: vec!["framesize".into(), "varmemsize".into()],
    /// }).unwrap();
    /// let params = ex.extract("Frame Store Size = 21; Variable Store Size = 7").unwrap();
    /// assert_eq!(params["framesize"], "21");
    /// assert_eq!(params["varmemsize"], "7");
    /// assert!(ex.extract("Frame Store Size = 21").is_none());
    /// ```
    pub fn extract(&self, text: &str) -> Option<BuildParams> {
        let values: Vec<&str> = self
            .pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str())
            .collect();
        if values.len() != self.names.len() {
            return None;
        }
        Some(
            self.names
                .iter()
                .cloned()
                .zip(values.into_iter().map(str::to_owned))
                .collect(),
        )
    }
}

impl TestSuite {
    pub fn load(
        dir: impl AsRef<Path>,
        policy: &PolicyConfig,
        extractor: Option<&ParamExtractor>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let name = fsutil::file_name_str(dir);

        let pattern = ::glob::Pattern::new("*_result*.txt").expect("static glob pattern");
        let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for path in fsutil::list_files_matching(dir, &pattern)? {
            if let Some(test) = TestCase::name_from_reference_path(&path) {
                grouped.entry(test).or_default().push(path);
            }
        }

        let mut tests = Vec::with_capacity(grouped.len());
        for (test, reference_paths) in grouped {
            let input_path = dir.join(format!("{}.{}", test, TestCase::INPUT_EXT));
            if !input_path.is_file() {
                log::warn!(
                    "Skipping {}/{}: no input file {:?}",
                    name,
                    test,
                    input_path
                );
                continue;
            }
            let input = fsutil::read_to_string(&input_path)?;
            let references = reference_paths
                .into_iter()
                .map(|path| {
                    fsutil::read_to_string(&path).map(|content| ReferenceOutput { path, content })
                })
                .collect::<fsutil::Result<Vec<_>>>()?;

            let mut t = TestCase {
                order_sensitive: policy.is_order_sensitive(&name, &test),
                repeatable: policy.is_repeatable(&name, &test),
                name: test,
                input_path,
                input,
                references,
                build_params: BuildParams::new(),
            };
            let extracted = extractor
                .zip(t.primary_reference())
                .and_then(|(ex, r)| ex.extract(&r.content));
            if let Some(params) = extracted {
                log::debug!("{}/{}: build params {:?}", name, t.name, params);
                t.build_params = params;
            }
            tests.push(t);
        }

        Ok(Self {
            name,
            dir: dir.to_owned(),
            tests,
        })
    }
}

impl Catalog {
    /// Scans `root`: every subdirectory is a suite.
    pub fn load(
        root: impl AsRef<Path>,
        policy: &PolicyConfig,
        extract_rules: &[ParamExtraction],
    ) -> Result<Self> {
        let root = root.as_ref();
        let mut suites = Vec::new();
        for dir in fsutil::list_subdirs(root)? {
            let name = fsutil::file_name_str(&dir);
            let extractor = extract_rules
                .iter()
                .find(|rule| rule.suite == name)
                .map(ParamExtractor::new)
                .transpose()?;
            suites.push(TestSuite::load(&dir, policy, extractor.as_ref())?);
        }
        Ok(Self {
            root: root.to_owned(),
            suites,
        })
    }

    /// Keeps only the named suites. An empty filter keeps everything.
    pub fn retain_suites(&mut self, names: &[String]) {
        if !names.is_empty() {
            self.suites.retain(|s| names.contains(&s.name));
        }
    }

    pub fn num_tests(&self) -> usize {
        self.suites.iter().map(|s| s.tests.len()).sum()
    }
}
