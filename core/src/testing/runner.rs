use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use super::{
    decode_capped, BoundedCommand, Catalog, IterationResult, ProcessOutput, RunOutcome,
    SuiteSummary, TestCase, TestSuite,
};
use crate::build::{Build, BuildError, BuildStep};
use crate::config::Config;
use crate::report::{IterationBuffer, Reporter};
use crate::similarity::{Metric, DEFAULT_PASS_THRESHOLD};
use crate::str_interp::{self, InterpError};

/// Knobs of a grading pass, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub shell: PathBuf,
    /// Candidate invocation; may reference `buildDir`, `suiteDir`, `testName`, `inputFile`.
    pub run_command: String,
    pub build_timeout: Duration,
    pub preclean_timeout: Duration,
    pub exec_timeout: Duration,
    pub iterations: u32,
    pub pass_threshold: f64,
    pub stdout_max_bytes: usize,
    pub stderr_max_bytes: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".into(),
            run_command: "#{buildDir}/mysh".to_owned(),
            build_timeout: Duration::from_secs(15),
            preclean_timeout: Duration::from_secs(1),
            exec_timeout: Duration::from_secs(15),
            iterations: 10,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            stdout_max_bytes: 8 << 20,
            stderr_max_bytes: 1 << 20,
        }
    }
}

impl RunnerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            shell: cfg.build.shell.clone(),
            run_command: cfg.run.command.clone(),
            build_timeout: cfg.build.timeout(),
            preclean_timeout: cfg.build.preclean_timeout(),
            exec_timeout: cfg.run.timeout(),
            iterations: cfg.run.iterations,
            pass_threshold: cfg.run.pass_threshold,
            stdout_max_bytes: cfg.run.stdout_capture_max_bytes,
            stderr_max_bytes: cfg.run.stderr_capture_max_bytes,
        }
    }
}

/// Drives clean, build, execute and score for every test of a catalog against
/// one candidate's build directory.
pub struct TestRunner<'b, B: Build + ?Sized> {
    build: &'b B,
    build_dir: PathBuf,
    settings: RunnerSettings,
}

impl<'b, B: Build + ?Sized> TestRunner<'b, B> {
    pub const MISSING_STRUCTURE: &'static str = "Expected repository structure not found";

    pub fn new(build: &'b B, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build,
            build_dir: build_dir.into(),
            settings: RunnerSettings::default(),
        }
    }

    pub fn settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn get_build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn get_settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Grades every suite. Never stops early: a broken candidate still gets a
    /// verdict for each test.
    pub async fn run_catalog<R>(&self, catalog: &Catalog, rep: &mut R) -> Vec<SuiteSummary>
    where
        R: Reporter + ?Sized,
    {
        if self.build_dir.is_dir() {
            // Committed binaries would otherwise survive into the first test.
            if let Err(e) = self
                .build
                .clean(&self.build_dir, self.settings.preclean_timeout)
                .await
            {
                log::debug!("Pre-clean of {:?} ignored: {}", self.build_dir, e);
            }
        } else {
            log::warn!("Build directory not found: {:?}", self.build_dir);
            rep.append_line(Self::MISSING_STRUCTURE);
        }

        rep.append_line("");
        rep.append_line("TEST CASES");
        let mut summaries = Vec::with_capacity(catalog.suites.len());
        for suite in &catalog.suites {
            summaries.push(self.run_suite(suite, rep).await);
        }
        summaries
    }

    pub async fn run_suite<R>(&self, suite: &TestSuite, rep: &mut R) -> SuiteSummary
    where
        R: Reporter + ?Sized,
    {
        rep.begin_suite(&suite.name);
        let mut passed = 0;
        for case in &suite.tests {
            let outcome = self.run_case(suite, case, rep).await;
            log::debug!("{}/{}: {:?}", suite.name, case.name, outcome);
            if outcome.is_passed() {
                passed += 1;
            }
        }

        let summary = SuiteSummary {
            name: suite.name.clone(),
            passed,
            total: suite.tests.len(),
        };
        rep.append_line(&format!("Passed {} / {}", summary.passed, summary.total));
        rep.append_line(&format!(
            "{} score {}%",
            summary.name,
            summary.percentage()
        ));
        rep.append_line("");
        summary
    }

    /// Produces exactly one final outcome for `case`.
    pub async fn run_case<R>(&self, suite: &TestSuite, case: &TestCase, rep: &mut R) -> RunOutcome
    where
        R: Reporter + ?Sized,
    {
        if let Err((step, e)) = self.prepare(case).await {
            let reason = format!("'{}' failed ({})", step, e);
            rep.record_build_failure(&case.name, &reason);
            return RunOutcome::BuildFailed(reason);
        }

        if !case.repeatable {
            return self.execute(suite, case, rep).await;
        }

        let mut results = IterationResult::new(self.settings.iterations);
        let mut concluding = IterationBuffer::default();
        while !results.is_concluded() {
            let mut buf = IterationBuffer::default();
            results.push(self.execute(suite, case, &mut buf).await);
            concluding = buf;
        }

        let consensus = results.consensus();
        concluding.replay(rep);
        if let Some(note) = consensus.annotation() {
            rep.append_to_last_line(&note);
        }
        consensus.outcome
    }

    async fn prepare(&self, case: &TestCase) -> Result<(), (BuildStep, BuildError)> {
        let timeout = self.settings.build_timeout;
        self.build
            .clean(&self.build_dir, timeout)
            .await
            .map_err(|e| (BuildStep::Clean, e))?;
        self.build
            .compile(&self.build_dir, timeout, &case.build_params)
            .await
            .map_err(|e| (BuildStep::Compile, e))
    }

    pub fn run_command(&self, suite: &TestSuite, case: &TestCase) -> str_interp::Result {
        let vars: HashMap<&str, String> = HashMap::from([
            ("buildDir", self.build_dir.to_string_lossy().into_owned()),
            ("suiteDir", suite.dir.to_string_lossy().into_owned()),
            ("testName", case.name.clone()),
            ("inputFile", case.input_path.to_string_lossy().into_owned()),
        ]);
        str_interp::interp(&self.settings.run_command, &vars)
    }

    /// Runs the candidate once and scores the output.
    pub async fn execute<R>(&self, suite: &TestSuite, case: &TestCase, rep: &mut R) -> RunOutcome
    where
        R: Reporter + ?Sized,
    {
        let out = match self.spawn_candidate(suite, case).await {
            Ok(out) => out,
            Err(reason) => {
                rep.record_build_failure(&case.name, &reason);
                return RunOutcome::BuildFailed(reason);
            }
        };

        if !out.timed_out {
            if let Some(code) = out.status.filter(|&c| c != 0) {
                rep.record_abnormal_exit(&case.name, code);
                return RunOutcome::CrashedWithSignal(code);
            }
        }
        if out.timed_out && out.stdout.iter().all(u8::is_ascii_whitespace) {
            rep.record_timeout(&case.name);
            return RunOutcome::TimedOut;
        }

        let actual = match decode_capped(out.stdout, self.settings.stdout_max_bytes) {
            Ok(actual) => actual,
            Err(e) => {
                log::info!("{}/{}: cannot decode output ({})", suite.name, case.name, e);
                rep.record_decode_error(&case.name);
                return RunOutcome::OutputDecodeError;
            }
        };
        rep.attach_output(&case.name, &actual);

        let passed = self.matches_any_reference(suite, case, actual).await;

        if passed {
            rep.record_pass(&case.name);
            RunOutcome::Passed
        } else if out.timed_out {
            rep.record_timeout(&case.name);
            RunOutcome::TimedOut
        } else {
            rep.record_fail(&case.name);
            RunOutcome::Failed
        }
    }

    /// OR across the references. Alignment is quadratic in the output size,
    /// so scoring runs on the blocking pool.
    async fn matches_any_reference(
        &self,
        suite: &TestSuite,
        case: &TestCase,
        actual: String,
    ) -> bool {
        let metric = Metric::for_order_sensitive(case.order_sensitive);
        let threshold = self.settings.pass_threshold;
        let references = case.references.clone();
        let label = format!("{}/{}", suite.name, case.name);

        let scoring = tokio::task::spawn_blocking(move || {
            references.iter().any(|r| {
                let score = metric.score(&actual, &r.content);
                log::debug!("{} vs {:?}: {} {:.3}", label, r.path, metric, score);
                score >= threshold
            })
        });
        match scoring.await {
            Ok(passed) => passed,
            Err(e) => {
                log::error!("Scoring {}/{} aborted: {}", suite.name, case.name, e);
                false
            }
        }
    }

    async fn spawn_candidate(&self, suite: &TestSuite, case: &TestCase) -> Result<ProcessOutput, String> {
        let cmd = self
            .run_command(suite, case)
            .map_err(|e: InterpError| format!("invalid run command ({})", e))?;
        BoundedCommand::new(cmd, &suite.dir)
            .shell(&self.settings.shell)
            .stdin(&case.input)
            .timeout(self.settings.exec_timeout)
            .capture_max_bytes(self.settings.stdout_max_bytes, self.settings.stderr_max_bytes)
            .run()
            .await
            .map_err(|e| format!("cannot run candidate ({})", e))
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use crate::build::ShellBuild;
    use crate::report::TextReport;
    use crate::testutil::TempDir;

    fn settings(run_command: &str) -> RunnerSettings {
        RunnerSettings {
            run_command: run_command.to_owned(),
            build_timeout: Duration::from_secs(5),
            exec_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn suite(dir: &TempDir, name: &str, tests: Vec<TestCase>) -> TestSuite {
        TestSuite {
            name: name.to_owned(),
            dir: dir.path().to_owned(),
            tests,
        }
    }

    fn catalog(suites: Vec<TestSuite>) -> Catalog {
        Catalog {
            root: PathBuf::new(),
            suites,
        }
    }

    #[tokio::test]
    async fn order_policy_decides_between_metrics() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let runner = TestRunner::new(&build, dir.path()).settings(settings("echo c b a"));
        let cat = catalog(vec![suite(
            &dir,
            "assignment1",
            vec![
                TestCase::new("t1", "", ["a b c\n"]),
                TestCase::new("t2", "", ["a b c\n"]).order_sensitive(true),
            ],
        )]);

        let mut rep = TextReport::new("alice");
        let summaries = runner.run_catalog(&cat, &mut rep).await;

        assert_eq!(
            summaries,
            [SuiteSummary {
                name: "assignment1".to_owned(),
                passed: 1,
                total: 2
            }]
        );
        assert_eq!(
            rep.lines(),
            [
                "AUTOGRADER REPORT FOR alice",
                "",
                "TEST CASES",
                "assignment1",
                "# t1                        PASS",
                "# t2                        FAIL",
                "Passed 1 / 2",
                "assignment1 score 50%",
                "",
            ]
        );
        assert_eq!(rep.attachment("assignment1", "t1"), Some("c b a\n"));
    }

    #[tokio::test]
    async fn stdin_and_template_variables_reach_the_candidate() {
        let dir = TempDir::new("runner");
        dir.write("prog.sh", "read line; echo \"$1 $line\"\n");
        let build = ShellBuild::new("true", "true");
        let runner = TestRunner::new(&build, dir.path())
            .settings(settings("sh #{buildDir}/prog.sh #{testName}"));
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("t7", "hello\n", ["t7 hello"]);

        let mut rep = TextReport::new("x");
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Passed);
    }

    #[tokio::test]
    async fn crash_skips_scoring() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let runner = TestRunner::new(&build, dir.path()).settings(settings("echo a b c; kill -SEGV $$"));
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("t1", "", ["a b c"]);

        let mut rep = TextReport::new("x");
        let outcome = runner.run_case(&s, &case, &mut rep).await;
        assert_eq!(outcome, RunOutcome::CrashedWithSignal(139));
        assert_eq!(rep.lines().last().unwrap(), "# t1                        Segmentation fault (SIGSEGV)");
        assert!(rep.attachments().is_empty());
    }

    #[tokio::test]
    async fn silent_timeout_is_timed_out() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let mut st = settings("sleep 10");
        st.exec_timeout = Duration::from_millis(300);
        let runner = TestRunner::new(&build, dir.path()).settings(st);
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("t1", "", ["a b c"]);

        let mut rep = TextReport::new("x");
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::TimedOut);
        assert_eq!(rep.lines().last().unwrap(), "# t1                        TIMEOUT");
    }

    #[tokio::test]
    async fn partial_output_before_timeout_is_scored() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let mut st = settings("echo a b c; sleep 10");
        st.exec_timeout = Duration::from_millis(300);
        let runner = TestRunner::new(&build, dir.path()).settings(st);
        let s = suite(&dir, "s", vec![]);

        let mut rep = TextReport::new("x");
        let case = TestCase::new("t1", "", ["a b c"]);
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Passed);
        let case = TestCase::new("t2", "", ["x y z"]);
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::TimedOut);
    }

    #[tokio::test]
    async fn any_matching_reference_passes() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let output = "1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19";
        let runner = TestRunner::new(&build, dir.path()).settings(settings(&format!("echo {}", output)));
        let s = suite(&dir, "s", vec![]);
        // close: 19 / 20 shared tokens; far: 2 / 37
        let close = format!("{} 20", output);
        let far = "1 2 a b c d e f g h i j k l m n o p q r";
        let case = TestCase::new("t1", "", [far.to_owned(), close]);

        let mut rep = TextReport::new("x");
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Passed);
    }

    #[tokio::test]
    async fn undecodable_output_is_not_scored() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let runner = TestRunner::new(&build, dir.path()).settings(settings(r"printf '\377\376'"));
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("t1", "", [""]);

        let mut rep = TextReport::new("x");
        assert_eq!(
            runner.run_case(&s, &case, &mut rep).await,
            RunOutcome::OutputDecodeError
        );
        assert_eq!(rep.lines().last().unwrap(), "# t1                        FAIL");
        assert!(rep.attachments().is_empty());
    }

    #[tokio::test]
    async fn multibyte_output_cut_by_the_cap_is_scored() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let mut st = settings("printf 'é é é é'");
        st.stdout_max_bytes = 4;
        let runner = TestRunner::new(&build, dir.path()).settings(st);
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("t1", "", ["é"]);

        let mut rep = TextReport::new("x");
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Passed);
        assert_eq!(rep.attachment("", "t1"), Some("é "));
    }

    #[tokio::test]
    async fn score_equal_to_threshold_passes() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let expected = "1 2 3 4 5 6 7 8 9 10";
        // 2 * 9 / (10 + 10) = 0.90
        let mut st = settings("echo 1 2 3 4 5 6 7 8 9 x");
        st.pass_threshold = 0.90;
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("t1", "", [expected]).order_sensitive(true);

        let runner = TestRunner::new(&build, dir.path()).settings(st.clone());
        let mut rep = TextReport::new("x");
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Passed);

        st.pass_threshold = 0.91;
        let runner = TestRunner::new(&build, dir.path()).settings(st);
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Failed);
    }

    #[tokio::test]
    async fn repeatable_test_stops_at_first_failing_run() {
        let dir = TempDir::new("runner");
        dir.write("prog.sh", concat!(
            "n=$(cat count 2>/dev/null || echo 0)\n",
            "n=$((n + 1))\n",
            "echo $n > count\n",
            "if [ $n -eq 3 ]; then echo wrong; else echo a b c; fi\n",
        ));
        let build = ShellBuild::new("true", "true");
        let runner = TestRunner::new(&build, dir.path()).settings(settings("sh prog.sh"));
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("T_MT1", "", ["a b c"]).repeatable(true);

        let mut rep = TextReport::new("x");
        rep.begin_suite("assignment4");
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Failed);
        assert_eq!(
            rep.lines()[2..],
            ["# T_MT1                     FAIL on run 3 out of 10"]
        );
        assert_eq!(rep.attachment("assignment4", "T_MT1"), Some("wrong\n"));
        assert_eq!(dir.read("count"), "3\n");
    }

    #[tokio::test]
    async fn repeatable_test_passing_every_run() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let mut st = settings("echo run >> runs; echo a b c");
        st.iterations = 4;
        let runner = TestRunner::new(&build, dir.path()).settings(st);
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("T_MT2", "", ["a b c"]).repeatable(true);

        let mut rep = TextReport::new("x");
        assert_eq!(runner.run_case(&s, &case, &mut rep).await, RunOutcome::Passed);
        assert_eq!(rep.lines()[1..], ["# T_MT2                     PASS"]);
        assert_eq!(dir.read("runs").lines().count(), 4);
    }

    #[tokio::test]
    async fn compile_failure_is_build_failed() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "exit 2");
        let runner = TestRunner::new(&build, dir.path()).settings(settings("echo a"));
        let s = suite(&dir, "s", vec![]);
        let case = TestCase::new("t1", "", ["a"]);

        let mut rep = TextReport::new("x");
        let outcome = runner.run_case(&s, &case, &mut rep).await;
        assert_eq!(
            outcome,
            RunOutcome::BuildFailed("'build' failed (return code 2)".to_owned())
        );
    }

    #[tokio::test]
    async fn missing_build_dir_fails_every_test() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let runner = TestRunner::new(&build, dir.path().join("src")).settings(settings("echo a"));
        let cat = catalog(vec![
            suite(&dir, "assignment1", vec![TestCase::new("t1", "", ["a"])]),
            suite(&dir, "assignment2", vec![TestCase::new("t1", "", ["a"])]),
        ]);

        let mut rep = TextReport::new("x");
        let summaries = runner.run_catalog(&cat, &mut rep).await;
        assert!(summaries.iter().all(|s| s.passed == 0 && s.percentage() == 0));
        assert_eq!(rep.lines()[1], TestRunner::<ShellBuild>::MISSING_STRUCTURE);
        assert!(rep
            .lines()
            .iter()
            .filter(|l| l.starts_with("# "))
            .all(|l| l.contains("'clean' failed")));
    }

    #[tokio::test]
    async fn empty_suite_scores_zero() {
        let dir = TempDir::new("runner");
        let build = ShellBuild::new("true", "true");
        let runner = TestRunner::new(&build, dir.path());
        let mut rep = TextReport::new("x");
        let summary = runner.run_suite(&suite(&dir, "empty", vec![]), &mut rep).await;
        assert_eq!((summary.passed, summary.total), (0, 0));
        assert_eq!(rep.lines()[2..4], ["Passed 0 / 0", "empty score 0%"]);
    }
}
