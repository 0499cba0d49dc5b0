use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use serde::Serialize;

use crate::testing::{describe_exit_code, OutcomeKind};

/// Sink for a candidate's grading report. Calls are append-only and come from
/// the single worker that owns the candidate.
pub trait Reporter {
    fn append_line(&mut self, text: &str);

    /// Extends the most recent line (used for "on run k out of N").
    fn append_to_last_line(&mut self, text: &str);

    fn begin_suite(&mut self, suite: &str) {
        self.append_line(suite);
    }

    fn record_pass(&mut self, test: &str);
    fn record_fail(&mut self, test: &str);
    fn record_timeout(&mut self, test: &str);

    /// Output that is not valid UTF-8. Shown as a failure unless overridden.
    fn record_decode_error(&mut self, test: &str) {
        self.record_fail(test);
    }

    fn record_abnormal_exit(&mut self, test: &str, code: i32);
    fn record_build_failure(&mut self, test: &str, reason: &str);
    fn attach_output(&mut self, test: &str, raw: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReportEvent {
    Line(String),
    SameLine(String),
    Pass(String),
    Fail(String),
    Timeout(String),
    DecodeError(String),
    AbnormalExit(String, i32),
    BuildFailure(String, String),
    Output(String, String),
}

/// Records calls so one iteration of a repeated test can be kept or discarded
/// as a whole, then replayed into the real report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationBuffer {
    events: Vec<ReportEvent>,
}

impl IterationBuffer {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn replay(self, rep: &mut (impl Reporter + ?Sized)) {
        use ReportEvent::*;
        for ev in self.events {
            match ev {
                Line(s) => rep.append_line(&s),
                SameLine(s) => rep.append_to_last_line(&s),
                Pass(t) => rep.record_pass(&t),
                Fail(t) => rep.record_fail(&t),
                Timeout(t) => rep.record_timeout(&t),
                DecodeError(t) => rep.record_decode_error(&t),
                AbnormalExit(t, code) => rep.record_abnormal_exit(&t, code),
                BuildFailure(t, reason) => rep.record_build_failure(&t, &reason),
                Output(t, raw) => rep.attach_output(&t, &raw),
            }
        }
    }
}

impl Reporter for IterationBuffer {
    fn append_line(&mut self, text: &str) {
        self.events.push(ReportEvent::Line(text.to_owned()));
    }

    fn append_to_last_line(&mut self, text: &str) {
        self.events.push(ReportEvent::SameLine(text.to_owned()));
    }

    fn record_pass(&mut self, test: &str) {
        self.events.push(ReportEvent::Pass(test.to_owned()));
    }

    fn record_fail(&mut self, test: &str) {
        self.events.push(ReportEvent::Fail(test.to_owned()));
    }

    fn record_timeout(&mut self, test: &str) {
        self.events.push(ReportEvent::Timeout(test.to_owned()));
    }

    fn record_decode_error(&mut self, test: &str) {
        self.events.push(ReportEvent::DecodeError(test.to_owned()));
    }

    fn record_abnormal_exit(&mut self, test: &str, code: i32) {
        self.events
            .push(ReportEvent::AbnormalExit(test.to_owned(), code));
    }

    fn record_build_failure(&mut self, test: &str, reason: &str) {
        self.events
            .push(ReportEvent::BuildFailure(test.to_owned(), reason.to_owned()));
    }

    fn attach_output(&mut self, test: &str, raw: &str) {
        self.events
            .push(ReportEvent::Output(test.to_owned(), raw.to_owned()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub candidate: String,
    pub suite: String,
    pub test: String,
    pub verdict: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Verdicts of every candidate, shared by all workers of a run.
#[derive(Debug, Clone, Default)]
pub struct ResultsLedger {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl ResultsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: LedgerEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_json(&self, filepath: impl AsRef<Path>) -> fsutil::Result<()> {
        fsutil::write_json_with_mkdir(filepath, &self.entries())
    }
}

/// Plain-text report for one candidate.
#[derive(Debug)]
pub struct TextReport {
    candidate: String,
    suite: String,
    lines: Vec<String>,
    attachments: BTreeMap<(String, String), String>,
    outputs_dir: Option<PathBuf>,
    ledger: Option<ResultsLedger>,
}

impl TextReport {
    pub const PASS: &str = "PASS";
    pub const FAIL: &str = "FAIL";
    pub const TIMEOUT: &str = "TIMEOUT";

    pub fn new(candidate: impl Into<String>) -> Self {
        let candidate = candidate.into();
        let header = format!("AUTOGRADER REPORT FOR {}", candidate);
        Self {
            candidate,
            suite: String::new(),
            lines: vec![header],
            attachments: BTreeMap::new(),
            outputs_dir: None,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: ResultsLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Also writes every attached output to `<dir>/<suite>/<test>_output.txt`.
    /// If the directory cannot be created, outputs are only kept in memory.
    pub fn with_outputs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match fsutil::mkdir_all(&dir) {
            Ok(()) => self.outputs_dir = Some(dir),
            Err(e) => log::warn!("Could not create test output folder: {}", e),
        }
        self
    }

    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Raw candidate outputs keyed by `(suite, test)`.
    pub fn attachments(&self) -> &BTreeMap<(String, String), String> {
        &self.attachments
    }

    pub fn attachment(&self, suite: &str, test: &str) -> Option<&str> {
        self.attachments
            .get(&(suite.to_owned(), test.to_owned()))
            .map(String::as_str)
    }

    /// Writes the report to `<dir>/<candidate>.txt`.
    pub fn save(&self, dir: impl AsRef<Path>) -> fsutil::Result<PathBuf> {
        let path = dir.as_ref().join(format!("{}.txt", self.candidate));
        fsutil::write_with_mkdir(&path, self.text())?;
        Ok(path)
    }

    fn verdict_line(&mut self, test: &str, verdict: &str) {
        self.lines.push(format!("# {:<25} {}", test, verdict));
    }

    fn ledger_row(&self, test: &str, verdict: OutcomeKind, detail: Option<String>) {
        if let Some(ledger) = &self.ledger {
            ledger.record(LedgerEntry {
                candidate: self.candidate.clone(),
                suite: self.suite.clone(),
                test: test.to_owned(),
                verdict,
                detail,
            });
        }
    }
}

impl Reporter for TextReport {
    fn append_line(&mut self, text: &str) {
        self.lines.push(text.to_owned());
    }

    fn append_to_last_line(&mut self, text: &str) {
        match self.lines.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(text);
            }
            None => self.lines.push(text.to_owned()),
        }
    }

    fn begin_suite(&mut self, suite: &str) {
        self.suite = suite.to_owned();
        self.append_line(suite);
    }

    fn record_pass(&mut self, test: &str) {
        self.verdict_line(test, Self::PASS);
        self.ledger_row(test, OutcomeKind::Passed, None);
    }

    fn record_fail(&mut self, test: &str) {
        self.verdict_line(test, Self::FAIL);
        self.ledger_row(test, OutcomeKind::Failed, None);
    }

    fn record_timeout(&mut self, test: &str) {
        self.verdict_line(test, Self::TIMEOUT);
        self.ledger_row(test, OutcomeKind::TimedOut, None);
    }

    fn record_decode_error(&mut self, test: &str) {
        self.verdict_line(test, Self::FAIL);
        self.ledger_row(
            test,
            OutcomeKind::DecodeError,
            Some("output is not valid UTF-8".to_owned()),
        );
    }

    fn record_abnormal_exit(&mut self, test: &str, code: i32) {
        let desc = describe_exit_code(code);
        self.verdict_line(test, &desc);
        self.ledger_row(test, OutcomeKind::Crashed, Some(desc.into_owned()));
    }

    fn record_build_failure(&mut self, test: &str, reason: &str) {
        self.verdict_line(test, reason);
        self.ledger_row(test, OutcomeKind::BuildFailed, Some(reason.to_owned()));
    }

    fn attach_output(&mut self, test: &str, raw: &str) {
        if let Some(dir) = &self.outputs_dir {
            let path = dir.join(&self.suite).join(format!("{}_output.txt", test));
            if let Err(e) = fsutil::write_with_mkdir(&path, raw) {
                log::warn!("{}", e);
            }
        }
        self.attachments
            .insert((self.suite.clone(), test.to_owned()), raw.to_owned());
    }
}
