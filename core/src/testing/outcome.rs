use serde::Serialize;

/// Final classification of one execution of a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed,
    TimedOut,
    BuildFailed(String),
    CrashedWithSignal(i32),
    OutputDecodeError,
}

/// Payload-free tag of a [`RunOutcome`], used for styling and the results ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum OutcomeKind {
    #[strum(serialize = "PASS")]
    #[serde(rename = "PASS")]
    Passed,
    #[strum(serialize = "FAIL")]
    #[serde(rename = "FAIL")]
    Failed,
    #[strum(serialize = "TIMEOUT")]
    #[serde(rename = "TIMEOUT")]
    TimedOut,
    #[strum(serialize = "BUILD")]
    #[serde(rename = "BUILD")]
    BuildFailed,
    #[strum(serialize = "CRASH")]
    #[serde(rename = "CRASH")]
    Crashed,
    #[strum(serialize = "DECODE")]
    #[serde(rename = "DECODE")]
    DecodeError,
}

impl RunOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, RunOutcome::Passed)
    }

    pub fn kind(&self) -> OutcomeKind {
        use RunOutcome::*;
        match self {
            Passed => OutcomeKind::Passed,
            Failed => OutcomeKind::Failed,
            TimedOut => OutcomeKind::TimedOut,
            BuildFailed(_) => OutcomeKind::BuildFailed,
            CrashedWithSignal(_) => OutcomeKind::Crashed,
            OutputDecodeError => OutcomeKind::DecodeError,
        }
    }
}

/// Per-iteration outcomes of a repeatable test.
///
/// The sequence concludes at the first non-passing iteration or once
/// `max_iterations` runs have passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationResult {
    outcomes: Vec<RunOutcome>,
    max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consensus {
    pub outcome: RunOutcome,
    /// Number of runs up to and including the deciding one.
    pub attempts: u32,
    pub max_iterations: u32,
}

impl IterationResult {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            outcomes: Vec::with_capacity(max_iterations as usize),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn from_outcomes(outcomes: Vec<RunOutcome>, max_iterations: u32) -> Self {
        Self {
            outcomes,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn push(&mut self, outcome: RunOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn is_concluded(&self) -> bool {
        self.outcomes.len() >= self.max_iterations as usize
            || self.outcomes.iter().any(|o| !o.is_passed())
    }

    pub fn outcomes(&self) -> &[RunOutcome] {
        &self.outcomes
    }

    /// Reduces the sequence: `Passed` only if every run up to the stopping point passed,
    /// otherwise the first failing run decides. Runs after it are ignored.
    /// An empty sequence counts as `Failed`.
    pub fn consensus(&self) -> Consensus {
        let decided = self
            .outcomes
            .iter()
            .enumerate()
            .take(self.max_iterations as usize)
            .find(|(_, o)| !o.is_passed());

        let (outcome, attempts) = match decided {
            Some((i, o)) => (o.clone(), i + 1),
            None if self.outcomes.is_empty() => (RunOutcome::Failed, 0),
            None => (
                RunOutcome::Passed,
                self.outcomes.len().min(self.max_iterations as usize),
            ),
        };
        Consensus {
            outcome,
            attempts: attempts as u32,
            max_iterations: self.max_iterations,
        }
    }
}

impl Consensus {
    /// Suffix for the verdict line of a test that failed one of its repeated runs.
    pub fn annotation(&self) -> Option<String> {
        if self.outcome.is_passed() {
            None
        } else {
            Some(format!(
                "on run {} out of {}",
                self.attempts, self.max_iterations
            ))
        }
    }
}

/// Per-suite tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteSummary {
    pub name: String,
    pub passed: usize,
    pub total: usize,
}

impl SuiteSummary {
    /// Rounded pass percentage; an empty suite scores 0.
    pub fn percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.passed as f64 * 100.0 / self.total as f64).round() as u32
    }
}
