use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// One step of the stop sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStep {
    Terminate,
    Unmount(PathBuf),
    RemoveDir(PathBuf),
    RestoreEnvironment,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::Terminate => write!(f, "terminate daemon"),
            TeardownStep::Unmount(path) => write!(f, "unmount {}", path.display()),
            TeardownStep::RemoveDir(path) => write!(f, "remove {}", path.display()),
            TeardownStep::RestoreEnvironment => write!(f, "restore environment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Failed(String),
}

/// Outcomes of a stop sequence. Steps never abort each other; failures are
/// collected here and logged.
#[derive(Debug, Default, Clone)]
pub struct TeardownReport {
    steps: Vec<(TeardownStep, StepOutcome)>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn done(&mut self, step: TeardownStep) {
        self.steps.push((step, StepOutcome::Done));
    }

    pub fn failed(&mut self, step: TeardownStep, reason: impl fmt::Display) {
        let reason = reason.to_string();
        warn!("Teardown step '{}' failed: {}", step, reason);
        self.steps.push((step, StepOutcome::Failed(reason)));
    }

    pub fn record<E: fmt::Display>(&mut self, step: TeardownStep, result: Result<(), E>) {
        match result {
            Ok(()) => self.done(step),
            Err(e) => self.failed(step, e),
        }
    }

    pub fn merge(&mut self, other: TeardownReport) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[(TeardownStep, StepOutcome)] {
        &self.steps
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TeardownStep, &str)> {
        self.steps.iter().filter_map(|(step, outcome)| match outcome {
            StepOutcome::Failed(reason) => Some((step, reason.as_str())),
            StepOutcome::Done => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}
