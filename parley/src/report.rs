use std::{fmt, time::Duration};

use crate::{Check, Error};

/// Final state of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Outcome {
    Passed,
    /// At least one check failed or the step returned an ordinary error.
    Failed,
    /// The scenario never signalled completion.
    TimedOut,
    /// Harness misuse (double completion, send after close) stopped the
    /// scenario.
    Aborted,
    /// Never started because setup failed.
    Skipped,
}

impl Outcome {
    pub fn is_pass(self) -> bool {
        self == Outcome::Passed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Passed => "PASS",
            Outcome::Failed => "FAIL",
            Outcome::TimedOut => "TIMEOUT",
            Outcome::Aborted => "ABORTED",
            Outcome::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// An error a scenario ended with, flattened for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorRecord {
    pub message: String,
    pub structural: bool,
}

impl From<&Error> for ErrorRecord {
    fn from(e: &Error) -> Self {
        Self {
            message: e.to_string(),
            structural: e.is_structural(),
        }
    }
}

/// Everything known about one scenario once it has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScenarioRecord {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub mode: Option<String>,
    pub outcome: Outcome,
    pub duration: Duration,
    pub checks: Vec<Check>,
    pub errors: Vec<ErrorRecord>,
}

impl ScenarioRecord {
    pub(crate) fn skipped(name: &str, mode: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            mode: mode.map(str::to_string),
            outcome: Outcome::Skipped,
            duration: Duration::ZERO,
            checks: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        match &self.mode {
            Some(mode) => format!("{} [{mode}]", self.name),
            None => self.name.clone(),
        }
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.verdict.is_failure())
    }
}

/// Result of a whole run.
///
/// `Display` renders the human summary: one line per scenario with its
/// outcome, the failures underneath, and a totals line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Report {
    pub name: String,
    pub scenarios: Vec<ScenarioRecord>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub setup_error: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub teardown_error: Option<String>,
    pub duration: Duration,
}

impl Report {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True when setup and teardown succeeded and every scenario passed.
    pub fn passed(&self) -> bool {
        self.setup_error.is_none()
            && self.teardown_error.is_none()
            && self.scenarios.iter().all(|s| s.outcome.is_pass())
    }

    /// Process exit code for CI: 0 on all-pass, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.scenarios
            .iter()
            .filter(|s| s.outcome == outcome)
            .count()
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioRecord> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::external)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.setup_error {
            writeln!(f, "setup failed: {err}")?;
        }
        for scenario in &self.scenarios {
            writeln!(
                f,
                "{:<8} {} ({:?})",
                scenario.outcome.to_string(),
                scenario.label(),
                scenario.duration
            )?;
            for check in scenario.failed_checks() {
                writeln!(f, "         {check}")?;
            }
            for error in &scenario.errors {
                let kind = if error.structural { "harness error" } else { "error" };
                writeln!(f, "         {kind}: {}", error.message)?;
            }
        }
        if let Some(err) = &self.teardown_error {
            writeln!(f, "teardown failed: {err}")?;
        }
        write!(
            f,
            "{}: {} passed, {} failed, {} timed out, {} aborted",
            self.name,
            self.count(Outcome::Passed),
            self.count(Outcome::Failed),
            self.count(Outcome::TimedOut),
            self.count(Outcome::Aborted),
        )?;
        match self.count(Outcome::Skipped) {
            0 => Ok(()),
            skipped => write!(f, ", {skipped} skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Verdict;

    fn record(name: &str, outcome: Outcome) -> ScenarioRecord {
        ScenarioRecord {
            name: name.into(),
            mode: None,
            outcome,
            duration: Duration::from_millis(3),
            checks: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn exit_code_reflects_outcomes() {
        let mut report = Report::new("suite");
        report.scenarios.push(record("a", Outcome::Passed));
        assert_eq!(report.exit_code(), 0);

        report.scenarios.push(record("b", Outcome::TimedOut));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.count(Outcome::TimedOut), 1);
    }

    #[test]
    fn setup_failure_fails_the_run() {
        let mut report = Report::new("suite");
        report.setup_error = Some("no provider".into());
        assert!(!report.passed());

        report.scenarios.push(ScenarioRecord::skipped("open chat", None));
        report.scenarios.push(ScenarioRecord::skipped("open chat", Some("minimized")));
        let summary = report.to_string();
        assert!(summary.starts_with("setup failed: no provider"));
        assert!(summary.contains("SKIPPED  open chat [minimized]"));
        assert!(summary.ends_with("0 aborted, 2 skipped"));
    }

    #[test]
    fn summary_separates_harness_errors() {
        let mut report = Report::new("suite");
        let mut aborted = record("double", Outcome::Aborted);
        aborted
            .errors
            .push(ErrorRecord::from(&Error::DoubleCompletion("double".into())));
        let mut failed = record("chat", Outcome::Failed);
        failed.mode = Some("minimized".into());
        failed.checks.push(Check {
            verdict: Verdict::Fail,
            message: "one chat".into(),
            detail: None,
        });
        report.scenarios.push(aborted);
        report.scenarios.push(failed);

        let summary = report.to_string();
        assert!(summary.contains("harness error: Scenario 'double' completed more than once"));
        assert!(summary.contains("chat [minimized]"));
        assert!(summary.contains("[FAIL] one chat"));
        assert!(summary.ends_with("suite: 0 passed, 1 failed, 0 timed out, 1 aborted"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_uses_snake_case_outcomes() {
        let mut report = Report::new("suite");
        report.scenarios.push(record("slow", Outcome::TimedOut));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"timed_out\""));
    }
}
