use crate::{Check, Report, ScenarioRecord};

/// Trait for observing a run as it progresses.
///
/// Implement this trait to receive callbacks at each stage of a run.
/// All methods have default no-op implementations, so you only need to
/// override the ones you care about.
///
/// # Example
///
/// ```rust
/// use parley::{ScenarioRecord, monitoring::Monitor};
///
/// struct Dots;
///
/// impl Monitor for Dots {
///     fn on_scenario_finish(&self, record: &ScenarioRecord) {
///         print!("{}", if record.outcome.is_pass() { "." } else { "F" });
///     }
/// }
/// ```
///
/// # Run Lifecycle
///
/// 1. **Run start**  - once, before setup
/// 2. **Scenario start**  - before each step function is invoked
/// 3. **Assertion**  - once per recorded check, after the scenario settles
/// 4. **Scenario finish**  - after the between-scenario check
/// 5. **Run finish**  - once, with the final report
pub trait Monitor {
    /// Called once before setup runs.
    fn on_run_start(&self, run: &str, scenarios: usize) {
        let _r = run;
        let _s = scenarios;
    }

    /// Called when a scenario's step function is about to run.
    fn on_scenario_start(&self, scenario: &str, mode: Option<&str>) {
        let _s = scenario;
        let _m = mode;
    }

    /// Called for every check a scenario recorded, including the
    /// between-scenario check.
    fn on_assertion(&self, scenario: &str, check: &Check) {
        let _s = scenario;
        let _c = check;
    }

    /// Called when a scenario's outcome is final.
    fn on_scenario_finish(&self, record: &ScenarioRecord) {
        let _r = record;
    }

    /// Called once with the complete report.
    fn on_run_finish(&self, report: &Report) {
        let _r = report;
    }
}
