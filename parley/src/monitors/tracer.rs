use crate::{Check, Outcome, Report, ScenarioRecord, Verdict, monitoring::Monitor};

/// A monitor that logs run progress to the `tracing` crate.
///
/// Log levels:
/// - `trace` - passing checks (high volume)
/// - `debug` - scenario started
/// - `info` - run start and finish, scenario passed, known failure now passing
/// - `warn` - failed checks, failed or timed-out scenarios
/// - `error` - scenarios aborted by harness misuse
///
/// # Example
///
/// ```ignore
/// use parley::monitors::Tracer;
///
/// let report = Runner::new("sms", ctx).monitor(Tracer).run().await;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Tracer;

impl Monitor for Tracer {
    fn on_run_start(&self, run: &str, scenarios: usize) {
        tracing::info!(run, scenarios, "run started");
    }

    fn on_scenario_start(&self, scenario: &str, mode: Option<&str>) {
        tracing::debug!(scenario, mode = mode.unwrap_or("-"), "scenario started");
    }

    fn on_assertion(&self, scenario: &str, check: &Check) {
        match check.verdict {
            Verdict::Fail => tracing::warn!(
                scenario,
                message = %check.message,
                detail = check.detail.as_deref().unwrap_or(""),
                "check failed"
            ),
            Verdict::UnexpectedPass => tracing::info!(
                scenario,
                message = %check.message,
                "known failure passed"
            ),
            verdict => tracing::trace!(scenario, message = %check.message, %verdict, "check"),
        }
    }

    fn on_scenario_finish(&self, record: &ScenarioRecord) {
        let scenario = record.label();
        match record.outcome {
            Outcome::Passed => {
                tracing::info!(%scenario, duration = ?record.duration, "scenario passed")
            }
            Outcome::Skipped => tracing::warn!(%scenario, "scenario skipped"),
            Outcome::Aborted => tracing::error!(
                %scenario,
                errors = ?record.errors,
                "scenario aborted by harness error"
            ),
            outcome => tracing::warn!(
                %scenario,
                %outcome,
                failed_checks = record.failed_checks().count(),
                errors = record.errors.len(),
                "scenario did not pass"
            ),
        }
    }

    fn on_run_finish(&self, report: &Report) {
        tracing::info!(
            run = %report.name,
            passed = report.count(Outcome::Passed),
            total = report.scenarios.len(),
            duration = ?report.duration,
            "run finished"
        );
    }
}
