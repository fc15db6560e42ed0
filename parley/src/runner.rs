//! Sequential scenario execution.

use std::{
    cell::RefCell,
    fmt,
    future::Future,
    rc::Rc,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::{FutureExt, future::LocalBoxFuture};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::Instant,
};

use crate::{
    Checks, Config, CorrelationTracker, Error, ErrorRecord, Message, Outcome, Report, Result,
    ScenarioRecord, Waiter, monitoring::Monitor, tracker::PendingScope, wait_for,
};

type StepFn<C> = Rc<dyn Fn(Case<C>) -> LocalBoxFuture<'static, Result>>;
type HookFn<C> = Box<dyn Fn(C) -> LocalBoxFuture<'static, Result>>;
type CheckFn<C> = Box<dyn Fn(&C, &Checks)>;

/// Where the scenario running on this task reports errors a step may never
/// see returned.
#[derive(Clone)]
struct StepScope {
    faults: mpsc::UnboundedSender<Error>,
    checks: Checks,
}

tokio::task_local! {
    static STEP_SCOPE: StepScope;
}

/// Abort the running scenario with a structural error.
///
/// Outside a scenario this does nothing; the caller still returns the error.
pub(crate) fn abort_scenario(error: Error) {
    let _ = STEP_SCOPE.try_with(|scope| scope.faults.send(error));
}

/// Record a non-fatal error as a failed check on the running scenario.
pub(crate) fn fail_scenario(error: &Error) {
    let _ = STEP_SCOPE.try_with(|scope| scope.checks.fail(error.to_string()));
}

/// The continuation a scenario calls exactly once when it is logically done.
///
/// Cloneable and `Send`, so it can be handed to a spawned task that
/// finishes the scenario on the scenario's behalf. The first
/// [`done`](Self::done) completes the scenario; every later call returns
/// [`Error::DoubleCompletion`] and aborts the scenario on the spot, even if
/// the step ignores the error.
#[derive(Clone)]
pub struct Completion {
    scenario: Arc<str>,
    calls: Arc<AtomicUsize>,
    signal: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    faults: mpsc::UnboundedSender<Error>,
}

impl Completion {
    pub(crate) fn new(
        scenario: &str,
        faults: mpsc::UnboundedSender<Error>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            scenario: Arc::from(scenario),
            calls: Arc::new(AtomicUsize::new(0)),
            signal: Arc::new(Mutex::new(Some(tx))),
            faults,
        };
        (completion, rx)
    }

    /// Signal that the scenario has finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DoubleCompletion`] on every call after the first.
    pub fn done(&self) -> Result {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            tracing::error!(scenario = %self.scenario, "scenario completed more than once");
            let error = Error::DoubleCompletion(self.scenario.to_string());
            let _ = self.faults.send(error.clone());
            return Err(error);
        }
        if let Ok(mut signal) = self.signal.lock() {
            if let Some(tx) = signal.take() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.calls() > 0
    }

    /// How many times [`done`](Self::done) has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("scenario", &self.scenario)
            .field("calls", &self.calls())
            .finish()
    }
}

/// One named, self-contained asynchronous test case.
///
/// The step function receives a [`Case`] and must call
/// [`Case::done`] exactly once when the scenario is logically complete.
/// Returning an error from the step ends the scenario early with that
/// error.
///
/// ```ignore
/// let open = Scenario::new("open chat", |case: Case<Ctx>| async move {
///     let mut port = case.context().connect("worker")?;
///     let tracker = case.tracker();
///     port.set_handler(tracker.handler());
///     // ...
///     case.done()
/// });
/// let minimized = open.clone().with_mode("minimized");
/// ```
pub struct Scenario<C> {
    name: String,
    mode: Option<String>,
    timeout: Option<Duration>,
    timeout_factor: u32,
    step: StepFn<C>,
}

impl<C> Clone for Scenario<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            mode: self.mode.clone(),
            timeout: self.timeout,
            timeout_factor: self.timeout_factor,
            step: self.step.clone(),
        }
    }
}

impl<C: 'static> Scenario<C> {
    pub fn new<F, Fut>(name: impl Into<String>, step: F) -> Self
    where
        F: Fn(Case<C>) -> Fut + 'static,
        Fut: Future<Output = Result> + 'static,
    {
        Self {
            name: name.into(),
            mode: None,
            timeout: None,
            timeout_factor: 1,
            step: Rc::new(move |case| step(case).boxed_local()),
        }
    }

    /// Run the step with a mode argument it can branch on.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Replace the run-wide scenario timeout for this scenario.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Multiply the timeout for known-slow scenarios.
    pub fn with_timeout_factor(mut self, factor: u32) -> Self {
        self.timeout_factor = factor.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    /// Name and mode, as shown in reports.
    pub fn label(&self) -> String {
        match &self.mode {
            Some(mode) => format!("{} [{mode}]", self.name),
            None => self.name.clone(),
        }
    }

    pub fn timeout(&self, config: &Config) -> Duration {
        self.timeout.unwrap_or(config.scenario_timeout()) * self.timeout_factor
    }
}

impl<C> fmt::Debug for Scenario<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("timeout_factor", &self.timeout_factor)
            .finish_non_exhaustive()
    }
}

struct CaseInner<C> {
    name: String,
    mode: Option<String>,
    context: C,
    config: Config,
    checks: Checks,
    completion: Completion,
    scopes: RefCell<Vec<Rc<dyn PendingScope>>>,
}

/// What a scenario's step function works with.
///
/// Gives access to the shared context, records checks, hands out
/// scenario-scoped trackers and carries the completion continuation.
/// Cheap to clone.
pub struct Case<C> {
    inner: Rc<CaseInner<C>>,
}

impl<C> Clone for Case<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: 'static> Case<C> {
    pub(crate) fn new(scenario: &Scenario<C>, context: C, config: Config, completion: Completion) -> Self {
        Self {
            inner: Rc::new(CaseInner {
                name: scenario.name.clone(),
                mode: scenario.mode.clone(),
                context,
                config,
                checks: Checks::new(),
                completion,
                scopes: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mode(&self) -> Option<&str> {
        self.inner.mode.as_deref()
    }

    pub fn is_mode(&self, mode: &str) -> bool {
        self.mode() == Some(mode)
    }

    pub fn context(&self) -> &C {
        &self.inner.context
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn checks(&self) -> &Checks {
        &self.inner.checks
    }

    // ==================== Checks ====================

    pub fn ok(&self, condition: bool, message: impl Into<String>) -> bool {
        self.inner.checks.ok(condition, message)
    }

    pub fn is<T>(&self, actual: T, expected: T, message: impl Into<String>) -> bool
    where
        T: PartialEq + fmt::Debug,
    {
        self.inner.checks.is(actual, expected, message)
    }

    pub fn todo(&self, condition: bool, message: impl Into<String>) {
        self.inner.checks.todo(condition, message)
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.inner.checks.fail(message)
    }

    /// Log a progress note under this scenario's name.
    pub fn info(&self, message: impl fmt::Display) {
        tracing::info!(scenario = %self.inner.name, "{message}");
    }

    // ==================== Completion ====================

    /// Mark the scenario as complete. See [`Completion::done`].
    pub fn done(&self) -> Result {
        self.inner.completion.done()
    }

    /// A `Send` handle on this scenario's continuation.
    pub fn completion(&self) -> Completion {
        self.inner.completion.clone()
    }

    // ==================== Helpers ====================

    /// A fresh tracker scoped to this scenario.
    ///
    /// Whatever is still pending on it when the scenario ends is abandoned
    /// and reported as a failure.
    pub fn tracker<M: Message>(&self) -> CorrelationTracker<M> {
        let tracker = CorrelationTracker::new(&self.inner.config);
        self.track(&tracker);
        tracker
    }

    /// Scope an existing tracker to this scenario.
    pub fn track<M: Message>(&self, tracker: &CorrelationTracker<M>) {
        self.inner
            .scopes
            .borrow_mut()
            .push(Rc::new(tracker.clone()));
    }

    /// A condition waiter using this run's wait timeout and poll interval.
    pub fn wait_for<'a, F>(&self, predicate: F) -> Waiter<'a, F>
    where
        F: Fn() -> bool + 'a,
    {
        wait_for(predicate).with_config(&self.inner.config)
    }

    /// Settle whatever the step left pending: abandoned after a normal end,
    /// timed out when the scenario ran out of time.
    fn release_leftovers(&self, timed_out: bool) {
        let scopes = std::mem::take(&mut *self.inner.scopes.borrow_mut());
        for scope in scopes {
            let leaked = if timed_out {
                scope.expire_all()
            } else {
                scope.abandon_all()
            };
            if leaked.is_empty() {
                continue;
            }
            let names: Vec<String> = leaked.iter().map(ToString::to_string).collect();
            if timed_out {
                tracing::warn!(scenario = %self.inner.name, pending = ?names, "requests timed out with the scenario");
                self.inner
                    .checks
                    .fail(format!("no response before the scenario timed out: {}", names.join(", ")));
            } else {
                tracing::warn!(scenario = %self.inner.name, pending = ?names, "pending requests left behind");
                self.inner
                    .checks
                    .fail(format!("pending requests left behind: {}", names.join(", ")));
            }
        }
    }
}

impl<C> fmt::Debug for Case<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Case")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("checks", &self.inner.checks)
            .field("completion", &self.inner.completion)
            .finish_non_exhaustive()
    }
}

/// Runs scenarios one after another and collects a [`Report`].
///
/// - `setup` runs once before the first scenario. If it fails, no scenario
///   runs: each is reported as [`Outcome::Skipped`] and the run fails.
/// - Each scenario gets a fresh [`Case`] and must complete within its
///   timeout, or it is reported as timed out. Either way the next scenario
///   runs.
/// - After every scenario, leftover pending requests are abandoned and the
///   `between` check runs against the shared context. Its failures are
///   attached to the scenario that just finished.
/// - `teardown` runs once after the last scenario.
///
/// Scenarios never overlap: the next step function is not invoked until the
/// previous scenario's future has been dropped.
///
/// # Example
///
/// ```ignore
/// let report = Runner::new("chat window", ctx)
///     .with_config(Config::default().with_strict_topics(true))
///     .setup(|ctx: Ctx| async move { ctx.init().await })
///     .between(|ctx, checks| {
///         checks.is(ctx.windows().chat_count(), 0, "no chatty children left behind");
///     })
///     .scenario(open_chat)
///     .scenario(open_chat_minimized)
///     .monitor(Tracer)
///     .run()
///     .await;
///
/// std::process::exit(report.exit_code());
/// ```
pub struct Runner<C> {
    name: String,
    config: Config,
    context: C,
    scenarios: Vec<Scenario<C>>,
    setup: Option<HookFn<C>>,
    teardown: Option<HookFn<C>>,
    between: Option<CheckFn<C>>,
    monitors: Vec<Box<dyn Monitor>>,
    filter: Option<String>,
}

impl<C: Clone + 'static> Runner<C> {
    pub fn new(name: impl Into<String>, context: C) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            context,
            scenarios: Vec::new(),
            setup: None,
            teardown: None,
            between: None,
            monitors: Vec::new(),
            filter: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Append a scenario. Insertion order is execution order.
    pub fn scenario(mut self, scenario: Scenario<C>) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn setup<F, Fut>(mut self, setup: F) -> Self
    where
        F: Fn(C) -> Fut + 'static,
        Fut: Future<Output = Result> + 'static,
    {
        self.setup = Some(Box::new(move |ctx| setup(ctx).boxed_local()));
        self
    }

    pub fn teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: Fn(C) -> Fut + 'static,
        Fut: Future<Output = Result> + 'static,
    {
        self.teardown = Some(Box::new(move |ctx| teardown(ctx).boxed_local()));
        self
    }

    /// Check run after every scenario that shared state is back to baseline.
    pub fn between<F>(mut self, check: F) -> Self
    where
        F: Fn(&C, &Checks) + 'static,
    {
        self.between = Some(Box::new(check));
        self
    }

    pub fn monitor(mut self, monitor: impl Monitor + 'static) -> Self {
        self.monitors.push(Box::new(monitor));
        self
    }

    /// Only run scenarios whose label contains `pattern`.
    pub fn filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    fn selected(&self) -> impl Iterator<Item = &Scenario<C>> {
        self.scenarios.iter().filter(|s| match &self.filter {
            Some(pattern) => s.label().contains(pattern.as_str()),
            None => true,
        })
    }

    /// Labels of the scenarios a run would execute, in order.
    pub fn scenario_labels(&self) -> Vec<String> {
        self.selected().map(Scenario::label).collect()
    }

    pub async fn run(self) -> Report {
        let started = Instant::now();
        let mut report = Report::new(self.name.clone());
        let selected: Vec<&Scenario<C>> = self.selected().collect();

        for monitor in &self.monitors {
            monitor.on_run_start(&self.name, selected.len());
        }

        if let Some(setup) = &self.setup {
            if let Err(e) = self.run_hook(setup, "setup").await {
                tracing::error!(run = %self.name, error = %e, "setup failed, no scenario will run");
                report.setup_error = Some(e.to_string());
            }
        }

        if report.setup_error.is_some() {
            for scenario in selected {
                let record = ScenarioRecord::skipped(scenario.name(), scenario.mode());
                for monitor in &self.monitors {
                    monitor.on_scenario_finish(&record);
                }
                report.scenarios.push(record);
            }
        } else {
            for scenario in selected {
                let record = self.run_scenario(scenario).await;
                report.scenarios.push(record);
            }
            if let Some(teardown) = &self.teardown {
                if let Err(e) = self.run_hook(teardown, "teardown").await {
                    tracing::warn!(run = %self.name, error = %e, "teardown failed");
                    report.teardown_error = Some(e.to_string());
                }
            }
        }

        report.duration = started.elapsed();
        for monitor in &self.monitors {
            monitor.on_run_finish(&report);
        }
        report
    }

    async fn run_hook(&self, hook: &HookFn<C>, name: &str) -> Result {
        let timeout = self.config.scenario_timeout();
        match tokio::time::timeout(timeout, hook(self.context.clone())).await {
            Ok(result) => result,
            Err(_) => Err(Error::ScenarioTimeout {
                scenario: name.to_string(),
                timeout,
            }),
        }
    }

    async fn run_scenario(&self, scenario: &Scenario<C>) -> ScenarioRecord {
        let timeout = scenario.timeout(&self.config);
        let (faults_tx, faults) = mpsc::unbounded_channel();
        let (completion, signal) = Completion::new(scenario.name(), faults_tx.clone());
        let case = Case::new(
            scenario,
            self.context.clone(),
            self.config.clone(),
            completion.clone(),
        );

        for monitor in &self.monitors {
            monitor.on_scenario_start(scenario.name(), scenario.mode());
        }
        tracing::debug!(scenario = %scenario.label(), ?timeout, "running scenario");

        let started = Instant::now();
        let mut errors = Vec::new();
        let scope = StepScope {
            faults: faults_tx,
            checks: case.checks().clone(),
        };
        let step = STEP_SCOPE.scope(scope, (scenario.step)(case.clone()));
        let timed_out = drive(step, signal, faults, timeout, &mut errors).await;

        if timed_out {
            errors.push(Error::ScenarioTimeout {
                scenario: scenario.name().to_string(),
                timeout,
            });
        }
        if completion.calls() > 1
            && !errors.iter().any(|e| matches!(e, Error::DoubleCompletion(_)))
        {
            errors.push(Error::DoubleCompletion(scenario.name().to_string()));
        }

        case.release_leftovers(timed_out);
        if let Some(between) = &self.between {
            between(&self.context, case.checks());
        }

        let checks = case.checks().take();
        let outcome = if errors.iter().any(Error::is_structural) {
            Outcome::Aborted
        } else if timed_out {
            Outcome::TimedOut
        } else if !errors.is_empty() || checks.iter().any(|c| c.verdict.is_failure()) {
            Outcome::Failed
        } else {
            Outcome::Passed
        };

        let record = ScenarioRecord {
            name: scenario.name().to_string(),
            mode: scenario.mode.clone(),
            outcome,
            duration: started.elapsed(),
            checks,
            errors: errors.iter().map(ErrorRecord::from).collect(),
        };
        for monitor in &self.monitors {
            for check in &record.checks {
                monitor.on_assertion(&record.name, check);
            }
            monitor.on_scenario_finish(&record);
        }
        record
    }
}

/// Drive a step future until it has finished and the scenario has been
/// completed, the step fails, a structural error is raised, or the timeout
/// elapses.
///
/// Returns `true` on timeout. The step future is dropped on return, so
/// nothing in it runs past the first structural error.
async fn drive(
    step: impl Future<Output = Result>,
    mut signal: oneshot::Receiver<()>,
    mut faults: mpsc::UnboundedReceiver<Error>,
    timeout: Duration,
    errors: &mut Vec<Error>,
) -> bool {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    tokio::pin!(step);

    let mut step_running = true;
    let mut awaiting_signal = true;
    let mut completed = false;

    while step_running || !completed {
        select! {
            biased;
            Some(fault) = faults.recv() => {
                tracing::error!(error = %fault, "structural error, scenario aborted");
                record_once(errors, fault);
                return false;
            }
            result = &mut step, if step_running => {
                step_running = false;
                if let Err(e) = result {
                    record_once(errors, e);
                    return false;
                }
            }
            signalled = &mut signal, if awaiting_signal => {
                awaiting_signal = false;
                completed = signalled.is_ok();
            }
            _ = &mut deadline => return true,
        }
    }
    false
}

fn record_once(errors: &mut Vec<Error>, error: Error) {
    if !errors.contains(&error) {
        errors.push(error);
    }
}

impl<C> fmt::Debug for Runner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("scenarios", &self.scenarios)
            .field("monitors", &self.monitors.len())
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
