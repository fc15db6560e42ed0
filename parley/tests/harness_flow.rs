use std::{cell::Cell, rc::Rc, time::Duration};

use parley::{
    Actor, Case, Config, Context, Envelope, Error, HarnessContext, Message, Outcome, PeerRegistry,
    RequestState, Result, Runner, Scenario, SelectionPolicy, Topic, Verdict,
};

#[derive(Clone, Debug, PartialEq)]
enum Msg {
    Init,
    InitDone,
    Open(u32),
    Opened(u32),
}

impl Message for Msg {
    fn topic(&self) -> Topic {
        let topic = match self {
            Msg::Init => "test-init",
            Msg::InitDone => "test-init-done",
            Msg::Open(_) => "chatbox-open",
            Msg::Opened(_) => "chatbox-opened",
        };
        Topic::new(topic)
    }
}

struct Worker {
    ctx: Context<Msg>,
}

impl Actor for Worker {
    type Message = Msg;

    async fn handle_message(&mut self, envelope: &Envelope<Msg>) -> Result {
        match envelope.message() {
            Msg::Init => self.ctx.reply(envelope, Msg::InitDone).await,
            Msg::Open(id) => {
                // noise ahead of the answer
                if *id == 7 {
                    self.ctx.reply(envelope, Msg::InitDone).await?;
                }
                self.ctx.reply(envelope, Msg::Opened(*id)).await?;
                // a buggy provider would announce twice
                if *id == 99 {
                    self.ctx.reply(envelope, Msg::Opened(*id)).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
struct Suite {
    harness: HarnessContext,
    peers: PeerRegistry<Msg>,
    between_runs: Rc<Cell<usize>>,
}

async fn open_chat(case: Case<Suite>) -> Result {
    let suite = case.context().clone();
    let mut port = suite.peers.connect("worker")?;
    let tracker = case.tracker::<Msg>();
    port.set_handler(tracker.handler());

    let sent = port.send(Msg::Init).await?;
    let init = tracker.expect_reply("init", sent, ["test-init-done"])?;
    port.wait(init).await?;

    let sent = port.send(Msg::Open(1)).await?;
    let opened = tracker.expect_reply("open", sent, ["chatbox-opened"])?;
    let reply = port.wait(opened).await?;
    case.is(reply.message(), &Msg::Opened(1), "chat opened");

    suite.harness.host("chat-1", SelectionPolicy::FallbackToPrevious)?;
    let harness = suite.harness.clone();
    case.wait_for(move || harness.child_count() == 1)
        .notified_by(suite.harness.changed())
        .await?;
    suite.harness.remove_all();
    case.done()
}

async fn duplicate_notification(case: Case<Suite>) -> Result {
    let mut port = case.context().peers.connect("worker")?;
    let tracker = case.tracker::<Msg>();
    port.set_handler(tracker.handler());

    let sent = port.send(Msg::Open(99)).await?;
    let opened = tracker.expect_reply("open", sent, ["chatbox-opened"])?;
    port.wait(opened).await?;

    let watched = tracker.clone();
    port.dispatch_until(case.wait_for(move || watched.unmatched() == 1))
        .await??;
    case.is(tracker.state("open"), RequestState::Delivered, "resolved once");
    case.is(
        port.transcript().query().with_topic("chatbox-opened").count(),
        2,
        "both copies were seen",
    );
    case.done()
}

async fn leaves_a_chat_behind(case: Case<Suite>) -> Result {
    case.context()
        .harness
        .host("forgotten", SelectionPolicy::MostRecentlyFocused)?;
    case.done()
}

async fn never_finishes(_case: Case<Suite>) -> Result {
    std::future::pending::<()>().await;
    Ok(())
}

async fn finishes_twice(case: Case<Suite>) -> Result {
    case.done()?;
    case.done()
}

async fn recovers(case: Case<Suite>) -> Result {
    case.ok(true, "runs after a timeout and an abort");
    case.done()
}

fn suite() -> Suite {
    let config = Config::default();
    Suite {
        harness: HarnessContext::new(config.clone()),
        peers: PeerRegistry::new(&config),
        between_runs: Rc::default(),
    }
}

async fn setup(suite: Suite) -> Result {
    suite.harness.open_window("main", true)?;
    suite.peers.add_actor("worker", |ctx| Worker { ctx })?;
    Ok(())
}

#[tokio::test]
async fn full_run_reports_every_outcome() {
    let suite = suite();
    let between_runs = suite.between_runs.clone();

    let report = Runner::new("flow", suite)
        .with_config(Config::default().with_settle_window(Duration::from_millis(20)))
        .setup(setup)
        .between(|suite, checks| {
            suite.between_runs.set(suite.between_runs.get() + 1);
            checks.is(suite.harness.child_count(), 0, "no chatty children left behind");
            suite.harness.remove_all();
        })
        .teardown(|suite: Suite| async move { suite.peers.stop().await })
        .scenario(Scenario::new("open chat", open_chat))
        .scenario(Scenario::new("duplicate notification", duplicate_notification))
        .scenario(Scenario::new("leaves a chat behind", leaves_a_chat_behind))
        .scenario(Scenario::new("never finishes", never_finishes).with_timeout(Duration::from_millis(50)))
        .scenario(Scenario::new("finishes twice", finishes_twice))
        .scenario(Scenario::new("recovers", recovers))
        .run()
        .await;

    let outcome = |name: &str| report.scenario(name).map(|s| s.outcome);
    assert_eq!(outcome("open chat"), Some(Outcome::Passed));
    assert_eq!(outcome("duplicate notification"), Some(Outcome::Passed));
    assert_eq!(outcome("leaves a chat behind"), Some(Outcome::Failed));
    assert_eq!(outcome("never finishes"), Some(Outcome::TimedOut));
    assert_eq!(outcome("finishes twice"), Some(Outcome::Aborted));
    assert_eq!(outcome("recovers"), Some(Outcome::Passed));

    let leaked = report.scenario("leaves a chat behind").unwrap();
    let failed: Vec<_> = leaked.failed_checks().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].verdict, Verdict::Fail);
    assert_eq!(failed[0].message, "no chatty children left behind");

    assert_eq!(between_runs.get(), 6);
    assert!(report.teardown_error.is_none());
    assert_eq!(report.exit_code(), 1);
    assert!(report.to_string().ends_with("flow: 3 passed, 1 failed, 1 timed out, 1 aborted"));
}

async fn missing_provider(_suite: Suite) -> Result {
    Err(Error::UnknownPeer("provider".into()))
}

#[tokio::test]
async fn setup_failure_runs_nothing() {
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();

    let report = Runner::new("flow", suite())
        .setup(missing_provider)
        .scenario(Scenario::new("open chat", move |case: Case<Suite>| {
            flag.set(true);
            async move { case.done() }
        }))
        .run()
        .await;

    assert!(!ran.get());
    assert_eq!(report.scenarios.len(), 1);
    assert_eq!(report.scenarios[0].name, "open chat");
    assert_eq!(report.scenarios[0].outcome, Outcome::Skipped);
    assert!(report.to_string().ends_with("1 skipped"));
    assert!(report.setup_error.is_some());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn step_stops_at_a_second_completion() {
    let reached = Rc::new(Cell::new(false));
    let flag = reached.clone();

    let report = Runner::new("flow", suite())
        .scenario(Scenario::new("finishes twice", move |case: Case<Suite>| {
            let flag = flag.clone();
            async move {
                case.done()?;
                // the error is ignored, the scenario must stop anyway
                let _ = case.done();
                tokio::task::yield_now().await;
                flag.set(true);
                Ok(())
            }
        }))
        .scenario(Scenario::new("recovers", recovers))
        .run()
        .await;

    assert!(!reached.get());
    let record = report.scenario("finishes twice").unwrap();
    assert_eq!(record.outcome, Outcome::Aborted);
    assert_eq!(record.errors.len(), 1);
    assert_eq!(report.scenario("recovers").map(|s| s.outcome), Some(Outcome::Passed));
}

#[tokio::test]
async fn ignored_send_after_close_aborts() {
    let reached = Rc::new(Cell::new(false));
    let flag = reached.clone();

    let report = Runner::new("flow", suite())
        .setup(setup)
        .teardown(|suite: Suite| async move { suite.peers.stop().await })
        .scenario(Scenario::new("sends after close", move |case: Case<Suite>| {
            let flag = flag.clone();
            async move {
                let mut port = case.context().peers.connect("worker")?;
                port.close();
                let _ = port.send(Msg::Init).await;
                tokio::task::yield_now().await;
                flag.set(true);
                case.done()
            }
        }))
        .scenario(Scenario::new("recovers", recovers))
        .run()
        .await;

    assert!(!reached.get());
    let record = report.scenario("sends after close").unwrap();
    assert_eq!(record.outcome, Outcome::Aborted);
    assert_eq!(record.errors.len(), 1);
    assert!(record.errors[0].message.contains("is closed"));
    assert_eq!(report.scenario("recovers").map(|s| s.outcome), Some(Outcome::Passed));
}

async fn noisy_open(case: Case<Suite>) -> Result {
    let mut port = case.context().peers.connect("worker")?;
    let tracker = case.tracker::<Msg>();
    port.set_handler(tracker.handler());

    let sent = port.send(Msg::Open(7)).await?;
    let opened = tracker.expect_reply("open", sent, ["chatbox-opened"])?;
    let reply = port.wait(opened).await?;
    case.is(reply.message(), &Msg::Opened(7), "answer arrives after the noise");
    case.is(port.errors().len(), 1, "noise is kept on the port");
    case.done()
}

#[tokio::test]
async fn strict_noise_fails_without_cutting_the_wait() {
    let report = Runner::new("flow", suite())
        .with_config(Config::default().with_strict_topics(true))
        .setup(setup)
        .teardown(|suite: Suite| async move { suite.peers.stop().await })
        .scenario(Scenario::new("noisy open", noisy_open))
        .scenario(Scenario::new("recovers", recovers))
        .run()
        .await;

    let record = report.scenario("noisy open").unwrap();
    assert_eq!(record.outcome, Outcome::Failed);
    assert!(record.errors.is_empty());
    let failed: Vec<_> = record.failed_checks().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].message.contains("'test-init-done'"));
    assert!(record.checks.iter().any(|c| c.message == "answer arrives after the noise" && c.verdict == Verdict::Pass));
    assert_eq!(report.scenario("recovers").map(|s| s.outcome), Some(Outcome::Passed));
}
