//! Emergency calls on a simulated handset.
//!
//! Dialing an invalid emergency number must go through `dialing` and then
//! fail with `BadNumberError`, leaving the call list empty. The emulator
//! console reports the modem's view of the calls.
//!
//! Run with `cargo run --example emergency_call --features cli`.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley::{
    Actor, Case, Channel, Config, Context, CorrelationTracker, Envelope, Message, OK,
    PeerRegistry, Result, Runner, Scenario, ScriptedConsole, StepAction, Topic,
    cli::{Args, init_tracing},
    expect_ok,
    monitors::Tracer,
};

const TELEPHONY: &str = "telephony";
const EMERGENCY_NUMBERS: [&str; 3] = ["112", "911", "999"];
const NETWORK_DELAY: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
enum Call {
    DialEmergency { number: String },
    HangUp { number: String },
    State { number: String, state: String },
    Error { number: String, name: String },
}

impl Message for Call {
    fn topic(&self) -> Topic {
        let topic = match self {
            Call::DialEmergency { .. } => "dial-emergency",
            Call::HangUp { .. } => "hang-up",
            Call::State { .. } => "call-state",
            Call::Error { .. } => "call-error",
        };
        Topic::new(topic)
    }
}

/// Calls the modem currently knows about, as `(number, state)`.
type CallList = Arc<Mutex<Vec<(String, String)>>>;

fn calls_of(list: &CallList) -> Vec<(String, String)> {
    list.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// The handset's telephony service.
struct Telephony {
    ctx: Context<Call>,
    calls: CallList,
    /// Events the network delivers shortly after dialing.
    network: Vec<Call>,
    in_flight: bool,
}

impl Telephony {
    fn set_state(&self, number: &str, state: &str) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.retain(|(n, _)| n != number);
        if state != "disconnected" {
            calls.push((number.to_string(), state.to_string()));
        }
    }
}

impl Actor for Telephony {
    type Message = Call;

    async fn handle_message(&mut self, envelope: &Envelope<Call>) -> Result {
        match envelope.message() {
            Call::DialEmergency { number } => {
                self.set_state(number, "dialing");
                let dialing = Call::State {
                    number: number.clone(),
                    state: "dialing".into(),
                };
                self.ctx.reply(envelope, dialing).await?;

                let outcome = if EMERGENCY_NUMBERS.contains(&number.as_str()) {
                    Call::State {
                        number: number.clone(),
                        state: "connected".into(),
                    }
                } else {
                    Call::Error {
                        number: number.clone(),
                        name: "BadNumberError".into(),
                    }
                };
                self.network.push(outcome);
                Ok(())
            }
            Call::HangUp { number } => {
                self.set_state(number, "disconnected");
                let hung_up = Call::State {
                    number: number.clone(),
                    state: "disconnected".into(),
                };
                self.ctx.reply(envelope, hung_up).await
            }
            _ => Ok(()),
        }
    }

    async fn step(&mut self) -> Result<StepAction> {
        if self.network.is_empty() {
            return Ok(StepAction::AwaitMessage);
        }
        if !self.in_flight {
            self.in_flight = true;
            return Ok(StepAction::Backoff(NETWORK_DELAY));
        }
        self.in_flight = false;
        for event in std::mem::take(&mut self.network) {
            match &event {
                Call::State { number, state } => self.set_state(number, state),
                Call::Error { number, .. } => self.set_state(number, "disconnected"),
                _ => {}
            }
            self.ctx.broadcast(event).await?;
        }
        Ok(StepAction::AwaitMessage)
    }
}

#[derive(Clone)]
struct Suite {
    peers: PeerRegistry<Call>,
    emulator: ScriptedConsole,
    calls: CallList,
}

async fn connect(case: &Case<Suite>) -> Result<(Channel<Call>, CorrelationTracker<Call>)> {
    let mut port = case.context().peers.connect(TELEPHONY)?;
    let tracker = case.tracker::<Call>();
    port.set_handler(tracker.handler());
    Ok((port, tracker))
}

/// Dial `number` and check the call starts out `dialing`.
async fn dial(
    case: &Case<Suite>,
    port: &mut Channel<Call>,
    tracker: &CorrelationTracker<Call>,
    number: &str,
) -> Result {
    case.info(format!("make an outgoing call to {number}"));
    let sent = port
        .send(Call::DialEmergency {
            number: number.into(),
        })
        .await?;
    let state = tracker.expect_reply("dial", sent, ["call-state"])?;
    let answer = port.wait(state).await?;
    case.is(
        answer.message(),
        &Call::State {
            number: number.into(),
            state: "dialing".into(),
        },
        "outgoing call is dialing",
    );
    Ok(())
}

async fn bad_number(case: Case<Suite>) -> Result {
    let number = "not a valid emergency number";
    let calls = case.context().calls.clone();
    let (mut port, tracker) = connect(&case).await?;

    let failed = tracker.expect("onerror", ["call-error"])?;
    dial(&case, &mut port, &tracker, number).await?;
    case.is(calls_of(&calls).len(), 1, "one call while dialing");

    let error = port.wait(failed).await?;
    match error.message() {
        Call::Error { number: n, name } => {
            case.is(n.as_str(), number, "error is for the outgoing call");
            case.is(name.as_str(), "BadNumberError", "error name");
        }
        other => case.fail(format!("unexpected error payload: {other:?}")),
    }

    let watched = calls.clone();
    case.wait_for(move || calls_of(&watched).is_empty())
        .message("call list drained")
        .await?;

    let lines = expect_ok(&case.context().emulator, "gsm list").await?;
    case.info(format!("initial call list: {lines:?}"));
    case.is(lines.len(), 1, "modem lists no calls");
    case.done()
}

async fn valid_number(case: Case<Suite>) -> Result {
    let number = "112";
    let (mut port, tracker) = connect(&case).await?;

    dial(&case, &mut port, &tracker, number).await?;
    // after the dialing reply: both travel under the same topic
    let connected = tracker.expect("onconnected", ["call-state"])?;
    let state = port.wait(connected).await?;
    case.is(
        state.message(),
        &Call::State {
            number: number.into(),
            state: "connected".into(),
        },
        "emergency call connected",
    );

    let lines = expect_ok(&case.context().emulator, "gsm list").await?;
    case.ok(
        lines.iter().any(|l| l.contains(number)),
        "modem lists the active call",
    );

    let sent = port
        .send(Call::HangUp {
            number: number.into(),
        })
        .await?;
    let hung_up = tracker.expect_reply("hang-up", sent, ["call-state"])?;
    port.wait(hung_up).await?;
    case.is(calls_of(&case.context().calls).len(), 0, "call list empty after hang up");
    case.done()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    init_tracing();
    let args = Args::parse();
    let config = Config::default().with_strict_topics(true);

    let calls = CallList::default();
    let emulator = ScriptedConsole::new();
    let listed = calls.clone();
    emulator.on("gsm list", move |_| {
        let mut lines: Vec<String> = calls_of(&listed)
            .into_iter()
            .map(|(number, state)| format!("outbound to  {number} : {state}"))
            .collect();
        lines.insert(0, OK.to_string());
        Ok(lines)
    });

    let peers = PeerRegistry::new(&config);
    let modem = calls.clone();
    peers.add_actor(TELEPHONY, move |ctx| Telephony {
        ctx,
        calls: modem,
        network: Vec::new(),
        in_flight: false,
    })?;

    let suite = Suite {
        peers,
        emulator,
        calls,
    };
    let runner = Runner::new("emergency-call", suite)
        .with_config(config)
        .between(|suite, checks| {
            checks.ok(calls_of(&suite.calls).is_empty(), "no calls left behind");
        })
        .scenario(Scenario::new("dial bad number", bad_number))
        .scenario(Scenario::new("dial emergency number", valid_number))
        .teardown(|suite: Suite| async move { suite.peers.stop().await })
        .monitor(Tracer);

    std::process::exit(args.execute(runner).await);
}
