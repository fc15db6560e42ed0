//! Incoming SMS on a simulated handset, then lookups that must fail.
//!
//! The emulator console injects an SMS. The message manager peer announces
//! it on every open port and answers `get`/`delete` requests with a success
//! or an error topic, the way a DOM request resolves `onsuccess` or
//! `onerror`.
//!
//! Run with `cargo run --example messaging --features cli`.

use std::{cell::Cell, collections::BTreeMap, rc::Rc};

use parley::{
    Actor, Case, Channel, Config, Context, CorrelationTracker, Envelope, Message, OK,
    PeerRegistry, Result, Runner, Scenario, ScriptedConsole, StepAction, Topic,
    cli::{Args, init_tracing},
    expect_ok,
    monitors::Tracer,
    wire::WireMessage,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver};

const MANAGER: &str = "mobile-message";
const REMOTE_NUMBER: &str = "5559997777";
const IN_TEXT: &str = "Incoming SMS message. Mozilla Firefox OS!";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Sms {
    id: u32,
    sender: String,
    body: String,
    delivery: String,
    read: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum Mobile {
    Received { message: Sms },
    GetMessage { id: i64 },
    Found { message: Sms },
    Failed { error: String },
    Delete { id: i64 },
    Deleted { deleted: bool },
}

impl Message for Mobile {
    fn topic(&self) -> Topic {
        let topic = match self {
            Mobile::Received { .. } => "received",
            Mobile::GetMessage { .. } => "get-message",
            Mobile::Found { .. } => "request-success",
            Mobile::Failed { .. } => "request-error",
            Mobile::Delete { .. } => "delete",
            Mobile::Deleted { .. } => "request-success",
        };
        Topic::new(topic)
    }
}

/// The handset's message store.
struct Manager {
    ctx: Context<Mobile>,
    incoming: UnboundedReceiver<(String, String)>,
    store: BTreeMap<u32, Sms>,
    next_id: u32,
}

impl Manager {
    fn lookup(&self, id: i64) -> Option<&Sms> {
        u32::try_from(id).ok().and_then(|id| self.store.get(&id))
    }
}

impl Actor for Manager {
    type Message = Mobile;

    async fn handle_message(&mut self, envelope: &Envelope<Mobile>) -> Result {
        let answer = match envelope.message() {
            Mobile::GetMessage { id } => match self.lookup(*id) {
                Some(sms) => Mobile::Found {
                    message: sms.clone(),
                },
                None => Mobile::Failed {
                    error: "NotFoundError".into(),
                },
            },
            Mobile::Delete { id } => {
                let deleted = u32::try_from(*id)
                    .ok()
                    .and_then(|id| self.store.remove(&id))
                    .is_some();
                Mobile::Deleted { deleted }
            }
            _ => return Ok(()),
        };
        self.ctx.reply(envelope, answer).await
    }

    async fn step(&mut self) -> Result<StepAction> {
        let Some((sender, body)) = self.incoming.recv().await else {
            return Ok(StepAction::Never);
        };
        self.next_id += 1;
        let sms = Sms {
            id: self.next_id,
            sender,
            body,
            delivery: "received".into(),
            read: false,
        };
        self.store.insert(sms.id, sms.clone());
        self.ctx.broadcast(Mobile::Received { message: sms }).await?;
        Ok(StepAction::Continue)
    }
}

#[derive(Clone)]
struct Suite {
    peers: PeerRegistry<Mobile>,
    emulator: ScriptedConsole,
    in_sms_id: Rc<Cell<Option<u32>>>,
}

async fn connect(case: &Case<Suite>) -> Result<(Channel<Mobile>, CorrelationTracker<Mobile>)> {
    let mut port = case.context().peers.connect(MANAGER)?;
    let tracker = case.tracker::<Mobile>();
    port.set_handler(tracker.handler());
    Ok((port, tracker))
}

/// Inject an SMS through the emulator and return what the manager announced.
async fn receive(case: &Case<Suite>, port: &mut Channel<Mobile>, tracker: &CorrelationTracker<Mobile>, text: &str) -> Result<Sms> {
    let received = tracker.expect("onreceived", ["received"])?;
    let lines = expect_ok(&case.context().emulator, &format!("sms send {REMOTE_NUMBER} {text}")).await?;
    case.is(lines[0].as_str(), OK, "emulator output");

    let envelope = port.wait(received).await?;
    let Mobile::Received { message } = envelope.message().clone() else {
        case.fail(format!("unexpected payload on 'received': {:?}", envelope.message()));
        return Err(parley::Error::Assertion("no incoming sms".into()));
    };

    // what a real handset would have put on the wire
    let wire = WireMessage::encode(envelope.message())?;
    let decoded: Mobile = WireMessage::from_json(&wire.to_json()?)?.into_message(port.id())?;
    case.is(&decoded, envelope.message(), "incoming sms survives the wire");
    Ok(message)
}

async fn incoming_sms(case: Case<Suite>) -> Result {
    let (mut port, tracker) = connect(&case).await?;
    let sms = receive(&case, &mut port, &tracker, IN_TEXT).await?;

    case.ok(sms.id > 0, "sms id");
    case.is(sms.body.as_str(), IN_TEXT, "msg body");
    case.is(sms.delivery.as_str(), "received", "delivery");
    case.is(sms.sender.as_str(), REMOTE_NUMBER, "sender");
    case.info(format!("received SMS (id: {})", sms.id));
    case.context().in_sms_id.set(Some(sms.id));
    case.done()
}

async fn incoming_multipart(case: Case<Suite>) -> Result {
    let (mut port, tracker) = connect(&case).await?;
    // longer than one 160-character segment
    let text = "FirefoxOS ".repeat(24);
    let sms = receive(&case, &mut port, &tracker, &text).await?;

    case.is(sms.body, text, "msg body");
    case.is(sms.read, false, "read");

    let sent = port.send(Mobile::Delete { id: i64::from(sms.id) }).await?;
    let deleted = tracker.expect_reply("cleanup", sent, ["request-success"])?;
    port.wait(deleted).await?;
    case.done()
}

/// Ask for message `id` and require a `NotFoundError`.
async fn get_missing(case: &Case<Suite>, id: i64) -> Result {
    let (mut port, tracker) = connect(case).await?;
    case.info(format!("attempting to get non-existent message (id: {id})"));

    let sent = port.send(Mobile::GetMessage { id }).await?;
    let request = tracker.expect_reply("get", sent, ["request-success", "request-error"])?;
    let answer = port.wait(request).await?;
    match answer.message() {
        Mobile::Failed { error } => case.is(error.as_str(), "NotFoundError", "error returned"),
        Mobile::Found { message } => {
            case.fail(format!("got SMS (id: {}) but should not have", message.id));
            false
        }
        other => {
            case.fail(format!("unexpected answer: {other:?}"));
            false
        }
    };
    case.done()
}

async fn get_nonexistent(case: Case<Suite>) -> Result {
    let Some(id) = case.context().in_sms_id.get() else {
        case.fail("no incoming SMS to start from");
        return case.done();
    };
    get_missing(&case, i64::from(id) + 1).await
}

async fn get_invalid_id(case: Case<Suite>) -> Result {
    get_missing(&case, -1).await
}

async fn delete_message(case: Case<Suite>) -> Result {
    let Some(id) = case.context().in_sms_id.take() else {
        case.fail("no incoming SMS to delete");
        return case.done();
    };
    let (mut port, tracker) = connect(&case).await?;

    let sent = port.send(Mobile::Delete { id: i64::from(id) }).await?;
    let request = tracker.expect_reply("delete", sent, ["request-success", "request-error"])?;
    let answer = port.wait(request).await?;
    case.is(answer.message(), &Mobile::Deleted { deleted: true }, "manager.delete succeeded");
    case.done()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    init_tracing();
    let args = Args::parse();
    let config = Config::default().with_strict_topics(true);

    let (injector, incoming) = mpsc::unbounded_channel();
    let emulator = ScriptedConsole::new();
    emulator.on("sms send", move |args| {
        let Some((number, text)) = args.split_once(' ') else {
            return Ok(vec!["KO: missing text".to_string()]);
        };
        match injector.send((number.to_string(), text.to_string())) {
            Ok(()) => Ok(vec![OK.to_string()]),
            Err(_) => Ok(vec!["KO: radio off".to_string()]),
        }
    });

    let peers = PeerRegistry::new(&config);
    peers.add_actor(MANAGER, |ctx| Manager {
        ctx,
        incoming,
        store: BTreeMap::new(),
        next_id: 0,
    })?;

    let suite = Suite {
        peers: peers.clone(),
        emulator,
        in_sms_id: Rc::default(),
    };
    let runner = Runner::new("messaging", suite)
        .with_config(config)
        .scenario(Scenario::new("incoming sms", incoming_sms))
        .scenario(Scenario::new("get non-existent message", get_nonexistent))
        .scenario(Scenario::new("get message with invalid id", get_invalid_id))
        .scenario(Scenario::new("delete message", delete_message))
        .scenario(Scenario::new("incoming multipart sms", incoming_multipart))
        .teardown(|suite: Suite| async move { suite.peers.stop().await })
        .monitor(Tracer);

    let code = args.execute(runner).await;
    std::process::exit(code);
}
