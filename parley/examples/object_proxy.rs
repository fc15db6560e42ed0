//! Object proxies handed across a process boundary.
//!
//! A child process hands the parent a JSON payload together with a set of
//! objects the parent may inspect and call into: first over a sync message,
//! then async, then as an rpc whose objects call back into the child while
//! the parent is still handling it. A sync message sent from inside such a
//! callback must be refused. The child reports its own failed checks on
//! `fail` and finishes with `done`.
//!
//! Run with `cargo run --example object_proxy --features cli`.

use parley::{
    Actor, Case, Channel, Config, Context, EndpointId, Envelope, Error, Message, PeerRegistry,
    Result, Runner, Scenario, Topic,
    cli::{Args, init_tracing},
    monitors::Tracer,
};
use serde_json::{Value, json};

const CHILD: &str = "child";
/// A child whose runtime lets a nested sync message through.
const LENIENT_CHILD: &str = "child-lenient";
const NESTED_SYNC_REFUSED: &str = "should not allow nested sync";

#[derive(Clone, Debug, PartialEq)]
enum Cpow {
    Start,
    Sync { json: Value, objects: Value },
    Async { json: Value, objects: Value },
    Rpc { json: Value, objects: Value },
    NestedSync { json: Value, objects: Value },
    /// Call the method at `path` on one of the child's objects.
    Call { path: String },
    Returned { value: Value },
    Threw { error: String },
    Ack,
    Fail { message: String },
    Done,
}

impl Message for Cpow {
    fn topic(&self) -> Topic {
        let topic = match self {
            Cpow::Start => "cpows:start",
            Cpow::Sync { .. } => "cpows:sync",
            Cpow::Async { .. } => "cpows:async",
            Cpow::Rpc { .. } => "cpows:rpc",
            Cpow::NestedSync { .. } => "cpows:nested_sync",
            Cpow::Call { .. } => "cpows:call",
            Cpow::Returned { .. } => "cpows:return",
            Cpow::Threw { .. } => "cpows:throw",
            Cpow::Ack => "cpows:ack",
            Cpow::Fail { .. } => "cpows:fail",
            Cpow::Done => "cpows:done",
        };
        Topic::new(topic)
    }
}

fn payload() -> Value {
    json!({ "check": "ok" })
}

/// The objects the child lends out, as the parent sees them.
fn objects() -> Value {
    let array = json!([1, 2, 3]);
    json!({
        "data": { "i": 5, "b": true, "s": "hello", "x": { "i": 10 } },
        "document": { "title": "Hello, Kitty" },
        "array": array,
        "for_json": { "n": 3, "a": array, "s": "hello", "o": { "x": 10 } },
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    Sync,
    Rpc,
    NestedSync,
}

struct Child {
    ctx: Context<Cpow>,
    stage: Stage,
    allow_nested: bool,
}

impl Child {
    async fn send(&self, port: &EndpointId, message: Cpow) -> Result {
        self.ctx.send_to(port, message).await
    }

    async fn check(&self, port: &EndpointId, condition: bool, message: &str) -> Result {
        if condition {
            return Ok(());
        }
        self.send(port, Cpow::Fail { message: message.into() }).await
    }

    fn call(&self, path: &str) -> Cpow {
        match path {
            "data.f" => Cpow::Returned { value: json!(99) },
            "throwing.get" => Cpow::Threw { error: "Error: proxy access".into() },
            _ => Cpow::Threw { error: format!("TypeError: {path} is not a function") },
        }
    }

    /// A sync message from inside an rpc callback. Returns whether the
    /// runtime refused it.
    fn nested_sync_refused(&self) -> bool {
        !self.allow_nested
    }
}

impl Actor for Child {
    type Message = Cpow;

    async fn handle_message(&mut self, envelope: &Envelope<Cpow>) -> Result {
        let port = envelope.sender().clone();
        match (envelope.message(), self.stage) {
            (Cpow::Start, _) => {
                self.stage = Stage::Sync;
                let sync = Cpow::Sync { json: payload(), objects: objects() };
                self.ctx.reply(envelope, sync).await?;
            }
            (Cpow::Ack, Stage::Sync) => {
                self.stage = Stage::Rpc;
                self.send(&port, Cpow::Async { json: payload(), objects: objects() }).await?;
                self.send(&port, Cpow::Rpc { json: payload(), objects: objects() }).await?;
            }
            (Cpow::Ack, Stage::Rpc) => {
                self.stage = Stage::NestedSync;
                let nested = Cpow::NestedSync { json: payload(), objects: objects() };
                self.send(&port, nested).await?;
            }
            (Cpow::Ack, Stage::NestedSync) => {
                self.stage = Stage::Idle;
                self.send(&port, Cpow::Done).await?;
            }
            (Cpow::Call { path }, Stage::Rpc) if path == "data.reenter" => {
                let answer = Cpow::Returned { value: json!({ "valid": true }) };
                self.ctx.reply(envelope, answer).await?;
            }
            (Cpow::Call { path }, Stage::NestedSync) if path == "data.reenter" => {
                let refused = self.nested_sync_refused();
                self.check(&port, refused, NESTED_SYNC_REFUSED).await?;
                let answer = Cpow::Returned { value: json!({ "valid": true }) };
                self.ctx.reply(envelope, answer).await?;
            }
            (Cpow::Call { path }, _) => {
                let answer = self.call(path);
                self.ctx.reply(envelope, answer).await?;
            }
            (other, stage) => {
                tracing::debug!(message = ?other, ?stage, "child ignored message");
            }
        }
        Ok(())
    }
}

async fn next(port: &mut Channel<Cpow>) -> Result<Cpow> {
    match port.recv().await {
        Some(envelope) => Ok(envelope.message().clone()),
        None => Err(Error::ChannelClosed(port.peer().clone())),
    }
}

/// Call `path` on the child and return its answer. Reports from the child
/// that arrive first are collected into `failures`.
async fn call(port: &mut Channel<Cpow>, path: &str, failures: &mut Vec<String>) -> Result<Cpow> {
    let sent = port.send(Cpow::Call { path: path.into() }).await?;
    loop {
        let Some(envelope) = port.recv().await else {
            return Err(Error::ChannelClosed(port.peer().clone()));
        };
        match envelope.message() {
            Cpow::Fail { message } => failures.push(message.clone()),
            answer if envelope.meta().reply_to() == Some(sent) => return Ok(answer.clone()),
            other => {
                return Err(Error::Assertion(format!("unexpected {other:?} while calling {path}")));
            }
        }
    }
}

fn check_payload(case: &Case<PeerRegistry<Cpow>>, json: &Value, objects: &Value) {
    case.is(&json["check"], &json!("ok"), "json payload");
    let data = &objects["data"];
    case.is(&data["i"], &json!(5), "data.i");
    case.is(&data["b"], &json!(true), "data.b");
    case.is(&data["s"], &json!("hello"), "data.s");
    case.is(&data["x"]["i"], &json!(10), "data.x.i");
    case.is(&objects["document"]["title"], &json!("Hello, Kitty"), "document.title");
    case.is(&objects["array"], &json!([1, 2, 3]), "array");
    case.is(
        &objects["for_json"],
        &json!({ "n": 3, "a": [1, 2, 3], "s": "hello", "o": { "x": 10 } }),
        "for_json",
    );
}

async fn check_calls(
    case: &Case<PeerRegistry<Cpow>>,
    port: &mut Channel<Cpow>,
    failures: &mut Vec<String>,
) -> Result {
    let f = call(port, "data.f", failures).await?;
    case.is(f, Cpow::Returned { value: json!(99) }, "data.f()");
    let thrown = call(port, "throwing.get", failures).await?;
    case.ok(matches!(thrown, Cpow::Threw { .. }), "throwing proxy throws");
    Ok(())
}

async fn object_proxies(case: Case<PeerRegistry<Cpow>>) -> Result {
    let lenient = case.is_mode("nested sync allowed");
    let mut port = case.context().connect(if lenient { LENIENT_CHILD } else { CHILD })?;
    let mut failures = Vec::new();

    port.send(Cpow::Start).await?;
    loop {
        match next(&mut port).await? {
            Cpow::Sync { json, objects } => {
                check_payload(&case, &json, &objects);
                check_calls(&case, &mut port, &mut failures).await?;
                port.send(Cpow::Ack).await?;
            }
            Cpow::Async { json, objects } => {
                check_payload(&case, &json, &objects);
            }
            Cpow::Rpc { json, objects } => {
                check_payload(&case, &json, &objects);
                let reentered = call(&mut port, "data.reenter", &mut failures).await?;
                case.is(reentered, Cpow::Returned { value: json!({ "valid": true }) }, "rpc reentered");
                port.send(Cpow::Ack).await?;
            }
            Cpow::NestedSync { json, objects } => {
                check_payload(&case, &json, &objects);
                call(&mut port, "data.reenter", &mut failures).await?;
                port.send(Cpow::Ack).await?;
            }
            Cpow::Fail { message } => failures.push(message),
            Cpow::Done => break,
            other => case.fail(format!("unexpected message from the child: {other:?}")),
        }
    }

    if lenient {
        case.is(failures, vec![NESTED_SYNC_REFUSED.to_string()], "child reports the nested sync");
    } else {
        for message in failures {
            case.ok(false, message);
        }
    }
    port.close();
    case.done()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    init_tracing();
    let args = Args::parse();
    let config = Config::default().with_strict_topics(true);

    let peers = PeerRegistry::new(&config);
    for (name, allow_nested) in [(CHILD, false), (LENIENT_CHILD, true)] {
        peers.add_actor(name, move |ctx| Child {
            ctx,
            stage: Stage::Idle,
            allow_nested,
        })?;
    }

    let runner = Runner::new("object-proxy", peers.clone())
        .with_config(config)
        .scenario(Scenario::new("object proxies", object_proxies))
        .scenario(Scenario::new("object proxies", object_proxies).with_mode("nested sync allowed"))
        .teardown(|peers: PeerRegistry<Cpow>| async move { peers.stop().await })
        .monitor(Tracer);

    std::process::exit(args.execute(runner).await);
}
