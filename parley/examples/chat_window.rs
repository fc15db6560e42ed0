//! Chat windows opened on behalf of social providers.
//!
//! The harness plays the browser: it owns the windows and decides where a
//! chat is hosted. Providers run as simulated peers and talk to it over
//! worker ports.
//!
//! Run with `cargo run --example chat_window --features cli`.

use std::{cell::Cell, rc::Rc, time::Duration};

use parley::{
    Actor, Case, Channel, Config, Context, CorrelationTracker, Envelope, HarnessContext, Message,
    PeerRegistry, RequestState, Result, Runner, Scenario, SelectionPolicy, TargetId, Topic,
    cli::{Args, init_tracing},
    monitors::Tracer,
};

const PROVIDERS: [&str; 3] = ["provider@example.com", "provider@test1", "provider@test2"];
const MAIN_WINDOW: &str = "main";

#[derive(Clone, Debug, PartialEq)]
enum Chat {
    Init,
    InitDone,
    /// Ask the provider to open chat `id`.
    OpenChat { id: u32 },
    /// The provider asks the browser to host chat `id`.
    ChatRequest { id: u32 },
    /// The browser tells the provider the chat is on screen.
    ChatShown { id: u32 },
    ChatOpened { id: u32, result: String },
    Logout,
    LoggedOut,
}

impl Message for Chat {
    fn topic(&self) -> Topic {
        let topic = match self {
            Chat::Init => "test-init",
            Chat::InitDone => "test-init-done",
            Chat::OpenChat { .. } => "test-chatbox-open",
            Chat::ChatRequest { .. } => "chat-request",
            Chat::ChatShown { .. } => "chat-shown",
            Chat::ChatOpened { .. } => "chatbox-opened",
            Chat::Logout => "test-logout",
            Chat::LoggedOut => "social:logged-out",
        };
        Topic::new(topic)
    }
}

/// A social provider's worker.
struct Provider {
    ctx: Context<Chat>,
}

impl Actor for Provider {
    type Message = Chat;

    async fn handle_message(&mut self, envelope: &Envelope<Chat>) -> Result {
        match envelope.message() {
            Chat::Init => self.ctx.reply(envelope, Chat::InitDone).await,
            Chat::OpenChat { id } => self.ctx.reply(envelope, Chat::ChatRequest { id: *id }).await,
            Chat::ChatShown { id } => {
                let opened = Chat::ChatOpened {
                    id: *id,
                    result: "ok".into(),
                };
                self.ctx.reply(envelope, opened).await
            }
            Chat::Logout => self.ctx.broadcast(Chat::LoggedOut).await.map(|_| ()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
struct Suite {
    harness: HarnessContext,
    peers: PeerRegistry<Chat>,
}

fn chat_name(id: u32) -> String {
    format!("chat-{id}")
}

/// Open a worker port to `provider` and run the init handshake on it.
async fn connect(
    case: &Case<Suite>,
    provider: &str,
) -> Result<(Channel<Chat>, CorrelationTracker<Chat>)> {
    let mut port = case.context().peers.connect(provider)?;
    let tracker = case.tracker::<Chat>();
    port.set_handler(tracker.handler());

    let sent = port.send(Chat::Init).await?;
    let init = tracker.expect_reply("init", sent, ["test-init-done"])?;
    port.wait(init).await?;
    Ok((port, tracker))
}

/// Ask for a chat and wait until the browser hosted it and the provider
/// confirmed. `key` names the confirmation request on `tracker`.
async fn open_chat(
    case: &Case<Suite>,
    port: &mut Channel<Chat>,
    tracker: &CorrelationTracker<Chat>,
    key: &str,
    id: u32,
) -> Result<TargetId> {
    let asked = port.send(Chat::OpenChat { id }).await?;
    let request = tracker.expect_reply(format!("{key}-request"), asked, ["chat-request"])?;
    port.wait(request).await?;

    let host = case
        .context()
        .harness
        .host(chat_name(id), SelectionPolicy::FallbackToPrevious)?;
    let shown = port.send(Chat::ChatShown { id }).await?;
    let opened = tracker.expect_reply(key, shown, ["chatbox-opened"])?;
    let reply = port.wait(opened).await?;
    if let Chat::ChatOpened { result, .. } = reply.message() {
        case.is(result.as_str(), "ok", "the provider says it got a chatbox");
    }
    Ok(host)
}

/// Open a chat in the main window and close it again. In "minimized" mode
/// the chat is asked for a second time while open, which must reuse the
/// existing chatbox.
async fn open_chat_case(case: Case<Suite>) -> Result {
    let harness = case.context().harness.clone();
    let (mut port, tracker) = connect(&case, PROVIDERS[0]).await?;

    let host = open_chat(&case, &mut port, &tracker, "chat-1", 1).await?;
    case.is(host.as_str(), MAIN_WINDOW, "chat opened in the main window");
    case.ok(harness.has_children(), "chatbox is open");

    if case.is_mode("minimized") {
        case.info("minimizing the chat and asking for it again");
        let asked = port.send(Chat::OpenChat { id: 1 }).await?;
        let again = tracker.expect_reply("chat-1-again-request", asked, ["chat-request"])?;
        port.wait(again).await?;
        harness.host(chat_name(1), SelectionPolicy::FallbackToPrevious)?;

        let reopened = tracker.reopen("chat-1", ["chatbox-opened"])?;
        port.send(Chat::ChatShown { id: 1 }).await?;
        port.wait(reopened).await?;

        case.is(tracker.state("chat-1"), RequestState::Delivered, "second open delivered");
        case.is(harness.child_count(), 1, "should only have been one chat open");
        let host = harness.window(MAIN_WINDOW);
        case.is(
            host.as_ref().and_then(|w| w.selected().map(str::to_owned)),
            Some(chat_name(1)),
            "reopened chat is selected",
        );
        tracker.close("chat-1")?;
    }

    harness.remove_child(&chat_name(1));
    let watched = harness.clone();
    case.wait_for(move || !watched.has_children())
        .message("chatbox closed")
        .notified_by(harness.changed())
        .await?;
    port.close();
    case.done()
}

async fn same_chat_callbacks(case: Case<Suite>) -> Result {
    let harness = case.context().harness.clone();
    let (mut port, tracker) = connect(&case, PROVIDERS[0]).await?;

    let keys = ["callback-1", "callback-2", "callback-3"];
    for key in keys {
        open_chat(&case, &mut port, &tracker, key, 7).await?;
    }

    for key in keys {
        case.is(tracker.state(key), RequestState::Delivered, format!("{key} called once"));
    }
    let opened = port.transcript().query().with_topic("chatbox-opened").count();
    case.is(opened, keys.len(), "each callback got its own open message");
    case.is(harness.child_count(), 1, "all callbacks share one chat");

    harness.remove_child(&chat_name(7));
    port.close();
    case.done()
}

async fn only_one_callback(case: Case<Suite>) -> Result {
    let harness = case.context().harness.clone();
    let (mut port, tracker) = connect(&case, PROVIDERS[1]).await?;

    open_chat(&case, &mut port, &tracker, "single", 3).await?;
    let late = port.drain().await;
    case.ok(late.is_empty(), "nothing arrived after the chat opened");
    case.is(
        port.transcript().query().with_topic("chatbox-opened").count(),
        1,
        "only got one open message",
    );
    case.is(tracker.unmatched(), 0, "no stray responses");

    harness.remove_all();
    port.close();
    case.done()
}

async fn multiple_providers_logout(case: Case<Suite>) -> Result {
    let peers = case.context().peers.clone();
    let (mut first, _) = connect(&case, PROVIDERS[1]).await?;
    let (mut second, _) = connect(&case, PROVIDERS[1]).await?;
    let (mut other, _) = connect(&case, PROVIDERS[2]).await?;
    case.ok(first.id() != second.id(), "each port is distinct");

    let logouts = Rc::new(Cell::new(0));
    for port in [&mut first, &mut second] {
        let seen = logouts.clone();
        port.set_handler(move |envelope| {
            if envelope.topic() == "social:logged-out" {
                seen.set(seen.get() + 1);
            }
            Ok(())
        });
    }

    first.send(Chat::Logout).await?;
    let seen = logouts.clone();
    first.dispatch_until(case.wait_for(move || seen.get() >= 1)).await??;
    let seen = logouts.clone();
    second
        .dispatch_until(case.wait_for(move || seen.get() >= 2).message("every port logged out"))
        .await??;

    let stray = other.drain().await;
    case.ok(
        stray.iter().all(|e| e.topic() != "social:logged-out"),
        "other providers stay logged in",
    );
    case.ok(peers.is_running(PROVIDERS[2]), "other provider still running");

    for port in [&mut first, &mut second, &mut other] {
        port.close();
    }
    case.done()
}

async fn window_chooser(case: Case<Suite>) -> Result {
    let harness = case.context().harness.clone();
    let (mut port, tracker) = connect(&case, PROVIDERS[0]).await?;

    harness.open_window("private", false)?;
    case.is(harness.focused(), Some(TargetId::new("private")), "private window has focus");

    let host = open_chat(&case, &mut port, &tracker, "chooser", 9).await?;
    case.is(host.as_str(), MAIN_WINDOW, "chat falls back to the non-private window");
    case.todo(
        host.as_str() == "private",
        "chat follows focus into a private window",
    );

    harness.close_window("private")?;
    harness.remove_all();
    port.close();
    case.done()
}

async fn setup(suite: Suite) -> Result {
    suite.harness.open_window(MAIN_WINDOW, true)?;
    for name in PROVIDERS {
        suite.peers.add_actor(name, |ctx| Provider { ctx })?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    let args = Args::parse();

    let config = Config::default()
        .with_strict_topics(true)
        .with_settle_window(Duration::from_millis(20));
    let suite = Suite {
        harness: HarnessContext::new(config.clone()),
        peers: PeerRegistry::new(&config),
    };

    let runner = Runner::new("chat-window", suite)
        .with_config(config)
        .setup(setup)
        .between(|suite, checks| {
            checks.is(suite.harness.child_count(), 0, "no chatty children left behind");
            checks.is(suite.harness.window_count(), 1, "only the main window is open");
        })
        .teardown(|suite: Suite| async move { suite.peers.stop().await })
        .scenario(Scenario::new("open chat", open_chat_case))
        .scenario(Scenario::new("open chat", open_chat_case).with_mode("minimized"))
        .scenario(Scenario::new("same chat callbacks", same_chat_callbacks))
        .scenario(Scenario::new("only one callback", only_one_callback))
        .scenario(Scenario::new("multiple providers", multiple_providers_logout).with_timeout_factor(2))
        .scenario(Scenario::new("window chooser", window_chooser))
        .monitor(Tracer);

    std::process::exit(args.execute(runner).await);
}
