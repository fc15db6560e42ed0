use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
    sync::{Arc, atomic::AtomicBool},
};

use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{
    Actor, Channel, Config, Context, EndpointId, Error, Message, Result,
    context::Ports,
    internal::{Attachment, PeerController},
};

/// Maximum number of messages a peer handles before yielding to `step`.
const MAX_MESSAGES_PER_TICK: usize = 10;

struct PeerHandle<M> {
    attach: UnboundedSender<Attachment<M>>,
    ports: Ports<M>,
    cancel: CancellationToken,
    connections: Cell<u64>,
}

struct Inner<M> {
    config: Config,
    peers: RefCell<HashMap<EndpointId, PeerHandle<M>>>,
    tasks: RefCell<JoinSet<Result<()>>>,
    cancel: CancellationToken,
}

/// Spawns simulated peers and hands out channels to them.
///
/// Each peer runs as its own Tokio task. [`connect`](Self::connect) opens a
/// new duplex port to a peer and returns the harness end as a
/// [`Channel`]; a peer can have any number of ports open at once, and
/// answers on the port a request came from.
///
/// The registry is a cheap-to-clone handle for the single-threaded harness
/// side, so it can live in a scenario context.
///
/// # Example
///
/// ```ignore
/// let peers = PeerRegistry::<ChatMessage>::new(&config);
/// peers.add_actor("worker", |ctx| Worker { ctx })?;
///
/// let mut port = peers.connect("worker")?;   // "worker#1"
/// let mut other = peers.connect("worker")?;  // "worker#2"
///
/// peers.stop().await?;
/// ```
pub struct PeerRegistry<M: Message> {
    inner: Rc<Inner<M>>,
}

impl<M: Message> Clone for PeerRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Message> Default for PeerRegistry<M> {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl<M: Message> PeerRegistry<M> {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Rc::new(Inner {
                config: config.clone(),
                peers: RefCell::default(),
                tasks: RefCell::new(JoinSet::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Register and start a peer.
    ///
    /// The factory receives the peer's [`Context`]. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePeer`] if the name is taken.
    pub fn add_actor<A, F>(&self, name: &str, factory: F) -> Result<EndpointId>
    where
        A: Actor<Message = M>,
        F: FnOnce(Context<M>) -> A,
    {
        let peer_id = EndpointId::new(name);
        let mut peers = self.inner.peers.borrow_mut();
        if peers.contains_key(&peer_id) {
            return Err(Error::DuplicatePeer(peer_id));
        }

        let ports = Ports::default();
        let ctx = Context::new(peer_id.clone(), ports.clone(), Arc::new(AtomicBool::new(true)));
        let actor = factory(ctx.clone());
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();
        let cancel = self.inner.cancel.child_token();

        let controller = PeerController {
            actor,
            ctx,
            attach_rx,
            cancel: cancel.clone(),
            max_messages_per_tick: MAX_MESSAGES_PER_TICK,
        };
        self.inner
            .tasks
            .borrow_mut()
            .spawn(controller.run_to_end());

        peers.insert(
            peer_id.clone(),
            PeerHandle {
                attach: attach_tx,
                ports,
                cancel,
                connections: Cell::new(0),
            },
        );
        tracing::debug!(peer = %peer_id, "peer registered");
        Ok(peer_id)
    }

    /// Open a new port to a peer.
    ///
    /// Every call yields a distinct channel (`name#1`, `name#2`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPeer`] for an unregistered name and
    /// [`Error::PeerStopped`] if the peer is no longer running.
    pub fn connect(&self, name: &str) -> Result<Channel<M>> {
        let peer_id = EndpointId::new(name);
        let peers = self.inner.peers.borrow();
        let handle = peers
            .get(&peer_id)
            .ok_or_else(|| Error::UnknownPeer(peer_id.clone()))?;
        if handle.cancel.is_cancelled() || handle.attach.is_closed() {
            return Err(Error::PeerStopped(peer_id));
        }

        let n = handle.connections.get() + 1;
        handle.connections.set(n);
        let port = peer_id.connection(n);

        let capacity = self.inner.config.channel_capacity();
        let (to_peer, from_harness) = mpsc::channel(capacity);
        let (to_harness, from_peer) = mpsc::channel(capacity);

        handle.ports.attach(port.clone(), to_harness);
        handle
            .attach
            .send(Attachment {
                port: port.clone(),
                receiver: from_harness,
            })
            .map_err(|_| Error::PeerStopped(peer_id.clone()))?;

        tracing::debug!(peer = %peer_id, %port, "port opened");
        Ok(Channel::from_parts(
            port,
            peer_id,
            to_peer,
            from_peer,
            &self.inner.config,
        ))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .peers
            .borrow()
            .contains_key(&EndpointId::new(name))
    }

    /// Names of all registered peers, sorted.
    pub fn names(&self) -> Vec<EndpointId> {
        let mut names: Vec<EndpointId> = self.inner.peers.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the peer's task is still accepting connections.
    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .peers
            .borrow()
            .get(&EndpointId::new(name))
            .is_some_and(|h| !h.cancel.is_cancelled() && !h.attach.is_closed())
    }

    /// Stop one peer. Its open ports see the connection end.
    pub fn stop_peer(&self, name: &str) -> Result<()> {
        let peer_id = EndpointId::new(name);
        let peers = self.inner.peers.borrow();
        let handle = peers
            .get(&peer_id)
            .ok_or_else(|| Error::UnknownPeer(peer_id.clone()))?;
        handle.cancel.cancel();
        tracing::debug!(peer = %peer_id, "peer stop requested");
        Ok(())
    }

    /// Stop every peer and wait for their tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns the first error a peer stopped with.
    pub async fn stop(&self) -> Result<()> {
        self.inner.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        let mut first_error = None;
        while let Some(res) = tasks.join_next().await {
            let res = res.map_err(Error::internal).and_then(|r| r);
            if let Err(e) = res {
                tracing::warn!(error = %e, "peer stopped with error");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<M: Message> fmt::Debug for PeerRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.names())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{CorrelationTracker, Envelope, StepAction, Topic};

    #[derive(Clone, Debug, PartialEq)]
    enum Msg {
        Init,
        InitDone,
        Ping(u32),
        Pong(u32),
        Logout,
        LoggedOut,
        Tick,
    }

    impl Message for Msg {
        fn topic(&self) -> Topic {
            let name = match self {
                Msg::Init => "init",
                Msg::InitDone => "init-done",
                Msg::Ping(_) => "ping",
                Msg::Pong(_) => "pong",
                Msg::Logout => "logout",
                Msg::LoggedOut => "logged-out",
                Msg::Tick => "tick",
            };
            Topic::new(name)
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
                Msg::Ping(n) => self.ctx.reply(envelope, Msg::Pong(*n)).await,
                Msg::Logout => self.ctx.broadcast(Msg::LoggedOut).await.map(|_| ()),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn each_connect_yields_a_fresh_port() {
        let peers = PeerRegistry::<Msg>::default();
        peers.add_actor("worker", |ctx| Worker { ctx }).unwrap();

        let a = peers.connect("worker").unwrap();
        let b = peers.connect("worker").unwrap();
        assert_eq!(a.id().as_str(), "worker#1");
        assert_eq!(b.id().as_str(), "worker#2");
        assert_eq!(a.peer().as_str(), "worker");

        peers.stop().await.unwrap();
    }

    #[tokio::test]
    async fn replies_return_on_the_originating_port() {
        let peers = PeerRegistry::<Msg>::default();
        peers.add_actor("worker", |ctx| Worker { ctx }).unwrap();
        let mut a = peers.connect("worker").unwrap();
        let mut b = peers.connect("worker").unwrap();

        let tracker = CorrelationTracker::default();
        a.set_handler(tracker.handler());
        let request = a.send(Msg::Init).await.unwrap();
        let pending = tracker.expect_reply("init", request, ["init-done"]).unwrap();
        let reply = a.wait(pending).await.unwrap();

        assert_eq!(reply.message(), &Msg::InitDone);
        assert_eq!(reply.sender().as_str(), "worker");
        // nothing leaked onto the other port
        assert!(b.drain().await.is_empty());

        peers.stop().await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_reaches_every_open_port() {
        let peers = PeerRegistry::<Msg>::default();
        peers.add_actor("worker", |ctx| Worker { ctx }).unwrap();
        let mut a = peers.connect("worker").unwrap();
        let mut b = peers.connect("worker").unwrap();
        let mut closed = peers.connect("worker").unwrap();
        closed.close();

        a.send(Msg::Logout).await.unwrap();
        let on_a = a.recv().await.unwrap();
        let on_b = b.recv().await.unwrap();
        assert_eq!(on_a.message(), &Msg::LoggedOut);
        assert_eq!(on_b.message(), &Msg::LoggedOut);

        peers.stop().await.unwrap();
    }

    #[tokio::test]
    async fn per_port_order_is_preserved() {
        let peers = PeerRegistry::<Msg>::default();
        peers.add_actor("worker", |ctx| Worker { ctx }).unwrap();
        let mut port = peers.connect("worker").unwrap();

        for i in 0..25 {
            port.send(Msg::Ping(i)).await.unwrap();
        }
        for i in 0..25 {
            assert_eq!(port.recv().await.unwrap().message(), &Msg::Pong(i));
        }

        peers.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_duplicate_and_stopped_peers() {
        let peers = PeerRegistry::<Msg>::default();
        assert_eq!(
            peers.connect("nobody").unwrap_err(),
            Error::UnknownPeer(EndpointId::new("nobody"))
        );

        peers.add_actor("worker", |ctx| Worker { ctx }).unwrap();
        assert_eq!(
            peers.add_actor("worker", |ctx| Worker { ctx }).unwrap_err(),
            Error::DuplicatePeer(EndpointId::new("worker"))
        );

        let mut port = peers.connect("worker").unwrap();
        peers.stop_peer("worker").unwrap();
        assert!(!peers.is_running("worker"));
        assert_eq!(
            peers.connect("worker").unwrap_err(),
            Error::PeerStopped(EndpointId::new("worker"))
        );
        // the open port sees the connection end
        assert!(port.recv().await.is_none());

        peers.stop().await.unwrap();
    }

    struct Ticker {
        ctx: Context<Msg>,
        remaining: u32,
    }

    impl Actor for Ticker {
        type Message = Msg;

        async fn step(&mut self) -> Result<StepAction> {
            if self.ctx.ports().is_empty() {
                return Ok(StepAction::AwaitMessage);
            }
            if self.remaining == 0 {
                return Ok(StepAction::Never);
            }
            self.remaining -= 1;
            self.ctx.broadcast(Msg::Tick).await?;
            Ok(StepAction::Backoff(Duration::from_millis(10)))
        }
    }

    #[tokio::test]
    async fn step_emits_unsolicited_messages() {
        let peers = PeerRegistry::<Msg>::default();
        peers
            .add_actor("ticker", |ctx| Ticker { ctx, remaining: 3 })
            .unwrap();
        let mut port = peers.connect("ticker").unwrap();
        // wakes the ticker's step
        port.send(Msg::Init).await.unwrap();

        for _ in 0..3 {
            assert_eq!(port.recv().await.unwrap().message(), &Msg::Tick);
        }
        peers.stop().await.unwrap();
    }
}
