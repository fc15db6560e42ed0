//! Correlation of inbound responses with outstanding requests.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    sync::oneshot,
    time::{Instant, Sleep},
};

use crate::{Config, Envelope, Error, Message, MessageId, Result, Topic};

/// Caller-chosen name of one outstanding request (`"open-chat"`, `"sms-7"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<&RequestId> for RequestId {
    fn from(id: &RequestId) -> Self {
        id.clone()
    }
}

impl From<MessageId> for RequestId {
    fn from(id: MessageId) -> Self {
        Self::from(id.to_string())
    }
}

/// Lifecycle of one correlated request.
///
/// ```text
/// Idle ──► Requested ──┬──► Delivered ──┬──► Reopened ──► Delivered
///                      │                └──► Closed
///                      ├──► TimedOut
///                      └──► Abandoned
/// ```
///
/// `Reopened` models a peer re-signalling the same logical object (a chat
/// requested again while still open): exactly one more notification is
/// expected. `TimedOut`, `Closed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestState {
    #[default]
    Idle,
    Requested,
    Delivered,
    Reopened,
    TimedOut,
    Closed,
    Abandoned,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::TimedOut | RequestState::Closed | RequestState::Abandoned
        )
    }

    /// Whether a response is still expected in this state.
    pub fn is_awaiting(self) -> bool {
        matches!(self, RequestState::Requested | RequestState::Reopened)
    }

    pub fn can_move_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Idle, Requested)
                | (Requested, Delivered | TimedOut | Abandoned)
                | (Delivered, Reopened | Closed)
                | (Reopened, Delivered | TimedOut | Closed | Abandoned)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Idle => "Idle",
            RequestState::Requested => "Requested",
            RequestState::Delivered => "Delivered",
            RequestState::Reopened => "Reopened",
            RequestState::TimedOut => "TimedOut",
            RequestState::Closed => "Closed",
            RequestState::Abandoned => "Abandoned",
        };
        f.write_str(name)
    }
}

/// Result of handing one inbound message to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The message resolved this request.
    Resolved(RequestId),
    /// Nobody was waiting for this message; it was dropped.
    Unmatched(Topic),
}

type Discriminator<M> = Rc<dyn Fn(&Envelope<M>) -> Option<RequestId>>;

struct PendingEntry<M> {
    id: RequestId,
    topics: HashSet<Topic>,
    reply_to: Option<MessageId>,
    created_at: Instant,
    responder: oneshot::Sender<Arc<Envelope<M>>>,
}

impl<M: Message> PendingEntry<M> {
    fn accepts(&self, envelope: &Envelope<M>, topic: &Topic) -> bool {
        self.topics.contains(topic)
            && self
                .reply_to
                .is_none_or(|request| envelope.meta().reply_to() == Some(request))
    }
}

struct Inner<M> {
    pending: Vec<PendingEntry<M>>,
    states: HashMap<RequestId, RequestState>,
    discriminator: Option<Discriminator<M>>,
    strict: bool,
    unmatched: usize,
}

impl<M: Message> Inner<M> {
    fn state(&self, id: &RequestId) -> RequestState {
        self.states.get(id).copied().unwrap_or_default()
    }

    fn transition(&mut self, id: &RequestId, to: RequestState) -> Result<()> {
        let from = self.state(id);
        if !from.can_move_to(to) {
            return Err(Error::InvalidTransition {
                request: id.clone(),
                from,
                to,
            });
        }
        tracing::trace!(request = %id, %from, %to, "request state changed");
        self.states.insert(id.clone(), to);
        Ok(())
    }

    fn remove_pending(&mut self, id: &RequestId) -> Option<PendingEntry<M>> {
        let index = self.pending.iter().position(|p| p.id == *id)?;
        Some(self.pending.remove(index))
    }

    fn find(&self, envelope: &Envelope<M>, topic: &Topic) -> Option<usize> {
        if let Some(discriminator) = &self.discriminator {
            if let Some(id) = discriminator(envelope) {
                return self
                    .pending
                    .iter()
                    .position(|p| p.id == id && p.accepts(envelope, topic));
            }
        }
        self.pending.iter().position(|p| p.accepts(envelope, topic))
    }

    fn time_out(&mut self, id: &RequestId) {
        if self.remove_pending(id).is_some() {
            let _ = self.transition(id, RequestState::TimedOut);
            tracing::warn!(request = %id, "request timed out");
        }
    }
}

/// Matches inbound messages to the requests waiting for them.
///
/// A step registers what it expects with [`expect`](Self::expect) and gets
/// back a [`Pending`] future. The channel handler feeds every inbound
/// message to [`deliver`](Self::deliver), which:
///
/// 1. finds at most one pending request whose topic set contains the
///    message's topic (the oldest one, or the one named by the
///    discriminator),
/// 2. removes it and resolves its [`Pending`] with the message,
/// 3. otherwise drops the message, or fails with
///    [`Error::UnexpectedTopic`] in strict mode.
///
/// Each registration is resolved at most once. A peer that emits the same
/// notification twice resolves the request with the first copy; the second
/// is unmatched unless the step re-registered with
/// [`reopen`](Self::reopen).
///
/// The tracker is a cheap-to-clone handle (`Rc`) for the single-threaded
/// harness side.
///
/// # Example
///
/// ```ignore
/// let tracker = CorrelationTracker::new(&config);
/// port.set_handler(tracker.handler());
///
/// let opened = tracker.expect("chat", ["chatbox-opened"])?;
/// port.send(ChatMessage::Open).await?;
/// port.wait(opened).await?;
///
/// // same chat requested again while open: one more notification
/// let reopened = tracker.reopen("chat", ["chatbox-opened"])?;
/// port.send(ChatMessage::Open).await?;
/// port.wait(reopened).await?;
/// ```
pub struct CorrelationTracker<M> {
    inner: Rc<RefCell<Inner<M>>>,
}

impl<M> Clone for CorrelationTracker<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Message> Default for CorrelationTracker<M> {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl<M: Message> CorrelationTracker<M> {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                pending: Vec::new(),
                states: HashMap::new(),
                discriminator: None,
                strict: config.strict_topics(),
                unmatched: 0,
            })),
        }
    }

    /// Route responses by a request id carried in the payload.
    ///
    /// Use this when concurrent requests expect overlapping topics. When the
    /// discriminator names a request, only that request can be resolved;
    /// when it returns `None` the tracker falls back to topic matching.
    pub fn with_discriminator<F>(self, discriminator: F) -> Self
    where
        F: Fn(&Envelope<M>) -> Option<RequestId> + 'static,
    {
        self.inner.borrow_mut().discriminator = Some(Rc::new(discriminator));
        self
    }

    pub fn set_strict(&self, strict: bool) {
        self.inner.borrow_mut().strict = strict;
    }

    // ==================== Registration ====================

    /// Register a request waiting for any one of `topics`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequest`] if `id` is already pending, or
    /// [`Error::InvalidTransition`] if it was delivered and not yet closed
    /// (use [`reopen`](Self::reopen) for that).
    pub fn expect<I, T>(&self, id: impl Into<RequestId>, topics: I) -> Result<Pending<M>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Topic>,
    {
        self.register(id.into(), topics, None, RequestState::Requested)
    }

    /// Register a request that only a reply to message `request` resolves.
    ///
    /// The reply must carry `request` in
    /// [`Meta::reply_to`](crate::Meta::reply_to) and one of `topics`.
    pub fn expect_reply<I, T>(
        &self,
        id: impl Into<RequestId>,
        request: MessageId,
        topics: I,
    ) -> Result<Pending<M>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Topic>,
    {
        self.register(id.into(), topics, Some(request), RequestState::Requested)
    }

    /// Expect one more notification for a request that was already delivered.
    pub fn reopen<I, T>(&self, id: impl Into<RequestId>, topics: I) -> Result<Pending<M>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Topic>,
    {
        self.register(id.into(), topics, None, RequestState::Reopened)
    }

    fn register<I, T>(
        &self,
        id: RequestId,
        topics: I,
        reply_to: Option<MessageId>,
        to: RequestState,
    ) -> Result<Pending<M>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Topic>,
    {
        let mut inner = self.inner.borrow_mut();
        if inner.pending.iter().any(|p| p.id == id) {
            return Err(Error::DuplicateRequest(id));
        }
        if to == RequestState::Requested && inner.state(&id).is_terminal() {
            // a finished request name may be reused for a fresh request
            inner.states.remove(&id);
        }
        inner.transition(&id, to)?;

        let topics: HashSet<Topic> = topics.into_iter().map(Into::into).collect();
        tracing::debug!(request = %id, topics = ?topics, "expecting response");

        let (tx, rx) = oneshot::channel();
        inner.pending.push(PendingEntry {
            id: id.clone(),
            topics,
            reply_to,
            created_at: Instant::now(),
            responder: tx,
        });
        Ok(Pending {
            id,
            receiver: rx,
            deadline: None,
            timeout: Duration::ZERO,
            tracker: Rc::downgrade(&self.inner),
        })
    }

    // ==================== Delivery ====================

    /// Offer one inbound message to the pending requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedTopic`] for an unmatched message when the
    /// tracker is strict.
    pub fn deliver(&self, envelope: &Arc<Envelope<M>>) -> Result<Delivery> {
        let topic = envelope.topic();
        let mut inner = self.inner.borrow_mut();

        let Some(index) = inner.find(envelope, &topic) else {
            inner.unmatched += 1;
            if inner.strict {
                return Err(Error::UnexpectedTopic {
                    channel: envelope.sender().clone(),
                    topic,
                });
            }
            tracing::debug!(%topic, sender = %envelope.sender(), "unmatched message dropped");
            return Ok(Delivery::Unmatched(topic));
        };

        let entry = inner.pending.remove(index);
        inner.transition(&entry.id, RequestState::Delivered)?;
        tracing::debug!(
            request = %entry.id,
            %topic,
            elapsed = ?entry.created_at.elapsed(),
            "request resolved"
        );
        if entry.responder.send(envelope.clone()).is_err() {
            tracing::debug!(request = %entry.id, "response arrived after the waiter went away");
        }
        Ok(Delivery::Resolved(entry.id))
    }

    /// Returns a channel handler that delivers every message to this tracker.
    pub fn handler(&self) -> impl FnMut(&Arc<Envelope<M>>) -> Result + 'static {
        let tracker = self.clone();
        move |envelope| tracker.deliver(envelope).map(|_| ())
    }

    // ==================== Cleanup ====================

    /// Mark a delivered request as finished.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRequest`] for an id never registered, and
    /// [`Error::InvalidTransition`] if it never got a first response.
    pub fn close(&self, id: impl Into<RequestId>) -> Result<()> {
        let id = id.into();
        let mut inner = self.inner.borrow_mut();
        if inner.state(&id) == RequestState::Idle {
            return Err(Error::UnknownRequest(id));
        }
        inner.transition(&id, RequestState::Closed)?;
        inner.remove_pending(&id);
        Ok(())
    }

    /// Give up on a pending request. Its [`Pending`] resolves to
    /// [`Error::Abandoned`].
    ///
    /// Returns `false` if nothing was pending under `id`.
    pub fn abandon(&self, id: impl Into<RequestId>) -> bool {
        let id = id.into();
        let mut inner = self.inner.borrow_mut();
        if inner.remove_pending(&id).is_none() {
            return false;
        }
        let _ = inner.transition(&id, RequestState::Abandoned);
        true
    }

    /// Abandon everything still pending, oldest first.
    pub fn abandon_all(&self) -> Vec<RequestId> {
        let mut inner = self.inner.borrow_mut();
        let abandoned: Vec<RequestId> = inner.pending.drain(..).map(|p| p.id).collect();
        for id in &abandoned {
            let _ = inner.transition(id, RequestState::Abandoned);
        }
        abandoned
    }

    /// Time out every request that has been pending for at least `timeout`.
    pub fn expire(&self, timeout: Duration) -> Vec<RequestId> {
        let mut inner = self.inner.borrow_mut();
        let stale: Vec<RequestId> = inner
            .pending
            .iter()
            .filter(|p| p.created_at.elapsed() >= timeout)
            .map(|p| p.id.clone())
            .collect();
        for id in &stale {
            inner.time_out(id);
        }
        stale
    }

    // ==================== Inspection ====================

    pub fn state(&self, id: impl Into<RequestId>) -> RequestState {
        self.inner.borrow().state(&id.into())
    }

    pub fn is_pending(&self, id: impl Into<RequestId>) -> bool {
        let id = id.into();
        self.inner.borrow().pending.iter().any(|p| p.id == id)
    }

    /// Ids of all pending requests, oldest first.
    pub fn pending(&self) -> Vec<RequestId> {
        self.inner
            .borrow()
            .pending
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    /// Whether nothing is pending.
    pub fn is_clean(&self) -> bool {
        self.inner.borrow().pending.is_empty()
    }

    /// Number of inbound messages nobody was waiting for.
    pub fn unmatched(&self) -> usize {
        self.inner.borrow().unmatched
    }
}

/// The part of a tracker a scenario needs to clean up after itself,
/// independent of the message type.
pub(crate) trait PendingScope {
    fn abandon_all(&self) -> Vec<RequestId>;

    /// Time out everything still pending, however young.
    fn expire_all(&self) -> Vec<RequestId>;
}

impl<M: Message> PendingScope for CorrelationTracker<M> {
    fn abandon_all(&self) -> Vec<RequestId> {
        CorrelationTracker::abandon_all(self)
    }

    fn expire_all(&self) -> Vec<RequestId> {
        self.expire(Duration::ZERO)
    }
}

impl<M> fmt::Debug for CorrelationTracker<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("CorrelationTracker")
            .field("pending", &inner.pending.len())
            .field("strict", &inner.strict)
            .field("unmatched", &inner.unmatched)
            .finish_non_exhaustive()
    }
}

/// The response to one registered request, delivered at most once.
///
/// Resolves to the matching envelope, to [`Error::Abandoned`] if the
/// request was abandoned, or, with [`within`](Self::within), to
/// [`Error::ConditionTimeout`] if nothing arrived in time. A timed-out
/// request is moved to [`RequestState::TimedOut`].
///
/// Awaiting a `Pending` does not dispatch anything by itself; drive the
/// channel with [`Channel::wait`](crate::Channel::wait).
#[must_use = "a pending request does nothing unless awaited"]
pub struct Pending<M> {
    id: RequestId,
    receiver: oneshot::Receiver<Arc<Envelope<M>>>,
    deadline: Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    tracker: Weak<RefCell<Inner<M>>>,
}

impl<M: Message> Pending<M> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Fail with a timeout if no response arrives within `timeout`.
    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.deadline = Some(Box::pin(tokio::time::sleep(timeout)));
        self
    }
}

impl<M: Message> Future for Pending<M> {
    type Output = Result<Arc<Envelope<M>>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(envelope)) => return Poll::Ready(Ok(envelope)),
            Poll::Ready(Err(_)) => return Poll::Ready(Err(Error::Abandoned(this.id.clone()))),
            Poll::Pending => {}
        }
        let Some(deadline) = this.deadline.as_mut() else {
            return Poll::Pending;
        };
        if deadline.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }
        if let Some(inner) = this.tracker.upgrade() {
            inner.borrow_mut().time_out(&this.id);
        }
        Poll::Ready(Err(Error::ConditionTimeout {
            message: format!("no response to request '{}'", this.id),
            timeout: this.timeout,
        }))
    }
}

impl<M> fmt::Debug for Pending<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("id", &self.id)
            .field("timeout", &self.deadline.as_ref().map(|_| self.timeout))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndpointId;

    #[derive(Clone, Debug, PartialEq)]
    enum Msg {
        Opened { chat: u32 },
        Closed,
        Pong,
    }

    impl Message for Msg {
        fn topic(&self) -> Topic {
            match self {
                Msg::Opened { .. } => Topic::new("opened"),
                Msg::Closed => Topic::new("closed"),
                Msg::Pong => Topic::new("pong"),
            }
        }
    }

    fn inbound(msg: Msg) -> Arc<Envelope<Msg>> {
        Arc::new(Envelope::new(msg, EndpointId::new("worker")))
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let tracker = CorrelationTracker::default();
        let pending = tracker.expect("chat", ["opened"]).unwrap();

        let first = inbound(Msg::Opened { chat: 1 });
        assert_eq!(
            tracker.deliver(&first).unwrap(),
            Delivery::Resolved("chat".into())
        );
        // the duplicate notification is collapsed
        assert_eq!(
            tracker.deliver(&inbound(Msg::Opened { chat: 1 })).unwrap(),
            Delivery::Unmatched(Topic::new("opened"))
        );

        let response = pending.await.unwrap();
        assert_eq!(response.id(), first.id());
        assert_eq!(tracker.state("chat"), RequestState::Delivered);
        assert_eq!(tracker.unmatched(), 1);
        assert!(tracker.is_clean());
    }

    #[tokio::test]
    async fn strict_mode_flags_unmatched() {
        let tracker: CorrelationTracker<Msg> =
            CorrelationTracker::new(&Config::default().with_strict_topics(true));
        let err = tracker.deliver(&inbound(Msg::Pong)).unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedTopic {
                channel: EndpointId::new("worker"),
                topic: Topic::new("pong"),
            }
        );
    }

    #[tokio::test]
    async fn disjoint_topics_resolve_independently() {
        let tracker = CorrelationTracker::default();
        let opened = tracker.expect("open", ["opened"]).unwrap();
        let closed = tracker.expect("close", ["closed"]).unwrap();

        tracker.deliver(&inbound(Msg::Closed)).unwrap();
        assert!(tracker.is_pending("open"));
        assert!(!tracker.is_pending("close"));

        tracker.deliver(&inbound(Msg::Opened { chat: 1 })).unwrap();
        assert_eq!(opened.await.unwrap().topic(), "opened");
        assert_eq!(closed.await.unwrap().topic(), "closed");
    }

    #[tokio::test]
    async fn overlapping_topics_resolve_oldest_first() {
        let tracker = CorrelationTracker::default();
        let first = tracker.expect("first", ["opened"]).unwrap();
        let second = tracker.expect("second", ["opened"]).unwrap();

        tracker.deliver(&inbound(Msg::Opened { chat: 1 })).unwrap();
        assert_eq!(tracker.pending(), vec![RequestId::from("second")]);

        tracker.deliver(&inbound(Msg::Opened { chat: 2 })).unwrap();
        assert_eq!(
            first.await.unwrap().message(),
            &Msg::Opened { chat: 1 }
        );
        assert_eq!(
            second.await.unwrap().message(),
            &Msg::Opened { chat: 2 }
        );
    }

    #[tokio::test]
    async fn discriminator_routes_by_payload() {
        let tracker = CorrelationTracker::default().with_discriminator(|e: &Envelope<Msg>| {
            match e.message() {
                Msg::Opened { chat } => Some(RequestId::from(format!("chat-{chat}"))),
                _ => None,
            }
        });
        let one = tracker.expect("chat-1", ["opened"]).unwrap();
        let two = tracker.expect("chat-2", ["opened"]).unwrap();

        tracker.deliver(&inbound(Msg::Opened { chat: 2 })).unwrap();
        assert!(tracker.is_pending("chat-1"));
        assert_eq!(two.await.unwrap().message(), &Msg::Opened { chat: 2 });

        // names a request nobody registered: dropped, not stolen by chat-1
        assert!(matches!(
            tracker.deliver(&inbound(Msg::Opened { chat: 9 })).unwrap(),
            Delivery::Unmatched(_)
        ));
        tracker.deliver(&inbound(Msg::Opened { chat: 1 })).unwrap();
        assert_eq!(one.await.unwrap().message(), &Msg::Opened { chat: 1 });
    }

    #[tokio::test]
    async fn reply_matching_ignores_unrelated_messages() {
        let tracker = CorrelationTracker::default();
        let request = MessageId::new();
        let pending = tracker.expect_reply("init", request, ["pong"]).unwrap();

        // same topic, but not a reply to our request
        assert!(matches!(
            tracker.deliver(&inbound(Msg::Pong)).unwrap(),
            Delivery::Unmatched(_)
        ));
        let reply = Arc::new(Envelope::new(Msg::Pong, EndpointId::new("worker")).in_reply_to(request));
        tracker.deliver(&reply).unwrap();
        assert_eq!(pending.await.unwrap().meta().reply_to(), Some(request));
    }

    #[tokio::test]
    async fn reopen_expects_one_more_notification() {
        let tracker = CorrelationTracker::default();
        let first = tracker.expect("chat", ["opened"]).unwrap();
        tracker.deliver(&inbound(Msg::Opened { chat: 1 })).unwrap();
        first.await.unwrap();

        let again = tracker.reopen("chat", ["opened"]).unwrap();
        assert_eq!(tracker.state("chat"), RequestState::Reopened);
        tracker.deliver(&inbound(Msg::Opened { chat: 1 })).unwrap();
        again.await.unwrap();
        assert_eq!(tracker.state("chat"), RequestState::Delivered);

        tracker.close("chat").unwrap();
        assert_eq!(tracker.state("chat"), RequestState::Closed);
    }

    #[test]
    fn reopen_requires_delivery() {
        let tracker: CorrelationTracker<Msg> = CorrelationTracker::default();
        let err = tracker.reopen("chat", ["opened"]).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidTransition {
                request: "chat".into(),
                from: RequestState::Idle,
                to: RequestState::Reopened,
            }
        );
    }

    #[test]
    fn duplicate_registration_rejected() {
        let tracker: CorrelationTracker<Msg> = CorrelationTracker::default();
        let _pending = tracker.expect("chat", ["opened"]).unwrap();
        let err = tracker.expect("chat", ["opened"]).unwrap_err();
        assert_eq!(err, Error::DuplicateRequest("chat".into()));
    }

    #[tokio::test]
    async fn abandon_resolves_with_error() {
        let tracker: CorrelationTracker<Msg> = CorrelationTracker::default();
        let pending = tracker.expect("chat", ["opened"]).unwrap();
        let _other = tracker.expect("other", ["closed"]).unwrap();

        assert!(tracker.abandon("chat"));
        assert!(!tracker.abandon("chat"));
        assert_eq!(pending.await.unwrap_err(), Error::Abandoned("chat".into()));

        assert_eq!(tracker.abandon_all(), vec![RequestId::from("other")]);
        assert_eq!(tracker.state("other"), RequestState::Abandoned);
        assert!(tracker.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn within_times_out_and_records_state() {
        let tracker: CorrelationTracker<Msg> = CorrelationTracker::default();
        let pending = tracker
            .expect("chat", ["opened"])
            .unwrap()
            .within(Duration::from_millis(500));

        let err = pending.await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(tracker.state("chat"), RequestState::TimedOut);
        assert!(tracker.is_clean());

        // a terminal request name can be reused
        let _again = tracker.expect("chat", ["opened"]).unwrap();
        assert_eq!(tracker.state("chat"), RequestState::Requested);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_times_out_stale_requests() {
        let tracker: CorrelationTracker<Msg> = CorrelationTracker::default();
        let _old = tracker.expect("old", ["opened"]).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let _fresh = tracker.expect("fresh", ["closed"]).unwrap();

        assert_eq!(tracker.expire(Duration::from_secs(1)), vec![RequestId::from("old")]);
        assert_eq!(tracker.state("old"), RequestState::TimedOut);
        assert_eq!(tracker.pending(), vec![RequestId::from("fresh")]);
    }

    #[test]
    fn state_machine_transitions() {
        use RequestState::*;
        assert!(Idle.can_move_to(Requested));
        assert!(Requested.can_move_to(TimedOut));
        assert!(Delivered.can_move_to(Reopened));
        assert!(Reopened.can_move_to(Delivered));
        assert!(!TimedOut.can_move_to(Delivered));
        assert!(!Closed.can_move_to(Reopened));
        assert!(!Requested.can_move_to(Closed));
        assert!(TimedOut.is_terminal());
        assert!(Reopened.is_awaiting());
    }

    #[test]
    fn closing_requires_a_delivery() {
        let tracker = CorrelationTracker::<Msg>::default();
        assert_eq!(
            tracker.close("ghost").unwrap_err(),
            Error::UnknownRequest("ghost".into())
        );

        let _pending = tracker.expect("chat", ["opened"]).unwrap();
        assert!(matches!(
            tracker.close("chat").unwrap_err(),
            Error::InvalidTransition { .. }
        ));
    }
}
