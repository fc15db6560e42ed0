use std::{fmt, future::IntoFuture, sync::Arc, time::Duration};

use tokio::{
    select,
    sync::mpsc::{self, Receiver, Sender},
    time::Instant,
};

use crate::{
    Config, EndpointId, Envelope, Error, Message, MessageId, Pending, Result, Topic, Transcript,
    runner,
};

/// Inbound dispatch function installed with [`Channel::set_handler`].
pub type Handler<M> = Box<dyn FnMut(&Arc<Envelope<M>>) -> Result>;

/// One end of a duplex, topic-tagged message connection to a remote actor.
///
/// A channel sends typed messages to its peer and dispatches whatever the
/// peer sends back to a single inbound handler:
///
/// - [`send`](Self::send) never blocks the event loop beyond waiting for
///   buffer space, and fails with [`Error::ChannelClosed`] after
///   [`close`](Self::close).
/// - [`set_handler`](Self::set_handler) replaces the current handler. There
///   is never more than one; the last writer wins.
/// - Messages from one channel arrive in the order they were sent. Nothing
///   orders them against messages on other channels.
/// - A message with no handler is dropped, or reported as
///   [`Error::UnexpectedTopic`] when [`Config::strict_topics`] is set.
/// - A handler error that is not structural does not stop dispatching. It
///   is kept in [`errors`](Self::errors) and, inside a scenario, recorded
///   as a failed check. Structural errors are returned.
/// - Sending after [`close`](Self::close) aborts the running scenario even
///   if the step ignores the returned error.
///
/// Every inbound message is also appended to the channel's
/// [`Transcript`] before it is dispatched.
///
/// Dropping a channel closes it.
///
/// # Example
///
/// ```ignore
/// let tracker = CorrelationTracker::new(&config);
/// port.set_handler(tracker.handler());
///
/// let opened = tracker.expect("open", ["chatbox-opened"])?;
/// port.send(ChatMessage::Open { id: 1 }).await?;
/// let reply = port.wait(opened).await?;
///
/// port.close();
/// ```
pub struct Channel<M: Message> {
    id: EndpointId,
    peer: EndpointId,
    sender: Option<Sender<Arc<Envelope<M>>>>,
    receiver: Receiver<Arc<Envelope<M>>>,
    handler: Option<Handler<M>>,
    transcript: Transcript<M>,
    errors: Vec<Error>,
    strict_topics: bool,
    settle_window: Duration,
}

impl<M: Message> Channel<M> {
    /// Create two channels connected to each other.
    ///
    /// Whatever one end sends, the other end receives. Useful for wiring a
    /// hand-driven peer inside a test.
    pub fn pair(
        a: impl Into<EndpointId>,
        b: impl Into<EndpointId>,
        config: &Config,
    ) -> (Channel<M>, Channel<M>) {
        let (a, b) = (a.into(), b.into());
        let (a_tx, b_rx) = mpsc::channel(config.channel_capacity());
        let (b_tx, a_rx) = mpsc::channel(config.channel_capacity());
        (
            Channel::from_parts(a.clone(), b.clone(), a_tx, a_rx, config),
            Channel::from_parts(b, a, b_tx, b_rx, config),
        )
    }

    pub(crate) fn from_parts(
        id: EndpointId,
        peer: EndpointId,
        sender: Sender<Arc<Envelope<M>>>,
        receiver: Receiver<Arc<Envelope<M>>>,
        config: &Config,
    ) -> Self {
        Self {
            id,
            peer,
            sender: Some(sender),
            receiver,
            handler: None,
            transcript: Transcript::new(),
            errors: Vec::new(),
            strict_topics: config.strict_topics(),
            settle_window: config.settle_window(),
        }
    }

    /// This end's identity. Every message sent here carries it as sender.
    #[inline]
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// Identity of the remote end.
    #[inline]
    pub fn peer(&self) -> &EndpointId {
        &self.peer
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    /// Whether unhandled topics are reported as errors.
    pub fn strict_topics(&self) -> bool {
        self.strict_topics
    }

    pub fn set_strict_topics(&mut self, strict: bool) {
        self.strict_topics = strict;
    }

    /// Returns a handle on every message received so far.
    pub fn transcript(&self) -> Transcript<M> {
        self.transcript.clone()
    }

    /// Non-structural errors raised while dispatching, oldest first.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    // ==================== Sending ====================

    /// Send a message to the peer.
    ///
    /// Returns the id of the sent envelope, which replies carry in
    /// [`Meta::reply_to`](crate::Meta::reply_to).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if this channel was closed or the
    /// peer has gone away.
    pub async fn send(&self, message: M) -> Result<MessageId> {
        self.send_envelope(Envelope::new(message, self.id.clone()))
            .await
    }

    /// Send a message marked as the answer to `request`.
    pub async fn reply(&self, request: &Envelope<M>, message: M) -> Result<MessageId> {
        self.send_envelope(Envelope::new(message, self.id.clone()).in_reply_to(request.id()))
            .await
    }

    async fn send_envelope(&self, envelope: Envelope<M>) -> Result<MessageId> {
        let Some(sender) = self.sender.as_ref() else {
            let error = Error::ChannelClosed(self.id.clone());
            tracing::error!(channel = %self.id, "send after close");
            runner::abort_scenario(error.clone());
            return Err(error);
        };
        let id = envelope.id();
        let topic = envelope.topic();
        sender
            .send(Arc::new(envelope))
            .await
            .map_err(|_| Error::ChannelClosed(self.id.clone()))?;
        tracing::trace!(channel = %self.id, peer = %self.peer, %topic, message_id = %id, "message sent");
        Ok(id)
    }

    // ==================== Receiving ====================

    /// Replace the inbound handler.
    ///
    /// Returns `true` if a previous handler was replaced.
    pub fn set_handler<F>(&mut self, handler: F) -> bool
    where
        F: FnMut(&Arc<Envelope<M>>) -> Result + 'static,
    {
        let replaced = self.handler.replace(Box::new(handler)).is_some();
        if replaced {
            tracing::debug!(channel = %self.id, "inbound handler replaced");
        }
        replaced
    }

    /// Remove the inbound handler. Later messages are treated as unhandled.
    pub fn clear_handler(&mut self) -> bool {
        self.handler.take().is_some()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Receive the next message without dispatching it.
    ///
    /// Returns `None` once the channel is closed or the peer has gone away
    /// and nothing is left in the buffer.
    pub async fn recv(&mut self) -> Option<Arc<Envelope<M>>> {
        if self.is_closed() {
            return None;
        }
        let envelope = self.receiver.recv().await?;
        self.record(&envelope);
        Some(envelope)
    }

    /// Wait for the next message and hand it to the handler.
    ///
    /// Returns `Ok(false)` when nothing more can arrive.
    ///
    /// # Errors
    ///
    /// Propagates a structural error raised by the handler.
    pub async fn dispatch(&mut self) -> Result<bool> {
        match self.recv().await {
            Some(envelope) => {
                self.handle(&envelope)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Dispatch every message already buffered, without waiting.
    ///
    /// Returns the number of messages dispatched.
    pub fn dispatch_ready(&mut self) -> Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let mut count = 0;
        while let Ok(envelope) = self.receiver.try_recv() {
            self.record(&envelope);
            self.handle(&envelope)?;
            count += 1;
        }
        Ok(count)
    }

    /// Keep dispatching inbound messages until `future` completes.
    ///
    /// This is how a step waits for a response: the future is usually a
    /// [`Pending`] obtained from the tracker, or a
    /// [`wait_for`](crate::wait_for) condition over state the handler
    /// updates. Messages that arrive after the future is ready stay queued
    /// for the next call.
    pub async fn dispatch_until<F: IntoFuture>(&mut self, future: F) -> Result<F::Output> {
        let future = future.into_future();
        tokio::pin!(future);
        let mut open = !self.is_closed();
        loop {
            select! {
                biased;
                output = &mut future => return Ok(output),
                maybe = self.receiver.recv(), if open => match maybe {
                    Some(envelope) => {
                        self.record(&envelope);
                        self.handle(&envelope)?;
                    }
                    None => open = false,
                },
            }
        }
    }

    /// Dispatch until the tracker resolves `pending`, then return the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Abandoned`] if the request was abandoned, or a
    /// structural error raised while dispatching.
    pub async fn wait(&mut self, pending: Pending<M>) -> Result<Arc<Envelope<M>>> {
        self.dispatch_until(pending).await?
    }

    /// Collect messages until the channel stays quiet for the settle window.
    ///
    /// Collection stops after ten settle windows even if the peer keeps
    /// talking. Drained messages are recorded but not dispatched.
    pub async fn drain(&mut self) -> Vec<Arc<Envelope<M>>> {
        let mut drained = Vec::new();
        if self.is_closed() {
            return drained;
        }
        let deadline = Instant::now() + self.settle_window * 10;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let window = self.settle_window.min(remaining);
            match tokio::time::timeout(window, self.receiver.recv()).await {
                Ok(Some(envelope)) => {
                    self.record(&envelope);
                    drained.push(envelope);
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
        drained
    }

    fn record(&self, envelope: &Arc<Envelope<M>>) {
        tracing::trace!(
            channel = %self.id,
            sender = %envelope.sender(),
            topic = %envelope.topic(),
            message_id = %envelope.id(),
            "message received"
        );
        self.transcript.push(envelope.clone());
    }

    fn handle(&mut self, envelope: &Arc<Envelope<M>>) -> Result<()> {
        let result = match self.handler.as_mut() {
            Some(handler) => handler(envelope),
            None => self.unhandled(envelope.topic()),
        };
        match result {
            Err(e) if !e.is_structural() => {
                tracing::warn!(channel = %self.id, topic = %envelope.topic(), error = %e, "inbound message failed");
                runner::fail_scenario(&e);
                self.errors.push(e);
                Ok(())
            }
            other => other,
        }
    }

    fn unhandled(&self, topic: Topic) -> Result<()> {
        if self.strict_topics {
            return Err(Error::UnexpectedTopic {
                channel: self.id.clone(),
                topic,
            });
        }
        tracing::debug!(channel = %self.id, %topic, "no handler, message dropped");
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Close the channel.
    ///
    /// Returns `true` the first time and `false` on every later call, which
    /// has no further effect. After closing, sends fail, nothing more is
    /// received and the handler is dropped. The peer sees the connection end
    /// once it has consumed what was already sent.
    pub fn close(&mut self) -> bool {
        if self.sender.take().is_none() {
            return false;
        }
        self.receiver.close();
        self.handler = None;
        tracing::debug!(channel = %self.id, peer = %self.peer, "channel closed");
        true
    }
}

impl<M: Message> Drop for Channel<M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<M: Message> fmt::Debug for Channel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("has_handler", &self.handler.is_some())
            .field("strict_topics", &self.strict_topics)
            .field("received", &self.transcript.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Msg {
        Ping(u32),
        Pong(u32),
    }

    impl Message for Msg {
        fn topic(&self) -> Topic {
            match self {
                Msg::Ping(_) => Topic::new("ping"),
                Msg::Pong(_) => Topic::new("pong"),
            }
        }
    }

    fn pair() -> (Channel<Msg>, Channel<Msg>) {
        Channel::pair("harness", "peer", &Config::default())
    }

    #[tokio::test]
    async fn delivery_preserves_send_order() {
        let (harness, mut peer) = pair();
        for i in 0..20 {
            harness.send(Msg::Ping(i)).await.unwrap();
        }

        for i in 0..20 {
            let envelope = peer.recv().await.unwrap();
            assert_eq!(envelope.message(), &Msg::Ping(i));
            assert_eq!(envelope.sender().as_str(), "harness");
        }
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut harness, _peer) = pair();
        assert!(harness.close());

        let err = harness.send(Msg::Ping(1)).await.unwrap_err();
        assert_eq!(err, Error::ChannelClosed(EndpointId::new("harness")));
        assert!(err.is_structural());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut harness, mut peer) = pair();
        assert!(harness.close());
        assert!(!harness.close());
        assert!(harness.is_closed());

        // the peer observes the close exactly once: its stream just ends
        assert!(peer.recv().await.is_none());
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn last_handler_wins() {
        let (harness, mut peer) = pair();
        let first = Rc::new(RefCell::new(0));
        let second = Rc::new(RefCell::new(0));

        let counter = first.clone();
        assert!(!peer.set_handler(move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        }));
        let counter = second.clone();
        assert!(peer.set_handler(move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        }));

        harness.send(Msg::Ping(1)).await.unwrap();
        assert!(peer.dispatch().await.unwrap());

        assert_eq!(*first.borrow(), 0);
        assert_eq!(*second.borrow(), 1);
    }

    #[tokio::test]
    async fn unhandled_topics_dropped_unless_strict() {
        let (harness, mut peer) = pair();
        harness.send(Msg::Ping(1)).await.unwrap();
        assert!(peer.dispatch().await.unwrap());

        assert!(peer.errors().is_empty());

        peer.set_strict_topics(true);
        harness.send(Msg::Pong(2)).await.unwrap();
        assert!(peer.dispatch().await.unwrap());
        assert_eq!(
            peer.errors(),
            [Error::UnexpectedTopic {
                channel: EndpointId::new("peer"),
                topic: Topic::new("pong"),
            }]
        );
    }

    #[tokio::test]
    async fn strict_noise_does_not_stop_a_wait() {
        let config = Config::default().with_strict_topics(true);
        let (harness, mut peer) = Channel::<Msg>::pair("harness", "peer", &config);
        let tracker = crate::CorrelationTracker::new(&config);
        peer.set_handler(tracker.handler());

        let opened = tracker.expect("open", ["pong"]).unwrap();
        harness.send(Msg::Ping(1)).await.unwrap();
        harness.send(Msg::Pong(1)).await.unwrap();

        let reply = peer.wait(opened).await.unwrap();
        assert_eq!(reply.message(), &Msg::Pong(1));
        assert!(tracker.pending().is_empty());
        assert!(matches!(
            peer.errors(),
            [Error::UnexpectedTopic { topic, .. }] if *topic == Topic::new("ping")
        ));
    }

    #[tokio::test]
    async fn reply_carries_request_id() {
        let (harness, mut peer) = pair();
        let request_id = harness.send(Msg::Ping(7)).await.unwrap();

        let request = peer.recv().await.unwrap();
        peer.reply(&request, Msg::Pong(7)).await.unwrap();

        let mut harness = harness;
        let reply = harness.recv().await.unwrap();
        assert_eq!(reply.meta().reply_to(), Some(request_id));
    }

    #[tokio::test]
    async fn dispatch_until_leaves_later_messages_queued() {
        let (harness, mut peer) = pair();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (tx, rx) = tokio::sync::oneshot::channel::<u32>();
        let mut tx = Some(tx);

        let log = seen.clone();
        peer.set_handler(move |envelope| {
            if let Msg::Ping(n) = envelope.message() {
                log.borrow_mut().push(*n);
                if *n == 2 {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(*n);
                    }
                }
            }
            Ok(())
        });

        for i in 1..=4 {
            harness.send(Msg::Ping(i)).await.unwrap();
        }
        let got = peer.dispatch_until(rx).await.unwrap().unwrap();

        assert_eq!(got, 2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(peer.dispatch_ready().unwrap(), 2);
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn drain_collects_until_quiet() {
        let (harness, mut peer) = pair();
        harness.send(Msg::Ping(1)).await.unwrap();
        harness.send(Msg::Ping(2)).await.unwrap();

        let drained = peer.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(peer.transcript().len(), 2);
    }

    #[tokio::test]
    async fn dropping_closes_the_peer_stream() {
        let (harness, mut peer) = pair();
        harness.send(Msg::Ping(1)).await.unwrap();
        drop(harness);

        assert!(peer.recv().await.is_some());
        assert!(peer.recv().await.is_none());
    }
}
