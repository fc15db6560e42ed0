//! Recorded inbound traffic and queries over it.

use std::{cell::RefCell, collections::HashSet, fmt, rc::Rc, sync::Arc};

use crate::{EndpointId, Envelope, Message, MessageId, Topic};

type Records<M> = Rc<RefCell<Vec<Arc<Envelope<M>>>>>;
type Filter<M> = Rc<dyn Fn(&Envelope<M>) -> bool>;

/// Every message a [`Channel`](crate::Channel) has received, in arrival order.
///
/// Cloning a transcript yields another handle on the same records, so a
/// step can keep one after handing the channel elsewhere. Use
/// [`query`](Self::query) to count or inspect what arrived:
///
/// ```ignore
/// let transcript = port.transcript();
/// // ... run the exchange ...
/// assert_eq!(transcript.query().with_topic("chatbox-opened").count(), 1);
/// ```
///
/// Transcripts use `Rc` internally and are `!Send`; they belong to the
/// single-threaded harness side.
pub struct Transcript<M> {
    records: Records<M>,
}

impl<M> Clone for Transcript<M> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}

impl<M: Message> Default for Transcript<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Transcript<M> {
    pub fn new() -> Self {
        Self {
            records: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub(crate) fn push(&self, envelope: Arc<Envelope<M>>) {
        self.records.borrow_mut().push(envelope);
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }

    /// Returns a query over a snapshot of the current records.
    pub fn query(&self) -> TranscriptQuery<M> {
        TranscriptQuery::new(Arc::new(self.records.borrow().clone()))
    }
}

impl<M> fmt::Debug for Transcript<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript")
            .field("records", &self.records.borrow().len())
            .finish()
    }
}

/// A composable filter over a transcript snapshot.
///
/// ```ignore
/// let opened = transcript.query()
///     .from_sender(&worker)
///     .with_topic("chatbox-opened")
///     .count();
/// ```
#[derive(Clone)]
pub struct TranscriptQuery<M> {
    records: Arc<Vec<Arc<Envelope<M>>>>,
    filters: Vec<Filter<M>>,
}

impl<M> fmt::Debug for TranscriptQuery<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptQuery")
            .field("records", &self.records.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl<M: Message> TranscriptQuery<M> {
    pub(crate) fn new(records: Arc<Vec<Arc<Envelope<M>>>>) -> Self {
        Self {
            records,
            filters: Vec::new(),
        }
    }

    fn add_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Envelope<M>) -> bool + 'static,
    {
        self.filters.push(Rc::new(filter));
        self
    }

    fn apply_filters(&self) -> impl Iterator<Item = &Arc<Envelope<M>>> {
        self.records
            .iter()
            .filter(|e| self.filters.iter().all(|f| f(e)))
    }

    // ==================== Filters ====================

    /// Keep messages classified under `topic`.
    pub fn with_topic(self, topic: impl Into<Topic>) -> Self {
        let topic = topic.into();
        self.add_filter(move |e| e.topic() == topic)
    }

    /// Keep messages sent by the given endpoint.
    pub fn from_sender(self, sender: impl Into<EndpointId>) -> Self {
        let sender = sender.into();
        self.add_filter(move |e| *e.sender() == sender)
    }

    /// Keep replies to the given request.
    pub fn replies_to(self, request: MessageId) -> Self {
        self.add_filter(move |e| e.meta().reply_to() == Some(request))
    }

    /// Keep messages matching a predicate on the payload.
    pub fn matching<F>(self, predicate: F) -> Self
    where
        F: Fn(&M) -> bool + 'static,
    {
        self.add_filter(move |e| predicate(e.message()))
    }

    /// Keep messages received after the message with the given id.
    pub fn after(self, id: MessageId) -> Self {
        let position = self.records.iter().position(|e| e.id() == id);
        let records = self.records.clone();
        self.add_filter(move |e| match position {
            Some(p) => records
                .iter()
                .position(|r| r.id() == e.id())
                .is_some_and(|i| i > p),
            None => false,
        })
    }

    // ==================== Terminal Operations ====================

    pub fn count(&self) -> usize {
        self.apply_filters().count()
    }

    pub fn is_empty(&self) -> bool {
        self.apply_filters().next().is_none()
    }

    pub fn exists(&self) -> bool {
        !self.is_empty()
    }

    pub fn first(&self) -> Option<Arc<Envelope<M>>> {
        self.apply_filters().next().cloned()
    }

    pub fn last(&self) -> Option<Arc<Envelope<M>>> {
        self.apply_filters().last().cloned()
    }

    pub fn nth(&self, index: usize) -> Option<Arc<Envelope<M>>> {
        self.apply_filters().nth(index).cloned()
    }

    pub fn collect(&self) -> Vec<Arc<Envelope<M>>> {
        self.apply_filters().cloned().collect()
    }

    /// Returns the distinct topics seen, in order of first appearance.
    pub fn topics(&self) -> Vec<Topic> {
        let mut seen = HashSet::new();
        self.apply_filters()
            .map(|e| e.topic())
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    /// Returns true if any message satisfies the predicate.
    pub fn any<F>(&self, predicate: F) -> bool
    where
        F: Fn(&Envelope<M>) -> bool,
    {
        self.apply_filters().any(|e| predicate(e))
    }
}
