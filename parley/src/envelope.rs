use std::{fmt, hash};

use crate::{EndpointId, Message, MessageId, Meta, Topic};

/// The unit carried through every [`Channel`](crate::Channel).
///
/// Messages travel as `Arc<Envelope<M>>` in both directions. An envelope
/// pairs the typed message with [`Meta`] (sender, timestamp, reply-to id).
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(bound(
        serialize = "M: serde::Serialize",
        deserialize = "M: serde::de::DeserializeOwned"
    ))
)]
pub struct Envelope<M> {
    meta: Meta,
    message: M,
}

impl<M> Envelope<M> {
    /// Wrap a message sent by the given endpoint.
    pub fn new(message: M, sender: EndpointId) -> Self {
        Self {
            meta: Meta::new(sender, None),
            message,
        }
    }

    /// Mark this envelope as the answer to `request`.
    ///
    /// Prefer [`Context::reply`](crate::Context::reply), which sets this
    /// automatically.
    pub fn in_reply_to(mut self, request: MessageId) -> Self {
        self.meta.set_reply_to(request);
        self
    }

    /// Returns a reference to the message payload.
    ///
    /// ```ignore
    /// match envelope.message() {
    ///     ChatMessage::Opened { result } => assert_eq!(result, "ok"),
    ///     _ => {}
    /// }
    /// ```
    #[inline]
    pub fn message(&self) -> &M {
        &self.message
    }

    #[inline]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Shorthand for `self.meta().id()`.
    #[inline]
    pub fn id(&self) -> MessageId {
        self.meta.id()
    }

    /// Shorthand for `self.meta().sender()`.
    #[inline]
    pub fn sender(&self) -> &EndpointId {
        self.meta.sender()
    }
}

impl<M: Message> Envelope<M> {
    /// Shorthand for `self.message().topic()`.
    #[inline]
    pub fn topic(&self) -> Topic {
        self.message.topic()
    }
}

impl<M: PartialEq> PartialEq for Envelope<M> {
    fn eq(&self, other: &Self) -> bool {
        self.meta.id() == other.meta.id() && self.message == other.message
    }
}

impl<M: Eq> Eq for Envelope<M> {}

impl<M: hash::Hash> hash::Hash for Envelope<M> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.meta.id().hash(state);
        self.message.hash(state);
    }
}

impl<M: fmt::Debug> fmt::Debug for Envelope<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.meta.id())
            .field("sender", &self.meta.sender_name())
            .field("message", &self.message)
            .field("timestamp", &self.meta.timestamp())
            .field("reply_to", &self.meta.reply_to())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    #[allow(unused)]
    struct Ping(i32);

    impl Message for Ping {
        fn topic(&self) -> Topic {
            Topic::new("ping")
        }
    }

    #[test]
    fn envelope_debug() {
        let envelope = Envelope::new(Ping(42), EndpointId::new("test-port"));
        let debug_str = format!("{:?}", envelope);

        assert!(debug_str.contains("Ping"));
        assert!(debug_str.contains("42"));
        assert!(debug_str.contains("test-port"));
    }

    #[test]
    fn reply_links_to_request() {
        let request = Envelope::new(Ping(1), EndpointId::new("harness"));
        let reply = Envelope::new(Ping(2), EndpointId::new("peer")).in_reply_to(request.id());

        assert_eq!(reply.meta().reply_to(), Some(request.id()));
        assert_eq!(request.meta().reply_to(), None);
        assert_eq!(reply.topic(), "ping");
    }
}
