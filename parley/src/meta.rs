use std::{fmt, hash, time::SystemTime};

use crate::{EndpointId, MessageId};

/// Metadata attached to every [`Envelope`](crate::Envelope).
///
/// - `id`: unique message identifier (UUID v4, not monotonic).
/// - `timestamp`: creation time in nanoseconds since Unix epoch (`u64`).
/// - `sender`: the endpoint that sent the message.
/// - `reply_to`: optional id of the message this one answers. Set by
///   [`Context::reply`](crate::Context::reply); the
///   [`CorrelationTracker`](crate::CorrelationTracker) can use it to pair
///   a response with its request.
#[derive(Debug, Clone, PartialEq, Eq, hash::Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Meta {
    id: MessageId,
    timestamp: u64,
    sender: EndpointId,
    reply_to: Option<MessageId>,
}

impl Meta {
    /// Construct metadata for a message sent by `sender`.
    pub fn new(sender: EndpointId, reply_to: Option<MessageId>) -> Self {
        Self {
            id: MessageId::new(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default(),
            sender,
            reply_to,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Timestamp in nanoseconds since Unix epoch (u64 truncation).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sender(&self) -> &EndpointId {
        &self.sender
    }

    /// Name of the endpoint that sent the message.
    pub fn sender_name(&self) -> &str {
        self.sender.as_str()
    }

    /// Id of the request this message answers, if any.
    pub fn reply_to(&self) -> Option<MessageId> {
        self.reply_to
    }

    pub(crate) fn set_reply_to(&mut self, request: MessageId) {
        self.reply_to = Some(request);
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Meta {{ id: {}, timestamp: {}, sender: {}",
            self.id(),
            self.timestamp(),
            self.sender_name(),
        )?;
        if let Some(request) = self.reply_to() {
            write!(f, ", reply_to: {}", request)?;
        }
        write!(f, " }}")
    }
}
