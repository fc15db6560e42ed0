use crate::Topic;

/// A typed message exchanged over a [`Channel`](crate::Channel).
///
/// Implement this for a closed set of payload shapes, usually an enum with
/// one variant per topic. The type system then guarantees that every
/// message crossing a channel is one of the known shapes; untyped JSON is
/// validated into it at the boundary by [`WireMessage`](crate::wire::WireMessage).
///
/// Messages must be `Send + Sync + Clone + 'static` because they:
/// - Are wrapped in `Arc<`[`Envelope<M>`](crate::Envelope)`>` and shared with peer tasks
/// - Cross task boundaries between the harness and simulated peers
/// - May be recorded in a [`Transcript`](crate::Transcript) while also being handled
///
/// # Example
///
/// ```rust
/// use parley::{Message, Topic};
///
/// #[derive(Clone, Debug)]
/// enum ChatMessage {
///     Open { id: u32 },
///     Opened { result: String },
/// }
///
/// impl Message for ChatMessage {
///     fn topic(&self) -> Topic {
///         match self {
///             ChatMessage::Open { .. } => Topic::new("chatbox-open"),
///             ChatMessage::Opened { .. } => Topic::new("chatbox-opened"),
///         }
///     }
/// }
///
/// assert_eq!(ChatMessage::Open { id: 1 }.topic(), "chatbox-open");
/// ```
pub trait Message: Send + Sync + Clone + 'static {
    /// Classify this message under its topic.
    fn topic(&self) -> Topic;
}
