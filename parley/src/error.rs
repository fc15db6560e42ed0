use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::error::SendError;

use crate::{EndpointId, Envelope, RequestId, RequestState, TargetId, Topic};

/// The single error type for all parley operations.
///
/// Every fallible API returns `parley::Result<T>` (alias for
/// `Result<T, parley::Error>`). Errors from lower layers (Tokio channels,
/// IO, serialization) are mapped into variants of this enum so callers only
/// need to handle one error type.
///
/// Two kinds of failure are kept apart: ordinary test failures (timeouts,
/// unexpected topics, failed assertions) and structural harness misuse
/// (double completion, send after close). See [`Error::is_structural`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Channel '{0}' is closed")]
    ChannelClosed(EndpointId),

    #[error("Unexpected topic '{topic}' on channel '{channel}'")]
    UnexpectedTopic { channel: EndpointId, topic: Topic },

    #[error("Scenario '{0}' completed more than once")]
    DoubleCompletion(String),

    #[error("Scenario '{scenario}' did not complete within {timeout:?}")]
    ScenarioTimeout { scenario: String, timeout: Duration },

    #[error("{message} (not met within {timeout:?})")]
    ConditionTimeout { message: String, timeout: Duration },

    #[error("Request '{0}' is already pending")]
    DuplicateRequest(RequestId),

    #[error("Request '{0}' is not known to the tracker")]
    UnknownRequest(RequestId),

    #[error("Request '{request}' cannot move from {from} to {to}")]
    InvalidTransition {
        request: RequestId,
        from: RequestState,
        to: RequestState,
    },

    #[error("Request '{0}' was abandoned before a response arrived")]
    Abandoned(RequestId),

    #[error("Peer '{0}' is not registered")]
    UnknownPeer(EndpointId),

    #[error("Peer '{0}' already exists")]
    DuplicatePeer(EndpointId),

    #[error("Peer '{0}' has stopped")]
    PeerStopped(EndpointId),

    #[error("No eligible target window")]
    NoEligibleTarget,

    #[error("Target window '{0}' does not exist")]
    UnknownTarget(TargetId),

    #[error("Target window '{0}' is already open")]
    DuplicateTarget(TargetId),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[cfg(feature = "serde")]
    #[error("Invalid payload for topic '{topic}': {source}")]
    InvalidPayload {
        topic: Topic,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("External error: {0}")]
    External(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error("IO error: {0}")]
    IoError(#[source] Arc<std::io::Error>),

    #[error("Internal parley error {0}")]
    Internal(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn external(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::External(Arc::new(e))
    }

    pub(crate) fn internal(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Internal(Arc::new(e))
    }

    /// Returns `true` for harness-usage violations.
    ///
    /// Structural errors abort the current scenario and are reported apart
    /// from ordinary assertion failures and timeouts.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::DoubleCompletion(_) | Error::ChannelClosed(_) | Error::DuplicateRequest(_)
        )
    }

    /// Returns `true` if this error is a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::ScenarioTimeout { .. } | Error::ConditionTimeout { .. }
        )
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ChannelClosed(a), Self::ChannelClosed(b)) => a == b,
            (
                Self::UnexpectedTopic { channel, topic },
                Self::UnexpectedTopic {
                    channel: c,
                    topic: t,
                },
            ) => channel == c && topic == t,
            (Self::DoubleCompletion(a), Self::DoubleCompletion(b)) => a == b,
            (
                Self::ScenarioTimeout { scenario, timeout },
                Self::ScenarioTimeout {
                    scenario: s,
                    timeout: t,
                },
            ) => scenario == s && timeout == t,
            (
                Self::ConditionTimeout { message, timeout },
                Self::ConditionTimeout {
                    message: m,
                    timeout: t,
                },
            ) => message == m && timeout == t,
            (Self::DuplicateRequest(a), Self::DuplicateRequest(b)) => a == b,
            (Self::UnknownRequest(a), Self::UnknownRequest(b)) => a == b,
            (
                Self::InvalidTransition { request, from, to },
                Self::InvalidTransition {
                    request: r,
                    from: f,
                    to: t,
                },
            ) => request == r && from == f && to == t,
            (Self::Abandoned(a), Self::Abandoned(b)) => a == b,
            (Self::UnknownPeer(a), Self::UnknownPeer(b)) => a == b,
            (Self::DuplicatePeer(a), Self::DuplicatePeer(b)) => a == b,
            (Self::PeerStopped(a), Self::PeerStopped(b)) => a == b,
            (Self::NoEligibleTarget, Self::NoEligibleTarget) => true,
            (Self::UnknownTarget(a), Self::UnknownTarget(b)) => a == b,
            (Self::DuplicateTarget(a), Self::DuplicateTarget(b)) => a == b,
            (Self::Assertion(a), Self::Assertion(b)) => a == b,
            #[cfg(feature = "serde")]
            (
                Self::InvalidPayload { topic, source },
                Self::InvalidPayload {
                    topic: t,
                    source: s,
                },
            ) => topic == t && Arc::ptr_eq(source, s),
            (Self::External(a), Self::External(b)) => Arc::ptr_eq(a, b),
            (Self::Internal(a), Self::Internal(b)) => Arc::ptr_eq(a, b),
            (Self::IoError(a), Self::IoError(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Error {}

impl<M> From<SendError<Arc<Envelope<M>>>> for Error {
    fn from(e: SendError<Arc<Envelope<M>>>) -> Self {
        Error::ChannelClosed(e.0.sender().clone())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_are_flagged() {
        assert!(Error::DoubleCompletion("s".into()).is_structural());
        assert!(Error::ChannelClosed(EndpointId::new("port")).is_structural());
        assert!(!Error::Assertion("x".into()).is_structural());
        assert!(
            !Error::ScenarioTimeout {
                scenario: "s".into(),
                timeout: Duration::from_secs(1)
            }
            .is_structural()
        );
    }

    #[test]
    fn send_error_maps_to_channel_closed() {
        let envelope = Arc::new(Envelope::new((), EndpointId::new("port#0")));
        let err: Error = SendError(envelope).into();
        assert_eq!(err, Error::ChannelClosed(EndpointId::new("port#0")));
    }
}
