use std::{fmt, time::Duration};

/// What a simulated peer wants after one `step`.
///
/// Peers that only react to inbound messages never override `step` and get
/// [`StepAction::Never`]. Peers that generate traffic of their own (an
/// incoming SMS, a network event arriving late) return one of the other
/// variants to stay scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepAction {
    Continue,
    /// Let other tasks run first.
    Yield,
    /// Sleep until a message arrives on any of the peer's ports.
    AwaitMessage,
    Backoff(Duration),
    #[default]
    Never,
}

impl StepAction {
    /// Whether `step` will be polled again without outside help.
    pub fn reschedules(self) -> bool {
        !matches!(self, StepAction::AwaitMessage | StepAction::Never)
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Continue => f.write_str("continue"),
            StepAction::Yield => f.write_str("yield"),
            StepAction::AwaitMessage => f.write_str("await message"),
            StepAction::Backoff(d) => write!(f, "backoff {}ms", d.as_millis()),
            StepAction::Never => f.write_str("never"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_self_driven_actions_reschedule() {
        assert!(StepAction::Continue.reschedules());
        assert!(StepAction::Backoff(Duration::from_millis(50)).reschedules());
        assert!(!StepAction::AwaitMessage.reschedules());
        assert!(!StepAction::default().reschedules());
        assert_eq!(
            StepAction::Backoff(Duration::from_millis(50)).to_string(),
            "backoff 50ms"
        );
    }
}
