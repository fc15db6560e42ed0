use std::pin::Pin;

use tokio::time::Sleep;

use crate::StepAction;

/// Why `step` is not currently being polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum StepPause {
    #[default]
    None,
    AwaitMessage,
    Suppressed,
}

/// Scheduling state for a peer's `step`.
#[derive(Debug, Default)]
pub(crate) struct StepHandler {
    pub(crate) pause: StepPause,
    pub(crate) backoff: Option<Pin<Box<Sleep>>>,
}

impl StepHandler {
    pub(crate) fn can_step(&self) -> bool {
        self.pause == StepPause::None && self.backoff.is_none()
    }

    pub(crate) fn is_delayed(&self) -> bool {
        self.backoff.is_some()
    }

    /// A message arrived: wake a step waiting for one.
    pub(crate) fn on_message(&mut self) {
        if self.pause == StepPause::AwaitMessage {
            self.pause = StepPause::None;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.pause = StepPause::None;
        self.backoff = None;
    }

    pub(crate) async fn apply(&mut self, action: StepAction) {
        if !action.reschedules() {
            tracing::trace!(%action, "step paused");
        }
        self.pause = match action {
            StepAction::Continue => StepPause::None,
            StepAction::Yield => {
                tokio::task::yield_now().await;
                StepPause::None
            }
            StepAction::AwaitMessage => StepPause::AwaitMessage,
            StepAction::Backoff(duration) => {
                self.backoff = Some(Box::pin(tokio::time::sleep(duration)));
                StepPause::None
            }
            StepAction::Never => StepPause::Suppressed,
        };
    }
}
