use std::future::Future;

use crate::{EndpointId, Envelope, Error, Message, Result, StepAction};

/// A simulated remote peer: a worker, a provider, a device.
///
/// Peers run as Tokio tasks registered with a
/// [`PeerRegistry`](crate::PeerRegistry). Every
/// [`connect`](crate::PeerRegistry::connect) opens a fresh port to the
/// peer; whatever the harness sends on any port arrives in
/// [`handle_message`](Self::handle_message), one message at a time.
///
/// # Core Methods
///
/// - [`handle_message`](Self::handle_message)  - Answer incoming messages (reactive)
/// - [`step`](Self::step)  - Emit unsolicited messages (proactive)
///
/// # Lifecycle Hooks
///
/// - [`on_start`](Self::on_start)  - Called once before the event loop starts
/// - [`on_connect`](Self::on_connect)  - Called when a new port is attached
/// - [`on_shutdown`](Self::on_shutdown)  - Called once after the event loop stops
/// - [`on_error`](Self::on_error)  - Handle errors (swallow or propagate)
///
/// # Context
///
/// Peers that answer store the [`Context<M>`](crate::Context) received from
/// their factory and use [`reply`](crate::Context::reply) or
/// [`broadcast`](crate::Context::broadcast):
///
/// ```ignore
/// struct Worker { ctx: Context<ChatMessage> }
///
/// impl Actor for Worker {
///     type Message = ChatMessage;
///
///     async fn handle_message(&mut self, envelope: &Envelope<ChatMessage>) -> Result {
///         if let ChatMessage::Init = envelope.message() {
///             self.ctx.reply(envelope, ChatMessage::InitDone).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// Methods return futures but can be implemented as `async fn` directly.
pub trait Actor: Send + 'static {
    type Message: Message;

    /// Handle one message received on any port.
    ///
    /// `envelope.sender()` names the port it came from, which is where
    /// [`Context::reply`](crate::Context::reply) sends the answer.
    fn handle_message(
        &mut self,
        envelope: &Envelope<Self::Message>,
    ) -> impl Future<Output = Result<()>> + Send {
        let _ = envelope;
        async { Ok(()) }
    }

    /// Optional proactive work.
    ///
    /// Returns a [`StepAction`] to control when `step` runs again:
    ///
    /// | Action | Behavior |
    /// |--------|----------|
    /// | `StepAction::Continue` | Run step again immediately |
    /// | `StepAction::Yield` | Yield to runtime, then run again |
    /// | `StepAction::AwaitMessage` | Pause until next message arrives |
    /// | `StepAction::Backoff(Duration)` | Sleep, then run again |
    /// | `StepAction::Never` | Disable step permanently (default) |
    ///
    /// A device that delivers an incoming SMS shortly after start:
    ///
    /// ```rust,ignore
    /// async fn step(&mut self) -> Result<StepAction> {
    ///     if let Some(sms) = self.inbox.pop() {
    ///         self.ctx.broadcast(SmsMessage::Received(sms)).await?;
    ///         return Ok(StepAction::Backoff(Duration::from_millis(50)));
    ///     }
    ///     Ok(StepAction::Never)
    /// }
    /// ```
    fn step(&mut self) -> impl Future<Output = Result<StepAction>> + Send {
        async { Ok(StepAction::default()) }
    }

    /// Lifecycle hook called once before the event loop starts.
    fn on_start(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Called when the harness opens a new port to this peer.
    fn on_connect(&mut self, port: &EndpointId) -> impl Future<Output = Result<()>> + Send {
        let _ = port;
        async { Ok(()) }
    }

    /// Lifecycle hook called once after the event loop stops.
    fn on_shutdown(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Called when [`handle_message`](Self::handle_message), [`step`](Self::step)
    /// or [`on_connect`](Self::on_connect) returns an error.
    ///
    /// Return `Ok(())` to swallow the error and keep going, or `Err(error)`
    /// to stop the peer. By default, all errors propagate.
    fn on_error(&self, error: Error) -> Result<()> {
        Err(error)
    }
}
