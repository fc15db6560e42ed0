use std::sync::Arc;

use futures_util::{FutureExt, StreamExt, stream::SelectAll};
use tokio::{
    select,
    sync::mpsc::{Receiver, UnboundedReceiver},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{Actor, Context, EndpointId, Envelope, Result, StepAction, internal::StepHandler};

/// A freshly connected port handed to a running peer.
pub(crate) struct Attachment<M> {
    pub(crate) port: EndpointId,
    pub(crate) receiver: Receiver<Arc<Envelope<M>>>,
}

/// Event loop of one simulated peer.
///
/// Merges the inbound side of every attached port into one stream, so the
/// peer sees messages one at a time, in per-port FIFO order.
pub(crate) struct PeerController<A: Actor> {
    pub(crate) actor: A,
    pub(crate) ctx: Context<A::Message>,
    pub(crate) attach_rx: UnboundedReceiver<Attachment<A::Message>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) max_messages_per_tick: usize,
}

impl<A: Actor> PeerController<A> {
    pub async fn run(&mut self) -> Result<()> {
        self.actor.on_start().await?;
        let mut inbound: SelectAll<ReceiverStream<Arc<Envelope<A::Message>>>> = SelectAll::new();
        let mut step_handler = StepHandler::default();

        while self.ctx.is_alive() {
            select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(attachment) = self.attach_rx.recv() => {
                    tracing::debug!(peer = %self.ctx.peer_id(), port = %attachment.port, "port attached");
                    inbound.push(ReceiverStream::new(attachment.receiver));
                    let res = self.actor.on_connect(&attachment.port).await;
                    self.handle_error(res)?;
                }

                Some(envelope) = inbound.next(), if !inbound.is_empty() => {
                    self.handle(&envelope).await?;

                    let mut count = 1;
                    while count < self.max_messages_per_tick && self.ctx.is_alive() {
                        let Some(Some(envelope)) = inbound.next().now_or_never() else {
                            break;
                        };
                        self.handle(&envelope).await?;
                        count += 1;
                    }
                    step_handler.on_message();
                }

                _ = async {
                    if let Some(backoff_sleep) = step_handler.backoff.as_mut() {
                        backoff_sleep.as_mut().await;
                    }
                }, if step_handler.is_delayed() => {
                    let _ = step_handler.backoff.take();
                    let res = self.actor.step().await;
                    self.handle_step(res, &mut step_handler).await?;
                }

                res = self.actor.step(), if step_handler.can_step() => {
                    self.handle_step(res, &mut step_handler).await?;
                }
            }
        }

        let res = self.actor.on_shutdown().await;
        tracing::debug!(peer = %self.ctx.peer_id(), "peer stopped");
        res
    }

    /// Run the peer, then close every port it still holds.
    pub async fn run_to_end(mut self) -> Result<()> {
        let res = self.run().await;
        self.ctx.detach_all();
        res
    }

    async fn handle(&mut self, envelope: &Arc<Envelope<A::Message>>) -> Result<()> {
        tracing::trace!(
            peer = %self.ctx.peer_id(),
            port = %envelope.sender(),
            topic = %envelope.topic(),
            "message delivered"
        );
        let res = self.actor.handle_message(envelope).await;
        self.handle_error(res)
    }

    async fn handle_step(
        &mut self,
        res: Result<StepAction>,
        step_handler: &mut StepHandler,
    ) -> Result<()> {
        match res {
            Ok(action) => step_handler.apply(action).await,
            Err(e) => {
                self.handle_error::<()>(Err(e))?;
                step_handler.reset();
            }
        }
        Ok(())
    }

    #[inline]
    fn handle_error<R>(&self, result: Result<R>) -> Result<()> {
        if let Err(e) = result {
            tracing::warn!(peer = %self.ctx.peer_id(), error = %e, "peer error");
            self.actor.on_error(e)?;
        }
        Ok(())
    }
}
