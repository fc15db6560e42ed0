use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::mpsc::Sender;

use crate::{EndpointId, Envelope, Error, Message, Result};

type PortSender<M> = Sender<Arc<Envelope<M>>>;

/// Open ports of one peer, shared between the peer and its registry.
pub(crate) struct Ports<M> {
    inner: Arc<Mutex<Vec<(EndpointId, PortSender<M>)>>>,
}

impl<M> Clone for Ports<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M> Default for Ports<M> {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
        }
    }
}

impl<M> Ports<M> {
    pub(crate) fn attach(&self, port: EndpointId, sender: PortSender<M>) {
        let mut ports = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ports.push((port, sender));
    }

    /// Drop every sender so open ports see the connection end.
    fn clear(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Senders of every port the harness still holds open.
    fn open(&self) -> Vec<(EndpointId, PortSender<M>)> {
        let mut ports = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ports.retain(|(_, tx)| !tx.is_closed());
        ports.clone()
    }

    fn get(&self, port: &EndpointId) -> Option<PortSender<M>> {
        self.open()
            .into_iter()
            .find(|(id, _)| id == port)
            .map(|(_, tx)| tx)
    }
}

/// Runtime-provided context for a peer to answer the harness.
///
/// A peer usually has several ports open at once (one per
/// [`connect`](crate::PeerRegistry::connect)). Messages can go back to the
/// port a request came from, to a named port, or to all of them.
///
/// Ports the harness has closed are pruned on the next send. A reply to a
/// closed port is dropped rather than failing the peer: the harness is no
/// longer listening.
pub struct Context<M> {
    peer_id: EndpointId,
    ports: Ports<M>,
    alive: Arc<AtomicBool>,
}

impl<M> Clone for Context<M> {
    fn clone(&self) -> Self {
        Self {
            peer_id: self.peer_id.clone(),
            ports: self.ports.clone(),
            alive: self.alive.clone(),
        }
    }
}

impl<M: Message> Context<M> {
    pub(crate) fn new(peer_id: EndpointId, ports: Ports<M>, alive: Arc<AtomicBool>) -> Self {
        Self {
            peer_id,
            ports,
            alive,
        }
    }

    /// Answer `request` on the port it arrived on.
    ///
    /// The answer carries the request's id in
    /// [`Meta::reply_to`](crate::Meta::reply_to).
    pub async fn reply(&self, request: &Envelope<M>, message: M) -> Result<()> {
        let port = request.sender();
        let Some(sender) = self.ports.get(port) else {
            tracing::debug!(peer = %self.peer_id, %port, "port closed, reply dropped");
            return Ok(());
        };
        let envelope = Envelope::new(message, self.peer_id.clone()).in_reply_to(request.id());
        self.deliver(&sender, port, envelope).await
    }

    /// Send an unsolicited message to one port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the port is not open.
    pub async fn send_to(&self, port: &EndpointId, message: M) -> Result<()> {
        let sender = self
            .ports
            .get(port)
            .ok_or_else(|| Error::ChannelClosed(port.clone()))?;
        self.deliver(&sender, port, Envelope::new(message, self.peer_id.clone()))
            .await
    }

    /// Send a message to every open port. Returns how many received it.
    pub async fn broadcast(&self, message: M) -> Result<usize> {
        let ports = self.ports.open();
        let envelope = Arc::new(Envelope::new(message, self.peer_id.clone()));
        let mut delivered = 0;
        for (port, sender) in &ports {
            if sender.send(envelope.clone()).await.is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(peer = %self.peer_id, %port, "port closed during broadcast");
            }
        }
        tracing::trace!(peer = %self.peer_id, topic = %envelope.topic(), delivered, "broadcast");
        Ok(delivered)
    }

    async fn deliver(&self, sender: &PortSender<M>, port: &EndpointId, envelope: Envelope<M>) -> Result<()> {
        let topic = envelope.topic();
        if sender.send(Arc::new(envelope)).await.is_err() {
            tracing::debug!(peer = %self.peer_id, %port, %topic, "port closed, message dropped");
            return Ok(());
        }
        tracing::trace!(peer = %self.peer_id, %port, %topic, "message sent");
        Ok(())
    }

    /// Ports the harness currently holds open, oldest first.
    pub fn ports(&self) -> Vec<EndpointId> {
        self.ports.open().into_iter().map(|(id, _)| id).collect()
    }

    pub(crate) fn detach_all(&self) {
        self.ports.clear();
    }

    /// Signal this peer to stop after the current message.
    #[inline]
    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }

    #[inline]
    pub fn peer_id(&self) -> &EndpointId {
        &self.peer_id
    }

    #[inline]
    pub fn peer_name(&self) -> &str {
        self.peer_id.as_str()
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl<M> fmt::Debug for Context<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("peer_id", &self.peer_id)
            .field("is_alive", &self.alive.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
