use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::messages::Envelope;
use crate::shared::{PeerId, ProtocolError};

/// The engine's only view of the network: fan-out and addressed sends
/// with a stable per-peer identity. Whether delivery is direct
/// peer-to-peer or relayed is someone else's problem.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to_all(&self, envelope: Envelope) -> Result<(), ProtocolError>;
    async fn send_to_peer(&self, peer_id: &PeerId, envelope: Envelope) -> Result<(), ProtocolError>;
}

/// In-memory hub connecting any number of peers over channels. Stands in
/// for the real data-channel mesh in tests and local play.
#[derive(Clone, Default)]
pub struct HubTransport {
    peers: Arc<RwLock<HashMap<PeerId, mpsc::UnboundedSender<Envelope>>>>,
}

impl HubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer and returns its endpoint plus the inbox carrying
    /// everything addressed to it.
    pub async fn attach(&self, peer_id: PeerId) -> (HubEndpoint, mpsc::UnboundedReceiver<Envelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.peers.write().await.insert(peer_id.clone(), sender);
        (
            HubEndpoint {
                hub: self.clone(),
                peer_id,
            },
            receiver,
        )
    }

    pub async fn detach(&self, peer_id: &PeerId) {
        self.peers.write().await.remove(peer_id);
    }

    async fn deliver(&self, peer_id: &PeerId, envelope: Envelope) -> Result<(), ProtocolError> {
        let peers = self.peers.read().await;
        let sender = peers
            .get(peer_id)
            .ok_or_else(|| ProtocolError::PeerUnreachable(peer_id.clone()))?;
        sender
            .send(envelope)
            .map_err(|_| ProtocolError::PeerUnreachable(peer_id.clone()))
    }
}

/// One peer's handle on the hub. Broadcasts skip the sender itself.
#[derive(Clone)]
pub struct HubEndpoint {
    hub: HubTransport,
    peer_id: PeerId,
}

#[async_trait]
impl Transport for HubEndpoint {
    async fn send_to_all(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        let peers = self.hub.peers.read().await;
        for (peer_id, sender) in peers.iter() {
            if peer_id == &self.peer_id {
                continue;
            }
            if sender.send(envelope.clone()).is_err() {
                debug!(peer = %peer_id, "Dropped broadcast to closed inbox");
            }
        }
        Ok(())
    }

    async fn send_to_peer(&self, peer_id: &PeerId, envelope: Envelope) -> Result<(), ProtocolError> {
        self.hub.deliver(peer_id, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameState;

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let hub = HubTransport::new();
        let (alice, mut alice_inbox) = hub.attach("alice".to_string()).await;
        let (_bob, mut bob_inbox) = hub.attach("bob".to_string()).await;

        alice
            .send_to_all(Envelope::state_sync(GameState::new("room"), "alice".to_string()))
            .await
            .unwrap();

        assert!(bob_inbox.try_recv().is_ok());
        assert!(alice_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_addressed_send() {
        let hub = HubTransport::new();
        let (alice, _alice_inbox) = hub.attach("alice".to_string()).await;
        let (_bob, mut bob_inbox) = hub.attach("bob".to_string()).await;
        let (_cara, mut cara_inbox) = hub.attach("cara".to_string()).await;

        alice
            .send_to_peer(
                &"bob".to_string(),
                Envelope::player_ready("alice".to_string(), "alice".to_string()),
            )
            .await
            .unwrap();

        assert!(bob_inbox.try_recv().is_ok());
        assert!(cara_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_peer_is_unreachable() {
        let hub = HubTransport::new();
        let (alice, _inbox) = hub.attach("alice".to_string()).await;

        let result = alice
            .send_to_peer(
                &"ghost".to_string(),
                Envelope::player_left("x".to_string(), "alice".to_string()),
            )
            .await;
        assert!(matches!(result.unwrap_err(), ProtocolError::PeerUnreachable(_)));
    }

    #[tokio::test]
    async fn test_detach_makes_peer_unreachable() {
        let hub = HubTransport::new();
        let (alice, _inbox) = hub.attach("alice".to_string()).await;
        let (_bob, _bob_inbox) = hub.attach("bob".to_string()).await;

        hub.detach(&"bob".to_string()).await;
        let result = alice
            .send_to_peer(
                &"bob".to_string(),
                Envelope::player_left("bob".to_string(), "alice".to_string()),
            )
            .await;
        assert!(matches!(result.unwrap_err(), ProtocolError::PeerUnreachable(_)));
    }
}
