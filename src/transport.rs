//! Transport seam
//!
//! The peer-to-peer swarm and peer store are external collaborators; the
//! core consumes them through the `Transport` trait. `MemoryTransport` is an
//! in-process implementation over a shared hub with XOR-closest key routing,
//! used to wire multiple nodes together in one process.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::SigningKey;
use libp2p_identity::PeerId;
use multiaddr::Multiaddr;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::message::{Message, Protocol};

/// Default timeout for a single peer request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The contract the pipeline needs from the peer layer.
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Request/response with a specific peer.
    async fn request(&self, protocol: Protocol, to: PeerId, msg: Message) -> Result<Message>;

    /// Request/response with the peer responsible for a DHT key.
    async fn request_key(&self, protocol: Protocol, key: &Hash, msg: Message) -> Result<Message>;

    /// Offer a discovered peer to the peer store.
    async fn add_peer(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()>;
}

/// Inbound side: whatever owns the dispatcher implements this.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_inbound(&self, protocol: Protocol, msg: Message) -> Message;
}

/// Derive the libp2p peer id from the agent's signing key, so the chain
/// signer and the wire identity are the same keypair.
pub fn peer_id_from_signing_key(key: &SigningKey) -> Result<PeerId> {
    let secret = libp2p_identity::ed25519::SecretKey::try_from_bytes(&mut key.to_bytes())
        .map_err(|e| Error::Transport(format!("bad signing key: {e}")))?;
    let keypair = libp2p_identity::ed25519::Keypair::from(secret);
    Ok(libp2p_identity::Keypair::from(keypair).public().to_peer_id())
}

/// Shared in-process rendezvous for `MemoryTransport` endpoints.
#[derive(Default)]
pub struct MemoryHub {
    handlers: DashMap<PeerId, Weak<dyn InboundHandler>>,
    addrs: DashMap<PeerId, Vec<Multiaddr>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, peer: PeerId, handler: Weak<dyn InboundHandler>) {
        self.handlers.insert(peer, handler);
    }

    /// The registered peer XOR-closest to a key.
    fn closest(&self, key: &Hash) -> Option<PeerId> {
        self.handlers
            .iter()
            .map(|entry| *entry.key())
            .min_by_key(|peer| key_distance(peer, key))
    }

    /// Addresses recorded for a peer via `add_peer`.
    pub fn known_addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addrs.get(peer).map(|a| a.clone()).unwrap_or_default()
    }
}

/// XOR distance between a peer's position and a key.
fn key_distance(peer: &PeerId, key: &Hash) -> [u8; 32] {
    let peer_pos: [u8; 32] = Sha256::digest(peer.to_bytes()).into();
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = peer_pos[i] ^ key.as_bytes()[i];
    }
    out
}

/// In-process transport endpoint.
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    local: PeerId,
    timeout: Duration,
}

impl MemoryTransport {
    pub fn new(hub: Arc<MemoryHub>, local: PeerId) -> Arc<Self> {
        Arc::new(MemoryTransport {
            hub,
            local,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(hub: Arc<MemoryHub>, local: PeerId, timeout: Duration) -> Arc<Self> {
        Arc::new(MemoryTransport {
            hub,
            local,
            timeout,
        })
    }

    /// Attach the local dispatcher; inbound messages for this peer are
    /// delivered to it.
    pub fn attach(&self, handler: &Arc<impl InboundHandler + 'static>) {
        let handler: Arc<dyn InboundHandler> = handler.clone();
        let weak: Weak<dyn InboundHandler> = Arc::downgrade(&handler);
        self.hub.register(self.local, weak);
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    async fn request(&self, protocol: Protocol, to: PeerId, msg: Message) -> Result<Message> {
        let handler = self
            .hub
            .handlers
            .get(&to)
            .and_then(|h| h.upgrade())
            .ok_or_else(|| Error::Transport(format!("unknown peer {to}")))?;
        tokio::time::timeout(self.timeout, handler.handle_inbound(protocol, msg))
            .await
            .map_err(|_| Error::Transport(format!("request to {to} timed out")))
    }

    async fn request_key(&self, protocol: Protocol, key: &Hash, msg: Message) -> Result<Message> {
        let to = self
            .hub
            .closest(key)
            .ok_or_else(|| Error::Transport("no peers registered".to_string()))?;
        debug!(%key, %to, kind = msg.body.kind(), "routing to key owner");
        self.request(protocol, to, msg).await
    }

    async fn add_peer(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()> {
        debug!(%peer, ?addrs, "peer added");
        self.hub.addrs.entry(peer).or_default().extend(addrs);
        Ok(())
    }
}
