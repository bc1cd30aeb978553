//! Bootstrap client
//!
//! Out-of-band peer discovery against a directory server. The node posts
//! its own address under its DNA hash and pulls recently-seen peers back,
//! synthesizing a dialable multi-address for each and offering it to the
//! transport's peer store. Failures are non-fatal: the node continues with
//! whatever peers it already has.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use libp2p_identity::PeerId;
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::transport::Transport;

/// How often the node re-posts and re-pulls.
pub const BOOTSTRAP_TTL: Duration = Duration::from_secs(5 * 60);

/// Overrides the advertised return address in bootstrap posts.
pub const RETURN_ADDR_ENV: &str = "HCBOOTSTRAP_RETURN_ADDR";

const BOOTSTRAP_VERSION: u32 = 1;

/// What a node publishes about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BsReq {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "NodeAddr")]
    pub node_addr: String,
    #[serde(rename = "ReturnAddr", default, skip_serializing_if = "Option::is_none")]
    pub return_addr: Option<String>,
}

/// One directory row: what the peer posted, plus what the server saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BsResp {
    #[serde(rename = "Req")]
    pub req: BsReq,
    #[serde(rename = "Remote")]
    pub remote: String,
    #[serde(rename = "LastSeen", default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Synthesize a dialable multi-address for a directory row: prefer the
/// `ReturnAddr` host, else the `Remote` host with the port parsed from the
/// trailing segment of `NodeAddr`.
pub fn multiaddr_from_resp(resp: &BsResp) -> Result<Multiaddr> {
    let mut host = String::new();
    let mut port = String::new();

    if let Some(return_addr) = resp.req.return_addr.as_deref() {
        let parts: Vec<&str> = return_addr.split(':').collect();
        if parts.len() == 2 {
            host = parts[0].to_string();
            port = parts[1].to_string();
        }
    }
    if host.is_empty() {
        host = resp
            .remote
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();
        port = resp
            .req
            .node_addr
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
    }

    format!("/ip4/{host}/tcp/{port}")
        .parse()
        .map_err(|e| Error::Bootstrap(format!("bad peer address for {}: {e}", resp.req.node_id)))
}

/// Parse directory rows into peers worth dialing, dropping malformed rows
/// and the node itself.
pub fn check_responses(own_id: &PeerId, rows: &[BsResp]) -> Vec<(PeerId, Multiaddr)> {
    let own = own_id.to_string();
    let mut peers = Vec::new();
    for row in rows {
        debug!(node_id = %row.req.node_id, remote = %row.remote, "checking returned node");
        if row.req.node_id == own {
            continue; // don't "discover" ourselves
        }
        let peer: PeerId = match row.req.node_id.parse() {
            Ok(peer) => peer,
            Err(e) => {
                warn!(node_id = %row.req.node_id, error = %e, "bad node id from bootstrap");
                continue;
            }
        };
        match multiaddr_from_resp(row) {
            Ok(addr) => {
                debug!(%peer, %addr, "discovered peer via bootstrap");
                peers.push((peer, addr));
            }
            Err(e) => warn!(%peer, error = %e, "bad address from bootstrap"),
        }
    }
    peers
}

/// HTTP client against one directory server.
pub struct BootstrapClient {
    server: String,
    dna_hash: Hash,
    node_id: PeerId,
    node_addr: String,
    http: reqwest::Client,
}

impl BootstrapClient {
    pub fn new(server: String, dna_hash: Hash, node_id: PeerId, node_addr: String) -> Self {
        BootstrapClient {
            server,
            dna_hash,
            node_id,
            node_addr,
            http: reqwest::Client::new(),
        }
    }

    /// Publish this node's address under its DNA hash.
    pub async fn post(&self) -> Result<()> {
        let req = BsReq {
            version: BOOTSTRAP_VERSION,
            node_id: self.node_id.to_string(),
            node_addr: self.node_addr.clone(),
            return_addr: std::env::var(RETURN_ADDR_ENV).ok().filter(|s| !s.is_empty()),
        };
        let url = format!("http://{}/{}/{}", self.server, self.dna_hash, self.node_id);
        self.http
            .post(&url)
            .json(&req)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::Bootstrap(e.to_string()))?;
        debug!(url, "bootstrap post ok");
        Ok(())
    }

    /// Pull recently-seen peers and offer each non-self peer to the
    /// transport. Returns how many were offered.
    pub async fn pull(&self, transport: &Arc<dyn Transport>) -> Result<usize> {
        let url = format!("http://{}/{}", self.server, self.dna_hash);
        let rows: Vec<BsResp> = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::Bootstrap(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Bootstrap(e.to_string()))?;

        let peers = check_responses(&self.node_id, &rows);
        let count = peers.len();
        for (peer, addr) in peers {
            if let Err(e) = transport.add_peer(peer, vec![addr]).await {
                warn!(%peer, error = %e, "peer store refused bootstrap peer");
            }
        }
        Ok(count)
    }
}

/// Background refresh loop: re-post and re-pull every `interval`.
pub fn spawn_refresh_task(
    client: BootstrapClient,
    transport: Arc<dyn Transport>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = client.post().await {
                warn!(error = %e, "bootstrap post failed");
            }
            match client.pull(&transport).await {
                Ok(count) if count > 0 => info!(count, "bootstrap peers offered"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "bootstrap pull failed"),
            }
        }
    });
    info!("bootstrap refresh task started");
}
