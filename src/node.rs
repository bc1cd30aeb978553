//! Node runtime
//!
//! A `Node` is one agent's instance of a DNA: the signing keypair, the
//! local chain, the local DHT shard, and a handle to the peer transport.
//! All context is explicit; there are no process-wide singletons. Inbound
//! messages are dispatched here, background workers (retry pump, bootstrap
//! refresh) are spawned from `start`.

use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use libp2p_identity::PeerId;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::action::{
    args_for, coerce_args, make_action_from_message, Action, ActionResult, GetLinkOptions,
    GetOptions,
};
use crate::bootstrap::{spawn_refresh_task, BootstrapClient, BOOTSTRAP_TTL};
use crate::chain::Chain;
use crate::config::Config;
use crate::dht::retry::RetryQueue;
use crate::dht::{DhtStore, GetMask, StatusMask};
use crate::dna::Dna;
use crate::entry::{DelEntry, Entry, DNA_ENTRY_TYPE, KEY_ENTRY_TYPE};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::message::{
    AppMsg, GetReq, GetResp, LinkQuery, LinkQueryResp, Message, MsgBody, Protocol, WireError,
};
use crate::transport::{peer_id_from_signing_key, InboundHandler, Transport};

/// One agent's running instance of a DNA.
pub struct Node {
    identity: String,
    signing_key: SigningKey,
    peer_id: PeerId,
    /// Content address of the node identity, for key-entry fallbacks.
    id_hash: Hash,
    dna: Arc<Dna>,
    dna_hash: Hash,
    chain: RwLock<Chain>,
    dht: DhtStore,
    retry: RetryQueue,
    transport: Arc<dyn Transport>,
    config: Config,
}

impl Node {
    /// Build a node and run genesis: the `%dna` entry followed by the
    /// `%key` entry, committed locally and never published.
    pub async fn new(
        identity: impl Into<String>,
        signing_key: SigningKey,
        dna: Dna,
        transport: Arc<dyn Transport>,
        config: Config,
    ) -> Result<Arc<Node>> {
        let peer_id = peer_id_from_signing_key(&signing_key)?;
        if transport.local_peer() != peer_id {
            return Err(Error::Transport(
                "transport identity does not match the agent keypair".to_string(),
            ));
        }

        let dna_hash = dna.sum()?;
        let dna_entry = dna.to_entry()?;
        let id_hash = Entry::new(peer_id.to_string()).sum(&dna.hash_spec)?;
        let retry = RetryQueue::new(config.retry.clone());

        let node = Arc::new(Node {
            identity: identity.into(),
            signing_key,
            peer_id,
            id_hash,
            chain: RwLock::new(Chain::new(dna.hash_spec.clone())),
            dna: Arc::new(dna),
            dna_hash,
            dht: DhtStore::new(),
            retry,
            transport,
            config,
        });

        node.do_commit(
            &Action::Commit {
                entry_type: DNA_ENTRY_TYPE.to_string(),
                entry: dna_entry,
            },
            None,
        )
        .await?;
        node.do_commit(
            &Action::Commit {
                entry_type: KEY_ENTRY_TYPE.to_string(),
                entry: Entry::new(peer_id.to_string()),
            },
            None,
        )
        .await?;

        info!(peer_id = %node.peer_id, dna = %node.dna_hash, identity = %node.identity, "node ready");
        Ok(node)
    }

    /// Spawn the background workers: the retry pump, and the bootstrap
    /// refresh loop when a directory server is configured. Tasks hold weak
    /// references and stop when the node is dropped.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.retry.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(node) = weak.upgrade() else { break };
                node.sweep_retries().await;
            }
        });

        if let Some(server) = &self.config.bootstrap_server {
            let client = BootstrapClient::new(
                server.clone(),
                self.dna_hash,
                self.peer_id,
                self.config.advertise_addr.clone(),
            );
            spawn_refresh_task(client, self.transport.clone(), BOOTSTRAP_TTL);
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn dna(&self) -> &Dna {
        &self.dna
    }

    pub fn dna_hash(&self) -> Hash {
        self.dna_hash
    }

    pub(crate) fn id_hash(&self) -> Hash {
        self.id_hash
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub(crate) fn chain(&self) -> &RwLock<Chain> {
        &self.chain
    }

    pub fn dht(&self) -> &DhtStore {
        &self.dht
    }

    pub(crate) fn retry(&self) -> &RetryQueue {
        &self.retry
    }

    // --- wire helpers -----------------------------------------------------

    fn message(&self, body: MsgBody) -> Message {
        Message {
            from: self.peer_id,
            body,
        }
    }

    /// Request/response with a specific peer, unwrapping wire errors.
    pub(crate) async fn request_peer(
        &self,
        protocol: Protocol,
        to: PeerId,
        body: MsgBody,
    ) -> Result<MsgBody> {
        let reply = self
            .transport
            .request(protocol, to, self.message(body))
            .await?;
        unwrap_reply(reply.body)
    }

    /// Request/response with the peer responsible for a DHT key.
    pub(crate) async fn request_key(
        &self,
        protocol: Protocol,
        key: &Hash,
        body: MsgBody,
    ) -> Result<MsgBody> {
        let reply = self
            .transport
            .request_key(protocol, key, self.message(body))
            .await?;
        unwrap_reply(reply.body)
    }

    // --- dispatch ---------------------------------------------------------

    /// Map a wire message to an action and run its receive side.
    pub(crate) async fn dispatch(&self, protocol: Protocol, msg: &Message) -> Result<MsgBody> {
        match protocol {
            Protocol::Validate => {
                let (action, query) = match &msg.body {
                    MsgBody::ValidatePutReq(q) => (
                        Action::Put {
                            entry_type: String::new(),
                            entry: Entry::new(""),
                            header: None,
                        },
                        q,
                    ),
                    MsgBody::ValidateModReq(q) => (
                        Action::Mod {
                            entry_type: String::new(),
                            entry: Entry::new(""),
                            replaces: q.h,
                        },
                        q,
                    ),
                    MsgBody::ValidateDelReq(q) => (
                        Action::Del {
                            entry_type: String::new(),
                            entry: DelEntry {
                                hash: q.h,
                                message: String::new(),
                            },
                        },
                        q,
                    ),
                    MsgBody::ValidateLinkReq(q) => (
                        Action::Link {
                            entry_type: String::new(),
                            links: Vec::new(),
                            validation_base: None,
                        },
                        q,
                    ),
                    other => {
                        return Err(Error::NotInActionProtocol(other.kind().to_string()));
                    }
                };
                self.get_validation_response(&action, query.h)
                    .await
                    .map(MsgBody::ValidateResponse)
            }
            Protocol::Action => {
                let action = make_action_from_message(msg)?;
                debug!(action = action.name(), from = %msg.from, "dispatch");
                action.receive(self, msg).await
            }
        }
    }

    /// Replay parked messages whose precondition record showed up.
    async fn sweep_retries(&self) {
        let due = self
            .retry
            .sweep(|hash, mask| self.dht.exists(hash, mask).is_ok());
        for msg in due {
            debug!(kind = msg.body.kind(), "replaying parked message");
            if let Err(e) = self.dispatch(Protocol::Action, &msg).await {
                warn!(kind = msg.body.kind(), error = %e, "parked replay failed");
            }
        }
    }

    // --- query verbs ------------------------------------------------------

    pub(crate) async fn do_get(&self, req: &GetReq, options: &GetOptions) -> Result<GetResp> {
        if options.local {
            let chain = self.chain.read().await;
            let (entry, entry_type) = chain.get_entry(&req.h)?;
            let mask = options.get_mask.resolve();
            let mut resp = GetResp::default();
            if mask.contains(GetMask::ENTRY_TYPE) {
                resp.entry_type = Some(entry_type.to_string());
            }
            if mask.contains(GetMask::ENTRY) {
                resp.entry = Some(entry.clone());
            }
            return Ok(resp);
        }

        let body = MsgBody::GetReq(GetReq {
            h: req.h,
            status_mask: options.status_mask,
            get_mask: options.get_mask,
        });
        match self.request_key(Protocol::Action, &req.h, body).await? {
            MsgBody::GetResp(resp) => Ok(resp),
            other => Err(Error::UnexpectedResponse(format!(
                "expected GetResp, got {}",
                other.kind()
            ))),
        }
    }

    pub(crate) async fn do_get_link(
        &self,
        query: &LinkQuery,
        options: &GetLinkOptions,
    ) -> Result<LinkQueryResp> {
        let body = MsgBody::LinkQuery(LinkQuery {
            base: query.base,
            tag: query.tag.clone(),
            status_mask: options.status_mask,
        });
        let mut resp = match self.request_key(Protocol::Action, &query.base, body).await? {
            MsgBody::LinkQueryResp(resp) => resp,
            other => {
                return Err(Error::UnexpectedResponse(format!(
                    "expected LinkQueryResp, got {}",
                    other.kind()
                )))
            }
        };

        if options.load {
            for tagged in &mut resp.links {
                let hash: Hash = match tagged.h.parse() {
                    Ok(hash) => hash,
                    Err(e) => {
                        warn!(link = %tagged.h, error = %e, "unparseable link hash");
                        continue;
                    }
                };
                let req = GetReq {
                    h: hash,
                    status_mask: StatusMask::DEFAULT,
                    get_mask: GetMask::ENTRY,
                };
                match self.do_get(&req, &GetOptions::default()).await {
                    Ok(got) => tagged.e = got.entry.map(|e| e.content().to_string()),
                    Err(e) => {
                        warn!(link = %tagged.h, error = %e, "failed to load link target")
                    }
                }
            }
        }
        Ok(resp)
    }

    pub(crate) async fn do_send(&self, to: PeerId, msg: &AppMsg) -> Result<Value> {
        match self
            .request_peer(Protocol::Action, to, MsgBody::AppMsg(msg.clone()))
            .await?
        {
            MsgBody::AppMsg(reply) => Ok(reply.body),
            other => Err(Error::UnexpectedResponse(format!(
                "expected AppMsg reply, got {}",
                other.kind()
            ))),
        }
    }

    // --- host-facing verbs ------------------------------------------------

    pub async fn commit(self: &Arc<Self>, entry_type: &str, content: &str) -> Result<Hash> {
        Action::Commit {
            entry_type: entry_type.to_string(),
            entry: Entry::new(content),
        }
        .do_action(self)
        .await?
        .into_hash()
    }

    pub async fn modify(
        self: &Arc<Self>,
        entry_type: &str,
        content: &str,
        replaces: Hash,
    ) -> Result<Hash> {
        Action::Mod {
            entry_type: entry_type.to_string(),
            entry: Entry::new(content),
            replaces,
        }
        .do_action(self)
        .await?
        .into_hash()
    }

    /// Commit a deletion record for `hash`. The entry type is resolved from
    /// the local chain.
    pub async fn delete(self: &Arc<Self>, hash: Hash, message: &str) -> Result<Hash> {
        let entry_type = {
            let chain = self.chain.read().await;
            chain.get_entry(&hash)?.1.to_string()
        };
        Action::Del {
            entry_type,
            entry: DelEntry {
                hash,
                message: message.to_string(),
            },
        }
        .do_action(self)
        .await?
        .into_hash()
    }

    pub async fn get(self: &Arc<Self>, hash: Hash, options: GetOptions) -> Result<GetResp> {
        let req = GetReq {
            h: hash,
            status_mask: options.status_mask,
            get_mask: options.get_mask,
        };
        match (Action::Get { req, options }).do_action(self).await? {
            ActionResult::Get(resp) => Ok(resp),
            other => Err(Error::UnexpectedResponse(format!(
                "expected get result, got {other:?}"
            ))),
        }
    }

    pub async fn get_links(
        self: &Arc<Self>,
        base: Hash,
        tag: &str,
        options: GetLinkOptions,
    ) -> Result<LinkQueryResp> {
        let query = LinkQuery {
            base,
            tag: tag.to_string(),
            status_mask: options.status_mask,
        };
        match (Action::GetLink { query, options }).do_action(self).await? {
            ActionResult::Links(resp) => Ok(resp),
            other => Err(Error::UnexpectedResponse(format!(
                "expected link result, got {other:?}"
            ))),
        }
    }

    pub async fn send(self: &Arc<Self>, to: PeerId, zome: &str, body: Value) -> Result<Value> {
        Action::Send {
            to,
            msg: AppMsg {
                zome_type: zome.to_string(),
                body,
            },
        }
        .do_action(self)
        .await?
        .into_value()
    }

    pub fn property(&self, name: &str) -> Result<String> {
        self.dna.property(name).map(|v| v.to_string())
    }

    pub fn make_hash(&self, content: &str) -> Result<Hash> {
        Entry::new(content).sum(&self.dna.hash_spec)
    }

    pub async fn call(self: &Arc<Self>, zome: &str, function: &str, args: Value) -> Result<Value> {
        Action::Call {
            zome: zome.to_string(),
            function: function.to_string(),
            args,
        }
        .do_action(self)
        .await?
        .into_value()
    }

    /// Generic host entry point binding JSON values by position, with the
    /// declared argument lists enforced.
    pub async fn invoke(self: &Arc<Self>, name: &str, values: &[Value]) -> Result<Value> {
        let args = args_for(name);
        if args.is_empty() {
            return Err(Error::NotInActionProtocol(name.to_string()));
        }
        coerce_args(args, values)?;

        let action = match name {
            "commit" => Action::Commit {
                entry_type: str_arg(values, 0),
                entry: Entry::new(entry_arg(values, 1)?),
            },
            "mod" => Action::Mod {
                entry_type: str_arg(values, 0),
                entry: Entry::new(entry_arg(values, 1)?),
                replaces: hash_arg(values, 2)?,
            },
            "del" => {
                let hash = hash_arg(values, 0)?;
                let entry_type = {
                    let chain = self.chain.read().await;
                    chain.get_entry(&hash)?.1.to_string()
                };
                Action::Del {
                    entry_type,
                    entry: DelEntry {
                        hash,
                        message: str_arg(values, 1),
                    },
                }
            }
            "get" => {
                let options: GetOptions = map_arg(values, 1)?;
                Action::Get {
                    req: GetReq {
                        h: hash_arg(values, 0)?,
                        status_mask: options.status_mask,
                        get_mask: options.get_mask,
                    },
                    options,
                }
            }
            "getLink" => {
                let options: GetLinkOptions = map_arg(values, 2)?;
                Action::GetLink {
                    query: LinkQuery {
                        base: hash_arg(values, 0)?,
                        tag: str_arg(values, 1),
                        status_mask: options.status_mask,
                    },
                    options,
                }
            }
            "send" => Action::Send {
                to: str_arg(values, 0)
                    .parse()
                    .map_err(|_| Error::Argument {
                        index: 0,
                        name: "to".to_string(),
                        expected: "peer id",
                    })?,
                msg: serde_json::from_value(values[1].clone())?,
            },
            "property" => Action::Property {
                name: str_arg(values, 0),
            },
            "debug" => Action::Debug {
                msg: any_to_string(&values[0]),
            },
            "makeHash" => Action::MakeHash {
                entry: Entry::new(entry_arg(values, 0)?),
            },
            "call" => Action::Call {
                zome: str_arg(values, 0),
                function: str_arg(values, 1),
                args: values.get(2).cloned().unwrap_or(Value::Null),
            },
            other => return Err(Error::NotInActionProtocol(other.to_string())),
        };
        action.do_action(self).await?.into_value()
    }
}

#[async_trait]
impl InboundHandler for Node {
    async fn handle_inbound(&self, protocol: Protocol, msg: Message) -> Message {
        let body = match self.dispatch(protocol, &msg).await {
            Ok(body) => body,
            Err(e) => {
                warn!(from = %msg.from, kind = msg.body.kind(), error = %e, "receive failed");
                MsgBody::Error(WireError::from_error(&e))
            }
        };
        self.message(body)
    }
}

fn unwrap_reply(body: MsgBody) -> Result<MsgBody> {
    match body {
        MsgBody::Error(wire) => Err(wire.into_error()),
        other => Ok(other),
    }
}

// Argument extraction; `coerce_args` has already vetted shapes.

fn str_arg(values: &[Value], index: usize) -> String {
    values
        .get(index)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn entry_arg(values: &[Value], index: usize) -> Result<String> {
    match values.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(serde_json::to_string(other)?),
        None => Ok(String::new()),
    }
}

fn hash_arg(values: &[Value], index: usize) -> Result<Hash> {
    str_arg(values, index).parse()
}

fn map_arg<T: Default + serde::de::DeserializeOwned>(
    values: &[Value],
    index: usize,
) -> Result<T> {
    match values.get(index) {
        Some(v) => Ok(serde_json::from_value(v.clone())?),
        None => Ok(T::default()),
    }
}

fn any_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
