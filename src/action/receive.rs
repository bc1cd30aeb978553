//! Peer-side receive handlers
//!
//! Every mutating receive first routes through the validation phase: the
//! handler pulls the originator's header, entry, and packaging materials
//! back over the validate protocol, runs sys+app validation, and only then
//! touches the DHT store. The store's per-hash locks are never held across
//! the pull.

use libp2p_identity::PeerId;
use tracing::{debug, warn};

use crate::action::Action;
use crate::dht::{GetMask, Status, StatusMask};
use crate::entry::{DelEntry, Entry, LinksEntry, LinkAction, DNA_ENTRY_TYPE};
use crate::error::{Error, Result};
use crate::message::{
    AppMsg, GetResp, LinkQueryResp, Message, MsgBody, Protocol, ValidateQuery, ValidateResponse,
};
use crate::node::Node;
use crate::ribosome::LinkVerdict;

/// Pull header/entry/package for `query` back from `source` and enforce the
/// response shape.
pub async fn run_validation_phase(
    node: &Node,
    source: PeerId,
    query: MsgBody,
) -> Result<ValidateResponse> {
    let reply = node.request_peer(Protocol::Validate, source, query).await?;
    match reply {
        MsgBody::ValidateResponse(resp) => Ok(resp),
        other => Err(Error::UnexpectedResponse(format!(
            "expected ValidateResponse from validator, got {}",
            other.kind()
        ))),
    }
}

pub(super) async fn put_receive(node: &Node, msg: &Message) -> Result<MsgBody> {
    let MsgBody::PutReq(req) = &msg.body else {
        return Err(Error::UnexpectedResponse("put without PutReq body".to_string()));
    };

    let resp = run_validation_phase(
        node,
        msg.from,
        MsgBody::ValidatePutReq(ValidateQuery { h: req.h }),
    )
    .await?;

    let action = Action::Put {
        entry_type: resp.entry_type.clone(),
        entry: resp.entry.clone(),
        header: resp.header.clone(),
    };
    let chain = node.chain().read().await;
    let verdict = node.validate_action_with(
        &chain,
        &action,
        &resp.entry_type,
        Some(&resp.package),
        &[msg.from],
    );
    drop(chain);

    let status = match verdict {
        Ok(_) => Status::Live,
        Err(e) => {
            debug!(hash = %req.h, error = %e, "put rejected");
            Status::Rejected
        }
    };
    node.dht()
        .put(msg.from, &resp.entry_type, req.h, resp.entry.marshal()?, status)?;
    Ok(MsgBody::Ack("queued".to_string()))
}

pub(super) async fn mod_receive(node: &Node, msg: &Message) -> Result<MsgBody> {
    let MsgBody::ModReq(req) = &msg.body else {
        return Err(Error::UnexpectedResponse("mod without ModReq body".to_string()));
    };

    // The replaced record must already be held, whatever its status.
    if node.dht().exists(&req.h, StatusMask::ANY) == Err(Error::HashNotFound) {
        node.retry().park(req.h, StatusMask::ANY, msg.clone());
        return Ok(MsgBody::Ack("queued".to_string()));
    }

    let resp = run_validation_phase(
        node,
        msg.from,
        MsgBody::ValidateModReq(ValidateQuery { h: req.n }),
    )
    .await?;

    let action = Action::Mod {
        entry_type: resp.entry_type.clone(),
        entry: resp.entry.clone(),
        replaces: req.h,
    };
    let chain = node.chain().read().await;
    let verdict = node.validate_action_with(
        &chain,
        &action,
        &resp.entry_type,
        Some(&resp.package),
        &[msg.from],
    );
    drop(chain);

    match verdict {
        Ok(_) => node.dht().modify(msg.from, &req.h, req.n)?,
        Err(e) => {
            debug!(old = %req.h, new = %req.n, error = %e, "mod rejected");
            node.dht().put(
                msg.from,
                &resp.entry_type,
                req.n,
                resp.entry.marshal()?,
                Status::Rejected,
            )?;
        }
    }
    Ok(MsgBody::Ack("queued".to_string()))
}

pub(super) async fn del_receive(node: &Node, msg: &Message) -> Result<MsgBody> {
    let MsgBody::DelReq(req) = &msg.body else {
        return Err(Error::UnexpectedResponse("del without DelReq body".to_string()));
    };

    if node.dht().exists(&req.h, StatusMask::ANY) == Err(Error::HashNotFound) {
        node.retry().park(req.h, StatusMask::ANY, msg.clone());
        return Ok(MsgBody::Ack("queued".to_string()));
    }

    let resp = run_validation_phase(
        node,
        msg.from,
        MsgBody::ValidateDelReq(ValidateQuery { h: req.by }),
    )
    .await?;
    let del_entry = DelEntry::from_content(resp.entry.content())?;

    let action = Action::Del {
        entry_type: resp.entry_type.clone(),
        entry: del_entry.clone(),
    };
    let chain = node.chain().read().await;
    let verdict = node.validate_action_with(
        &chain,
        &action,
        &resp.entry_type,
        Some(&resp.package),
        &[msg.from],
    );
    drop(chain);

    match verdict {
        Ok(_) => node.dht().delete(msg.from, &del_entry.hash)?,
        Err(e) => {
            debug!(target_hash = %req.h, error = %e, "del rejected");
            node.dht().put(
                msg.from,
                &resp.entry_type,
                req.by,
                resp.entry.marshal()?,
                Status::Rejected,
            )?;
        }
    }
    Ok(MsgBody::Ack("queued".to_string()))
}

pub(super) async fn link_receive(node: &Node, msg: &Message) -> Result<MsgBody> {
    let MsgBody::LinkReq(req) = &msg.body else {
        return Err(Error::UnexpectedResponse("link without LinkReq body".to_string()));
    };

    match node.dht().exists(&req.base, StatusMask::LIVE) {
        Ok(()) => {}
        Err(Error::HashNotFound) => {
            node.retry().park(req.base, StatusMask::LIVE, msg.clone());
            return Ok(MsgBody::Ack("queued".to_string()));
        }
        Err(e) => {
            warn!(base = %req.base, error = %e, "link base not live, ignoring");
            return Ok(MsgBody::Ack("ignored".to_string()));
        }
    }

    let resp = run_validation_phase(
        node,
        msg.from,
        MsgBody::ValidateLinkReq(ValidateQuery { h: req.links }),
    )
    .await?;
    let links_entry = LinksEntry::from_content(resp.entry.content())?;

    let action = Action::Link {
        entry_type: resp.entry_type.clone(),
        links: links_entry.links.clone(),
        validation_base: Some(req.base),
    };
    let chain = node.chain().read().await;
    let verdict = node.validate_action_with(
        &chain,
        &action,
        &resp.entry_type,
        Some(&resp.package),
        &[msg.from],
    );
    drop(chain);

    match verdict {
        Err(e) => {
            debug!(links = %req.links, error = %e, "links batch rejected");
            node.dht().put(
                msg.from,
                &resp.entry_type,
                req.links,
                resp.entry.marshal()?,
                Status::Rejected,
            )?;
        }
        Ok(def) => {
            let (zome, _) = node.dna().get_entry_def(&resp.entry_type)?;
            let sources = vec![msg.from.to_string()];
            let base_str = req.base.to_string();
            // One message per base: links under other bases arrive in their
            // own LINK_REQUEST.
            for link in links_entry.links.iter().filter(|l| l.base == base_str) {
                if let Some(def) = &def {
                    if let LinkVerdict::Reject(reason) =
                        zome.ribosome.validate_link(link, def, &sources)
                    {
                        warn!(link = %link.link, tag = %link.tag, %reason, "link rejected by app, skipping");
                        continue;
                    }
                }
                let applied = match link.link_action {
                    LinkAction::Add => {
                        node.dht().put_link(msg.from, &req.base, &link.link, &link.tag)
                    }
                    LinkAction::Del => {
                        node.dht().del_link(msg.from, &req.base, &link.link, &link.tag)
                    }
                };
                if let Err(e) = applied {
                    warn!(link = %link.link, tag = %link.tag, error = %e, "link apply failed");
                }
            }
        }
    }
    Ok(MsgBody::Ack("queued".to_string()))
}

pub(super) fn get_receive(node: &Node, msg: &Message) -> Result<MsgBody> {
    let MsgBody::GetReq(req) = &msg.body else {
        return Err(Error::UnexpectedResponse("get without GetReq body".to_string()));
    };

    let mask = req.get_mask.resolve();
    // Always fetch the type: the DNA must never be served.
    let result = node
        .dht()
        .get(&req.h, req.status_mask, mask.union(GetMask::ENTRY_TYPE))?;
    if result.entry_type == DNA_ENTRY_TYPE {
        return Err(Error::Dna("the DNA is never served".to_string()));
    }

    let mut resp = GetResp::default();
    if mask.contains(GetMask::ENTRY_TYPE) {
        resp.entry_type = Some(result.entry_type.clone());
    }
    if mask.contains(GetMask::ENTRY) {
        // System agent/key records hold the same canonical encoding as app
        // entries, so one unmarshal covers both.
        resp.entry = Some(Entry::unmarshal(&result.bytes)?);
    }
    if mask.contains(GetMask::SOURCES) {
        resp.sources = result.sources.iter().map(|p| p.to_string()).collect();
    }
    if result.status == Status::Modified {
        resp.follow_hash = result.follow_hash;
    }
    Ok(MsgBody::GetResp(resp))
}

pub(super) fn get_link_receive(node: &Node, msg: &Message) -> Result<MsgBody> {
    let MsgBody::LinkQuery(query) = &msg.body else {
        return Err(Error::UnexpectedResponse(
            "getLink without LinkQuery body".to_string(),
        ));
    };
    let links = node
        .dht()
        .get_links(&query.base, &query.tag, query.status_mask);
    Ok(MsgBody::LinkQueryResp(LinkQueryResp { links }))
}

pub(super) fn send_receive(node: &Node, msg: &Message) -> Result<MsgBody> {
    let MsgBody::AppMsg(app) = &msg.body else {
        return Err(Error::UnexpectedResponse("send without AppMsg body".to_string()));
    };
    let zome = node.dna().get_zome(&app.zome_type)?;
    let reply = zome
        .ribosome
        .receive(&msg.from.to_string(), app.body.clone())?;
    Ok(MsgBody::AppMsg(AppMsg {
        zome_type: app.zome_type.clone(),
        body: reply,
    }))
}
