//! Committing verbs
//!
//! `commit`, `mod`, and `del` share one chain-mutation path: prepare the
//! header, validate locally with the node itself as the sole source, then
//! append. Publishing to the DHT is the verb-specific part.

use chrono::Utc;
use tracing::{debug, warn};

use crate::action::Action;
use crate::entry::{DataFormat, EntryDef, LinksEntry, Sharing};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::header::{ChangeAction, Header, StatusChange};
use crate::message::{DelReq, LinkReq, ModReq, MsgBody, Protocol, PutReq};
use crate::node::Node;

impl Node {
    /// Validate a committing action and append it to the local chain.
    ///
    /// Returns the effective definition (`None` for system entry types),
    /// the finalized header, and the entry hash. Publishing is left to the
    /// verb-specific initiating side.
    pub(crate) async fn do_commit(
        &self,
        action: &Action,
        change: Option<StatusChange>,
    ) -> Result<(Option<EntryDef>, Header, Hash)> {
        let entry_type = action
            .entry_type()
            .ok_or(Error::NonCallableAction)?
            .to_string();
        let entry = action.entry().ok_or(Error::NonCallableAction)?;

        let mut chain = self.chain().write().await;
        let (index, header_hash, header) =
            chain.prepare_header(Utc::now(), &entry_type, &entry, self.signing_key(), change)?;

        let def = match self.validate_action_with(
            &chain,
            action,
            &entry_type,
            None,
            &[self.peer_id()],
        ) {
            Ok(def) => def,
            Err(Error::ValidationFailed(_)) => {
                return Err(Error::InvalidEntry(entry.content().to_string()))
            }
            Err(e) => return Err(e),
        };

        let entry_hash = chain.add_entry(index, header_hash, header.clone(), entry)?;
        debug!(action = action.name(), entry_type = %entry_type, hash = %entry_hash, "committed");
        Ok((def, header, entry_hash))
    }

    /// `commit`: append, then publish. Links entries fan out one
    /// `LINK_REQUEST` per distinct base; other public entries emit a
    /// `PUT_REQUEST` toward the entry hash's owner.
    pub(crate) async fn do_commit_action(&self, action: &Action) -> Result<Hash> {
        let (def, _header, entry_hash) = self.do_commit(action, None).await?;
        let Some(def) = def else {
            // system entries stay on the local chain
            return Ok(entry_hash);
        };

        if def.data_format == DataFormat::Links {
            let entry = action.entry().ok_or(Error::NonCallableAction)?;
            let links = LinksEntry::from_content(entry.content())?;
            for base in links.distinct_bases() {
                let base_hash: Hash = base.parse()?;
                let req = MsgBody::LinkReq(LinkReq {
                    base: base_hash,
                    links: entry_hash,
                });
                if let Err(e) = self.request_key(Protocol::Action, &base_hash, req).await {
                    warn!(base = %base_hash, error = %e, "link publish failed");
                }
            }
        } else if def.sharing == Sharing::Public {
            self.request_key(
                Protocol::Action,
                &entry_hash,
                MsgBody::PutReq(PutReq { h: entry_hash }),
            )
            .await?;
        }
        Ok(entry_hash)
    }

    /// `mod`: append the replacement, then publish the new entry and a
    /// `MOD_REQUEST` targeting the replaced hash.
    pub(crate) async fn do_mod_action(&self, action: &Action) -> Result<Hash> {
        let Action::Mod { replaces, .. } = action else {
            return Err(Error::NonCallableAction);
        };
        let replaces = *replaces;
        let change = StatusChange {
            action: ChangeAction::Mod,
            hash: replaces,
        };
        let (def, _header, entry_hash) = self.do_commit(action, Some(change)).await?;

        if def.map(|d| d.sharing) == Some(Sharing::Public) {
            self.request_key(
                Protocol::Action,
                &entry_hash,
                MsgBody::PutReq(PutReq { h: entry_hash }),
            )
            .await?;
            self.request_key(
                Protocol::Action,
                &replaces,
                MsgBody::ModReq(ModReq {
                    h: replaces,
                    n: entry_hash,
                }),
            )
            .await?;
        }
        Ok(entry_hash)
    }

    /// `del`: append the deletion record, then publish a `DEL_REQUEST`
    /// targeting the deleted hash, justified by the record's own hash.
    pub(crate) async fn do_del_action(&self, action: &Action) -> Result<Hash> {
        let Action::Del { entry, .. } = action else {
            return Err(Error::NonCallableAction);
        };
        let target = entry.hash;
        let change = StatusChange {
            action: ChangeAction::Del,
            hash: target,
        };
        let (def, _header, entry_hash) = self.do_commit(action, Some(change)).await?;

        if def.map(|d| d.sharing) == Some(Sharing::Public) {
            self.request_key(
                Protocol::Action,
                &target,
                MsgBody::DelReq(DelReq {
                    h: target,
                    by: entry_hash,
                }),
            )
            .await?;
        }
        Ok(entry_hash)
    }
}
