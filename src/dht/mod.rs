//! DHT store
//!
//! Maps content hashes to validated records with a status, plus a secondary
//! index of links per base. Status transitions follow a DAG:
//!
//! ```text
//!             PUT_ok                MOD                DEL
//!   absent ─────────► Live ─────────────► Modified ─────► Deleted
//!      │               │                                   ▲
//!      │               └───────────────── DEL ─────────────┘
//!      │  PUT_invalid
//!      └───────────────► Rejected     (terminal)
//! ```
//!
//! `Rejected` and `Deleted` are terminal. Each hash is a critical section:
//! transitions run under the concurrent map's per-entry lock, which is never
//! held across a network round trip.

pub mod retry;

use std::collections::HashSet;

use dashmap::DashMap;
use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;

/// Lifecycle state of a DHT record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Live = 0x01,
    Rejected = 0x02,
    Deleted = 0x04,
    Modified = 0x08,
}

/// Bitfield filter over record statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMask(pub u8);

impl StatusMask {
    /// The default mask resolves to `Live`; reserved values must not
    /// collide with it.
    pub const DEFAULT: StatusMask = StatusMask(Status::Live as u8);
    pub const LIVE: StatusMask = StatusMask(Status::Live as u8);
    pub const ANY: StatusMask = StatusMask(0xFF);

    pub fn contains(&self, status: Status) -> bool {
        self.0 & (status as u8) != 0
    }
}

impl Default for StatusMask {
    fn default() -> Self {
        StatusMask::DEFAULT
    }
}

/// Bitfield selecting which parts of a record a `get` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GetMask(pub u8);

impl GetMask {
    pub const DEFAULT: GetMask = GetMask(0x00);
    pub const ENTRY: GetMask = GetMask(0x01);
    pub const ENTRY_TYPE: GetMask = GetMask(0x02);
    pub const SOURCES: GetMask = GetMask(0x04);
    pub const ALL: GetMask = GetMask(0xFF);

    /// `Default` resolves to `Entry` on the receive side.
    pub fn resolve(self) -> GetMask {
        if self.0 == 0 {
            GetMask::ENTRY
        } else {
            self
        }
    }

    pub fn contains(&self, other: GetMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: GetMask) -> GetMask {
        GetMask(self.0 | other.0)
    }
}

impl Default for GetMask {
    fn default() -> Self {
        GetMask::DEFAULT
    }
}

/// One validated record.
#[derive(Debug, Clone)]
pub struct DhtRecord {
    pub entry_type: String,
    pub bytes: Vec<u8>,
    pub sources: HashSet<PeerId>,
    pub status: Status,
    /// Set iff `status == Modified`; the replacing hash.
    pub follow_hash: Option<Hash>,
}

/// One link assertion under a base.
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub link: String,
    pub tag: String,
    pub source: PeerId,
    pub status: Status,
}

/// A link as returned to `getLink` callers; `e` is the loaded entry content
/// when the caller asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedHash {
    #[serde(rename = "H")]
    pub h: String,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// What a `get` resolved to.
#[derive(Debug, Clone)]
pub struct DhtGetResult {
    pub entry_type: String,
    pub bytes: Vec<u8>,
    pub sources: Vec<PeerId>,
    pub status: Status,
    pub follow_hash: Option<Hash>,
}

/// The local shard of the shared DHT.
#[derive(Default)]
pub struct DhtStore {
    records: DashMap<Hash, DhtRecord>,
    links: DashMap<Hash, Vec<LinkRecord>>,
}

impl DhtStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record on first receive, or accumulate the source on a
    /// repeat. Status is decided by the first accepted touch; later puts of
    /// the same hash cannot move it (transitions belong to MOD/DEL).
    pub fn put(
        &self,
        from: PeerId,
        entry_type: &str,
        hash: Hash,
        bytes: Vec<u8>,
        status: Status,
    ) -> Result<()> {
        match self.records.entry(hash) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(%hash, entry_type, ?status, "dht put");
                slot.insert(DhtRecord {
                    entry_type: entry_type.to_string(),
                    bytes,
                    sources: HashSet::from([from]),
                    status,
                    follow_hash: None,
                });
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                slot.get_mut().sources.insert(from);
            }
        }
        Ok(())
    }

    /// Check a record exists with a status in `mask`. Absent records yield
    /// `HashNotFound`; present records outside the mask yield the
    /// status-specific sentinel.
    pub fn exists(&self, hash: &Hash, mask: StatusMask) -> Result<()> {
        let record = self.records.get(hash).ok_or(Error::HashNotFound)?;
        status_check(&record, mask)
    }

    /// Resolve a record for a `get`, honouring the status mask.
    pub fn get(&self, hash: &Hash, mask: StatusMask, _get_mask: GetMask) -> Result<DhtGetResult> {
        let record = self.records.get(hash).ok_or(Error::HashNotFound)?;
        status_check(&record, mask)?;
        Ok(DhtGetResult {
            entry_type: record.entry_type.clone(),
            bytes: record.bytes.clone(),
            sources: record.sources.iter().copied().collect(),
            status: record.status,
            follow_hash: record.follow_hash,
        })
    }

    /// Entry type of a held record, whatever its status.
    pub fn entry_type_of(&self, hash: &Hash) -> Result<String> {
        self.records
            .get(hash)
            .map(|r| r.entry_type.clone())
            .ok_or(Error::HashNotFound)
    }

    /// Transition `old` to `Modified`, following to `new`.
    pub fn modify(&self, from: PeerId, old: &Hash, new: Hash) -> Result<()> {
        let mut record = self.records.get_mut(old).ok_or(Error::HashNotFound)?;
        match record.status {
            Status::Live => {
                debug!(%old, %new, "dht mod");
                record.status = Status::Modified;
                record.follow_hash = Some(new);
                record.sources.insert(from);
                Ok(())
            }
            other => Err(transition_refused(&record, other)),
        }
    }

    /// Transition a record to `Deleted`. Valid from `Live` or `Modified`.
    pub fn delete(&self, from: PeerId, hash: &Hash) -> Result<()> {
        let mut record = self.records.get_mut(hash).ok_or(Error::HashNotFound)?;
        match record.status {
            Status::Live | Status::Modified => {
                debug!(%hash, "dht del");
                record.status = Status::Deleted;
                record.sources.insert(from);
                Ok(())
            }
            other => Err(transition_refused(&record, other)),
        }
    }

    /// Record a link under a base. Duplicate `(link, tag, source)` rows are
    /// collapsed.
    pub fn put_link(&self, from: PeerId, base: &Hash, link: &str, tag: &str) -> Result<()> {
        let mut rows = self.links.entry(*base).or_default();
        let dup = rows.iter().any(|r| {
            r.link == link && r.tag == tag && r.source == from && r.status == Status::Live
        });
        if !dup {
            debug!(%base, link, tag, "dht put_link");
            rows.push(LinkRecord {
                link: link.to_string(),
                tag: tag.to_string(),
                source: from,
                status: Status::Live,
            });
        }
        Ok(())
    }

    /// Retract all live links matching `(link, tag)` under a base.
    pub fn del_link(&self, _from: PeerId, base: &Hash, link: &str, tag: &str) -> Result<()> {
        let mut rows = self.links.get_mut(base).ok_or(Error::HashNotFound)?;
        let mut found = false;
        for row in rows.iter_mut() {
            if row.link == link && row.tag == tag && row.status == Status::Live {
                debug!(%base, link, tag, "dht del_link");
                row.status = Status::Deleted;
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(Error::HashNotFound)
        }
    }

    /// Links under a base with the given tag, filtered by status; one row
    /// per distinct link hash.
    pub fn get_links(&self, base: &Hash, tag: &str, mask: StatusMask) -> Vec<TaggedHash> {
        let Some(rows) = self.links.get(base) else {
            return Vec::new();
        };
        let mut out: Vec<TaggedHash> = Vec::new();
        for row in rows.iter() {
            if row.tag == tag && mask.contains(row.status) && !out.iter().any(|t| t.h == row.link)
            {
                out.push(TaggedHash {
                    h: row.link.clone(),
                    e: None,
                });
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn status_check(record: &DhtRecord, mask: StatusMask) -> Result<()> {
    if mask.contains(record.status) {
        return Ok(());
    }
    Err(transition_refused(record, record.status))
}

fn transition_refused(record: &DhtRecord, status: Status) -> Error {
    match status {
        Status::Modified => Error::HashModified {
            // invariant: follow_hash is set iff status is Modified
            follow: record.follow_hash.expect("modified record without follow hash"),
        },
        Status::Deleted => Error::HashDeleted,
        Status::Rejected => Error::HashRejected,
        Status::Live => Error::HashNotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashSpec;

    fn h(s: &str) -> Hash {
        HashSpec::default().sum(s.as_bytes()).unwrap()
    }

    fn peer() -> PeerId {
        PeerId::random()
    }

    #[test]
    fn test_put_then_get_live() {
        let dht = DhtStore::new();
        let src = peer();
        dht.put(src, "post", h("a"), vec![1, 2], Status::Live).unwrap();

        let got = dht
            .get(&h("a"), StatusMask::DEFAULT, GetMask::ENTRY)
            .unwrap();
        assert_eq!(got.entry_type, "post");
        assert_eq!(got.bytes, vec![1, 2]);
        assert_eq!(got.sources, vec![src]);
        assert_eq!(got.status, Status::Live);
    }

    #[test]
    fn test_sources_accumulate() {
        let dht = DhtStore::new();
        let (a, b) = (peer(), peer());
        dht.put(a, "post", h("a"), vec![], Status::Live).unwrap();
        dht.put(b, "post", h("a"), vec![], Status::Live).unwrap();
        let got = dht
            .get(&h("a"), StatusMask::DEFAULT, GetMask::SOURCES)
            .unwrap();
        assert_eq!(got.sources.len(), 2);
    }

    #[test]
    fn test_modified_record_reports_follow() {
        let dht = DhtStore::new();
        let src = peer();
        dht.put(src, "post", h("old"), vec![], Status::Live).unwrap();
        dht.modify(src, &h("old"), h("new")).unwrap();

        let err = dht
            .get(&h("old"), StatusMask::DEFAULT, GetMask::ENTRY)
            .unwrap_err();
        assert_eq!(err, Error::HashModified { follow: h("new") });

        // Wider mask still resolves the record, follow hash included.
        let got = dht.get(&h("old"), StatusMask::ANY, GetMask::ENTRY).unwrap();
        assert_eq!(got.status, Status::Modified);
        assert_eq!(got.follow_hash, Some(h("new")));
    }

    #[test]
    fn test_modified_then_deleted() {
        let dht = DhtStore::new();
        let src = peer();
        dht.put(src, "post", h("x"), vec![], Status::Live).unwrap();
        dht.modify(src, &h("x"), h("y")).unwrap();
        dht.delete(src, &h("x")).unwrap();
        assert_eq!(
            dht.exists(&h("x"), StatusMask::DEFAULT),
            Err(Error::HashDeleted)
        );
    }

    #[test]
    fn test_terminal_states_refuse_transitions() {
        let dht = DhtStore::new();
        let src = peer();
        dht.put(src, "post", h("x"), vec![], Status::Live).unwrap();
        dht.delete(src, &h("x")).unwrap();
        // MOD racing a DEL lands after it: deterministic terminal state.
        assert!(dht.modify(src, &h("x"), h("y")).is_err());
        assert!(dht.delete(src, &h("x")).is_err());

        dht.put(src, "post", h("r"), vec![], Status::Rejected).unwrap();
        assert!(dht.modify(src, &h("r"), h("y")).is_err());
        assert!(dht.delete(src, &h("r")).is_err());
    }

    #[test]
    fn test_missing_hash() {
        let dht = DhtStore::new();
        assert_eq!(
            dht.exists(&h("nope"), StatusMask::ANY),
            Err(Error::HashNotFound)
        );
        assert!(dht.modify(peer(), &h("nope"), h("y")).is_err());
    }

    #[test]
    fn test_link_add_then_del() {
        let dht = DhtStore::new();
        let src = peer();
        let base = h("base");
        dht.put_link(src, &base, "ftarget", "likes").unwrap();

        let live = dht.get_links(&base, "likes", StatusMask::DEFAULT);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].h, "ftarget");

        dht.del_link(src, &base, "ftarget", "likes").unwrap();
        assert!(dht.get_links(&base, "likes", StatusMask::DEFAULT).is_empty());
        // Still visible when the caller asks for everything.
        assert_eq!(dht.get_links(&base, "likes", StatusMask::ANY).len(), 1);
    }

    #[test]
    fn test_links_filter_by_tag() {
        let dht = DhtStore::new();
        let src = peer();
        let base = h("base");
        dht.put_link(src, &base, "fa", "likes").unwrap();
        dht.put_link(src, &base, "fb", "follows").unwrap();
        assert_eq!(dht.get_links(&base, "likes", StatusMask::DEFAULT).len(), 1);
        assert_eq!(dht.get_links(&base, "follows", StatusMask::DEFAULT).len(), 1);
        assert!(dht.get_links(&base, "other", StatusMask::DEFAULT).is_empty());
    }

    #[test]
    fn test_get_mask_resolution() {
        assert_eq!(GetMask::DEFAULT.resolve(), GetMask::ENTRY);
        assert_eq!(GetMask::SOURCES.resolve(), GetMask::SOURCES);
        assert!(GetMask::ALL.contains(GetMask::ENTRY));
        assert!(GetMask::ENTRY
            .union(GetMask::ENTRY_TYPE)
            .contains(GetMask::ENTRY_TYPE));
    }
}
