//! Local chain
//!
//! The append-only ordered log of `(Header, Entry)` pairs owned by a single
//! agent. Mutation is restricted to append; out-of-index inserts and
//! duplicate headers are refused. Back-references (previous header,
//! previous-of-type) are tracked as positional indices into the chain
//! vector, with hashes only materialized into headers for the wire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use tracing::debug;

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::hash::{Hash, HashSpec};
use crate::header::{Header, StatusChange};

/// Per-agent append-only log of headers and entries.
pub struct Chain {
    spec: HashSpec,
    headers: Vec<Header>,
    entries: Vec<Entry>,
    /// Header hash at each index.
    header_hashes: Vec<Hash>,
    by_header_hash: HashMap<Hash, usize>,
    /// First index committing each entry hash.
    by_entry_hash: HashMap<Hash, usize>,
    /// Latest index per entry type.
    type_tail: HashMap<String, usize>,
}

impl Chain {
    pub fn new(spec: HashSpec) -> Self {
        Chain {
            spec,
            headers: Vec::new(),
            entries: Vec::new(),
            header_hashes: Vec::new(),
            by_header_hash: HashMap::new(),
            by_entry_hash: HashMap::new(),
            type_tail: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn spec(&self) -> &HashSpec {
        &self.spec
    }

    /// Hash of the newest header, if any.
    pub fn top(&self) -> Option<Hash> {
        self.header_hashes.last().copied()
    }

    /// Hash of the newest header of the given entry type, if any.
    pub fn top_of_type(&self, entry_type: &str) -> Option<Hash> {
        self.type_tail
            .get(entry_type)
            .map(|&i| self.header_hashes[i])
    }

    /// Compute the entry hash, assemble and sign the header, and return the
    /// index at which `add_entry` must insert it. The chain itself is not
    /// mutated until `add_entry`.
    pub fn prepare_header(
        &self,
        now: DateTime<Utc>,
        entry_type: &str,
        entry: &Entry,
        key: &SigningKey,
        change: Option<StatusChange>,
    ) -> Result<(usize, Hash, Header)> {
        let entry_hash = entry.sum(&self.spec)?;
        let header = Header::new(
            now,
            entry_type,
            entry_hash,
            self.top(),
            self.top_of_type(entry_type),
            change,
            key,
        )?;
        let header_hash = header.sum(&self.spec)?;
        Ok((self.len(), header_hash, header))
    }

    /// Append a prepared header and its entry.
    ///
    /// Fails if `index` is not the current chain length, if `header_hash`
    /// does not recompute from the header, or if the header hash is already
    /// present.
    pub fn add_entry(
        &mut self,
        index: usize,
        header_hash: Hash,
        header: Header,
        entry: Entry,
    ) -> Result<Hash> {
        if index != self.len() {
            return Err(Error::Chain(format!(
                "out-of-order append: index {} but chain length {}",
                index,
                self.len()
            )));
        }
        let recomputed = header.sum(&self.spec)?;
        if recomputed != header_hash {
            return Err(Error::Chain(
                "header hash does not match recomputation".to_string(),
            ));
        }
        if self.by_header_hash.contains_key(&header_hash) {
            return Err(Error::Chain(format!(
                "duplicate header hash {header_hash}"
            )));
        }

        let entry_hash = header.entry_link;
        debug!(index, entry_type = %header.entry_type, hash = %entry_hash, "chain append");

        self.by_header_hash.insert(header_hash, index);
        self.by_entry_hash.entry(entry_hash).or_insert(index);
        self.type_tail.insert(header.entry_type.clone(), index);
        self.header_hashes.push(header_hash);
        self.headers.push(header);
        self.entries.push(entry);
        Ok(entry_hash)
    }

    /// Look up an entry and its type by entry hash.
    pub fn get_entry(&self, hash: &Hash) -> Result<(&Entry, &str)> {
        let &index = self.by_entry_hash.get(hash).ok_or(Error::HashNotFound)?;
        Ok((&self.entries[index], &self.headers[index].entry_type))
    }

    /// Look up the header that committed an entry hash.
    pub fn get_entry_header(&self, hash: &Hash) -> Result<&Header> {
        let &index = self.by_entry_hash.get(hash).ok_or(Error::HashNotFound)?;
        Ok(&self.headers[index])
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn test_chain() -> (Chain, SigningKey) {
        (
            Chain::new(HashSpec::default()),
            SigningKey::generate(&mut OsRng),
        )
    }

    fn append(chain: &mut Chain, key: &SigningKey, entry_type: &str, content: &str) -> Hash {
        let entry = Entry::new(content);
        let (index, header_hash, header) = chain
            .prepare_header(Utc::now(), entry_type, &entry, key, None)
            .unwrap();
        chain.add_entry(index, header_hash, header, entry).unwrap()
    }

    #[test]
    fn test_genesis_header_has_no_prev() {
        let (mut chain, key) = test_chain();
        let entry = Entry::new("first");
        let (index, _, header) = chain
            .prepare_header(Utc::now(), "post", &entry, &key, None)
            .unwrap();
        assert_eq!(index, 0);
        assert!(header.header_link.is_none());
        assert!(header.type_link.is_none());
    }

    #[test]
    fn test_append_links_previous_and_type() {
        let (mut chain, key) = test_chain();
        append(&mut chain, &key, "post", "one");
        append(&mut chain, &key, "comment", "two");

        let entry = Entry::new("three");
        let (_, _, header) = chain
            .prepare_header(Utc::now(), "post", &entry, &key, None)
            .unwrap();
        assert_eq!(header.header_link, Some(chain.header_hashes[1]));
        assert_eq!(header.type_link, Some(chain.header_hashes[0]));
    }

    #[test]
    fn test_out_of_order_append_refused() {
        let (mut chain, key) = test_chain();
        let entry = Entry::new("one");
        let (_, header_hash, header) = chain
            .prepare_header(Utc::now(), "post", &entry, &key, None)
            .unwrap();
        let err = chain
            .add_entry(5, header_hash, header, entry)
            .unwrap_err();
        assert!(matches!(err, Error::Chain(_)));
    }

    #[test]
    fn test_wrong_header_hash_refused() {
        let (mut chain, key) = test_chain();
        let entry = Entry::new("one");
        let (index, _, header) = chain
            .prepare_header(Utc::now(), "post", &entry, &key, None)
            .unwrap();
        let bogus = HashSpec::default().sum(b"bogus").unwrap();
        assert!(chain.add_entry(index, bogus, header, entry).is_err());
    }

    #[test]
    fn test_duplicate_header_refused() {
        let (mut chain, key) = test_chain();
        let entry = Entry::new("one");
        let (index, header_hash, header) = chain
            .prepare_header(Utc::now(), "post", &entry, &key, None)
            .unwrap();
        chain
            .add_entry(index, header_hash, header.clone(), entry.clone())
            .unwrap();
        // Same prepared header again: right index, duplicate hash.
        let err = chain.add_entry(1, header_hash, header, entry).unwrap_err();
        assert!(matches!(err, Error::Chain(_)));
    }

    #[test]
    fn test_get_entry_roundtrip() {
        let (mut chain, key) = test_chain();
        let hash = append(&mut chain, &key, "post", "hello");
        let (entry, entry_type) = chain.get_entry(&hash).unwrap();
        assert_eq!(entry.content(), "hello");
        assert_eq!(entry_type, "post");
        let header = chain.get_entry_header(&hash).unwrap();
        assert_eq!(header.entry_link, hash);
    }

    #[test]
    fn test_get_entry_unknown_hash() {
        let (chain, _) = test_chain();
        let missing = HashSpec::default().sum(b"missing").unwrap();
        assert_eq!(chain.get_entry(&missing).unwrap_err(), Error::HashNotFound);
    }

    #[test]
    fn test_headers_verify_and_recompute() {
        let (mut chain, key) = test_chain();
        append(&mut chain, &key, "post", "one");
        append(&mut chain, &key, "post", "two");

        let verifying = key.verifying_key();
        for (i, header) in chain.headers().iter().enumerate() {
            header.verify(&verifying).unwrap();
            assert_eq!(
                header.sum(chain.spec()).unwrap(),
                chain.header_hashes[i]
            );
        }
    }
}
