//! Chain headers
//!
//! A header binds an entry to its position in the agent's chain: a link to
//! the previous header, a link to the previous header of the same entry
//! type, and a signature over the canonical encoding under the agent's key.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{Hash, HashSpec};

/// How a header supersedes an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Mod,
    Del,
}

/// Carried by `mod`/`del` headers, linking them to the header they supersede.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub action: ChangeAction,
    pub hash: Hash,
}

/// A signed chain header. Finalized at `add_entry`, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub time: DateTime<Utc>,
    pub entry_type: String,
    /// Hash of the entry this header commits.
    pub entry_link: Hash,
    /// Previous header hash, `None` only for the genesis header.
    pub header_link: Option<Hash>,
    /// Previous header hash of the same entry type, if any.
    pub type_link: Option<Hash>,
    pub change: Option<StatusChange>,
    pub sig: Signature,
}

/// Signature input: everything but the signature itself.
#[derive(Serialize)]
struct SigningInput<'a> {
    time: &'a DateTime<Utc>,
    entry_type: &'a str,
    entry_link: &'a Hash,
    header_link: &'a Option<Hash>,
    type_link: &'a Option<Hash>,
    change: &'a Option<StatusChange>,
}

impl Header {
    /// Assemble and sign a header.
    pub fn new(
        time: DateTime<Utc>,
        entry_type: impl Into<String>,
        entry_link: Hash,
        header_link: Option<Hash>,
        type_link: Option<Hash>,
        change: Option<StatusChange>,
        key: &SigningKey,
    ) -> Result<Header> {
        let entry_type = entry_type.into();
        let input = rmp_serde::to_vec(&SigningInput {
            time: &time,
            entry_type: &entry_type,
            entry_link: &entry_link,
            header_link: &header_link,
            type_link: &type_link,
            change: &change,
        })?;
        let sig = key.sign(&input);
        Ok(Header {
            time,
            entry_type,
            entry_link,
            header_link,
            type_link,
            change,
            sig,
        })
    }

    fn signing_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&SigningInput {
            time: &self.time,
            entry_type: &self.entry_type,
            entry_link: &self.entry_link,
            header_link: &self.header_link,
            type_link: &self.type_link,
            change: &self.change,
        })?)
    }

    /// Verify the signature under the agent's public key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        let input = self.signing_bytes()?;
        key.verify(&input, &self.sig)
            .map_err(|_| Error::Chain("header signature verification failed".to_string()))
    }

    /// Canonical byte encoding of the full header, signature included.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// The header's own content address.
    pub fn sum(&self, spec: &HashSpec) -> Result<Hash> {
        spec.sum(&self.marshal()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn test_key() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    fn entry_hash(content: &str) -> Hash {
        crate::entry::Entry::new(content)
            .sum(&HashSpec::default())
            .unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let key = test_key();
        let header = Header::new(
            Utc::now(),
            "post",
            entry_hash("hello"),
            None,
            None,
            None,
            &key,
        )
        .unwrap();
        header.verify(&key.verifying_key()).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let header = Header::new(
            Utc::now(),
            "post",
            entry_hash("hello"),
            None,
            None,
            None,
            &test_key(),
        )
        .unwrap();
        assert!(header.verify(&test_key().verifying_key()).is_err());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let key = test_key();
        let mut header = Header::new(
            Utc::now(),
            "post",
            entry_hash("hello"),
            None,
            None,
            None,
            &key,
        )
        .unwrap();
        header.entry_type = "comment".to_string();
        assert!(header.verify(&key.verifying_key()).is_err());
    }

    #[test]
    fn test_header_hash_recomputes() {
        let spec = HashSpec::default();
        let header = Header::new(
            Utc::now(),
            "post",
            entry_hash("hello"),
            None,
            None,
            Some(StatusChange {
                action: ChangeAction::Mod,
                hash: entry_hash("old"),
            }),
            &test_key(),
        )
        .unwrap();
        assert_eq!(header.sum(&spec).unwrap(), header.sum(&spec).unwrap());

        let decoded: Header = rmp_serde::from_slice(&header.marshal().unwrap()).unwrap();
        assert_eq!(decoded.sum(&spec).unwrap(), header.sum(&spec).unwrap());
    }
}
