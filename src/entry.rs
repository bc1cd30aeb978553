//! Entry model
//!
//! Entries are typed content-addressed payloads. The content is a string;
//! structured formats (`json`, `links`) ride inside it as JSON. System entry
//! types (`%dna`, `%key`, `%agent`) share the same representation and are
//! distinguished by type name, which travels in the header.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{Hash, HashSpec};
use crate::ribosome::SchemaValidator;

/// Entry type of the DNA itself. Committed at genesis, never served.
pub const DNA_ENTRY_TYPE: &str = "%dna";
/// Entry type of the agent's public key record.
pub const KEY_ENTRY_TYPE: &str = "%key";
/// Entry type of the agent identity record.
pub const AGENT_ENTRY_TYPE: &str = "%agent";

/// Returns true for the reserved system entry types.
pub fn is_system_entry_type(entry_type: &str) -> bool {
    matches!(entry_type, DNA_ENTRY_TYPE | KEY_ENTRY_TYPE | AGENT_ENTRY_TYPE)
}

/// A typed payload. Never mutated once committed; `mod`/`del` supersede it
/// logically but the bytes remain in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    content: String,
}

impl Entry {
    pub fn new(content: impl Into<String>) -> Self {
        Entry {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Canonical byte encoding, used for hashing and DHT storage.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&self.content)?)
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Entry> {
        let content: String = rmp_serde::from_slice(bytes)?;
        Ok(Entry { content })
    }

    /// Content address under the given hash spec.
    pub fn sum(&self, spec: &HashSpec) -> Result<Hash> {
        spec.sum(&self.marshal()?)
    }
}

/// Whether a link is being asserted or retracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAction {
    #[default]
    Add,
    Del,
}

/// One link inside a links entry. `base` and `link` are hash text forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Link {
    pub base: String,
    pub link: String,
    pub tag: String,
    #[serde(default)]
    pub link_action: LinkAction,
}

/// Content of a `links`-format entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinksEntry {
    pub links: Vec<Link>,
}

impl LinksEntry {
    pub fn from_content(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Serialization(format!("invalid links entry, invalid json: {e}")))
    }

    /// The distinct bases of this entry, in first-seen order.
    pub fn distinct_bases(&self) -> Vec<&str> {
        let mut bases = Vec::new();
        for link in &self.links {
            if !bases.contains(&link.base.as_str()) {
                bases.push(link.base.as_str());
            }
        }
        bases
    }
}

/// Payload of a deletion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DelEntry {
    pub hash: Hash,
    pub message: String,
}

impl DelEntry {
    pub fn from_content(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Serialization(format!("invalid del entry: {e}")))
    }

    pub fn to_entry(&self) -> Result<Entry> {
        Ok(Entry::new(serde_json::to_string(self)?))
    }
}

/// Data format of an application entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Raw,
    String,
    Json,
    Links,
}

/// Sharing policy of an application entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sharing {
    Private,
    Public,
}

/// Definition of one application entry type inside a zome.
#[derive(Clone)]
pub struct EntryDef {
    pub name: String,
    pub data_format: DataFormat,
    pub sharing: Sharing,
    pub validator: Option<Arc<dyn SchemaValidator>>,
}

impl EntryDef {
    pub fn new(name: impl Into<String>, data_format: DataFormat, sharing: Sharing) -> Self {
        EntryDef {
            name: name.into(),
            data_format,
            sharing,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }
}

impl fmt::Debug for EntryDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryDef")
            .field("name", &self.name)
            .field("data_format", &self.data_format)
            .field("sharing", &self.sharing)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_marshal_roundtrip() {
        let entry = Entry::new("hello");
        let bytes = entry.marshal().unwrap();
        let back = Entry::unmarshal(&bytes).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.content(), "hello");
    }

    #[test]
    fn test_entry_sum_depends_on_content() {
        let spec = HashSpec::default();
        let a = Entry::new("a").sum(&spec).unwrap();
        let b = Entry::new("b").sum(&spec).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, Entry::new("a").sum(&spec).unwrap());
    }

    #[test]
    fn test_links_entry_parsing() {
        let content = r#"{"Links":[
            {"Base":"fb1","Link":"fl1","Tag":"likes"},
            {"Base":"fb1","Link":"fl2","Tag":"likes","LinkAction":"del"},
            {"Base":"fb2","Link":"fl1","Tag":"follows","LinkAction":"add"}
        ]}"#;
        let le = LinksEntry::from_content(content).unwrap();
        assert_eq!(le.links.len(), 3);
        assert_eq!(le.links[0].link_action, LinkAction::Add);
        assert_eq!(le.links[1].link_action, LinkAction::Del);
        assert_eq!(le.distinct_bases(), vec!["fb1", "fb2"]);
    }

    #[test]
    fn test_links_entry_rejects_bad_json() {
        assert!(LinksEntry::from_content("not json").is_err());
        assert!(LinksEntry::from_content(r#"{"Links":[{"Base":"x"}]}"#).is_err());
    }

    #[test]
    fn test_del_entry_roundtrip() {
        let spec = HashSpec::default();
        let target = Entry::new("victim").sum(&spec).unwrap();
        let del = DelEntry {
            hash: target,
            message: "oops".to_string(),
        };
        let entry = del.to_entry().unwrap();
        let back = DelEntry::from_content(entry.content()).unwrap();
        assert_eq!(back, del);
    }

    #[test]
    fn test_system_entry_types() {
        assert!(is_system_entry_type(DNA_ENTRY_TYPE));
        assert!(is_system_entry_type(KEY_ENTRY_TYPE));
        assert!(is_system_entry_type(AGENT_ENTRY_TYPE));
        assert!(!is_system_entry_type("post"));
    }
}
