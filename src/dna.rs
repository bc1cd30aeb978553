//! DNA and zome model
//!
//! The DNA is the immutable application definition: named zomes carrying
//! entry definitions and a ribosome, a hash spec all peers agree on, and
//! free-form properties. Its canonical serialization is the content of the
//! genesis `%dna` entry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryDef};
use crate::error::{Error, Result};
use crate::hash::{Hash, HashSpec};
use crate::ribosome::Ribosome;

/// A named application module.
pub struct Zome {
    pub name: String,
    pub entry_defs: Vec<EntryDef>,
    pub ribosome: Arc<dyn Ribosome>,
}

impl std::fmt::Debug for Zome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zome")
            .field("name", &self.name)
            .field("entry_defs", &self.entry_defs)
            .finish()
    }
}

impl Zome {
    pub fn new(
        name: impl Into<String>,
        entry_defs: Vec<EntryDef>,
        ribosome: Arc<dyn Ribosome>,
    ) -> Self {
        Zome {
            name: name.into(),
            entry_defs,
            ribosome,
        }
    }
}

/// The immutable application definition.
#[derive(Debug)]
pub struct Dna {
    pub name: String,
    pub hash_spec: HashSpec,
    pub properties: BTreeMap<String, String>,
    pub zomes: Vec<Zome>,
}

/// Serializable shape of a DNA, without the ribosomes. This is what the
/// genesis entry carries and what the DNA hash is computed over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnaManifest {
    pub name: String,
    pub hash_spec: HashSpec,
    pub properties: BTreeMap<String, String>,
    pub zomes: Vec<ZomeManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZomeManifest {
    pub name: String,
    pub entries: Vec<EntryManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryManifest {
    pub name: String,
    pub data_format: crate::entry::DataFormat,
    pub sharing: crate::entry::Sharing,
}

impl Dna {
    /// Build a DNA, enforcing that an entry-type name appears in at most
    /// one zome.
    pub fn new(
        name: impl Into<String>,
        hash_spec: HashSpec,
        properties: BTreeMap<String, String>,
        zomes: Vec<Zome>,
    ) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for zome in &zomes {
            for def in &zome.entry_defs {
                if !seen.insert(def.name.clone()) {
                    return Err(Error::Dna(format!(
                        "entry type {} declared in more than one zome",
                        def.name
                    )));
                }
            }
        }
        Ok(Dna {
            name: name.into(),
            hash_spec,
            properties,
            zomes,
        })
    }

    /// Look up the zome and definition for an application entry type.
    pub fn get_entry_def(&self, entry_type: &str) -> Result<(&Zome, &EntryDef)> {
        for zome in &self.zomes {
            if let Some(def) = zome.entry_defs.iter().find(|d| d.name == entry_type) {
                return Ok((zome, def));
            }
        }
        Err(Error::UnknownEntryType(entry_type.to_string()))
    }

    pub fn get_zome(&self, name: &str) -> Result<&Zome> {
        self.zomes
            .iter()
            .find(|z| z.name == name)
            .ok_or_else(|| Error::Dna(format!("unknown zome: {name}")))
    }

    pub fn property(&self, name: &str) -> Result<&str> {
        self.properties
            .get(name)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::Dna(format!("no such property: {name}")))
    }

    pub fn manifest(&self) -> DnaManifest {
        DnaManifest {
            name: self.name.clone(),
            hash_spec: self.hash_spec.clone(),
            properties: self.properties.clone(),
            zomes: self
                .zomes
                .iter()
                .map(|z| ZomeManifest {
                    name: z.name.clone(),
                    entries: z
                        .entry_defs
                        .iter()
                        .map(|d| EntryManifest {
                            name: d.name.clone(),
                            data_format: d.data_format,
                            sharing: d.sharing,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// The genesis `%dna` entry.
    pub fn to_entry(&self) -> Result<Entry> {
        Ok(Entry::new(serde_json::to_string(&self.manifest())?))
    }

    /// The DNA's own content address.
    pub fn sum(&self) -> Result<Hash> {
        self.to_entry()?.sum(&self.hash_spec)
    }
}
