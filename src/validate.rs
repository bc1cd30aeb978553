//! Validation driver
//!
//! `validate_action_with` runs the phases shared by the initiating and the
//! receiving side: system-type short circuits, definition lookup, package
//! assembly, system-level validation, application-level validation.
//! `get_validation_response` is the origin side of the validate protocol:
//! it justifies a record to a peer that is about to store it.

use libp2p_identity::PeerId;
use serde_json::Value;
use tracing::debug;

use crate::action::Action;
use crate::chain::Chain;
use crate::entry::{
    DataFormat, Entry, EntryDef, LinksEntry, AGENT_ENTRY_TYPE, DNA_ENTRY_TYPE, KEY_ENTRY_TYPE,
};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::message::ValidateResponse;
use crate::node::Node;
use crate::ribosome::{make_package, make_validation_package, Package};

/// Sources in their wire text form, as handed to the app.
pub(crate) fn prepare_sources(sources: &[PeerId]) -> Vec<String> {
    sources.iter().map(|p| p.to_string()).collect()
}

/// System-level validation of an entry payload against its definition.
///
/// The entry must be present; a declared schema validator sees the parsed
/// JSON for `json` formats and the opaque content otherwise; links entries
/// must carry at least one well-formed link.
pub fn sys_validate_entry(def: &EntryDef, entry: Option<&Entry>) -> Result<()> {
    let entry = entry.ok_or_else(|| Error::ValidationFailed("nil entry invalid".to_string()))?;

    if let Some(validator) = &def.validator {
        let input = if def.data_format == DataFormat::Json {
            serde_json::from_str::<Value>(entry.content())
                .map_err(|e| Error::ValidationFailed(format!("invalid json entry: {e}")))?
        } else {
            Value::String(entry.content().to_string())
        };
        debug!(entry_type = %def.name, "validating against schema");
        validator.validate(&input)?;
    } else if def.data_format == DataFormat::Links {
        let links = LinksEntry::from_content(entry.content())
            .map_err(|e| Error::ValidationFailed(e.to_string()))?;
        if links.links.is_empty() {
            return Err(Error::ValidationFailed(
                "invalid links entry: you must specify at least one link".to_string(),
            ));
        }
        for link in &links.links {
            link.base.parse::<Hash>().map_err(|e| {
                Error::ValidationFailed(format!("invalid links entry: Base {e}"))
            })?;
            link.link.parse::<Hash>().map_err(|e| {
                Error::ValidationFailed(format!("invalid links entry: Link {e}"))
            })?;
            if link.tag.is_empty() {
                return Err(Error::ValidationFailed(
                    "invalid links entry: missing Tag".to_string(),
                ));
            }
        }
    }
    Ok(())
}

impl Node {
    /// Run the validation phases for an action, returning the effective
    /// definition (`None` for system entry types).
    pub(crate) fn validate_action_with(
        &self,
        chain: &Chain,
        action: &Action,
        entry_type: &str,
        pkg: Option<&Package>,
        sources: &[PeerId],
    ) -> Result<Option<EntryDef>> {
        match entry_type {
            // The DNA is never surfaced over validation.
            DNA_ENTRY_TYPE => Ok(None),
            KEY_ENTRY_TYPE => {
                if let Some(entry) = action.entry() {
                    let content = entry.content();
                    let matches_identity = content == self.peer_id().to_string()
                        || sources.iter().any(|s| s.to_string() == content);
                    if !matches_identity {
                        return Err(Error::ValidationFailed(
                            "key entry does not match node identity".to_string(),
                        ));
                    }
                }
                Ok(None)
            }
            AGENT_ENTRY_TYPE => {
                if let Some(entry) = action.entry() {
                    if entry.content().is_empty() {
                        return Err(Error::ValidationFailed(
                            "empty agent entry".to_string(),
                        ));
                    }
                }
                Ok(None)
            }
            _ => {
                let (zome, def) = self.dna().get_entry_def(entry_type)?;

                let req = zome.ribosome.validate_packaging_request(action, def)?;
                let vpkg = make_validation_package(req, pkg)?;

                let resolve = |h: &Hash| -> Result<String> {
                    chain
                        .get_entry(h)
                        .map(|(_, t)| t.to_string())
                        .or_else(|_| self.dht().entry_type_of(h))
                };
                if let Err(e) = action.sys_validation(def, sources, &resolve) {
                    debug!(action = action.name(), error = %e, "sys validation failed");
                    return Err(e);
                }

                if let Err(e) =
                    zome.ribosome
                        .validate_action(action, def, &vpkg, &prepare_sources(sources))
                {
                    debug!(action = action.name(), error = %e, "app validation failed");
                    return Err(e);
                }
                Ok(Some(def.clone()))
            }
        }
    }

    /// Origin side of the validate protocol: fetch the entry and header for
    /// `hash` from the local chain, let the app inspect the request, and
    /// bundle the packaging materials it asked for.
    pub(crate) async fn get_validation_response(
        &self,
        action: &Action,
        hash: Hash,
    ) -> Result<ValidateResponse> {
        let chain = self.chain().read().await;

        let (entry, entry_type) = match chain.get_entry(&hash) {
            Ok((entry, entry_type)) => (entry.clone(), entry_type.to_string()),
            // A query for the node identity itself resolves to a key
            // placeholder without a header.
            Err(Error::HashNotFound) if hash == self.id_hash() => {
                return Ok(ValidateResponse {
                    entry_type: KEY_ENTRY_TYPE.to_string(),
                    entry: Entry::new(self.peer_id().to_string()),
                    header: None,
                    package: Package::default(),
                });
            }
            Err(e) => return Err(e),
        };
        let header = chain.get_entry_header(&hash)?.clone();

        match entry_type.as_str() {
            DNA_ENTRY_TYPE => Err(Error::Dna(
                "attempt to get validation response for DNA".to_string(),
            )),
            KEY_ENTRY_TYPE | AGENT_ENTRY_TYPE => Ok(ValidateResponse {
                entry_type,
                entry,
                header: Some(header),
                package: Package::default(),
            }),
            _ => {
                let (zome, def) = self.dna().get_entry_def(&entry_type)?;
                action.check_validation_request(def)?;
                let req = zome.ribosome.validate_packaging_request(action, def)?;
                let package = make_package(&chain, req)?;
                Ok(ValidateResponse {
                    entry_type,
                    entry,
                    header: Some(header),
                    package,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Sharing;
    use crate::ribosome::SchemaValidator;
    use std::sync::Arc;

    struct RequireField(&'static str);

    impl SchemaValidator for RequireField {
        fn validate(&self, input: &Value) -> Result<()> {
            if input.get(self.0).is_some() {
                Ok(())
            } else {
                Err(Error::ValidationFailed(format!("missing field {}", self.0)))
            }
        }
    }

    #[test]
    fn test_nil_entry_invalid() {
        let def = EntryDef::new("post", DataFormat::String, Sharing::Public);
        let err = sys_validate_entry(&def, None).unwrap_err();
        assert_eq!(err, Error::ValidationFailed("nil entry invalid".to_string()));
    }

    #[test]
    fn test_json_schema_validation() {
        let def = EntryDef::new("profile", DataFormat::Json, Sharing::Public)
            .with_validator(Arc::new(RequireField("name")));

        sys_validate_entry(&def, Some(&Entry::new(r#"{"name":"zippy"}"#))).unwrap();

        let err = sys_validate_entry(&def, Some(&Entry::new(r#"{"age":3}"#))).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));

        let err = sys_validate_entry(&def, Some(&Entry::new("not json"))).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
    }

    #[test]
    fn test_links_entry_sys_validation() {
        let def = EntryDef::new("rating", DataFormat::Links, Sharing::Public);
        let spec = crate::hash::HashSpec::default();
        let base = spec.sum(b"base").unwrap();
        let target = spec.sum(b"target").unwrap();

        let good = format!(
            r#"{{"Links":[{{"Base":"{base}","Link":"{target}","Tag":"likes"}}]}}"#
        );
        sys_validate_entry(&def, Some(&Entry::new(good))).unwrap();

        let empty = r#"{"Links":[]}"#;
        let err = sys_validate_entry(&def, Some(&Entry::new(empty))).unwrap_err();
        assert!(err.to_string().contains("at least one link"));

        let bad_base = format!(
            r#"{{"Links":[{{"Base":"nope","Link":"{target}","Tag":"likes"}}]}}"#
        );
        let err = sys_validate_entry(&def, Some(&Entry::new(bad_base))).unwrap_err();
        assert!(err.to_string().contains("Base"));

        let no_tag = format!(
            r#"{{"Links":[{{"Base":"{base}","Link":"{target}","Tag":""}}]}}"#
        );
        let err = sys_validate_entry(&def, Some(&Entry::new(no_tag))).unwrap_err();
        assert!(err.to_string().contains("Tag"));
    }
}
