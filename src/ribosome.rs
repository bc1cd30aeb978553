//! Application engine seam
//!
//! The ribosome interprets application validation and receive logic for a
//! zome. The interpreter itself is an external collaborator; this module
//! defines the contract the pipeline consumes, plus the packaging types
//! that carry chain context to a validating peer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;
use crate::chain::Chain;
use crate::entry::{EntryDef, Link};
use crate::error::{Error, Result};
use crate::header::Header;

/// Validates an entry payload against an application-declared schema.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, input: &Value) -> Result<()>;
}

/// Chain context an application declares it needs for validation, as a flag
/// set negotiated per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackagingReq(pub u8);

impl PackagingReq {
    pub const NONE: PackagingReq = PackagingReq(0x00);
    pub const CHAIN_HEADERS: PackagingReq = PackagingReq(0x01);
    pub const CHAIN_ENTRIES: PackagingReq = PackagingReq(0x02);
    pub const CHAIN_FULL: PackagingReq = PackagingReq(0x03);

    pub fn contains(&self, other: PackagingReq) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The bundle assembled at the source peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub chain_headers: Option<Vec<Header>>,
    pub chain_entries: Option<Vec<crate::entry::Entry>>,
}

/// The package as seen by the validating side.
#[derive(Debug, Clone, Default)]
pub struct ValidationPackage {
    pub chain_headers: Option<Vec<Header>>,
    pub chain_entries: Option<Vec<crate::entry::Entry>>,
}

/// Assemble the package a validation response ships, per the app's request.
pub fn make_package(chain: &Chain, req: PackagingReq) -> Result<Package> {
    let mut pkg = Package::default();
    if req.contains(PackagingReq::CHAIN_HEADERS) {
        pkg.chain_headers = Some(chain.headers().to_vec());
    }
    if req.contains(PackagingReq::CHAIN_ENTRIES) {
        pkg.chain_entries = Some(chain.entries().to_vec());
    }
    Ok(pkg)
}

/// Build the validating side's view, failing if a required section is
/// missing from the supplied package data.
pub fn make_validation_package(
    req: PackagingReq,
    pkg: Option<&Package>,
) -> Result<ValidationPackage> {
    let mut vpkg = ValidationPackage::default();
    if req.contains(PackagingReq::CHAIN_HEADERS) {
        let headers = pkg
            .and_then(|p| p.chain_headers.clone())
            .ok_or_else(|| Error::Package("chain headers required but missing".to_string()))?;
        vpkg.chain_headers = Some(headers);
    }
    if req.contains(PackagingReq::CHAIN_ENTRIES) {
        let entries = pkg
            .and_then(|p| p.chain_entries.clone())
            .ok_or_else(|| Error::Package("chain entries required but missing".to_string()))?;
        vpkg.chain_entries = Some(entries);
    }
    Ok(vpkg)
}

/// Per-link verdict from the app, so one bad link does not drop the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkVerdict {
    Accept,
    Reject(String),
}

/// Application logic of one zome.
pub trait Ribosome: Send + Sync {
    /// App-level validation of an action. A rejection should be
    /// `Error::ValidationFailed` so callers can surface the entry content.
    fn validate_action(
        &self,
        action: &Action,
        def: &EntryDef,
        pkg: &ValidationPackage,
        sources: &[String],
    ) -> Result<()>;

    /// Per-link verdict inside an accepted links batch.
    fn validate_link(&self, _link: &Link, _def: &EntryDef, _sources: &[String]) -> LinkVerdict {
        LinkVerdict::Accept
    }

    /// What chain context this app wants shipped for validating `action`.
    fn validate_packaging_request(
        &self,
        _action: &Action,
        _def: &EntryDef,
    ) -> Result<PackagingReq> {
        Ok(PackagingReq::NONE)
    }

    /// Handle a node-to-node application message.
    fn receive(&self, from: &str, body: Value) -> Result<Value>;

    /// Invoke an exposed zome function.
    fn call(&self, function: &str, args: Value) -> Result<Value> {
        let _ = args;
        Err(Error::Ribosome(format!("no such function: {function}")))
    }
}
