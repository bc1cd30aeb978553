//! Wire protocol
//!
//! Two protocols ride the peer transport: the action protocol carries the
//! user-facing verbs, the validate protocol is the back-channel a validator
//! uses to pull header/entry/package from the originator. Messages are
//! serde values; the transport frames them (length-prefixed MessagePack in
//! the reference stack).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dht::{GetMask, StatusMask, TaggedHash};
use crate::entry::Entry;
use crate::error::Error;
use crate::hash::Hash;
use crate::header::Header;
use crate::ribosome::Package;

/// Which of the two protocols a request rides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Action,
    Validate,
}

/// Serialize a `PeerId` as its base58 text form.
pub(crate) mod peer_serde {
    use libp2p_identity::PeerId;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        peer: &PeerId,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&peer.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<PeerId, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A peer-delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "peer_serde")]
    pub from: libp2p_identity::PeerId,
    pub body: MsgBody,
}

/// Typed message bodies, one variant per wire kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MsgBody {
    AppMsg(AppMsg),
    PutReq(PutReq),
    GetReq(GetReq),
    ModReq(ModReq),
    DelReq(DelReq),
    LinkReq(LinkReq),
    LinkQuery(LinkQuery),
    ValidatePutReq(ValidateQuery),
    ValidateModReq(ValidateQuery),
    ValidateDelReq(ValidateQuery),
    ValidateLinkReq(ValidateQuery),
    // reply-only bodies
    ValidateResponse(ValidateResponse),
    GetResp(GetResp),
    LinkQueryResp(LinkQueryResp),
    Ack(String),
    Error(WireError),
}

impl MsgBody {
    /// Stable wire-kind name, used for logging and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            MsgBody::AppMsg(_) => "APP_MESSAGE",
            MsgBody::PutReq(_) => "PUT_REQUEST",
            MsgBody::GetReq(_) => "GET_REQUEST",
            MsgBody::ModReq(_) => "MOD_REQUEST",
            MsgBody::DelReq(_) => "DEL_REQUEST",
            MsgBody::LinkReq(_) => "LINK_REQUEST",
            MsgBody::LinkQuery(_) => "GETLINK_REQUEST",
            MsgBody::ValidatePutReq(_) => "VALIDATE_PUT_REQUEST",
            MsgBody::ValidateModReq(_) => "VALIDATE_MOD_REQUEST",
            MsgBody::ValidateDelReq(_) => "VALIDATE_DEL_REQUEST",
            MsgBody::ValidateLinkReq(_) => "VALIDATE_LINK_REQUEST",
            MsgBody::ValidateResponse(_) => "VALIDATE_RESPONSE",
            MsgBody::GetResp(_) => "GET_RESPONSE",
            MsgBody::LinkQueryResp(_) => "GETLINK_RESPONSE",
            MsgBody::Ack(_) => "ACK",
            MsgBody::Error(_) => "ERROR",
        }
    }
}

/// A node-to-node application message, addressed to a zome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMsg {
    pub zome_type: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutReq {
    pub h: Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetReq {
    pub h: Hash,
    #[serde(default)]
    pub status_mask: StatusMask,
    #[serde(default)]
    pub get_mask: GetMask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModReq {
    /// The replaced hash.
    pub h: Hash,
    /// The replacing hash.
    pub n: Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelReq {
    /// The deleted hash.
    pub h: Hash,
    /// Hash of the deletion record justifying the delete.
    pub by: Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkReq {
    pub base: Hash,
    /// Hash of the links entry.
    pub links: Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkQuery {
    pub base: Hash,
    pub tag: String,
    #[serde(default)]
    pub status_mask: StatusMask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateQuery {
    /// The hash the validator wants justified.
    pub h: Hash,
}

/// What the originator ships back to a validating peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub entry_type: String,
    pub entry: Entry,
    /// Absent only for the node-identity key fallback.
    pub header: Option<Header>,
    #[serde(default)]
    pub package: Package,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_hash: Option<Hash>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkQueryResp {
    pub links: Vec<TaggedHash>,
}

/// Error surface carried back to a requester. Only query verbs learn about
/// failures this way; publish verbs are acknowledged and failures are
/// recorded on the receive side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow: Option<Hash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    HashNotFound,
    HashModified,
    HashDeleted,
    HashRejected,
    Other,
}

impl WireError {
    pub fn from_error(err: &Error) -> WireError {
        let (kind, follow) = match err {
            Error::HashNotFound => (WireErrorKind::HashNotFound, None),
            Error::HashModified { follow } => (WireErrorKind::HashModified, Some(*follow)),
            Error::HashDeleted => (WireErrorKind::HashDeleted, None),
            Error::HashRejected => (WireErrorKind::HashRejected, None),
            _ => (WireErrorKind::Other, None),
        };
        WireError {
            kind,
            message: err.to_string(),
            follow,
        }
    }

    pub fn into_error(self) -> Error {
        match (self.kind, self.follow) {
            (WireErrorKind::HashNotFound, _) => Error::HashNotFound,
            (WireErrorKind::HashModified, Some(follow)) => Error::HashModified { follow },
            (WireErrorKind::HashModified, None) => {
                Error::UnexpectedResponse("hash modified without follow hash".to_string())
            }
            (WireErrorKind::HashDeleted, _) => Error::HashDeleted,
            (WireErrorKind::HashRejected, _) => Error::HashRejected,
            (WireErrorKind::Other, _) => Error::Transport(self.message),
        }
    }
}
