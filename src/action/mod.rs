//! Action taxonomy
//!
//! Every mutation/query verb is one variant of the `Action` enum, with a
//! uniform surface: a stable name, a declared argument list, an initiating
//! side (`do_action`) and a responding side (`receive`). The "committing"
//! and "validating" capabilities are resolved by pattern matching rather
//! than separate interfaces.

mod commit;
mod receive;

use std::sync::Arc;

use libp2p_identity::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dht::{GetMask, StatusMask};
use crate::entry::{DataFormat, DelEntry, Entry, EntryDef, Link};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::header::Header;
use crate::message::{AppMsg, GetResp, GetReq, LinkQuery, LinkQueryResp, Message, MsgBody};
use crate::node::Node;

pub use receive::run_validation_phase;

/// Argument types accepted by actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Hash,
    String,
    /// An entry payload; a string, or any value serialized to one.
    Entry,
    Int,
    Bool,
    Map,
    /// Anything, converted to a string (used by `debug`).
    AnyToString,
    /// Free-form arguments passed through to the app (used by `call`).
    VarArgs,
}

impl ArgType {
    fn name(&self) -> &'static str {
        match self {
            ArgType::Hash => "hash",
            ArgType::String => "string",
            ArgType::Entry => "entry",
            ArgType::Int => "int",
            ArgType::Bool => "bool",
            ArgType::Map => "map",
            ArgType::AnyToString => "any",
            ArgType::VarArgs => "args",
        }
    }
}

/// One declared argument of an action.
#[derive(Debug, Clone, Copy)]
pub struct Arg {
    pub name: &'static str,
    pub ty: ArgType,
    pub optional: bool,
}

const fn arg(name: &'static str, ty: ArgType) -> Arg {
    Arg {
        name,
        ty,
        optional: false,
    }
}

const fn opt_arg(name: &'static str, ty: ArgType) -> Arg {
    Arg {
        name,
        ty,
        optional: true,
    }
}

/// Passes iff `required ≤ provided ≤ total`.
pub fn check_arg_count(args: &[Arg], provided: usize) -> Result<()> {
    let required = args.iter().filter(|a| !a.optional).count();
    if provided < required || provided > args.len() {
        return Err(Error::WrongNumberOfArgs);
    }
    Ok(())
}

/// Validate provided values against the declared argument list. Fails with
/// an argument error naming the offending index and expected type.
pub fn coerce_args(args: &[Arg], values: &[Value]) -> Result<()> {
    check_arg_count(args, values.len())?;
    for (index, (a, v)) in args.iter().zip(values.iter()).enumerate() {
        let ok = match a.ty {
            ArgType::Hash => v.as_str().map(|s| s.parse::<Hash>().is_ok()).unwrap_or(false),
            ArgType::String => v.is_string(),
            ArgType::Entry => v.is_string() || v.is_object(),
            ArgType::Int => v.is_i64() || v.is_u64(),
            ArgType::Bool => v.is_boolean(),
            ArgType::Map => v.is_object(),
            ArgType::AnyToString | ArgType::VarArgs => true,
        };
        if !ok {
            return Err(Error::Argument {
                index,
                name: a.name.to_string(),
                expected: a.ty.name(),
            });
        }
    }
    Ok(())
}

/// Options of the `get` verb.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GetOptions {
    pub status_mask: StatusMask,
    pub get_mask: GetMask,
    /// Answer from the local chain instead of the DHT.
    pub local: bool,
}

/// Options of the `getLink` verb.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GetLinkOptions {
    /// Also fetch each returned link target's entry content.
    pub load: bool,
    pub status_mask: StatusMask,
}

/// Every mutation/query verb of the runtime.
#[derive(Debug, Clone)]
pub enum Action {
    /// Commit a new entry to the chain (and publish it if public).
    Commit { entry_type: String, entry: Entry },
    /// Commit a replacement for an earlier entry.
    Mod {
        entry_type: String,
        entry: Entry,
        replaces: Hash,
    },
    /// Commit a deletion record for an earlier entry.
    Del { entry_type: String, entry: DelEntry },
    /// Peer-side: store a published entry. Not callable.
    Put {
        entry_type: String,
        entry: Entry,
        header: Option<Header>,
    },
    /// Peer-side: apply a links entry to a base. Not callable.
    Link {
        entry_type: String,
        links: Vec<Link>,
        validation_base: Option<Hash>,
    },
    Get { req: GetReq, options: GetOptions },
    GetLink {
        query: LinkQuery,
        options: GetLinkOptions,
    },
    Send { to: PeerId, msg: AppMsg },
    Property { name: String },
    Debug { msg: String },
    MakeHash { entry: Entry },
    Call {
        zome: String,
        function: String,
        args: Value,
    },
}

/// What an initiated action resolved to.
#[derive(Debug, Clone)]
pub enum ActionResult {
    Hash(Hash),
    Get(GetResp),
    Links(LinkQueryResp),
    Value(Value),
    Unit,
}

impl ActionResult {
    pub fn into_value(self) -> Result<Value> {
        Ok(match self {
            ActionResult::Hash(h) => Value::String(h.to_string()),
            ActionResult::Get(resp) => serde_json::to_value(resp)?,
            ActionResult::Links(resp) => serde_json::to_value(resp)?,
            ActionResult::Value(v) => v,
            ActionResult::Unit => Value::Null,
        })
    }

    pub fn into_hash(self) -> Result<Hash> {
        match self {
            ActionResult::Hash(h) => Ok(h),
            other => Err(Error::UnexpectedResponse(format!(
                "expected hash result, got {other:?}"
            ))),
        }
    }
}

impl Action {
    /// Stable name used for logging and dispatch.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Commit { .. } => "commit",
            Action::Mod { .. } => "mod",
            Action::Del { .. } => "del",
            Action::Put { .. } => "put",
            Action::Link { .. } => "link",
            Action::Get { .. } => "get",
            Action::GetLink { .. } => "getLink",
            Action::Send { .. } => "send",
            Action::Property { .. } => "property",
            Action::Debug { .. } => "debug",
            Action::MakeHash { .. } => "makeHash",
            Action::Call { .. } => "call",
        }
    }

    /// Declared arguments of the verb, for callers that bind by position.
    pub fn args(&self) -> &'static [Arg] {
        args_for(self.name())
    }

    /// Entry type, for committing and validating variants.
    pub fn entry_type(&self) -> Option<&str> {
        match self {
            Action::Commit { entry_type, .. }
            | Action::Mod { entry_type, .. }
            | Action::Del { entry_type, .. }
            | Action::Put { entry_type, .. }
            | Action::Link { entry_type, .. } => Some(entry_type),
            _ => None,
        }
    }

    /// The carried entry, for committing variants. Deletion records encode
    /// their payload as the entry body.
    pub fn entry(&self) -> Option<Entry> {
        match self {
            Action::Commit { entry, .. }
            | Action::Mod { entry, .. }
            | Action::Put { entry, .. } => Some(entry.clone()),
            Action::Del { entry, .. } => entry.to_entry().ok(),
            _ => None,
        }
    }

    /// System-level validation. `resolve` maps a hash to the entry type of
    /// the record it commits (local chain first, then the DHT store).
    pub fn sys_validation(
        &self,
        def: &EntryDef,
        _sources: &[PeerId],
        resolve: &dyn Fn(&Hash) -> Result<String>,
    ) -> Result<()> {
        match self {
            Action::Commit { entry, .. } | Action::Put { entry, .. } => {
                crate::validate::sys_validate_entry(def, Some(entry))
            }
            Action::Mod {
                entry_type,
                entry,
                replaces,
            } => {
                if def.data_format == DataFormat::Links {
                    return Err(Error::ValidationFailed(
                        "can't mod a links entry".to_string(),
                    ));
                }
                let replaced_type = resolve(replaces)?;
                if replaced_type != *entry_type {
                    return Err(Error::EntryTypeMismatch);
                }
                crate::validate::sys_validate_entry(def, Some(entry))
            }
            Action::Del { entry_type, entry } => {
                if def.data_format == DataFormat::Links {
                    return Err(Error::ValidationFailed(
                        "can't del a links entry".to_string(),
                    ));
                }
                let replaced_type = resolve(&entry.hash)?;
                if replaced_type != *entry_type {
                    return Err(Error::EntryTypeMismatch);
                }
                Ok(())
            }
            // Link-level hash checks happen when the links entry itself is
            // sys-validated; get/getLink carry nothing to validate.
            _ => Ok(()),
        }
    }

    /// Whether this action may ask for a validation response against the
    /// given definition.
    pub fn check_validation_request(&self, def: &EntryDef) -> Result<()> {
        match self {
            Action::Link { .. } => {
                if def.data_format != DataFormat::Links {
                    return Err(Error::ValidationFailed(
                        "hash not of a linking entry".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Initiating side. Invoked by the application or the ambient host.
    pub async fn do_action(&self, node: &Arc<Node>) -> Result<ActionResult> {
        match self {
            Action::Commit { .. } => node.do_commit_action(self).await.map(ActionResult::Hash),
            Action::Mod { .. } => node.do_mod_action(self).await.map(ActionResult::Hash),
            Action::Del { .. } => node.do_del_action(self).await.map(ActionResult::Hash),
            Action::Put { .. } | Action::Link { .. } => Err(Error::NonCallableAction),
            Action::Get { req, options } => {
                node.do_get(req, options).await.map(ActionResult::Get)
            }
            Action::GetLink { query, options } => node
                .do_get_link(query, options)
                .await
                .map(ActionResult::Links),
            Action::Send { to, msg } => {
                node.do_send(*to, msg).await.map(ActionResult::Value)
            }
            Action::Property { name } => node
                .dna()
                .property(name)
                .map(|v| ActionResult::Value(Value::String(v.to_string()))),
            Action::Debug { msg } => {
                tracing::debug!(target: "edut::app", "{}", msg);
                Ok(ActionResult::Unit)
            }
            Action::MakeHash { entry } => entry
                .sum(&node.dna().hash_spec)
                .map(ActionResult::Hash),
            Action::Call {
                zome,
                function,
                args,
            } => {
                let zome = node.dna().get_zome(zome)?;
                zome.ribosome
                    .call(function, args.clone())
                    .map(ActionResult::Value)
            }
        }
    }

    /// Responding side. Invoked by the dispatcher for a matching wire kind.
    pub async fn receive(&self, node: &Node, msg: &Message) -> Result<MsgBody> {
        match self {
            Action::Put { .. } => receive::put_receive(node, msg).await,
            Action::Mod { .. } => receive::mod_receive(node, msg).await,
            Action::Del { .. } => receive::del_receive(node, msg).await,
            Action::Link { .. } => receive::link_receive(node, msg).await,
            Action::Get { .. } => receive::get_receive(node, msg),
            Action::GetLink { .. } => receive::get_link_receive(node, msg),
            Action::Send { .. } => receive::send_receive(node, msg),
            // commit/property/debug/makeHash/call never arrive over the wire
            _ => Err(Error::NonDhtAction),
        }
    }
}

static COMMIT_ARGS: [Arg; 2] = [arg("entryType", ArgType::String), arg("entry", ArgType::Entry)];
static MOD_ARGS: [Arg; 3] = [
    arg("entryType", ArgType::String),
    arg("entry", ArgType::Entry),
    arg("replaces", ArgType::Hash),
];
static DEL_ARGS: [Arg; 2] = [arg("hash", ArgType::Hash), arg("message", ArgType::String)];
static GET_ARGS: [Arg; 2] = [arg("hash", ArgType::Hash), opt_arg("options", ArgType::Map)];
static GET_LINK_ARGS: [Arg; 3] = [
    arg("base", ArgType::Hash),
    arg("tag", ArgType::String),
    opt_arg("options", ArgType::Map),
];
static SEND_ARGS: [Arg; 2] = [arg("to", ArgType::String), arg("msg", ArgType::Map)];
static PROPERTY_ARGS: [Arg; 1] = [arg("name", ArgType::String)];
static DEBUG_ARGS: [Arg; 1] = [arg("value", ArgType::AnyToString)];
static MAKE_HASH_ARGS: [Arg; 1] = [arg("entry", ArgType::Entry)];
static CALL_ARGS: [Arg; 3] = [
    arg("zome", ArgType::String),
    arg("function", ArgType::String),
    arg("args", ArgType::VarArgs),
];

/// Declared argument lists per verb name.
pub fn args_for(name: &str) -> &'static [Arg] {
    match name {
        "commit" => &COMMIT_ARGS,
        "mod" => &MOD_ARGS,
        "del" => &DEL_ARGS,
        "get" => &GET_ARGS,
        "getLink" => &GET_LINK_ARGS,
        "send" => &SEND_ARGS,
        "property" => &PROPERTY_ARGS,
        "debug" => &DEBUG_ARGS,
        "makeHash" => &MAKE_HASH_ARGS,
        "call" => &CALL_ARGS,
        _ => &[],
    }
}

/// Map a wire message to the action that handles it. Reply-only and
/// validate-protocol bodies are not part of the action protocol.
pub fn make_action_from_message(msg: &Message) -> Result<Action> {
    let action = match &msg.body {
        MsgBody::AppMsg(app) => Action::Send {
            to: msg.from,
            msg: app.clone(),
        },
        MsgBody::PutReq(_) => Action::Put {
            entry_type: String::new(),
            entry: Entry::new(""),
            header: None,
        },
        MsgBody::GetReq(req) => Action::Get {
            req: req.clone(),
            options: GetOptions {
                status_mask: req.status_mask,
                get_mask: req.get_mask,
                local: false,
            },
        },
        MsgBody::ModReq(req) => Action::Mod {
            entry_type: String::new(),
            entry: Entry::new(""),
            replaces: req.h,
        },
        MsgBody::DelReq(req) => Action::Del {
            entry_type: String::new(),
            entry: DelEntry {
                hash: req.h,
                message: String::new(),
            },
        },
        MsgBody::LinkReq(req) => Action::Link {
            entry_type: String::new(),
            links: Vec::new(),
            validation_base: Some(req.base),
        },
        MsgBody::LinkQuery(query) => Action::GetLink {
            query: query.clone(),
            options: GetLinkOptions::default(),
        },
        other => return Err(Error::NotInActionProtocol(other.kind().to_string())),
    };
    Ok(action)
}
