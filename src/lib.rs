//! edut: peer-to-peer application runtime
//!
//! Each agent owns an append-only signed hash chain, the local source of
//! truth for every action it takes. Public entries are published into a
//! shared DHT, where receiving peers pull the originator's header, entry,
//! and packaging materials back over a validation protocol and run
//! system-level plus application-level validation before persisting the
//! record with a status (live / rejected / modified / deleted).
//!
//! The application itself is data: a [`dna::Dna`] declares entry types,
//! data formats, sharing policy, and validation logic behind the
//! [`ribosome::Ribosome`] trait. The peer swarm, the bootstrap directory
//! server, persistence, and signing primitives are external collaborators
//! behind narrow seams ([`transport::Transport`], [`bootstrap`]).

pub mod action;
pub mod bootstrap;
pub mod chain;
pub mod config;
pub mod dht;
pub mod dna;
pub mod entry;
pub mod error;
pub mod hash;
pub mod header;
pub mod message;
pub mod node;
pub mod ribosome;
pub mod transport;
pub mod validate;

pub use action::{Action, GetLinkOptions, GetOptions};
pub use config::Config;
pub use dht::{GetMask, Status, StatusMask};
pub use dna::{Dna, Zome};
pub use entry::{DataFormat, DelEntry, Entry, EntryDef, Link, LinkAction, LinksEntry, Sharing};
pub use error::{Error, Result};
pub use hash::{Hash, HashSpec};
pub use node::Node;
pub use ribosome::{LinkVerdict, Ribosome, SchemaValidator};
pub use transport::{MemoryHub, MemoryTransport, Transport};
