#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! A resilient IMAP client core.
//!
//! Provides a TLS-backed connection engine, an incremental wire-level
//! codec, command-scoped response handlers, a persistent
//! untagged-response buffer, and a self-healing IDLE loop with
//! automatic reconnect. The crate covers IMAP4rev1 plus the common
//! extensions (IDLE, UIDPLUS, MOVE, UNSELECT, SPECIAL-USE, ID,
//! CONDSTORE/QRESYNC's VANISHED form, QUOTA, NAMESPACE, ENABLE,
//! SASL-IR). MIME parsing, SMTP, OAuth token storage, and a full IMAP
//! server are out of scope.

pub mod buffer;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod flag;
pub mod folder;
pub mod handlers;
pub mod ident;
pub mod idle_session;
pub mod pipeline;

pub use client::Server;
pub use codec::{Response, ResponseCode, Status};
pub use config::{CommandTimeouts, IdleConfig, ImapConfig, PipelineConfig};
pub use connection::{CallerToken, ConnectionPool, ConnectionState, IdleSession, NamedConnection};
pub use error::{Error, Result};
pub use events::ServerEvent;
pub use flag::{Flag, StoreMode};
pub use folder::Folder;
pub use handlers::{CapabilityResult, CopyOutcome, FetchKind, FetchRecord, ListEntry, QuotaResource, Selection};
pub use ident::{Id, IdSet, Namespace, SeqId, SeqNum, SeqSet, Uid, UidId, UidSet};
pub use idle_session::Session;
