//! In-process fake IMAP server for integration testing.
//!
//! Speaks direct TLS (no STARTTLS upgrade), matching the connection
//! engine under test, and understands enough of the command set to
//! exercise `Server` end-to-end: CAPABILITY, LOGIN, SELECT, CREATE,
//! NOOP, UID FETCH, UID STORE, UID SEARCH, UID COPY/MOVE, EXPUNGE,
//! APPEND, IDLE, and LOGOUT.
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and the command loop
//! - `mailbox` -- test data model (folders, messages, builder)
//! - `io` -- shared write helpers

mod io;
pub mod mailbox;
mod server;

pub use mailbox::MailboxBuilder;
pub use server::FakeImapServer;
