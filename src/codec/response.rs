//! The `Response` sum type and the data that rides along inside it.
//!
//! This mirrors the untagged/tagged split IMAP4rev1 actually has on the
//! wire rather than modeling it as one giant line type: a `Tagged`
//! completes exactly one outstanding command, everything else is
//! either server-pushed or addressed to whichever command is currently
//! active.

/// Tagged completion status (RFC 3501 §7.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// The bracketed response code that sometimes follows a status word,
/// e.g. `A1 OK [READ-WRITE] SELECT completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    Alert,
    Capability(Vec<String>),
    PermanentFlags(Vec<String>),
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
    ReadOnly,
    ReadWrite,
    TryCreate,
    AppendUid(u32, u32),
    CopyUid(u32, String, String),
    ClientBug(String),
    Other(String),
}

/// Data carried by a `* ...` mailbox-status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxData {
    Flags(Vec<String>),
    Exists(u32),
    Recent(u32),
    List {
        flags: Vec<String>,
        delimiter: Option<char>,
        name: String,
    },
    Lsub {
        flags: Vec<String>,
        delimiter: Option<char>,
        name: String,
    },
    Search(Vec<u32>),
    Status {
        mailbox: String,
        attributes: Vec<(String, u64)>,
    },
    Namespace(String),
}

/// Data carried by a `* <n> ...` message-status line that is not part
/// of a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Expunge(u32),
    /// `VANISHED [EARLIER] <uid-set>`, per QRESYNC. `earlier` marks the
    /// historical-resync form, which the IDLE/NOOP event layer logs and
    /// ignores rather than surfacing (see `events::from_response`).
    Vanished { uid_set: String, earlier: bool },
}

/// An untagged `OK`/`NO`/`BAD` status line not tied to a tagged reply,
/// e.g. the greeting or an async alert during IDLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalState {
    pub status: Status,
    pub code: Option<ResponseCode>,
    pub text: String,
}

/// One event in a streaming FETCH response. A single `* n FETCH (...)`
/// line decomposes into a `Start`, zero or more attribute/streaming
/// events, and a `Finish` — this lets large body sections be delivered
/// incrementally instead of buffered whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Start { seq: u32 },
    StartUid { uid: u32 },
    SimpleAttribute { name: String, value: String },
    StreamingBegin { section: String, size: u64 },
    StreamingBytes { bytes: Vec<u8> },
    StreamingEnd,
    Finish,
}

/// The untagged sum type, one variant per family named in the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    Mailbox(MailboxData),
    Message(MessageData),
    Conditional(ConditionalState),
    Capability(Vec<String>),
    Enable(Vec<String>),
    Id(Option<Vec<(String, String)>>),
    Quota {
        root: String,
        resources: Vec<(String, u64, u64)>,
    },
    Metadata {
        mailbox: String,
        entries: Vec<(String, Option<String>)>,
    },
}

/// A fully decoded server response. `#[non_exhaustive]` because IMAP
/// extensions routinely add new untagged data types this crate does
/// not yet model explicitly; unrecognized lines fall back to
/// `Untagged(Untagged::Conditional(..))` with a best-effort parse
/// rather than failing the whole stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Response {
    Tagged {
        tag: String,
        status: Status,
        code: Option<ResponseCode>,
        text: String,
    },
    Untagged(Untagged),
    Fetch(FetchEvent),
    IdleStarted,
    AuthenticationChallenge(Vec<u8>),
    /// An untagged `* BYE` or a transport failure severe enough that no
    /// further responses on this connection should be expected.
    Fatal(String),
}
