//! Test data model for the fake IMAP server.
//!
//! Provides a builder-style API for constructing mailbox state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .message(1, &["\\Seen"], b"hello")
//!         .message(2, &[], b"world")
//!     .folder("Trash")
//!     .build();
//! ```

/// A complete mailbox state: a collection of named folders, each
/// holding zero or more test messages.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }
}

/// A single IMAP folder (e.g. "INBOX", "Trash").
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub messages: Vec<TestMessage>,
    pub uidvalidity: u32,
    pub next_uid: u32,
}

impl Folder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            messages: Vec::new(),
            uidvalidity: 1,
            next_uid: 1,
        }
    }
}

/// A test message stored in a folder.
#[derive(Debug, Clone)]
pub struct TestMessage {
    pub uid: u32,
    pub flags: Vec<String>,
    pub body: Vec<u8>,
}

/// Builder for constructing a `Mailbox` step by step.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { folders: Vec::new() }
    }

    /// Add a new folder. Subsequent `.message()` calls add to this folder.
    #[must_use]
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder::new(name));
        self
    }

    /// Add a message to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    #[must_use]
    pub fn message(mut self, uid: u32, flags: &[&str], body: &[u8]) -> Self {
        let folder = self.folders.last_mut().expect("call .folder() before .message()");
        folder.messages.push(TestMessage {
            uid,
            flags: flags.iter().map(std::string::ToString::to_string).collect(),
            body: body.to_vec(),
        });
        folder.next_uid = folder.next_uid.max(uid + 1);
        self
    }

    #[must_use]
    pub fn build(self) -> Mailbox {
        Mailbox { folders: self.folders }
    }
}

impl Default for MailboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}
