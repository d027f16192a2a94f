//! IMAP message flags
//!
//! Provides a strongly-typed enum for IMAP flags instead of raw
//! strings. Standard system flags have dedicated variants; arbitrary
//! keyword flags use the `Keyword` variant.

use std::fmt;

/// An IMAP message flag.
///
/// System flags (prefixed with `\` in the IMAP protocol) have
/// dedicated variants. User-defined keyword flags use [`Flag::Keyword`].
///
/// # Examples
///
/// ```
/// use imap_pulse::Flag;
///
/// let seen = Flag::Seen;
/// assert_eq!(seen.as_imap_str(), "\\Seen");
///
/// let kw = Flag::Keyword("$Important".to_string());
/// assert_eq!(kw.as_imap_str(), "$Important");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// A user-defined keyword flag (no `\` prefix).
    Keyword(String),
}

impl Flag {
    /// The IMAP wire representation of this flag.
    ///
    /// System flags include the leading backslash (e.g. `\Seen`).
    /// Keyword flags are returned as-is.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Keyword(kw) => kw,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

/// How a `STORE` command should change a message's flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMode {
    /// Replace the flag set entirely.
    Replace,
    /// Add the given flags to the existing set.
    Add,
    /// Remove the given flags from the existing set.
    Remove,
}

impl StoreMode {
    const fn item_name(self) -> &'static str {
        match self {
            Self::Replace => "FLAGS",
            Self::Add => "+FLAGS",
            Self::Remove => "-FLAGS",
        }
    }

    /// Build the `STORE` data-item clause for this mode and flag set,
    /// e.g. `+FLAGS.SILENT (\Seen \Flagged)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use imap_pulse::Flag;
    /// use imap_pulse::flag::StoreMode;
    ///
    /// let clause = StoreMode::Add.clause(&[Flag::Seen], true);
    /// assert_eq!(clause, "+FLAGS.SILENT (\\Seen)");
    /// ```
    #[must_use]
    pub fn clause(self, flags: &[Flag], silent: bool) -> String {
        let item = self.item_name();
        let silent = if silent { ".SILENT" } else { "" };
        let joined = flags.iter().map(Flag::as_imap_str).collect::<Vec<_>>().join(" ");
        format!("{item}{silent} ({joined})")
    }
}
