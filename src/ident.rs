//! Message identifiers: UIDs and sequence numbers.
//!
//! IMAP has two disjoint 32-bit identifier namespaces: UIDs (stable
//! across a session, only ever invalidated by a UIDVALIDITY change)
//! and sequence numbers (1-based position in the mailbox, shifting on
//! every EXPUNGE). Mixing the two produces wrong results silently, so
//! we keep them apart with the type system rather than a runtime tag.

use std::fmt;

/// Marker for the namespace an [`IdSet`] or identifier belongs to.
pub trait Namespace: Copy + Clone + fmt::Debug + private::Sealed {
    /// The token IMAP uses when a command needs to say which
    /// namespace a sequence-set argument refers to (`UID ...` prefix).
    const WIRE_PREFIX: &'static str;
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Uid {}
    impl Sealed for super::SeqNum {}
}

/// The UID namespace: stable identifiers, invalidated only by UIDVALIDITY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uid;
impl Namespace for Uid {
    const WIRE_PREFIX: &'static str = "UID ";
}

/// The sequence-number namespace: 1-based, shifts on EXPUNGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqNum;
impl Namespace for SeqNum {
    const WIRE_PREFIX: &'static str = "";
}

/// A message identifier in a particular namespace, represented
/// exactly as IMAP does: a 32-bit unsigned number, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id<N> {
    value: u32,
    _ns: std::marker::PhantomData<N>,
}

impl<N: Namespace> Id<N> {
    /// Construct an identifier. Returns `None` for zero, which IMAP
    /// never uses as a UID or sequence number.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self {
                value,
                _ns: std::marker::PhantomData,
            })
        }
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.value
    }
}

impl<N> fmt::Display for Id<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

pub type UidId = Id<Uid>;
pub type SeqId = Id<SeqNum>;

/// A contiguous inclusive range of identifiers, e.g. `12:40`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    start: u32,
    end: u32,
}

impl Range {
    const fn overlaps_or_touches(self, other: Self) -> bool {
        self.start <= other.end.saturating_add(1) && other.start <= self.end.saturating_add(1)
    }

    const fn merge(self, other: Self) -> Self {
        Self {
            start: if self.start < other.start {
                self.start
            } else {
                other.start
            },
            end: if self.end > other.end {
                self.end
            } else {
                other.end
            },
        }
    }

    const fn contains(self, value: u32) -> bool {
        value >= self.start && value <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// A set of message identifiers, stored as a union of inclusive
/// ranges and always kept normalized (sorted, merged, no overlaps).
///
/// Serializes to the wire form IMAP expects for sequence-set
/// arguments: comma-joined ranges, e.g. `1:3,7,9:12`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdSet<N> {
    ranges: Vec<Range>,
    _ns: std::marker::PhantomData<N>,
}

impl<N: Namespace> IdSet<N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ranges: Vec::new(),
            _ns: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Add a single identifier to the set.
    pub fn insert(&mut self, id: Id<N>) {
        self.insert_range(id.get(), id.get());
    }

    /// Add an inclusive range `[start, end]` to the set.
    ///
    /// # Panics
    ///
    /// Panics if `start` or `end` is zero, or `start > end`.
    pub fn insert_range(&mut self, start: u32, end: u32) {
        assert!(start != 0 && end != 0, "identifier ranges are 1-based");
        assert!(start <= end, "range start must not exceed its end");
        let incoming = Range { start, end };
        self.ranges.push(incoming);
        self.normalize();
    }

    fn normalize(&mut self) {
        self.ranges.sort_by_key(|r| r.start);
        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if last.overlaps_or_touches(r) => *last = last.merge(r),
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    #[must_use]
    pub fn contains(&self, id: Id<N>) -> bool {
        self.ranges.iter().any(|r| r.contains(id.get()))
    }

    /// Total count of identifiers represented (not the number of ranges).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| u64::from(r.end) - u64::from(r.start) + 1)
            .sum()
    }

    /// Iterate every identifier in the set in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Id<N>> + '_ {
        self.ranges.iter().flat_map(|r| {
            (r.start..=r.end).filter_map(|v| Id::new(v))
        })
    }

    /// Serialize to the wire grammar: comma-joined ranges.
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.ranges
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a wire-form sequence set (`1:3,7,9:12` or `*` meaning
    /// "the largest identifier currently in the mailbox", which we
    /// preserve structurally as an unbounded range ending at
    /// `u32::MAX` since this type does not know the mailbox size).
    ///
    /// # Errors
    ///
    /// Returns `None` if any component of the set is not a valid
    /// number or range.
    #[must_use]
    pub fn parse(wire: &str) -> Option<Self> {
        let mut set = Self::new();
        for part in wire.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            if let Some((lo, hi)) = part.split_once(':') {
                let start = parse_component(lo)?;
                let end = parse_component(hi)?;
                let (start, end) = if start <= end {
                    (start, end)
                } else {
                    (end, start)
                };
                set.insert_range(start, end);
            } else {
                let v = parse_component(part)?;
                set.insert_range(v, v);
            }
        }
        Some(set)
    }
}

fn parse_component(s: &str) -> Option<u32> {
    if s == "*" {
        Some(u32::MAX)
    } else {
        s.parse().ok()
    }
}

impl<N: Namespace> FromIterator<Id<N>> for IdSet<N> {
    fn from_iter<T: IntoIterator<Item = Id<N>>>(iter: T) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

pub type UidSet = IdSet<Uid>;
pub type SeqSet = IdSet<SeqNum>;
