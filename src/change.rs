//! Tagged change records and event-kind selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::DocumentSnapshot;
use crate::error::{OrderingViolation, ValidationError};

/// Kind of a per-document change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    /// All kinds, in canonical order.
    pub const ALL: [Self; 3] = [Self::Added, Self::Modified, Self::Removed];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Added => 0b001,
            Self::Modified => 0b010,
            Self::Removed => 0b100,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "removed" => Ok(Self::Removed),
            other => Err(ValidationError::UnknownEventKind {
                name: other.to_string(),
            }),
        }
    }
}

/// A set of requested change kinds.
///
/// The empty selection means "all kinds"; `EventKinds::from_kinds(&[])` and
/// `EventKinds::all()` are indistinguishable.
///
/// # Examples
///
/// ```
/// use livequery::{ChangeKind, EventKinds};
///
/// let none_requested = EventKinds::from_kinds(&[]);
/// assert_eq!(none_requested, EventKinds::all());
///
/// let adds = EventKinds::from_kinds(&[ChangeKind::Added]);
/// assert!(adds.contains(ChangeKind::Added));
/// assert!(!adds.contains(ChangeKind::Removed));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKinds(u8);

impl EventKinds {
    const FULL: u8 = 0b111;

    /// Every kind.
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::FULL)
    }

    /// Builds a selection; an empty slice selects every kind.
    #[must_use]
    pub fn from_kinds(kinds: &[ChangeKind]) -> Self {
        let bits = kinds.iter().fold(0u8, |acc, k| acc | k.bit());
        if bits == 0 {
            Self::all()
        } else {
            Self(bits)
        }
    }

    /// Parses kind names, rejecting anything outside {added, modified, removed}.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ValidationError> {
        let kinds = names
            .iter()
            .map(|n| n.as_ref().parse::<ChangeKind>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_kinds(&kinds))
    }

    #[must_use]
    pub const fn contains(self, kind: ChangeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Returns true if every kind is selected.
    #[must_use]
    pub const fn is_all(self) -> bool {
        self.0 == Self::FULL
    }

    /// Returns true if any record in `records` has a selected kind.
    #[must_use]
    pub fn intersects(self, records: &[ChangeRecord]) -> bool {
        records.iter().any(|r| self.contains(r.kind))
    }

    /// Iterates the selected kinds in canonical order.
    pub fn iter(self) -> impl Iterator<Item = ChangeKind> {
        ChangeKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl Default for EventKinds {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for EventKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Conversion into a validated `EventKinds` selection.
///
/// Facade operations accept anything implementing this so callers can pass
/// typed kinds or untyped names; names are validated before any listener is
/// attached.
pub trait IntoEventKinds {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError>;
}

impl IntoEventKinds for EventKinds {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        Ok(self)
    }
}

impl IntoEventKinds for &[ChangeKind] {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        Ok(EventKinds::from_kinds(self))
    }
}

impl<const N: usize> IntoEventKinds for [ChangeKind; N] {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        Ok(EventKinds::from_kinds(&self))
    }
}

impl IntoEventKinds for Vec<ChangeKind> {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        Ok(EventKinds::from_kinds(&self))
    }
}

impl IntoEventKinds for &[&str] {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        EventKinds::parse(self)
    }
}

impl<const N: usize> IntoEventKinds for [&str; N] {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        EventKinds::parse(&self)
    }
}

impl IntoEventKinds for &[String] {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        EventKinds::parse(self)
    }
}

impl<T: IntoEventKinds> IntoEventKinds for Option<T> {
    fn into_event_kinds(self) -> Result<EventKinds, ValidationError> {
        self.map_or(Ok(EventKinds::all()), IntoEventKinds::into_event_kinds)
    }
}

/// One decoded change.
///
/// Indices are positions in the query-ordered result set before (`old_index`)
/// and after (`new_index`) the change, relative to applying every earlier record
/// of the same batch first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub document: DocumentSnapshot,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
}

impl ChangeRecord {
    #[must_use]
    pub fn added(document: DocumentSnapshot, new_index: usize) -> Self {
        Self {
            kind: ChangeKind::Added,
            document,
            old_index: None,
            new_index: Some(new_index),
        }
    }

    #[must_use]
    pub fn modified(document: DocumentSnapshot, old_index: usize, new_index: usize) -> Self {
        Self {
            kind: ChangeKind::Modified,
            document,
            old_index: Some(old_index),
            new_index: Some(new_index),
        }
    }

    #[must_use]
    pub fn removed(document: DocumentSnapshot, old_index: usize) -> Self {
        Self {
            kind: ChangeKind::Removed,
            document,
            old_index: Some(old_index),
            new_index: None,
        }
    }

    /// Old index, or an ordering violation if the kind requires one.
    pub(crate) fn require_old(&self) -> Result<usize, OrderingViolation> {
        self.old_index.ok_or_else(|| OrderingViolation::MissingIndex {
            kind: self.kind,
            id: self.document.id.clone(),
            which: "old",
        })
    }

    /// New index, or an ordering violation if the kind requires one.
    pub(crate) fn require_new(&self) -> Result<usize, OrderingViolation> {
        self.new_index.ok_or_else(|| OrderingViolation::MissingIndex {
            kind: self.kind,
            id: self.document.id.clone(),
            which: "new",
        })
    }

    /// Returns true if the index pair is consistent with the kind.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        match self.kind {
            ChangeKind::Added => self.old_index.is_none() && self.new_index.is_some(),
            ChangeKind::Removed => self.old_index.is_some() && self.new_index.is_none(),
            ChangeKind::Modified => self.old_index.is_some() && self.new_index.is_some(),
        }
    }
}
