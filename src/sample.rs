//! Query result and notification records.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::path::Path;
use crate::timestamp::Timestamp;
use crate::value::Value;

/// The kind of change a write represents. The flag values are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new value was written.
    Put,
    /// An existing value was updated.
    Update,
    /// The value was removed.
    Remove,
}

impl ChangeKind {
    /// The numeric wire flag for this kind.
    #[must_use]
    pub const fn flag(self) -> u8 {
        match self {
            Self::Put => 0x00,
            Self::Update => 0x01,
            Self::Remove => 0x02,
        }
    }

    /// Resolves a wire flag to a change kind.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::UnknownKind` for flags outside the contract.
    pub const fn from_flag(flag: u8) -> Result<Self, CodecError> {
        match flag {
            0x00 => Ok(Self::Put),
            0x01 => Ok(Self::Update),
            0x02 => Ok(Self::Remove),
            _ => Err(CodecError::UnknownKind { flag }),
        }
    }
}

/// One entry of a [`Workspace::get`](crate::Workspace::get) result.
///
/// `Data` is ordered and compared **by timestamp alone**: two entries with
/// the same timestamp are treated as the same logical write, which is what
/// makes timestamp-based last-writer-wins dedup work across responders that
/// answer with overlapping data. The merge site logs a warning when two
/// equal-timestamp entries disagree on path or value, since that means the
/// deployment-wide timestamp-uniqueness assumption was violated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data {
    /// The resource this entry belongs to.
    pub path: Path,
    /// The decoded value.
    pub value: Value,
    /// When the value was written.
    pub timestamp: Timestamp,
}

impl Data {
    /// Creates a result entry.
    #[must_use]
    pub const fn new(path: Path, value: Value, timestamp: Timestamp) -> Self {
        Self {
            path,
            value,
            timestamp,
        }
    }

    /// True iff the two entries carry the same timestamp but differ in path
    /// or value — the collision the uniqueness assumption rules out.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && (self.path != other.path || self.value != other.value)
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for Data {}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {} @ {}", self.path, self.value, self.timestamp)
    }
}

/// One subscription notification.
///
/// `value` is `None` iff `kind` is [`ChangeKind::Remove`]; the constructors
/// enforce this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// The resource that changed.
    pub path: Path,
    /// What happened.
    pub kind: ChangeKind,
    /// When the change was written.
    pub timestamp: Timestamp,
    /// The new value, absent for removals.
    pub value: Option<Value>,
}

impl Change {
    /// A change announcing a new value.
    #[must_use]
    pub const fn put(path: Path, value: Value, timestamp: Timestamp) -> Self {
        Self {
            path,
            kind: ChangeKind::Put,
            timestamp,
            value: Some(value),
        }
    }

    /// A change announcing an updated value.
    #[must_use]
    pub const fn update(path: Path, value: Value, timestamp: Timestamp) -> Self {
        Self {
            path,
            kind: ChangeKind::Update,
            timestamp,
            value: Some(value),
        }
    }

    /// A change announcing a removal. Carries no value.
    #[must_use]
    pub const fn removal(path: Path, timestamp: Timestamp) -> Self {
        Self {
            path,
            kind: ChangeKind::Remove,
            timestamp,
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(time: u64) -> Timestamp {
        Timestamp::new(time, [0; 16])
    }

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn test_change_kind_flags() {
        assert_eq!(ChangeKind::Put.flag(), 0x00);
        assert_eq!(ChangeKind::Update.flag(), 0x01);
        assert_eq!(ChangeKind::Remove.flag(), 0x02);
        for kind in [ChangeKind::Put, ChangeKind::Update, ChangeKind::Remove] {
            assert_eq!(ChangeKind::from_flag(kind.flag()).unwrap(), kind);
        }
        assert!(matches!(
            ChangeKind::from_flag(0x7f),
            Err(CodecError::UnknownKind { flag: 0x7f })
        ));
    }

    #[test]
    fn test_data_ordered_by_timestamp_only() {
        let older = Data::new(path("/z"), Value::Int(1), ts(1));
        let newer = Data::new(path("/a"), Value::Int(2), ts(2));
        assert!(older < newer);
    }

    #[test]
    fn test_data_equal_timestamps_compare_equal() {
        // Equal timestamps mean "same logical write" regardless of content.
        let a = Data::new(path("/a"), Value::Int(1), ts(5));
        let b = Data::new(path("/b"), Value::Int(2), ts(5));
        assert_eq!(a, b);
        assert!(a.conflicts_with(&b));

        let same = Data::new(path("/a"), Value::Int(1), ts(5));
        assert!(!a.conflicts_with(&same));
    }

    #[test]
    fn test_change_constructors_enforce_value_presence() {
        let put = Change::put(path("/a"), Value::Int(1), ts(1));
        assert_eq!(put.kind, ChangeKind::Put);
        assert!(put.value.is_some());

        let removal = Change::removal(path("/a"), ts(2));
        assert_eq!(removal.kind, ChangeKind::Remove);
        assert!(removal.value.is_none());
    }
}
