//! The closed catalog of event kinds.
//!
//! The string form uses the `<entity>.<verb>` dotted convention used in the
//! monthly logs and the local `events` table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every mutation kind the catalog can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Add a tag to the registry, or update it if the name exists.
    TagCreate,
    /// Change a tag's color or group.
    TagUpdate,
    /// Rename a tag and every reference to it.
    TagRename,
    /// Remove a tag and strip it from items and collections.
    TagDelete,
    /// Add a tag group.
    TagGroupCreate,
    /// Rename a tag group.
    TagGroupRename,
    /// Remove a tag group; its tags become ungrouped.
    TagGroupDelete,
    /// Add a rule preset.
    PresetCreate,
    /// Replace a rule preset's body.
    PresetUpdate,
    /// Remove a rule preset.
    PresetDelete,
    /// Tag an item, creating its record when absent.
    ItemTagAdd,
    /// Untag an item.
    ItemTagRemove,
    /// Archive an item record.
    ItemDelete,
    /// Bring an archived item back.
    ItemRestore,
    /// Tag a collection, creating its record when absent.
    CollectionTagAdd,
    /// Untag a collection.
    CollectionTagRemove,
    /// Archive a collection record.
    CollectionDelete,
    /// Bring an archived collection back.
    CollectionRestore,
    /// Queue an item that is not in the catalog yet.
    PendingUpsert,
    /// Drop a queued item by handle or name.
    PendingResolve,
    /// Ingestion of scraped items. Recorded for the audit trail only.
    ItemIngest,
    /// A snapshot or revert was applied to the live catalog. Audit only.
    SnapshotImport,
}

/// Error returned when parsing an unknown event kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind {
    pub raw: String,
}

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event kind '{}'", self.raw)
    }
}

impl std::error::Error for UnknownEventKind {}

impl EventKind {
    /// All known kinds in catalog order.
    pub const ALL: [Self; 22] = [
        Self::TagCreate,
        Self::TagUpdate,
        Self::TagRename,
        Self::TagDelete,
        Self::TagGroupCreate,
        Self::TagGroupRename,
        Self::TagGroupDelete,
        Self::PresetCreate,
        Self::PresetUpdate,
        Self::PresetDelete,
        Self::ItemTagAdd,
        Self::ItemTagRemove,
        Self::ItemDelete,
        Self::ItemRestore,
        Self::CollectionTagAdd,
        Self::CollectionTagRemove,
        Self::CollectionDelete,
        Self::CollectionRestore,
        Self::PendingUpsert,
        Self::PendingResolve,
        Self::ItemIngest,
        Self::SnapshotImport,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TagCreate => "tag.create",
            Self::TagUpdate => "tag.update",
            Self::TagRename => "tag.rename",
            Self::TagDelete => "tag.delete",
            Self::TagGroupCreate => "tag_group.create",
            Self::TagGroupRename => "tag_group.rename",
            Self::TagGroupDelete => "tag_group.delete",
            Self::PresetCreate => "preset.create",
            Self::PresetUpdate => "preset.update",
            Self::PresetDelete => "preset.delete",
            Self::ItemTagAdd => "item.tag_add",
            Self::ItemTagRemove => "item.tag_remove",
            Self::ItemDelete => "item.delete",
            Self::ItemRestore => "item.restore",
            Self::CollectionTagAdd => "collection.tag_add",
            Self::CollectionTagRemove => "collection.tag_remove",
            Self::CollectionDelete => "collection.delete",
            Self::CollectionRestore => "collection.restore",
            Self::PendingUpsert => "pending.upsert",
            Self::PendingResolve => "pending.resolve",
            Self::ItemIngest => "item.ingest",
            Self::SnapshotImport => "snapshot.import",
        }
    }

    /// Whether replay changes catalog state for this kind.
    #[must_use]
    pub const fn is_replayed(self) -> bool {
        !matches!(self, Self::ItemIngest | Self::SnapshotImport)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind { raw: s.to_string() })
    }
}

// Custom serde: serialize as the dotted string.
impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
