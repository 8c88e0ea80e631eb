//! Typed payloads for each replayed event kind.
//!
//! Events store their payload as plain JSON; the discriminant is the event
//! kind, which lives beside the payload rather than inside it. Replay calls
//! [`Mutation::parse`] with the kind to get a typed view.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use super::kind::EventKind;
use crate::catalog::{PendingItem, RulePreset, TagGroup};

/// Payload for `tag.create` and `tag.update`.
///
/// On update, `groupId: null` clears the group while an absent `groupId`
/// leaves it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub group_id: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameData {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRenameData {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: String,
}

/// Payload for item/collection `tag_add` and `tag_remove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEditData {
    pub id: String,
    pub tags: Vec<String>,
}

/// Payload for `pending.resolve`: either field may identify the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A replayable catalog mutation decoded from an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    TagCreate(TagData),
    TagUpdate(TagData),
    TagRename(RenameData),
    TagDelete(NameRef),
    TagGroupCreate(TagGroup),
    TagGroupRename(GroupRenameData),
    TagGroupDelete(IdRef),
    PresetUpsert(RulePreset),
    PresetDelete(IdRef),
    ItemTagAdd(TagEditData),
    ItemTagRemove(TagEditData),
    ItemDelete(IdRef),
    ItemRestore(IdRef),
    CollectionTagAdd(TagEditData),
    CollectionTagRemove(TagEditData),
    CollectionDelete(IdRef),
    CollectionRestore(IdRef),
    PendingUpsert(PendingItem),
    PendingResolve(ResolveData),
}

/// The payload did not match the schema expected for its kind.
#[derive(Debug)]
pub struct PayloadError {
    pub kind: EventKind,
    pub source: serde_json::Error,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} payload: {}", self.kind, self.source)
    }
}

impl std::error::Error for PayloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl Mutation {
    /// Decode `payload` according to `kind`.
    ///
    /// Returns `Ok(None)` for audit-only kinds that replay ignores.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadError`] if the payload does not match the schema
    /// for `kind`.
    pub fn parse(kind: EventKind, payload: &Value) -> Result<Option<Self>, PayloadError> {
        fn decode<T: serde::de::DeserializeOwned>(
            kind: EventKind,
            payload: &Value,
        ) -> Result<T, PayloadError> {
            T::deserialize(payload).map_err(|source| PayloadError { kind, source })
        }

        let mutation = match kind {
            EventKind::TagCreate => Self::TagCreate(decode(kind, payload)?),
            EventKind::TagUpdate => Self::TagUpdate(decode(kind, payload)?),
            EventKind::TagRename => Self::TagRename(decode(kind, payload)?),
            EventKind::TagDelete => Self::TagDelete(decode(kind, payload)?),
            EventKind::TagGroupCreate => Self::TagGroupCreate(decode(kind, payload)?),
            EventKind::TagGroupRename => Self::TagGroupRename(decode(kind, payload)?),
            EventKind::TagGroupDelete => Self::TagGroupDelete(decode(kind, payload)?),
            EventKind::PresetCreate | EventKind::PresetUpdate => {
                Self::PresetUpsert(decode(kind, payload)?)
            }
            EventKind::PresetDelete => Self::PresetDelete(decode(kind, payload)?),
            EventKind::ItemTagAdd => Self::ItemTagAdd(decode(kind, payload)?),
            EventKind::ItemTagRemove => Self::ItemTagRemove(decode(kind, payload)?),
            EventKind::ItemDelete => Self::ItemDelete(decode(kind, payload)?),
            EventKind::ItemRestore => Self::ItemRestore(decode(kind, payload)?),
            EventKind::CollectionTagAdd => Self::CollectionTagAdd(decode(kind, payload)?),
            EventKind::CollectionTagRemove => Self::CollectionTagRemove(decode(kind, payload)?),
            EventKind::CollectionDelete => Self::CollectionDelete(decode(kind, payload)?),
            EventKind::CollectionRestore => Self::CollectionRestore(decode(kind, payload)?),
            EventKind::PendingUpsert => Self::PendingUpsert(decode(kind, payload)?),
            EventKind::PendingResolve => Self::PendingResolve(decode(kind, payload)?),
            EventKind::ItemIngest | EventKind::SnapshotImport => return Ok(None),
        };
        Ok(Some(mutation))
    }
}

// `Option<Option<T>>` where a present `null` becomes `Some(None)`.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_update_distinguishes_null_from_absent_group() {
        let cleared = Mutation::parse(
            EventKind::TagUpdate,
            &json!({"name": "music", "groupId": null}),
        )
        .expect("parse")
        .expect("replayed kind");
        let untouched = Mutation::parse(EventKind::TagUpdate, &json!({"name": "music"}))
            .expect("parse")
            .expect("replayed kind");

        match (cleared, untouched) {
            (Mutation::TagUpdate(a), Mutation::TagUpdate(b)) => {
                assert_eq!(a.group_id, Some(None));
                assert_eq!(b.group_id, None);
            }
            other => panic!("unexpected mutations {other:?}"),
        }
    }

    #[test]
    fn preset_create_and_update_share_upsert() {
        let payload = json!({"id": "p1", "name": "Shorts", "rule": {"all": []}});
        for kind in [EventKind::PresetCreate, EventKind::PresetUpdate] {
            let parsed = Mutation::parse(kind, &payload).expect("parse");
            assert!(matches!(parsed, Some(Mutation::PresetUpsert(ref p)) if p.id == "p1"));
        }
    }

    #[test]
    fn audit_kinds_decode_to_none() {
        let parsed = Mutation::parse(EventKind::ItemIngest, &json!({"anything": 1})).expect("parse");
        assert!(parsed.is_none());
    }

    #[test]
    fn schema_mismatch_names_the_kind() {
        let err = Mutation::parse(EventKind::TagRename, &json!({"from": "a"}))
            .expect_err("missing `to` must fail");
        assert_eq!(err.kind, EventKind::TagRename);
        assert!(err.to_string().contains("tag.rename"));
    }
}
