//! Catalog record types shared by snapshots, replay, and the live store.
//!
//! Registries (tags, tag groups, rule presets) are small and global; the item
//! and collection indices are large and per-record. Fields the core does not
//! interpret are carried through `extra` untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named tag. Tags are keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Tag {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            group_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A saved scraping rule. The rule body belongs to the condition evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rule: Value,
}

/// Cross-reference from an item or collection to another record.
///
/// `(kind, target)` is the composite identity used for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrossRef {
    pub kind: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cross_refs: Vec<CrossRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogItem {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            tags: Vec::new(),
            cross_refs: Vec::new(),
            progress: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cross_refs: Vec<CrossRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Collection {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            tags: Vec::new(),
            cross_refs: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// An item discovered but not yet ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Full catalog contents, in the order records are stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogState {
    pub tags: Vec<Tag>,
    pub tag_groups: Vec<TagGroup>,
    pub rule_presets: Vec<RulePreset>,
    pub items: Vec<CatalogItem>,
    pub collections: Vec<Collection>,
    pub pending: Vec<PendingItem>,
}

/// Append `tags` to `list` unless already present. Returns whether it changed.
pub fn union_tags(list: &mut Vec<String>, tags: &[String]) -> bool {
    let mut changed = false;
    for tag in tags {
        if !list.contains(tag) {
            list.push(tag.clone());
            changed = true;
        }
    }
    changed
}

/// Remove every entry of `tags` from `list`. Returns whether it changed.
pub fn subtract_tags(list: &mut Vec<String>, tags: &[String]) -> bool {
    let before = list.len();
    list.retain(|t| !tags.contains(t));
    list.len() != before
}

/// Union of cross-references keyed by `(kind, target)`, preserving order.
pub fn union_cross_refs(list: &mut Vec<CrossRef>, refs: &[CrossRef]) -> bool {
    let mut changed = false;
    for r in refs {
        if !list.contains(r) {
            list.push(r.clone());
            changed = true;
        }
    }
    changed
}

/// Case-insensitive, whitespace-trimmed tag identity.
#[must_use]
pub fn tag_key(name: &str) -> String {
    name.trim().to_lowercase()
}
