//! In-memory working state that replayed mutations are applied to.
//!
//! Every record family is keyed by its identity in a `BTreeMap`, so the
//! reconstructed state comes out in a deterministic order regardless of the
//! order it was built in. Deleted items and collections move to archives and
//! come back on restore.

use std::collections::BTreeMap;

use crate::catalog::{
    CatalogItem, CatalogState, Collection, PendingItem, RulePreset, Tag, TagGroup, subtract_tags,
    union_tags,
};
use crate::event::Mutation;
use crate::event::payload::{ResolveData, TagData};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingState {
    pub tags: BTreeMap<String, Tag>,
    pub tag_groups: BTreeMap<String, TagGroup>,
    pub presets: BTreeMap<String, RulePreset>,
    pub items: BTreeMap<String, CatalogItem>,
    pub collections: BTreeMap<String, Collection>,
    /// Pending entries in insertion order; keys are unique.
    pub pending: Vec<PendingItem>,
    pub archived_items: BTreeMap<String, CatalogItem>,
    pub archived_collections: BTreeMap<String, Collection>,
}

impl WorkingState {
    /// Deep copy of `state` keyed for replay.
    #[must_use]
    pub fn from_state(state: CatalogState) -> Self {
        let mut pending: Vec<PendingItem> = Vec::with_capacity(state.pending.len());
        for entry in state.pending {
            upsert_pending(&mut pending, entry);
        }
        Self {
            tags: state.tags.into_iter().map(|t| (t.name.clone(), t)).collect(),
            tag_groups: state
                .tag_groups
                .into_iter()
                .map(|g| (g.id.clone(), g))
                .collect(),
            presets: state
                .rule_presets
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            items: state.items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            collections: state
                .collections
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            pending,
            archived_items: BTreeMap::new(),
            archived_collections: BTreeMap::new(),
        }
    }

    /// Live records in key order. Archives are not part of the catalog.
    #[must_use]
    pub fn to_state(&self) -> CatalogState {
        CatalogState {
            tags: self.tags.values().cloned().collect(),
            tag_groups: self.tag_groups.values().cloned().collect(),
            rule_presets: self.presets.values().cloned().collect(),
            items: self.items.values().cloned().collect(),
            collections: self.collections.values().cloned().collect(),
            pending: self.pending.clone(),
        }
    }

    /// Apply one mutation. Every mutation is idempotent except a rename
    /// whose target name is later reused.
    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::TagCreate(data) | Mutation::TagUpdate(data) => self.upsert_tag(data),
            Mutation::TagRename(rename) => self.rename_tag(&rename.from, &rename.to),
            Mutation::TagDelete(tag) => self.delete_tag(&tag.name),
            Mutation::TagGroupCreate(group) => {
                self.tag_groups.insert(group.id.clone(), group);
            }
            Mutation::TagGroupRename(rename) => {
                if let Some(group) = self.tag_groups.get_mut(&rename.id) {
                    group.name = rename.name;
                }
            }
            Mutation::TagGroupDelete(group) => {
                self.tag_groups.remove(&group.id);
                for tag in self.tags.values_mut() {
                    if tag.group_id.as_deref() == Some(group.id.as_str()) {
                        tag.group_id = None;
                    }
                }
            }
            Mutation::PresetUpsert(preset) => {
                self.presets.insert(preset.id.clone(), preset);
            }
            Mutation::PresetDelete(preset) => {
                self.presets.remove(&preset.id);
            }
            Mutation::ItemTagAdd(edit) => {
                let item = self
                    .items
                    .entry(edit.id.clone())
                    .or_insert_with(|| CatalogItem::new(edit.id));
                union_tags(&mut item.tags, &edit.tags);
            }
            Mutation::ItemTagRemove(edit) => {
                if let Some(item) = self.items.get_mut(&edit.id) {
                    subtract_tags(&mut item.tags, &edit.tags);
                }
            }
            Mutation::ItemDelete(item) => {
                if let Some(record) = self.items.remove(&item.id) {
                    self.archived_items.insert(item.id, record);
                }
            }
            Mutation::ItemRestore(item) => {
                if let Some(record) = self.archived_items.remove(&item.id) {
                    self.items.insert(item.id, record);
                }
            }
            Mutation::CollectionTagAdd(edit) => {
                let collection = self
                    .collections
                    .entry(edit.id.clone())
                    .or_insert_with(|| Collection::new(edit.id));
                union_tags(&mut collection.tags, &edit.tags);
            }
            Mutation::CollectionTagRemove(edit) => {
                if let Some(collection) = self.collections.get_mut(&edit.id) {
                    subtract_tags(&mut collection.tags, &edit.tags);
                }
            }
            Mutation::CollectionDelete(collection) => {
                if let Some(record) = self.collections.remove(&collection.id) {
                    self.archived_collections.insert(collection.id, record);
                }
            }
            Mutation::CollectionRestore(collection) => {
                if let Some(record) = self.archived_collections.remove(&collection.id) {
                    self.collections.insert(collection.id, record);
                }
            }
            Mutation::PendingUpsert(entry) => upsert_pending(&mut self.pending, entry),
            Mutation::PendingResolve(resolve) => resolve_pending(&mut self.pending, &resolve),
        }
    }

    fn upsert_tag(&mut self, data: TagData) {
        let tag = self
            .tags
            .entry(data.name.clone())
            .or_insert_with(|| Tag::named(data.name));
        if data.color.is_some() {
            tag.color = data.color;
        }
        if let Some(group_id) = data.group_id {
            tag.group_id = group_id;
        }
    }

    fn rename_tag(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(mut tag) = self.tags.remove(from) {
            tag.name = to.to_string();
            self.tags.insert(to.to_string(), tag);
        }

        let rename = |tags: &mut Vec<String>| {
            if let Some(pos) = tags.iter().position(|t| t == from) {
                if tags.iter().any(|t| t == to) {
                    tags.remove(pos);
                } else {
                    tags[pos] = to.to_string();
                }
            }
        };
        self.each_tag_list(rename);
    }

    fn delete_tag(&mut self, name: &str) {
        self.tags.remove(name);
        let doomed = [name.to_string()];
        self.each_tag_list(|tags| {
            subtract_tags(tags, &doomed);
        });
    }

    /// Run `f` over the tag list of every item and collection, archived
    /// ones included so a later restore sees the cascaded tags.
    fn each_tag_list(&mut self, mut f: impl FnMut(&mut Vec<String>)) {
        for item in self.items.values_mut().chain(self.archived_items.values_mut()) {
            f(&mut item.tags);
        }
        for collection in self
            .collections
            .values_mut()
            .chain(self.archived_collections.values_mut())
        {
            f(&mut collection.tags);
        }
    }
}

fn upsert_pending(pending: &mut Vec<PendingItem>, entry: PendingItem) {
    match pending.iter_mut().find(|p| p.key == entry.key) {
        Some(existing) => *existing = entry,
        None => pending.push(entry),
    }
}

/// Remove the first entry matching the handle, else the first matching the
/// name. With duplicate names the choice is arbitrary but stable.
fn resolve_pending(pending: &mut Vec<PendingItem>, resolve: &ResolveData) {
    let by_handle = resolve.handle.as_ref().and_then(|handle| {
        pending
            .iter()
            .position(|p| p.handle.as_ref() == Some(handle))
    });
    let position = by_handle.or_else(|| {
        resolve
            .name
            .as_ref()
            .and_then(|name| pending.iter().position(|p| p.name.as_ref() == Some(name)))
    });
    if let Some(pos) = position {
        pending.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::{Value, json};

    fn apply(state: &mut WorkingState, kind: EventKind, payload: Value) {
        let mutation = Mutation::parse(kind, &payload)
            .expect("valid payload")
            .expect("replayed kind");
        state.apply(mutation);
    }

    fn tagged_item(id: &str, tags: &[&str]) -> CatalogItem {
        let mut item = CatalogItem::new(id);
        item.tags = tags.iter().map(ToString::to_string).collect();
        item
    }

    #[test]
    fn rename_cascades_into_tag_lists_without_duplicates() {
        let mut state = WorkingState::from_state(CatalogState {
            tags: vec![Tag::named("rock"), Tag::named("music")],
            items: vec![tagged_item("v1", &["rock"]), tagged_item("v2", &["rock", "music"])],
            ..CatalogState::default()
        });
        apply(&mut state, EventKind::TagRename, json!({"from": "rock", "to": "music"}));

        assert_eq!(state.tags.len(), 1);
        assert_eq!(state.items["v1"].tags, ["music"]);
        assert_eq!(state.items["v2"].tags, ["music"]);
    }

    #[test]
    fn delete_tag_cascades_including_archives() {
        let mut state = WorkingState::from_state(CatalogState {
            tags: vec![Tag::named("a")],
            items: vec![tagged_item("v1", &["a", "b"])],
            ..CatalogState::default()
        });
        apply(&mut state, EventKind::ItemDelete, json!({"id": "v1"}));
        apply(&mut state, EventKind::TagDelete, json!({"name": "a"}));
        apply(&mut state, EventKind::ItemRestore, json!({"id": "v1"}));

        assert!(state.tags.is_empty());
        assert_eq!(state.items["v1"].tags, ["b"]);
    }

    #[test]
    fn group_delete_clears_membership() {
        let mut state = WorkingState::default();
        apply(&mut state, EventKind::TagGroupCreate, json!({"id": "g1", "name": "Genres"}));
        apply(&mut state, EventKind::TagCreate, json!({"name": "jazz", "groupId": "g1"}));
        apply(&mut state, EventKind::TagGroupRename, json!({"id": "g1", "name": "Styles"}));
        assert_eq!(state.tag_groups["g1"].name, "Styles");

        apply(&mut state, EventKind::TagGroupDelete, json!({"id": "g1"}));
        assert!(state.tag_groups.is_empty());
        assert_eq!(state.tags["jazz"].group_id, None);
    }

    #[test]
    fn tag_update_only_touches_present_fields() {
        let mut state = WorkingState::default();
        apply(
            &mut state,
            EventKind::TagCreate,
            json!({"name": "jazz", "color": "#fff", "groupId": "g1"}),
        );
        apply(&mut state, EventKind::TagUpdate, json!({"name": "jazz", "color": "#000"}));
        assert_eq!(state.tags["jazz"].color.as_deref(), Some("#000"));
        assert_eq!(state.tags["jazz"].group_id.as_deref(), Some("g1"));

        apply(&mut state, EventKind::TagUpdate, json!({"name": "jazz", "groupId": null}));
        assert_eq!(state.tags["jazz"].group_id, None);
    }

    #[test]
    fn restore_without_archive_is_a_noop() {
        let mut state = WorkingState::default();
        apply(&mut state, EventKind::CollectionRestore, json!({"id": "ch1"}));
        assert!(state.collections.is_empty());
    }

    #[test]
    fn pending_resolve_prefers_handle_then_name() {
        let mut state = WorkingState::default();
        apply(&mut state, EventKind::PendingUpsert, json!({"key": "k1", "handle": "@a", "name": "Same"}));
        apply(&mut state, EventKind::PendingUpsert, json!({"key": "k2", "handle": "@b", "name": "Same"}));
        apply(&mut state, EventKind::PendingUpsert, json!({"key": "k1", "handle": "@a", "name": "Renamed"}));
        assert_eq!(state.pending.len(), 2);

        apply(&mut state, EventKind::PendingResolve, json!({"handle": "@b", "name": "Renamed"}));
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.pending[0].key, "k1");

        apply(&mut state, EventKind::PendingResolve, json!({"name": "Renamed"}));
        assert!(state.pending.is_empty());
    }

    #[test]
    fn presets_upsert_by_id() {
        let mut state = WorkingState::default();
        apply(&mut state, EventKind::PresetCreate, json!({"id": "p1", "name": "A", "rule": {}}));
        apply(&mut state, EventKind::PresetUpdate, json!({"id": "p1", "name": "B", "rule": {}}));
        assert_eq!(state.presets.len(), 1);
        assert_eq!(state.presets["p1"].name, "B");
        apply(&mut state, EventKind::PresetDelete, json!({"id": "p1"}));
        assert!(state.presets.is_empty());
    }
}
