//! Writes an imported or reconstructed catalog into the live store.
//!
//! Registries (tags, tag groups, presets) are either replaced wholesale or
//! merged by identity. Items and collections are reconciled per field
//! according to [`ApplyFlags`]. The resulting changes are counted first and
//! then written as one local transaction per group, so a dry run and a real
//! run return the same summary shape.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{
    CatalogItem, CatalogState, Collection, CrossRef, PendingItem, RulePreset, Tag, TagGroup,
    tag_key, union_cross_refs, union_tags,
};
use crate::db::{CatalogCollection, LocalStore, StoreError};
use crate::error::HistoryError;

/// How registries are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Clear every registry and insert the incoming records.
    #[default]
    Overwrite,
    /// Match incoming records onto existing ones by identity.
    Merge,
}

/// How one item/collection field is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldApply {
    /// Keep the live value.
    Skip,
    /// Replace the live value with the incoming one.
    Overwrite,
    /// Union the incoming values into the live ones.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplyFlags {
    pub item_tags: FieldApply,
    pub collection_tags: FieldApply,
    pub cross_refs: FieldApply,
    pub progress: FieldApply,
}

impl Default for ApplyFlags {
    fn default() -> Self {
        Self {
            item_tags: FieldApply::Overwrite,
            collection_tags: FieldApply::Overwrite,
            cross_refs: FieldApply::Merge,
            progress: FieldApply::Merge,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub created: usize,
    pub updated: usize,
    pub cleared: usize,
}

impl Counts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.created + self.updated + self.cleared
    }
}

/// Write groups, each committed in its own transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreGroup {
    /// Tags, tag groups, and rule presets.
    Registries,
    /// Collection records and their tags.
    Collections,
    /// Item records and their per-field data.
    Items,
    /// Items queued for ingestion.
    Pending,
}

impl fmt::Display for RestoreGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registries => "registries",
            Self::Collections => "collections",
            Self::Items => "items",
            Self::Pending => "pending",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFailure {
    pub group: RestoreGroup,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub dry_run: bool,
    pub tags: Counts,
    pub tag_groups: Counts,
    pub presets: Counts,
    pub collections: Counts,
    pub items: Counts,
    pub pending: Counts,
    pub failures: Vec<GroupFailure>,
}

impl RestoreSummary {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    pub mode: RestoreMode,
    pub flags: ApplyFlags,
    pub dry_run: bool,
}

/// The catalog to restore plus the removals it implies.
#[derive(Debug, Clone, Default)]
pub struct RestoreInput {
    pub state: CatalogState,
    /// Live items to delete.
    pub remove_items: Vec<String>,
    /// Live collections to delete.
    pub remove_collections: Vec<String>,
    /// Replace the pending list instead of upserting into it.
    pub replace_pending: bool,
}

impl RestoreInput {
    #[must_use]
    pub fn snapshot(state: CatalogState, mode: RestoreMode) -> Self {
        Self {
            state,
            replace_pending: mode == RestoreMode::Overwrite,
            ..Self::default()
        }
    }
}

/// Restore `input` into the live catalog.
///
/// # Errors
///
/// Returns an error only if the live catalog cannot be read. Write failures
/// are reported per group in [`RestoreSummary::failures`].
pub fn restore(
    store: &LocalStore,
    input: &RestoreInput,
    options: &RestoreOptions,
) -> Result<RestoreSummary, HistoryError> {
    let live = store.read_catalog()?;
    let plan = plan(&live, input, options);
    let mut summary = plan.summary(options.dry_run);

    if options.dry_run {
        return Ok(summary);
    }

    let groups: [(RestoreGroup, Result<(), StoreError>); 4] = [
        (RestoreGroup::Registries, write_registries(store, &plan)),
        (RestoreGroup::Collections, write_records(store, CatalogCollection::Collections, &plan.collections)),
        (RestoreGroup::Items, write_records(store, CatalogCollection::Items, &plan.items)),
        (RestoreGroup::Pending, write_pending(store, &plan)),
    ];
    for (group, result) in groups {
        if let Err(err) = result {
            warn!(%group, error = %err, "restore group failed; other groups kept");
            summary.failures.push(GroupFailure {
                group,
                error: err.to_string(),
            });
        }
    }

    info!(
        tags = summary.tags.total(),
        items = summary.items.total(),
        collections = summary.collections.total(),
        failures = summary.failures.len(),
        "restored catalog"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Upserts and deletes for one keyed record family.
#[derive(Debug)]
struct RecordChanges<T> {
    put: Vec<(String, T)>,
    delete: Vec<String>,
    counts: Counts,
}

impl<T> Default for RecordChanges<T> {
    fn default() -> Self {
        Self {
            put: Vec::new(),
            delete: Vec::new(),
            counts: Counts::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Plan {
    tags: Vec<Tag>,
    tag_groups: Vec<TagGroup>,
    presets: Vec<RulePreset>,
    registry_counts: [Counts; 3],
    items: RecordChanges<CatalogItem>,
    collections: RecordChanges<Collection>,
    pending: Vec<PendingItem>,
    pending_counts: Counts,
}

impl Plan {
    fn summary(&self, dry_run: bool) -> RestoreSummary {
        let [tags, tag_groups, presets] = self.registry_counts;
        RestoreSummary {
            dry_run,
            tags,
            tag_groups,
            presets,
            collections: self.collections.counts,
            items: self.items.counts,
            pending: self.pending_counts,
            failures: Vec::new(),
        }
    }
}

fn plan(live: &CatalogState, input: &RestoreInput, options: &RestoreOptions) -> Plan {
    let incoming = &input.state;
    let registries = match options.mode {
        RestoreMode::Overwrite => overwrite_registries(live, incoming),
        RestoreMode::Merge => merge_registries(live, incoming),
    };

    let items = plan_records(
        &live.items,
        &incoming.items,
        &input.remove_items,
        |item| &item.id,
        |existing, incoming| {
            let mut next = existing.clone();
            apply_tags(&mut next.tags, &incoming.tags, options.flags.item_tags, &registries.remap);
            apply_cross_refs(&mut next.cross_refs, &incoming.cross_refs, options.flags.cross_refs);
            apply_progress(&mut next.progress, incoming.progress, options.flags.progress);
            next
        },
        |incoming| {
            let mut next = incoming.clone();
            next.tags = remap_tags(&incoming.tags, &registries.remap);
            next
        },
    );
    let collections = plan_records(
        &live.collections,
        &incoming.collections,
        &input.remove_collections,
        |collection| &collection.id,
        |existing, incoming| {
            let mut next = existing.clone();
            apply_tags(
                &mut next.tags,
                &incoming.tags,
                options.flags.collection_tags,
                &registries.remap,
            );
            apply_cross_refs(&mut next.cross_refs, &incoming.cross_refs, options.flags.cross_refs);
            next
        },
        |incoming| {
            let mut next = incoming.clone();
            next.tags = remap_tags(&incoming.tags, &registries.remap);
            next
        },
    );

    let (pending, pending_counts) = plan_pending(&live.pending, &incoming.pending, input.replace_pending);

    Plan {
        tags: registries.tags,
        tag_groups: registries.tag_groups,
        presets: registries.presets,
        registry_counts: registries.counts,
        items,
        collections,
        pending,
        pending_counts,
    }
}

struct Registries {
    tags: Vec<Tag>,
    tag_groups: Vec<TagGroup>,
    presets: Vec<RulePreset>,
    counts: [Counts; 3],
    /// Incoming tag name to canonical stored name.
    remap: HashMap<String, String>,
}

/// Counts for replacing `live` with `incoming`, keyed by `key`.
fn replacement_counts<T: PartialEq>(live: &[T], incoming: &[T], key: impl Fn(&T) -> &str) -> Counts {
    let live_by_key: HashMap<&str, &T> = live.iter().map(|r| (key(r), r)).collect();
    let incoming_keys: HashSet<&str> = incoming.iter().map(&key).collect();
    let mut counts = Counts::default();
    for record in incoming {
        match live_by_key.get(key(record)) {
            None => counts.created += 1,
            Some(existing) if *existing != record => counts.updated += 1,
            Some(_) => {}
        }
    }
    counts.cleared = live_by_key
        .keys()
        .filter(|k| !incoming_keys.contains(*k))
        .count();
    counts
}

fn overwrite_registries(live: &CatalogState, incoming: &CatalogState) -> Registries {
    Registries {
        counts: [
            replacement_counts(&live.tags, &incoming.tags, |t| &t.name),
            replacement_counts(&live.tag_groups, &incoming.tag_groups, |g| &g.id),
            replacement_counts(&live.rule_presets, &incoming.rule_presets, |p| &p.id),
        ],
        tags: incoming.tags.clone(),
        tag_groups: incoming.tag_groups.clone(),
        presets: incoming.rule_presets.clone(),
        remap: HashMap::new(),
    }
}

fn merge_registries(live: &CatalogState, incoming: &CatalogState) -> Registries {
    let (tag_groups, group_counts, group_ids) = merge_tag_groups(&live.tag_groups, &incoming.tag_groups);
    let (tags, tag_counts, remap) = merge_tags(&live.tags, &incoming.tags, &group_ids);

    let mut presets = live.rule_presets.clone();
    let mut preset_counts = Counts::default();
    for preset in &incoming.rule_presets {
        match presets.iter_mut().find(|p| p.id == preset.id) {
            Some(existing) if existing != preset => {
                *existing = preset.clone();
                preset_counts.updated += 1;
            }
            Some(_) => {}
            None => {
                presets.push(preset.clone());
                preset_counts.created += 1;
            }
        }
    }

    Registries {
        tags,
        tag_groups,
        presets,
        counts: [tag_counts, group_counts, preset_counts],
        remap,
    }
}

/// Tag groups match by exact name. Returns the merged list, counts, and the
/// incoming-to-stored id map.
fn merge_tag_groups(
    live: &[TagGroup],
    incoming: &[TagGroup],
) -> (Vec<TagGroup>, Counts, HashMap<String, String>) {
    let mut merged = live.to_vec();
    let mut counts = Counts::default();
    let mut ids = HashMap::new();

    for group in incoming {
        if let Some(existing) = merged.iter_mut().find(|g| g.name == group.name) {
            if group.color.is_some() && existing.color != group.color {
                existing.color.clone_from(&group.color);
                counts.updated += 1;
            }
            ids.insert(group.id.clone(), existing.id.clone());
            continue;
        }

        let mut id = group.id.clone();
        let mut suffix = 2;
        while merged.iter().any(|g| g.id == id) {
            id = format!("{}-{suffix}", group.id);
            suffix += 1;
        }
        ids.insert(group.id.clone(), id.clone());
        merged.push(TagGroup {
            id,
            name: group.name.clone(),
            color: group.color.clone(),
        });
        counts.created += 1;
    }
    (merged, counts, ids)
}

/// Tags match case-insensitively on their trimmed name. Returns the merged
/// list, counts, and the incoming-to-stored name remap.
fn merge_tags(
    live: &[Tag],
    incoming: &[Tag],
    group_ids: &HashMap<String, String>,
) -> (Vec<Tag>, Counts, HashMap<String, String>) {
    let mut merged = live.to_vec();
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, t)| (tag_key(&t.name), i))
        .collect();
    let mut counts = Counts::default();
    let mut remap = HashMap::new();

    for tag in incoming {
        let group_id = tag
            .group_id
            .as_ref()
            .map(|g| group_ids.get(g).cloned().unwrap_or_else(|| g.clone()));
        let key = tag_key(&tag.name);

        if let Some(&i) = index.get(&key) {
            let existing = &mut merged[i];
            let mut changed = false;
            if tag.color.is_some() && existing.color != tag.color {
                existing.color.clone_from(&tag.color);
                changed = true;
            }
            if group_id.is_some() && existing.group_id != group_id {
                existing.group_id.clone_from(&group_id);
                changed = true;
            }
            if changed {
                counts.updated += 1;
            }
            remap.insert(tag.name.clone(), existing.name.clone());
            continue;
        }

        index.insert(key, merged.len());
        merged.push(Tag {
            name: tag.name.clone(),
            color: tag.color.clone(),
            group_id,
        });
        counts.created += 1;
    }
    (merged, counts, remap)
}

fn plan_records<T: Clone + PartialEq>(
    live: &[T],
    incoming: &[T],
    remove: &[String],
    key: impl Fn(&T) -> &String,
    update: impl Fn(&T, &T) -> T,
    create: impl Fn(&T) -> T,
) -> RecordChanges<T> {
    let live_by_key: BTreeMap<&String, &T> = live.iter().map(|r| (key(r), r)).collect();
    let mut changes = RecordChanges::default();

    for record in incoming {
        let id = key(record);
        if remove.contains(id) {
            continue;
        }
        match live_by_key.get(id) {
            Some(existing) => {
                let next = update(existing, record);
                if next != **existing {
                    changes.put.push((id.clone(), next));
                    changes.counts.updated += 1;
                }
            }
            None => {
                changes.put.push((id.clone(), create(record)));
                changes.counts.created += 1;
            }
        }
    }

    for id in remove {
        if live_by_key.contains_key(id) {
            changes.delete.push(id.clone());
            changes.counts.cleared += 1;
        }
    }
    changes
}

fn plan_pending(live: &[PendingItem], incoming: &[PendingItem], replace: bool) -> (Vec<PendingItem>, Counts) {
    if replace {
        return (
            incoming.to_vec(),
            replacement_counts(live, incoming, |p| &p.key),
        );
    }

    let mut merged = live.to_vec();
    let mut counts = Counts::default();
    for entry in incoming {
        match merged.iter_mut().find(|p| p.key == entry.key) {
            Some(existing) if existing != entry => {
                *existing = entry.clone();
                counts.updated += 1;
            }
            Some(_) => {}
            None => {
                merged.push(entry.clone());
                counts.created += 1;
            }
        }
    }
    (merged, counts)
}

fn remap_tags(tags: &[String], remap: &HashMap<String, String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    let canonical = tags.iter().map(|t| remap.get(t).unwrap_or(t).clone()).collect::<Vec<_>>();
    union_tags(&mut out, &canonical);
    out
}

fn apply_tags(
    current: &mut Vec<String>,
    incoming: &[String],
    how: FieldApply,
    remap: &HashMap<String, String>,
) {
    let incoming = remap_tags(incoming, remap);
    match how {
        FieldApply::Skip => {}
        FieldApply::Overwrite => *current = incoming,
        FieldApply::Merge => {
            union_tags(current, &incoming);
        }
    }
}

fn apply_cross_refs(current: &mut Vec<CrossRef>, incoming: &[CrossRef], how: FieldApply) {
    match how {
        FieldApply::Skip => {}
        FieldApply::Overwrite => {
            current.clear();
            union_cross_refs(current, incoming);
        }
        FieldApply::Merge => {
            union_cross_refs(current, incoming);
        }
    }
}

fn apply_progress(current: &mut Option<f64>, incoming: Option<f64>, how: FieldApply) {
    let finite = incoming.filter(|p| p.is_finite());
    match how {
        FieldApply::Skip => {}
        FieldApply::Overwrite => *current = finite,
        FieldApply::Merge => {
            if finite.is_some() {
                *current = finite;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn write_registries(store: &LocalStore, plan: &Plan) -> Result<(), StoreError> {
    store.transaction(|tx| {
        tx.replace_all(CatalogCollection::TagGroups, &plan.tag_groups, |g| &g.id)?;
        tx.replace_all(CatalogCollection::Tags, &plan.tags, |t| &t.name)?;
        tx.replace_all(CatalogCollection::RulePresets, &plan.presets, |p| &p.id)
    })
}

fn write_records<T: Serialize>(
    store: &LocalStore,
    collection: CatalogCollection,
    changes: &RecordChanges<T>,
) -> Result<(), StoreError> {
    if changes.put.is_empty() && changes.delete.is_empty() {
        return Ok(());
    }
    store.transaction(|tx| {
        for (key, record) in &changes.put {
            tx.put(collection, key, record)?;
        }
        for key in &changes.delete {
            tx.delete(collection, key)?;
        }
        Ok(())
    })
}

fn write_pending(store: &LocalStore, plan: &Plan) -> Result<(), StoreError> {
    store.transaction(|tx| tx.replace_all(CatalogCollection::Pending, &plan.pending, |p| &p.key))
}
