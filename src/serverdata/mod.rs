//! Server definition manager.
//!
//! Loads the directory tree of XML-defined server entities (zones, zone
//! partials, events, instances, shops, drop sets, and the rest) plus their
//! companion scripts into immutable in-memory graphs, cross-referencing
//! everything against the static catalog before gameplay ever sees it.
//! Validation errors are accumulated and reported together; any one of them
//! fails the load.

pub mod action;
pub mod drops;
pub mod event;
pub mod script;
pub mod zone;

pub use action::{Action, ActionKind, SourceContext, ZoneInstanceMode};
pub use drops::{
    AiLogicGroup, DemonFamiliarityType, DemonPresent, DemonQuestReward, DropSet, DropSetFile,
    DropSetKind, EnchantSet, EnchantSpecial, FusionMistake, SItemRow, SStatusRow, ServerShop,
    ServerZoneInstance, ServerZoneInstanceVariant, ShopProduct, Tokusei, TokuseiAspect,
};
pub use event::{Event, EventBranch, EventChoice, EventCondition, EventFile, EventKind};
pub use script::ServerScript;
pub use zone::{
    apply_zone_partial, prune_spawn_structures, ItemDrop, PlasmaSpawn, ServerNpc, ServerObject,
    ServerZone, ServerZonePartial, Spawn, SpawnGroup, SpawnLocation, SpawnLocationGroup, Spot,
    Trigger, TriggerKind,
};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::catalog::DefinitionCatalog;
use crate::datastore::DataStore;
use crate::error::{Error, Result};

/// serde helper: a comma-separated ID list attribute.
pub(crate) fn zone_id_list<'de, D>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    action::parse_id_list(&s).map_err(serde::de::Error::custom)
}

#[derive(Default)]
pub struct ServerDataManager {
    zone_data: HashMap<u32, BTreeMap<u32, Arc<ServerZone>>>,
    zone_partials: HashMap<u32, Arc<ServerZonePartial>>,
    /// Dynamic map ID → auto-applied partial IDs.
    zone_partial_auto_map: HashMap<u32, BTreeSet<u32>>,
    events: HashMap<String, Arc<Event>>,
    zone_instances: HashMap<u32, Arc<ServerZoneInstance>>,
    instance_variants: HashMap<u32, Arc<ServerZoneInstanceVariant>>,
    shops: HashMap<u32, Arc<ServerShop>>,
    ai_logic_groups: HashMap<u32, Arc<AiLogicGroup>>,
    demon_familiarity: HashMap<u32, Arc<DemonFamiliarityType>>,
    demon_presents: HashMap<u32, Arc<DemonPresent>>,
    demon_quest_rewards: HashMap<u32, Arc<DemonQuestReward>>,
    drop_sets: HashMap<u32, DropSet>,
    /// Gift box ID → drop set serving it.
    gift_drop_sets: HashMap<u32, u32>,
    pending_append_drops: Vec<DropSet>,
    pending_redefine_drops: Vec<DropSet>,
    enchant_sets: HashMap<u32, Arc<EnchantSet>>,
    enchant_specials: HashMap<u32, Arc<EnchantSpecial>>,
    fusion_mistakes: HashMap<u32, Arc<FusionMistake>>,
    s_items: HashMap<u32, Arc<SItemRow>>,
    s_statuses: HashMap<u32, Arc<SStatusRow>>,
    tokusei: HashMap<u32, Arc<Tokusei>>,
    scripts: HashMap<String, Arc<ServerScript>>,
    ai_scripts: HashMap<String, Arc<ServerScript>>,
}

impl ServerDataManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every artifact from the data store, then cross-reference. Any
    /// validation error fails the load.
    pub fn load_data(
        &mut self,
        store: &DataStore,
        catalog: Option<&DefinitionCatalog>,
    ) -> Result<()> {
        let mut errors = Vec::new();

        if catalog.is_some() {
            tracing::debug!("[serverdata] loading AI logic group definitions");
            for group in load_xml_dir::<AiLogicGroup>(store, "/data/ailogicgroup")? {
                self.ai_logic_groups.insert(group.id, Arc::new(group));
            }

            tracing::debug!("[serverdata] loading demon familiarity type definitions");
            for row in load_xml_dir::<DemonFamiliarityType>(store, "/data/demonfamiliaritytype")? {
                self.demon_familiarity.insert(row.id, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading demon present definitions");
            for row in load_xml_dir::<DemonPresent>(store, "/data/demonpresent")? {
                self.demon_presents.insert(row.demon_type, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading demon quest reward definitions");
            for row in load_xml_dir::<DemonQuestReward>(store, "/data/demonquestreward")? {
                self.demon_quest_rewards.insert(row.id, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading drop set definitions");
            for file in load_xml_dir::<DropSetFile>(store, "/data/dropset")? {
                for set in file.drop_sets {
                    self.register_drop_set(set, &mut errors);
                }
            }
            self.apply_pending_drops(&mut errors);

            tracing::debug!("[serverdata] loading enchant set definitions");
            for row in load_xml_dir::<EnchantSet>(store, "/data/enchantset")? {
                self.enchant_sets.insert(row.id, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading enchant special definitions");
            for row in load_xml_dir::<EnchantSpecial>(store, "/data/enchantspecial")? {
                self.enchant_specials.insert(row.id, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading fusion mistake definitions");
            for row in load_xml_dir::<FusionMistake>(store, "/data/fusionmistake")? {
                self.fusion_mistakes.insert(row.id, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading s-item definitions");
            for row in load_xml_dir::<SItemRow>(store, "/data/sitemextended")? {
                self.s_items.insert(row.item_id, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading s-status definitions");
            for row in load_xml_dir::<SStatusRow>(store, "/data/sstatus")? {
                self.s_statuses.insert(row.status_id, Arc::new(row));
            }

            tracing::debug!("[serverdata] loading tokusei definitions");
            for row in load_xml_dir::<Tokusei>(store, "/data/tokusei")? {
                self.tokusei.insert(row.id, Arc::new(row));
            }
        }

        tracing::debug!("[serverdata] loading zone definitions");
        for zone in load_xml_dir::<ServerZone>(store, "/zones")? {
            if let Some(catalog) = catalog {
                if catalog.zone_geometry_data(zone.id).is_none() {
                    errors.push(format!("zone {} has no client geometry", zone.id));
                    continue;
                }
            }

            let by_map = self.zone_data.entry(zone.id).or_default();
            if by_map.contains_key(&zone.dynamic_map_id) {
                errors.push(format!(
                    "duplicate zone definition: {} ({})",
                    zone.id, zone.dynamic_map_id
                ));
            } else {
                by_map.insert(zone.dynamic_map_id, Arc::new(zone));
            }
        }

        tracing::debug!("[serverdata] loading zone partial definitions");
        for partial in load_xml_dir::<ServerZonePartial>(store, "/zones/partial")? {
            if self.zone_partials.contains_key(&partial.id) {
                errors.push(format!("duplicate zone partial: {}", partial.id));
                continue;
            }

            if partial.auto_apply {
                for dmid in &partial.dynamic_map_ids {
                    self.zone_partial_auto_map
                        .entry(*dmid)
                        .or_default()
                        .insert(partial.id);
                }
            }
            self.zone_partials.insert(partial.id, Arc::new(partial));
        }

        tracing::debug!("[serverdata] loading event definitions");
        for file in load_xml_dir::<EventFile>(store, "/events")? {
            for event in file.events {
                if self.events.contains_key(&event.id) {
                    errors.push(format!("duplicate event: {}", event.id));
                } else {
                    self.events.insert(event.id.clone(), Arc::new(event));
                }
            }
        }

        tracing::debug!("[serverdata] loading zone instance definitions");
        for instance in load_xml_dir::<ServerZoneInstance>(store, "/data/zoneinstance")? {
            self.zone_instances.insert(instance.id, Arc::new(instance));
        }

        tracing::debug!("[serverdata] loading zone instance variant definitions");
        for variant in load_xml_dir::<ServerZoneInstanceVariant>(store, "/data/zoneinstancevariant")?
        {
            self.instance_variants.insert(variant.id, Arc::new(variant));
        }

        tracing::debug!("[serverdata] loading shop definitions");
        for shop in load_xml_dir::<ServerShop>(store, "/shops")? {
            self.shops.insert(shop.shop_id, Arc::new(shop));
        }

        tracing::debug!("[serverdata] loading server scripts");
        self.load_scripts(store, "/scripts", &mut errors)?;

        self.verify_data_integrity(catalog, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            for error in &errors {
                tracing::error!("[serverdata] {error}");
            }
            Err(Error::Validation(format!(
                "{} server data error(s)",
                errors.len()
            )))
        }
    }

    fn register_drop_set(&mut self, set: DropSet, errors: &mut Vec<String>) {
        match set.kind {
            DropSetKind::Normal => {
                if self.drop_sets.contains_key(&set.id) {
                    errors.push(format!("duplicate drop set: {}", set.id));
                    return;
                }

                for giftbox_id in &set.giftbox_ids {
                    // A NORMAL set may not steal a gift box another set
                    // already serves; APPEND/REDEFINE may.
                    if let Some(existing) = self.gift_drop_sets.get(giftbox_id) {
                        errors.push(format!(
                            "gift box {giftbox_id} already served by drop set {existing}"
                        ));
                        return;
                    }
                }

                for giftbox_id in &set.giftbox_ids {
                    self.gift_drop_sets.insert(*giftbox_id, set.id);
                }
                self.drop_sets.insert(set.id, set);
            }
            DropSetKind::Append => self.pending_append_drops.push(set),
            DropSetKind::Redefine => self.pending_redefine_drops.push(set),
        }
    }

    /// Resolve queued APPEND/REDEFINE sets against the loaded table.
    /// Redefines run first, then appends, matching file-independent
    /// ordering.
    fn apply_pending_drops(&mut self, _errors: &mut [String]) {
        for set in std::mem::take(&mut self.pending_redefine_drops) {
            match self.drop_sets.get_mut(&set.id) {
                Some(existing) => {
                    tracing::debug!("[serverdata] redefining drops on drop set {}", set.id);
                    existing.drops = set.drops;
                    for giftbox_id in set.giftbox_ids {
                        self.gift_drop_sets.insert(giftbox_id, set.id);
                    }
                }
                None => {
                    tracing::warn!(
                        "[serverdata] skipping redefined drop set for unloaded ID {}",
                        set.id
                    );
                }
            }
        }

        for set in std::mem::take(&mut self.pending_append_drops) {
            match self.drop_sets.get_mut(&set.id) {
                Some(existing) => {
                    tracing::debug!(
                        "[serverdata] appending {} drop(s) to drop set {}",
                        set.drops.len(),
                        set.id
                    );
                    existing.drops.extend(set.drops);
                    for giftbox_id in set.giftbox_ids {
                        self.gift_drop_sets.insert(giftbox_id, set.id);
                    }
                }
                None => {
                    tracing::warn!(
                        "[serverdata] failed to append drops to unknown drop set {}",
                        set.id
                    );
                }
            }
        }
    }

    fn load_scripts(
        &mut self,
        store: &DataStore,
        path: &str,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let listing = match store.get_listing(path, true, true) {
            Ok(listing) => listing,
            Err(_) => {
                tracing::warn!("[serverdata] no script directory at {path}");
                return Ok(());
            }
        };

        let mut files = listing.files;
        files.sort();

        for file in files {
            if !file.ends_with(".lua") {
                continue;
            }

            let source = store.read_file(&file)?;
            let source = String::from_utf8(source)
                .map_err(|_| Error::Validation(format!("script is not valid UTF-8: {file}")))?;

            match script::parse_script(&file, &source) {
                Ok(parsed) => {
                    let bucket = if parsed.script_type.eq_ignore_ascii_case("ai") {
                        &mut self.ai_scripts
                    } else {
                        &mut self.scripts
                    };

                    if bucket.contains_key(&parsed.name) {
                        errors.push(format!("duplicate script encountered: {}", parsed.name));
                    } else {
                        bucket.insert(parsed.name.clone(), Arc::new(parsed));
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        Ok(())
    }

    /// Fetch a zone, optionally folding in its auto-apply partials plus the
    /// requested extras. The same inputs always produce a structurally
    /// equal result.
    pub fn get_zone_data(
        &self,
        id: u32,
        dynamic_map_id: u32,
        apply_partials: bool,
        extra_partial_ids: &BTreeSet<u32>,
    ) -> Option<Arc<ServerZone>> {
        let by_map = self.zone_data.get(&id)?;
        let zone = if dynamic_map_id != 0 {
            by_map.get(&dynamic_map_id)?
        } else {
            by_map.values().next()?
        };

        if !apply_partials {
            return Some(Arc::clone(zone));
        }

        let mut partial_ids = self
            .zone_partial_auto_map
            .get(&zone.dynamic_map_id)
            .cloned()
            .unwrap_or_default();

        for partial_id in extra_partial_ids {
            if let Some(partial) = self.zone_partials.get(partial_id) {
                if !partial.auto_apply
                    && (partial.dynamic_map_ids.is_empty()
                        || partial.dynamic_map_ids.contains(&zone.dynamic_map_id))
                {
                    partial_ids.insert(*partial_id);
                }
            }
        }

        if partial_ids.is_empty() {
            return Some(Arc::clone(zone));
        }

        let mut derived = (**zone).clone();
        for partial_id in &partial_ids {
            let partial = self.zone_partials.get(partial_id)?;
            apply_zone_partial(&mut derived, partial, true);
        }

        prune_spawn_structures(&mut derived);
        Some(Arc::new(derived))
    }

    pub fn get_zone_partial_data(&self, id: u32) -> Option<Arc<ServerZonePartial>> {
        self.zone_partials.get(&id).cloned()
    }

    pub fn get_event(&self, id: &str) -> Option<Arc<Event>> {
        self.events.get(id).cloned()
    }

    pub fn get_zone_instance_data(&self, id: u32) -> Option<Arc<ServerZoneInstance>> {
        self.zone_instances.get(&id).cloned()
    }

    pub fn get_zone_instance_variant(&self, id: u32) -> Option<Arc<ServerZoneInstanceVariant>> {
        self.instance_variants.get(&id).cloned()
    }

    pub fn get_shop_data(&self, id: u32) -> Option<Arc<ServerShop>> {
        self.shops.get(&id).cloned()
    }

    pub fn get_ai_logic_group(&self, id: u32) -> Option<Arc<AiLogicGroup>> {
        self.ai_logic_groups.get(&id).cloned()
    }

    pub fn get_demon_familiarity_type(&self, id: u32) -> Option<Arc<DemonFamiliarityType>> {
        self.demon_familiarity.get(&id).cloned()
    }

    pub fn get_demon_present_data(&self, demon_type: u32) -> Option<Arc<DemonPresent>> {
        self.demon_presents.get(&demon_type).cloned()
    }

    pub fn get_demon_quest_reward_data(&self, id: u32) -> Option<Arc<DemonQuestReward>> {
        self.demon_quest_rewards.get(&id).cloned()
    }

    pub fn get_drop_set_data(&self, id: u32) -> Option<&DropSet> {
        self.drop_sets.get(&id)
    }

    pub fn get_gift_drop_set_id(&self, giftbox_id: u32) -> Option<u32> {
        self.gift_drop_sets.get(&giftbox_id).copied()
    }

    pub fn get_enchant_set_data(&self, id: u32) -> Option<Arc<EnchantSet>> {
        self.enchant_sets.get(&id).cloned()
    }

    pub fn get_enchant_special_data(&self, id: u32) -> Option<Arc<EnchantSpecial>> {
        self.enchant_specials.get(&id).cloned()
    }

    pub fn get_fusion_mistake_data(&self, id: u32) -> Option<Arc<FusionMistake>> {
        self.fusion_mistakes.get(&id).cloned()
    }

    pub fn get_s_item_row(&self, item_id: u32) -> Option<Arc<SItemRow>> {
        self.s_items.get(&item_id).cloned()
    }

    pub fn get_s_status_row(&self, status_id: u32) -> Option<Arc<SStatusRow>> {
        self.s_statuses.get(&status_id).cloned()
    }

    pub fn get_tokusei_data(&self, id: u32) -> Option<Arc<Tokusei>> {
        self.tokusei.get(&id).cloned()
    }

    pub fn get_script(&self, name: &str) -> Option<Arc<ServerScript>> {
        self.scripts.get(name).cloned()
    }

    pub fn get_ai_script(&self, name: &str) -> Option<Arc<ServerScript>> {
        self.ai_scripts.get(name).cloned()
    }

    pub fn all_zone_ids(&self) -> BTreeMap<u32, BTreeSet<u32>> {
        self.zone_data
            .iter()
            .map(|(id, by_map)| (*id, by_map.keys().copied().collect()))
            .collect()
    }

    // ─── Cross-reference validation ─────────────────────────────────────

    fn verify_data_integrity(
        &self,
        catalog: Option<&DefinitionCatalog>,
        errors: &mut Vec<String>,
    ) {
        self.verify_event_integrity(errors);
        self.verify_zone_references(catalog, errors);
        self.verify_instance_references(errors);
        if let Some(catalog) = catalog {
            self.verify_item_references(catalog, errors);
        }
    }

    fn event_exists(&self, id: &str) -> bool {
        self.events.contains_key(id)
    }

    /// Event IDs referenced by an action list that do not resolve.
    fn invalid_event_ids<'a>(
        &self,
        actions: impl IntoIterator<Item = &'a Action>,
    ) -> BTreeSet<String> {
        let mut invalid = BTreeSet::new();
        for action in actions {
            match &action.kind {
                ActionKind::StartEvent { event_id } if !event_id.is_empty() => {
                    if !self.event_exists(event_id) {
                        invalid.insert(event_id.clone());
                    }
                }
                ActionKind::ZoneInstance {
                    timer_expiration_event_id,
                    ..
                } if !timer_expiration_event_id.is_empty() => {
                    if !self.event_exists(timer_expiration_event_id) {
                        invalid.insert(timer_expiration_event_id.clone());
                    }
                }
                _ => {}
            }

            if !action.on_failure_event.is_empty() && !self.event_exists(&action.on_failure_event)
            {
                invalid.insert(action.on_failure_event.clone());
            }
        }
        invalid
    }

    fn verify_event_integrity(&self, errors: &mut Vec<String>) {
        for (event_id, event) in &self.events {
            let mut ref_ids: BTreeSet<&str> = BTreeSet::new();

            // (next, queue_next, branches, branch script id) sequences that
            // can carry forward references.
            let mut sequences: Vec<(&str, &str, &[EventBranch], &str)> = Vec::new();
            if !event.skip_invalid {
                sequences.push((
                    &event.next,
                    &event.queue_next,
                    &event.branches,
                    &event.branch_script_id,
                ));
            }

            let mut has_itime_gifts = false;
            match &event.kind {
                EventKind::Prompt { choices, .. } => {
                    // The base path of a prompt is never taken.
                    if !event.next.is_empty() {
                        tracing::warn!(
                            "[serverdata] 'next' set on prompt event {event_id} is never used"
                        );
                    }
                    if !event.queue_next.is_empty() {
                        tracing::warn!(
                            "[serverdata] 'queueNext' set on prompt event {event_id} is never used"
                        );
                    }
                    if !event.branches.is_empty() {
                        tracing::warn!(
                            "[serverdata] 'branches' set on prompt event {event_id} is never used"
                        );
                    }
                    sequences.clear();

                    for choice in choices {
                        if !choice.skip_invalid {
                            sequences.push((
                                &choice.next,
                                &choice.queue_next,
                                &choice.branches,
                                &choice.branch_script_id,
                            ));
                        }
                    }
                }
                EventKind::ITime {
                    start_actions,
                    gift_ids,
                    choices,
                } => {
                    if !start_actions.is_empty() {
                        ref_ids.insert(start_actions);
                    }
                    has_itime_gifts = !gift_ids.is_empty();

                    for choice in choices {
                        if !choice.skip_invalid {
                            sequences.push((
                                &choice.next,
                                &choice.queue_next,
                                &choice.branches,
                                &choice.branch_script_id,
                            ));
                        }
                    }
                }
                EventKind::OpenMenu { use_next, .. } => {
                    if !use_next.is_empty() {
                        ref_ids.insert(use_next);
                    }
                }
                EventKind::PerformActions { actions } => {
                    for invalid in self.invalid_event_ids(
                        action::all_actions(actions).into_iter(),
                    ) {
                        errors.push(format!(
                            "invalid event ID reference on event {event_id}: {invalid}"
                        ));
                    }
                }
                EventKind::Fork | EventKind::NpcMessage { .. } | EventKind::Direction { .. } => {}
            }

            for &(next, queue_next, branches, branch_script_id) in &sequences {
                if !next.is_empty() {
                    ref_ids.insert(next);
                }
                if !queue_next.is_empty() {
                    ref_ids.insert(queue_next);
                }

                for (index, branch) in branches.iter().enumerate() {
                    if !branch.next.is_empty() {
                        ref_ids.insert(&branch.next);
                    }
                    if !branch.queue_next.is_empty() {
                        ref_ids.insert(&branch.queue_next);
                    }

                    // A branch with no conditions is only reachable as the
                    // final fallback, through a branch script, or through
                    // i-time gift selection.
                    let is_last = index + 1 == branches.len();
                    if branch.conditions.is_empty()
                        && !is_last
                        && branch_script_id.is_empty()
                        && !has_itime_gifts
                    {
                        errors.push(format!(
                            "event {event_id} has one or more unreachable branches"
                        ));
                    }
                }
            }

            for ref_id in ref_ids {
                if !self.event_exists(ref_id) {
                    errors.push(format!(
                        "invalid event ID reference on event {event_id}: {ref_id}"
                    ));
                }
            }
        }
    }

    /// Action lists a zone carries, with the auto-context flag each list
    /// validates under.
    fn zone_action_lists<'a>(zone: &'a ServerZone) -> Vec<(&'a [Action], bool, String)> {
        let mut lists: Vec<(&[Action], bool, String)> = Vec::new();

        for npc in &zone.npcs {
            lists.push((&npc.actions, false, format!("zone {} NPC {}", zone.id, npc.id)));
        }
        for obj in &zone.objects {
            lists.push((
                &obj.actions,
                false,
                format!("zone {} object {}", zone.id, obj.id),
            ));
        }
        for (id, plasma) in &zone.plasma_spawns {
            lists.push((
                &plasma.success_actions,
                false,
                format!("zone {} plasma {id}", zone.id),
            ));
            lists.push((
                &plasma.fail_actions,
                false,
                format!("zone {} plasma {id}", zone.id),
            ));
        }
        for (id, group) in &zone.spawn_groups {
            lists.push((
                &group.spawn_actions,
                true,
                format!("zone {} spawn group {id}", zone.id),
            ));
            lists.push((
                &group.defeat_actions,
                true,
                format!("zone {} spawn group {id}", zone.id),
            ));
        }
        for (id, spot) in &zone.spots {
            lists.push((&spot.actions, false, format!("zone {} spot {id}", zone.id)));
            lists.push((
                &spot.leave_actions,
                false,
                format!("zone {} spot {id}", zone.id),
            ));
        }
        for trigger in &zone.triggers {
            lists.push((
                &trigger.actions,
                trigger.trigger.is_auto_context(),
                format!("zone {} trigger", zone.id),
            ));
        }

        lists
    }

    fn verify_zone_references(
        &self,
        catalog: Option<&DefinitionCatalog>,
        errors: &mut Vec<String>,
    ) {
        for by_map in self.zone_data.values() {
            for zone in by_map.values() {
                // Spawned enemies must exist in the catalog.
                if let Some(catalog) = catalog {
                    for spawn in zone.spawns.values() {
                        if catalog.monster_data(spawn.enemy_type).is_none() {
                            errors.push(format!(
                                "zone {} spawn {} references unknown enemy type {}",
                                zone.id, spawn.id, spawn.enemy_type
                            ));
                        }
                    }
                }

                // Spawn groups may only reference spawns in their zone.
                for (group_id, group) in &zone.spawn_groups {
                    for spawn_id in group.spawns.keys() {
                        if !zone.spawns.contains_key(spawn_id) {
                            errors.push(format!(
                                "zone {} spawn group {group_id} references missing spawn \
                                 {spawn_id}",
                                zone.id
                            ));
                        }
                    }
                }

                for (actions, auto_context, source) in Self::zone_action_lists(zone) {
                    for invalid in
                        self.invalid_event_ids(action::all_actions(actions).into_iter())
                    {
                        errors.push(format!(
                            "invalid event ID reference on {source}: {invalid}"
                        ));
                    }
                    validate_actions(actions, &source, auto_context, errors);
                }
            }
        }

        for (partial_id, partial) in &self.zone_partials {
            let mut lists: Vec<(&[Action], bool, String)> = Vec::new();
            for npc in &partial.npcs {
                lists.push((
                    &npc.actions,
                    false,
                    format!("zone partial {partial_id} NPC {}", npc.id),
                ));
            }
            for obj in &partial.objects {
                lists.push((
                    &obj.actions,
                    false,
                    format!("zone partial {partial_id} object {}", obj.id),
                ));
            }
            for (id, group) in &partial.spawn_groups {
                lists.push((
                    &group.spawn_actions,
                    true,
                    format!("zone partial {partial_id} spawn group {id}"),
                ));
                lists.push((
                    &group.defeat_actions,
                    true,
                    format!("zone partial {partial_id} spawn group {id}"),
                ));
            }
            for trigger in &partial.triggers {
                lists.push((
                    &trigger.actions,
                    trigger.trigger.is_auto_context(),
                    format!("zone partial {partial_id} trigger"),
                ));
            }

            for (actions, auto_context, source) in lists {
                for invalid in self.invalid_event_ids(action::all_actions(actions).into_iter()) {
                    errors.push(format!("invalid event ID reference on {source}: {invalid}"));
                }
                validate_actions(actions, &source, auto_context, errors);
            }
        }
    }

    fn verify_instance_references(&self, errors: &mut Vec<String>) {
        for (id, instance) in &self.zone_instances {
            for event_id in [&instance.create_event_id, &instance.to_lobby_event_id] {
                if !event_id.is_empty() && !self.event_exists(event_id) {
                    errors.push(format!(
                        "invalid event ID reference on zone instance {id}: {event_id}"
                    ));
                }
            }

            for zone_id in &instance.zone_ids {
                if !self.zone_data.contains_key(zone_id) {
                    errors.push(format!(
                        "zone instance {id} references unknown zone {zone_id}"
                    ));
                }
            }
        }

        for (id, variant) in &self.instance_variants {
            if !self.zone_instances.contains_key(&variant.instance_id) {
                errors.push(format!(
                    "zone instance variant {id} references unknown instance {}",
                    variant.instance_id
                ));
            }

            let event_id = &variant.timer_expiration_event_id;
            if !event_id.is_empty() && !self.event_exists(event_id) {
                errors.push(format!(
                    "invalid event ID reference on zone instance variant {id}: {event_id}"
                ));
            }
        }
    }

    fn verify_item_references(&self, catalog: &DefinitionCatalog, errors: &mut Vec<String>) {
        // Drop contents must resolve in the catalog.
        for (id, set) in &self.drop_sets {
            for drop in &set.drops {
                if catalog.item_data(drop.item_type).is_none() {
                    errors.push(format!(
                        "drop set {id} references undefined item {}",
                        drop.item_type
                    ));
                }
            }
        }

        // Gather every drop set reference from zones and spawns, then flag
        // dangling references as errors and unreferenced sets as warnings.
        let mut referenced: BTreeSet<u32> = self.gift_drop_sets.values().copied().collect();
        for by_map in self.zone_data.values() {
            for zone in by_map.values() {
                referenced.extend(zone.drop_set_ids.iter().copied());
                referenced.extend(zone.gift_set_ids.iter().copied());
                for spawn in zone.spawns.values() {
                    referenced.extend(spawn.drop_set_ids.iter().copied());
                    referenced.extend(spawn.gift_set_ids.iter().copied());
                }
            }
        }

        for id in &referenced {
            if !self.drop_sets.contains_key(id) {
                errors.push(format!("reference to unknown drop set {id}"));
            }
        }

        for id in self.drop_sets.keys() {
            if !referenced.contains(id) {
                tracing::warn!("[serverdata] drop set {id} is never referenced");
            }
        }
    }
}

/// Recursively reject player-required action types in automatic contexts.
/// Delay and spawn children inherit the outer context's player-ness.
fn validate_actions(actions: &[Action], source: &str, auto_context: bool, errors: &mut Vec<String>) {
    for action in actions {
        let auto = auto_context
            && matches!(
                action.source_context,
                SourceContext::Enemies | SourceContext::Source
            );

        match &action.kind {
            ActionKind::Delay {
                actions: nested, ..
            } => {
                validate_actions(nested, &format!("{source} => delay actions"), auto, errors);
            }
            ActionKind::Spawn { defeat_actions, .. } => {
                validate_actions(
                    defeat_actions,
                    &format!("{source} => defeat actions"),
                    auto,
                    errors,
                );
            }
            _ => {
                if auto && action.is_player_required() {
                    errors.push(format!(
                        "non-player context with player required action type '{}' \
                         encountered: {source}",
                        action.type_name()
                    ));
                }
            }
        }
    }
}

/// Deserialize every `*.xml` file in a data-store directory. A missing
/// directory loads nothing; a malformed file fails the load.
fn load_xml_dir<T: DeserializeOwned>(store: &DataStore, path: &str) -> Result<Vec<T>> {
    let listing = match store.get_listing(path, false, false) {
        Ok(listing) => listing,
        Err(_) => {
            tracing::warn!("[serverdata] no definition directory at {path}");
            return Ok(Vec::new());
        }
    };

    let mut files = listing.files;
    files.sort();

    let mut out = Vec::new();
    for file in files {
        if !file.ends_with(".xml") {
            continue;
        }

        let full = format!("{path}/{file}");
        let data = store.read_file(&full)?;
        let text = String::from_utf8(data)
            .map_err(|_| Error::Validation(format!("definition is not valid UTF-8: {full}")))?;

        let parsed: T = quick_xml::de::from_str(&text)
            .map_err(|e| Error::Validation(format!("failed to parse {full}: {e}")))?;
        out.push(parsed);
    }

    Ok(out)
}
