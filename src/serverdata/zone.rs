//! Zones, zone partials, and the partial merge.
//!
//! A zone owns its NPCs, objects, plasma, spawn tables and triggers. A
//! partial overlays the same structure: applied to a copy of a zone it
//! unions scalar sets, replaces or removes placed entities, patches spawn
//! tables key-by-key, and appends triggers. Spawn entries with a zero enemy
//! type merge their drop lists into the existing spawn instead of replacing
//! it; NPCs and objects with a zero ID are removals.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::error::Error;

use super::action::{parse_id_list, Action};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerNpc {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@spotID")]
    pub spot_id: u32,
    #[serde(rename = "@x")]
    pub x: f32,
    #[serde(rename = "@y")]
    pub y: f32,
    #[serde(rename = "@rotation")]
    pub rotation: f32,
    #[serde(rename = "action")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerObject {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@spotID")]
    pub spot_id: u32,
    #[serde(rename = "@x")]
    pub x: f32,
    #[serde(rename = "@y")]
    pub y: f32,
    #[serde(rename = "@rotation")]
    pub rotation: f32,
    #[serde(rename = "@state")]
    pub state: u8,
    #[serde(rename = "action")]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlasmaSpawn {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@spotID")]
    pub spot_id: u32,
    #[serde(rename = "@count")]
    pub count: u8,
    #[serde(rename = "successAction")]
    pub success_actions: Vec<Action>,
    #[serde(rename = "failAction")]
    pub fail_actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ItemDrop {
    #[serde(rename = "@itemType")]
    pub item_type: u32,
    #[serde(rename = "@minStack")]
    pub min_stack: u16,
    #[serde(rename = "@maxStack")]
    pub max_stack: u16,
    #[serde(rename = "@rate")]
    pub rate: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Spawn {
    #[serde(rename = "@id")]
    pub id: u32,
    /// Zero inside a partial means "merge drop lists into the existing
    /// spawn" rather than replace it.
    #[serde(rename = "@enemyType")]
    pub enemy_type: u32,
    #[serde(rename = "@level")]
    pub level: i8,
    #[serde(rename = "drop")]
    pub drops: Vec<ItemDrop>,
    #[serde(rename = "@dropSetIDs")]
    #[serde(deserialize_with = "deserialize_id_list")]
    pub drop_set_ids: Vec<u32>,
    #[serde(rename = "gift")]
    pub gifts: Vec<ItemDrop>,
    #[serde(rename = "@giftSetIDs")]
    #[serde(deserialize_with = "deserialize_id_list")]
    pub gift_set_ids: Vec<u32>,
}

fn deserialize_id_list<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_id_list(&s).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnGroup {
    pub id: u32,
    /// Spawn ID → how many of it this group places.
    pub spawns: BTreeMap<u32, u16>,
    pub spawn_actions: Vec<Action>,
    pub defeat_actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SpawnGroupXml {
    #[serde(rename = "@id")]
    id: u32,
    #[serde(rename = "spawn")]
    spawns: Vec<SpawnRefXml>,
    #[serde(rename = "spawnAction")]
    spawn_actions: Vec<Action>,
    #[serde(rename = "defeatAction")]
    defeat_actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SpawnRefXml {
    #[serde(rename = "@spawnID")]
    spawn_id: u32,
    #[serde(rename = "@count")]
    count: u16,
}

impl<'de> Deserialize<'de> for SpawnGroup {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let xml = SpawnGroupXml::deserialize(deserializer)?;
        Ok(SpawnGroup {
            id: xml.id,
            spawns: xml
                .spawns
                .into_iter()
                .map(|s| (s.spawn_id, s.count.max(1)))
                .collect(),
            spawn_actions: xml.spawn_actions,
            defeat_actions: xml.defeat_actions,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpawnLocation {
    #[serde(rename = "@x")]
    pub x: f32,
    #[serde(rename = "@y")]
    pub y: f32,
    #[serde(rename = "@width")]
    pub width: f32,
    #[serde(rename = "@height")]
    pub height: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpawnLocationGroup {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@groupIDs")]
    #[serde(deserialize_with = "deserialize_id_list_set")]
    pub group_ids: BTreeSet<u32>,
    #[serde(rename = "@respawnTime")]
    pub respawn_time: f32,
    #[serde(rename = "location")]
    pub locations: Vec<SpawnLocation>,
}

fn deserialize_id_list_set<'de, D>(deserializer: D) -> Result<BTreeSet<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_id_list(&s)
        .map(|v| v.into_iter().collect())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Spot {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@enabled")]
    pub enabled: bool,
    #[serde(rename = "action")]
    pub actions: Vec<Action>,
    #[serde(rename = "leaveAction")]
    pub leave_actions: Vec<Action>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TriggerKind {
    OnZoneIn,
    OnZoneOut,
    OnLogin,
    OnDeath,
    OnRevival,
    OnFlagSet,
    OnTick,
    PreZoneIn,
}

impl TryFrom<String> for TriggerKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        match s.as_str() {
            "onZoneIn" => Ok(TriggerKind::OnZoneIn),
            "onZoneOut" => Ok(TriggerKind::OnZoneOut),
            "onLogin" => Ok(TriggerKind::OnLogin),
            "onDeath" => Ok(TriggerKind::OnDeath),
            "onRevival" => Ok(TriggerKind::OnRevival),
            "onFlagSet" => Ok(TriggerKind::OnFlagSet),
            "onTick" => Ok(TriggerKind::OnTick),
            "preZoneIn" => Ok(TriggerKind::PreZoneIn),
            other => Err(Error::Validation(format!("unknown trigger kind: {other}"))),
        }
    }
}

impl TriggerKind {
    /// Most triggers fire with no player attached; the ones tied to a
    /// specific player keep a player context.
    pub fn is_auto_context(self) -> bool {
        !matches!(
            self,
            TriggerKind::OnZoneIn
                | TriggerKind::OnZoneOut
                | TriggerKind::OnLogin
                | TriggerKind::OnDeath
                | TriggerKind::OnRevival
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trigger {
    #[serde(rename = "@on")]
    pub trigger: TriggerKind,
    #[serde(rename = "@value", default)]
    pub value: i32,
    #[serde(rename = "action", default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "ZoneXml")]
pub struct ServerZone {
    pub id: u32,
    pub dynamic_map_id: u32,
    pub global: bool,
    pub starting_x: f32,
    pub starting_y: f32,
    pub starting_rotation: f32,
    pub npcs: Vec<ServerNpc>,
    pub objects: Vec<ServerObject>,
    pub plasma_spawns: BTreeMap<u32, PlasmaSpawn>,
    pub spawns: BTreeMap<u32, Spawn>,
    pub spawn_groups: BTreeMap<u32, SpawnGroup>,
    pub spawn_location_groups: BTreeMap<u32, SpawnLocationGroup>,
    pub spots: BTreeMap<u32, Spot>,
    pub triggers: Vec<Trigger>,
    pub valid_team_types: BTreeSet<i8>,
    pub drop_set_ids: BTreeSet<u32>,
    pub gift_set_ids: BTreeSet<u32>,
    pub skill_whitelist: BTreeSet<u32>,
    pub skill_blacklist: BTreeSet<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ZoneXml {
    #[serde(rename = "@id")]
    id: u32,
    #[serde(rename = "@dynamicMapID")]
    dynamic_map_id: u32,
    #[serde(rename = "@global")]
    global: bool,
    #[serde(rename = "@startingX")]
    starting_x: f32,
    #[serde(rename = "@startingY")]
    starting_y: f32,
    #[serde(rename = "@startingRotation")]
    starting_rotation: f32,
    #[serde(rename = "@validTeamTypes")]
    valid_team_types: String,
    #[serde(rename = "@dropSetIDs")]
    drop_set_ids: String,
    #[serde(rename = "@giftSetIDs")]
    gift_set_ids: String,
    #[serde(rename = "@skillWhitelist")]
    skill_whitelist: String,
    #[serde(rename = "@skillBlacklist")]
    skill_blacklist: String,
    #[serde(rename = "npc")]
    npcs: Vec<ServerNpc>,
    #[serde(rename = "object")]
    objects: Vec<ServerObject>,
    #[serde(rename = "plasma")]
    plasma_spawns: Vec<PlasmaSpawn>,
    #[serde(rename = "spawn")]
    spawns: Vec<Spawn>,
    #[serde(rename = "spawnGroup")]
    spawn_groups: Vec<SpawnGroup>,
    #[serde(rename = "spawnLocationGroup")]
    spawn_location_groups: Vec<SpawnLocationGroup>,
    #[serde(rename = "spot")]
    spots: Vec<Spot>,
    #[serde(rename = "trigger")]
    triggers: Vec<Trigger>,
}

fn signed_id_set(s: &str) -> Result<BTreeSet<i8>, Error> {
    if s.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<i8>()
                .map_err(|_| Error::Validation(format!("bad team type entry: {part}")))
        })
        .collect()
}

impl TryFrom<ZoneXml> for ServerZone {
    type Error = Error;

    fn try_from(xml: ZoneXml) -> Result<Self, Error> {
        if xml.id == 0 {
            return Err(Error::Validation("zone with no id".into()));
        }

        Ok(ServerZone {
            id: xml.id,
            // A zone without an explicit dynamic map shares its zone ID.
            dynamic_map_id: if xml.dynamic_map_id == 0 {
                xml.id
            } else {
                xml.dynamic_map_id
            },
            global: xml.global,
            starting_x: xml.starting_x,
            starting_y: xml.starting_y,
            starting_rotation: xml.starting_rotation,
            npcs: xml.npcs,
            objects: xml.objects,
            plasma_spawns: xml.plasma_spawns.into_iter().map(|p| (p.id, p)).collect(),
            spawns: xml.spawns.into_iter().map(|s| (s.id, s)).collect(),
            spawn_groups: xml.spawn_groups.into_iter().map(|g| (g.id, g)).collect(),
            spawn_location_groups: xml
                .spawn_location_groups
                .into_iter()
                .map(|g| (g.id, g))
                .collect(),
            spots: xml.spots.into_iter().map(|s| (s.id, s)).collect(),
            triggers: xml.triggers,
            valid_team_types: signed_id_set(&xml.valid_team_types)?,
            drop_set_ids: parse_id_list(&xml.drop_set_ids)?.into_iter().collect(),
            gift_set_ids: parse_id_list(&xml.gift_set_ids)?.into_iter().collect(),
            skill_whitelist: parse_id_list(&xml.skill_whitelist)?.into_iter().collect(),
            skill_blacklist: parse_id_list(&xml.skill_blacklist)?.into_iter().collect(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "ZonePartialXml")]
pub struct ServerZonePartial {
    pub id: u32,
    /// Auto-applied partials fold into their dynamic maps on every
    /// `get_zone_data` call; others only apply when requested by ID.
    pub auto_apply: bool,
    /// Dynamic maps the partial targets. Empty means any.
    pub dynamic_map_ids: BTreeSet<u32>,
    pub npcs: Vec<ServerNpc>,
    pub objects: Vec<ServerObject>,
    pub plasma_spawns: BTreeMap<u32, PlasmaSpawn>,
    pub spawns: BTreeMap<u32, Spawn>,
    pub spawn_groups: BTreeMap<u32, SpawnGroup>,
    pub spawn_location_groups: BTreeMap<u32, SpawnLocationGroup>,
    pub spots: BTreeMap<u32, Spot>,
    pub triggers: Vec<Trigger>,
    pub valid_team_types: BTreeSet<i8>,
    pub drop_set_ids: BTreeSet<u32>,
    pub gift_set_ids: BTreeSet<u32>,
    pub skill_whitelist: BTreeSet<u32>,
    pub skill_blacklist: BTreeSet<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ZonePartialXml {
    #[serde(rename = "@id")]
    id: u32,
    #[serde(rename = "@autoApply")]
    auto_apply: bool,
    #[serde(rename = "@dynamicMapIDs")]
    dynamic_map_ids: String,
    #[serde(rename = "@validTeamTypes")]
    valid_team_types: String,
    #[serde(rename = "@dropSetIDs")]
    drop_set_ids: String,
    #[serde(rename = "@giftSetIDs")]
    gift_set_ids: String,
    #[serde(rename = "@skillWhitelist")]
    skill_whitelist: String,
    #[serde(rename = "@skillBlacklist")]
    skill_blacklist: String,
    #[serde(rename = "npc")]
    npcs: Vec<ServerNpc>,
    #[serde(rename = "object")]
    objects: Vec<ServerObject>,
    #[serde(rename = "plasma")]
    plasma_spawns: Vec<PlasmaSpawn>,
    #[serde(rename = "spawn")]
    spawns: Vec<Spawn>,
    #[serde(rename = "spawnGroup")]
    spawn_groups: Vec<SpawnGroup>,
    #[serde(rename = "spawnLocationGroup")]
    spawn_location_groups: Vec<SpawnLocationGroup>,
    #[serde(rename = "spot")]
    spots: Vec<Spot>,
    #[serde(rename = "trigger")]
    triggers: Vec<Trigger>,
}

impl TryFrom<ZonePartialXml> for ServerZonePartial {
    type Error = Error;

    fn try_from(xml: ZonePartialXml) -> Result<Self, Error> {
        if xml.id == 0 {
            return Err(Error::Validation("zone partial with no id".into()));
        }

        Ok(ServerZonePartial {
            id: xml.id,
            auto_apply: xml.auto_apply,
            dynamic_map_ids: parse_id_list(&xml.dynamic_map_ids)?.into_iter().collect(),
            npcs: xml.npcs,
            objects: xml.objects,
            plasma_spawns: xml.plasma_spawns.into_iter().map(|p| (p.id, p)).collect(),
            spawns: xml.spawns.into_iter().map(|s| (s.id, s)).collect(),
            spawn_groups: xml.spawn_groups.into_iter().map(|g| (g.id, g)).collect(),
            spawn_location_groups: xml
                .spawn_location_groups
                .into_iter()
                .map(|g| (g.id, g))
                .collect(),
            spots: xml.spots.into_iter().map(|s| (s.id, s)).collect(),
            triggers: xml.triggers,
            valid_team_types: signed_id_set(&xml.valid_team_types)?,
            drop_set_ids: parse_id_list(&xml.drop_set_ids)?.into_iter().collect(),
            gift_set_ids: parse_id_list(&xml.gift_set_ids)?.into_iter().collect(),
            skill_whitelist: parse_id_list(&xml.skill_whitelist)?.into_iter().collect(),
            skill_blacklist: parse_id_list(&xml.skill_blacklist)?.into_iter().collect(),
        })
    }
}

/// Two placed entities count as the same placement when they share a spot
/// ID, or both are freely placed within 10 world units on both axes.
fn same_placement(spot_a: u32, x_a: f32, y_a: f32, spot_b: u32, x_b: f32, y_b: f32) -> bool {
    if spot_a != 0 || spot_b != 0 {
        return spot_a == spot_b;
    }
    (x_a - x_b).abs() < 10.0 && (y_a - y_b).abs() < 10.0
}

/// Merge one partial into a zone copy. With `position_replace`, partial
/// NPCs and objects displace existing entries at the same placement before
/// being added; entries with a zero ID are pure removals either way.
pub fn apply_zone_partial(
    zone: &mut ServerZone,
    partial: &ServerZonePartial,
    position_replace: bool,
) {
    zone.valid_team_types
        .extend(partial.valid_team_types.iter().copied());
    zone.drop_set_ids.extend(partial.drop_set_ids.iter().copied());
    zone.gift_set_ids.extend(partial.gift_set_ids.iter().copied());
    zone.skill_whitelist
        .extend(partial.skill_whitelist.iter().copied());
    zone.skill_blacklist
        .extend(partial.skill_blacklist.iter().copied());

    if position_replace {
        for npc in &partial.npcs {
            zone.npcs.retain(|existing| {
                !same_placement(npc.spot_id, npc.x, npc.y, existing.spot_id, existing.x, existing.y)
            });
        }
        for obj in &partial.objects {
            zone.objects.retain(|existing| {
                !same_placement(obj.spot_id, obj.x, obj.y, existing.spot_id, existing.x, existing.y)
            });
        }
    }

    for npc in &partial.npcs {
        if npc.id != 0 {
            zone.npcs.push(npc.clone());
        }
    }

    for obj in &partial.objects {
        if obj.id != 0 {
            zone.objects.push(obj.clone());
        }
    }

    for (id, plasma) in &partial.plasma_spawns {
        zone.plasma_spawns.insert(*id, plasma.clone());
    }

    for (id, spawn) in &partial.spawns {
        if spawn.enemy_type != 0 {
            zone.spawns.insert(*id, spawn.clone());
        } else if let Some(existing) = zone.spawns.get_mut(id) {
            existing.drops.extend(spawn.drops.iter().cloned());
            existing
                .drop_set_ids
                .extend(spawn.drop_set_ids.iter().copied());
            existing.gifts.extend(spawn.gifts.iter().cloned());
            existing
                .gift_set_ids
                .extend(spawn.gift_set_ids.iter().copied());
        }
    }

    for (id, group) in &partial.spawn_groups {
        zone.spawn_groups.insert(*id, group.clone());
    }

    for (id, group) in &partial.spawn_location_groups {
        zone.spawn_location_groups.insert(*id, group.clone());
    }

    for (id, spot) in &partial.spots {
        zone.spots.insert(*id, spot.clone());
    }

    zone.triggers.extend(partial.triggers.iter().cloned());
}

/// Drop spawn groups whose spawns all vanished during merging, then spawn
/// location groups left without any groups. Partially emptied groups keep
/// their surviving members.
pub fn prune_spawn_structures(zone: &mut ServerZone) {
    let mut group_removals = Vec::new();
    for (id, group) in &mut zone.spawn_groups {
        group.spawns.retain(|spawn_id, _| zone.spawns.contains_key(spawn_id));
        if group.spawns.is_empty() {
            group_removals.push(*id);
        }
    }
    for id in group_removals {
        tracing::debug!("[serverdata] removing empty spawn group {id} from zone {}", zone.id);
        zone.spawn_groups.remove(&id);
    }

    let mut location_removals = Vec::new();
    for (id, group) in &mut zone.spawn_location_groups {
        group
            .group_ids
            .retain(|group_id| zone.spawn_groups.contains_key(group_id));
        if group.group_ids.is_empty() {
            location_removals.push(*id);
        }
    }
    for id in location_removals {
        tracing::debug!(
            "[serverdata] removing empty spawn location group {id} from zone {}",
            zone.id
        );
        zone.spawn_location_groups.remove(&id);
    }
}
