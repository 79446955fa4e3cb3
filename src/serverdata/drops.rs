//! Drop sets and the remaining server data artifacts.
//!
//! Drop sets merge across files: an APPEND set adds its drops to an
//! already-loaded set of the same ID, a REDEFINE set replaces them, and a
//! NORMAL set may only be defined once. Gift boxes map to drop sets through
//! the same kinds.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::Error;

use super::action::parse_id_list;
use super::zone::ItemDrop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum DropSetKind {
    #[default]
    Normal,
    Append,
    Redefine,
}

impl TryFrom<String> for DropSetKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        match s.as_str() {
            "" | "normal" => Ok(DropSetKind::Normal),
            "append" => Ok(DropSetKind::Append),
            "redefine" => Ok(DropSetKind::Redefine),
            other => Err(Error::Validation(format!("unknown drop set kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "DropSetXml")]
pub struct DropSet {
    pub id: u32,
    pub kind: DropSetKind,
    /// Gift boxes served from this set.
    pub giftbox_ids: BTreeSet<u32>,
    pub drops: Vec<ItemDrop>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DropSetXml {
    #[serde(rename = "@id")]
    id: u32,
    #[serde(rename = "@kind")]
    kind: DropSetKind,
    #[serde(rename = "@giftBoxIDs")]
    giftbox_ids: String,
    #[serde(rename = "drop")]
    drops: Vec<ItemDrop>,
}

impl TryFrom<DropSetXml> for DropSet {
    type Error = Error;

    fn try_from(xml: DropSetXml) -> Result<Self, Error> {
        if xml.id == 0 {
            return Err(Error::Validation("drop set with no id".into()));
        }
        Ok(DropSet {
            id: xml.id,
            kind: xml.kind,
            giftbox_ids: parse_id_list(&xml.giftbox_ids)?.into_iter().collect(),
            drops: xml.drops,
        })
    }
}

/// Root element of a `/data/dropset/*.xml` file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropSetFile {
    #[serde(rename = "dropset")]
    pub drop_sets: Vec<DropSet>,
}

/// Shops sell products by catalog item ID at a trend-adjusted price.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerShop {
    #[serde(rename = "@shopID")]
    pub shop_id: u32,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "product")]
    pub products: Vec<ShopProduct>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShopProduct {
    #[serde(rename = "@itemID")]
    pub item_id: u32,
    #[serde(rename = "@basePrice")]
    pub base_price: i32,
    #[serde(rename = "@trend")]
    pub trend: u8,
}

/// Groups the AI scripts an enemy kind runs with.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AiLogicGroup {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@scriptID")]
    pub script_id: String,
    #[serde(rename = "@aggression")]
    pub aggression: u8,
}

/// Familiarity growth brackets for partner demons.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DemonFamiliarityType {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "threshold")]
    pub thresholds: Vec<i32>,
}

/// Present items a partner demon can bring back, by rarity bracket.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DemonPresent {
    #[serde(rename = "@demonType")]
    pub demon_type: u32,
    #[serde(rename = "@rareItemIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub rare_item_ids: Vec<u32>,
    #[serde(rename = "@commonItemIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub common_item_ids: Vec<u32>,
}

/// Reward table row for demon quest sequences.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DemonQuestReward {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@sequenceStart")]
    pub sequence_start: u32,
    #[serde(rename = "@sequenceEnd")]
    pub sequence_end: u32,
    #[serde(rename = "@itemIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub item_ids: Vec<u32>,
}

/// Enchantment set definition keyed by its set ID.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnchantSet {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@conditionCount")]
    pub condition_count: u8,
    #[serde(rename = "@tokuseiIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub tokusei_ids: Vec<u32>,
}

/// Special enchant results outside the regular set tables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnchantSpecial {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@sourceItemID")]
    pub source_item_id: u32,
    #[serde(rename = "@resultItemID")]
    pub result_item_id: u32,
}

/// One deliberate fusion-mistake rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FusionMistake {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@firstType")]
    pub first_type: u32,
    #[serde(rename = "@secondType")]
    pub second_type: u32,
    #[serde(rename = "@resultType")]
    pub result_type: u32,
    #[serde(rename = "@rate")]
    pub rate: f32,
}

/// Server-side passive effect definition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tokusei {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "aspect")]
    pub aspects: Vec<TokuseiAspect>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TokuseiAspect {
    #[serde(rename = "@type")]
    pub aspect_type: u8,
    #[serde(rename = "@value")]
    pub value: i32,
}

/// Zone instance definition: the zones an instanced run is built from.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerZoneInstance {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@lobbyID")]
    pub lobby_id: u32,
    #[serde(rename = "@zoneIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub zone_ids: Vec<u32>,
    #[serde(rename = "@dynamicMapIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub dynamic_map_ids: Vec<u32>,
    #[serde(rename = "@createEventID")]
    pub create_event_id: String,
    #[serde(rename = "@toLobbyEventID")]
    pub to_lobby_event_id: String,
}

/// Variant rules for a zone instance (timers, special scoring).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerZoneInstanceVariant {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@instanceID")]
    pub instance_id: u32,
    #[serde(rename = "@timeLimit")]
    pub time_limit: u32,
    #[serde(rename = "@timerExpirationEventID")]
    pub timer_expiration_event_id: String,
}

/// Extended s-item rows defined server-side.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SItemRow {
    #[serde(rename = "@itemID")]
    pub item_id: u32,
    #[serde(rename = "@tokuseiIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub tokusei_ids: Vec<u32>,
}

/// Extended s-status rows defined server-side.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SStatusRow {
    #[serde(rename = "@statusID")]
    pub status_id: u32,
    #[serde(rename = "@tokuseiIDs")]
    #[serde(deserialize_with = "super::zone_id_list")]
    pub tokusei_ids: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drop_set_kinds() {
        let file: DropSetFile = quick_xml::de::from_str(
            r#"<dropsets>
                 <dropset id="1" giftBoxIDs="500">
                   <drop itemType="10" minStack="1" maxStack="5" rate="25.0"/>
                 </dropset>
                 <dropset id="1" kind="append">
                   <drop itemType="11" minStack="1" maxStack="1" rate="5.0"/>
                 </dropset>
                 <dropset id="2" kind="redefine"/>
               </dropsets>"#,
        )
        .unwrap();

        assert_eq!(file.drop_sets.len(), 3);
        assert_eq!(file.drop_sets[0].kind, DropSetKind::Normal);
        assert_eq!(file.drop_sets[0].giftbox_ids, BTreeSet::from([500]));
        assert_eq!(file.drop_sets[1].kind, DropSetKind::Append);
        assert_eq!(file.drop_sets[2].kind, DropSetKind::Redefine);
    }

    #[test]
    fn test_bad_kind_fails() {
        let result: std::result::Result<DropSet, _> =
            quick_xml::de::from_str(r#"<dropset id="1" kind="sometimes"/>"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_shop() {
        let shop: ServerShop = quick_xml::de::from_str(
            r#"<shop shopID="7" name="Weapons">
                 <product itemID="100" basePrice="250" trend="1"/>
               </shop>"#,
        )
        .unwrap();
        assert_eq!(shop.shop_id, 7);
        assert_eq!(shop.products[0].item_id, 100);
    }

    #[test]
    fn test_parse_zone_instance() {
        let instance: ServerZoneInstance = quick_xml::de::from_str(
            r#"<instance id="3" lobbyID="100" zoneIDs="200,201"
                         dynamicMapIDs="1200,1201" createEventID="inst_create"/>"#,
        )
        .unwrap();
        assert_eq!(instance.zone_ids, vec![200, 201]);
        assert_eq!(instance.create_event_id, "inst_create");
    }
}
