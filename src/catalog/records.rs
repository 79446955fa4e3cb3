//! Static table record types.
//!
//! One struct per binary table, each with a generated-style loader that
//! walks the record fields in file order. Strings in the client tables are
//! CP932.

use crate::encoding::Encoding;
use crate::error::Result;

use super::stream::BinaryStream;

/// A record decodable from a binary table stream.
pub trait CatalogRecord: Sized + Send + Sync + 'static {
    fn load(stream: &mut BinaryStream) -> Result<Self>;
}

#[derive(Debug, Clone, Default)]
pub struct MonsterData {
    pub id: u32,
    pub name: String,
    pub race: u8,
    pub level: u8,
    pub hp: i32,
    pub mp: i32,
    pub attack: u16,
    pub defense: u16,
    pub skill_ids: Vec<u32>,
}

impl CatalogRecord for MonsterData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            race: stream.read_u8()?,
            level: stream.read_u8()?,
            hp: stream.read_i32()?,
            mp: stream.read_i32()?,
            attack: stream.read_u16()?,
            defense: stream.read_u16()?,
            skill_ids: stream.read_dynamic_list_u32()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkillData {
    pub id: u32,
    pub name: String,
    /// Server-side handler selector; several skills can share one.
    pub function_id: u16,
    pub category: u8,
    pub mp_cost: u16,
    pub hp_cost: u16,
    pub range: f32,
    pub target_type: u8,
}

impl CatalogRecord for SkillData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            function_id: stream.read_u16()?,
            category: stream.read_u8()?,
            mp_cost: stream.read_u16()?,
            hp_cost: stream.read_u16()?,
            range: stream.read_f32()?,
            target_type: stream.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemData {
    pub id: u32,
    pub name: String,
    pub kind: u8,
    pub buy_price: i32,
    pub sell_price: i32,
    pub stack_size: u16,
    pub gender: u8,
    pub level_requirement: u8,
}

impl CatalogRecord for ItemData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            kind: stream.read_u8()?,
            buy_price: stream.read_i32()?,
            sell_price: stream.read_i32()?,
            stack_size: stream.read_u16()?,
            gender: stream.read_u8()?,
            level_requirement: stream.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EquipmentSetData {
    pub id: u32,
    pub name: String,
    pub item_ids: Vec<u32>,
    pub bonus_ids: Vec<u32>,
}

impl CatalogRecord for EquipmentSetData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            item_ids: stream.read_dynamic_list_u32()?,
            bonus_ids: stream.read_dynamic_list_u32()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DynamicMapData {
    pub id: u32,
    pub zone_id: u32,
    pub sheet_name: String,
}

impl CatalogRecord for DynamicMapData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            zone_id: stream.read_u32()?,
            sheet_name: stream.read_dynamic_string(Encoding::Cp1252)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZoneGeometryData {
    pub id: u32,
    pub name: String,
    pub starting_x: f32,
    pub starting_y: f32,
    pub starting_rotation: f32,
}

impl CatalogRecord for ZoneGeometryData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            starting_x: stream.read_f32()?,
            starting_y: stream.read_f32()?,
            starting_rotation: stream.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusEffectData {
    pub id: u32,
    pub name: String,
    pub stack_kind: u8,
    pub max_stack: u8,
    pub duration: u32,
}

impl CatalogRecord for StatusEffectData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            stack_kind: stream.read_u8()?,
            max_stack: stream.read_u8()?,
            duration: stream.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpertiseData {
    pub id: u8,
    pub name: String,
    pub growth_rate: f32,
}

impl CatalogRecord for ExpertiseData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u8()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            growth_rate: stream.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShopProductData {
    pub id: u16,
    pub item_id: u32,
    pub price: i32,
    pub trend: u8,
}

impl CatalogRecord for ShopProductData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u16()?,
            item_id: stream.read_u32()?,
            price: stream.read_i32()?,
            trend: stream.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TitleData {
    pub id: u16,
    pub name: String,
}

impl CatalogRecord for TitleData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u16()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValuableData {
    pub id: u16,
    pub name: String,
    pub flag_group: u16,
}

impl CatalogRecord for ValuableData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u16()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            flag_group: stream.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NpcAppearanceData {
    pub id: u32,
    pub name: String,
    pub model_id: u16,
    pub scale: f32,
}

impl CatalogRecord for NpcAppearanceData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            model_id: stream.read_u16()?,
            scale: stream.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectAppearanceData {
    pub id: u32,
    pub name: String,
    pub model_id: u16,
}

impl CatalogRecord for ObjectAppearanceData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            name: stream.read_dynamic_string(Encoding::Cp932)?,
            model_id: stream.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonsterLevelUpData {
    pub id: u32,
    /// Per-level growth of the six core stats.
    pub stat_growth: Vec<i16>,
}

impl CatalogRecord for MonsterLevelUpData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            stat_growth: stream.read_dynamic_list_i16()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FusionData {
    pub id: u32,
    pub result_id: u32,
    pub first_id: u32,
    pub second_id: u32,
}

impl CatalogRecord for FusionData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            result_id: stream.read_u32()?,
            first_id: stream.read_u32()?,
            second_id: stream.read_u32()?,
        })
    }
}

/// Server-side item extension rows. Usually registered at runtime from
/// server definitions rather than loaded from a binary.
#[derive(Debug, Clone, Default)]
pub struct SItemData {
    pub id: u32,
    pub tokusei_ids: Vec<u32>,
}

impl CatalogRecord for SItemData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            tokusei_ids: stream.read_dynamic_list_u32()?,
        })
    }
}

/// Server-side status extension rows, runtime-registrable like [`SItemData`].
#[derive(Debug, Clone, Default)]
pub struct SStatusData {
    pub id: u32,
    pub tokusei_ids: Vec<u32>,
}

impl CatalogRecord for SStatusData {
    fn load(stream: &mut BinaryStream) -> Result<Self> {
        Ok(Self {
            id: stream.read_u32()?,
            tokusei_ids: stream.read_dynamic_list_u32()?,
        })
    }
}
