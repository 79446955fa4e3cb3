//! Static game-data definition catalog.
//!
//! Loads the client's encrypted binary tables from the data store at
//! startup and serves them through typed accessors. Every table is keyed by
//! its natural ID; a few maintain secondary indexes (monster name → id,
//! skill function id → skill ids, equipment item → set ids). Server-side
//! records (s-items, s-statuses) can also be registered at runtime without a
//! backing binary.

pub mod records;
pub mod stream;

pub use records::*;
pub use stream::{BinaryStream, BinaryTableBuilder};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::datastore::DataStore;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct DefinitionCatalog {
    monster_data: HashMap<u32, Arc<MonsterData>>,
    monster_name_ids: HashMap<String, u32>,
    skill_data: HashMap<u32, Arc<SkillData>>,
    skill_function_ids: HashMap<u16, BTreeSet<u32>>,
    item_data: HashMap<u32, Arc<ItemData>>,
    equipment_set_data: HashMap<u32, Arc<EquipmentSetData>>,
    equipment_set_items: HashMap<u32, BTreeSet<u32>>,
    dynamic_map_data: HashMap<u32, Arc<DynamicMapData>>,
    zone_geometry_data: HashMap<u32, Arc<ZoneGeometryData>>,
    status_effect_data: HashMap<u32, Arc<StatusEffectData>>,
    expertise_data: HashMap<u8, Arc<ExpertiseData>>,
    shop_product_data: HashMap<u16, Arc<ShopProductData>>,
    title_data: HashMap<u16, Arc<TitleData>>,
    valuable_data: HashMap<u16, Arc<ValuableData>>,
    npc_appearance_data: HashMap<u32, Arc<NpcAppearanceData>>,
    object_appearance_data: HashMap<u32, Arc<ObjectAppearanceData>>,
    level_up_data: HashMap<u32, Arc<MonsterLevelUpData>>,
    fusion_data: HashMap<(u32, u32), Arc<FusionData>>,
    s_item_data: HashMap<u32, Arc<SItemData>>,
    s_status_data: HashMap<u32, Arc<SStatusData>>,
}

impl DefinitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one binary table file. On any short read or verification
    /// failure the records decoded so far are returned together with a
    /// `false` success flag, and the failure is logged.
    pub fn load_binary_data<T: CatalogRecord>(
        store: &DataStore,
        binary_file: &str,
        decrypt: bool,
        tables_expected: u16,
    ) -> (Vec<Arc<T>>, bool) {
        let path = format!("/BinaryData/{binary_file}");

        let data = if decrypt {
            store.decrypt_file(&path)
        } else {
            store.read_file(&path)
        };

        let data = match data {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("[catalog] failed to load/decrypt '{binary_file}': {e}");
                return (Vec::new(), false);
            }
        };

        let mut stream = BinaryStream::new(&data);
        let (entry_count, _) = match stream.read_header(tables_expected) {
            Ok(header) => header,
            Err(e) => {
                tracing::error!("[catalog] bad header in '{binary_file}': {e}");
                return (Vec::new(), false);
            }
        };

        let mut records = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            match T::load(&mut stream) {
                Ok(record) => records.push(Arc::new(record)),
                Err(e) => {
                    tracing::error!(
                        "[catalog] failed after loading {}/{entry_count} records from \
                         '{binary_file}': {e}",
                        records.len()
                    );
                    return (records, false);
                }
            }
        }

        tracing::info!(
            "[catalog] loaded {}/{entry_count} records from '{binary_file}'",
            records.len()
        );
        (records, true)
    }

    fn require<T>(loaded: (Vec<Arc<T>>, bool), file: &str) -> Result<Vec<Arc<T>>> {
        let (records, ok) = loaded;
        if ok {
            Ok(records)
        } else {
            Err(Error::Validation(format!(
                "failed to load binary table: {file}"
            )))
        }
    }

    /// Load every table the catalog serves. Any failure aborts startup.
    pub fn load_all(&mut self, store: &DataStore) -> Result<()> {
        for record in Self::require(
            Self::load_binary_data::<MonsterData>(store, "MonsterData.sbin", true, 2),
            "MonsterData.sbin",
        )? {
            self.register_monster(record);
        }

        for record in Self::require(
            Self::load_binary_data::<SkillData>(store, "SkillData.sbin", true, 1),
            "SkillData.sbin",
        )? {
            self.register_skill(record);
        }

        for record in Self::require(
            Self::load_binary_data::<ItemData>(store, "ItemData.sbin", true, 1),
            "ItemData.sbin",
        )? {
            self.item_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<EquipmentSetData>(store, "EquipmentSetData.sbin", true, 3),
            "EquipmentSetData.sbin",
        )? {
            self.register_equipment_set(record);
        }

        for record in Self::require(
            Self::load_binary_data::<DynamicMapData>(store, "DynamicMapData.bin", false, 1),
            "DynamicMapData.bin",
        )? {
            self.dynamic_map_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<ZoneGeometryData>(store, "ZoneData.sbin", true, 1),
            "ZoneData.sbin",
        )? {
            self.zone_geometry_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<StatusEffectData>(store, "StatusData.sbin", true, 1),
            "StatusData.sbin",
        )? {
            self.status_effect_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<ExpertiseData>(store, "ExpertData.sbin", true, 1),
            "ExpertData.sbin",
        )? {
            self.expertise_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<ShopProductData>(store, "ShopProductData.sbin", true, 0),
            "ShopProductData.sbin",
        )? {
            self.shop_product_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<TitleData>(store, "TitleData.sbin", true, 1),
            "TitleData.sbin",
        )? {
            self.title_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<ValuableData>(store, "ValuableData.sbin", true, 1),
            "ValuableData.sbin",
        )? {
            self.valuable_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<NpcAppearanceData>(store, "HNpcData.sbin", true, 1),
            "HNpcData.sbin",
        )? {
            self.npc_appearance_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<ObjectAppearanceData>(store, "ONpcData.sbin", true, 1),
            "ONpcData.sbin",
        )? {
            self.object_appearance_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<MonsterLevelUpData>(store, "MonsterLevelUpData.sbin", true, 1),
            "MonsterLevelUpData.sbin",
        )? {
            self.level_up_data.insert(record.id, record);
        }

        for record in Self::require(
            Self::load_binary_data::<FusionData>(store, "FusionData.sbin", true, 0),
            "FusionData.sbin",
        )? {
            self.fusion_data
                .insert((record.first_id, record.second_id), record);
        }

        Ok(())
    }

    pub fn register_monster(&mut self, record: Arc<MonsterData>) {
        self.monster_name_ids
            .insert(record.name.clone(), record.id);
        self.monster_data.insert(record.id, record);
    }

    pub fn register_skill(&mut self, record: Arc<SkillData>) {
        self.skill_function_ids
            .entry(record.function_id)
            .or_default()
            .insert(record.id);
        self.skill_data.insert(record.id, record);
    }

    pub fn register_equipment_set(&mut self, record: Arc<EquipmentSetData>) {
        for item_id in &record.item_ids {
            if *item_id != 0 {
                self.equipment_set_items
                    .entry(*item_id)
                    .or_default()
                    .insert(record.id);
            }
        }
        self.equipment_set_data.insert(record.id, record);
    }

    pub fn register_item(&mut self, record: Arc<ItemData>) {
        self.item_data.insert(record.id, record);
    }

    pub fn register_zone_geometry(&mut self, record: Arc<ZoneGeometryData>) {
        self.zone_geometry_data.insert(record.id, record);
    }

    /// Register a server-defined s-item row that did not come from a binary.
    pub fn register_s_item(&mut self, record: Arc<SItemData>) {
        self.s_item_data.insert(record.id, record);
    }

    /// Register a server-defined s-status row that did not come from a
    /// binary.
    pub fn register_s_status(&mut self, record: Arc<SStatusData>) {
        self.s_status_data.insert(record.id, record);
    }

    pub fn monster_data(&self, id: u32) -> Option<Arc<MonsterData>> {
        self.monster_data.get(&id).cloned()
    }

    pub fn monster_id_by_name(&self, name: &str) -> Option<u32> {
        self.monster_name_ids.get(name).copied()
    }

    pub fn skill_data(&self, id: u32) -> Option<Arc<SkillData>> {
        self.skill_data.get(&id).cloned()
    }

    pub fn skill_ids_by_function(&self, function_id: u16) -> BTreeSet<u32> {
        self.skill_function_ids
            .get(&function_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn item_data(&self, id: u32) -> Option<Arc<ItemData>> {
        self.item_data.get(&id).cloned()
    }

    pub fn equipment_set_data(&self, id: u32) -> Option<Arc<EquipmentSetData>> {
        self.equipment_set_data.get(&id).cloned()
    }

    pub fn set_ids_by_equipment_item(&self, item_id: u32) -> BTreeSet<u32> {
        self.equipment_set_items
            .get(&item_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dynamic_map_data(&self, id: u32) -> Option<Arc<DynamicMapData>> {
        self.dynamic_map_data.get(&id).cloned()
    }

    pub fn zone_geometry_data(&self, id: u32) -> Option<Arc<ZoneGeometryData>> {
        self.zone_geometry_data.get(&id).cloned()
    }

    pub fn status_effect_data(&self, id: u32) -> Option<Arc<StatusEffectData>> {
        self.status_effect_data.get(&id).cloned()
    }

    pub fn expertise_data(&self, id: u8) -> Option<Arc<ExpertiseData>> {
        self.expertise_data.get(&id).cloned()
    }

    pub fn shop_product_data(&self, id: u16) -> Option<Arc<ShopProductData>> {
        self.shop_product_data.get(&id).cloned()
    }

    pub fn title_data(&self, id: u16) -> Option<Arc<TitleData>> {
        self.title_data.get(&id).cloned()
    }

    pub fn valuable_data(&self, id: u16) -> Option<Arc<ValuableData>> {
        self.valuable_data.get(&id).cloned()
    }

    pub fn npc_appearance_data(&self, id: u32) -> Option<Arc<NpcAppearanceData>> {
        self.npc_appearance_data.get(&id).cloned()
    }

    pub fn object_appearance_data(&self, id: u32) -> Option<Arc<ObjectAppearanceData>> {
        self.object_appearance_data.get(&id).cloned()
    }

    pub fn level_up_data(&self, id: u32) -> Option<Arc<MonsterLevelUpData>> {
        self.level_up_data.get(&id).cloned()
    }

    /// Fusion results key on the unordered monster pair.
    pub fn fusion_data(&self, first_id: u32, second_id: u32) -> Option<Arc<FusionData>> {
        self.fusion_data
            .get(&(first_id, second_id))
            .or_else(|| self.fusion_data.get(&(second_id, first_id)))
            .cloned()
    }

    pub fn s_item_data(&self, id: u32) -> Option<Arc<SItemData>> {
        self.s_item_data.get(&id).cloned()
    }

    pub fn s_status_data(&self, id: u32) -> Option<Arc<SStatusData>> {
        self.s_status_data.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use std::fs;

    fn store_with_table(tag: &str, file: &str, data: &[u8], encrypted: bool) -> DataStore {
        let root = std::env::temp_dir().join(format!(
            "kestrel_catalog_{tag}_{}",
            std::process::id()
        ));
        fs::create_dir_all(root.join("BinaryData")).unwrap();

        let mut store = DataStore::new();
        store
            .add_search_path(root.to_str().unwrap(), true)
            .unwrap();

        let path = format!("/BinaryData/{file}");
        if encrypted {
            store.encrypt_file(&path, data).unwrap();
        } else {
            store.write_file(&path, data).unwrap();
        }
        store
    }

    fn monster_table() -> Vec<u8> {
        let mut builder = BinaryTableBuilder::new();
        builder
            .begin_entry()
            .u32(1001)
            .string(Encoding::Cp932, "ピクシー")
            .u8(2)
            .u8(3)
            .i32(55)
            .i32(30)
            .u16(7)
            .u16(5)
            .list_u32(&[10, 20]);
        builder
            .begin_entry()
            .u32(1002)
            .string(Encoding::Cp932, "スライム")
            .u8(1)
            .u8(1)
            .i32(20)
            .i32(0)
            .u16(3)
            .u16(1)
            .list_u32(&[]);
        builder.build(2)
    }

    #[test]
    fn test_load_encrypted_table_with_indexes() {
        let store = store_with_table("monsters", "MonsterData.sbin", &monster_table(), true);

        let (records, ok) =
            DefinitionCatalog::load_binary_data::<MonsterData>(&store, "MonsterData.sbin", true, 2);
        assert!(ok);
        assert_eq!(records.len(), 2);

        let mut catalog = DefinitionCatalog::new();
        for record in records {
            catalog.register_monster(record);
        }

        assert_eq!(catalog.monster_data(1001).unwrap().name, "ピクシー");
        assert_eq!(catalog.monster_id_by_name("スライム"), Some(1002));
        assert!(catalog.monster_data(9999).is_none());
    }

    #[test]
    fn test_table_count_verification_fails_load() {
        let store = store_with_table("badcount", "MonsterData.sbin", &monster_table(), true);

        let (records, ok) =
            DefinitionCatalog::load_binary_data::<MonsterData>(&store, "MonsterData.sbin", true, 5);
        assert!(!ok);
        assert!(records.is_empty());
    }

    #[test]
    fn test_truncated_table_returns_partial_count() {
        let mut data = monster_table();
        data.truncate(data.len() - 6);
        let store = store_with_table("trunc", "MonsterData.sbin", &data, true);

        let (records, ok) =
            DefinitionCatalog::load_binary_data::<MonsterData>(&store, "MonsterData.sbin", true, 2);
        assert!(!ok);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_skill_function_index() {
        let mut catalog = DefinitionCatalog::new();
        for (id, function_id) in [(1u32, 7u16), (2, 7), (3, 9)] {
            catalog.register_skill(Arc::new(SkillData {
                id,
                function_id,
                ..Default::default()
            }));
        }

        assert_eq!(
            catalog.skill_ids_by_function(7),
            BTreeSet::from([1, 2])
        );
        assert!(catalog.skill_ids_by_function(1).is_empty());
    }

    #[test]
    fn test_equipment_set_index_skips_empty_slots() {
        let mut catalog = DefinitionCatalog::new();
        catalog.register_equipment_set(Arc::new(EquipmentSetData {
            id: 5,
            name: "set".into(),
            item_ids: vec![100, 0, 200],
            bonus_ids: vec![],
        }));

        assert_eq!(catalog.set_ids_by_equipment_item(100), BTreeSet::from([5]));
        assert!(catalog.set_ids_by_equipment_item(0).is_empty());
    }

    #[test]
    fn test_fusion_pair_is_unordered() {
        let mut catalog = DefinitionCatalog::new();
        catalog.fusion_data.insert(
            (10, 20),
            Arc::new(FusionData {
                id: 1,
                result_id: 30,
                first_id: 10,
                second_id: 20,
            }),
        );

        assert_eq!(catalog.fusion_data(10, 20).unwrap().result_id, 30);
        assert_eq!(catalog.fusion_data(20, 10).unwrap().result_id, 30);
    }

    #[test]
    fn test_runtime_registration() {
        let mut catalog = DefinitionCatalog::new();
        catalog.register_s_item(Arc::new(SItemData {
            id: 42,
            tokusei_ids: vec![1, 2],
        }));
        assert_eq!(catalog.s_item_data(42).unwrap().tokusei_ids, vec![1, 2]);
    }
}
