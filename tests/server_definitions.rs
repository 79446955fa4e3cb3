//! End-to-end server definition loading from a real directory tree.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use kestrel::catalog::{DefinitionCatalog, ItemData, MonsterData, ZoneGeometryData};
use kestrel::datastore::DataStore;
use kestrel::serverdata::ServerDataManager;

struct TestTree {
    root: PathBuf,
}

impl TestTree {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "kestrel_sdm_{tag}_{}",
            std::process::id()
        ));
        fs::remove_dir_all(&root).ok();
        for dir in [
            "zones/partial",
            "events",
            "shops",
            "scripts",
            "data/dropset",
            "data/zoneinstance",
        ] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        Self { root }
    }

    fn write(&self, rel: &str, contents: &str) {
        fs::write(self.root.join(rel), contents).unwrap();
    }

    fn store(&self) -> DataStore {
        let mut store = DataStore::new();
        store
            .add_search_path(self.root.to_str().unwrap(), true)
            .unwrap();
        store
    }
}

impl Drop for TestTree {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.root).ok();
    }
}

fn catalog_with_basics() -> DefinitionCatalog {
    let mut catalog = DefinitionCatalog::new();
    catalog.register_monster(Arc::new(MonsterData {
        id: 1001,
        name: "Gremlin".into(),
        ..Default::default()
    }));
    catalog.register_item(Arc::new(ItemData {
        id: 10,
        name: "Bead".into(),
        ..Default::default()
    }));
    catalog.register_zone_geometry(Arc::new(ZoneGeometryData {
        id: 100,
        name: "Field".into(),
        ..Default::default()
    }));
    catalog
}

fn write_valid_tree(tree: &TestTree) {
    tree.write(
        "zones/z100.xml",
        r#"<zone id="100" dynamicMapID="1100" dropSetIDs="1">
             <npc id="1" spotID="5">
               <action type="startEvent" eventID="npc_greet"/>
             </npc>
             <spawn id="1" enemyType="1001" dropSetIDs="2"/>
             <spawnGroup id="10"><spawn spawnID="1" count="2"/></spawnGroup>
             <spawnLocationGroup id="20" groupIDs="10" respawnTime="30">
               <location x="0" y="0" width="100" height="100"/>
             </spawnLocationGroup>
           </zone>"#,
    );
    tree.write(
        "zones/partial/p1.xml",
        r#"<partial id="1" autoApply="true" dynamicMapIDs="1100">
             <spawn id="1" enemyType="0" dropSetIDs="1"/>
           </partial>"#,
    );
    tree.write(
        "zones/partial/p2.xml",
        r#"<partial id="2" dynamicMapIDs="1100">
             <npc id="9" spotID="5"/>
           </partial>"#,
    );
    tree.write(
        "events/npc.xml",
        r#"<events>
             <event id="npc_greet" type="prompt" messageID="1">
               <choice messageID="2" next="npc_bye"/>
             </event>
             <event id="npc_bye" type="direction" direction="4"/>
           </events>"#,
    );
    tree.write(
        "data/dropset/sets.xml",
        r#"<dropsets>
             <dropset id="1">
               <drop itemType="10" minStack="1" maxStack="3" rate="50.0"/>
             </dropset>
             <dropset id="2">
               <drop itemType="10" minStack="1" maxStack="1" rate="5.0"/>
             </dropset>
           </dropsets>"#,
    );
    tree.write(
        "shops/weapons.xml",
        r#"<shop shopID="7" name="Weapons">
             <product itemID="10" basePrice="100" trend="0"/>
           </shop>"#,
    );
    tree.write(
        "scripts/wolf_ai.lua",
        r#"
        function define(script)
            script.Name = "WolfPack"
            script.Type = "ai"
        end
        function prepare(entity) end
        "#,
    );
    tree.write(
        "scripts/flag_check.lua",
        r#"
        function define(script)
            script.Name = "FlagCheck"
            script.Type = "eventCondition"
        end
        function check(ctx) return true end
        "#,
    );
}

#[test]
fn test_full_tree_loads_and_cross_references() {
    let tree = TestTree::new("valid");
    write_valid_tree(&tree);

    let catalog = catalog_with_basics();
    let mut manager = ServerDataManager::new();
    manager.load_data(&tree.store(), Some(&catalog)).unwrap();

    assert!(manager.get_event("npc_greet").is_some());
    assert!(manager.get_shop_data(7).is_some());
    assert!(manager.get_ai_script("WolfPack").is_some());
    assert!(manager.get_script("FlagCheck").is_some());
    assert_eq!(manager.get_drop_set_data(1).unwrap().drops.len(), 1);

    // The auto partial merged extra drop sets onto spawn 1.
    let zone = manager
        .get_zone_data(100, 1100, true, &BTreeSet::new())
        .unwrap();
    assert_eq!(zone.spawns[&1].enemy_type, 1001);
    assert_eq!(zone.spawns[&1].drop_set_ids, vec![2, 1]);

    // Raw fetch keeps the unmerged definition.
    let raw = manager
        .get_zone_data(100, 1100, false, &BTreeSet::new())
        .unwrap();
    assert_eq!(raw.spawns[&1].drop_set_ids, vec![2]);
    assert_eq!(raw.npcs.len(), 1);
}

#[test]
fn test_partial_application_is_deterministic() {
    let tree = TestTree::new("determ");
    write_valid_tree(&tree);

    let catalog = catalog_with_basics();
    let mut manager = ServerDataManager::new();
    manager.load_data(&tree.store(), Some(&catalog)).unwrap();

    let extras = BTreeSet::from([2]);
    let a = manager.get_zone_data(100, 1100, true, &extras).unwrap();
    let b = manager.get_zone_data(100, 1100, true, &extras).unwrap();
    assert_eq!(*a, *b);

    // The extra partial displaced NPC 1 (same spot) with NPC 9.
    let npc_ids: Vec<u32> = a.npcs.iter().map(|n| n.id).collect();
    assert_eq!(npc_ids, vec![9]);
}

#[test]
fn test_unknown_enemy_type_fails_load() {
    let tree = TestTree::new("bad_enemy");
    write_valid_tree(&tree);
    tree.write(
        "zones/z101.xml",
        r#"<zone id="100" dynamicMapID="1101">
             <spawn id="1" enemyType="4242"/>
           </zone>"#,
    );

    let catalog = catalog_with_basics();
    let mut manager = ServerDataManager::new();
    let err = manager
        .load_data(&tree.store(), Some(&catalog))
        .unwrap_err();
    assert!(format!("{err}").contains("error"));
}

#[test]
fn test_unresolved_event_fails_load() {
    let tree = TestTree::new("bad_event");
    write_valid_tree(&tree);
    tree.write(
        "events/broken.xml",
        r#"<events>
             <event id="broken" type="performActions">
               <action type="startEvent" eventID="ghost_event"/>
             </event>
           </events>"#,
    );

    let catalog = catalog_with_basics();
    let mut manager = ServerDataManager::new();
    assert!(manager.load_data(&tree.store(), Some(&catalog)).is_err());
}

#[test]
fn test_undefined_item_in_drop_set_fails_load() {
    let tree = TestTree::new("bad_item");
    write_valid_tree(&tree);
    tree.write(
        "data/dropset/bad.xml",
        r#"<dropsets>
             <dropset id="3">
               <drop itemType="999999" minStack="1" maxStack="1" rate="1.0"/>
             </dropset>
           </dropsets>"#,
    );

    let catalog = catalog_with_basics();
    let mut manager = ServerDataManager::new();
    assert!(manager.load_data(&tree.store(), Some(&catalog)).is_err());
}

#[test]
fn test_duplicate_script_name_fails_load() {
    let tree = TestTree::new("dup_script");
    write_valid_tree(&tree);
    tree.write(
        "scripts/wolf_ai_copy.lua",
        r#"
        function define(script)
            script.Name = "WolfPack"
            script.Type = "ai"
        end
        function prepare(entity) end
        "#,
    );

    let catalog = catalog_with_basics();
    let mut manager = ServerDataManager::new();
    assert!(manager.load_data(&tree.store(), Some(&catalog)).is_err());
}

#[test]
fn test_player_action_in_trigger_context_fails_load() {
    let tree = TestTree::new("bad_ctx");
    write_valid_tree(&tree);
    tree.write(
        "zones/z102.xml",
        r#"<zone id="100" dynamicMapID="1102">
             <trigger on="onTick">
               <action type="zoneChange" zoneID="100" sourceContext="enemies"/>
             </trigger>
           </zone>"#,
    );

    let catalog = catalog_with_basics();
    let mut manager = ServerDataManager::new();
    assert!(manager.load_data(&tree.store(), Some(&catalog)).is_err());
}
