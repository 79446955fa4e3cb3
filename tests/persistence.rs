//! Persistence-layer scenarios on the embedded backend.

use std::sync::{Arc, OnceLock, RwLock};

use kestrel::db::{
    load_object_by_uuid, object_by_uuid, BindValue, ChangeSet, Database, ExplicitUpdate,
    OperationalChangeSet, Persistent, SqliteDb, StandardChangeSet,
};
use kestrel::define_persistent;

define_persistent! {
    /// Stand-in for a generated gameplay object.
    pub struct Item {
        name, set_name: String => String,
        qty, set_qty: i32 => S32 lookup,
    }
}

define_persistent! {
    pub struct Fighter {
        hp, set_hp: i32 => S32,
        mp, set_mp: i32 => S32,
    }
}

fn register_types() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        Item::register_type().unwrap();
        Fighter::register_type().unwrap();
    });
}

fn open_db() -> SqliteDb {
    register_types();
    let db = SqliteDb::in_memory();
    db.open().unwrap();
    db
}

#[test]
fn test_schema_evolution_adds_column_and_index() {
    let db = open_db();

    // A database from an older build: Item without qty, one stale row.
    db.execute("CREATE TABLE `Item` (`UID` varchar(36) PRIMARY KEY, `name` text);")
        .unwrap();
    db.execute_with(
        "INSERT INTO `Item` (`UID`, `name`) VALUES (?, ?);",
        &[
            BindValue::Text("0c0f3c36-6bd8-4b1c-92d7-61094c62ad1a".into()),
            BindValue::Text("old sword".into()),
        ],
    )
    .unwrap();

    db.setup(false, None, "/migrations").unwrap();

    // The new column exists and carries the type default.
    let qty = db
        .fetch_scalar_i64("SELECT `qty` FROM `Item`;", &[])
        .unwrap();
    assert_eq!(qty, 0);

    // The lookup-key column gained its index.
    let indexes = db
        .fetch_scalar_i64(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_item_qty';",
            &[],
        )
        .unwrap();
    assert_eq!(indexes, 1);

    // A second setup run verifies cleanly.
    db.setup(false, None, "/migrations").unwrap();
}

#[test]
fn test_insert_load_respects_identity_cache() {
    let db = open_db();
    db.setup(false, None, "/migrations").unwrap();

    let mut item = Item::new();
    item.set_name("healing herb".into());
    item.set_qty(7);
    let obj: kestrel::db::ObjectRef = Arc::new(RwLock::new(item));
    let uuid = kestrel::db::register_object(&obj, None).unwrap();

    db.insert_single_object(&obj).unwrap();

    // A cached load returns the same instance.
    let loaded = load_object_by_uuid(Item::type_hash(), &db, uuid, false).unwrap();
    assert!(Arc::ptr_eq(&obj, &loaded));
    assert!(Arc::ptr_eq(&obj, &object_by_uuid(uuid).unwrap()));

    // A reload re-reads the row but rebinds the same instance.
    db.execute_with(
        "UPDATE `Item` SET `qty` = ? WHERE `UID` = ?;",
        &[BindValue::Int(99), BindValue::Text(uuid.to_string())],
    )
    .unwrap();
    let reloaded = load_object_by_uuid(Item::type_hash(), &db, uuid, true).unwrap();
    assert!(Arc::ptr_eq(&obj, &reloaded));
    {
        let guard = obj.read().unwrap();
        let item = guard.as_any().downcast_ref::<Item>().unwrap();
        assert_eq!(*item.qty(), 99);
    }

    kestrel::db::unregister_object(&obj);
}

#[test]
fn test_standard_change_set_rolls_back_as_a_unit() {
    let db = open_db();
    db.setup(false, None, "/migrations").unwrap();

    let good = {
        let mut item = Item::new();
        item.set_name("ok".into());
        Arc::new(RwLock::new(item)) as kestrel::db::ObjectRef
    };
    let uuid = kestrel::db::register_object(&good, None).unwrap();

    // Inserting the same UID twice fails the batch; the first insert must
    // not survive the rollback.
    let twin = kestrel::db::new_object(Item::type_hash()).unwrap();
    twin.write().unwrap().set_uuid(uuid);

    let mut changes = StandardChangeSet::new();
    changes.insert(Arc::clone(&good));
    changes.insert(twin);

    assert!(db.process_change_set(ChangeSet::Standard(changes)).is_err());

    let rows = db
        .fetch_scalar_i64("SELECT COUNT(*) FROM `Item`;", &[])
        .unwrap();
    assert_eq!(rows, 0);

    kestrel::db::unregister_object(&good);
}

#[test]
fn test_explicit_update_contention() {
    let db = open_db();
    db.setup(false, None, "/migrations").unwrap();

    let fighter = {
        let mut f = Fighter::new();
        f.set_hp(100);
        f.set_mp(50);
        Arc::new(RwLock::new(f)) as kestrel::db::ObjectRef
    };
    let uuid = kestrel::db::register_object(&fighter, None).unwrap();
    db.insert_single_object(&fighter).unwrap();

    // Two workers race the same guarded change: expected Hp=100, set Hp=80.
    // Both snapshots are taken before either commits.
    let mut first = ExplicitUpdate::new(Arc::clone(&fighter));
    assert!(first.set_int_from("hp", 80, 100));
    let mut second = ExplicitUpdate::new(Arc::clone(&fighter));
    assert!(second.set_int_from("hp", 80, 100));

    let mut winner = OperationalChangeSet::new();
    winner.add_explicit(first);
    db.process_change_set(ChangeSet::Operational(winner)).unwrap();

    // The loser's expectation no longer holds: zero rows match, the
    // transaction rolls back, and the stored value stays the winner's.
    let mut loser = OperationalChangeSet::new();
    loser.add_explicit(second);
    assert!(db.process_change_set(ChangeSet::Operational(loser)).is_err());

    let hp = db
        .fetch_scalar_i64("SELECT `hp` FROM `Fighter`;", &[])
        .unwrap();
    assert_eq!(hp, 80);

    // The in-memory object reflects the winner after its post-commit
    // reload.
    {
        let guard = fighter.read().unwrap();
        let f = guard.as_any().downcast_ref::<Fighter>().unwrap();
        assert_eq!(*f.hp(), 80);
    }

    // The losing worker re-loads and sees the winner's value too.
    let reloaded = load_object_by_uuid(Fighter::type_hash(), &db, uuid, true).unwrap();
    {
        let guard = reloaded.read().unwrap();
        let f = guard.as_any().downcast_ref::<Fighter>().unwrap();
        assert_eq!(*f.hp(), 80);
    }

    kestrel::db::unregister_object(&fighter);
}

#[test]
fn test_migrations_run_once_in_order() {
    let db = open_db();

    let root = std::env::temp_dir().join(format!("kestrel_migrations_{}", std::process::id()));
    std::fs::create_dir_all(root.join("migrations")).unwrap();
    std::fs::write(
        root.join("migrations/0001_counters.lua"),
        r#"
        function up(db)
            db.execute("CREATE TABLE `Counters` (`UID` varchar(36) PRIMARY KEY, `n` int);")
        end
        "#,
    )
    .unwrap();
    std::fs::write(
        root.join("migrations/0002_seed.lua"),
        r#"
        function up(db)
            db.execute("INSERT INTO `Counters` (`UID`, `n`) VALUES ('seed', 1);")
        end
        "#,
    )
    .unwrap();
    // Non-script files are ignored.
    std::fs::write(root.join("migrations/readme.txt"), "not a migration").unwrap();

    let mut store = kestrel::datastore::DataStore::new();
    store
        .add_search_path(root.to_str().unwrap(), true)
        .unwrap();

    db.setup(false, Some(&store), "/migrations").unwrap();

    assert_eq!(
        db.fetch_scalar_i64("SELECT COUNT(*) FROM `Counters`;", &[])
            .unwrap(),
        1
    );
    assert_eq!(
        db.fetch_scalar_i64("SELECT COUNT(*) FROM `Migrations`;", &[])
            .unwrap(),
        2
    );

    // Re-running the setup applies nothing new.
    db.setup(false, Some(&store), "/migrations").unwrap();
    assert_eq!(
        db.fetch_scalar_i64("SELECT COUNT(*) FROM `Counters`;", &[])
            .unwrap(),
        1
    );

    std::fs::remove_dir_all(root).ok();
}

#[test]
fn test_failing_migration_aborts_setup() {
    let db = open_db();

    let root = std::env::temp_dir().join(format!("kestrel_badmig_{}", std::process::id()));
    std::fs::create_dir_all(root.join("migrations")).unwrap();
    std::fs::write(
        root.join("migrations/0001_broken.lua"),
        r#"
        function up(db)
            db.execute("THIS IS NOT SQL;")
        end
        "#,
    )
    .unwrap();

    let mut store = kestrel::datastore::DataStore::new();
    store
        .add_search_path(root.to_str().unwrap(), true)
        .unwrap();

    assert!(db.setup(false, Some(&store), "/migrations").is_err());
    // The failed migration is not recorded.
    assert_eq!(
        db.fetch_scalar_i64("SELECT COUNT(*) FROM `Migrations`;", &[])
            .unwrap(),
        0
    );

    std::fs::remove_dir_all(root).ok();
}
