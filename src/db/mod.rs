//! Persistence core.
//!
//! Bridges the generated persistent object types and the relational store.
//! Two backends share identical semantics: [`mariadb::MariaDb`] and
//! [`sqlite::SqliteDb`]. Each process opens one logical database; callers
//! are worker threads, so the public surface is synchronous and sqlx work
//! runs on a dedicated runtime.

pub mod bind;
pub mod changeset;
pub mod mariadb;
pub mod metadata;
pub mod object;
pub mod query;
pub mod sqlite;

pub use bind::{AsBindValue, Bind, BindValue};
pub use changeset::{ChangeSet, ExplicitUpdate, Operation, OperationalChangeSet, StandardChangeSet};
pub use mariadb::MariaDb;
pub use metadata::{type_hash, FieldDef, FieldType, TypeMetadata};
pub use object::{
    load_object_by_uuid, new_object, object_by_uuid, register_object, register_type,
    registered_metadata, registered_type_hashes, type_hash_by_name, unregister_object, ObjectRef,
    Persistent, RowValues,
};
pub use query::PreparedSql;
pub use sqlite::SqliteDb;

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Runtime;

use crate::datastore::DataStore;
use crate::error::{Error, Result};
use crate::script::ScriptEngine;

// Single persistent runtime for all sqlx work. Pool connections are bound to
// a reactor; reusing one runtime keeps pool I/O registered with the correct
// reactor while worker threads stay synchronous.
fn runtime() -> &'static Runtime {
    static DB_RUNTIME: OnceLock<Runtime> = OnceLock::new();
    DB_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build database runtime")
    })
}

pub(crate) fn blocking_run<F: Future>(f: F) -> F::Output {
    runtime().block_on(f)
}

/// One logical database. Both dialects implement the same contract; the
/// enclosing server decides which one backs the process.
pub trait Database: Send + Sync {
    fn dialect(&self) -> &'static str;

    fn is_open(&self) -> bool;

    /// Open the configured database, creating it first when the backend
    /// reports it absent.
    fn open(&self) -> Result<()>;

    /// Run a statement, returning the affected row count.
    fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a statement with positional binds.
    fn execute_with(&self, sql: &str, binds: &[BindValue]) -> Result<u64>;

    /// Run a query expected to produce a single integer cell.
    fn fetch_scalar_i64(&self, sql: &str, binds: &[BindValue]) -> Result<i64>;

    /// Compare every mapped table against the registry and create, alter,
    /// or (with auto-update) archive-and-recreate as needed. Lookup-key
    /// columns missing an index get one retroactively.
    fn verify_and_setup_schema(&self, rebuild: bool) -> Result<()>;

    fn load_objects(&self, type_hash: u64, filter: Option<&Bind>) -> Result<Vec<ObjectRef>>;

    fn load_single_object(
        &self,
        type_hash: u64,
        filter: Option<&Bind>,
    ) -> Result<Option<ObjectRef>>;

    fn insert_single_object(&self, obj: &ObjectRef) -> Result<()>;

    fn update_single_object(&self, obj: &ObjectRef) -> Result<()>;

    fn delete_single_object(&self, obj: &ObjectRef) -> Result<()>;

    /// Apply a change set atomically. A failed statement rolls the whole
    /// transaction back; a failed rollback is logged as critical.
    fn process_change_set(&self, changes: ChangeSet) -> Result<()>;

    /// Full database setup: schema verification, the `Migrations` ledger
    /// table, then any unapplied migration scripts found in the data store.
    fn setup(
        &self,
        rebuild: bool,
        store: Option<&DataStore>,
        migration_directory: &str,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Persistence(
                "trying to set up a database that is not open".into(),
            ));
        }

        self.verify_and_setup_schema(rebuild)?;

        self.execute(
            "CREATE TABLE IF NOT EXISTS `Migrations` (`Migration` varchar(128) PRIMARY KEY);",
        )?;

        if let Some(store) = store {
            run_migrations(self, store, migration_directory)?;
        }

        Ok(())
    }
}

/// Run every `*.lua` migration under `migration_directory` that is not yet
/// recorded in the `Migrations` table, lexicographically. A failing script
/// aborts the setup.
pub fn run_migrations<D: Database + ?Sized>(
    db: &D,
    store: &DataStore,
    migration_directory: &str,
) -> Result<()> {
    let listing = store
        .get_listing(migration_directory, false, false)
        .map_err(|_| Error::Schema("migration directory does not exist".into()))?;

    let mut files = listing.files;
    files.sort();

    let check = PreparedSql::rewrite(
        "SELECT COUNT(`Migration`) FROM `Migrations` WHERE `Migration` = :file",
    );
    let record = PreparedSql::rewrite("INSERT INTO `Migrations` (`Migration`) VALUES(:file)");

    for file in files {
        let Some(name) = file.strip_suffix(".lua") else {
            continue;
        };

        let count = db.fetch_scalar_i64(&check.sql, &[BindValue::Text(name.to_string())])?;
        if count != 0 {
            continue;
        }

        let path = format!("{migration_directory}/{file}");
        let source = store.read_file(&path)?;
        let source = String::from_utf8(source)
            .map_err(|_| Error::Schema(format!("migration is not valid UTF-8: {path}")))?;

        apply_migration(db, name, &path, &source)?;

        db.execute_with(&record.sql, &[BindValue::Text(name.to_string())])?;
    }

    Ok(())
}

/// Evaluate one migration script and invoke its `up(db)` function. The
/// script receives a handle exposing `execute(sql)`.
fn apply_migration<D: Database + ?Sized>(
    db: &D,
    name: &str,
    path: &str,
    source: &str,
) -> Result<()> {
    tracing::info!("[db] applying migration {name}");

    let engine = ScriptEngine::new();
    engine
        .eval(source, path)
        .map_err(|e| Error::Schema(format!("migration script failed: {path}: {e}")))?;

    let up = engine
        .global_function("up")
        .ok_or_else(|| Error::Schema(format!("migration has no 'up' function: {path}")))?;

    engine
        .lua()
        .scope(|scope| {
            let api = engine.lua().create_table()?;
            let exec = scope.create_function(|_, sql: String| {
                db.execute(&sql).map_err(mlua::Error::external)
            })?;
            api.set("execute", exec)?;
            up.call::<()>(api)
        })
        .map_err(|e| Error::Schema(format!("migration script failed: {path}: {e}")))
}

/// Dialect-independent SQL builders shared by the backends.
pub(crate) mod sql {
    use super::bind::Bind;
    use super::metadata::TypeMetadata;

    pub fn insert(meta: &TypeMetadata) -> String {
        let columns: Vec<String> = std::iter::once("`UID`".to_string())
            .chain(meta.fields.iter().map(|f| format!("`{}`", f.name)))
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT INTO `{}` ({}) VALUES ({});",
            meta.name,
            columns.join(", "),
            placeholders
        )
    }

    pub fn update(meta: &TypeMetadata, binds: &[Bind]) -> String {
        let sets: Vec<String> = binds.iter().map(|b| format!("`{}` = ?", b.column)).collect();
        format!(
            "UPDATE `{}` SET {} WHERE `UID` = ?;",
            meta.name,
            sets.join(", ")
        )
    }

    pub fn delete(meta: &TypeMetadata) -> String {
        format!("DELETE FROM `{}` WHERE `UID` = ?;", meta.name)
    }

    pub fn select(meta: &TypeMetadata, filter: Option<&Bind>) -> String {
        match filter {
            Some(bind) => format!(
                "SELECT * FROM `{}` WHERE `{}` = ?;",
                meta.name, bind.column
            ),
            None => format!("SELECT * FROM `{}`;", meta.name),
        }
    }

    /// The explicit-update statement plus the column order its binds follow:
    /// changed values first, then the UID, then the expected values.
    pub fn explicit_update(meta: &TypeMetadata, columns: &[String]) -> String {
        let sets: Vec<String> = columns.iter().map(|c| format!("`{c}` = ?")).collect();
        let guards: Vec<String> = columns.iter().map(|c| format!("`{c}` = ?")).collect();
        format!(
            "UPDATE `{}` SET {} WHERE `UID` = ? AND {};",
            meta.name,
            sets.join(", "),
            guards.join(" AND ")
        )
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::db::metadata::{FieldDef, FieldType};

        const META: TypeMetadata = TypeMetadata {
            name: "Item",
            fields: &[
                FieldDef {
                    name: "name",
                    ftype: FieldType::String,
                    lookup_key: false,
                },
                FieldDef {
                    name: "qty",
                    ftype: FieldType::S32,
                    lookup_key: true,
                },
            ],
        };

        #[test]
        fn test_insert_sql() {
            assert_eq!(
                insert(&META),
                "INSERT INTO `Item` (`UID`, `name`, `qty`) VALUES (?, ?, ?);"
            );
        }

        #[test]
        fn test_select_sql() {
            assert_eq!(select(&META, None), "SELECT * FROM `Item`;");
            let bind = Bind::new("qty", crate::db::BindValue::Int(1));
            assert_eq!(
                select(&META, Some(&bind)),
                "SELECT * FROM `Item` WHERE `qty` = ?;"
            );
        }

        #[test]
        fn test_explicit_update_sql() {
            let sql = explicit_update(&META, &["qty".to_string()]);
            assert_eq!(
                sql,
                "UPDATE `Item` SET `qty` = ? WHERE `UID` = ? AND `qty` = ?;"
            );
        }
    }
}
