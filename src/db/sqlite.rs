//! SQLite backend.
//!
//! Mirrors the MariaDB backend's semantics on an embedded database: schema
//! verification through `sqlite_master` and `PRAGMA table_info`, the same
//! change-set transaction shape, and the same explicit-update contract.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

use super::bind::{Bind, BindValue};
use super::changeset::{
    ChangeSet, ExplicitUpdate, Operation, OperationalChangeSet, StandardChangeSet,
};
use super::metadata::{FieldType, TypeMetadata};
use super::object::{self, ObjectRef, RowValues};
use super::{blocking_run, sql, Database};

pub struct SqliteDb {
    url: String,
    auto_schema_update: bool,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteDb {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            url: format!("sqlite://{}?mode=rwc", config.database_name),
            auto_schema_update: config.auto_schema_update,
            pool: Mutex::new(None),
        }
    }

    /// An in-memory database, used by tests and tooling.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            auto_schema_update: true,
            pool: Mutex::new(None),
        }
    }

    fn pool(&self) -> Result<SqlitePool> {
        self.pool
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Persistence("database is not open".into()))
    }

    fn column_type(ftype: FieldType) -> &'static str {
        match ftype {
            FieldType::String => "text",
            FieldType::Ref => "varchar(36)",
            FieldType::Bool => "int",
            FieldType::S8
            | FieldType::S16
            | FieldType::S32
            | FieldType::U8
            | FieldType::U16
            | FieldType::Enum => "int",
            FieldType::U32 | FieldType::S64 => "bigint",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::U64
            | FieldType::Array
            | FieldType::List
            | FieldType::Set
            | FieldType::Map => "blob",
        }
    }

    fn bind_value<'q>(
        q: Query<'q, Sqlite, SqliteArguments<'q>>,
        value: &BindValue,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match value {
            BindValue::Text(s) => q.bind(s.clone()),
            BindValue::Blob(b) => q.bind(b.clone()),
            BindValue::Uuid(u) => q.bind(u.to_string()),
            BindValue::Int(i) => q.bind(*i),
            BindValue::BigInt(i) => q.bind(*i),
            // SQLite has a single REAL affinity; floats widen on the way in.
            BindValue::Float(f) => q.bind(*f as f64),
            BindValue::Double(f) => q.bind(*f),
            BindValue::Bool(b) => q.bind(*b),
        }
    }

    fn decode_row(meta: &TypeMetadata, row: &SqliteRow) -> Result<(Uuid, RowValues)> {
        let uid: String = row.try_get("UID")?;
        let uuid = Uuid::parse_str(&uid)
            .map_err(|_| Error::Persistence(format!("bad UID value: {uid}")))?;

        let mut values = RowValues::new();
        for field in meta.fields {
            let value = match field.ftype {
                FieldType::String | FieldType::Ref => {
                    BindValue::Text(row.try_get::<String, _>(field.name)?)
                }
                FieldType::Bool => BindValue::Bool(row.try_get::<bool, _>(field.name)?),
                FieldType::S8
                | FieldType::S16
                | FieldType::S32
                | FieldType::U8
                | FieldType::U16
                | FieldType::Enum => BindValue::Int(row.try_get::<i32, _>(field.name)?),
                FieldType::U32 | FieldType::S64 => {
                    BindValue::BigInt(row.try_get::<i64, _>(field.name)?)
                }
                FieldType::Float => {
                    BindValue::Float(row.try_get::<f64, _>(field.name)? as f32)
                }
                FieldType::Double => BindValue::Double(row.try_get::<f64, _>(field.name)?),
                FieldType::U64
                | FieldType::Array
                | FieldType::List
                | FieldType::Set
                | FieldType::Map => BindValue::Blob(row.try_get::<Vec<u8>, _>(field.name)?),
            };
            values.insert(field.name.to_string(), value);
        }

        Ok((uuid, values))
    }

    async fn insert_on(conn: &mut SqliteConnection, obj: &ObjectRef) -> Result<()> {
        let (meta, uuid, binds) = {
            let inner = obj.read().unwrap();
            (inner.meta(), inner.uuid(), inner.bind_values(true))
        };

        let statement = sql::insert(meta);
        let mut query = sqlx::query(&statement).bind(uuid.to_string());
        for bind in &binds {
            query = Self::bind_value(query, &bind.value);
        }

        query.execute(conn).await?;
        Ok(())
    }

    async fn update_on(conn: &mut SqliteConnection, obj: &ObjectRef) -> Result<()> {
        let (meta, uuid, binds) = {
            let inner = obj.read().unwrap();
            (inner.meta(), inner.uuid(), inner.bind_values(false))
        };

        if binds.is_empty() {
            return Ok(());
        }

        let statement = sql::update(meta, &binds);
        let mut query = sqlx::query(&statement);
        for bind in &binds {
            query = Self::bind_value(query, &bind.value);
        }
        query = query.bind(uuid.to_string());

        query.execute(conn).await?;
        Ok(())
    }

    async fn delete_on(conn: &mut SqliteConnection, obj: &ObjectRef) -> Result<()> {
        let (meta, uuid) = {
            let inner = obj.read().unwrap();
            (inner.meta(), inner.uuid())
        };

        sqlx::query(&sql::delete(meta))
            .bind(uuid.to_string())
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn explicit_on(conn: &mut SqliteConnection, update: &ExplicitUpdate) -> Result<()> {
        let changes = update.changes();
        let expected = update.expected();
        if changes.is_empty() {
            return Err(Error::Persistence("explicit update with no changes".into()));
        }

        let meta = update.record().read().unwrap().meta();
        let mut columns: Vec<String> = changes.keys().cloned().collect();
        columns.sort();

        for column in &columns {
            if !expected.contains_key(column) {
                return Err(Error::Persistence(format!(
                    "explicit update missing expectation for column {column}"
                )));
            }
        }

        let statement = sql::explicit_update(meta, &columns);
        let mut query = sqlx::query(&statement);
        for column in &columns {
            query = Self::bind_value(query, &changes[column].value);
        }
        query = query.bind(update.record_uuid().to_string());
        for column in &columns {
            query = Self::bind_value(query, &expected[column].value);
        }

        let affected = query.execute(conn).await?.rows_affected();
        if affected != 1 {
            return Err(Error::Persistence(format!(
                "explicit update affected {affected} row(s)"
            )));
        }
        Ok(())
    }

    async fn run_standard(&self, changes: &StandardChangeSet) -> Result<()> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;

        let applied = async {
            for obj in changes.inserts() {
                Self::insert_on(&mut *tx, obj).await?;
            }
            for obj in changes.updates() {
                Self::update_on(&mut *tx, obj).await?;
            }
            for obj in changes.deletes() {
                Self::delete_on(&mut *tx, obj).await?;
            }
            Ok(())
        }
        .await;

        match applied {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(re) = tx.rollback().await {
                    // If this happens the server may need to be shut down.
                    tracing::error!("[db] rollback failed: {re}");
                }
                Err(e)
            }
        }
    }

    async fn run_operational(&self, changes: &OperationalChangeSet) -> Result<()> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;

        let applied = async {
            for op in changes.operations() {
                match op {
                    Operation::Insert(obj) => Self::insert_on(&mut *tx, obj).await?,
                    Operation::Update(obj) => Self::update_on(&mut *tx, obj).await?,
                    Operation::Delete(obj) => Self::delete_on(&mut *tx, obj).await?,
                    Operation::Explicit(update) => Self::explicit_on(&mut *tx, update).await?,
                }
            }
            Ok(())
        }
        .await;

        match applied {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(re) = tx.rollback().await {
                    tracing::error!("[db] rollback failed: {re}");
                }
                Err(e)
            }
        }
    }

    fn finalize_change_set(&self, changes: &ChangeSet) -> Result<()> {
        match changes {
            ChangeSet::Standard(c) => {
                for obj in c.inserts().iter().chain(c.updates()) {
                    obj.write().unwrap().clear_dirty();
                }
                for obj in c.deletes() {
                    object::unregister_object(obj);
                }
                Ok(())
            }
            ChangeSet::Operational(c) => {
                for op in c.operations() {
                    match op {
                        Operation::Insert(obj) | Operation::Update(obj) => {
                            obj.write().unwrap().clear_dirty();
                        }
                        Operation::Delete(obj) => object::unregister_object(obj),
                        Operation::Explicit(update) => {
                            let meta = update.record().read().unwrap().meta();
                            let hash = super::metadata::type_hash(meta.name);
                            object::load_object_by_uuid(hash, self, update.record_uuid(), true)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    async fn verify_schema(&self, rebuild: bool) -> Result<()> {
        let pool = self.pool()?;

        tracing::info!("[db] verifying database table structure");

        let table_rows =
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table';")
                .fetch_all(&pool)
                .await?;

        let mut field_map: HashMap<String, HashMap<String, String>> = HashMap::new();
        for row in &table_rows {
            let table: String = row.try_get("name")?;
            let info_rows = sqlx::query(&format!("PRAGMA table_info('{table}');"))
                .fetch_all(&pool)
                .await?;

            let mut columns = HashMap::new();
            for info in &info_rows {
                let column: String = info.try_get("name")?;
                let declared: String = info.try_get("type")?;
                columns.insert(column.to_lowercase(), declared.to_lowercase());
            }
            field_map.insert(table.to_lowercase(), columns);
        }

        let index_rows =
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'index';")
                .fetch_all(&pool)
                .await?;

        let mut indexed: HashSet<String> = HashSet::new();
        for row in &index_rows {
            let index: String = row.try_get("name")?;
            indexed.insert(index.to_lowercase());
        }

        let mut metas: BTreeMap<&'static str, (u64, &'static TypeMetadata)> = BTreeMap::new();
        for hash in object::registered_type_hashes() {
            if let Some(meta) = object::registered_metadata(hash) {
                metas.insert(meta.name, (hash, meta));
            }
        }

        for (name, (hash, meta)) in metas {
            let table_key = name.to_lowercase();

            let mut creating = false;
            let mut recreating = false;
            let mut updating = false;
            let mut needs_index: HashSet<&'static str> = HashSet::new();

            match field_map.get(&table_key) {
                None => creating = true,
                Some(columns) => {
                    recreating = rebuild;

                    for field in meta.fields {
                        let column_key = field.name.to_lowercase();
                        let expected = Self::column_type(field.ftype)
                            .split('(')
                            .next()
                            .unwrap()
                            .to_string();

                        match columns.get(&column_key) {
                            None => updating = true,
                            Some(actual) => {
                                // Size specifiers are not part of the
                                // comparison.
                                let actual = actual.split('(').next().unwrap();
                                if actual != expected {
                                    recreating = true;
                                }
                            }
                        }

                        let index_name = format!("idx_{table_key}_{column_key}");
                        if field.lookup_key && !indexed.contains(&index_name) {
                            needs_index.insert(field.name);
                        }
                    }
                }
            }

            if recreating {
                if self.auto_schema_update {
                    tracing::info!("[db] archiving and recreating table '{name}'");
                    sqlx::query(&format!("DROP TABLE `{name}`;"))
                        .execute(&pool)
                        .await?;
                    creating = true;
                } else {
                    return Err(Error::Schema(format!(
                        "the schema for '{name}' does not match and cannot be used until \
                         it has been corrected"
                    )));
                }
            }

            if creating {
                tracing::info!("[db] creating table '{name}'");

                let mut ddl = format!(
                    "CREATE TABLE IF NOT EXISTS `{name}` (`UID` varchar(36) PRIMARY KEY"
                );
                for field in meta.fields {
                    ddl.push_str(&format!(
                        ",\n`{}` {}",
                        field.name,
                        Self::column_type(field.ftype)
                    ));
                }
                ddl.push_str(");");

                sqlx::query(&ddl).execute(&pool).await?;
            } else if updating {
                tracing::info!("[db] updating table '{name}'");

                let defaults: HashMap<String, Bind> = object::new_object(hash)
                    .map(|obj| {
                        obj.read()
                            .unwrap()
                            .bind_values(true)
                            .into_iter()
                            .map(|b| (b.column.clone(), b))
                            .collect()
                    })
                    .unwrap_or_default();

                let existing = &field_map[&table_key];
                for field in meta.fields {
                    if existing.contains_key(&field.name.to_lowercase()) {
                        continue;
                    }

                    sqlx::query(&format!(
                        "ALTER TABLE `{name}` ADD `{}` {};",
                        field.name,
                        Self::column_type(field.ftype)
                    ))
                    .execute(&pool)
                    .await?;

                    if let Some(default) = defaults.get(field.name) {
                        let statement = format!("UPDATE `{name}` SET `{}` = ?;", field.name);
                        Self::bind_value(sqlx::query(&statement), &default.value)
                            .execute(&pool)
                            .await?;
                    }

                    tracing::info!("[db] created column '{}'", field.name);
                }
            }

            if creating || !needs_index.is_empty() {
                for field in meta.fields {
                    if !field.lookup_key || (!creating && !needs_index.contains(field.name)) {
                        continue;
                    }

                    let column_key = field.name.to_lowercase();
                    let ddl = format!(
                        "CREATE INDEX IF NOT EXISTS idx_{table_key}_{column_key} \
                         ON `{name}`(`{}`);",
                        field.name
                    );
                    sqlx::query(&ddl).execute(&pool).await?;

                    tracing::info!("[db] created index idx_{table_key}_{column_key}");
                }
            }

            if !creating && !recreating && !updating && needs_index.is_empty() {
                tracing::debug!("[db] '{name}': verified");
            }
        }

        tracing::info!("[db] database verification complete");
        Ok(())
    }
}

impl Database for SqliteDb {
    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    fn is_open(&self) -> bool {
        self.pool.lock().unwrap().is_some()
    }

    fn open(&self) -> Result<()> {
        let pool = blocking_run(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(&self.url),
        )?;

        tracing::debug!("[db] connection established to '{}'", self.url);
        *self.pool.lock().unwrap() = Some(pool);
        Ok(())
    }

    fn execute(&self, statement: &str) -> Result<u64> {
        let pool = self.pool()?;
        let result = blocking_run(sqlx::query(statement).execute(&pool))?;
        Ok(result.rows_affected())
    }

    fn execute_with(&self, statement: &str, binds: &[BindValue]) -> Result<u64> {
        let pool = self.pool()?;
        let result = blocking_run(async {
            let mut query = sqlx::query(statement);
            for value in binds {
                query = Self::bind_value(query, value);
            }
            query.execute(&pool).await
        })?;
        Ok(result.rows_affected())
    }

    fn fetch_scalar_i64(&self, statement: &str, binds: &[BindValue]) -> Result<i64> {
        let pool = self.pool()?;
        let row = blocking_run(async {
            let mut query = sqlx::query(statement);
            for value in binds {
                query = Self::bind_value(query, value);
            }
            query.fetch_one(&pool).await
        })?;
        Ok(row.try_get(0)?)
    }

    fn verify_and_setup_schema(&self, rebuild: bool) -> Result<()> {
        blocking_run(self.verify_schema(rebuild))
    }

    fn load_objects(&self, type_hash: u64, filter: Option<&Bind>) -> Result<Vec<ObjectRef>> {
        let meta = object::registered_metadata(type_hash)
            .ok_or_else(|| Error::Schema(format!("no registered type for hash {type_hash:#x}")))?;
        let pool = self.pool()?;

        let statement = sql::select(meta, filter);
        let rows = blocking_run(async {
            let mut query = sqlx::query(&statement);
            if let Some(bind) = filter {
                query = Self::bind_value(query, &bind.value);
            }
            query.fetch_all(&pool).await
        })?;

        let mut objects = Vec::with_capacity(rows.len());
        let mut failures = 0usize;
        for row in &rows {
            let loaded = Self::decode_row(meta, row)
                .and_then(|(uuid, values)| object::materialize_row(type_hash, uuid, &values));
            match loaded {
                Ok(obj) => objects.push(obj),
                Err(e) => {
                    failures += 1;
                    tracing::error!("[db] failed to load a {} row: {e}", meta.name);
                }
            }
        }

        if failures > 0 {
            tracing::warn!("[db] {failures} {} row(s) failed to load", meta.name);
        }

        Ok(objects)
    }

    fn load_single_object(
        &self,
        type_hash: u64,
        filter: Option<&Bind>,
    ) -> Result<Option<ObjectRef>> {
        Ok(self.load_objects(type_hash, filter)?.into_iter().next())
    }

    fn insert_single_object(&self, obj: &ObjectRef) -> Result<()> {
        let pool = self.pool()?;
        blocking_run(async {
            let mut conn = pool.acquire().await?;
            Self::insert_on(&mut *conn, obj).await
        })?;
        obj.write().unwrap().clear_dirty();
        Ok(())
    }

    fn update_single_object(&self, obj: &ObjectRef) -> Result<()> {
        let pool = self.pool()?;
        blocking_run(async {
            let mut conn = pool.acquire().await?;
            Self::update_on(&mut *conn, obj).await
        })?;
        obj.write().unwrap().clear_dirty();
        Ok(())
    }

    fn delete_single_object(&self, obj: &ObjectRef) -> Result<()> {
        let pool = self.pool()?;
        blocking_run(async {
            let mut conn = pool.acquire().await?;
            Self::delete_on(&mut *conn, obj).await
        })?;
        object::unregister_object(obj);
        Ok(())
    }

    fn process_change_set(&self, changes: ChangeSet) -> Result<()> {
        match &changes {
            ChangeSet::Standard(c) => blocking_run(self.run_standard(c))?,
            ChangeSet::Operational(c) => blocking_run(self.run_operational(c))?,
        }
        self.finalize_change_set(&changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(SqliteDb::column_type(FieldType::String), "text");
        assert_eq!(SqliteDb::column_type(FieldType::Bool), "int");
        assert_eq!(SqliteDb::column_type(FieldType::U32), "bigint");
        assert_eq!(SqliteDb::column_type(FieldType::Float), "float");
        assert_eq!(SqliteDb::column_type(FieldType::Set), "blob");
    }

    #[test]
    fn test_open_in_memory() {
        let db = SqliteDb::in_memory();
        assert!(!db.is_open());
        db.open().unwrap();
        assert!(db.is_open());
        assert_eq!(db.execute("CREATE TABLE probe (x int);").unwrap(), 0);
        db.execute_with(
            "INSERT INTO probe (x) VALUES (?);",
            &[BindValue::Int(7)],
        )
        .unwrap();
        assert_eq!(
            db.fetch_scalar_i64("SELECT x FROM probe;", &[]).unwrap(),
            7
        );
    }
}
