//! Transactional change sets.
//!
//! Two forms exist. The standard form batches inserts, updates and deletes
//! and applies them atomically in that order. The operational form is an
//! ordered sequence of operations which may include *explicit* updates: an
//! update guarded by expected column values that must still hold when the
//! statement runs, enforced by requiring an affected-row count of exactly
//! one.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use super::bind::{AsBindValue, Bind};
use super::metadata::FieldType;
use super::object::ObjectRef;

/// Batched mutations applied in insert → update → delete order inside one
/// transaction.
#[derive(Default)]
pub struct StandardChangeSet {
    inserts: Vec<ObjectRef>,
    updates: Vec<ObjectRef>,
    deletes: Vec<ObjectRef>,
}

impl StandardChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, obj: ObjectRef) {
        if !self.inserts.iter().any(|o| Arc::ptr_eq(o, &obj)) {
            self.inserts.push(obj);
        }
    }

    pub fn update(&mut self, obj: ObjectRef) {
        if !self.updates.iter().any(|o| Arc::ptr_eq(o, &obj)) {
            self.updates.push(obj);
        }
    }

    pub fn delete(&mut self, obj: ObjectRef) {
        if !self.deletes.iter().any(|o| Arc::ptr_eq(o, &obj)) {
            self.deletes.push(obj);
        }
    }

    pub fn inserts(&self) -> &[ObjectRef] {
        &self.inserts
    }

    pub fn updates(&self) -> &[ObjectRef] {
        &self.updates
    }

    pub fn deletes(&self) -> &[ObjectRef] {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// One step of an operational change set.
pub enum Operation {
    Insert(ObjectRef),
    Update(ObjectRef),
    Delete(ObjectRef),
    Explicit(ExplicitUpdate),
}

/// Ordered sequence of operations applied inside one transaction. Objects
/// touched by explicit updates are re-loaded after commit so the in-memory
/// copy reflects what the database accepted.
#[derive(Default)]
pub struct OperationalChangeSet {
    operations: Vec<Operation>,
}

impl OperationalChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, obj: ObjectRef) {
        self.operations.push(Operation::Insert(obj));
    }

    pub fn update(&mut self, obj: ObjectRef) {
        self.operations.push(Operation::Update(obj));
    }

    pub fn delete(&mut self, obj: ObjectRef) {
        self.operations.push(Operation::Delete(obj));
    }

    pub fn add_explicit(&mut self, update: ExplicitUpdate) {
        self.operations.push(Operation::Explicit(update));
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Either change-set form, as accepted by `Database::process_change_set`.
pub enum ChangeSet {
    Standard(StandardChangeSet),
    Operational(OperationalChangeSet),
}

impl From<StandardChangeSet> for ChangeSet {
    fn from(c: StandardChangeSet) -> Self {
        ChangeSet::Standard(c)
    }
}

impl From<OperationalChangeSet> for ChangeSet {
    fn from(c: OperationalChangeSet) -> Self {
        ChangeSet::Operational(c)
    }
}

/// A guarded update: `UPDATE t SET <changes> WHERE UID = ? AND <expected>`.
///
/// Values are staged through the typed `set_*`/`set_*_from` methods, which
/// verify the column exists with a compatible semantic type and snapshot the
/// object's current value as the expectation when none is given. Each column
/// may be staged once.
pub struct ExplicitUpdate {
    record: ObjectRef,
    stored: HashMap<String, Bind>,
    expected: HashMap<String, Bind>,
    changes: HashMap<String, Bind>,
}

macro_rules! explicit_setters {
    ($set:ident, $set_from:ident, $ty:ty, [$($kind:ident),+]) => {
        /// Stage a change using the object's current value as the
        /// expectation.
        pub fn $set(&mut self, column: &str, value: $ty) -> bool {
            let Some(stored) = self.verify(column, &[$(FieldType::$kind),+]) else {
                return false;
            };
            let Some(expected) = <$ty as AsBindValue>::from_bind_value(&stored.value) else {
                return false;
            };
            self.$set_from(column, value, expected)
        }

        /// Stage a change with an explicit expectation.
        pub fn $set_from(&mut self, column: &str, value: $ty, expected: $ty) -> bool {
            if self.verify(column, &[$(FieldType::$kind),+]).is_none() {
                return false;
            }
            self.bind(column, value.to_bind_value(), expected.to_bind_value());
            true
        }
    };
}

impl ExplicitUpdate {
    pub fn new(record: ObjectRef) -> Self {
        let stored = {
            let inner = record.read().unwrap();
            inner
                .bind_values(true)
                .into_iter()
                .map(|b| (b.column.clone(), b))
                .collect()
        };

        Self {
            record,
            stored,
            expected: HashMap::new(),
            changes: HashMap::new(),
        }
    }

    pub fn record(&self) -> &ObjectRef {
        &self.record
    }

    pub fn record_uuid(&self) -> Uuid {
        self.record.read().unwrap().uuid()
    }

    pub fn changes(&self) -> &HashMap<String, Bind> {
        &self.changes
    }

    pub fn expected(&self) -> &HashMap<String, Bind> {
        &self.expected
    }

    /// The column qualifies when it exists with one of `valid`'s types and
    /// has not been staged yet. Returns its snapshot value.
    fn verify(&self, column: &str, valid: &[FieldType]) -> Option<&Bind> {
        let meta = self.record.read().unwrap().meta();
        let field = meta.field(column)?;
        if !valid.contains(&field.ftype) {
            return None;
        }
        if self.changes.contains_key(column) || self.expected.contains_key(column) {
            return None;
        }
        self.stored.get(column)
    }

    fn bind(&mut self, column: &str, value: super::bind::BindValue, expected: super::bind::BindValue) {
        self.changes
            .insert(column.to_string(), Bind::new(column, value));
        self.expected
            .insert(column.to_string(), Bind::new(column, expected));
    }

    explicit_setters!(set_int, set_int_from, i32, [S8, S16, S32, U8, U16, Enum]);
    explicit_setters!(set_bigint, set_bigint_from, i64, [S64, U32]);
    explicit_setters!(set_float, set_float_from, f32, [Float]);
    explicit_setters!(set_double, set_double_from, f64, [Double]);
    explicit_setters!(set_text, set_text_from, String, [String]);
    explicit_setters!(set_bool, set_bool_from, bool, [Bool]);
    explicit_setters!(set_uuid, set_uuid_from, Uuid, [Ref]);

    /// Stage `current + value` with `current` as the expectation.
    pub fn add_int(&mut self, column: &str, value: i32) -> bool {
        let Some(stored) = self.verify(column, &[
            FieldType::S8,
            FieldType::S16,
            FieldType::S32,
            FieldType::U8,
            FieldType::U16,
            FieldType::Enum,
        ]) else {
            return false;
        };
        let Some(current) = i32::from_bind_value(&stored.value) else {
            return false;
        };
        self.set_int_from(column, current.wrapping_add(value), current)
    }

    /// Stage `current - value` with `current` as the expectation.
    pub fn subtract_int(&mut self, column: &str, value: i32) -> bool {
        self.add_int(column, value.wrapping_neg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::object::tests::CacheProbe;
    use crate::db::BindValue;
    use std::sync::RwLock;

    fn probe_ref(hits: i32) -> ObjectRef {
        let mut probe = CacheProbe::new();
        probe.set_hits(hits);
        Arc::new(RwLock::new(probe))
    }

    #[test]
    fn test_standard_change_set_dedupes() {
        let obj = probe_ref(1);
        let mut changes = StandardChangeSet::new();
        changes.insert(Arc::clone(&obj));
        changes.insert(obj);
        assert_eq!(changes.inserts().len(), 1);
    }

    #[test]
    fn test_explicit_update_snapshots_expectation() {
        let obj = probe_ref(100);
        let mut update = ExplicitUpdate::new(obj);

        assert!(update.set_int("hits", 80));
        assert_eq!(
            update.changes().get("hits").unwrap().value,
            BindValue::Int(80)
        );
        assert_eq!(
            update.expected().get("hits").unwrap().value,
            BindValue::Int(100)
        );
    }

    #[test]
    fn test_explicit_update_rejects_wrong_type() {
        let obj = probe_ref(0);
        let mut update = ExplicitUpdate::new(obj);

        // "label" is a string column; integer staging must refuse.
        assert!(!update.set_int("label", 1));
        // Unknown column refuses.
        assert!(!update.set_int("missing", 1));
        assert!(update.changes().is_empty());
    }

    #[test]
    fn test_explicit_update_one_stage_per_column() {
        let obj = probe_ref(5);
        let mut update = ExplicitUpdate::new(obj);

        assert!(update.set_int("hits", 6));
        assert!(!update.set_int("hits", 7));
        assert_eq!(
            update.changes().get("hits").unwrap().value,
            BindValue::Int(6)
        );
    }

    #[test]
    fn test_add_and_subtract() {
        let obj = probe_ref(10);
        let mut update = ExplicitUpdate::new(obj);
        assert!(update.add_int("hits", 5));
        assert_eq!(
            update.changes().get("hits").unwrap().value,
            BindValue::Int(15)
        );

        let obj = probe_ref(10);
        let mut update = ExplicitUpdate::new(obj);
        assert!(update.subtract_int("hits", 4));
        assert_eq!(
            update.changes().get("hits").unwrap().value,
            BindValue::Int(6)
        );
    }
}
