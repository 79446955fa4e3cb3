//! Persistent object registry and identity cache.
//!
//! Every persistent type is registered at process start with its metadata
//! and a factory. A process-wide `UUID → weak(object)` map guarantees at
//! most one live instance per UUID; registering a duplicate fails. Entries
//! whose objects have dropped are reaped lazily on lookup and insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use uuid::Uuid;

use crate::error::{Error, Result};

use super::bind::{Bind, BindValue};
use super::metadata::{type_hash, TypeMetadata};
use super::Database;

/// A decoded result row: column name to value.
pub type RowValues = HashMap<String, BindValue>;

/// Shared handle to a persistent object. The weak self-reference of the
/// original design is the cache's `Weak` pointing back at this allocation.
pub type ObjectRef = Arc<RwLock<dyn Persistent>>;

/// Contract implemented by every generated persistent type.
pub trait Persistent: Send + Sync + std::any::Any {
    fn meta(&self) -> &'static TypeMetadata;

    fn uuid(&self) -> Uuid;
    fn set_uuid(&mut self, uuid: Uuid);

    fn is_deleted(&self) -> bool;
    fn mark_deleted(&mut self);

    fn clear_dirty(&mut self);

    /// Column binds for this object: every column when `all`, otherwise only
    /// the dirty ones.
    fn bind_values(&self, all: bool) -> Vec<Bind>;

    /// Rebind this instance from a decoded row. Clears the dirty set.
    fn load_row(&mut self, row: &RowValues) -> Result<()>;

    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

pub struct RegisteredType {
    pub meta: &'static TypeMetadata,
    pub factory: fn() -> ObjectRef,
}

fn registry() -> &'static Mutex<HashMap<u64, RegisteredType>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, RegisteredType>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn name_index() -> &'static Mutex<HashMap<&'static str, u64>> {
    static NAMES: OnceLock<Mutex<HashMap<&'static str, u64>>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cache() -> &'static Mutex<HashMap<Uuid, Weak<RwLock<dyn Persistent>>>> {
    static CACHE: OnceLock<Mutex<HashMap<Uuid, Weak<RwLock<dyn Persistent>>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a persistent type. Duplicate names fail.
pub fn register_type(meta: &'static TypeMetadata, factory: fn() -> ObjectRef) -> Result<()> {
    let hash = type_hash(meta.name);

    let mut names = name_index().lock().unwrap();
    let mut types = registry().lock().unwrap();

    if names.contains_key(meta.name) {
        return Err(Error::Schema(format!(
            "duplicate persistent type registration: {}",
            meta.name
        )));
    }

    names.insert(meta.name, hash);
    types.insert(hash, RegisteredType { meta, factory });
    Ok(())
}

pub fn registered_metadata(hash: u64) -> Option<&'static TypeMetadata> {
    registry().lock().unwrap().get(&hash).map(|t| t.meta)
}

pub fn type_hash_by_name(name: &str) -> Option<u64> {
    name_index().lock().unwrap().get(name).copied()
}

/// Every registered type hash, for schema verification sweeps.
pub fn registered_type_hashes() -> Vec<u64> {
    registry().lock().unwrap().keys().copied().collect()
}

/// Build a fresh unregistered instance of the type.
pub fn new_object(hash: u64) -> Option<ObjectRef> {
    let factory = registry().lock().unwrap().get(&hash).map(|t| t.factory)?;
    Some(factory())
}

/// Put an object into the identity cache, assigning a random UUID when none
/// is given. Fails if another live instance already owns the UUID.
pub fn register_object(obj: &ObjectRef, uuid: Option<Uuid>) -> Result<Uuid> {
    let mut inner = obj.write().unwrap();
    if inner.is_deleted() {
        return Err(Error::Persistence(
            "cannot register a deleted object".into(),
        ));
    }

    let mut cache = cache().lock().unwrap();

    // Re-keying an already cached object drops its old entry first.
    if let Some(new_uuid) = uuid {
        let old = inner.uuid();
        if !old.is_nil() && old != new_uuid {
            if let Some(existing) = cache.get(&old) {
                if existing.as_ptr() == Arc::as_ptr(obj) {
                    cache.remove(&old);
                }
            }
        }
        inner.set_uuid(new_uuid);
    } else if inner.uuid().is_nil() {
        inner.set_uuid(Uuid::new_v4());
    }

    let key = inner.uuid();
    if let Some(existing) = cache.get(&key) {
        if let Some(live) = existing.upgrade() {
            if Arc::as_ptr(&live) != Arc::as_ptr(obj) {
                tracing::error!("[db] duplicate object detected: {key}");
                return Err(Error::Persistence(format!("duplicate object: {key}")));
            }
        }
    }

    cache.insert(key, Arc::downgrade(obj));
    Ok(key)
}

/// Mark the object deleted and drop it from the identity cache.
pub fn unregister_object(obj: &ObjectRef) {
    let mut inner = obj.write().unwrap();
    inner.mark_deleted();

    let uuid = inner.uuid();
    if !uuid.is_nil() {
        cache().lock().unwrap().remove(&uuid);
    }
}

/// Look up the cached live instance for a UUID.
pub fn object_by_uuid(uuid: Uuid) -> Option<ObjectRef> {
    let mut cache = cache().lock().unwrap();
    match cache.get(&uuid) {
        Some(weak) => match weak.upgrade() {
            Some(obj) => Some(obj),
            None => {
                cache.remove(&uuid);
                None
            }
        },
        None => None,
    }
}

/// Number of live cached objects, reaping dead entries as a side effect.
pub fn cached_object_count() -> usize {
    let mut cache = cache().lock().unwrap();
    cache.retain(|_, weak| weak.strong_count() > 0);
    cache.len()
}

/// Fetch an object by UUID, hitting the cache first. `reload` forces a
/// re-read from the database, rebinding the cached instance when one is
/// live.
pub fn load_object_by_uuid(
    type_hash: u64,
    db: &dyn Database,
    uuid: Uuid,
    reload: bool,
) -> Result<ObjectRef> {
    if !reload {
        if let Some(obj) = object_by_uuid(uuid) {
            return Ok(obj);
        }
    }

    let bind = Bind::new("UID", BindValue::Uuid(uuid));
    match db.load_single_object(type_hash, Some(&bind))? {
        Some(obj) => Ok(obj),
        None => {
            let name = registered_metadata(type_hash)
                .map(|m| m.name)
                .unwrap_or("<unregistered>");
            tracing::error!("[db] unknown UUID '{uuid}' for '{name}' failed to load");
            Err(Error::NotFound(format!("{name} {uuid}")))
        }
    }
}

/// Turn a decoded row into a live object. A cached live instance for the
/// UUID is rebound in place so the at-most-one-instance invariant holds;
/// otherwise a fresh instance is built, bound, and registered.
pub(crate) fn materialize_row(
    type_hash: u64,
    uuid: Uuid,
    row: &RowValues,
) -> Result<ObjectRef> {
    if let Some(existing) = object_by_uuid(uuid) {
        existing.write().unwrap().load_row(row)?;
        return Ok(existing);
    }

    let obj = new_object(type_hash).ok_or_else(|| {
        Error::Schema(format!("no registered type for hash {type_hash:#x}"))
    })?;

    {
        let mut inner = obj.write().unwrap();
        inner.set_uuid(uuid);
        inner.load_row(row)?;
    }

    register_object(&obj, Some(uuid))?;
    Ok(obj)
}

/// Generates a persistent type: the struct with UUID / dirty-bitset /
/// deleted-flag plumbing, typed getters and dirty-tracking setters, the
/// column metadata, and the [`Persistent`] implementation the backends
/// drive.
///
/// ```ignore
/// define_persistent! {
///     pub struct Item {
///         name, set_name: String => String lookup,
///         qty, set_qty: i32 => S32,
///     }
/// }
/// ```
#[macro_export]
macro_rules! define_persistent {
    (@lookup) => {
        false
    };
    (@lookup lookup) => {
        true
    };
    (
        $(#[$attr:meta])*
        pub struct $name:ident {
            $( $fname:ident, $setter:ident : $fty:ty => $kind:ident $($lookup:ident)? ),* $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            uuid: $crate::uuid::Uuid,
            dirty: u64,
            deleted: bool,
            $( $fname: $fty, )*
        }

        impl $name {
            pub const METADATA: $crate::db::TypeMetadata = $crate::db::TypeMetadata {
                name: stringify!($name),
                fields: &[
                    $(
                        $crate::db::FieldDef {
                            name: stringify!($fname),
                            ftype: $crate::db::FieldType::$kind,
                            lookup_key: $crate::define_persistent!(@lookup $($lookup)?),
                        },
                    )*
                ],
            };

            pub fn new() -> Self {
                Self::default()
            }

            pub fn type_hash() -> u64 {
                $crate::db::type_hash(stringify!($name))
            }

            /// Register this type with the process-wide registry. Called
            /// once at startup.
            pub fn register_type() -> $crate::error::Result<()> {
                $crate::db::register_type(&Self::METADATA, || {
                    ::std::sync::Arc::new(::std::sync::RwLock::new(Self::new()))
                })
            }

            $(
                pub fn $fname(&self) -> &$fty {
                    &self.$fname
                }

                pub fn $setter(&mut self, value: $fty) {
                    let idx = Self::METADATA
                        .fields
                        .iter()
                        .position(|f| f.name == stringify!($fname))
                        .unwrap();
                    self.dirty |= 1 << idx;
                    self.$fname = value;
                }
            )*
        }

        impl $crate::db::Persistent for $name {
            fn meta(&self) -> &'static $crate::db::TypeMetadata {
                &Self::METADATA
            }

            fn uuid(&self) -> $crate::uuid::Uuid {
                self.uuid
            }

            fn set_uuid(&mut self, uuid: $crate::uuid::Uuid) {
                self.uuid = uuid;
            }

            fn is_deleted(&self) -> bool {
                self.deleted
            }

            fn mark_deleted(&mut self) {
                self.deleted = true;
            }

            fn clear_dirty(&mut self) {
                self.dirty = 0;
            }

            fn bind_values(&self, all: bool) -> ::std::vec::Vec<$crate::db::Bind> {
                let mut out = ::std::vec::Vec::new();
                let mut idx = 0usize;
                $(
                    if all || (self.dirty >> idx) & 1 == 1 {
                        out.push($crate::db::Bind::new(
                            stringify!($fname),
                            $crate::db::AsBindValue::to_bind_value(&self.$fname),
                        ));
                    }
                    idx += 1;
                )*
                let _ = idx;
                out
            }

            fn load_row(&mut self, row: &$crate::db::RowValues) -> $crate::error::Result<()> {
                $(
                    let value = row.get(stringify!($fname)).ok_or_else(|| {
                        $crate::error::Error::Persistence(format!(
                            "missing column '{}' for {}",
                            stringify!($fname),
                            stringify!($name)
                        ))
                    })?;
                    self.$fname =
                        $crate::db::AsBindValue::from_bind_value(value).ok_or_else(|| {
                            $crate::error::Error::Persistence(format!(
                                "column '{}' for {} has an unexpected type",
                                stringify!($fname),
                                stringify!($name)
                            ))
                        })?;
                )*
                self.dirty = 0;
                Ok(())
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}
