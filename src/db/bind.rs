//! Tagged bind values.
//!
//! A [`BindValue`] is the variant over everything the backends know how to
//! bind or decode; a [`Bind`] tags it with the column it targets. Dispatch is
//! a match on the tag rather than a class hierarchy.

use uuid::Uuid;

/// A value bound into a prepared query or decoded from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
}

/// A bind value aimed at a named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub column: String,
    pub value: BindValue,
}

impl Bind {
    pub fn new(column: impl Into<String>, value: BindValue) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// Conversion between native field types and [`BindValue`]s. Collection
/// fields serialize to little-endian length-prefixed blobs.
pub trait AsBindValue: Sized {
    fn to_bind_value(&self) -> BindValue;
    fn from_bind_value(value: &BindValue) -> Option<Self>;
}

impl AsBindValue for String {
    fn to_bind_value(&self) -> BindValue {
        BindValue::Text(self.clone())
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        match value {
            BindValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl AsBindValue for Uuid {
    fn to_bind_value(&self) -> BindValue {
        BindValue::Uuid(*self)
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        match value {
            BindValue::Uuid(u) => Some(*u),
            BindValue::Text(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }
}

impl AsBindValue for bool {
    fn to_bind_value(&self) -> BindValue {
        BindValue::Bool(*self)
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        match value {
            BindValue::Bool(b) => Some(*b),
            BindValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }
}

macro_rules! int_bind {
    ($($t:ty),*) => {$(
        impl AsBindValue for $t {
            fn to_bind_value(&self) -> BindValue {
                BindValue::Int(*self as i32)
            }

            fn from_bind_value(value: &BindValue) -> Option<Self> {
                match value {
                    BindValue::Int(i) => <$t>::try_from(*i).ok(),
                    BindValue::BigInt(i) => <$t>::try_from(*i).ok(),
                    _ => None,
                }
            }
        }
    )*};
}

int_bind!(i8, i16, i32, u8, u16);

macro_rules! bigint_bind {
    ($($t:ty),*) => {$(
        impl AsBindValue for $t {
            fn to_bind_value(&self) -> BindValue {
                BindValue::BigInt(*self as i64)
            }

            fn from_bind_value(value: &BindValue) -> Option<Self> {
                match value {
                    BindValue::BigInt(i) => <$t>::try_from(*i).ok(),
                    BindValue::Int(i) => <$t>::try_from(*i as i64).ok(),
                    _ => None,
                }
            }
        }
    )*};
}

bigint_bind!(u32, i64);

impl AsBindValue for u64 {
    // u64 does not fit a signed bigint column; it rides in a blob.
    fn to_bind_value(&self) -> BindValue {
        BindValue::Blob(self.to_le_bytes().to_vec())
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        match value {
            BindValue::Blob(b) if b.len() == 8 => {
                Some(u64::from_le_bytes(b.as_slice().try_into().ok()?))
            }
            _ => None,
        }
    }
}

impl AsBindValue for f32 {
    fn to_bind_value(&self) -> BindValue {
        BindValue::Float(*self)
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        match value {
            BindValue::Float(f) => Some(*f),
            BindValue::Double(f) => Some(*f as f32),
            _ => None,
        }
    }
}

impl AsBindValue for f64 {
    fn to_bind_value(&self) -> BindValue {
        BindValue::Double(*self)
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        match value {
            BindValue::Double(f) => Some(*f),
            BindValue::Float(f) => Some(*f as f64),
            _ => None,
        }
    }
}

impl AsBindValue for Vec<u8> {
    fn to_bind_value(&self) -> BindValue {
        BindValue::Blob(self.clone())
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        match value {
            BindValue::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl AsBindValue for Vec<u32> {
    fn to_bind_value(&self) -> BindValue {
        let mut blob = Vec::with_capacity(4 + self.len() * 4);
        blob.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for v in self {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        BindValue::Blob(blob)
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        let BindValue::Blob(blob) = value else {
            return None;
        };
        if blob.len() < 4 {
            return None;
        }
        let count = u32::from_le_bytes(blob[0..4].try_into().ok()?) as usize;
        if blob.len() != 4 + count * 4 {
            return None;
        }
        Some(
            blob[4..]
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        )
    }
}

impl AsBindValue for std::collections::BTreeSet<u32> {
    fn to_bind_value(&self) -> BindValue {
        let list: Vec<u32> = self.iter().copied().collect();
        list.to_bind_value()
    }

    fn from_bind_value(value: &BindValue) -> Option<Self> {
        Vec::<u32>::from_bind_value(value).map(|v| v.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(42i32.to_bind_value(), BindValue::Int(42));
        assert_eq!(i32::from_bind_value(&BindValue::Int(42)), Some(42));
        assert_eq!(7u32.to_bind_value(), BindValue::BigInt(7));
        assert_eq!(u8::from_bind_value(&BindValue::Int(300)), None);
        assert_eq!(bool::from_bind_value(&BindValue::Int(1)), Some(true));
    }

    #[test]
    fn test_u64_rides_in_blob() {
        let v = 0xDEAD_BEEF_CAFE_F00Du64;
        let bind = v.to_bind_value();
        assert!(matches!(bind, BindValue::Blob(ref b) if b.len() == 8));
        assert_eq!(u64::from_bind_value(&bind), Some(v));
    }

    #[test]
    fn test_list_blob_roundtrip() {
        let list = vec![1u32, 500, 70000];
        let bind = list.to_bind_value();
        assert_eq!(Vec::<u32>::from_bind_value(&bind), Some(list));
    }

    #[test]
    fn test_list_blob_bad_length() {
        let blob = BindValue::Blob(vec![3, 0, 0, 0, 1]);
        assert_eq!(Vec::<u32>::from_bind_value(&blob), None);
    }

    #[test]
    fn test_uuid_from_text() {
        let u = Uuid::new_v4();
        let parsed = Uuid::from_bind_value(&BindValue::Text(u.to_string()));
        assert_eq!(parsed, Some(u));
    }
}
