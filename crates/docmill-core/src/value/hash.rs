use crate::{
    error::{Error, ErrorOrigin},
    value::Value,
};
use xxhash_rust::xxh3::Xxh3;

/// Value-hash format version byte used by the canonical encoding.
pub(crate) const VALUE_HASH_VERSION: u8 = 1;

/// Stable XXH3 seed used by canonical value hashing.
pub(crate) const VALUE_HASH_SEED: u64 = 0;

///
/// ValueHasher
///
/// Pluggable hash function over values. A container fixes its hasher at
/// construction and uses it for its whole lifetime; two hashers must never
/// be mixed within one container.
///
/// Contract: `is_equal(a, b)` implies `hash_value(a) == hash_value(b)`.
///

pub trait ValueHasher {
    fn hash_value(&self, value: &Value) -> Result<u64, Error>;
}

///
/// Xxh3Hasher
///
/// Default hasher: canonical framed encoding fed to streaming XXH3.
///

#[derive(Clone, Copy, Debug)]
pub struct Xxh3Hasher {
    seed: u64,
}

impl Xxh3Hasher {
    #[must_use]
    pub const fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

impl Default for Xxh3Hasher {
    fn default() -> Self {
        Self::with_seed(VALUE_HASH_SEED)
    }
}

impl ValueHasher for Xxh3Hasher {
    fn hash_value(&self, value: &Value) -> Result<u64, Error> {
        let mut h = Xxh3::with_seed(self.seed);
        feed_u8(&mut h, VALUE_HASH_VERSION);

        write_to_hasher(value, &mut h)?;
        Ok(h.digest())
    }
}

/// Hash one value with the default canonical hashing contract.
pub fn hash_value(value: &Value) -> Result<u64, Error> {
    Xxh3Hasher::default().hash_value(value)
}

fn feed_u8(h: &mut Xxh3, x: u8) {
    h.update(&[x]);
}
fn feed_u32(h: &mut Xxh3, x: u32) {
    h.update(&x.to_be_bytes());
}
fn feed_i64(h: &mut Xxh3, x: i64) {
    h.update(&x.to_be_bytes());
}
fn feed_i128(h: &mut Xxh3, x: i128) {
    h.update(&x.to_be_bytes());
}
fn feed_bytes(h: &mut Xxh3, b: &[u8]) {
    h.update(b);
}

// Numbers are normalized before encoding: any number representable as an
// exact i64 hashes through the integer arm regardless of its runtime
// representation, keeping `Int(5)` and `Float(5.0)` on one fingerprint.
fn write_number_to_hasher(value: &Value, h: &mut Xxh3) {
    if let Some(i) = value.as_i64() {
        feed_u8(h, 0x01);
        feed_i64(h, i);
    } else if let Some(f) = value.as_f64() {
        feed_u8(h, 0x02);
        feed_bytes(h, &f.to_bits().to_be_bytes());
    }
}

// Object entries hash under sorted key order so the fingerprint never
// depends on document insertion order.
fn write_object_to_hasher(
    fields: &indexmap::IndexMap<String, Value>,
    h: &mut Xxh3,
) -> Result<(), Error> {
    let mut ordered = fields.iter().collect::<Vec<_>>();
    ordered.sort_by(|(left, _), (right, _)| left.cmp(right));

    feed_u32(h, u32::try_from(ordered.len()).unwrap_or(u32::MAX));
    for (key, value) in ordered {
        feed_u8(h, 0xFD);
        feed_u32(h, u32::try_from(key.len()).unwrap_or(u32::MAX));
        feed_bytes(h, key.as_bytes());
        feed_u8(h, 0xFE);
        write_to_hasher(value, h)?;
    }

    Ok(())
}

fn write_to_hasher(value: &Value, h: &mut Xxh3) -> Result<(), Error> {
    feed_u8(h, value.canonical_tag().to_u8());

    match value {
        Value::Absent | Value::Null => {
            // No payload beyond the canonical tag.
        }
        Value::Int(_) | Value::Float(_) => write_number_to_hasher(value, h),
        Value::Text(s) | Value::Symbol(s) => {
            feed_u32(h, u32::try_from(s.len()).unwrap_or(u32::MAX));
            feed_bytes(h, s.as_bytes());
        }
        Value::Object(fields) => write_object_to_hasher(fields, h)?,
        Value::Array(items) => {
            feed_u32(h, u32::try_from(items.len()).unwrap_or(u32::MAX));
            for item in items {
                feed_u8(h, 0xFF);
                write_to_hasher(item, h)?;
            }
        }
        Value::Bytes(bytes) => {
            feed_u32(h, u32::try_from(bytes.len()).unwrap_or(u32::MAX));
            feed_bytes(h, bytes);
        }
        Value::Bool(b) => feed_u8(h, u8::from(*b)),
        Value::Date(d) => feed_i128(h, d.unix_nanos()),
        Value::Pattern(p) => {
            feed_u32(h, u32::try_from(p.source.len()).unwrap_or(u32::MAX));
            feed_bytes(h, p.source.as_bytes());
            feed_u32(h, u32::try_from(p.flags.len()).unwrap_or(u32::MAX));
            feed_bytes(h, p.flags.as_bytes());
        }
        Value::Func(f) => {
            return Err(Error::unsupported(
                ErrorOrigin::Value,
                format!("callable '{}' has no canonical encoding and cannot be hashed", f.name),
            ));
        }
    }

    Ok(())
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{NativeFn, Pattern};
    use indexmap::IndexMap;

    fn v_i(x: i64) -> Value {
        Value::Int(x)
    }
    fn v_txt(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn hash_contract_seed_and_version_are_frozen() {
        assert_eq!(VALUE_HASH_SEED, 0);
        assert_eq!(VALUE_HASH_VERSION, 1);
    }

    #[test]
    fn hash_is_deterministic() {
        let value = Value::from_slice(&[1i64, 2, 3]);
        assert_eq!(hash_value(&value).unwrap(), hash_value(&value).unwrap());
    }

    #[test]
    fn equal_numbers_hash_equal_across_representations() {
        assert_eq!(
            hash_value(&Value::Int(5)).unwrap(),
            hash_value(&Value::Float(5.0)).unwrap(),
            "Int(5) and Float(5.0) are equal and must share a fingerprint"
        );
        assert_ne!(
            hash_value(&Value::Float(5.5)).unwrap(),
            hash_value(&Value::Int(5)).unwrap()
        );
    }

    #[test]
    fn different_categories_hash_differently() {
        assert_ne!(
            hash_value(&v_i(1)).unwrap(),
            hash_value(&Value::Bool(true)).unwrap()
        );
        assert_ne!(
            hash_value(&v_txt("a")).unwrap(),
            hash_value(&Value::Symbol("a".to_string())).unwrap()
        );
        assert_ne!(
            hash_value(&Value::Null).unwrap(),
            hash_value(&Value::Absent).unwrap()
        );
    }

    #[test]
    fn object_hash_ignores_key_insertion_order() {
        let mut left = IndexMap::new();
        left.insert("z".to_string(), v_i(9));
        left.insert("a".to_string(), v_i(1));
        let mut right = IndexMap::new();
        right.insert("a".to_string(), v_i(1));
        right.insert("z".to_string(), v_i(9));

        assert_eq!(
            hash_value(&Value::Object(left)).unwrap(),
            hash_value(&Value::Object(right)).unwrap(),
            "object fingerprints must not depend on insertion order"
        );
    }

    #[test]
    fn array_hash_is_order_and_length_sensitive() {
        let a = Value::from_slice(&[1i64, 2]);
        let b = Value::from_slice(&[2i64, 1]);
        let c = Value::from_slice(&[1i64, 2, 2]);
        assert_ne!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
        assert_ne!(hash_value(&a).unwrap(), hash_value(&c).unwrap());
    }

    #[test]
    fn string_framing_separates_adjacent_items() {
        let left = Value::from_slice(&["ab".to_string(), "c".to_string()]);
        let right = Value::from_slice(&["a".to_string(), "bc".to_string()]);
        assert_ne!(hash_value(&left).unwrap(), hash_value(&right).unwrap());
    }

    #[test]
    fn pattern_hash_tracks_source_and_flags() {
        let a = Value::Pattern(Pattern::new("^a", "i"));
        let b = Value::Pattern(Pattern::new("^a", ""));
        assert_ne!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn hashing_a_callable_is_a_fatal_error() {
        fn noop(_: &[Value]) -> Result<Value, Error> {
            Ok(Value::Null)
        }
        let err = hash_value(&Value::Func(NativeFn::new("noop", noop))).unwrap_err();
        assert_eq!(err.class, crate::error::ErrorClass::Unsupported);
    }

    #[test]
    fn custom_seed_changes_fingerprints() {
        let value = v_txt("alpha");
        let default = Xxh3Hasher::default().hash_value(&value).unwrap();
        let seeded = Xxh3Hasher::with_seed(7).hash_value(&value).unwrap();
        assert_ne!(default, seeded);
    }
}
