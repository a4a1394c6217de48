use crate::{
    error::{Error, ErrorOrigin},
    value::{Value, ValueHasher, Xxh3Hasher, is_equal},
};
use std::collections::HashMap;
use std::rc::Rc;

///
/// PrimKey
///
/// Native fast-path key for primitive values: primitive keys bypass the
/// canonical value hashing entirely and resolve through std map lookup.
/// Integral floats fold onto their integer key so `Int(5)` and `Float(5.0)`
/// stay one entry; NaN is excluded (never equal to anything, so every NaN
/// insert must remain a distinct entry in the collision chain).
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum PrimKey {
    Null,
    Absent,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Text(String),
    Symbol(String),
}

fn primitive_key(value: &Value) -> Option<PrimKey> {
    match value {
        Value::Null => Some(PrimKey::Null),
        Value::Absent => Some(PrimKey::Absent),
        Value::Bool(b) => Some(PrimKey::Bool(*b)),
        Value::Int(i) => Some(PrimKey::Int(*i)),
        Value::Float(f) if f.is_nan() => None,
        Value::Float(f) => Some(
            value
                .as_i64()
                .map_or_else(|| PrimKey::FloatBits(f.to_bits()), PrimKey::Int),
        ),
        Value::Text(s) => Some(PrimKey::Text(s.clone())),
        Value::Symbol(s) => Some(PrimKey::Symbol(s.clone())),
        _ => None,
    }
}

// A deleted slot keeps its key so arena indices stay stable; the payload
// `None` marks it dead for lookup and iteration.
struct Slot<P> {
    key: Value,
    payload: Option<P>,
}

///
/// ValueMap
///
/// Value-keyed associative container with equality-based lookup: two keys
/// that are `is_equal` are one entry, whatever their runtime identity.
///
/// Arena layout: slots hold (key, payload) pairs in first-insertion order;
/// non-primitive keys are located through hash buckets of slot indices, each
/// bucket scanned with `is_equal` to resolve collisions. The first stored
/// key instance stays the master key — replacing a payload never replaces
/// the key. The hasher is fixed at construction for the container lifetime.
///

pub struct ValueMap<P> {
    hasher: Rc<dyn ValueHasher>,
    slots: Vec<Slot<P>>,
    primitive: HashMap<PrimKey, usize>,
    buckets: HashMap<u64, Vec<usize>>,
    len: usize,
}

impl<P> ValueMap<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(Rc::new(Xxh3Hasher::default()))
    }

    #[must_use]
    pub fn with_hasher(hasher: Rc<dyn ValueHasher>) -> Self {
        Self {
            hasher,
            slots: Vec::new(),
            primitive: HashMap::new(),
            buckets: HashMap::new(),
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace the payload for `key`. Returns the prior payload
    /// when an equal key was already present.
    pub fn set(&mut self, key: Value, payload: P) -> Result<Option<P>, Error> {
        if let Some(index) = self.locate(&key)? {
            let slot = &mut self.slots[index];
            return Ok(slot.payload.replace(payload));
        }

        self.insert_new(key, payload)?;
        Ok(None)
    }

    // Register a fresh slot in the arena plus its lookup structure.
    fn insert_new(&mut self, key: Value, payload: P) -> Result<usize, Error> {
        let index = self.slots.len();
        match primitive_key(&key) {
            Some(prim) => {
                self.primitive.insert(prim, index);
            }
            None => {
                let hash = self.hasher.hash_value(&key)?;
                self.buckets.entry(hash).or_default().push(index);
            }
        }
        self.slots.push(Slot {
            key,
            payload: Some(payload),
        });
        self.len += 1;

        Ok(index)
    }

    pub fn get(&self, key: &Value) -> Result<Option<&P>, Error> {
        Ok(self
            .locate(key)?
            .and_then(|index| self.slots[index].payload.as_ref()))
    }

    pub fn get_mut(&mut self, key: &Value) -> Result<Option<&mut P>, Error> {
        let index = self.locate(key)?;
        Ok(index.and_then(|index| self.slots[index].payload.as_mut()))
    }

    /// Fetch the payload for `key`, inserting `default()` first when no
    /// equal key is present.
    pub fn get_or_insert_with(
        &mut self,
        key: Value,
        default: impl FnOnce() -> P,
    ) -> Result<&mut P, Error> {
        let index = match self.locate(&key)? {
            Some(index) => index,
            None => self.insert_new(key, default())?,
        };

        match self.slots[index].payload.as_mut() {
            Some(payload) => Ok(payload),
            None => Err(Error::internal(
                ErrorOrigin::Value,
                "value map slot lost its payload",
            )),
        }
    }

    pub fn has(&self, key: &Value) -> Result<bool, Error> {
        Ok(self.locate(key)?.is_some())
    }

    /// Remove the entry for `key`, pruning it from its lookup structure.
    pub fn delete(&mut self, key: &Value) -> Result<Option<P>, Error> {
        let Some(index) = self.locate(key)? else {
            return Ok(None);
        };

        let payload = self.slots[index].payload.take();
        self.len -= 1;

        match primitive_key(&self.slots[index].key) {
            Some(prim) => {
                self.primitive.remove(&prim);
            }
            None => {
                let hash = self.hasher.hash_value(&self.slots[index].key)?;
                if let Some(chain) = self.buckets.get_mut(&hash) {
                    chain.retain(|slot_index| *slot_index != index);
                    if chain.is_empty() {
                        self.buckets.remove(&hash);
                    }
                }
            }
        }

        Ok(payload)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.primitive.clear();
        self.buckets.clear();
        self.len = 0;
    }

    /// Iterate live entries in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &P)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.payload.as_ref().map(|payload| (&slot.key, payload)))
    }

    /// Consume the container into (key, payload) pairs in first-insertion
    /// order.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Value, P)> {
        self.slots
            .into_iter()
            .filter_map(|slot| slot.payload.map(|payload| (slot.key, payload)))
            .collect()
    }

    fn locate(&self, key: &Value) -> Result<Option<usize>, Error> {
        if let Some(prim) = primitive_key(key) {
            return Ok(self
                .primitive
                .get(&prim)
                .copied()
                .filter(|index| self.slots[*index].payload.is_some()));
        }

        let hash = self.hasher.hash_value(key)?;
        let Some(chain) = self.buckets.get(&hash) else {
            return Ok(None);
        };

        Ok(chain.iter().copied().find(|index| {
            self.slots[*index].payload.is_some() && is_equal(&self.slots[*index].key, key)
        }))
    }
}

impl<P> Default for ValueMap<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deduplicate values by deep equality, keeping first-occurrence order.
pub fn unique(values: &[Value]) -> Result<Vec<Value>, Error> {
    unique_with_hasher(values, Rc::new(Xxh3Hasher::default()))
}

/// `unique` with a caller-supplied hash function.
pub fn unique_with_hasher(
    values: &[Value],
    hasher: Rc<dyn ValueHasher>,
) -> Result<Vec<Value>, Error> {
    let mut map = ValueMap::with_hasher(hasher);
    for value in values {
        map.set(value.clone(), ())?;
    }

    Ok(map.into_entries().into_iter().map(|(key, ())| key).collect())
}

/// Values equal-present in every input array.
///
/// Candidates seed from the last array and are filtered walking backward
/// through the remaining arrays, short-circuiting to empty as soon as any
/// pass leaves no candidate. Result order is the last array's
/// first-occurrence order. Any empty input array empties the result.
pub fn intersection(arrays: &[Vec<Value>]) -> Result<Vec<Value>, Error> {
    intersection_with_hasher(arrays, Rc::new(Xxh3Hasher::default()))
}

/// `intersection` with a caller-supplied hash function.
pub fn intersection_with_hasher(
    arrays: &[Vec<Value>],
    hasher: Rc<dyn ValueHasher>,
) -> Result<Vec<Value>, Error> {
    let Some(last) = arrays.last() else {
        return Ok(Vec::new());
    };
    if arrays.iter().any(Vec::is_empty) {
        return Ok(Vec::new());
    }

    let mut candidates = unique_with_hasher(last, hasher)?;
    for array in arrays[..arrays.len() - 1].iter().rev() {
        candidates.retain(|candidate| array.iter().any(|value| is_equal(value, candidate)));
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
    }

    Ok(candidates)
}
