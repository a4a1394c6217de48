use crate::value::{Value, tag};

///
/// Canonical Value Rank
///
/// Stable rank used for cross-category ordering. Ranks follow the tag order
/// with one fold: `Absent` ranks with `Null`, so a missing field and an
/// explicit null sort together while remaining distinct categories for
/// equality and hashing.
///
#[must_use]
pub const fn canonical_rank(value: &Value) -> u8 {
    match value {
        Value::Absent => tag::ValueTag::Null.to_u8(),
        _ => tag::canonical_tag(value).to_u8(),
    }
}
