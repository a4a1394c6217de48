//! DocMill — an in-process document aggregation pipeline engine.
//!
//! ## Crate layout
//! - `core`: the dynamic value model, path resolution, accumulators,
//!   pipeline stages, and observability.
//!
//! The `prelude` module mirrors the surface used by embedding code; the
//! [`value!`] macro builds document literals inline.
//!
//! ```
//! use docmill::prelude::*;
//! use docmill::value;
//!
//! let pipeline = Value::from_json(&serde_json::json!([
//!     {"$group": {"_id": "$city", "total": {"$sum": "$amount"}}}
//! ]));
//! let engine = Aggregator::new(&pipeline)?;
//!
//! let out = engine.run(vec![
//!     value!({"city": "ork", "amount": 2}),
//!     value!({"city": "ork", "amount": 3}),
//! ])?;
//! assert_eq!(out, vec![value!({"_id": "ork", "total": 5})]);
//! # Ok::<(), docmill::core::error::Error>(())
//! ```

pub use docmill_core as core;

pub use docmill_core::value;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
///

pub mod prelude {
    pub use crate::core::{
        error::Error,
        expr::{Context, Expr},
        path::{remove_value, resolve, set_value},
        stage::{Aggregator, Lazy, Pipeline},
        value::{Value, ValueMap},
    };
}
