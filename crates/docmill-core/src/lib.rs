//! Core runtime for DocMill: the dynamic value model, path resolution over
//! nested documents, accumulators, pipeline stages, and the ergonomics
//! exported via the `prelude`.
#![warn(unreachable_pub)]

#[macro_use]
mod macros;

// public exports are one module level down
pub mod accum;
pub mod error;
pub mod expr;
pub mod obs;
pub mod path;
pub mod stage;
pub mod value;

///
/// re-exports
///
/// the `value!` macro expands to these; re-exporting stops callers having to
/// add the dependency themselves
///

#[doc(hidden)]
pub mod __reexports {
    pub use indexmap;
}

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, registries, or internal helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        expr::{Context, Expr},
        stage::{Aggregator, Pipeline},
        value::{Value, ValueMap},
    };
}
