//! Core abstractions shared by the drivers and the diff engine.
//!
//! - [`schema`]: table identity, column projection, key ranges and bounds
//! - [`traits`]: the [`TableSnapshot`] query surface
//!
//! Driver modules (`drivers/mysql`, `drivers/memory`) implement the trait;
//! the `verify` module consumes it.

pub mod schema;
pub mod traits;

pub use schema::{ensure_same_projection, Column, ColumnKind, KeyBounds, KeyRange, TableIdentity};
pub use traits::TableSnapshot;
