//! Table snapshot implementations.
//!
//! - [`mysql`]: MySQL and TiDB over a SQLx pool
//! - [`memory`]: rows held in memory, fingerprinted in-process
//!
//! Both implement [`TableSnapshot`](crate::core::traits::TableSnapshot) and
//! produce identical fingerprints and signatures for identical values.

pub mod memory;
pub mod mysql;

pub use memory::MemoryTable;
pub use mysql::MysqlTable;
