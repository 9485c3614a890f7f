//! MySQL/TiDB database driver.
//!
//! This module provides [`MysqlTable`], the [`TableSnapshot`] implementation
//! for real runs. TiDB speaks the MySQL protocol and is detected from the
//! server version string.
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - TiDB 4.0+
//!
//! [`TableSnapshot`]: crate::core::traits::TableSnapshot

mod table;

pub use table::MysqlTable;
