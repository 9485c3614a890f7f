//! SQL query generation for chunked verification.
//!
//! Every query here targets MySQL-compatible engines (MySQL and TiDB):
//! - Metadata: column catalog, primary key, server version
//! - Planning: row count, key bounds, offset key
//! - Chunk checks: range checksum (two formulas) and per-row signatures
//!
//! Identifiers are back-quoted with back-quote doubling. Range bounds and
//! catalog names are bound as parameters (`?`); the row filter is embedded
//! verbatim in parentheses.

use crate::core::schema::{Column, ColumnKind, TableIdentity};
use super::fingerprint::{FingerprintAlgorithm, EMPTY_FINGERPRINT, FIELD_DELIMITER};

/// Quote a MySQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `` `db`.`table` `` for the identity.
pub fn table_ref(identity: &TableIdentity) -> String {
    format!(
        "{}.{}",
        quote_ident(&identity.database),
        quote_ident(&identity.table)
    )
}

fn where_filter(filter: Option<&str>) -> String {
    match filter {
        Some(f) => format!("\nWHERE ({})", f),
        None => String::new(),
    }
}

fn and_filter(filter: Option<&str>) -> String {
    match filter {
        Some(f) => format!(" AND ({})", f),
        None => String::new(),
    }
}

/// Predicate selecting one half-open key range. Binds `start`, then `end`.
pub fn range_predicate(identity: &TableIdentity, pk_column: &str) -> String {
    let pk = quote_ident(pk_column);
    format!(
        "{pk} >= ? AND {pk} < ?{filter}",
        pk = pk,
        filter = and_filter(identity.range_filter()),
    )
}

/// Column catalog in ordinal order. Binds database, then table.
pub fn columns_query() -> &'static str {
    r#"SELECT
    CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
    CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE
FROM INFORMATION_SCHEMA.COLUMNS
WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
ORDER BY ORDINAL_POSITION"#
}

/// Primary-key columns in key order. Binds database, then table.
pub fn primary_key_query() -> &'static str {
    r#"SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
ORDER BY ORDINAL_POSITION"#
}

/// Server version string, used to detect TiDB.
pub fn version_query() -> &'static str {
    "SELECT VERSION()"
}

/// Row count under the row filter.
pub fn count_query(identity: &TableIdentity) -> String {
    format!(
        r#"SELECT CAST(COUNT(*) AS SIGNED) AS row_count
FROM {table}{filter}"#,
        table = table_ref(identity),
        filter = where_filter(identity.row_filter.as_deref()),
    )
}

/// Smallest and largest key under the row filter, `(0, 0)` when empty.
pub fn min_max_query(identity: &TableIdentity, pk_column: &str) -> String {
    format!(
        r#"SELECT
    CAST(IFNULL(MIN({pk}), 0) AS SIGNED) AS min_pk,
    CAST(IFNULL(MAX({pk}), 0) AS SIGNED) AS max_pk
FROM {table}{filter}"#,
        pk = quote_ident(pk_column),
        table = table_ref(identity),
        filter = where_filter(identity.row_filter.as_deref()),
    )
}

/// Key at a row offset from a starting key. Binds the start key, then the
/// row limit (`offset + 1`).
///
/// Yields NULL when no row has a key at or above the start.
pub fn offset_key_query(identity: &TableIdentity, pk_column: &str) -> String {
    let pk = quote_ident(pk_column);
    format!(
        r#"SELECT CAST(MAX(w.k) AS SIGNED) AS boundary
FROM (
    SELECT {pk} AS k
    FROM {table}
    WHERE {pk} >= ?{filter}
    ORDER BY {pk}
    LIMIT ?
) w"#,
        pk = pk,
        table = table_ref(identity),
        filter = and_filter(identity.row_filter.as_deref()),
    )
}

fn null_flags_expr(projection: &[Column]) -> String {
    let flags: Vec<String> = projection
        .iter()
        .map(|c| format!("ISNULL({})", quote_ident(&c.name)))
        .collect();
    format!("CONCAT({})", flags.join(", "))
}

fn raw_columns(projection: &[Column]) -> Vec<String> {
    projection.iter().map(|c| quote_ident(&c.name)).collect()
}

/// Column rendering of the precise formula.
fn precise_column_expr(column: &Column) -> String {
    let name = quote_ident(&column.name);
    match column.kind {
        ColumnKind::NarrowText => format!("CONVERT({} USING utf8mb4)", name),
        ColumnKind::LargeObject => format!("CRC32({})", name),
        ColumnKind::Other => name,
    }
}

fn wrap_empty(aggregate: &str) -> String {
    format!(
        "CAST(IF(COUNT(*) = 0, '{empty}', {aggregate}) AS CHAR)",
        empty = EMPTY_FINGERPRINT,
        aggregate = aggregate,
    )
}

/// Per-row `CONCAT_WS` of the simple formula.
pub fn simple_row_expr(projection: &[Column]) -> String {
    format!(
        "CONCAT_WS('{}', {})",
        FIELD_DELIMITER,
        raw_columns(projection).join(", ")
    )
}

/// Per-row composite of the precise formula.
pub fn precise_row_expr(projection: &[Column]) -> String {
    let mut parts: Vec<String> = projection.iter().map(precise_column_expr).collect();
    parts.push(null_flags_expr(projection));
    format!("CONCAT_WS('{}', {})", FIELD_DELIMITER, parts.join(", "))
}

fn simple_aggregate(projection: &[Column]) -> String {
    format!(
        "LPAD(LOWER(CONV(BIT_XOR(CAST(CRC32({row}) AS UNSIGNED)), 10, 16)), 8, '0')",
        row = simple_row_expr(projection),
    )
}

fn md5_half(row: &str, from: u32) -> String {
    format!(
        "LPAD(CONV(BIT_XOR(CAST(CONV(SUBSTRING(MD5({row}), {from}, 16), 16, 10) AS UNSIGNED)), 10, 16), 16, '0')",
        row = row,
        from = from,
    )
}

fn precise_aggregate(projection: &[Column]) -> String {
    let row = precise_row_expr(projection);
    format!(
        "LOWER(CONCAT({high}, {low}))",
        high = md5_half(&row, 1),
        low = md5_half(&row, 17),
    )
}

/// Checksum of one key range. Binds `start`, then `end`.
pub fn checksum_query(
    identity: &TableIdentity,
    pk_column: &str,
    projection: &[Column],
    algorithm: FingerprintAlgorithm,
) -> String {
    let aggregate = match algorithm {
        FingerprintAlgorithm::Simple => simple_aggregate(projection),
        FingerprintAlgorithm::Precise => precise_aggregate(projection),
    };
    format!(
        r#"SELECT {fingerprint} AS fingerprint
FROM {table}
WHERE {predicate}"#,
        fingerprint = wrap_empty(&aggregate),
        table = table_ref(identity),
        predicate = range_predicate(identity, pk_column),
    )
}

/// `(key, signature)` pairs for one key range. Binds `start`, then `end`.
pub fn signatures_query(identity: &TableIdentity, pk_column: &str, projection: &[Column]) -> String {
    let mut parts = raw_columns(projection);
    parts.push(null_flags_expr(projection));
    format!(
        r#"SELECT CAST({pk} AS SIGNED) AS k, CONCAT_WS('{delim}', {parts}) AS signature
FROM {table}
WHERE {predicate}
ORDER BY {pk}"#,
        pk = quote_ident(pk_column),
        delim = FIELD_DELIMITER,
        parts = parts.join(", "),
        table = table_ref(identity),
        predicate = range_predicate(identity, pk_column),
    )
}
