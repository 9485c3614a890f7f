//! MySQL/TiDB table snapshot.
//!
//! Implements [`TableSnapshot`] over a SQLx connection pool. Every query
//! checks out its own connection, so the scanning loop and all
//! reconciliation workers can share one `MysqlTable`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::core::schema::{Column, KeyRange, TableIdentity};
use crate::core::traits::TableSnapshot;
use crate::error::{DiffError, Result};
use crate::verify::fingerprint::{Fingerprint, FingerprintAlgorithm};
use crate::verify::hash_query;
use crate::verify::types::RowFingerprint;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Signature recorded for a row whose `CONCAT_WS` came back NULL.
const NULL_SIGNATURE: &str = "null";

/// One MySQL or TiDB table under test.
pub struct MysqlTable {
    pool: MySqlPool,
    identity: TableIdentity,
    label: String,
}

impl MysqlTable {
    /// Connect to the server holding `identity`.
    pub async fn connect(
        config: &DatabaseConfig,
        identity: TableIdentity,
        max_conns: u32,
    ) -> Result<Self> {
        let label = config.label();

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(MySqlSslMode::Preferred);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_conns)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| DiffError::connection(e, format!("creating pool for {}", label)))?;

        // Test connection
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| DiffError::connection(e, format!("testing connection to {}", label)))?;

        info!("Connected to {} ({} connections)", label, max_conns);

        Ok(Self {
            pool,
            identity,
            label,
        })
    }

    /// `host:port/db.table` for log messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Server version string.
    pub async fn server_version(&self) -> Result<String> {
        sqlx::query_scalar::<_, String>(hash_query::version_query())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DiffError::query(format!("version of {}", self.label), e))
    }

    /// Find the single primary-key column of this table.
    pub async fn discover_primary_key(&self) -> Result<String> {
        let rows: Vec<MySqlRow> = sqlx::query(hash_query::primary_key_query())
            .bind(&self.identity.database)
            .bind(&self.identity.table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DiffError::query(format!("primary key of {}", self.label), e))?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row
                .try_get("COLUMN_NAME")
                .map_err(|e| DiffError::query(format!("primary key of {}", self.label), e))?;
            columns.push(name);
        }

        match columns.len() {
            0 => Err(DiffError::NoPrimaryKey(self.identity.qualified_name())),
            1 => Ok(columns.remove(0)),
            _ => Err(DiffError::UnsupportedKey {
                table: self.identity.qualified_name(),
                reason: format!("composite key ({})", columns.join(", ")),
            }),
        }
    }

    /// Bind the primary-key column used by every range query.
    pub fn bind_primary_key(&mut self, pk_column: &str) {
        self.identity = self.identity.clone().with_primary_key(pk_column);
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_catalog(&self) -> Result<Vec<Column>> {
        let rows: Vec<MySqlRow> = sqlx::query(hash_query::columns_query())
            .bind(&self.identity.database)
            .bind(&self.identity.table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DiffError::query(format!("columns of {}", self.label), e))?;

        rows.iter()
            .map(|row| {
                let name: String = row
                    .try_get("COLUMN_NAME")
                    .map_err(|e| DiffError::query(format!("columns of {}", self.label), e))?;
                let data_type: String = row
                    .try_get("DATA_TYPE")
                    .map_err(|e| DiffError::query(format!("columns of {}", self.label), e))?;
                Ok(Column::new(name, data_type))
            })
            .collect()
    }
}

#[async_trait]
impl TableSnapshot for MysqlTable {
    fn identity(&self) -> &TableIdentity {
        &self.identity
    }

    async fn row_count(&self) -> Result<i64> {
        let sql = hash_query::count_query(&self.identity);
        debug!("{}: {}", self.label, sql);
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DiffError::query(format!("row count of {}", self.label), e))
    }

    async fn min_max_key(&self) -> Result<(i64, i64)> {
        let pk = self.identity.primary_key()?;
        let sql = hash_query::min_max_query(&self.identity, pk);
        debug!("{}: {}", self.label, sql);

        let row: MySqlRow = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DiffError::query(format!("key bounds of {}", self.label), e))?;
        let min: i64 = row
            .try_get("min_pk")
            .map_err(|e| DiffError::query(format!("key bounds of {}", self.label), e))?;
        let max: i64 = row
            .try_get("max_pk")
            .map_err(|e| DiffError::query(format!("key bounds of {}", self.label), e))?;
        Ok((min, max))
    }

    async fn is_aggregate_engine(&self) -> bool {
        match self.server_version().await {
            Ok(version) => {
                debug!("{}: server version {}", self.label, version);
                version.to_lowercase().contains("tidb")
            }
            Err(e) => {
                warn!("{}: engine probe failed, assuming MySQL: {}", self.label, e);
                false
            }
        }
    }

    async fn offset_key(&self, from_key: i64, row_offset: u64) -> Result<i64> {
        let pk = self.identity.primary_key()?;
        let sql = hash_query::offset_key_query(&self.identity, pk);

        let boundary: Option<i64> = sqlx::query_scalar(&sql)
            .bind(from_key)
            .bind(row_offset.saturating_add(1))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                DiffError::query(format!("offset key from {} in {}", from_key, self.label), e)
            })?;

        Ok(boundary.unwrap_or(from_key))
    }

    async fn column_projection(&self) -> Result<Vec<Column>> {
        let catalog = self.load_catalog().await?;
        if catalog.is_empty() {
            return Err(DiffError::SchemaMismatch(format!(
                "table {} not found or has no columns",
                self.identity.qualified_name()
            )));
        }
        if self.identity.columns.is_empty() {
            return Ok(catalog);
        }

        self.identity
            .columns
            .iter()
            .map(|name| {
                catalog
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| {
                        DiffError::SchemaMismatch(format!(
                            "column {} not found in {}",
                            name,
                            self.identity.qualified_name()
                        ))
                    })
            })
            .collect()
    }

    async fn range_fingerprint(
        &self,
        projection: &[Column],
        range: &KeyRange,
        algorithm: FingerprintAlgorithm,
    ) -> Result<Fingerprint> {
        let pk = self.identity.primary_key()?;
        let sql = hash_query::checksum_query(&self.identity, pk, projection, algorithm);

        let value: Option<String> = sqlx::query_scalar(&sql)
            .bind(range.start)
            .bind(range.end)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                DiffError::query(format!("{} checksum of {} {}", algorithm, self.label, range), e)
            })?;

        Ok(value.map(Fingerprint::new).unwrap_or_else(Fingerprint::empty))
    }

    async fn range_signatures(
        &self,
        projection: &[Column],
        range: &KeyRange,
    ) -> Result<RowFingerprint> {
        let pk = self.identity.primary_key()?;
        let sql = hash_query::signatures_query(&self.identity, pk, projection);
        let context = || format!("signatures of {} {}", self.label, range);

        let rows: Vec<MySqlRow> = sqlx::query(&sql)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DiffError::query(context(), e))?;

        let mut signatures = RowFingerprint::with_capacity(rows.len());
        for row in rows {
            let key: i64 = row.try_get("k").map_err(|e| DiffError::query(context(), e))?;
            let signature: Option<Vec<u8>> = row
                .try_get("signature")
                .map_err(|e| DiffError::query(context(), e))?;
            let signature = match signature {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => NULL_SIGNATURE.to_string(),
            };
            signatures.insert(key.to_string(), signature);
        }

        Ok(signatures)
    }
}
