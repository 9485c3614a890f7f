//! Repair script generation.
//!
//! Turns a [`DivergenceReport`] into SQL that brings the destination back in
//! line with the source:
//!
//! - keys missing in the source become `DELETE` statements;
//! - keys to insert or update are dumped from the source with `mysqldump`
//!   and rewritten from `INSERT INTO` to `REPLACE INTO` the destination.
//!
//! The script is appended to the configured output file. Nothing is executed
//! against the destination.

use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{DatabaseConfig, RepairConfig};
use crate::error::{DiffError, Result};
use crate::verify::hash_query::quote_ident;
use crate::verify::types::DivergenceReport;

/// What a repair pass wrote.
#[derive(Debug, Clone, Serialize)]
pub struct RepairSummary {
    /// File the statements were appended to.
    pub path: PathBuf,
    /// `DELETE` statements written.
    pub delete_statements: usize,
    /// `REPLACE` statements written.
    pub replace_statements: usize,
    /// `mysqldump` invocations.
    pub dump_batches: usize,
}

/// Writes repair scripts for one source/destination pair.
pub struct RepairWriter {
    config: RepairConfig,
    source: DatabaseConfig,
    destination: DatabaseConfig,
    pk_column: String,
}

impl RepairWriter {
    /// Create a writer. `pk_column` is the key the divergence lists refer to.
    pub fn new(
        config: RepairConfig,
        source: DatabaseConfig,
        destination: DatabaseConfig,
        pk_column: impl Into<String>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
            pk_column: pk_column.into(),
        }
    }

    /// Append repair statements for `report` to the output file.
    pub async fn write(&self, report: &DivergenceReport) -> Result<RepairSummary> {
        check_thresholds(report, self.config.max_keys)?;

        let deletes = parse_keys(&report.delete)?;
        let mut upserts = parse_keys(&report.insert)?;
        upserts.extend(parse_keys(&report.update)?);

        let mut summary = RepairSummary {
            path: self.config.output.clone(),
            delete_statements: 0,
            replace_statements: 0,
            dump_batches: 0,
        };
        if deletes.is_empty() && upserts.is_empty() {
            return Ok(summary);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.output)
            .await?;

        let statements = delete_statements(&self.destination, &self.pk_column, &deletes);
        for statement in &statements {
            file.write_all(statement.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        summary.delete_statements = statements.len();

        for batch in upserts.chunks(self.config.batch_size.max(1)) {
            let dump = self.dump_rows(batch).await?;
            let (rewritten, count) =
                rewrite_dump(&dump, &self.source.table, &self.destination);
            file.write_all(rewritten.as_bytes()).await?;
            summary.replace_statements += count;
            summary.dump_batches += 1;
        }

        file.flush().await?;

        info!(
            "Repair script {}: {} deletes, {} replaces in {} dump batches",
            summary.path.display(),
            summary.delete_statements,
            summary.replace_statements,
            summary.dump_batches
        );

        Ok(summary)
    }

    async fn dump_rows(&self, keys: &[i64]) -> Result<String> {
        let args = mysqldump_args(&self.source, &self.pk_column, keys);
        debug!("{} {}", self.config.mysqldump.display(), args.join(" "));

        let output = Command::new(&self.config.mysqldump)
            .args(&args)
            .env("MYSQL_PWD", &self.source.password)
            .output()
            .await
            .map_err(|e| {
                DiffError::Repair(format!(
                    "cannot run {}: {}",
                    self.config.mysqldump.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(DiffError::Repair(format!(
                "mysqldump exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Refuse when any list is longer than `max_keys`.
///
/// A list that long usually means a whole table is missing or mis-pointed,
/// not drift.
pub fn check_thresholds(report: &DivergenceReport, max_keys: usize) -> Result<()> {
    for (list, keys) in [
        ("insert", &report.insert),
        ("update", &report.update),
        ("delete", &report.delete),
    ] {
        if keys.len() > max_keys {
            return Err(DiffError::RepairRefused {
                list,
                count: keys.len(),
                limit: max_keys,
            });
        }
    }
    Ok(())
}

/// Parse keys as integers before they are embedded in SQL.
pub fn parse_keys(keys: &[String]) -> Result<Vec<i64>> {
    keys.iter()
        .map(|k| {
            k.trim()
                .parse::<i64>()
                .map_err(|_| DiffError::Repair(format!("key {:?} is not an integer", k)))
        })
        .collect()
}

/// One `DELETE` per key against the destination table.
pub fn delete_statements(destination: &DatabaseConfig, pk_column: &str, keys: &[i64]) -> Vec<String> {
    let table = format!(
        "{}.{}",
        quote_ident(&destination.database),
        quote_ident(&destination.table)
    );
    let pk = quote_ident(pk_column);
    keys.iter()
        .map(|k| format!("DELETE FROM {} WHERE {} = {};", table, pk, k))
        .collect()
}

/// Arguments for dumping `keys` from the source table.
///
/// The password is passed through `MYSQL_PWD`, never on the command line.
pub fn mysqldump_args(source: &DatabaseConfig, pk_column: &str, keys: &[i64]) -> Vec<String> {
    let key_list = keys
        .iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(",");

    vec![
        format!("--host={}", source.host),
        format!("--port={}", source.port),
        format!("--user={}", source.user),
        "--compact".to_string(),
        "--no-create-info".to_string(),
        "--single-transaction".to_string(),
        "--skip-extended-insert".to_string(),
        "--set-gtid-purged=OFF".to_string(),
        format!("--where={} IN ({})", quote_ident(pk_column), key_list),
        source.database.clone(),
        source.table.clone(),
    ]
}

/// Rewrite dumped `INSERT INTO` lines to `REPLACE INTO` the destination.
///
/// Returns the rewritten text and the number of statements rewritten. Lines
/// that are not inserts (session settings, comments) pass through unchanged.
pub fn rewrite_dump(dump: &str, source_table: &str, destination: &DatabaseConfig) -> (String, usize) {
    let from = format!("INSERT INTO {} ", quote_ident(source_table));
    let to = format!(
        "REPLACE INTO {}.{} ",
        quote_ident(&destination.database),
        quote_ident(&destination.table)
    );

    let mut out = String::with_capacity(dump.len());
    let mut count = 0;
    for line in dump.lines() {
        match line.strip_prefix(&from) {
            Some(rest) => {
                out.push_str(&to);
                out.push_str(rest);
                count += 1;
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    (out, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db(host: &str, database: &str, table: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: host.to_string(),
            port: 3306,
            user: "checker".to_string(),
            password: "secret".to_string(),
            database: database.to_string(),
            table: table.to_string(),
            max_connections: None,
        }
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_threshold_refuses_large_lists() {
        let report = DivergenceReport {
            insert: keys(&["1", "2"]),
            update: keys(&["3", "4", "5"]),
            delete: vec![],
        };
        assert!(check_thresholds(&report, 3).is_ok());
        match check_thresholds(&report, 2) {
            Err(DiffError::RepairRefused { list, count, limit }) => {
                assert_eq!(list, "update");
                assert_eq!(count, 3);
                assert_eq!(limit, 2);
            }
            other => panic!("expected RepairRefused, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_keys_rejects_non_integers() {
        assert_eq!(parse_keys(&keys(&["1", "-7"])).unwrap(), vec![1, -7]);
        assert!(matches!(
            parse_keys(&keys(&["1; DROP TABLE orders"])),
            Err(DiffError::Repair(_))
        ));
    }

    #[test]
    fn test_delete_statements() {
        let dest = db("10.0.0.2", "shop", "orders");
        assert_eq!(
            delete_statements(&dest, "id", &[4, 9]),
            vec![
                "DELETE FROM `shop`.`orders` WHERE `id` = 4;",
                "DELETE FROM `shop`.`orders` WHERE `id` = 9;",
            ]
        );
    }

    #[test]
    fn test_mysqldump_args_keep_password_out() {
        let src = db("10.0.0.1", "shop", "orders");
        let args = mysqldump_args(&src, "id", &[1, 2, 3]);
        assert!(args.contains(&"--where=`id` IN (1,2,3)".to_string()));
        assert!(args.contains(&"--no-create-info".to_string()));
        assert!(args.contains(&"--host=10.0.0.1".to_string()));
        assert_eq!(&args[args.len() - 2..], &["shop".to_string(), "orders".to_string()]);
        assert!(!args.iter().any(|a| a.contains("secret")));
    }

    #[test]
    fn test_rewrite_dump() {
        let dest = db("10.0.0.2", "shop_copy", "orders_v2");
        let dump = "/*!40101 SET @saved_cs_client = @@character_set_client */;\n\
                    INSERT INTO `orders` VALUES (1,'a');\n\
                    INSERT INTO `orders` VALUES (2,'INSERT INTO `orders` ');\n";
        let (out, count) = rewrite_dump(dump, "orders", &dest);

        assert_eq!(count, 2);
        assert!(out.starts_with("/*!40101"));
        assert!(out.contains("REPLACE INTO `shop_copy`.`orders_v2` VALUES (1,'a');"));
        assert!(out.contains("REPLACE INTO `shop_copy`.`orders_v2` VALUES (2,'INSERT INTO `orders` ');"));
    }

    #[tokio::test]
    async fn test_write_deletes_only_appends() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("repair.sql");
        std::fs::write(&output, "-- previous\n").unwrap();

        let config = RepairConfig {
            enabled: true,
            output: output.clone(),
            ..Default::default()
        };
        let writer = RepairWriter::new(
            config,
            db("10.0.0.1", "shop", "orders"),
            db("10.0.0.2", "shop", "orders"),
            "id",
        );
        let report = DivergenceReport {
            insert: vec![],
            update: vec![],
            delete: keys(&["4", "8"]),
        };

        let summary = writer.write(&report).await.unwrap();
        assert_eq!(summary.delete_statements, 2);
        assert_eq!(summary.dump_batches, 0);

        let written = std::fs::read_to_string(&output).unwrap();
        assert!(written.starts_with("-- previous\n"));
        assert!(written.contains("DELETE FROM `shop`.`orders` WHERE `id` = 8;"));
    }

    #[tokio::test]
    async fn test_missing_mysqldump_is_repair_error() {
        let dir = TempDir::new().unwrap();
        let config = RepairConfig {
            enabled: true,
            mysqldump: dir.path().join("no-such-mysqldump"),
            output: dir.path().join("repair.sql"),
            ..Default::default()
        };
        let writer = RepairWriter::new(
            config,
            db("10.0.0.1", "shop", "orders"),
            db("10.0.0.2", "shop", "orders"),
            "id",
        );
        let report = DivergenceReport {
            insert: keys(&["3"]),
            update: vec![],
            delete: vec![],
        };

        let err = writer.write(&report).await.unwrap_err();
        assert!(matches!(err, DiffError::Repair(_)));
        assert_eq!(err.exit_code(), 5);
    }
}
