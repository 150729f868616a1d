//! The index store: a single SQLite database holding every indexed file path.
//!
//! Each indexing run ("index") is identified by a fresh UUID. All rows committed during a run
//! share that UUID and a single `index_date` timestamp. Rows are append-only: nothing in this
//! module ever updates or deletes a row, it only inserts new ones and queries existing ones.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::errors::{ErrorKind, Result, ResultExt};

const APP_NAME: &str = "nix-cache-index";

/// Summary information about one indexing run, as returned by `list_indices`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub id: Uuid,
    pub channel: String,
    pub date: DateTime<Utc>,
    pub file_count: u64,
}

/// One row matching a `query` lookup.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QueryResult {
    pub pkg_name: String,
    pub output_name: String,
    pub output_hash: String,
    pub version: String,
    pub full_path: String,
}

/// The index store. Wraps a single SQLite connection; callers are expected to hold one
/// `IndexStore` per writer and may open additional connections (via `open`) for concurrent
/// queries, since SQLite in WAL mode lets readers proceed during a write.
pub struct IndexStore {
    conn: Connection,
}

/// Resolves the default path of the index database, creating its parent directory if missing.
pub fn default_db_path(cache_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match cache_dir {
        Some(base) => base.to_path_buf(),
        None => {
            let xdg =
                xdg::BaseDirectories::with_prefix(APP_NAME).chain_err(|| ErrorKind::CacheDir)?;
            xdg.create_cache_directory("").chain_err(|| ErrorKind::CacheDir)?
        }
    };
    std::fs::create_dir_all(&dir).chain_err(|| ErrorKind::CacheDir)?;
    Ok(dir.join("index.db"))
}

impl IndexStore {
    /// Opens (creating if necessary) the index database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<IndexStore> {
        let conn = Connection::open(path)
            .chain_err(|| ErrorKind::StorageError("opening database".to_string()))?;
        let store = IndexStore { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Opens an in-memory database. Used by tests and by callers that only need a throwaway
    /// index for the lifetime of the process.
    pub fn open_in_memory() -> Result<IndexStore> {
        let conn = Connection::open_in_memory()
            .chain_err(|| ErrorKind::StorageError("opening database".to_string()))?;
        let store = IndexStore { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                index_channel VARCHAR(255) NOT NULL,
                index_date    TEXT         NOT NULL,
                index_uuid    CHAR(36)     NOT NULL,
                pkg_name      VARCHAR(255) NOT NULL,
                output_name   VARCHAR(255) NOT NULL,
                output_hash   VARCHAR(255) NOT NULL,
                version       VARCHAR(50)  NOT NULL,
                full_path     VARCHAR(255) NOT NULL,
                file_name     VARCHAR(255) NOT NULL,
                PRIMARY KEY (pkg_name, index_uuid, output_hash, full_path)
            );

            CREATE INDEX IF NOT EXISTS idx_listings_full_path
                ON listings (index_uuid, full_path);

            CREATE INDEX IF NOT EXISTS idx_listings_file_name
                ON listings (index_uuid, file_name);
            "#,
        )?;

        Ok(())
    }

    /// Inserts every file of one listing under a single transaction.
    ///
    /// `file_name` is derived as the substring after the final `/` of `full_path`. On a
    /// unique-constraint violation or I/O error, the whole transaction is rolled back and no
    /// row for this listing is left behind.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_package(
        &mut self,
        index_date: DateTime<Utc>,
        channel: &str,
        index_uuid: Uuid,
        pkg_name: &str,
        output_name: &str,
        output_hash: &str,
        version: &str,
        files: &[String],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO listings
                    (index_channel, index_date, index_uuid, pkg_name, output_name,
                     output_hash, version, full_path, file_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            for full_path in files {
                let file_name = full_path.rsplit('/').next().unwrap_or(full_path.as_str());
                stmt.execute(params![
                    channel,
                    index_date.to_rfc3339(),
                    index_uuid.to_string(),
                    pkg_name,
                    output_name,
                    output_hash,
                    version,
                    full_path,
                    file_name,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Lists the indexing runs recorded for `channel`, most recent first.
    pub fn list_indices(&self, channel: &str) -> Result<Vec<IndexInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT index_uuid, index_date, COUNT(*)
             FROM listings
             WHERE index_channel = ?1
             GROUP BY index_uuid, index_date
             ORDER BY index_date DESC",
        )?;

        let rows = stmt.query_map(params![channel], |row| {
            let uuid_str: String = row.get(0)?;
            let date_str: String = row.get(1)?;
            let count: i64 = row.get(2)?;
            Ok((uuid_str, date_str, count))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (uuid_str, date_str, count) = row?;
            let id = Uuid::parse_str(&uuid_str)
                .map_err(|_| ErrorKind::StorageError("corrupt index_uuid column".to_string()))?;
            let date = DateTime::parse_from_rfc3339(&date_str)
                .map_err(|_| ErrorKind::StorageError("corrupt index_date column".to_string()))?
                .with_timezone(&Utc);
            result.push(IndexInfo {
                id,
                channel: channel.to_string(),
                date,
                file_count: count as u64,
            });
        }

        Ok(result)
    }

    /// Exact-match lookup scoped to a single index.
    ///
    /// Matches against `full_path` when `param` contains more than one `/`, otherwise against
    /// `file_name`. An empty result is not an error.
    pub fn query(&self, index_uuid: Uuid, param: &str) -> Result<Vec<QueryResult>> {
        let column = if param.matches('/').count() > 1 {
            "full_path"
        } else {
            "file_name"
        };

        let sql = format!(
            "SELECT pkg_name, output_name, output_hash, version, full_path
             FROM listings
             WHERE index_uuid = ?1 AND {} = ?2",
            column
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![index_uuid.to_string(), param], |row| {
            Ok(QueryResult {
                pkg_name: row.get(0)?,
                output_name: row.get(1)?,
                output_hash: row.get(2)?,
                version: row.get(3)?,
                full_path: row.get(4)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(store: &mut IndexStore, uuid: Uuid, date: DateTime<Utc>) {
        store
            .insert_package(
                date,
                "nixos-24.05",
                uuid,
                "glibc",
                "dev",
                "abc",
                "2.38",
                &["/include/stdio.h".to_string()],
            )
            .unwrap();
    }

    #[test]
    fn s1_query_by_basename_and_full_path() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        seed(&mut store, uuid, Utc::now());

        let by_name = store.query(uuid, "stdio.h").unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].pkg_name, "glibc");
        assert_eq!(by_name[0].full_path, "/include/stdio.h");

        let by_path = store.query(uuid, "/include/stdio.h").unwrap();
        assert_eq!(by_path, by_name);
    }

    #[test]
    fn s2_disambiguates_basename_from_full_path() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        let now = Utc::now();

        store
            .insert_package(
                now,
                "nixos-24.05",
                uuid,
                "glibc",
                "dev",
                "abc",
                "2.38",
                &["/lib/libc.so.6".to_string()],
            )
            .unwrap();
        store
            .insert_package(
                now,
                "nixos-24.05",
                uuid,
                "glibc-compat",
                "dev",
                "def",
                "2.27",
                &["/lib64/libc.so.6".to_string()],
            )
            .unwrap();

        let by_name = store.query(uuid, "libc.so.6").unwrap();
        assert_eq!(by_name.len(), 2);

        let by_path = store.query(uuid, "/lib/libc.so.6").unwrap();
        assert_eq!(by_path.len(), 1);
        assert_eq!(by_path[0].pkg_name, "glibc");
    }

    #[test]
    fn s3_nonmatching_query_is_empty_not_error() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        seed(&mut store, uuid, Utc::now());

        assert_eq!(store.query(uuid, "nonexistent").unwrap(), Vec::new());
    }

    #[test]
    fn query_is_scoped_to_one_index_uuid() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let uuid_a = Uuid::new_v4();
        let uuid_b = Uuid::new_v4();
        seed(&mut store, uuid_a, Utc::now());

        assert_eq!(store.query(uuid_b, "stdio.h").unwrap(), Vec::new());
    }

    #[test]
    fn list_indices_groups_by_run_and_orders_descending() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let older = Utc::now() - chrono::Duration::hours(1);
        let newer = Utc::now();

        let uuid_old = Uuid::new_v4();
        let uuid_new = Uuid::new_v4();
        seed(&mut store, uuid_old, older);
        seed(&mut store, uuid_new, newer);

        let indices = store.list_indices("nixos-24.05").unwrap();
        assert_eq!(indices.len(), 2);
        assert_eq!(indices[0].id, uuid_new);
        assert_eq!(indices[0].file_count, 1);
        assert_eq!(indices[1].id, uuid_old);
    }

    #[test]
    fn duplicate_row_within_a_run_is_rejected() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        let now = Utc::now();
        seed(&mut store, uuid, now);

        let err = store
            .insert_package(
                now,
                "nixos-24.05",
                uuid,
                "glibc",
                "dev",
                "abc",
                "2.38",
                &["/include/stdio.h".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err.0, ErrorKind::Sqlite(_)));
    }

    #[test]
    fn file_name_is_last_path_segment() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let uuid = Uuid::new_v4();
        store
            .insert_package(
                Utc::now(),
                "nixos-24.05",
                uuid,
                "pkgconf",
                "dev",
                "abc",
                "2.1",
                &["/share/pkgconfig/libfoo.pc".to_string()],
            )
            .unwrap();

        let result = store.query(uuid, "libfoo.pc").unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].full_path, "/share/pkgconfig/libfoo.pc");
    }
}
