/*
 * Copyright 2019-2021 Wren Powell
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The default index provider, backed by an embedded (bundled) SQLite database.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

use super::{ChunkRecord, IndexProvider, IndexStats, ObjectMapEntry, ObjectMetadata, ObjectPage, ObjectRecord};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS object (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL UNIQUE,
        original_length INTEGER NOT NULL,
        compressed_length INTEGER NOT NULL,
        chunk_count INTEGER NOT NULL,
        created_utc INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS chunk (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key TEXT NOT NULL UNIQUE,
        length INTEGER NOT NULL,
        refcount INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS object_map (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        object_key TEXT NOT NULL,
        chunk_key TEXT NOT NULL,
        chunk_length INTEGER NOT NULL,
        chunk_ordinal INTEGER NOT NULL,
        chunk_address INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_object_map_object_address
        ON object_map(object_key, chunk_address);
    CREATE INDEX IF NOT EXISTS idx_object_map_chunk_key ON object_map(chunk_key);
";

/// The default `IndexProvider`, backed by an embedded SQLite database.
///
/// All mutating operations are serialized through a single internal lock. The three conceptual
/// locks from the concurrency model (config, object/map, chunk) are always acquired in that
/// order, but because SQLite access here is single-connection, they collapse onto one physical
/// critical section; the ordering discipline is kept so that a future multi-connection provider
/// can split them without changing call sites.
pub struct SqliteIndexProvider {
    connection: Mutex<Connection>,
}

impl SqliteIndexProvider {
    /// Open (creating if necessary) a SQLite-backed index at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connection = Connection::open(path)?;
        connection.execute_batch(SCHEMA)?;
        Ok(SqliteIndexProvider {
            connection: Mutex::new(connection),
        })
    }

    /// Open a purely in-memory SQLite-backed index. Useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute_batch(SCHEMA)?;
        Ok(SqliteIndexProvider {
            connection: Mutex::new(connection),
        })
    }

    fn now_utc() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl IndexProvider for SqliteIndexProvider {
    fn is_initialized(&self) -> Result<bool> {
        let conn = self.connection.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn add_config_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connection.lock().unwrap();
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_config_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection.lock().unwrap();
        conn.query_row("SELECT value FROM config WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(Error::from)
    }

    fn get_statistics(&self) -> Result<IndexStats> {
        let conn = self.connection.lock().unwrap();
        let objects: i64 = conn.query_row("SELECT COUNT(*) FROM object", [], |row| row.get(0))?;
        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunk", [], |row| row.get(0))?;
        let logical_bytes: Option<i64> = conn.query_row(
            "SELECT SUM(length * refcount) FROM chunk",
            [],
            |row| row.get(0),
        )?;
        let physical_bytes: Option<i64> =
            conn.query_row("SELECT SUM(length) FROM chunk", [], |row| row.get(0))?;
        Ok(IndexStats {
            objects: objects as u64,
            chunks: chunks as u64,
            logical_bytes: logical_bytes.unwrap_or(0) as u64,
            physical_bytes: physical_bytes.unwrap_or(0) as u64,
        })
    }

    fn list_objects(
        &self,
        prefix: Option<&str>,
        index_start: i64,
        max_results: u32,
    ) -> Result<ObjectPage> {
        if !(1..=100).contains(&max_results) {
            return Err(Error::InvalidArgument(
                "max_results must be between 1 and 100".into(),
            ));
        }
        if index_start < 0 {
            return Err(Error::InvalidArgument(
                "index_start must not be negative".into(),
            ));
        }

        let conn = self.connection.lock().unwrap();
        let like_pattern = prefix.map(|p| format!("{}%", p.replace('%', "\\%").replace('_', "\\_")));

        let mut stmt = conn.prepare(
            "SELECT id, key, original_length, compressed_length, chunk_count, created_utc
             FROM object
             WHERE id > ?1 AND (?2 IS NULL OR key LIKE ?2 ESCAPE '\\')
             ORDER BY id ASC
             LIMIT ?3",
        )?;

        let mut objects = Vec::new();
        let mut last_id = index_start;
        let rows = stmt.query_map(params![index_start, like_pattern, max_results], |row| {
            let id: i64 = row.get(0)?;
            Ok((
                id,
                ObjectRecord {
                    key: row.get(1)?,
                    original_length: row.get::<_, i64>(2)? as u64,
                    compressed_length: row.get::<_, i64>(3)? as u64,
                    chunk_count: row.get::<_, i64>(4)? as u64,
                    created_utc: row.get(5)?,
                },
            ))
        })?;

        for row in rows {
            let (id, object) = row?;
            last_id = id;
            objects.push(object);
        }

        let next_index_start = if objects.len() as u32 == max_results {
            last_id
        } else {
            index_start
        };

        Ok(ObjectPage {
            objects,
            next_index_start,
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.connection.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM object WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_object_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let conn = self.connection.lock().unwrap();
        let object = conn
            .query_row(
                "SELECT key, original_length, compressed_length, chunk_count, created_utc
                 FROM object WHERE key = ?1",
                params![key],
                |row| {
                    Ok(ObjectRecord {
                        key: row.get(0)?,
                        original_length: row.get::<_, i64>(1)? as u64,
                        compressed_length: row.get::<_, i64>(2)? as u64,
                        chunk_count: row.get::<_, i64>(3)? as u64,
                        created_utc: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let object = match object {
            Some(object) => object,
            None => return Ok(None),
        };

        let mut stmt = conn.prepare(
            "SELECT object_key, chunk_key, chunk_length, chunk_ordinal, chunk_address
             FROM object_map WHERE object_key = ?1 ORDER BY chunk_address ASC",
        )?;
        let map = stmt
            .query_map(params![key], |row| {
                Ok(ObjectMapEntry {
                    object_key: row.get(0)?,
                    chunk_key: row.get(1)?,
                    chunk_length: row.get::<_, i64>(2)? as u64,
                    ordinal_position: row.get::<_, i64>(3)? as u64,
                    byte_address: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(ObjectMetadata { object, map }))
    }

    fn get_chunk_metadata(&self, chunk_key: &str) -> Result<Option<ChunkRecord>> {
        let conn = self.connection.lock().unwrap();
        conn.query_row(
            "SELECT key, length, refcount FROM chunk WHERE key = ?1",
            params![chunk_key],
            |row| {
                Ok(ChunkRecord {
                    key: row.get(0)?,
                    length: row.get::<_, i64>(1)? as u64,
                    refcount: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_object_map(&self, key: &str) -> Result<Vec<ObjectMapEntry>> {
        let conn = self.connection.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT object_key, chunk_key, chunk_length, chunk_ordinal, chunk_address
             FROM object_map WHERE object_key = ?1",
        )?;
        let entries = stmt
            .query_map(params![key], |row| {
                Ok(ObjectMapEntry {
                    object_key: row.get(0)?,
                    chunk_key: row.get(1)?,
                    chunk_length: row.get::<_, i64>(2)? as u64,
                    ordinal_position: row.get::<_, i64>(3)? as u64,
                    byte_address: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn get_object_map_for_position(
        &self,
        key: &str,
        position: u64,
    ) -> Result<Option<ObjectMapEntry>> {
        let conn = self.connection.lock().unwrap();
        conn.query_row(
            "SELECT object_key, chunk_key, chunk_length, chunk_ordinal, chunk_address
             FROM object_map
             WHERE object_key = ?1 AND chunk_address <= ?2 AND ?2 < chunk_address + chunk_length",
            params![key, position as i64],
            |row| {
                Ok(ObjectMapEntry {
                    object_key: row.get(0)?,
                    chunk_key: row.get(1)?,
                    chunk_length: row.get::<_, i64>(2)? as u64,
                    ordinal_position: row.get::<_, i64>(3)? as u64,
                    byte_address: row.get::<_, i64>(4)? as u64,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn add_object(
        &self,
        key: &str,
        original_length: u64,
        compressed_length: u64,
        chunk_count: u64,
    ) -> Result<()> {
        let conn = self.connection.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO object (key, original_length, compressed_length, chunk_count, created_utc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                original_length as i64,
                compressed_length as i64,
                chunk_count as i64,
                Self::now_utc()
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn add_object_map(
        &self,
        object_key: &str,
        chunk_key: &str,
        chunk_length: u64,
        ordinal_position: u64,
        byte_address: u64,
    ) -> Result<()> {
        let conn = self.connection.lock().unwrap();
        conn.execute(
            "INSERT INTO object_map (object_key, chunk_key, chunk_length, chunk_ordinal, chunk_address)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                object_key,
                chunk_key,
                chunk_length as i64,
                ordinal_position as i64,
                byte_address as i64
            ],
        )?;
        Ok(())
    }

    fn increment_chunk_refcount(&self, chunk_key: &str, length: u64) -> Result<bool> {
        let conn = self.connection.lock().unwrap();
        let updated = conn.execute(
            "UPDATE chunk SET refcount = refcount + 1 WHERE key = ?1",
            params![chunk_key],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO chunk (key, length, refcount) VALUES (?1, ?2, 1)",
                params![chunk_key, length as i64],
            )?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn decrement_chunk_refcount(&self, chunk_key: &str) -> Result<bool> {
        let conn = self.connection.lock().unwrap();
        let refcount: Option<i64> = conn
            .query_row(
                "SELECT refcount FROM chunk WHERE key = ?1",
                params![chunk_key],
                |row| row.get(0),
            )
            .optional()?;

        let refcount = match refcount {
            Some(refcount) => refcount,
            None => return Ok(false),
        };

        if refcount <= 1 {
            conn.execute("DELETE FROM chunk WHERE key = ?1", params![chunk_key])?;
            Ok(true)
        } else {
            conn.execute(
                "UPDATE chunk SET refcount = refcount - 1 WHERE key = ?1",
                params![chunk_key],
            )?;
            Ok(false)
        }
    }

    fn delete(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.connection.lock().unwrap();

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM object WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(Error::NotFound);
        }

        Self::remove_object_state(&conn, key)
    }

    fn rollback_object_map(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.connection.lock().unwrap();
        Self::remove_object_state(&conn, key)
    }
}

impl SqliteIndexProvider {
    /// Decrement (or remove) the chunk rows referenced by `key`'s `object_map` entries, then
    /// delete those entries and `key`'s `object` row if one exists. Returns the keys of chunks
    /// whose refcount reached zero.
    ///
    /// Used by both `delete` (which requires the `object` row to exist, checked by the caller)
    /// and `rollback_object_map` (which does not: a partial write never created one).
    fn remove_object_state(conn: &Connection, key: &str) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT DISTINCT chunk_key FROM object_map WHERE object_key = ?1")?;
        let chunk_keys = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut gc_keys = Vec::new();
        for chunk_key in &chunk_keys {
            let refcount: i64 = conn.query_row(
                "SELECT refcount FROM chunk WHERE key = ?1",
                params![chunk_key],
                |row| row.get(0),
            )?;
            if refcount <= 1 {
                conn.execute("DELETE FROM chunk WHERE key = ?1", params![chunk_key])?;
                gc_keys.push(chunk_key.clone());
            } else {
                conn.execute(
                    "UPDATE chunk SET refcount = refcount - 1 WHERE key = ?1",
                    params![chunk_key],
                )?;
            }
        }

        conn.execute(
            "DELETE FROM object_map WHERE object_key = ?1",
            params![key],
        )?;
        conn.execute("DELETE FROM object WHERE key = ?1", params![key])?;

        Ok(gc_keys)
    }
}
