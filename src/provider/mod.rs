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

//! The index-provider contract: typed tables for config, objects, chunks, and object-maps.
//!
//! The default provider persists rows in an embedded `rusqlite` database. Alternate providers
//! supply their own persistence as long as they uphold the same operations and the same
//! atomicity and pagination contracts.

mod sqlite;

pub use sqlite::SqliteIndexProvider;

use serde::Serialize;

use crate::error::Result;

/// A stored object's row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectRecord {
    /// The object's unique, non-empty key.
    pub key: String,
    /// The original (pre-chunking) length of the object in bytes.
    pub original_length: u64,
    /// The sum of the lengths of the chunks referenced by this object's map.
    pub compressed_length: u64,
    /// The number of chunks making up this object.
    pub chunk_count: u64,
    /// The UTC unix timestamp, in seconds, at which the object was created.
    pub created_utc: i64,
}

/// A stored chunk's row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// The chunk's fingerprint.
    pub key: String,
    /// The chunk's length in bytes.
    pub length: u64,
    /// The number of live object-map entries referencing this chunk.
    pub refcount: u64,
}

/// A single `(chunk_key, length, ordinal, address)` binding of an object position to a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMapEntry {
    /// The key of the object this entry belongs to.
    pub object_key: String,
    /// The key of the chunk this entry references.
    pub chunk_key: String,
    /// The length of the referenced chunk.
    pub chunk_length: u64,
    /// This entry's 0-based position in the object's chunk sequence.
    pub ordinal_position: u64,
    /// The start offset of this entry within the original object.
    pub byte_address: u64,
}

/// An object's row together with its map entries, sorted by ascending `byte_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// The object's row.
    pub object: ObjectRecord,
    /// The object's map entries, in ascending `byte_address` order.
    pub map: Vec<ObjectMapEntry>,
}

/// Aggregate counts over the index, as returned by `IndexProvider::get_statistics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    /// The number of stored objects.
    pub objects: u64,
    /// The number of unique stored chunks.
    pub chunks: u64,
    /// The sum, over all chunks, of `length * refcount`: the pre-dedup size across all
    /// references.
    pub logical_bytes: u64,
    /// The sum, over all chunks, of `length`: the unique bytes actually stored.
    pub physical_bytes: u64,
}

/// One page of results from `IndexProvider::list_objects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectPage {
    /// The objects in this page, in ascending internal id order.
    pub objects: Vec<ObjectRecord>,
    /// The cursor to pass as `index_start` to retrieve the next page.
    ///
    /// Equal to `index_start` (no progress) when fewer than `max_results` rows were returned.
    pub next_index_start: i64,
}

/// The index-provider contract consumed by the dedupe engine.
///
/// Implementations must serialize mutating operations with respect to each other per the
/// concurrency model: config, object/map, and chunk state are each guarded by their own
/// conceptual lock, acquired in the fixed order `{config, object, chunk}` whenever more than one
/// is needed, to prevent deadlock.
pub trait IndexProvider {
    /// Return whether the index has been initialized (its config has been written).
    fn is_initialized(&self) -> Result<bool>;

    /// Insert or overwrite a config value.
    fn add_config_value(&self, key: &str, value: &str) -> Result<()>;

    /// Look up a config value, returning `None` if absent.
    fn get_config_value(&self, key: &str) -> Result<Option<String>>;

    /// Compute aggregate statistics over the index.
    fn get_statistics(&self) -> Result<IndexStats>;

    /// List up to `max_results` objects (1-100) whose internal id is strictly greater than
    /// `index_start`, optionally restricted to keys starting with `prefix`, in ascending id
    /// order.
    fn list_objects(
        &self,
        prefix: Option<&str>,
        index_start: i64,
        max_results: u32,
    ) -> Result<ObjectPage>;

    /// Return whether an object with the given key exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Look up an object's metadata together with its map entries, sorted by `byte_address`.
    fn get_object_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>>;

    /// Look up a chunk's row.
    fn get_chunk_metadata(&self, chunk_key: &str) -> Result<Option<ChunkRecord>>;

    /// Return all map entries for an object, in unspecified order.
    fn get_object_map(&self, key: &str) -> Result<Vec<ObjectMapEntry>>;

    /// Return the unique map entry of `key` whose `[byte_address, byte_address + chunk_length)`
    /// range contains `position`, or `None` if no such entry exists.
    fn get_object_map_for_position(
        &self,
        key: &str,
        position: u64,
    ) -> Result<Option<ObjectMapEntry>>;

    /// Insert a new object row. Fails if an object with this key already exists.
    fn add_object(
        &self,
        key: &str,
        original_length: u64,
        compressed_length: u64,
        chunk_count: u64,
    ) -> Result<()>;

    /// Insert a new object-map row.
    fn add_object_map(
        &self,
        object_key: &str,
        chunk_key: &str,
        chunk_length: u64,
        ordinal_position: u64,
        byte_address: u64,
    ) -> Result<()>;

    /// Create a chunk row with `refcount = 1` if none exists for `chunk_key`, otherwise
    /// increment its refcount. Returns whether the chunk was newly created.
    fn increment_chunk_refcount(&self, chunk_key: &str, length: u64) -> Result<bool>;

    /// Decrement a chunk's refcount, removing its row if the refcount reaches zero. Returns
    /// whether the row was removed (`should_gc`). Returns `Ok(false)` if no such chunk exists.
    fn decrement_chunk_refcount(&self, chunk_key: &str) -> Result<bool>;

    /// Atomically decrement the refcount of every chunk referenced by `key`'s map, delete all of
    /// the object's map entries and its object row, and return the keys of chunks whose refcount
    /// reached zero (to be garbage-collected by the caller). Fails if `key` does not exist.
    fn delete(&self, key: &str) -> Result<Vec<String>>;

    /// Reverse whatever object-map rows and chunk refcount increments a partial, never-committed
    /// `write` left behind for `key`.
    ///
    /// Unlike [`delete`](IndexProvider::delete), this never fails for a missing `object` row: a
    /// write that fails partway through chunk emission has not yet called `add_object` (§4.4
    /// calls `add_object` only after every chunk has been emitted), so the object row never
    /// existed in the first place. This op still must find and remove any `object_map` rows
    /// recorded for `key` and decrement (or remove) the chunk rows they reference, exactly as
    /// `delete` does, but keyed purely off `object_map.object_key` rather than requiring a prior
    /// `object` row. Returns the keys of chunks whose refcount reached zero, to be
    /// garbage-collected by the caller. A no-op (empty result) if no state exists for `key`.
    fn rollback_object_map(&self, key: &str) -> Result<Vec<String>>;
}
