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

//! The dedupe engine: the write pipeline, reads, deletes, and the thin statistics/listing
//! wrappers built on top of the index provider and the chunk store.

use std::io::Read;

use crate::chunk::chunk as chunk_stream;
use crate::config::{self, ChunkingParams};
use crate::error::{Error, Result};
use crate::provider::{IndexProvider, ObjectMetadata, ObjectPage, ObjectRecord};
use crate::sanitize::sanitize_key;
use crate::store::ChunkStore;
use crate::stream::ObjectReadStream;

/// Aggregate statistics over the index, with the dedup ratio derived from logical and physical
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct IndexStats {
    /// The number of stored objects.
    pub objects: u64,
    /// The number of unique stored chunks.
    pub chunks: u64,
    /// The pre-dedup size across all references.
    pub logical_bytes: u64,
    /// The unique bytes actually stored.
    pub physical_bytes: u64,
    /// `logical_bytes / physical_bytes`, or `0.0` if either is zero.
    pub ratio_x: f64,
    /// `100 * (1 - physical_bytes / logical_bytes)`, or `0.0` if either is zero.
    pub ratio_pct: f64,
}

impl From<crate::provider::IndexStats> for IndexStats {
    fn from(stats: crate::provider::IndexStats) -> Self {
        let (ratio_x, ratio_pct) = if stats.logical_bytes > 0 && stats.physical_bytes > 0 {
            let logical = stats.logical_bytes as f64;
            let physical = stats.physical_bytes as f64;
            (logical / physical, 100.0 * (1.0 - physical / logical))
        } else {
            (0.0, 0.0)
        };
        IndexStats {
            objects: stats.objects,
            chunks: stats.chunks,
            logical_bytes: stats.logical_bytes,
            physical_bytes: stats.physical_bytes,
            ratio_x,
            ratio_pct,
        }
    }
}

/// A content-addressed deduplication engine over an `IndexProvider` and a `ChunkStore`.
pub struct DedupeEngine<P, S> {
    provider: P,
    store: S,
    params: ChunkingParams,
}

impl<P: IndexProvider, S: ChunkStore> DedupeEngine<P, S> {
    /// Create a brand-new index, persisting `params` as its chunking configuration.
    ///
    /// Fails if `provider` is already initialized.
    pub fn create(provider: P, store: S, params: ChunkingParams) -> Result<Self> {
        params.validate()?;
        if provider.is_initialized()? {
            return Err(Error::InvalidArgument(
                "index has already been initialized".into(),
            ));
        }
        for (key, value) in params.to_config_values() {
            provider.add_config_value(key, &value)?;
        }
        log::info!(
            "index created: min_chunk_size={} max_chunk_size={} shift_count={} boundary_check_bytes={}",
            params.min_chunk_size,
            params.max_chunk_size,
            params.shift_count,
            params.boundary_check_bytes
        );
        Ok(DedupeEngine {
            provider,
            store,
            params,
        })
    }

    /// Open an existing index, loading and validating its stored chunking parameters.
    ///
    /// Fails if `provider` has not been initialized, or if its stored parameters are missing or
    /// violate a constraint.
    pub fn open(provider: P, store: S) -> Result<Self> {
        if !provider.is_initialized()? {
            return Err(Error::InvalidArgument(
                "index has not been initialized".into(),
            ));
        }
        let params = ChunkingParams::from_config_values(
            provider.get_config_value(config::KEY_MIN_CHUNK_SIZE)?,
            provider.get_config_value(config::KEY_MAX_CHUNK_SIZE)?,
            provider.get_config_value(config::KEY_SHIFT_COUNT)?,
            provider.get_config_value(config::KEY_BOUNDARY_CHECK_BYTES)?,
        )?;
        Ok(DedupeEngine {
            provider,
            store,
            params,
        })
    }

    /// This index's chunking parameters.
    pub fn params(&self) -> ChunkingParams {
        self.params
    }

    /// Direct access to the underlying index provider, for callers that need operations beyond
    /// the engine's own surface (e.g. inspecting a chunk's raw refcount).
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Direct access to the underlying chunk store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Split `source` into content-defined chunks and store it under `key`.
    ///
    /// Fails with `AlreadyExists` if an object with this key already exists. On any failure
    /// during chunk emission, all partial index state for `key` is rolled back and any chunks
    /// newly written for this call are garbage-collected.
    pub fn write<R: Read>(&self, key: &str, content_length: u64, source: R) -> Result<()> {
        let key = sanitize_key(key)?;
        if content_length < 1 {
            return Err(Error::InvalidArgument(
                "content_length must be positive".into(),
            ));
        }
        if self.provider.exists(&key)? {
            return Err(Error::AlreadyExists);
        }

        log::debug!("write-begin key={} content_length={}", key, content_length);

        let events = chunk_stream(source, content_length, self.params)?;
        let chunk_count = events.len() as u64;

        let result: Result<()> = (|| {
            let mut compressed_length: u64 = 0;
            for event in &events {
                let chunk_key = sanitize_key(&event.key)?;
                let length = event.bytes.len() as u64;

                let is_new = self.provider.increment_chunk_refcount(&chunk_key, length)?;
                self.provider
                    .add_object_map(&key, &chunk_key, length, event.ordinal, event.address)?;
                compressed_length += length;

                if is_new {
                    self.store
                        .write_chunk(&chunk_key, &event.bytes)
                        .map_err(|error| {
                            Error::StorageError(format!(
                                "failed to write chunk {}: {}",
                                chunk_key, error
                            ))
                        })?;
                }

                log::debug!(
                    "chunk-emit key={} chunk_key={} ordinal={} address={} new={}",
                    key,
                    chunk_key,
                    event.ordinal,
                    event.address,
                    is_new
                );
            }

            self.provider
                .add_object(&key, content_length, compressed_length, chunk_count)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                log::info!("write-commit key={}", key);
                Ok(())
            }
            Err(error) => {
                log::warn!("write-rollback key={} error={}", key, error);
                // A partial write never reaches `add_object` (that's only called after every
                // chunk has been emitted successfully), so there is no `object` row to key off
                // of here; `rollback_object_map` reverses the object-map rows and chunk refcount
                // increments made so far by `object_map.object_key` alone.
                match self.provider.rollback_object_map(&key) {
                    Ok(gc_keys) => {
                        for gc_key in gc_keys {
                            if let Err(gc_error) = self.store.delete_chunk(&gc_key) {
                                log::warn!(
                                    "rollback gc failed key={} chunk_key={} error={}",
                                    key,
                                    gc_key,
                                    gc_error
                                );
                            }
                        }
                    }
                    Err(rollback_error) => {
                        log::warn!(
                            "write-rollback failed to clear partial index state key={} error={}",
                            key,
                            rollback_error
                        );
                    }
                }
                Err(error)
            }
        }
    }

    /// Write `source` under `key`, first deleting any existing object with that key.
    pub fn write_or_replace<R: Read>(&self, key: &str, content_length: u64, source: R) -> Result<()> {
        let sanitized = sanitize_key(key)?;
        if self.provider.exists(&sanitized)? {
            self.delete(key)?;
        }
        self.write(key, content_length, source)
    }

    /// Read the entirety of the object stored under `key`.
    ///
    /// Fails with `NotFound` if no such object exists.
    pub fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectRecord)> {
        let key = sanitize_key(key)?;
        let metadata = self.read_metadata(&key)?;
        let mut output = Vec::with_capacity(metadata.object.original_length as usize);
        for entry in &metadata.map {
            let bytes = self.read_chunk(&entry.chunk_key)?;
            output.extend_from_slice(&bytes);
        }
        Ok((output, metadata.object))
    }

    /// Open a seekable, read-only reconstruction stream over the object stored under `key`.
    ///
    /// Fails with `NotFound` if no such object exists.
    pub fn get_stream(&self, key: &str) -> Result<ObjectReadStream<'_, P, S>> {
        let key = sanitize_key(key)?;
        let metadata = self.read_metadata(&key)?;
        Ok(ObjectReadStream::new(self, key, metadata.object.original_length))
    }

    /// Delete the object stored under `key` and garbage-collect any chunks which become
    /// unreferenced as a result.
    ///
    /// Fails with `NotFound` if no such object exists. A failure from the underlying chunk
    /// store's delete callback is logged but does not surface, since the object is already gone
    /// from the index.
    pub fn delete(&self, key: &str) -> Result<()> {
        let key = sanitize_key(key)?;
        let gc_keys = self.provider.delete(&key)?;
        log::info!("delete key={} gc_chunks={}", key, gc_keys.len());
        for chunk_key in gc_keys {
            if let Err(error) = self.store.delete_chunk(&chunk_key) {
                log::warn!(
                    "delete_chunk failed during gc key={} chunk_key={} error={}",
                    key,
                    chunk_key,
                    error
                );
            }
        }
        Ok(())
    }

    /// Return whether an object exists under `key`.
    pub fn exists(&self, key: &str) -> Result<bool> {
        let key = sanitize_key(key)?;
        self.provider.exists(&key)
    }

    /// Look up an object's metadata, or `None` if it does not exist.
    pub fn get_object_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let key = sanitize_key(key)?;
        self.provider.get_object_metadata(&key)
    }

    /// List up to `max_results` (1-100) objects whose internal id is greater than `index_start`,
    /// optionally restricted to keys starting with `prefix`.
    pub fn list_objects(
        &self,
        prefix: Option<&str>,
        index_start: i64,
        max_results: u32,
    ) -> Result<ObjectPage> {
        self.provider.list_objects(prefix, index_start, max_results)
    }

    /// Compute aggregate statistics over the index.
    pub fn stats(&self) -> Result<IndexStats> {
        Ok(self.provider.get_statistics()?.into())
    }

    pub(crate) fn read_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        self.provider
            .get_object_metadata(key)?
            .ok_or(Error::NotFound)
    }

    pub(crate) fn read_chunk(&self, chunk_key: &str) -> Result<Vec<u8>> {
        self.store.read_chunk(chunk_key).map_err(|error| {
            Error::StorageError(format!("failed to read chunk {}: {}", chunk_key, error))
        })
    }
}
