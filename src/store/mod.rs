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

//! The chunk storage callback contract, and a filesystem-backed implementation of it.

mod filesystem;

pub use filesystem::FilesystemChunkStore;

use crate::error::Result;

/// The capability the dedupe engine uses to persist and retrieve chunk bytes.
///
/// This is a single capability object with three named operations, rather than callbacks passed
/// positionally: `write_chunk`, `read_chunk`, and `delete_chunk`.
pub trait ChunkStore {
    /// Persist `bytes` under `chunk_key`.
    ///
    /// Must be idempotent: calling this again with the same `(chunk_key, bytes)` pair must
    /// succeed and leave the stored bytes unchanged.
    fn write_chunk(&self, chunk_key: &str, bytes: &[u8]) -> Result<()>;

    /// Return the exact bytes previously written for `chunk_key`.
    ///
    /// Implementations must signal a `StorageError` if no such chunk exists rather than
    /// returning an empty or zero-filled buffer.
    fn read_chunk(&self, chunk_key: &str) -> Result<Vec<u8>>;

    /// Remove the bytes stored under `chunk_key`.
    ///
    /// A failure here is logged by the engine but never rolls back a delete operation, since the
    /// object referencing this chunk has already been removed from the index.
    fn delete_chunk(&self, chunk_key: &str) -> Result<()>;
}
