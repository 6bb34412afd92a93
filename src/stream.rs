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

//! The random-access reconstruction stream: a seekable, read-only view over a stored object
//! that reads chunks on demand rather than materializing the whole object in memory.

use std::io::{self, Read, Seek, SeekFrom};

use crate::engine::DedupeEngine;
use crate::error::Error;
use crate::provider::IndexProvider;
use crate::store::ChunkStore;

fn to_io_error(error: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error)
}

/// A seekable, read-only stream over a stored object.
///
/// The stream holds the object's key and length; each [`Read::read`] call locates the single
/// chunk covering the current position and reads no more than that chunk's remaining bytes, so a
/// read that spans a chunk boundary returns a short read rather than silently walking into the
/// next chunk. `SetLength` and `Write` have no meaning for a reconstruction stream and are not
/// implemented.
pub struct ObjectReadStream<'a, P, S> {
    engine: &'a DedupeEngine<P, S>,
    key: String,
    length: u64,
    position: u64,
}

impl<'a, P: IndexProvider, S: ChunkStore> ObjectReadStream<'a, P, S> {
    pub(crate) fn new(engine: &'a DedupeEngine<P, S>, key: String, length: u64) -> Self {
        ObjectReadStream {
            engine,
            key,
            length,
            position: 0,
        }
    }

    /// The total length of the underlying object, in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The stream's current read position.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<'a, P: IndexProvider, S: ChunkStore> Read for ObjectReadStream<'a, P, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.length || buf.is_empty() {
            return Ok(0);
        }

        let entry = self
            .engine
            .provider()
            .get_object_map_for_position(&self.key, self.position)
            .map_err(to_io_error)?
            .ok_or_else(|| {
                to_io_error(Error::IntegrityError(format!(
                    "no object-map entry covers position {} of object {}",
                    self.position, self.key
                )))
            })?;

        let chunk_bytes = self.engine.read_chunk(&entry.chunk_key).map_err(to_io_error)?;

        let in_chunk_offset = (self.position - entry.byte_address) as usize;
        if in_chunk_offset >= chunk_bytes.len() {
            return Err(to_io_error(Error::IntegrityError(format!(
                "chunk {} is shorter than its recorded length",
                entry.chunk_key
            ))));
        }
        let available = chunk_bytes.len() - in_chunk_offset;
        let count = buf.len().min(available);
        buf[..count].copy_from_slice(&chunk_bytes[in_chunk_offset..in_chunk_offset + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl<'a, P: IndexProvider, S: ChunkStore> Seek for ObjectReadStream<'a, P, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(offset) => self.length as i128 + offset as i128,
            SeekFrom::Current(offset) => self.position as i128 + offset as i128,
        };

        if target < 0 || target > self.length as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "resulting seek position is out of bounds",
            ));
        }

        self.position = target as u64;
        Ok(self.position)
    }
}
