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

//! Length-limited, content-defined chunking driven by an MD5 boundary predicate over a sliding
//! window.

use std::io::Read;

use crate::config::ChunkingParams;
use crate::error::Result;
use crate::hash::{chunk_key, is_boundary, window_digest};

use super::window::SlidingWindow;

/// A single chunk emitted by the chunker.
#[derive(Debug, Clone)]
pub struct ChunkEvent {
    /// The chunk's bytes.
    pub bytes: Vec<u8>,

    /// The offset of the chunk's first byte within the original object.
    pub address: u64,

    /// The chunk's fingerprint: the base64url encoding of the SHA-256 of `bytes`.
    pub key: String,

    /// The chunk's 0-based position in the object's chunk sequence.
    pub ordinal: u64,
}

/// Drive a `SlidingWindow` over `source` and collect the chunk boundaries.
///
/// This is a length-limited, content-defined chunker: boundaries are declared either when the
/// leading `boundary_check_bytes` of the MD5 digest of the current window are all zero, or when
/// the current chunk reaches `max_chunk_size`, whichever comes first. A forced boundary at
/// `max_chunk_size` always takes precedence over the natural predicate on the same iteration.
pub fn chunk<R: Read>(source: R, content_length: u64, params: ChunkingParams) -> Result<Vec<ChunkEvent>> {
    let mut events = Vec::new();

    if content_length <= params.min_chunk_size as u64 {
        let mut bytes = Vec::with_capacity(content_length as usize);
        let mut source = source;
        source.read_to_end(&mut bytes)?;
        let key = chunk_key(&bytes);
        events.push(ChunkEvent {
            bytes,
            address: 0,
            key,
            ordinal: 0,
        });
        return Ok(events);
    }

    let mut window = SlidingWindow::new(source, content_length, params.min_chunk_size, params.shift_count);
    let mut current_chunk: Vec<u8> = Vec::new();
    let mut chunk_start_addr: u64 = 0;
    let mut next_ordinal: u64 = 0;

    loop {
        let next = window.get_next_window()?;
        let is_final = next.is_final;

        if current_chunk.is_empty() {
            chunk_start_addr = next.start_position;
            current_chunk.extend_from_slice(next.bytes);
        } else {
            let tail_start = next.bytes.len() - next.tail_bytes_added;
            current_chunk.extend_from_slice(&next.bytes[tail_start..]);
        }

        let digest = window_digest(next.bytes);
        let forced_boundary = current_chunk.len() >= params.max_chunk_size as usize;
        let natural_boundary = is_boundary(&digest, params.boundary_check_bytes);

        if forced_boundary || natural_boundary {
            let bytes = std::mem::take(&mut current_chunk);
            let key = chunk_key(&bytes);
            events.push(ChunkEvent {
                bytes,
                address: chunk_start_addr,
                key,
                ordinal: next_ordinal,
            });
            next_ordinal += 1;
            window.advance_to_new_chunk();
        }

        if is_final {
            if !current_chunk.is_empty() {
                let key = chunk_key(&current_chunk);
                events.push(ChunkEvent {
                    bytes: current_chunk,
                    address: chunk_start_addr,
                    key,
                    ordinal: next_ordinal,
                });
            }
            break;
        }
    }

    Ok(events)
}
