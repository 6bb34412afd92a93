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

//! A lazy, advancing view over a forward-only byte stream of known length.

use std::io::Read;

use crate::error::Result;

/// The result of a single call to `SlidingWindow::get_next_window`.
pub struct Window<'a> {
    /// The current window contents.
    pub bytes: &'a [u8],

    /// How many bytes at the tail of `bytes` are new since the previous call.
    ///
    /// On the first call after construction or after `advance_to_new_chunk`, this equals
    /// `bytes.len()`. On subsequent calls it equals `shift_count` (or fewer, if the source was
    /// exhausted before a full shift could be read).
    pub tail_bytes_added: usize,

    /// The offset in the source stream of `bytes[0]`.
    pub start_position: u64,

    /// Whether the source has been fully consumed within this window.
    pub is_final: bool,
}

/// A lazy, advancing view over a forward-only source of known `content_length`.
///
/// `SlidingWindow` owns a buffer of `min_chunk_size` bytes. Each call to `get_next_window`
/// either fills that buffer for the first time or shifts it left by `shift_count` bytes and
/// appends `shift_count` fresh bytes at the tail. Calling `advance_to_new_chunk` discards all
/// buffered state so the next `get_next_window` starts a brand-new window at the current source
/// position.
pub struct SlidingWindow<R> {
    source: R,
    window_size: usize,
    shift_count: usize,
    buffer: Vec<u8>,
    buffer_len: usize,
    position: u64,
    content_length: u64,
    source_exhausted: bool,
    started: bool,
}

impl<R: Read> SlidingWindow<R> {
    /// Create a new adapter over `source`, which is expected to yield exactly `content_length`
    /// bytes.
    pub fn new(source: R, content_length: u64, min_chunk_size: u32, shift_count: u32) -> Self {
        SlidingWindow {
            source,
            window_size: min_chunk_size as usize,
            shift_count: shift_count as usize,
            buffer: vec![0u8; min_chunk_size as usize],
            buffer_len: 0,
            position: 0,
            content_length,
            source_exhausted: false,
            started: false,
        }
    }

    /// Read up to `buffer.len()` bytes from the source into `buffer`, returning the number of
    /// bytes actually read (fewer than requested only at end of stream).
    fn fill(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buffer.len() {
            let read = self.source.read(&mut buffer[total..])?;
            if read == 0 {
                self.source_exhausted = true;
                break;
            }
            total += read;
        }
        Ok(total)
    }

    /// Return the next window over the source.
    ///
    /// See the type-level documentation for the shifting behavior.
    pub fn get_next_window(&mut self) -> Result<Window<'_>> {
        if !self.started {
            self.started = true;
            let window_size = self.window_size;
            let mut buffer = std::mem::take(&mut self.buffer);
            let read = self.fill(&mut buffer[..window_size])?;
            self.buffer = buffer;
            self.buffer_len = read;
            let start_position = self.position;
            self.position += read as u64;

            return Ok(Window {
                bytes: &self.buffer[..self.buffer_len],
                tail_bytes_added: read,
                start_position,
                is_final: self.source_exhausted || self.position >= self.content_length,
            });
        }

        let shift = self.shift_count.min(self.buffer_len);
        self.buffer.copy_within(shift..self.buffer_len, 0);
        let retained = self.buffer_len - shift;

        let mut buffer = std::mem::take(&mut self.buffer);
        let appended = self.fill(&mut buffer[retained..retained + self.shift_count])?;
        self.buffer = buffer;
        self.buffer_len = retained + appended;

        let start_position = self.position - retained as u64;
        self.position += appended as u64;

        Ok(Window {
            bytes: &self.buffer[..self.buffer_len],
            tail_bytes_added: appended,
            start_position,
            is_final: self.source_exhausted || self.position >= self.content_length,
        })
    }

    /// Discard internal buffering so the next `get_next_window` begins a brand-new window at the
    /// current source position.
    pub fn advance_to_new_chunk(&mut self) {
        self.started = false;
        self.buffer_len = 0;
    }
}
