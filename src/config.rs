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

//! The four chunking parameters, durably stored in the index and validated on every load.

use crate::error::{Error, Result};

/// Config key for `ChunkingParams::min_chunk_size`.
pub const KEY_MIN_CHUNK_SIZE: &str = "min_chunk_size";
/// Config key for `ChunkingParams::max_chunk_size`.
pub const KEY_MAX_CHUNK_SIZE: &str = "max_chunk_size";
/// Config key for `ChunkingParams::shift_count`.
pub const KEY_SHIFT_COUNT: &str = "shift_count";
/// Config key for `ChunkingParams::boundary_check_bytes`.
pub const KEY_BOUNDARY_CHECK_BYTES: &str = "boundary_check_bytes";

/// The chunking parameters for a dedupe index.
///
/// These are written once when the index is created and re-validated every time the index is
/// opened. They may never be changed afterwards, since doing so would make previously-stored
/// chunk boundaries unreproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    /// The size of the sliding window, and the smallest chunk the chunker can emit except for a
    /// final trailing chunk.
    pub min_chunk_size: u32,

    /// The hard upper bound on chunk size; a boundary is forced here even absent a natural one.
    pub max_chunk_size: u32,

    /// The number of bytes the window advances by when no boundary is found.
    pub shift_count: u32,

    /// The number of leading MD5 bytes of the window which must be zero to declare a boundary.
    pub boundary_check_bytes: u8,
}

impl ChunkingParams {
    /// Reasonable defaults, as recommended by the chunking algorithm's design.
    pub const DEFAULT: Self = Self {
        min_chunk_size: 32768,
        max_chunk_size: 262144,
        shift_count: 2048,
        boundary_check_bytes: 2,
    };

    /// Validate these parameters, returning an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_size < 256 {
            return Err(Error::InvalidArgument(
                "min_chunk_size must be at least 256 bytes".into(),
            ));
        }
        if self.min_chunk_size % 64 != 0 {
            return Err(Error::InvalidArgument(
                "min_chunk_size must be divisible by 64".into(),
            ));
        }
        if self.max_chunk_size % 64 != 0 {
            return Err(Error::InvalidArgument(
                "max_chunk_size must be divisible by 64".into(),
            ));
        }
        if (self.max_chunk_size as u64) < 8 * self.min_chunk_size as u64 {
            return Err(Error::InvalidArgument(
                "max_chunk_size must be at least 8 times min_chunk_size".into(),
            ));
        }
        if self.shift_count <= 1 || self.shift_count > self.min_chunk_size {
            return Err(Error::InvalidArgument(
                "shift_count must be greater than 1 and at most min_chunk_size".into(),
            ));
        }
        if self.boundary_check_bytes < 1 || self.boundary_check_bytes > 4 {
            return Err(Error::InvalidArgument(
                "boundary_check_bytes must be between 1 and 4".into(),
            ));
        }
        Ok(())
    }

    /// Encode these parameters as the `(key, value)` pairs stored in the Config table.
    pub fn to_config_values(self) -> [(&'static str, String); 4] {
        [
            (KEY_MIN_CHUNK_SIZE, self.min_chunk_size.to_string()),
            (KEY_MAX_CHUNK_SIZE, self.max_chunk_size.to_string()),
            (KEY_SHIFT_COUNT, self.shift_count.to_string()),
            (
                KEY_BOUNDARY_CHECK_BYTES,
                self.boundary_check_bytes.to_string(),
            ),
        ]
    }

    /// Decode parameters from the four config values, failing if any is missing or malformed.
    pub fn from_config_values(
        min_chunk_size: Option<String>,
        max_chunk_size: Option<String>,
        shift_count: Option<String>,
        boundary_check_bytes: Option<String>,
    ) -> Result<Self> {
        fn parse<T: std::str::FromStr>(value: Option<String>, name: &str) -> Result<T> {
            value
                .ok_or_else(|| Error::IntegrityError(format!("missing config value: {}", name)))?
                .parse::<T>()
                .map_err(|_| Error::IntegrityError(format!("malformed config value: {}", name)))
        }

        let params = ChunkingParams {
            min_chunk_size: parse(min_chunk_size, KEY_MIN_CHUNK_SIZE)?,
            max_chunk_size: parse(max_chunk_size, KEY_MAX_CHUNK_SIZE)?,
            shift_count: parse(shift_count, KEY_SHIFT_COUNT)?,
            boundary_check_bytes: parse(boundary_check_bytes, KEY_BOUNDARY_CHECK_BYTES)?,
        };
        params.validate()?;
        Ok(params)
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// Guard the recommended defaults against drifting out of sync with `validate`'s own rules.
static_assertions::const_assert!(ChunkingParams::DEFAULT.min_chunk_size >= 256);
static_assertions::const_assert!(ChunkingParams::DEFAULT.min_chunk_size % 64 == 0);
static_assertions::const_assert!(ChunkingParams::DEFAULT.max_chunk_size % 64 == 0);
static_assertions::const_assert!(
    ChunkingParams::DEFAULT.max_chunk_size as u64 >= 8 * ChunkingParams::DEFAULT.min_chunk_size as u64
);
static_assertions::const_assert!(ChunkingParams::DEFAULT.shift_count > 1);
static_assertions::const_assert!(ChunkingParams::DEFAULT.shift_count <= ChunkingParams::DEFAULT.min_chunk_size);
static_assertions::const_assert!(ChunkingParams::DEFAULT.boundary_check_bytes >= 1);
static_assertions::const_assert!(ChunkingParams::DEFAULT.boundary_check_bytes <= 4);
