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

//! `dedupe-store` is a content-addressed deduplication engine for arbitrary binary objects.
//!
//! A caller hands the engine a uniquely-named object as a readable stream. The engine splits it
//! into variable-size content-defined chunks, fingerprints each chunk with SHA-256, stores only
//! first-occurrence chunks through a pluggable [`ChunkStore`], and records an index that lets
//! the object be reconstructed in full, streamed at random offsets, or deleted. Duplicate chunks
//! across any objects are stored exactly once; reference counts protect shared chunks from
//! premature removal.
//!
//! ```no_run
//! use dedupe_store::{ChunkingParams, DedupeEngine, FilesystemChunkStore, SqliteIndexProvider};
//!
//! # fn main() -> dedupe_store::Result<()> {
//! let provider = SqliteIndexProvider::open("index.sqlite")?;
//! let store = FilesystemChunkStore::open("chunks")?;
//! let engine = DedupeEngine::create(provider, store, ChunkingParams::default())?;
//!
//! let data = b"hello, world".to_vec();
//! engine.write("greeting", data.len() as u64, data.as_slice())?;
//! let (bytes, _metadata) = engine.get("greeting")?;
//! assert_eq!(bytes, b"hello, world");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The crate is layered leaf-first:
//!
//! - [`hash`] — MD5 over sliding windows for boundary detection, SHA-256 over chunks for
//!   fingerprints.
//! - [`chunk`] — the sliding-window adapter and the content-defined chunker built on it.
//! - [`provider`] — the [`IndexProvider`] contract and its default `rusqlite`-backed
//!   implementation.
//! - [`store`] — the [`ChunkStore`] callback contract and a filesystem-backed implementation.
//! - [`config`] — the four durable chunking parameters.
//! - [`engine`] — [`DedupeEngine`], which orchestrates all of the above into write / read /
//!   delete / list / stats.
//! - [`stream`] — [`ObjectReadStream`], a seekable random-access view over a stored object.
//!
//! # Non-goals
//!
//! This crate does not compress or encrypt chunk data, replicate across machines, cache chunks
//! in memory, allow concurrent writes of the same object key, or provide cross-object
//! transactions. Chunk-data backup is left to whatever backs the [`ChunkStore`]; only the index
//! is this crate's concern.

#![deny(unsafe_code)]

pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod provider;
pub mod sanitize;
pub mod store;
pub mod stream;

pub use config::ChunkingParams;
pub use engine::{DedupeEngine, IndexStats};
pub use error::{Error, Result};
pub use provider::{IndexProvider, ObjectMapEntry, ObjectMetadata, ObjectPage, ObjectRecord, SqliteIndexProvider};
pub use store::{ChunkStore, FilesystemChunkStore};
pub use stream::ObjectReadStream;
