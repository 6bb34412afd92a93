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

//! End-to-end scenarios against the engine, its default SQLite provider, and a filesystem chunk
//! store, exercising the properties an implementation of this system must uphold.

use std::fs;
use std::io::Read as _;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tempfile::tempdir;

use dedupe_store::{
    ChunkStore, ChunkingParams, DedupeEngine, Error, FilesystemChunkStore, IndexProvider,
    SqliteIndexProvider,
};

/// A `ChunkStore` that wraps a `FilesystemChunkStore` but fails the Nth call to `write_chunk`,
/// to exercise the write pipeline's rollback path.
struct FailingChunkStore {
    inner: FilesystemChunkStore,
    fail_on_call: usize,
    calls: AtomicUsize,
}

impl FailingChunkStore {
    fn new(inner: FilesystemChunkStore, fail_on_call: usize) -> Self {
        FailingChunkStore {
            inner,
            fail_on_call,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ChunkStore for FailingChunkStore {
    fn write_chunk(&self, chunk_key: &str, bytes: &[u8]) -> dedupe_store::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_call {
            return Err(Error::StorageError("simulated storage failure".into()));
        }
        self.inner.write_chunk(chunk_key, bytes)
    }

    fn read_chunk(&self, chunk_key: &str) -> dedupe_store::Result<Vec<u8>> {
        self.inner.read_chunk(chunk_key)
    }

    fn delete_chunk(&self, chunk_key: &str) -> dedupe_store::Result<()> {
        self.inner.delete_chunk(chunk_key)
    }
}

fn small_params() -> ChunkingParams {
    ChunkingParams {
        min_chunk_size: 1024,
        max_chunk_size: 32768,
        shift_count: 64,
        boundary_check_bytes: 2,
    }
}

fn new_engine(dir: &std::path::Path) -> DedupeEngine<SqliteIndexProvider, FilesystemChunkStore> {
    let provider = SqliteIndexProvider::open(dir.join("index.sqlite")).unwrap();
    let store = FilesystemChunkStore::open(dir.join("chunks")).unwrap();
    DedupeEngine::create(provider, store, small_params()).unwrap()
}

fn random_bytes(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut buffer = vec![0u8; size];
    rng.fill_bytes(&mut buffer);
    buffer
}

/// Scenario 1: a single-chunk object round-trips and gets exactly one chunk.
#[test]
fn single_chunk_object() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let data = vec![0x41u8; 500];
    engine.write("a", data.len() as u64, data.as_slice()).unwrap();

    let metadata = engine.get_object_metadata("a").unwrap().unwrap();
    assert_eq!(metadata.map.len(), 1);
    assert_eq!(metadata.object.original_length, 500);
    assert_eq!(metadata.object.compressed_length, 500);
    assert_eq!(metadata.object.chunk_count, 1);
    assert_eq!(metadata.map[0].byte_address, 0);
    assert_eq!(metadata.map[0].ordinal_position, 0);
    assert_eq!(metadata.map[0].chunk_key, dedupe_store::hash::chunk_key(&data));

    let (bytes, _) = engine.get("a").unwrap();
    assert_eq!(bytes, data);
}

/// Scenario 2: writing the same bytes under a second key does not grow the chunk table or the
/// physical byte count, but doubles the logical bytes and every shared chunk's refcount.
#[test]
fn multi_chunk_deduplication() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let data = random_bytes(200 * 1024, 1);
    engine.write("kjv1", data.len() as u64, data.as_slice()).unwrap();
    let stats_after_first = engine.stats().unwrap();

    engine.write("kjv2", data.len() as u64, data.as_slice()).unwrap();
    let stats_after_second = engine.stats().unwrap();

    assert_eq!(stats_after_second.chunks, stats_after_first.chunks);
    assert_eq!(stats_after_second.physical_bytes, stats_after_first.physical_bytes);
    assert_eq!(
        stats_after_second.logical_bytes,
        stats_after_first.logical_bytes * 2
    );

    let map1 = engine.get_object_metadata("kjv1").unwrap().unwrap();
    for entry in &map1.map {
        let chunk = engine.provider().get_chunk_metadata(&entry.chunk_key).unwrap().unwrap();
        assert_eq!(chunk.refcount, 2);
    }
}

/// Scenario 3: `write_or_replace` swaps an object's bytes, and chunks unique to the old content
/// are garbage-collected.
#[test]
fn replace_semantics() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let original = random_bytes(10 * 1024, 2);
    engine.write("x", original.len() as u64, original.as_slice()).unwrap();
    let original_metadata = engine.get_object_metadata("x").unwrap().unwrap();
    let original_chunk_keys: Vec<String> =
        original_metadata.map.iter().map(|e| e.chunk_key.clone()).collect();

    let replacement = random_bytes(10 * 1024, 3);
    engine
        .write_or_replace("x", replacement.len() as u64, replacement.as_slice())
        .unwrap();

    let (bytes, _) = engine.get("x").unwrap();
    assert_eq!(bytes, replacement);

    for chunk_key in &original_chunk_keys {
        assert!(engine.provider().get_chunk_metadata(chunk_key).unwrap().is_none());
    }
}

/// Writing the same key twice without replacement fails with `AlreadyExists` and leaves the
/// original object untouched.
#[test]
fn write_twice_fails_with_already_exists() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let data = random_bytes(4096, 4);
    engine.write("once", data.len() as u64, data.as_slice()).unwrap();

    let other = random_bytes(4096, 5);
    let result = engine.write("once", other.len() as u64, other.as_slice());
    assert!(matches!(result, Err(Error::AlreadyExists)));

    let (bytes, _) = engine.get("once").unwrap();
    assert_eq!(bytes, data);
}

/// A `ChunkStore` failure partway through a multi-chunk write rolls back every object-map row
/// and chunk refcount increment made so far, and garbage-collects any chunk bytes it had already
/// written — leaving no trace for a subsequent write under the same key to collide with.
#[test]
fn write_failure_mid_chunk_rolls_back_partial_state() {
    let dir = tempdir().unwrap();
    let provider = SqliteIndexProvider::open(dir.path().join("index.sqlite")).unwrap();
    let chunks_dir = dir.path().join("chunks");
    let inner_store = FilesystemChunkStore::open(&chunks_dir).unwrap();
    let store = FailingChunkStore::new(inner_store, 3);
    let engine = DedupeEngine::create(provider, store, small_params()).unwrap();

    let data = random_bytes(200 * 1024, 42);
    let result = engine.write("broken", data.len() as u64, data.as_slice());
    assert!(matches!(result, Err(Error::StorageError(_))));

    assert!(engine.get_object_metadata("broken").unwrap().is_none());
    assert!(engine.provider().get_object_map("broken").unwrap().is_empty());

    let stats = engine.stats().unwrap();
    assert_eq!(stats.chunks, 0, "every incremented chunk refcount must have been reversed");
    assert_eq!(stats.physical_bytes, 0);
    assert_eq!(
        fs::read_dir(&chunks_dir).unwrap().count(),
        0,
        "every chunk written before the failure must have been garbage-collected"
    );

    // A retry under the same key must not collide with orphaned rows from the aborted attempt.
    engine.write("broken", data.len() as u64, data.as_slice()).unwrap();
    let (bytes, _) = engine.get("broken").unwrap();
    assert_eq!(bytes, data);
}

/// Scenario 4: seeking into a reconstruction stream and reading returns exactly the requested
/// byte range, and a read across a chunk boundary is satisfied by a subsequent read.
#[test]
fn random_access_streaming() {
    use std::io::{Seek, SeekFrom};

    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let data = random_bytes(200 * 1024, 6);
    engine.write("s", data.len() as u64, data.as_slice()).unwrap();

    let mut stream = engine.get_stream("s").unwrap();
    stream.seek(SeekFrom::Start(150_000)).unwrap();
    let mut buffer = vec![0u8; 8192];
    let mut total_read = 0;
    while total_read < buffer.len() {
        let n = stream.read(&mut buffer[total_read..]).unwrap();
        assert!(n > 0, "stream ended before filling the requested range");
        total_read += n;
    }
    assert_eq!(buffer, data[150_000..158_192]);
}

/// Reading a stream over its whole length, for a variety of buffer sizes, reproduces `Get`.
#[test]
fn stream_matches_get_for_various_buffer_sizes() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let data = random_bytes(50_000, 7);
    engine.write("s", data.len() as u64, data.as_slice()).unwrap();
    let (expected, _) = engine.get("s").unwrap();

    for buffer_size in [1usize, 7, 64, 4096] {
        let mut stream = engine.get_stream("s").unwrap();
        let mut collected = Vec::new();
        let mut buffer = vec![0u8; buffer_size];
        loop {
            let n = stream.read(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buffer[..n]);
        }
        assert_eq!(collected, expected, "mismatch with buffer size {}", buffer_size);
    }
}

/// Scenario 5: deleting an object garbage-collects chunks private to it, decrements shared
/// chunks' refcounts, and leaves any other object that shared chunks with it intact.
#[test]
fn deletion_and_gc() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let shared_prefix = random_bytes(64 * 1024, 8);
    let mut u_data = shared_prefix.clone();
    u_data.extend(random_bytes(16 * 1024, 9));
    let mut v_data = shared_prefix.clone();
    v_data.extend(random_bytes(16 * 1024, 10));

    engine.write("u", u_data.len() as u64, u_data.as_slice()).unwrap();
    engine.write("v", v_data.len() as u64, v_data.as_slice()).unwrap();

    let u_map = engine.get_object_metadata("u").unwrap().unwrap();
    let v_chunk_keys: std::collections::HashSet<String> = engine
        .get_object_metadata("v")
        .unwrap()
        .unwrap()
        .map
        .iter()
        .map(|e| e.chunk_key.clone())
        .collect();

    let private_to_u: Vec<String> = u_map
        .map
        .iter()
        .map(|e| e.chunk_key.clone())
        .filter(|k| !v_chunk_keys.contains(k))
        .collect();
    assert!(!private_to_u.is_empty(), "test fixture should produce at least one private chunk");

    engine.delete("u").unwrap();

    for chunk_key in &private_to_u {
        assert!(engine.provider().get_chunk_metadata(chunk_key).unwrap().is_none());
    }
    assert!(!engine.exists("u").unwrap());

    let (v_bytes, _) = engine.get("v").unwrap();
    assert_eq!(v_bytes, v_data);
}

/// Deleting or getting a key that was never written fails with `NotFound`.
#[test]
fn missing_key_is_not_found() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    assert!(matches!(engine.get("missing"), Err(Error::NotFound)));
    assert!(matches!(engine.delete("missing"), Err(Error::NotFound)));
    assert!(engine.get_object_metadata("missing").unwrap().is_none());
}

/// Scenario 6: listing paginates in ascending id order and a prefix filter restricts the page.
#[test]
fn listing_pagination() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    for i in 0..250 {
        let key = format!("obj{:03}", i);
        engine.write(&key, 4, &[1, 2, 3, 4][..]).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = 0i64;
    loop {
        let page = engine.list_objects(None, cursor, 100).unwrap();
        seen.extend(page.objects.iter().map(|o| o.key.clone()));
        if page.next_index_start == cursor {
            break;
        }
        cursor = page.next_index_start;
    }
    assert_eq!(seen.len(), 250);
    let mut expected: Vec<String> = (0..250).map(|i| format!("obj{:03}", i)).collect();
    expected.sort();
    let mut actual = seen.clone();
    actual.sort();
    assert_eq!(actual, expected);

    let prefixed = engine.list_objects(Some("obj1"), 0, 100).unwrap();
    assert!(prefixed.objects.iter().all(|o| o.key.starts_with("obj1")));
}

/// Chunk boundaries, and therefore chunk keys, are stable for identical input across runs.
#[test]
fn chunk_boundaries_are_stable_across_runs() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let engine_a = new_engine(dir_a.path());
    let engine_b = new_engine(dir_b.path());

    let data = random_bytes(300 * 1024, 11);
    engine_a.write("o", data.len() as u64, data.as_slice()).unwrap();
    engine_b.write("o", data.len() as u64, data.as_slice()).unwrap();

    let map_a = engine_a.get_object_metadata("o").unwrap().unwrap();
    let map_b = engine_b.get_object_metadata("o").unwrap().unwrap();

    let keys_a: Vec<String> = map_a.map.iter().map(|e| e.chunk_key.clone()).collect();
    let keys_b: Vec<String> = map_b.map.iter().map(|e| e.chunk_key.clone()).collect();
    assert_eq!(keys_a, keys_b);
}

/// `content_length == max_chunk_size` with no natural boundary still yields a single chunk,
/// since the length cap and the data's end coincide.
#[test]
fn content_length_equal_to_max_chunk_size_yields_single_chunk() {
    let dir = tempdir().unwrap();
    // boundary_check_bytes = 4 makes a natural boundary astronomically unlikely over this input.
    let params = ChunkingParams {
        min_chunk_size: 1024,
        max_chunk_size: 32768,
        shift_count: 64,
        boundary_check_bytes: 4,
    };
    let provider = SqliteIndexProvider::open(dir.path().join("index.sqlite")).unwrap();
    let store = FilesystemChunkStore::open(dir.path().join("chunks")).unwrap();
    let engine = DedupeEngine::create(provider, store, params).unwrap();

    let data = vec![0x11u8; 32768];
    engine.write("o", data.len() as u64, data.as_slice()).unwrap();
    let metadata = engine.get_object_metadata("o").unwrap().unwrap();
    assert_eq!(metadata.map.len(), 1);
}

/// For every chunk referenced by any object, its refcount equals the number of map entries that
/// reference it, across the whole index.
#[test]
fn refcount_matches_map_entry_count_across_objects() {
    let dir = tempdir().unwrap();
    let engine = new_engine(dir.path());

    let shared = random_bytes(40 * 1024, 12);
    for i in 0..3 {
        let mut data = shared.clone();
        data.extend(random_bytes(1024, 100 + i));
        engine
            .write(&format!("obj{}", i), data.len() as u64, data.as_slice())
            .unwrap();
    }

    let mut refs: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for i in 0..3 {
        let metadata = engine.get_object_metadata(&format!("obj{}", i)).unwrap().unwrap();
        for entry in metadata.map {
            *refs.entry(entry.chunk_key).or_insert(0) += 1;
        }
    }

    for (chunk_key, count) in refs {
        let record = engine.provider().get_chunk_metadata(&chunk_key).unwrap().unwrap();
        assert_eq!(record.refcount, count);
    }
}
