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

//! Hashing primitives used by the chunker and the dedupe engine.
//!
//! MD5 drives the boundary predicate over the sliding window; SHA-256 produces the stable
//! fingerprint used as a chunk's identity in the index.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use digest::Digest;
use md5::Md5;
use sha2::Sha256;

/// Compute the MD5 digest of `window`.
///
/// Used only to evaluate the boundary predicate; never exposed as a chunk identity.
pub fn window_digest(window: &[u8]) -> [u8; 16] {
    let digest = Md5::digest(window);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Return whether the leading `boundary_check_bytes` of `digest` are all zero.
///
/// This is the boundary predicate from the chunking algorithm: a natural boundary is declared
/// when the leading bytes of the MD5 of the current window are all `0x00`.
pub fn is_boundary(digest: &[u8; 16], boundary_check_bytes: u8) -> bool {
    digest[..boundary_check_bytes as usize]
        .iter()
        .all(|&byte| byte == 0)
}

/// Compute the chunk key for `data`: the URL-safe, unpadded base64 encoding of its SHA-256 digest.
pub fn chunk_key(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    URL_SAFE_NO_PAD.encode(digest)
}
