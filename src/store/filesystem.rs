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

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::ChunkStore;

/// A `ChunkStore` which persists one file per chunk under a directory.
///
/// Chunk keys are base64url strings, which are already safe path components, so each chunk is
/// stored directly as `<directory>/<chunk_key>`.
#[derive(Debug, Clone)]
pub struct FilesystemChunkStore {
    directory: PathBuf,
}

impl FilesystemChunkStore {
    /// Open (creating if necessary) a chunk store backed by `directory`.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(FilesystemChunkStore { directory })
    }

    fn path_for(&self, chunk_key: &str) -> PathBuf {
        self.directory.join(chunk_key)
    }
}

impl ChunkStore for FilesystemChunkStore {
    fn write_chunk(&self, chunk_key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(chunk_key);
        // Idempotent: writing the same bytes under the same key again is a no-op in effect,
        // since `fs::write` overwrites the file with identical contents.
        fs::write(&path, bytes)
            .map_err(|error| Error::StorageError(format!("failed to write chunk {}: {}", chunk_key, error)))
    }

    fn read_chunk(&self, chunk_key: &str) -> Result<Vec<u8>> {
        fs::read(self.path_for(chunk_key)).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                Error::StorageError(format!("chunk not found in store: {}", chunk_key))
            } else {
                Error::StorageError(format!("failed to read chunk {}: {}", chunk_key, error))
            }
        })
    }

    fn delete_chunk(&self, chunk_key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(chunk_key)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(Error::StorageError(format!(
                "failed to delete chunk {}: {}",
                chunk_key, error
            ))),
        }
    }
}
