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

use std::io;

/// The error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An argument was invalid.
    ///
    /// This covers an empty or oversized object key, a chunking parameter out of its allowed
    /// range, a negative seek offset, and a non-positive `content_length`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A `Write` was attempted against a key which already exists.
    #[error("an object with this key already exists")]
    AlreadyExists,

    /// A `Get`, `GetStream`, `Delete`, or metadata lookup was attempted against a key which does
    /// not exist.
    #[error("no object with this key exists")]
    NotFound,

    /// The index is in a state which violates one of the invariants in the data model.
    ///
    /// This is never recovered from and always surfaces to the caller; it indicates that the
    /// index and the chunk store have diverged.
    #[error("index integrity error: {0}")]
    IntegrityError(String),

    /// A chunk storage callback (`write_chunk`, `read_chunk`, or `delete_chunk`) failed.
    #[error("chunk storage error: {0}")]
    StorageError(String),

    /// The index provider failed to read or write a row.
    #[error("index provider error: {0}")]
    IndexError(String),

    /// An I/O error occurred.
    #[error("I/O error")]
    Io(#[from] io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Error::IndexError(error.to_string())
    }
}

impl Error {
    /// Return whether this error represents the object already existing.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists)
    }

    /// Return whether this error represents the object not being found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
