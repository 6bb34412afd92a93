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

//! The string-key sanitization rule enforced by the engine before any key reaches an index
//! provider.
//!
//! `rusqlite` always binds parameters rather than concatenating SQL, so this is belt-and-suspenders
//! defense-in-depth for providers that don't, as called for in the design notes.

use crate::error::{Error, Result};

/// The maximum length, in bytes, of a sanitized object or chunk key.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Validate and sanitize `key`, returning the sanitized string or an error.
///
/// This rejects control characters below `0x20` other than `\n` (`0x0A`) and `\r` (`0x0D`), then
/// strips the substrings `--`, `/*`, and `*/`, then escapes `'` by doubling it.
pub fn sanitize_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "key must be at most {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    for byte in key.bytes() {
        if byte < 0x20 && byte != 0x0A && byte != 0x0D {
            return Err(Error::InvalidArgument(
                "key contains a disallowed control character".into(),
            ));
        }
    }

    let stripped = key.replace("--", "").replace("/*", "").replace("*/", "");
    let escaped = stripped.replace('\'', "''");
    Ok(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert!(sanitize_key("").is_err());
    }

    #[test]
    fn rejects_oversized_key() {
        let key = "a".repeat(MAX_KEY_LENGTH + 1);
        assert!(sanitize_key(&key).is_err());
    }

    #[test]
    fn allows_newline_and_carriage_return() {
        assert!(sanitize_key("line\nbreak").is_ok());
        assert!(sanitize_key("line\rbreak").is_ok());
    }

    #[test]
    fn rejects_other_control_characters() {
        assert!(sanitize_key("bad\x01key").is_err());
    }

    #[test]
    fn strips_sql_comment_markers() {
        assert_eq!(sanitize_key("a--b/*c*/d").unwrap(), "abcd");
    }

    #[test]
    fn doubles_single_quotes() {
        assert_eq!(sanitize_key("o'brien").unwrap(), "o''brien");
    }
}
