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

//! A command-line front end for `dedupe-store`.
//!
//! This binary is a collaborator, not part of the library: it never appears in
//! `dedupe_store`'s public API, and the library itself has no `clap` dependency. It exists to
//! exercise the engine from a shell and to give the index/chunk-store pair a human interface.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dedupe_store::{ChunkingParams, DedupeEngine, FilesystemChunkStore, SqliteIndexProvider};

/// A content-addressed deduplication engine for arbitrary binary objects.
#[derive(Parser)]
#[command(name = "dedupe-store", version, about)]
struct Cli {
    /// Path to the index's SQLite database file.
    #[arg(env = "DEDUPE_STORE_INDEX")]
    index: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty index with the given chunking parameters.
    Create {
        /// `min_chunk_size,max_chunk_size,shift_count,boundary_check_bytes`.
        #[arg(long)]
        params: Option<String>,
    },

    /// Read an object's bytes from stdin and store it under `--key`.
    Write {
        /// Directory holding chunk files.
        #[arg(long, env = "DEDUPE_STORE_CHUNKS")]
        chunks: Option<PathBuf>,
        /// The object's key.
        #[arg(long)]
        key: String,
    },

    /// Write an object's bytes to stdout.
    Get {
        #[arg(long, env = "DEDUPE_STORE_CHUNKS")]
        chunks: Option<PathBuf>,
        #[arg(long)]
        key: String,
    },

    /// Delete an object and garbage-collect any chunks it held exclusively.
    Del {
        #[arg(long, env = "DEDUPE_STORE_CHUNKS")]
        chunks: Option<PathBuf>,
        #[arg(long)]
        key: String,
    },

    /// List stored objects, optionally restricted to a key prefix.
    List {
        #[arg(long, env = "DEDUPE_STORE_CHUNKS")]
        chunks: Option<PathBuf>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = 0)]
        start: i64,
        #[arg(long, default_value_t = 100)]
        max: u32,
        /// Print the page as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Exit 0 if an object with this key exists, non-zero otherwise.
    Exists {
        #[arg(long, env = "DEDUPE_STORE_CHUNKS")]
        chunks: Option<PathBuf>,
        #[arg(long)]
        key: String,
    },

    /// Print aggregate statistics about the index.
    Stats {
        #[arg(long, env = "DEDUPE_STORE_CHUNKS")]
        chunks: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

/// The chunk store lives in a directory next to the index file unless overridden.
fn default_chunks_dir(index: &Path) -> PathBuf {
    let mut name = index.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".chunks");
    index.with_file_name(name)
}

fn open_engine(
    index: &Path,
    chunks: Option<PathBuf>,
) -> Result<DedupeEngine<SqliteIndexProvider, FilesystemChunkStore>> {
    let chunks_dir = chunks.unwrap_or_else(|| default_chunks_dir(index));
    let provider = SqliteIndexProvider::open(index)
        .with_context(|| format!("failed to open index at {}", index.display()))?;
    let store = FilesystemChunkStore::open(&chunks_dir)
        .with_context(|| format!("failed to open chunk store at {}", chunks_dir.display()))?;
    DedupeEngine::open(provider, store).context("failed to open dedupe index")
}

fn parse_params(raw: &str) -> Result<ChunkingParams> {
    let parts: Vec<&str> = raw.split(',').collect();
    anyhow::ensure!(
        parts.len() == 4,
        "--params expects min,max,shift,boundary (got `{}`)",
        raw
    );
    Ok(ChunkingParams {
        min_chunk_size: parts[0].trim().parse().context("invalid min_chunk_size")?,
        max_chunk_size: parts[1].trim().parse().context("invalid max_chunk_size")?,
        shift_count: parts[2].trim().parse().context("invalid shift_count")?,
        boundary_check_bytes: parts[3].trim().parse().context("invalid boundary_check_bytes")?,
    })
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Create { params } => {
            let params = match params {
                Some(raw) => parse_params(&raw)?,
                None => ChunkingParams::default(),
            };
            let chunks_dir = default_chunks_dir(&cli.index);
            let provider = SqliteIndexProvider::open(&cli.index)
                .with_context(|| format!("failed to open index at {}", cli.index.display()))?;
            let store = FilesystemChunkStore::open(&chunks_dir)
                .with_context(|| format!("failed to create chunk store at {}", chunks_dir.display()))?;
            DedupeEngine::create(provider, store, params).context("failed to create index")?;
            println!("created index at {}", cli.index.display());
            Ok(ExitCode::SUCCESS)
        }

        Command::Write { chunks, key } => {
            let engine = open_engine(&cli.index, chunks)?;
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("failed to read object bytes from stdin")?;
            engine
                .write(&key, buffer.len() as u64, buffer.as_slice())
                .with_context(|| format!("failed to write object `{}`", key))?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Get { chunks, key } => {
            let engine = open_engine(&cli.index, chunks)?;
            let (bytes, _metadata) = engine
                .get(&key)
                .with_context(|| format!("failed to read object `{}`", key))?;
            io::stdout()
                .write_all(&bytes)
                .context("failed to write object bytes to stdout")?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Del { chunks, key } => {
            let engine = open_engine(&cli.index, chunks)?;
            engine
                .delete(&key)
                .with_context(|| format!("failed to delete object `{}`", key))?;
            Ok(ExitCode::SUCCESS)
        }

        Command::List {
            chunks,
            prefix,
            start,
            max,
            json,
        } => {
            let engine = open_engine(&cli.index, chunks)?;
            let page = engine
                .list_objects(prefix.as_deref(), start, max)
                .context("failed to list objects")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                for object in &page.objects {
                    println!(
                        "{}\t{}\t{}",
                        object.key, object.original_length, object.chunk_count
                    );
                }
                if page.next_index_start != start {
                    eprintln!("# next-start={}", page.next_index_start);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Exists { chunks, key } => {
            let engine = open_engine(&cli.index, chunks)?;
            let exists = engine.exists(&key).context("failed to check existence")?;
            if exists {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }

        Command::Stats { chunks, json } => {
            let engine = open_engine(&cli.index, chunks)?;
            let stats = engine.stats().context("failed to compute statistics")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("objects:        {}", stats.objects);
                println!("chunks:         {}", stats.chunks);
                println!("logical bytes:  {}", stats.logical_bytes);
                println!("physical bytes: {}", stats.physical_bytes);
                println!("dedup ratio:    {:.2}x ({:.1}%)", stats.ratio_x, stats.ratio_pct);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}
