// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Crate-wide error type.

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Malformed value {value:?} in {path}")]
    Malformed { path: PathBuf, value: String },

    #[error("No match for {pattern}")]
    Unresolved { pattern: PathBuf },

    #[error("Failed to parse config {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{direction} table {transition} has {actual} entries, expected {expected}")]
    TableLength {
        direction: String,
        transition: String,
        actual: usize,
        expected: usize,
    },

    #[error("{direction} table {transition} has a {found} entry at position {position}")]
    TableLayout {
        direction: String,
        transition: String,
        position: usize,
        found: String,
    },

    #[error("{direction} policy is missing the {transition} table")]
    MissingTable {
        direction: String,
        transition: String,
    },

    #[error("Snapshot does not match threshold layout at position {position}")]
    SnapshotLayout { position: usize },

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
}

impl Error {
    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Write {
            path: path.into(),
            source,
        }
    }
}
