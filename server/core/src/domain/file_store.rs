// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File Store Trait - Anti-Corruption Layer for the backing storage
//!
//! The state core never touches file data. Per-operation handlers resolve
//! file handles and perform I/O through this trait; the core only needs the
//! [`FileId`] identity to key share reservations and byte-range locks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque, stable identity of a file in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub Vec<u8>);

impl FileId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for FileId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// File type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

/// Subset of attributes the store reports for a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttributes {
    pub file_type: FileType,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    /// Last modification time (Unix timestamp)
    pub mtime: i64,
    /// Change time (Unix timestamp)
    pub ctime: i64,
}

/// Attributes a SETATTR may change. `None` leaves the attribute untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetAttributes {
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// File store errors. Not-found, permission and I/O failures must stay
/// distinguishable so they map to distinct protocol statuses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FileStoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation not permitted: {0}")]
    NotPermitted(String),

    #[error("Already exists: {0}")]
    Exists(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Backing file store consumed by per-operation handlers.
pub trait FileStore: Send + Sync {
    /// Resolve `name` inside directory `parent`.
    fn lookup(&self, parent: &FileId, name: &str) -> Result<FileId, FileStoreError>;

    /// Create a regular file or directory.
    fn create(
        &self,
        parent: &FileId,
        name: &str,
        file_type: FileType,
        mode: u32,
    ) -> Result<FileId, FileStoreError>;

    fn getattr(&self, file: &FileId) -> Result<FileAttributes, FileStoreError>;

    fn setattr(&self, file: &FileId, attrs: &SetAttributes) -> Result<FileAttributes, FileStoreError>;

    /// Read up to `count` bytes at `offset`. Returns the data and an EOF flag.
    fn read(&self, file: &FileId, offset: u64, count: u32) -> Result<(Vec<u8>, bool), FileStoreError>;

    /// Write `data` at `offset`, returning the number of bytes written.
    fn write(&self, file: &FileId, offset: u64, data: &[u8]) -> Result<u32, FileStoreError>;

    fn remove(&self, parent: &FileId, name: &str) -> Result<(), FileStoreError>;

    fn move_entry(
        &self,
        from_parent: &FileId,
        from_name: &str,
        to_parent: &FileId,
        to_name: &str,
    ) -> Result<(), FileStoreError>;
}
