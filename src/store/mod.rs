// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! File registry and operation log storage.
//!
//! The registry holds each file's identity, owner, lifecycle state and
//! privilege grants. The log holds one append-only lane of
//! [`OperationEntry`] records per file. A [`LedgerStore`] provides both and
//! creates a file, its grants, its lane and its seed entries as one unit.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: in-process, backed by [`dashmap::DashMap`].
//! - [`SledStore`]: durable, backed by `sled` trees and transactions.

mod disk;
mod memory;

pub use disk::SledStore;
pub use memory::MemoryStore;

use crate::base::{AllowTable, FileId, Privilege, UserId};
use crate::operation::OperationEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("file {0} already exists")]
    AlreadyExists(FileId),

    #[error("file {0} not found")]
    FileNotFound(FileId),

    #[error("file {0} already terminated")]
    AlreadyTerminated(FileId),

    #[error("no privilege for {user} on file {file_id}")]
    PrivilegeNotFound { file_id: FileId, user: UserId },

    #[error("no operation lane for file {0}")]
    LaneNotFound(FileId),

    #[error("corrupt record in {tree}")]
    Corrupt { tree: &'static str },

    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle of a file. `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Open,
    Terminated,
}

/// Registry row for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub owner: UserId,
    pub state: FileState,
    /// Opaque metadata about where the file came from.
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn open(file_id: FileId, owner: UserId, origin: String, created_at: DateTime<Utc>) -> Self {
        Self {
            file_id,
            owner,
            state: FileState::Open,
            origin,
            created_at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == FileState::Open
    }
}

/// Durable record of files, owners and privilege grants.
pub trait FileRegistry {
    fn file(&self, file_id: &FileId) -> Result<Option<FileRecord>, StoreError>;

    /// Unknown files have no owner.
    fn is_owner(&self, file_id: &FileId, user: &UserId) -> Result<bool, StoreError> {
        Ok(self
            .file(file_id)?
            .is_some_and(|record| record.owner == *user))
    }

    /// Exact-match grant lookup.
    ///
    /// # Errors
    ///
    /// [`StoreError::FileNotFound`] for an unknown file and
    /// [`StoreError::PrivilegeNotFound`] when the user holds no grant.
    fn privilege_of(&self, file_id: &FileId, user: &UserId) -> Result<Privilege, StoreError>;

    /// Moves an open file to `Terminated`.
    ///
    /// # Errors
    ///
    /// [`StoreError::FileNotFound`] or [`StoreError::AlreadyTerminated`].
    fn mark_terminated(&self, file_id: &FileId) -> Result<(), StoreError>;
}

/// Append-only per-file operation lanes.
pub trait OperationLog {
    /// Appends one entry at the end of the file's lane.
    ///
    /// # Errors
    ///
    /// [`StoreError::LaneNotFound`] if the file was never created.
    fn append(&self, file_id: &FileId, entry: OperationEntry) -> Result<(), StoreError>;

    /// Entries for `(file_id, user)` in append order. Empty if none.
    fn list_for_user(
        &self,
        file_id: &FileId,
        user: &UserId,
    ) -> Result<Vec<OperationEntry>, StoreError>;

    /// Users with at least one entry in the file's lane.
    fn list_users(&self, file_id: &FileId) -> Result<BTreeSet<UserId>, StoreError>;
}

/// Combined registry and log with atomic file creation.
pub trait LedgerStore: FileRegistry + OperationLog + Send + Sync {
    /// Records `file` with its grants, allocates its lane and appends
    /// `seed` in order. Either all of it becomes visible or none of it.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the identifier is taken.
    fn create_file(
        &self,
        file: FileRecord,
        grants: &AllowTable,
        seed: Vec<OperationEntry>,
    ) -> Result<(), StoreError>;

    /// Makes every committed write durable. Stores without a disk are
    /// durable on commit.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
