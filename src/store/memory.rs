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

//! In-memory ledger store.

use super::{FileRecord, FileRegistry, FileState, LedgerStore, OperationLog, StoreError};
use crate::base::{AllowTable, FileId, Privilege, UserId};
use crate::operation::OperationEntry;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;

/// Append-only entry sequence for one file.
#[derive(Debug, Default)]
struct Lane {
    entries: Vec<OperationEntry>,
}

impl Lane {
    fn create() -> Self {
        Self::default()
    }
}

/// Everything the store knows about one file.
#[derive(Debug)]
struct FileSlot {
    record: FileRecord,
    grants: AllowTable,
    lane: Lane,
}

/// Thread-safe in-memory store.
///
/// Each file lives in a single [`DashMap`] slot, so creating a file is one
/// vacant-entry insert and readers of a slot never see a half-applied write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: DashMap<FileId, FileSlot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of grants recorded for a file; zero if the file is unknown.
    pub fn grant_count(&self, file_id: &FileId) -> usize {
        self.files
            .get(file_id)
            .map_or(0, |slot| slot.grants.len())
    }

    /// Total entries in a file's lane, across all users.
    pub fn lane_len(&self, file_id: &FileId) -> Option<usize> {
        self.files.get(file_id).map(|slot| slot.lane.entries.len())
    }
}

impl FileRegistry for MemoryStore {
    fn file(&self, file_id: &FileId) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.files.get(file_id).map(|slot| slot.record.clone()))
    }

    fn privilege_of(&self, file_id: &FileId, user: &UserId) -> Result<Privilege, StoreError> {
        let slot = self
            .files
            .get(file_id)
            .ok_or_else(|| StoreError::FileNotFound(file_id.clone()))?;
        slot.grants
            .get(user)
            .copied()
            .ok_or_else(|| StoreError::PrivilegeNotFound {
                file_id: file_id.clone(),
                user: user.clone(),
            })
    }

    fn mark_terminated(&self, file_id: &FileId) -> Result<(), StoreError> {
        let mut slot = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| StoreError::FileNotFound(file_id.clone()))?;
        if slot.record.state == FileState::Terminated {
            return Err(StoreError::AlreadyTerminated(file_id.clone()));
        }
        slot.record.state = FileState::Terminated;
        Ok(())
    }
}

impl OperationLog for MemoryStore {
    fn append(&self, file_id: &FileId, entry: OperationEntry) -> Result<(), StoreError> {
        let mut slot = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| StoreError::LaneNotFound(file_id.clone()))?;
        slot.lane.entries.push(entry);
        Ok(())
    }

    fn list_for_user(
        &self,
        file_id: &FileId,
        user: &UserId,
    ) -> Result<Vec<OperationEntry>, StoreError> {
        Ok(self
            .files
            .get(file_id)
            .map(|slot| {
                slot.lane
                    .entries
                    .iter()
                    .filter(|entry| entry.user == *user)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_users(&self, file_id: &FileId) -> Result<BTreeSet<UserId>, StoreError> {
        Ok(self
            .files
            .get(file_id)
            .map(|slot| {
                slot.lane
                    .entries
                    .iter()
                    .map(|entry| entry.user.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl LedgerStore for MemoryStore {
    fn create_file(
        &self,
        file: FileRecord,
        grants: &AllowTable,
        seed: Vec<OperationEntry>,
    ) -> Result<(), StoreError> {
        // Use entry API for atomic check-and-insert of the whole slot
        match self.files.entry(file.file_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(file.file_id)),
            Entry::Vacant(vacant) => {
                let mut lane = Lane::create();
                lane.entries.extend(seed);
                vacant.insert(FileSlot {
                    record: file,
                    grants: grants.clone(),
                    lane,
                });
                Ok(())
            }
        }
    }
}
