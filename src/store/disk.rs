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

//! Sled-backed ledger store.
//!
//! Layout, one tree per concern:
//!
//! | Tree      | Key                       | Value                      |
//! |-----------|---------------------------|----------------------------|
//! | `files`   | `file`                    | [`FileRecord`] (JSON)      |
//! | `grants`  | `file, user`              | [`Privilege`] (JSON)       |
//! | `lanes`   | `file`                    | next sequence (u64 BE)     |
//! | `entries` | `file, user, seq (u64 BE)`| [`OperationEntry`] (JSON)  |
//!
//! Key components are length-prefixed, so `F1` and `F10` never share a
//! prefix and identifiers are never interpreted.

use super::{FileRecord, FileRegistry, FileState, LedgerStore, OperationLog, StoreError};
use crate::base::{AllowTable, FileId, Privilege, UserId};
use crate::operation::OperationEntry;
use sled::transaction::{
    ConflictableTransactionResult, TransactionError, TransactionalTree, abort,
};
use sled::{Config, Db, Transactional, Tree};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

mod keys {
    use crate::base::{FileId, UserId};

    fn push(buf: &mut Vec<u8>, part: &str) {
        buf.extend_from_slice(&(part.len() as u32).to_be_bytes());
        buf.extend_from_slice(part.as_bytes());
    }

    pub fn file(file_id: &FileId) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + file_id.as_str().len());
        push(&mut key, file_id.as_str());
        key
    }

    pub fn pair(file_id: &FileId, user: &UserId) -> Vec<u8> {
        let mut key = file(file_id);
        push(&mut key, user.as_str());
        key
    }

    pub fn entry(file_id: &FileId, user: &UserId, seq: u64) -> Vec<u8> {
        let mut key = pair(file_id, user);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    /// Reads the user component of an entry key whose file component
    /// occupies the first `file_len` bytes.
    pub fn user_of(key: &[u8], file_len: usize) -> Option<&str> {
        let rest = key.get(file_len..)?;
        let len_bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        std::str::from_utf8(rest.get(4..4 + len)?).ok()
    }
}

fn decode_seq(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn create_lane(
    lanes: &TransactionalTree,
    file_key: &[u8],
    next_seq: u64,
) -> ConflictableTransactionResult<(), StoreError> {
    lanes.insert(file_key, &next_seq.to_be_bytes()[..])?;
    Ok(())
}

fn into_store_error(error: TransactionError<StoreError>) -> StoreError {
    match error {
        TransactionError::Abort(error) => error,
        TransactionError::Storage(error) => StoreError::Database(error),
    }
}

/// Durable store on a sled database.
pub struct SledStore {
    db: Db,
    files: Tree,
    grants: Tree,
    lanes: Tree,
    entries: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Opens a database that is deleted when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let files = db.open_tree("files")?;
        let grants = db.open_tree("grants")?;
        let lanes = db.open_tree("lanes")?;
        let entries = db.open_tree("entries")?;
        Ok(Self {
            db,
            files,
            grants,
            lanes,
            entries,
        })
    }

    /// Number of grant rows recorded for a file.
    pub fn grant_count(&self, file_id: &FileId) -> Result<usize, StoreError> {
        let mut count = 0;
        for row in self.grants.scan_prefix(keys::file(file_id)).keys() {
            row?;
            count += 1;
        }
        Ok(count)
    }

    /// Total entries in a file's lane, or `None` if no lane exists.
    pub fn lane_len(&self, file_id: &FileId) -> Result<Option<u64>, StoreError> {
        match self.lanes.get(keys::file(file_id))? {
            Some(raw) => decode_seq(&raw)
                .map(Some)
                .ok_or(StoreError::Corrupt { tree: "lanes" }),
            None => Ok(None),
        }
    }
}

impl FileRegistry for SledStore {
    fn file(&self, file_id: &FileId) -> Result<Option<FileRecord>, StoreError> {
        self.files
            .get(keys::file(file_id))?
            .map(|raw| serde_json::from_slice(&raw))
            .transpose()
            .map_err(Into::into)
    }

    fn privilege_of(&self, file_id: &FileId, user: &UserId) -> Result<Privilege, StoreError> {
        if let Some(raw) = self.grants.get(keys::pair(file_id, user))? {
            return Ok(serde_json::from_slice(&raw)?);
        }
        if self.files.contains_key(keys::file(file_id))? {
            Err(StoreError::PrivilegeNotFound {
                file_id: file_id.clone(),
                user: user.clone(),
            })
        } else {
            Err(StoreError::FileNotFound(file_id.clone()))
        }
    }

    fn mark_terminated(&self, file_id: &FileId) -> Result<(), StoreError> {
        let key = keys::file(file_id);
        self.files
            .transaction(|files| -> ConflictableTransactionResult<(), StoreError> {
                let Some(raw) = files.get(key.as_slice())? else {
                    return abort(StoreError::FileNotFound(file_id.clone()));
                };
                let mut record: FileRecord = match serde_json::from_slice(&raw) {
                    Ok(record) => record,
                    Err(error) => return abort(StoreError::Serialization(error)),
                };
                if record.state == FileState::Terminated {
                    return abort(StoreError::AlreadyTerminated(file_id.clone()));
                }
                record.state = FileState::Terminated;
                let row = match serde_json::to_vec(&record) {
                    Ok(row) => row,
                    Err(error) => return abort(StoreError::Serialization(error)),
                };
                files.insert(key.as_slice(), row)?;
                Ok(())
            })
            .map_err(into_store_error)
    }
}

impl OperationLog for SledStore {
    fn append(&self, file_id: &FileId, entry: OperationEntry) -> Result<(), StoreError> {
        let lane_key = keys::file(file_id);
        let row = serde_json::to_vec(&entry)?;

        let seq = (&self.lanes, &self.entries)
            .transaction(|(lanes, entries)| -> ConflictableTransactionResult<u64, StoreError> {
                let seq = match lanes.get(lane_key.as_slice())? {
                    Some(raw) => match decode_seq(&raw) {
                        Some(seq) => seq,
                        None => return abort(StoreError::Corrupt { tree: "lanes" }),
                    },
                    None => return abort(StoreError::LaneNotFound(file_id.clone())),
                };
                entries.insert(keys::entry(file_id, &entry.user, seq), row.as_slice())?;
                lanes.insert(lane_key.as_slice(), &(seq + 1).to_be_bytes()[..])?;
                Ok(seq)
            })
            .map_err(into_store_error)?;

        debug!(file_id = %file_id, user = %entry.user, kind = %entry.kind, seq, "appended entry");
        Ok(())
    }

    fn list_for_user(
        &self,
        file_id: &FileId,
        user: &UserId,
    ) -> Result<Vec<OperationEntry>, StoreError> {
        self.entries
            .scan_prefix(keys::pair(file_id, user))
            .values()
            .map(|raw| Ok(serde_json::from_slice(&raw?)?))
            .collect()
    }

    fn list_users(&self, file_id: &FileId) -> Result<BTreeSet<UserId>, StoreError> {
        let prefix = keys::file(file_id);
        let mut users = BTreeSet::new();
        for item in self.entries.scan_prefix(&prefix).keys() {
            let key = item?;
            let user = keys::user_of(&key, prefix.len()).ok_or(StoreError::Corrupt {
                tree: "entries",
            })?;
            users.insert(UserId::from(user));
        }
        Ok(users)
    }
}

impl LedgerStore for SledStore {
    fn create_file(
        &self,
        file: FileRecord,
        grants: &AllowTable,
        seed: Vec<OperationEntry>,
    ) -> Result<(), StoreError> {
        // Encode up front; the transaction body may run more than once.
        let file_key = keys::file(&file.file_id);
        let file_row = serde_json::to_vec(&file)?;
        let grant_rows = grants
            .iter()
            .map(|(user, privilege)| {
                Ok((keys::pair(&file.file_id, user), serde_json::to_vec(privilege)?))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let seed_rows = seed
            .iter()
            .enumerate()
            .map(|(seq, entry)| {
                Ok((
                    keys::entry(&file.file_id, &entry.user, seq as u64),
                    serde_json::to_vec(entry)?,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let next_seq = seed_rows.len() as u64;

        (&self.files, &self.grants, &self.lanes, &self.entries)
            .transaction(
                |(files, grant_tree, lanes, entries)| -> ConflictableTransactionResult<(), StoreError> {
                if files.get(file_key.as_slice())?.is_some() {
                    return abort(StoreError::AlreadyExists(file.file_id.clone()));
                }
                files.insert(file_key.as_slice(), file_row.as_slice())?;
                for (key, row) in &grant_rows {
                    grant_tree.insert(key.as_slice(), row.as_slice())?;
                }
                create_lane(lanes, &file_key, next_seq)?;
                for (key, row) in &seed_rows {
                    entries.insert(key.as_slice(), row.as_slice())?;
                }
                Ok(())
            },
            )
            .map_err(into_store_error)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let bytes = self.db.flush()?;
        debug!(bytes, "flushed to disk");
        Ok(())
    }
}
