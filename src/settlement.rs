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

//! Settlement handoff to the external chain.
//!
//! When a file is terminated the engine hands its final balances to a
//! [`SettlementSync`] collaborator. The collaborator must tolerate being
//! called again with an identical [`Settlement`].

use crate::base::{Balances, FileId, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;

/// Final balances of a file, in the shape the chain expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    #[serde(rename = "fromAccount")]
    pub from_account: UserId,
    pub terminate: bool,
    #[serde(rename = "sidechain")]
    pub balances: Balances,
    #[serde(rename = "fileID")]
    pub file_id: FileId,
}

impl Settlement {
    pub fn terminate(from_account: UserId, file_id: FileId, balances: Balances) -> Self {
        Self {
            from_account,
            terminate: true,
            balances,
            file_id,
        }
    }
}

/// Reasons a settlement attempt did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("settlement rejected: {0}")]
    Rejected(String),

    #[error("settlement timed out after {0:?}")]
    Timeout(Duration),

    #[error("settlement transport error: {0}")]
    Transport(String),

    /// The collaborator stopped without reporting an outcome.
    #[error("settlement aborted without a result")]
    Aborted,
}

/// Commits final balances to an external authority.
pub trait SettlementSync: Send + Sync {
    fn sync(&self, settlement: &Settlement) -> Result<(), SyncError>;
}

impl<F> SettlementSync for F
where
    F: Fn(&Settlement) -> Result<(), SyncError> + Send + Sync,
{
    fn sync(&self, settlement: &Settlement) -> Result<(), SyncError> {
        self(settlement)
    }
}

/// Writes each settlement as one JSON line for an outer relay to pick up.
pub struct JsonLinesSync<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSync<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> SettlementSync for JsonLinesSync<W> {
    fn sync(&self, settlement: &Settlement) -> Result<(), SyncError> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, settlement)
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        writeln!(writer).map_err(|e| SyncError::Transport(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SyncError::Transport(e.to_string()))
    }
}
