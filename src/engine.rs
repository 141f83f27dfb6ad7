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

//! Ledger engine.
//!
//! The [`Engine`] is the only entry point that mutates the ledger. It checks
//! ownership and privileges against the file registry, appends to the
//! operation log and replays the log whenever a balance is needed.
//!
//! # Operations
//!
//! - **Init**: Creates a file with its grants and one `init` entry per contributor.
//! - **Read**: Replays a user's lane (reader needs read privilege).
//! - **Subtract**: Appends a `subtract` entry if the replayed balance covers it.
//! - **Terminate**: Closes the file (owner only) and hands final balances to settlement.
//! - **Resync**: Re-drives settlement for a file already terminated.
//!
//! # Thread Safety
//!
//! Every mutation of a file runs under that file's lock from a per-engine
//! lock table, so a balance check and the append that depends on it are
//! never separated by another write. No operation holds two file locks.

use crate::amount::Amount;
use crate::base::{AllowTable, Balances, FileId, MortgageTable, Privilege, UserId};
use crate::config::{DEFAULT_SYNC_TIMEOUT_MS, LedgerConfig};
use crate::error::LedgerError;
use crate::mortgage::MortgageInit;
use crate::operation::{OperationEntry, OperationKind, replay};
use crate::settlement::{Settlement, SettlementSync, SyncError};
use crate::store::{FileRecord, LedgerStore, MemoryStore, StoreError};
use chrono::Utc;
use crossbeam::channel::{self, RecvTimeoutError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Mortgage ledger over a [`LedgerStore`].
///
/// # Invariants
///
/// - A file is created once, with its grants, lane and seed entries, or not at all.
/// - Files only move `Open` -> `Terminated`.
/// - Balances are never stored; they are replayed from the operation log.
/// - A `subtract` is appended only if the balance replayed under the file lock covers it,
///   so no replayed balance produced by the engine is negative.
pub struct Engine<S: LedgerStore = MemoryStore> {
    store: S,
    /// Per-file mutual exclusion for registry and log mutations.
    locks: DashMap<FileId, Arc<Mutex<()>>>,
    settlement: Arc<dyn SettlementSync>,
    sync_timeout: Duration,
}

impl Engine<MemoryStore> {
    /// Creates an engine over a fresh in-memory store.
    pub fn in_memory(settlement: Arc<dyn SettlementSync>) -> Self {
        Self::new(MemoryStore::new(), settlement)
    }
}

impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S, settlement: Arc<dyn SettlementSync>) -> Self {
        Engine {
            store,
            locks: DashMap::new(),
            settlement,
            sync_timeout: Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS),
        }
    }

    pub fn from_config(store: S, settlement: Arc<dyn SettlementSync>, config: &LedgerConfig) -> Self {
        Self::new(store, settlement).with_sync_timeout(config.sync_timeout())
    }

    /// Bounds how long a single settlement call may take.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the registry record of a file.
    pub fn file(&self, file_id: &FileId) -> Result<Option<FileRecord>, LedgerError> {
        Ok(self.store.file(file_id)?)
    }

    /// Creates a file owned by `user`.
    ///
    /// See [`Engine::init_file_with_origin`].
    pub fn init_file(
        &self,
        user: &UserId,
        file_id: &FileId,
        grants: &AllowTable,
        mortgage: &MortgageTable,
    ) -> Result<(), LedgerError> {
        self.init_file_with_origin(user, file_id, String::new(), grants, mortgage)
    }

    /// Creates a file owned by `user`, with its privilege grants and one
    /// `init` entry per contributor in `mortgage`.
    ///
    /// Nothing is written unless every input is valid, and the store commits
    /// the file, grants, lane and entries as one unit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EmptyIdentifier`] - Empty file or owner identifier.
    /// - [`LedgerError::NoNegativeValueAllowed`] - A contribution is negative.
    /// - [`LedgerError::AlreadyExists`] - File identifier already registered.
    pub fn init_file_with_origin(
        &self,
        user: &UserId,
        file_id: &FileId,
        origin: String,
        grants: &AllowTable,
        mortgage: &MortgageTable,
    ) -> Result<(), LedgerError> {
        if file_id.as_str().is_empty() || user.as_str().is_empty() {
            return Err(LedgerError::EmptyIdentifier);
        }

        let now = Utc::now();
        let seed = mortgage
            .iter()
            .map(|(contributor, amount)| {
                if amount.is_negative() {
                    return Err(LedgerError::NoNegativeValueAllowed);
                }
                Ok(OperationEntry::at(
                    contributor.clone(),
                    OperationKind::Init,
                    amount.clone(),
                    now,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let record = FileRecord::open(file_id.clone(), user.clone(), origin, now);

        let lock = self.lock_for(file_id);
        let _guard = lock.lock();
        self.store.create_file(record, grants, seed)?;
        self.store.flush()?;

        info!(
            file_id = %file_id,
            owner = %user,
            grants = grants.len(),
            contributors = mortgage.len(),
            "file created"
        );
        Ok(())
    }

    /// Creates a file from a chain mortgage-init event, keeping the event
    /// itself as the file's origin.
    pub fn apply_mortgage_init(&self, init: &MortgageInit) -> Result<(), LedgerError> {
        let grants = init.allow_table()?;
        let origin = init.origin().map_err(StoreError::from)?;
        debug!(
            file_id = %init.file_id,
            owner = %init.from_account,
            total = %init.total_mortgage(),
            "applying mortgage init"
        );
        self.init_file_with_origin(&init.from_account, &init.file_id, origin, &grants, &init.mortgage)
    }

    /// Reads `target`'s balance on a file on behalf of `reader`.
    ///
    /// Privilege is file-scoped: any reader with read access may read any
    /// user's balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NoPermission`] - Reader holds no read-capable grant.
    /// - [`LedgerError::UnsupportedOperation`] - The lane holds an entry this engine cannot replay.
    pub fn read_value(
        &self,
        reader: &UserId,
        file_id: &FileId,
        target: &UserId,
    ) -> Result<Amount, LedgerError> {
        let privilege = self.privilege(reader, file_id)?;
        if !privilege.can_read() {
            warn!(file_id = %file_id, user = %reader, %privilege, "read denied");
            return Err(LedgerError::NoPermission);
        }
        let balance = self.balance_of(file_id, target)?;
        debug!(file_id = %file_id, reader = %reader, target = %target, %balance, "read balance");
        Ok(balance)
    }

    /// Withdraws `amount` from `user`'s balance on a file and returns the
    /// new balance.
    ///
    /// The balance check and the append run under the file lock, so two
    /// concurrent withdrawals can never both spend the same funds.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NoPermission`] - User holds no write-capable grant.
    /// - [`LedgerError::NoNegativeValueAllowed`] - `amount` is negative.
    /// - [`LedgerError::FileTerminated`] - File is closed.
    /// - [`LedgerError::InsufficientBalance`] - `amount` exceeds the replayed balance.
    pub fn subtract_value(
        &self,
        user: &UserId,
        file_id: &FileId,
        amount: &Amount,
    ) -> Result<Amount, LedgerError> {
        let privilege = self.privilege(user, file_id)?;
        if !privilege.can_write() {
            warn!(file_id = %file_id, user = %user, %privilege, "subtract denied");
            return Err(LedgerError::NoPermission);
        }
        if amount.is_negative() {
            return Err(LedgerError::NoNegativeValueAllowed);
        }

        let lock = self.lock_for(file_id);
        let _guard = lock.lock();

        let record = self.store.file(file_id)?.ok_or(LedgerError::NotFound)?;
        if !record.is_open() {
            return Err(LedgerError::FileTerminated);
        }

        let balance = self.balance_of(file_id, user)?;
        if balance < *amount {
            debug!(file_id = %file_id, user = %user, %balance, %amount, "insufficient balance");
            return Err(LedgerError::InsufficientBalance);
        }

        self.store
            .append(file_id, OperationEntry::subtract(user.clone(), amount.clone()))?;
        self.store.flush()?;

        let remaining = &balance - amount;
        debug!(file_id = %file_id, user = %user, %amount, %remaining, "subtracted");
        Ok(remaining)
    }

    /// Terminates a file and settles its final balances.
    ///
    /// The final balances are computed and the file is marked terminated
    /// under the file lock. The transition is flushed to the store before the
    /// lock is released and before the settlement call, which is bounded by
    /// the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown file.
    /// - [`LedgerError::NotOwner`] - Caller is not the owner, whatever their grant.
    /// - [`LedgerError::AlreadyTerminated`] - File was already terminated.
    /// - [`LedgerError::SyncFailed`] - File is terminated locally but settlement
    ///   failed; use [`Engine::resync_settlement`] to re-drive it.
    pub fn terminate(&self, user: &UserId, file_id: &FileId) -> Result<Settlement, LedgerError> {
        // Unknown files never get a lock table entry.
        if self.store.file(file_id)?.is_none() {
            return Err(LedgerError::NotFound);
        }

        let settlement = {
            let lock = self.lock_for(file_id);
            let _guard = lock.lock();

            let record = self.store.file(file_id)?.ok_or(LedgerError::NotFound)?;
            if record.owner != *user {
                warn!(file_id = %file_id, user = %user, "terminate denied: not owner");
                return Err(LedgerError::NotOwner);
            }
            if !record.is_open() {
                return Err(LedgerError::AlreadyTerminated);
            }

            // Replay before the transition so an unreadable lane leaves the file open.
            let balances = self.final_balances(file_id)?;
            self.store.mark_terminated(file_id)?;
            self.store.flush()?;
            info!(file_id = %file_id, owner = %user, participants = balances.len(), "file terminated");

            Settlement::terminate(user.clone(), file_id.clone(), balances)
        };

        self.settle(settlement)
    }

    /// Calls the settlement collaborator again for a terminated file.
    ///
    /// The settlement is rebuilt from the log; the log of a terminated file
    /// never changes, so the collaborator receives the same arguments.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Unknown file.
    /// - [`LedgerError::NotOwner`] - Caller is not the owner.
    /// - [`LedgerError::NotTerminated`] - File is still open.
    /// - [`LedgerError::SyncFailed`] - Settlement failed again.
    pub fn resync_settlement(
        &self,
        user: &UserId,
        file_id: &FileId,
    ) -> Result<Settlement, LedgerError> {
        let record = self.store.file(file_id)?.ok_or(LedgerError::NotFound)?;
        if record.owner != *user {
            warn!(file_id = %file_id, user = %user, "resync denied: not owner");
            return Err(LedgerError::NotOwner);
        }
        if record.is_open() {
            return Err(LedgerError::NotTerminated);
        }

        let balances = self.final_balances(file_id)?;
        self.settle(Settlement::terminate(user.clone(), file_id.clone(), balances))
    }

    /// Replays the balance of every user with at least one entry on the file.
    pub fn final_balances(&self, file_id: &FileId) -> Result<Balances, LedgerError> {
        self.store
            .list_users(file_id)?
            .into_iter()
            .map(|user| {
                let balance = self.balance_of(file_id, &user)?;
                Ok((user, balance))
            })
            .collect()
    }

    /// Replays a lane without any privilege check.
    fn balance_of(&self, file_id: &FileId, user: &UserId) -> Result<Amount, LedgerError> {
        let entries = self.store.list_for_user(file_id, user)?;
        replay(&entries).inspect_err(|err| {
            if let LedgerError::UnsupportedOperation(kind) = err {
                error!(
                    file_id = %file_id,
                    user = %user,
                    kind = %kind,
                    entries = entries.len(),
                    "operation log holds an entry this engine cannot replay"
                );
            }
        })
    }

    /// Unknown files and missing grants both mean no permission.
    fn privilege(&self, user: &UserId, file_id: &FileId) -> Result<Privilege, LedgerError> {
        match self.store.privilege_of(file_id, user) {
            Ok(privilege) => Ok(privilege),
            Err(StoreError::FileNotFound(_) | StoreError::PrivilegeNotFound { .. }) => {
                warn!(file_id = %file_id, user = %user, "no grant");
                Err(LedgerError::NoPermission)
            }
            Err(other) => Err(other.into()),
        }
    }

    fn lock_for(&self, file_id: &FileId) -> Arc<Mutex<()>> {
        // Clone the handle out so the map shard is not held while waiting.
        Arc::clone(&self.locks.entry(file_id.clone()).or_default())
    }

    fn settle(&self, settlement: Settlement) -> Result<Settlement, LedgerError> {
        match self.dispatch(&settlement) {
            Ok(()) => {
                info!(file_id = %settlement.file_id, participants = settlement.balances.len(), "settlement synced");
                Ok(settlement)
            }
            Err(err) => {
                warn!(file_id = %settlement.file_id, error = %err, "settlement sync failed; file stays terminated");
                Err(LedgerError::SyncFailed(err))
            }
        }
    }

    /// Runs one settlement attempt on a worker thread, waiting at most
    /// `sync_timeout` for its outcome.
    fn dispatch(&self, settlement: &Settlement) -> Result<(), SyncError> {
        let (tx, rx) = channel::bounded(1);
        let sync = Arc::clone(&self.settlement);
        let payload = settlement.clone();

        thread::Builder::new()
            .name("settlement-sync".into())
            .spawn(move || {
                // Receiver may be gone after a timeout
                let _ = tx.send(sync.sync(&payload));
            })
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match rx.recv_timeout(self.sync_timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout(self.sync_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::Aborted),
        }
    }
}
