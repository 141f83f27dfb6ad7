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

//! # Mortgage Ledger
//!
//! This library keeps per-file custodial balances ("mortgages") contributed by
//! several users. Every balance-affecting action is an immutable entry in an
//! append-only log, and balances are always replayed from that log. When a
//! file is terminated its final balances are handed to a settlement
//! collaborator that commits them to an external chain.
//!
//! ## Core Components
//!
//! - [`Engine`]: Authorization, file lifecycle and balance operations
//! - [`LedgerStore`]: File registry plus operation log ([`MemoryStore`], [`SledStore`])
//! - [`replay`]: Deterministic fold of a user's entries into a balance
//! - [`SettlementSync`]: Collaborator receiving final balances on terminate
//! - [`LedgerError`]: Error types for ledger operations
//!
//! ## Example
//!
//! ```
//! use mortgage_ledger::{
//!     AllowTable, Amount, Engine, FileId, MortgageTable, Privilege, Settlement, SyncError, UserId,
//! };
//! use std::sync::Arc;
//!
//! let engine = Engine::in_memory(Arc::new(|_: &Settlement| -> Result<(), SyncError> { Ok(()) }));
//! let alice = UserId::from("alice");
//! let file = FileId::from("F1");
//!
//! let grants = AllowTable::from([(alice.clone(), Privilege::ReadWrite)]);
//! let mortgage = MortgageTable::from([(alice.clone(), Amount::from(100u64))]);
//! engine.init_file(&alice, &file, &grants, &mortgage).unwrap();
//!
//! let remaining = engine.subtract_value(&alice, &file, &Amount::from(40u64)).unwrap();
//! assert_eq!(remaining, Amount::from(60u64));
//!
//! let settlement = engine.terminate(&alice, &file).unwrap();
//! assert_eq!(settlement.balances[&alice], Amount::from(60u64));
//! ```
//!
//! ## Thread Safety
//!
//! The engine serializes mutations per file and can be shared across threads
//! behind an [`Arc`](std::sync::Arc).

pub mod amount;
mod base;
pub mod config;
mod engine;
pub mod error;
mod mortgage;
mod operation;
pub mod settlement;
pub mod store;

pub use amount::{Amount, AmountError};
pub use base::{AllowTable, Balances, FileId, MortgageTable, Privilege, UserId};
pub use config::LedgerConfig;
pub use engine::Engine;
pub use error::{ErrorClass, LedgerError};
pub use mortgage::MortgageInit;
pub use operation::{OperationEntry, OperationKind, replay};
pub use settlement::{JsonLinesSync, Settlement, SettlementSync, SyncError};
pub use store::{
    FileRecord, FileRegistry, FileState, LedgerStore, MemoryStore, OperationLog, SledStore,
    StoreError,
};
