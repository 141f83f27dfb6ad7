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

//! Error types for ledger operations.

use crate::settlement::SyncError;
use crate::store::StoreError;
use thiserror::Error;

/// Broad category of a [`LedgerError`], used to decide how a caller reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller lacks the required role. Never retried.
    Authorization,
    /// Malformed input or uninterpretable log content. Never retried.
    Validation,
    /// Operation is invalid for the current ledger state.
    State,
    /// Local persistence failed; nothing was written.
    Infrastructure,
    /// File closed locally, settlement still pending.
    Settlement,
}

/// Ledger operation errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Only the file owner may terminate or re-drive settlement
    #[error("insufficient privilege: not owner")]
    NotOwner,

    /// Caller has no grant, or the grant does not allow the operation
    #[error("user has no permission")]
    NoPermission,

    /// Amounts must be zero or positive
    #[error("negative value not allowed")]
    NoNegativeValueAllowed,

    /// Log entry kind not understood by this engine
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// File or owner identifier is empty
    #[error("identifier must not be empty")]
    EmptyIdentifier,

    /// Privilege code or label is not recognised
    #[error("invalid privilege: {0}")]
    InvalidPrivilege(String),

    /// File identifier already registered
    #[error("file already exists")]
    AlreadyExists,

    /// File identifier is unknown
    #[error("file not found")]
    NotFound,

    /// File was already terminated
    #[error("file already terminated")]
    AlreadyTerminated,

    /// Withdrawal would exceed the replayed balance
    #[error("insufficient balance")]
    InsufficientBalance,

    /// File is terminated and accepts no further withdrawals
    #[error("file is terminated")]
    FileTerminated,

    /// Settlement can only be re-driven for a terminated file
    #[error("file is not terminated")]
    NotTerminated,

    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    /// Local state is terminated but the settlement collaborator failed
    #[error("settlement sync failed: {0}")]
    SyncFailed(#[source] SyncError),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotOwner | Self::NoPermission => ErrorClass::Authorization,
            Self::NoNegativeValueAllowed
            | Self::UnsupportedOperation(_)
            | Self::EmptyIdentifier
            | Self::InvalidPrivilege(_) => ErrorClass::Validation,
            Self::AlreadyExists
            | Self::NotFound
            | Self::AlreadyTerminated
            | Self::InsufficientBalance
            | Self::FileTerminated
            | Self::NotTerminated => ErrorClass::State,
            Self::Storage(_) => ErrorClass::Infrastructure,
            Self::SyncFailed(_) => ErrorClass::Settlement,
        }
    }
}

/// Lifts the state conditions a store reports into their ledger equivalents;
/// everything else is an infrastructure failure.
impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AlreadyExists(_) => Self::AlreadyExists,
            StoreError::FileNotFound(_) => Self::NotFound,
            StoreError::AlreadyTerminated(_) => Self::AlreadyTerminated,
            StoreError::PrivilegeNotFound { .. } => Self::NoPermission,
            other => Self::Storage(other),
        }
    }
}
