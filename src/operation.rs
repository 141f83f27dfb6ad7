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

//! Operation log entries and balance replay.
//!
//! A user's balance on a file is never stored. It is always the fold of
//! that user's entries in append order:
//!
//! ```text
//!   0 ──init(+v)──► ... ──subtract(-v)──► ... ──► balance
//! ```
//!
//! An entry whose kind is not understood aborts the fold; a balance computed
//! while skipping entries would be silently wrong.

use crate::amount::Amount;
use crate::base::UserId;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Kind of a balance-affecting log entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Initial mortgage contribution, credited.
    Init,
    /// Withdrawal, debited.
    Subtract,
    /// Tag read back from storage that this engine does not understand.
    Unrecognized(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Subtract => "subtract",
            Self::Unrecognized(tag) => tag,
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "init" => Self::Init,
            "subtract" => Self::Subtract,
            other => Self::Unrecognized(other.to_owned()),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperationKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

/// One immutable record in a file's operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub user: UserId,
    pub kind: OperationKind,
    pub value: Amount,
    pub created_at: DateTime<Utc>,
}

impl OperationEntry {
    pub fn new(user: UserId, kind: OperationKind, value: Amount) -> Self {
        Self::at(user, kind, value, Utc::now())
    }

    pub fn at(user: UserId, kind: OperationKind, value: Amount, created_at: DateTime<Utc>) -> Self {
        Self {
            user,
            kind,
            value,
            created_at,
        }
    }

    pub fn init(user: UserId, value: Amount) -> Self {
        Self::new(user, OperationKind::Init, value)
    }

    pub fn subtract(user: UserId, value: Amount) -> Self {
        Self::new(user, OperationKind::Subtract, value)
    }
}

/// Folds entries, in order, into a balance.
///
/// No floor is applied: a negative result is returned as-is.
///
/// # Errors
///
/// [`LedgerError::UnsupportedOperation`] if any entry has an unrecognized kind.
pub fn replay<'a, I>(entries: I) -> Result<Amount, LedgerError>
where
    I: IntoIterator<Item = &'a OperationEntry>,
{
    entries
        .into_iter()
        .try_fold(Amount::zero(), |mut balance, entry| {
            match &entry.kind {
                OperationKind::Init => balance += &entry.value,
                OperationKind::Subtract => balance -= &entry.value,
                OperationKind::Unrecognized(tag) => {
                    return Err(LedgerError::UnsupportedOperation(tag.clone()));
                }
            }
            Ok(balance)
        })
}
