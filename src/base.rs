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

//! Core identifier types for files, users and privileges.

use crate::amount::Amount;
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a custodial file.
///
/// Supplied by the caller and never interpreted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Authenticated user identity.
///
/// The ledger trusts this value completely; verifying it is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-user access level on a file.
///
/// Numeric codes match the authority table delivered by the chain:
/// `0` read-write, `1` read-only, `2` write-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl Privilege {
    pub fn can_read(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadOnly)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::ReadWrite => 0,
            Self::ReadOnly => 1,
            Self::WriteOnly => 2,
        }
    }
}

impl TryFrom<u8> for Privilege {
    type Error = LedgerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::ReadWrite),
            1 => Ok(Self::ReadOnly),
            2 => Ok(Self::WriteOnly),
            other => Err(LedgerError::InvalidPrivilege(other.to_string())),
        }
    }
}

impl FromStr for Privilege {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rw" | "read-write" | "0" => Ok(Self::ReadWrite),
            "ro" | "read-only" | "1" => Ok(Self::ReadOnly),
            "wo" | "write-only" | "2" => Ok(Self::WriteOnly),
            _ => Err(LedgerError::InvalidPrivilege(s.to_owned())),
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ReadWrite => "read-write",
            Self::ReadOnly => "read-only",
            Self::WriteOnly => "write-only",
        };
        f.write_str(label)
    }
}

/// Privilege grants supplied at file creation, one per user.
pub type AllowTable = BTreeMap<UserId, Privilege>;

/// Initial contribution per user, seeded as `init` entries.
pub type MortgageTable = BTreeMap<UserId, Amount>;

/// Settled balance per user.
pub type Balances = BTreeMap<UserId, Amount>;
