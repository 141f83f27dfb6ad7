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

//! File initialization records delivered by the chain.

use crate::amount::Amount;
use crate::base::{AllowTable, FileId, MortgageTable, Privilege, UserId};
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A mortgage-init event as published on chain.
///
/// Authority codes are kept raw here and validated by [`MortgageInit::allow_table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MortgageInit {
    #[serde(rename = "fromAccount")]
    pub from_account: UserId,
    #[serde(rename = "fileID")]
    pub file_id: FileId,
    #[serde(rename = "mortgage")]
    pub mortgage: MortgageTable,
    #[serde(rename = "authority")]
    pub authority: BTreeMap<UserId, u8>,
    #[serde(rename = "createTime", default)]
    pub create_time: i64,
    #[serde(rename = "endTime", default)]
    pub end_time: i64,
}

impl MortgageInit {
    pub fn allow_table(&self) -> Result<AllowTable, LedgerError> {
        self.authority
            .iter()
            .map(|(user, code)| Ok((user.clone(), Privilege::try_from(*code)?)))
            .collect()
    }

    /// Origin metadata stored with the file: the event as received.
    pub fn origin(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn total_mortgage(&self) -> Amount {
        self.mortgage
            .values()
            .fold(Amount::zero(), |mut total, amount| {
                total += amount;
                total
            })
    }
}
