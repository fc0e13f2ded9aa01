// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Token discovery and selection.
//!
//! Tokens are enumerated fresh on every call; nothing is cached. Slots whose
//! token vanished or is not recognized by the module are skipped.
//!
//! # Duplicate tokens
//!
//! [`locate_token`] returns the first token that satisfies every supplied
//! criterion, in the order the module reports its slots. When two tokens share
//! both serial number and label, which one is returned may differ between runs.

use crate::error::{Result, SignerError};
use crate::hsm::{CryptoModule, TokenInfo};
use tracing::{debug, info};

/// One token present in a slot.
#[derive(Debug, Clone)]
pub struct Token<S> {
    slot: S,
    info: TokenInfo,
}

impl<S: Copy> Token<S> {
    /// Slot holding the token.
    pub fn slot(&self) -> S {
        self.slot
    }

    /// Token manufacturer.
    pub fn manufacturer_id(&self) -> &str {
        &self.info.manufacturer_id
    }

    /// Token model.
    pub fn model(&self) -> &str {
        &self.info.model
    }

    /// Token serial number.
    pub fn serial_number(&self) -> &str {
        &self.info.serial_number
    }

    /// Token label.
    pub fn label(&self) -> &str {
        &self.info.label
    }

    /// Full token description.
    pub fn info(&self) -> &TokenInfo {
        &self.info
    }

    fn matches(&self, serial: Option<&str>, label: Option<&str>) -> bool {
        criterion_matches(serial, &self.info.serial_number)
            && criterion_matches(label, &self.info.label)
    }
}

fn criterion_matches(wanted: Option<&str>, actual: &str) -> bool {
    match wanted {
        Some(wanted) if !wanted.is_empty() => wanted.to_lowercase() == actual.to_lowercase(),
        _ => true,
    }
}

/// List every token currently present in the module.
pub fn list_tokens<M: CryptoModule>(module: &M) -> Result<Vec<Token<M::Slot>>> {
    let mut tokens = Vec::new();
    for slot in module.slots_with_token()? {
        match module.token_info(slot)? {
            Some(info) => tokens.push(Token { slot, info }),
            None => debug!(?slot, "Slot skipped"),
        }
    }
    Ok(tokens)
}

/// Find the first token whose serial number and label match.
///
/// Comparison is case-insensitive. A criterion that is `None` or empty does
/// not filter; with no criteria at all the first present token is returned.
/// Callers that must be anchored to a specific token check for at least one
/// criterion themselves.
///
/// # Errors
///
/// Returns [`SignerError::TokenNotFound`] if no present token matches.
pub fn locate_token<M: CryptoModule>(
    module: &M,
    serial: Option<&str>,
    label: Option<&str>,
) -> Result<Token<M::Slot>> {
    let token = list_tokens(module)?
        .into_iter()
        .find(|token| token.matches(serial, label))
        .ok_or_else(|| SignerError::token_not_found(serial, label))?;

    info!(
        serial = token.serial_number(),
        label = token.label(),
        "Selected token"
    );
    Ok(token)
}
