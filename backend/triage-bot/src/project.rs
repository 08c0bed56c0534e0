//! Registry-level data types shared by the synchronizer, the cache, and the
//! impact evaluator.

use std::fmt;

use serde::Deserialize;

/// An account address in canonical lowercase form.
///
/// Every address entering the system is normalized here, so equality and
/// hashing are case-insensitive with respect to the original input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(from = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A project as registered on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub owner: Address,
    pub contracts: Vec<Address>,
    pub domain: String,
    /// Opaque routing string, e.g. `tg:odesec_bot/-4138107020`.
    pub contact: String,
}

impl Project {
    /// The chat that incident reports for this project are delivered to:
    /// everything after the last `/` of the contact string.
    pub fn contact_chat_id(&self) -> Option<&str> {
        let id = self.contact.rsplit('/').next()?.trim();
        (!id.is_empty()).then_some(id)
    }
}

/// A (token contract, storage slot) pair whose modification marks an exploit
/// as value-bearing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamousSlotRule {
    pub token: Address,
    pub slot: String,
}
