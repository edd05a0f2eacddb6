// ⛓️ On-chain events - rows returned by the ledger-indexing service

use crate::query::EventQuery;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Sub-query a row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TokenTransfer,
    NativeTransfer,
    FeePayment,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::TokenTransfer,
        EventKind::NativeTransfer,
        EventKind::FeePayment,
    ];

    /// Value of the `event` column for this sub-query
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::TokenTransfer => "token_transfers",
            EventKind::NativeTransfer => "native_transfers",
            EventKind::FeePayment => "pay fees",
        }
    }

    pub fn from_tag(tag: &str) -> Option<EventKind> {
        EventKind::ALL.iter().copied().find(|k| k.tag() == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnChainEvent {
    pub block_timestamp: String,
    pub block_number: Option<i64>,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    /// Token contract, or `native` for the chain's own asset
    pub contract_address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub amount: f64,
    pub event: EventKind,
}

/// Source of on-chain events for a set of flagged hashes
///
/// Implemented by the Flipside client; tests plug in an in-memory index.
pub trait LedgerIndex {
    fn fetch_events(&self, query: &EventQuery) -> Result<Vec<OnChainEvent>>;
}
