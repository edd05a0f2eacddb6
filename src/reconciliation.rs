// ⚖️ Reconciliation Engine - rebuild flagged rows from on-chain data
//
// Flagged hashes → one on-chain query → each returned event is tried against
// a fixed, ordered decision table. The first case whose event type matches
// and whose address (from/to) is a known wallet produces a replacement row.
//
//   case        address   event             sign  direction  label
//   TokenIn     to        token_transfers    +1   inflow     Recieve Tokens
//   TokenOut    from      token_transfers    -1   outflow    Send Tokens
//   NativeIn    to        native_transfers   +1   inflow     Recieve Coins
//   NativeOut   from      native_transfers   -1   outflow    Send Coins
//   FeeOut      from      pay fees           -1   fees       Pay Fees

use crate::config::ChainConfig;
use crate::ledger::{Ledger, LedgerRow};
use crate::onchain::{EventKind, LedgerIndex, OnChainEvent};
use crate::query::EventQuery;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

// ============================================================================
// CASE TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSide {
    From,
    To,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowDirection {
    Inflow,
    Outflow,
    Fees,
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::Inflow => "inflow",
            FlowDirection::Outflow => "outflow",
            FlowDirection::Fees => "fees",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Verified,   // Native asset, amount comes straight from the chain
    Unverified, // Token transfer, needs manual review
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Unverified => "unverified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileCase {
    TokenIn,
    TokenOut,
    NativeIn,
    NativeOut,
    FeeOut,
}

impl ReconcileCase {
    /// Evaluation order; the first match wins
    pub const TABLE: [ReconcileCase; 5] = [
        ReconcileCase::TokenIn,
        ReconcileCase::TokenOut,
        ReconcileCase::NativeIn,
        ReconcileCase::NativeOut,
        ReconcileCase::FeeOut,
    ];

    pub fn address_side(&self) -> AddressSide {
        match self {
            ReconcileCase::TokenIn | ReconcileCase::NativeIn => AddressSide::To,
            ReconcileCase::TokenOut | ReconcileCase::NativeOut | ReconcileCase::FeeOut => {
                AddressSide::From
            }
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            ReconcileCase::TokenIn | ReconcileCase::TokenOut => EventKind::TokenTransfer,
            ReconcileCase::NativeIn | ReconcileCase::NativeOut => EventKind::NativeTransfer,
            ReconcileCase::FeeOut => EventKind::FeePayment,
        }
    }

    pub fn sign(&self) -> f64 {
        match self.direction() {
            FlowDirection::Inflow => 1.0,
            FlowDirection::Outflow | FlowDirection::Fees => -1.0,
        }
    }

    pub fn direction(&self) -> FlowDirection {
        match self {
            ReconcileCase::TokenIn | ReconcileCase::NativeIn => FlowDirection::Inflow,
            ReconcileCase::TokenOut | ReconcileCase::NativeOut => FlowDirection::Outflow,
            ReconcileCase::FeeOut => FlowDirection::Fees,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReconcileCase::TokenIn => "Recieve Tokens",
            ReconcileCase::TokenOut => "Send Tokens",
            ReconcileCase::NativeIn => "Recieve Coins",
            ReconcileCase::NativeOut => "Send Coins",
            ReconcileCase::FeeOut => "Pay Fees",
        }
    }

    pub fn status(&self) -> VerificationStatus {
        if self.is_native() {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Unverified
        }
    }

    pub fn is_native(&self) -> bool {
        !matches!(self, ReconcileCase::TokenIn | ReconcileCase::TokenOut)
    }

    /// Lower-cased address this case inspects
    fn address_of(&self, event: &OnChainEvent) -> String {
        match self.address_side() {
            AddressSide::From => event.from_address.to_lowercase(),
            AddressSide::To => event.to_address.to_lowercase(),
        }
    }
}

// ============================================================================
// WALLET BOOK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub label: String,
    pub address: Option<String>,
}

/// Known wallets, keyed by lower-cased label; the first row for a label wins
#[derive(Debug, Clone, Default)]
pub struct WalletBook {
    wallets: HashMap<String, Wallet>,
}

impl WalletBook {
    pub fn from_rows(rows: &[LedgerRow]) -> Self {
        let mut wallets = HashMap::new();
        for row in rows {
            if let (Some(key), Some(label)) = (row.wallet_key(), row.belongs_to.as_ref()) {
                wallets.entry(key).or_insert_with(|| Wallet {
                    label: label.clone(),
                    address: row.belongs_to_address.clone(),
                });
            }
        }
        WalletBook { wallets }
    }

    pub fn lookup(&self, address_lower: &str) -> Option<&Wallet> {
        self.wallets.get(address_lower)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

// ============================================================================
// REPLACEMENT ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementRow {
    pub case: ReconcileCase,
    pub wallet: Wallet,
    pub event: OnChainEvent,
    /// sign × on-chain amount
    pub balance_impact: f64,
}

impl ReplacementRow {
    pub fn direction(&self) -> FlowDirection {
        self.case.direction()
    }

    pub fn label(&self) -> &'static str {
        self.case.label()
    }

    pub fn status(&self) -> VerificationStatus {
        self.case.status()
    }

    /// Ledger row carrying the same columns as an uploaded one
    pub fn to_ledger_row(&self) -> LedgerRow {
        let event = &self.event;
        let contract = if self.case.is_native() {
            "native".to_string()
        } else {
            event.contract_address.clone()
        };

        let mut row = LedgerRow {
            line_number: None,
            belongs_to: Some(self.wallet.label.clone()),
            belongs_to_address: self.wallet.address.clone(),
            transaction_hash: Some(event.tx_hash.clone()),
            asset_address: Some(event.contract_address.clone()),
            balance_impact: Some(self.balance_impact),
            currency_symbol: event.symbol.clone(),
            direction: Some(self.direction().as_str().to_string()),
            event_label: Some(self.label().to_string()),
            ..LedgerRow::default()
        };

        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                row.metadata.insert(key.to_string(), v);
            }
        };
        put("Timestamp", Some(event.block_timestamp.clone()));
        put("Asset Verification Status", Some(self.status().as_str().to_string()));
        put("From Address", Some(event.from_address.clone()));
        put("To Address", Some(event.to_address.clone()));
        put("Original Amount", Some(event.amount.to_string()));
        put("Original Currency Name", event.name.clone());
        put("Currency Group Symbol", event.symbol.clone());
        put("Contract Address", Some(contract));
        put("Block Number", event.block_number.map(|n| n.to_string()));

        row
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub query: EventQuery,
    pub events_fetched: usize,
    pub unmatched_events: usize,
    pub replacements: Vec<ReplacementRow>,
    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "{} hash(es) queried ({} rejected), {} on-chain event(s), {} replacement row(s), {} unmatched",
            self.query.fragments.len(),
            self.query.rejected.len(),
            self.events_fetched,
            self.replacements.len(),
            self.unmatched_events
        )
    }

    pub fn ledger_rows(&self) -> Vec<LedgerRow> {
        self.replacements.iter().map(|r| r.to_ledger_row()).collect()
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    chain: ChainConfig,
}

impl ReconciliationEngine {
    pub fn new(chain: ChainConfig) -> Self {
        ReconciliationEngine { chain }
    }

    /// First case in table order that fires for this event
    pub fn classify<'a>(
        &self,
        event: &OnChainEvent,
        wallets: &'a WalletBook,
    ) -> Option<(ReconcileCase, &'a Wallet)> {
        ReconcileCase::TABLE.iter().find_map(|case| {
            if case.event_kind() != event.event {
                return None;
            }
            wallets
                .lookup(&case.address_of(event))
                .map(|wallet| (*case, wallet))
        })
    }

    /// One replacement row per matching event, in event order
    pub fn synthesize(&self, events: &[OnChainEvent], wallets: &WalletBook) -> Vec<ReplacementRow> {
        events
            .iter()
            .filter_map(|event| match self.classify(event, wallets) {
                Some((case, wallet)) => Some(ReplacementRow {
                    case,
                    wallet: wallet.clone(),
                    event: event.clone(),
                    balance_impact: case.sign() * event.amount,
                }),
                None => {
                    debug!(tx_hash = %event.tx_hash, event = event.event.tag(), "no known wallet on event");
                    None
                }
            })
            .collect()
    }

    /// Query the index for the flagged hashes and build replacement rows
    pub fn reconcile(
        &self,
        ledger: &Ledger,
        flagged_hashes: &[String],
        index: &dyn LedgerIndex,
    ) -> Result<ReconciliationReport> {
        let query = EventQuery::build(flagged_hashes, &self.chain);
        let events = if query.is_empty() {
            Vec::new()
        } else {
            index.fetch_events(&query)?
        };

        let wallets = WalletBook::from_rows(&ledger.rows);
        let replacements = self.synthesize(&events, &wallets);

        let report = ReconciliationReport {
            events_fetched: events.len(),
            unmatched_events: events.len() - replacements.len(),
            replacements,
            query,
            reconciled_at: chrono::Utc::now(),
        };
        info!("{}", report.summary());
        Ok(report)
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(ChainConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
