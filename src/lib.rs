// Ledger Fix - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod ledger;         // Ledger sheet model + XLSX/CSV loading
pub mod data_quality;   // Null / length checks
pub mod report;         // Pass/fail blocks + issue sets
pub mod config;         // TOML config + API key
pub mod onchain;        // On-chain event model + index trait
pub mod query;          // Hash allow-list + SQL text
pub mod flipside;       // Flipside JSON-RPC client
pub mod reconciliation; // Five-case decision table
pub mod deduplication;  // Keep-last on (wallet, hash, label)
pub mod aggregation;    // Merge + pivot summary
pub mod session;        // Upload → report → fix

// Re-export commonly used types
pub use ledger::{
    Column, Ledger, LedgerRow,
    load_ledger, load_ledger_bytes, write_ledger_csv,
};
pub use data_quality::{
    CheckKind, CheckOutcome, DataQualityEngine, QualityCheck, Severity,
    length_check, null_check,
};
pub use report::{FlaggedRow, IssueSet, QualityReport, ReportBlock};
pub use config::{ChainConfig, Config, FlipsideConfig};
pub use onchain::{EventKind, LedgerIndex, OnChainEvent};
pub use query::{EventQuery, FragmentRejection, HashFragment};
pub use flipside::FlipsideClient;
pub use reconciliation::{
    FlowDirection, ReconcileCase, ReconciliationEngine, ReconciliationReport,
    ReplacementRow, VerificationStatus, WalletBook,
};
pub use deduplication::{DeduplicationEngine, DuplicateMatch};
pub use aggregation::{aggregate, Summary, SummaryRow, SUMMARY_FILE_NAME};
pub use session::{
    run_fix, FixOutcome, FixRefusal, Session, SessionStore, DEFAULT_SESSION_CAPACITY,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
