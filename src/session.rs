// 🧾 Session - one uploaded ledger, its quality report and the fix result
//
// Upload → checks → report. The fix runs only when the report has warnings,
// no blocking errors, and the user confirmed. Each stage takes the previous
// stage's values and returns new ones.

use crate::aggregation::{aggregate, Aggregation, SummaryRow};
use crate::config::ChainConfig;
use crate::data_quality::DataQualityEngine;
use crate::ledger::{load_ledger_bytes, write_ledger_csv, Ledger};
use crate::onchain::LedgerIndex;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::report::QualityReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

// ============================================================================
// FIX REFUSAL
// ============================================================================

/// Why a fix request was turned down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixRefusal {
    /// Missing wallet labels or transaction hashes; the file must be re-uploaded
    BlockingErrors { rows: usize },
    NothingToFix,
    NotConfirmed,
}

impl std::fmt::Display for FixRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixRefusal::BlockingErrors { rows } => write!(
                f,
                "{} row(s) have blocking errors; correct them locally and re-upload the file",
                rows
            ),
            FixRefusal::NothingToFix => write!(f, "no warnings to fix"),
            FixRefusal::NotConfirmed => write!(f, "fix was not confirmed"),
        }
    }
}

impl std::error::Error for FixRefusal {}

// ============================================================================
// FIX OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    /// Hashes the fix was asked to repair, first-seen order
    pub flagged_hashes: Vec<String>,
    pub reconciliation: ReconciliationReport,
    pub aggregation: Aggregation,
}

impl FixOutcome {
    pub fn summary_rows(&self) -> &[SummaryRow] {
        &self.aggregation.summary.rows
    }

    pub fn write_summary_csv<W: Write>(&self, writer: W) -> Result<()> {
        self.aggregation.summary.write_csv(writer)
    }

    pub fn write_merged_csv<W: Write>(&self, column_order: &[String], writer: W) -> Result<()> {
        write_ledger_csv(&self.aggregation.merged.rows, column_order, writer)
    }
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// SHA-256 of the uploaded bytes, hex
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub ledger: Ledger,
    pub report: QualityReport,
    pub outcome: Option<FixOutcome>,
}

pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl Session {
    /// Load and check an upload
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Session> {
        let fingerprint = fingerprint(&bytes);
        let ledger = load_ledger_bytes(name, bytes)?;
        let session = Session::from_ledger(ledger, fingerprint);
        info!(
            session = %session.id,
            fingerprint = %session.fingerprint,
            "{}",
            session.report.summary()
        );
        Ok(session)
    }

    pub fn from_path(path: &Path) -> Result<Session> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.xlsx");
        Session::from_bytes(name, bytes)
    }

    pub fn from_ledger(ledger: Ledger, fingerprint: String) -> Session {
        let outcomes = DataQualityEngine::new().run(&ledger);
        let report = QualityReport::build(&ledger, &outcomes);
        Session {
            id: Uuid::new_v4(),
            fingerprint,
            created_at: Utc::now(),
            ledger,
            report,
            outcome: None,
        }
    }

    /// Gate in front of the fix; blocking errors win even when confirmed
    pub fn fix_gate(&self, confirm: bool) -> Result<(), FixRefusal> {
        gate(&self.report, confirm)
    }

    /// Reconcile flagged rows against the index and rebuild the summary
    pub fn fix(
        &self,
        confirm: bool,
        index: &dyn LedgerIndex,
        chain: &ChainConfig,
    ) -> Result<FixOutcome> {
        run_fix(&self.ledger, &self.report, confirm, index, chain)
    }

    pub fn with_outcome(mut self, outcome: FixOutcome) -> Session {
        self.outcome = Some(outcome);
        self
    }
}

fn gate(report: &QualityReport, confirm: bool) -> Result<(), FixRefusal> {
    if report.errors_found {
        let mut rows: Vec<usize> = report.issues.blocking.iter().map(|f| f.row_index).collect();
        rows.sort_unstable();
        rows.dedup();
        return Err(FixRefusal::BlockingErrors { rows: rows.len() });
    }
    if !report.warnings_found {
        return Err(FixRefusal::NothingToFix);
    }
    if !confirm {
        return Err(FixRefusal::NotConfirmed);
    }
    Ok(())
}

/// Fix stage on plain values, usable off the session (e.g. on a worker thread)
pub fn run_fix(
    ledger: &Ledger,
    report: &QualityReport,
    confirm: bool,
    index: &dyn LedgerIndex,
    chain: &ChainConfig,
) -> Result<FixOutcome> {
    gate(report, confirm)?;

    let flagged_hashes = report.issues.advisory_hashes();
    info!(hashes = flagged_hashes.len(), source = %ledger.source, "fixing flagged transactions");

    let reconciliation =
        ReconciliationEngine::new(chain.clone()).reconcile(ledger, &flagged_hashes, index)?;
    let aggregation = aggregate(&ledger.rows, &flagged_hashes, reconciliation.ledger_rows());

    Ok(FixOutcome {
        flagged_hashes,
        reconciliation,
        aggregation,
    })
}

// ============================================================================
// SESSION STORE
// ============================================================================

pub const DEFAULT_SESSION_CAPACITY: usize = 64;

/// In-memory sessions, bounded. Oldest uploads are evicted first and a
/// re-upload of the same bytes replaces the earlier session.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<Uuid, Session>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Store a session, returning the ids it pushed out
    pub fn insert(&mut self, session: Session) -> Vec<Uuid> {
        let mut evicted: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| s.fingerprint == session.fingerprint)
            .map(|s| s.id)
            .collect();
        for id in &evicted {
            self.remove(id);
        }

        while self.sessions.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.sessions.remove(&oldest);
            evicted.push(oldest);
        }

        self.order.push_back(session.id);
        self.sessions.insert(session.id, session);
        evicted
    }

    pub fn get(&self, id: &Uuid) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Session> {
        self.order.retain(|o| o != id);
        self.sessions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_quality::CheckKind;
    use crate::ledger::{Column, LedgerRow};
    use crate::onchain::{EventKind, OnChainEvent};
    use crate::query::EventQuery;

    const HEADER: &str = "Belongs To,Belongs To Address,Transaction Hash,Asset Address,Balance Impact (T),Original Currency Symbol,Direction,Event Label";

    fn wallet() -> String {
        format!("0x{}", "a".repeat(40))
    }

    fn hash(c: char) -> String {
        format!("0x{}", c.to_string().repeat(64))
    }

    struct FakeIndex {
        events: Vec<OnChainEvent>,
    }

    impl LedgerIndex for FakeIndex {
        fn fetch_events(&self, _query: &EventQuery) -> Result<Vec<OnChainEvent>> {
            Ok(self.events.clone())
        }
    }

    struct FailingIndex;

    impl LedgerIndex for FailingIndex {
        fn fetch_events(&self, _query: &EventQuery) -> Result<Vec<OnChainEvent>> {
            Err(anyhow::anyhow!("query run FAILED"))
        }
    }

    fn csv_session(lines: &[String]) -> Session {
        let csv = format!("{}\n{}\n", HEADER, lines.join("\n"));
        Session::from_bytes("ledger.csv", csv.into_bytes()).unwrap()
    }

    fn line(wallet: &str, hash: &str, asset: &str, amount: &str, direction: &str, label: &str) -> String {
        format!("{},0xaddr,{},{},{},AVAX,{},{}", wallet, hash, asset, amount, direction, label)
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_null_hash_refuses_fix_even_when_confirmed() {
        let session = csv_session(&[
            line(&wallet(), "", "native", "1", "inflow", "Recieve Coins"),
            line(&wallet(), &hash('b'), "0x12", "1", "inflow", "Recieve Coins"),
        ]);

        assert_eq!(
            session.fix_gate(true),
            Err(FixRefusal::BlockingErrors { rows: 1 })
        );
        let err = session
            .fix(true, &FakeIndex { events: vec![] }, &ChainConfig::default())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<FixRefusal>(),
            Some(&FixRefusal::BlockingErrors { rows: 1 })
        );
    }

    #[test]
    fn test_clean_ledger_has_nothing_to_fix() {
        let session = csv_session(&[line(&wallet(), &hash('b'), "native", "1", "inflow", "x")]);
        assert_eq!(session.fix_gate(true), Err(FixRefusal::NothingToFix));
    }

    #[test]
    fn test_fix_needs_confirmation() {
        let short = format!("0x{}", "a".repeat(38));
        let session = csv_session(&[line(&short, &hash('b'), "native", "1", "inflow", "x")]);

        assert!(session.report.fix_available());
        assert_eq!(session.fix_gate(false), Err(FixRefusal::NotConfirmed));
        assert_eq!(session.fix_gate(true), Ok(()));
    }

    #[test]
    fn test_fix_replaces_truncated_hash() {
        let truncated = "0xcccccccccccccccc";
        let full = hash('c');
        let session = csv_session(&[
            line(&wallet(), truncated, "native", "-1", "outflow", "Send Coins"),
            line(&wallet(), &hash('d'), "native", "10", "inflow", "Recieve Coins"),
        ]);
        assert!(session.report.fix_available());

        let index = FakeIndex {
            events: vec![
                OnChainEvent {
                    block_timestamp: "2025-05-01 10:00:00.000".to_string(),
                    block_number: Some(7),
                    tx_hash: full.clone(),
                    from_address: wallet().to_uppercase().replace("0X", "0x"),
                    to_address: "0x9999999999999999999999999999999999999999".to_string(),
                    contract_address: "native".to_string(),
                    name: Some("native".to_string()),
                    symbol: Some("AVAX".to_string()),
                    amount: 1.5,
                    event: EventKind::NativeTransfer,
                },
                OnChainEvent {
                    block_timestamp: "2025-05-01 10:00:00.000".to_string(),
                    block_number: Some(7),
                    tx_hash: full.clone(),
                    from_address: wallet(),
                    to_address: "native".to_string(),
                    contract_address: "native".to_string(),
                    name: Some("native".to_string()),
                    symbol: Some("AVAX".to_string()),
                    amount: 0.01,
                    event: EventKind::FeePayment,
                },
            ],
        };

        let outcome = session.fix(true, &index, &ChainConfig::default()).unwrap();

        assert_eq!(outcome.flagged_hashes, vec![truncated.to_string()]);
        assert_eq!(outcome.reconciliation.replacements.len(), 2);
        let merged: Vec<&LedgerRow> = outcome.aggregation.merged.rows.iter().collect();
        assert_eq!(merged.len(), 3);
        assert!(merged
            .iter()
            .all(|r| r.transaction_hash.as_deref() != Some(truncated)));

        let summary = outcome.summary_rows();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].inflow, 10.0);
        assert_eq!(summary[0].outflow, 1.5);
        assert_eq!(summary[0].fees, 0.01);
        assert_eq!(summary[0].currency_symbol.as_deref(), Some("AVAX"));

        let mut out = Vec::new();
        outcome.write_summary_csv(&mut out).unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .starts_with("Belongs To,Asset Address,Original Currency Symbol,inflow,outflow,fees,Total (T)\n"));
    }

    #[test]
    fn test_index_failure_leaves_report_intact() {
        let short = format!("0x{}", "a".repeat(38));
        let session = csv_session(&[line(&short, &hash('b'), "native", "1", "inflow", "x")]);

        assert!(session.fix(true, &FailingIndex, &ChainConfig::default()).is_err());
        assert!(session.outcome.is_none());
        assert!(session.report.fix_available());
    }

    #[test]
    fn test_unparseable_balance_is_reported_not_fatal() {
        let session = csv_session(&[
            line(&wallet(), &hash('b'), "native", "N/A", "inflow", "Recieve Coins"),
            line(&wallet(), &hash('c'), "native", "1", "inflow", "Recieve Coins"),
        ]);

        assert!(session.report.warnings_found);
        assert!(!session.report.errors_found);
        let block = session
            .report
            .blocks
            .iter()
            .find(|b| b.column == Column::BalanceImpact && b.kind == CheckKind::Missing)
            .unwrap();
        assert!(!block.passed);
        assert_eq!(block.rows.len(), 1);
        assert_eq!(block.rows[0].transaction_hash.as_deref(), Some(hash('b').as_str()));
        assert_eq!(session.report.issues.advisory_hashes(), vec![hash('b')]);
    }

    #[test]
    fn test_store_replaces_same_upload() {
        let csv = format!("{}\n{}\n", HEADER, line(&wallet(), &hash('b'), "native", "1", "inflow", "x"));
        let first = Session::from_bytes("ledger.csv", csv.clone().into_bytes()).unwrap();
        let second = Session::from_bytes("ledger.csv", csv.into_bytes()).unwrap();
        let (first_id, second_id) = (first.id, second.id);

        let mut store = SessionStore::new(4);
        assert!(store.insert(first).is_empty());
        assert_eq!(store.insert(second), vec![first_id]);

        assert_eq!(store.len(), 1);
        assert!(store.get(&first_id).is_none());
        assert!(store.get(&second_id).is_some());
    }

    #[test]
    fn test_store_evicts_oldest_at_capacity() {
        let sessions: Vec<Session> = ['b', 'c', 'd']
            .iter()
            .map(|c| csv_session(&[line(&wallet(), &hash(*c), "native", "1", "inflow", "x")]))
            .collect();
        let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();

        let mut store = SessionStore::new(2);
        let evicted: Vec<Uuid> = sessions.into_iter().flat_map(|s| store.insert(s)).collect();

        assert_eq!(evicted, vec![ids[0]]);
        assert_eq!(store.len(), 2);
        assert!(store.get(&ids[0]).is_none());
        assert!(store.get(&ids[1]).is_some());
        assert!(store.get_mut(&ids[2]).is_some());
    }
}
