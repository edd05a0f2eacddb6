// 📋 Quality Report - pass/fail blocks + blocking/advisory issue sets
//
// Built once per upload from the check outcomes. Blocking issues (missing
// wallet label or transaction hash) disable the fix flow; advisory issues
// feed the reconciler.

use crate::data_quality::{CheckKind, CheckOutcome, Severity};
use crate::ledger::{Column, Ledger, LedgerRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;

// ============================================================================
// ISSUE SET
// ============================================================================

/// One row flagged by one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedRow {
    pub row_index: usize,
    pub line_number: Option<usize>,
    pub transaction_hash: Option<String>,
    pub column: Column,
    pub kind: CheckKind,
}

/// Blocking and advisory issues. A row sits in at most one of the two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueSet {
    pub blocking: Vec<FlaggedRow>,
    pub advisory: Vec<FlaggedRow>,
}

impl IssueSet {
    pub fn record(&mut self, severity: Severity, flagged: FlaggedRow) {
        match severity {
            Severity::Critical => {
                let index = flagged.row_index;
                self.advisory.retain(|f| f.row_index != index);
                self.blocking.push(flagged);
            }
            Severity::Warning => {
                if !self.blocking.iter().any(|f| f.row_index == flagged.row_index) {
                    self.advisory.push(flagged);
                }
            }
        }
    }

    pub fn has_blocking(&self) -> bool {
        !self.blocking.is_empty()
    }

    pub fn has_advisory(&self) -> bool {
        !self.advisory.is_empty()
    }

    /// Advisory transaction hashes, first-seen order, without repeats
    pub fn advisory_hashes(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.advisory
            .iter()
            .filter_map(|f| f.transaction_hash.clone())
            .filter(|h| seen.insert(h.clone()))
            .collect()
    }

    pub fn advisory_rows(&self) -> BTreeSet<usize> {
        self.advisory.iter().map(|f| f.row_index).collect()
    }
}

// ============================================================================
// REPORT BLOCKS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBlock {
    pub column: Column,
    pub kind: CheckKind,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
    /// Offending rows, empty when the check passed
    pub rows: Vec<LedgerRow>,
}

impl ReportBlock {
    fn from_outcome(outcome: &CheckOutcome, ledger: &Ledger) -> Self {
        let check = &outcome.check;
        let label = check.column.header();

        let message = if outcome.passed() {
            format!("✅ No {} records in {}", check.kind.name(), label)
        } else {
            match (check.severity, check.kind) {
                (Severity::Critical, _) => format!("❌ Null value found in {}", label),
                (Severity::Warning, CheckKind::Missing) => {
                    format!("⚠️  Missing value found in {}", label)
                }
                (Severity::Warning, CheckKind::Corrupted) => {
                    format!("⚠️  Corrupted value found in {}", label)
                }
            }
        };

        ReportBlock {
            column: check.column,
            kind: check.kind,
            severity: check.severity,
            passed: outcome.passed(),
            message,
            rows: outcome
                .flagged
                .iter()
                .filter_map(|i| ledger.rows.get(*i).cloned())
                .collect(),
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub source: String,
    pub row_count: usize,
    pub blocks: Vec<ReportBlock>,
    pub issues: IssueSet,
    pub errors_found: bool,
    pub warnings_found: bool,
}

impl QualityReport {
    pub fn build(ledger: &Ledger, outcomes: &[CheckOutcome]) -> Self {
        let mut issues = IssueSet::default();
        let mut errors_found = false;
        let mut warnings_found = false;

        for outcome in outcomes {
            if outcome.passed() {
                continue;
            }
            match outcome.check.severity {
                Severity::Critical => errors_found = true,
                Severity::Warning => warnings_found = true,
            }
            for &index in &outcome.flagged {
                let row = &ledger.rows[index];
                issues.record(
                    outcome.check.severity,
                    FlaggedRow {
                        row_index: index,
                        line_number: row.line_number,
                        transaction_hash: row.transaction_hash.clone(),
                        column: outcome.check.column,
                        kind: outcome.check.kind,
                    },
                );
            }
        }

        QualityReport {
            source: ledger.source.clone(),
            row_count: ledger.len(),
            blocks: outcomes
                .iter()
                .map(|o| ReportBlock::from_outcome(o, ledger))
                .collect(),
            issues,
            errors_found,
            warnings_found,
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.errors_found && !self.warnings_found
    }

    /// Fix is offered only with warnings and no blocking errors
    pub fn fix_available(&self) -> bool {
        !self.errors_found && self.warnings_found
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} rows, {} blocking issue(s), {} advisory issue(s), {} transaction(s) to fix",
            self.source,
            self.row_count,
            self.issues.blocking.len(),
            self.issues.advisory.len(),
            self.issues.advisory_hashes().len()
        )
    }

    /// Closing verdict shown under the blocks
    pub fn verdict(&self) -> String {
        if self.is_clean() {
            "🎉 No errors or warnings detected!".to_string()
        } else if self.errors_found {
            "❌ Errors detected. Please correct them locally and re-upload the file.".to_string()
        } else {
            format!(
                "⚠️  {} transaction(s) can be repaired from on-chain data.",
                self.issues.advisory_hashes().len()
            )
        }
    }

    /// Plain-text rendering for the terminal
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        for block in &self.blocks {
            let _ = writeln!(out, "{}", block.message);
            if block.passed {
                continue;
            }
            let _ = writeln!(
                out,
                "    {:<6} {:<44} {:<68} {:<44} {:>14}",
                "Line", "Belongs To", "Transaction Hash", "Asset Address", "Balance (T)"
            );
            for row in &block.rows {
                let _ = writeln!(
                    out,
                    "    {:<6} {:<44} {:<68} {:<44} {:>14}",
                    row.line_number.map(|n| n.to_string()).unwrap_or_default(),
                    display_cell(row, Column::BelongsTo, 44),
                    display_cell(row, Column::TransactionHash, 68),
                    display_cell(row, Column::AssetAddress, 44),
                    display_cell(row, Column::BalanceImpact, 14),
                );
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", self.verdict());
        out
    }
}

fn display_cell(row: &LedgerRow, column: Column, max_len: usize) -> String {
    match row.text(column) {
        Some(value) => truncate(&value, max_len),
        None => "<empty>".to_string(),
    }
}

pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_quality::DataQualityEngine;

    fn wallet() -> String {
        format!("0x{}", "a".repeat(40))
    }

    fn tx_hash(n: u8) -> String {
        format!("0x{}", format!("{:x}", n % 16).repeat(64))
    }

    fn create_test_row(belongs_to: Option<String>, hash: Option<String>) -> LedgerRow {
        LedgerRow {
            line_number: Some(2),
            belongs_to,
            belongs_to_address: Some(wallet()),
            transaction_hash: hash,
            asset_address: Some("native".to_string()),
            balance_impact: Some(5.0),
            currency_symbol: Some("AVAX".to_string()),
            direction: Some("inflow".to_string()),
            event_label: Some("Recieve Coins".to_string()),
            ..LedgerRow::default()
        }
    }

    fn report_for(rows: Vec<LedgerRow>) -> QualityReport {
        let ledger = Ledger {
            source: "test.csv".to_string(),
            rows,
            ..Ledger::default()
        };
        let outcomes = DataQualityEngine::new().run(&ledger);
        QualityReport::build(&ledger, &outcomes)
    }

    #[test]
    fn test_clean_ledger() {
        let report = report_for(vec![create_test_row(Some(wallet()), Some(tx_hash(1)))]);

        assert!(report.is_clean());
        assert!(!report.fix_available());
        assert!(report.blocks.iter().all(|b| b.passed));
        assert!(report.verdict().contains("No errors or warnings"));
    }

    #[test]
    fn test_short_wallet_label_is_a_warning() {
        let short = format!("0x{}", "a".repeat(38));
        let report = report_for(vec![create_test_row(Some(short.clone()), Some(tx_hash(1)))]);

        assert!(report.warnings_found);
        assert!(!report.errors_found);
        assert!(report.fix_available());

        let block = report
            .blocks
            .iter()
            .find(|b| !b.passed)
            .unwrap();
        assert_eq!(block.column, Column::BelongsTo);
        assert_eq!(block.kind, CheckKind::Corrupted);
        assert_eq!(block.rows.len(), 1);
        assert_eq!(block.rows[0].belongs_to.as_deref(), Some(short.as_str()));
        assert_eq!(report.issues.advisory_hashes(), vec![tx_hash(1)]);
    }

    #[test]
    fn test_null_hash_blocks_fix() {
        let mut short_asset = create_test_row(Some(wallet()), Some(tx_hash(2)));
        short_asset.asset_address = Some("0x12".to_string());
        let report = report_for(vec![
            create_test_row(Some(wallet()), None),
            short_asset,
        ]);

        assert!(report.errors_found);
        assert!(report.warnings_found);
        assert!(!report.fix_available());
        assert!(report.issues.has_blocking());
        assert!(report.verdict().contains("re-upload"));
        assert!(report.render_text().contains("❌ Null value found in Transaction Hash"));
    }

    #[test]
    fn test_issue_sets_stay_disjoint() {
        let mut issues = IssueSet::default();
        let flagged = |kind| FlaggedRow {
            row_index: 0,
            line_number: Some(2),
            transaction_hash: None,
            column: Column::AssetAddress,
            kind,
        };

        issues.record(Severity::Warning, flagged(CheckKind::Missing));
        issues.record(Severity::Critical, flagged(CheckKind::Missing));
        issues.record(Severity::Warning, flagged(CheckKind::Corrupted));

        assert_eq!(issues.blocking.len(), 1);
        assert!(issues.advisory.is_empty());
    }

    #[test]
    fn test_advisory_hashes_deduplicated_in_order() {
        let mut bad_both = create_test_row(Some("short".to_string()), Some(tx_hash(3)));
        bad_both.balance_impact = None;
        let other = create_test_row(Some("short".to_string()), Some(tx_hash(4)));

        let report = report_for(vec![bad_both, other]);

        assert_eq!(report.issues.advisory.len(), 3);
        assert_eq!(report.issues.advisory_hashes(), vec![tx_hash(3), tx_hash(4)]);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 10), "abcdef");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
