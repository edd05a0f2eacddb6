// ✅ Data Quality Engine - column-level null/length checks
//
// Every check is a pure predicate over one column of the ledger. The engine
// runs the fixed check plan and hands each outcome to the reporter.

use crate::ledger::{Column, Ledger, LedgerRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Blocks the fix flow until the file is corrected
    Warning,  // Surfaced, may be repaired from on-chain data
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckKind {
    Missing,
    Corrupted,
}

impl CheckKind {
    pub fn name(&self) -> &str {
        match self {
            CheckKind::Missing => "Missing",
            CheckKind::Corrupted => "Corrupted",
        }
    }
}

// ============================================================================
// VALIDATORS
// ============================================================================

/// Indices of rows whose `column` is empty
pub fn null_check(rows: &[LedgerRow], column: Column) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| row.is_missing(column))
        .map(|(i, _)| i)
        .collect()
}

/// Indices of rows whose non-empty `column` has a trimmed length outside
/// `allowed`. Empty cells belong to `null_check`.
pub fn length_check(rows: &[LedgerRow], column: Column, allowed: &BTreeSet<usize>) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| match row.text(column) {
            Some(value) => !allowed.contains(&value.trim().chars().count()),
            None => false,
        })
        .map(|(i, _)| i)
        .collect()
}

// ============================================================================
// CHECK PLAN
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub column: Column,
    pub kind: CheckKind,
    pub severity: Severity,
    /// Only set for `CheckKind::Corrupted`
    pub allowed_lengths: Option<BTreeSet<usize>>,
}

impl QualityCheck {
    pub fn missing(column: Column, severity: Severity) -> Self {
        QualityCheck {
            column,
            kind: CheckKind::Missing,
            severity,
            allowed_lengths: None,
        }
    }

    pub fn corrupted(column: Column, allowed: &[usize]) -> Self {
        QualityCheck {
            column,
            kind: CheckKind::Corrupted,
            severity: Severity::Warning,
            allowed_lengths: Some(allowed.iter().copied().collect()),
        }
    }

    pub fn run(&self, rows: &[LedgerRow]) -> Vec<usize> {
        match &self.allowed_lengths {
            Some(allowed) => length_check(rows, self.column, allowed),
            None => null_check(rows, self.column),
        }
    }
}

/// Result of one check: the flagged row indices, empty when it passed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: QualityCheck,
    pub flagged: Vec<usize>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.flagged.is_empty()
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    checks: Vec<QualityCheck>,
}

impl DataQualityEngine {
    /// The standard ledger check plan, in reporting order
    pub fn new() -> Self {
        DataQualityEngine {
            checks: vec![
                QualityCheck::missing(Column::BelongsTo, Severity::Critical),
                QualityCheck::corrupted(Column::BelongsTo, &[42]),
                QualityCheck::missing(Column::TransactionHash, Severity::Critical),
                QualityCheck::corrupted(Column::TransactionHash, &[66]),
                QualityCheck::missing(Column::AssetAddress, Severity::Warning),
                QualityCheck::corrupted(Column::AssetAddress, &[0, 6, 42]),
                QualityCheck::missing(Column::BalanceImpact, Severity::Warning),
            ],
        }
    }

    pub fn with_checks(checks: Vec<QualityCheck>) -> Self {
        DataQualityEngine { checks }
    }

    pub fn checks(&self) -> &[QualityCheck] {
        &self.checks
    }

    pub fn run(&self, ledger: &Ledger) -> Vec<CheckOutcome> {
        self.checks
            .iter()
            .map(|check| CheckOutcome {
                check: check.clone(),
                flagged: check.run(&ledger.rows),
            })
            .collect()
    }
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_row(belongs_to: Option<&str>, hash: Option<&str>) -> LedgerRow {
        LedgerRow {
            belongs_to: belongs_to.map(|s| s.to_string()),
            transaction_hash: hash.map(|s| s.to_string()),
            asset_address: Some("native".to_string()),
            balance_impact: Some(1.0),
            ..LedgerRow::default()
        }
    }

    fn address(len: usize) -> String {
        format!("0x{}", "a".repeat(len - 2))
    }

    #[test]
    fn test_null_check_returns_only_missing_rows() {
        let rows = vec![
            create_test_row(Some("w1"), Some("h1")),
            create_test_row(None, Some("h2")),
            create_test_row(Some("w3"), None),
            create_test_row(None, None),
        ];

        assert_eq!(null_check(&rows, Column::BelongsTo), vec![1, 3]);
        assert_eq!(null_check(&rows, Column::TransactionHash), vec![2, 3]);
    }

    #[test]
    fn test_length_check_ignores_null_rows() {
        let rows = vec![
            create_test_row(Some(&address(42)), Some("h")),
            create_test_row(Some(&address(40)), Some("h")),
            create_test_row(None, Some("h")),
        ];
        let allowed: BTreeSet<usize> = [42].into_iter().collect();

        assert_eq!(length_check(&rows, Column::BelongsTo, &allowed), vec![1]);
    }

    #[test]
    fn test_length_check_trims_whitespace() {
        let padded = format!("  {}\t", address(42));
        let rows = vec![create_test_row(Some(&padded), Some("h"))];
        let allowed: BTreeSet<usize> = [42].into_iter().collect();

        assert!(length_check(&rows, Column::BelongsTo, &allowed).is_empty());
    }

    #[test]
    fn test_asset_address_allows_zero_six_and_forty_two() {
        let long = address(42);
        let mut rows = Vec::new();
        for asset in ["   ", "native", long.as_str(), "0x1234"] {
            let mut row = create_test_row(Some("w"), Some("h"));
            row.asset_address = Some(asset.to_string());
            rows.push(row);
        }
        let allowed: BTreeSet<usize> = [0, 6, 42].into_iter().collect();

        // "0x1234" is six characters, all four pass
        assert!(length_check(&rows, Column::AssetAddress, &allowed).is_empty());

        rows[3].asset_address = Some("0x12345".to_string());
        assert_eq!(length_check(&rows, Column::AssetAddress, &allowed), vec![3]);
    }

    #[test]
    fn test_balance_impact_null_check() {
        let mut rows = vec![create_test_row(Some("w"), Some("h"))];
        rows[0].balance_impact = None;

        assert_eq!(null_check(&rows, Column::BalanceImpact), vec![0]);
    }

    #[test]
    fn test_engine_plan_order_and_severity() {
        let engine = DataQualityEngine::new();
        let checks = engine.checks();

        assert_eq!(checks.len(), 7);
        assert_eq!(checks[0].column, Column::BelongsTo);
        assert_eq!(checks[0].severity, Severity::Critical);
        assert_eq!(checks[2].column, Column::TransactionHash);
        assert_eq!(checks[2].severity, Severity::Critical);
        assert!(checks
            .iter()
            .filter(|c| c.kind == CheckKind::Corrupted)
            .all(|c| c.severity == Severity::Warning));
        assert_eq!(checks[6].column, Column::BalanceImpact);
        assert_eq!(checks[6].kind, CheckKind::Missing);
    }

    #[test]
    fn test_engine_run_flags_rows() {
        let ledger = Ledger {
            rows: vec![
                create_test_row(Some(&address(42)), Some(&address(66))),
                create_test_row(Some(&address(40)), Some(&address(66))),
            ],
            ..Ledger::default()
        };

        let outcomes = DataQualityEngine::new().run(&ledger);

        let failed: Vec<&CheckOutcome> = outcomes.iter().filter(|o| !o.passed()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].check.column, Column::BelongsTo);
        assert_eq!(failed[0].check.kind, CheckKind::Corrupted);
        assert_eq!(failed[0].flagged, vec![1]);
    }
}
