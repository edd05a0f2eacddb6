// 🔍 Deduplication Engine - one row per (wallet, hash, event label)
// Later rows win, so a synthesized row replaces the original it collides with.

use crate::ledger::LedgerRow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// ============================================================================
// DEDUP KEY
// ============================================================================

/// Identity of a ledger row. Empty cells take part in the key as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub belongs_to: Option<String>,
    pub transaction_hash: Option<String>,
    pub event_label: Option<String>,
}

impl DedupKey {
    pub fn of(row: &LedgerRow) -> Self {
        DedupKey {
            belongs_to: row.belongs_to.clone(),
            transaction_hash: row.transaction_hash.clone(),
            event_label: row.event_label.clone(),
        }
    }
}

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    /// Index of the row that was dropped
    pub dropped_index: usize,

    /// Index of the later row that survives
    pub kept_index: usize,

    pub key: DedupKey,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupResult {
    pub rows: Vec<LedgerRow>,
    pub duplicates: Vec<DuplicateMatch>,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

#[derive(Default)]
pub struct DeduplicationEngine;

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine
    }

    /// Every row shadowed by a later row with the same key
    pub fn find_duplicates(&self, rows: &[LedgerRow]) -> Vec<DuplicateMatch> {
        let mut last_seen: HashMap<DedupKey, usize> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            last_seen.insert(DedupKey::of(row), i);
        }

        rows.iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let key = DedupKey::of(row);
                let kept_index = last_seen[&key];
                (kept_index != i).then(|| DuplicateMatch {
                    dropped_index: i,
                    kept_index,
                    key,
                })
            })
            .collect()
    }

    /// Keep the last occurrence of each key; survivors keep their relative order
    pub fn deduplicate(&self, rows: Vec<LedgerRow>) -> DedupResult {
        let duplicates = self.find_duplicates(&rows);
        let mut dropped = vec![false; rows.len()];
        for m in &duplicates {
            dropped[m.dropped_index] = true;
            debug!(
                dropped = m.dropped_index,
                kept = m.kept_index,
                hash = m.key.transaction_hash.as_deref().unwrap_or(""),
                "duplicate ledger row"
            );
        }

        let rows = rows
            .into_iter()
            .zip(dropped)
            .filter_map(|(row, drop)| (!drop).then_some(row))
            .collect();

        DedupResult { rows, duplicates }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_row(wallet: &str, hash: &str, label: &str, amount: f64) -> LedgerRow {
        LedgerRow {
            belongs_to: Some(wallet.to_string()),
            transaction_hash: Some(hash.to_string()),
            event_label: Some(label.to_string()),
            balance_impact: Some(amount),
            ..LedgerRow::default()
        }
    }

    #[test]
    fn test_synthesized_row_replaces_original() {
        let engine = DeduplicationEngine::new();

        let original = create_test_row("W1", "H1", "Send Coins", -1.0);
        let mut synthesized = create_test_row("W1", "H1", "Send Coins", -1.25);
        synthesized.currency_symbol = Some("AVAX".to_string());

        let result = engine.deduplicate(vec![original, synthesized.clone()]);

        assert_eq!(result.rows, vec![synthesized]);
        assert_eq!(result.duplicates.len(), 1);
        assert_eq!(result.duplicates[0].dropped_index, 0);
        assert_eq!(result.duplicates[0].kept_index, 1);
    }

    #[test]
    fn test_different_labels_are_kept() {
        let engine = DeduplicationEngine::new();

        let rows = vec![
            create_test_row("W1", "H1", "Send Coins", -1.0),
            create_test_row("W1", "H1", "Pay Fees", -0.01),
        ];

        assert!(engine.find_duplicates(&rows).is_empty());
        assert_eq!(engine.deduplicate(rows).rows.len(), 2);
    }

    #[test]
    fn test_empty_cells_count_as_equal() {
        let engine = DeduplicationEngine::new();

        let mut a = create_test_row("W1", "H1", "x", 1.0);
        a.event_label = None;
        let mut b = create_test_row("W1", "H1", "x", 2.0);
        b.event_label = None;

        let result = engine.deduplicate(vec![a, b]);

        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].balance_impact, Some(2.0));
    }

    #[test]
    fn test_survivors_keep_order() {
        let engine = DeduplicationEngine::new();

        let rows = vec![
            create_test_row("W1", "H1", "Send Coins", 1.0),
            create_test_row("W2", "H2", "Send Coins", 2.0),
            create_test_row("W1", "H1", "Send Coins", 3.0),
            create_test_row("W3", "H3", "Send Coins", 4.0),
        ];

        let amounts: Vec<Option<f64>> = engine
            .deduplicate(rows)
            .rows
            .iter()
            .map(|r| r.balance_impact)
            .collect();

        assert_eq!(amounts, vec![Some(2.0), Some(3.0), Some(4.0)]);
    }
}
