// 📊 Aggregation - merge replacement rows, dedupe, pivot per wallet & asset
//
//   original rows − flagged hashes
//     + replacement rows
//     → dedupe (keep last)
//     → pivot (Belongs To, Asset Address) × Direction, sum of Balance Impact
//     → Total (T) = inflow − outflow − fees

use crate::deduplication::{DedupResult, DeduplicationEngine};
use crate::ledger::{Column, LedgerRow};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Write;
use tracing::info;

/// File name offered for the summary download
pub const SUMMARY_FILE_NAME: &str = "processed_transactions.csv";

pub const INFLOW: &str = "inflow";
pub const OUTFLOW: &str = "outflow";
pub const FEES: &str = "fees";
pub const TOTAL_HEADER: &str = "Total (T)";

// ============================================================================
// MERGE
// ============================================================================

/// Drop original rows whose hash was flagged, then append the replacements
pub fn merge_rows(
    original: &[LedgerRow],
    flagged_hashes: &[String],
    replacements: Vec<LedgerRow>,
) -> Vec<LedgerRow> {
    let flagged: HashSet<&str> = flagged_hashes.iter().map(|h| h.as_str()).collect();

    let mut merged: Vec<LedgerRow> = original
        .iter()
        .filter(|row| {
            !row.transaction_hash
                .as_deref()
                .is_some_and(|h| flagged.contains(h))
        })
        .cloned()
        .collect();
    merged.extend(replacements);
    merged
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub belongs_to: String,
    pub asset_address: String,
    pub currency_symbol: Option<String>,
    pub inflow: f64,
    pub outflow: f64,
    pub fees: f64,
    pub total: f64,
    /// Sums for any other direction value, unsigned
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub rows: Vec<SummaryRow>,
    /// Direction columns beyond inflow/outflow/fees, sorted
    pub extra_columns: Vec<String>,
}

impl Summary {
    pub fn header(&self) -> Vec<&str> {
        let mut header = vec![
            Column::BelongsTo.header(),
            Column::AssetAddress.header(),
            Column::CurrencySymbol.header(),
            INFLOW,
            OUTFLOW,
            FEES,
            TOTAL_HEADER,
        ];
        header.extend(self.extra_columns.iter().map(|c| c.as_str()));
        header
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.header())?;

        for row in &self.rows {
            let mut record = vec![
                row.belongs_to.clone(),
                row.asset_address.clone(),
                row.currency_symbol.clone().unwrap_or_default(),
                render_amount(row.inflow),
                render_amount(row.outflow),
                render_amount(row.fees),
                render_amount(row.total),
            ];
            record.extend(
                self.extra_columns
                    .iter()
                    .map(|c| row.extra.get(c).copied().map(render_amount).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }

        wtr.flush().context("Failed to flush summary CSV")?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_csv(&mut out)?;
        Ok(out)
    }
}

/// Amounts always carry a decimal point (`2.0`, not `2`)
fn render_amount(value: f64) -> String {
    format!("{:?}", value)
}

/// First non-empty symbol per asset address, in sheet order
fn symbol_lookup(original: &[LedgerRow]) -> HashMap<&str, &str> {
    let mut symbols = HashMap::new();
    for row in original {
        if let (Some(asset), Some(symbol)) = (&row.asset_address, &row.currency_symbol) {
            symbols.entry(asset.as_str()).or_insert(symbol.as_str());
        }
    }
    symbols
}

/// Pivot merged rows; symbols come from the original sheet
pub fn build_summary(merged: &[LedgerRow], original: &[LedgerRow]) -> Summary {
    let mut groups: BTreeMap<(String, String), BTreeMap<String, f64>> = BTreeMap::new();

    for row in merged {
        let (Some(wallet), Some(asset), Some(direction)) =
            (&row.belongs_to, &row.asset_address, &row.direction)
        else {
            continue;
        };
        let buckets = groups.entry((wallet.clone(), asset.clone())).or_default();
        let sum = buckets.entry(direction.clone()).or_insert(0.0);
        if let Some(amount) = row.balance_impact {
            *sum += amount;
        }
    }

    let symbols = symbol_lookup(original);
    let mut extra_columns = BTreeSet::new();

    let rows = groups
        .into_iter()
        .map(|((belongs_to, asset_address), mut buckets)| {
            let inflow = buckets.remove(INFLOW).unwrap_or(0.0).abs();
            let outflow = buckets.remove(OUTFLOW).unwrap_or(0.0).abs();
            let fees = buckets.remove(FEES).unwrap_or(0.0).abs();
            extra_columns.extend(buckets.keys().cloned());

            SummaryRow {
                currency_symbol: symbols.get(asset_address.as_str()).map(|s| s.to_string()),
                belongs_to,
                asset_address,
                inflow,
                outflow,
                fees,
                total: inflow - outflow - fees,
                extra: buckets,
            }
        })
        .collect();

    Summary {
        rows,
        extra_columns: extra_columns.into_iter().collect(),
    }
}

// ============================================================================
// FULL AGGREGATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    pub merged: DedupResult,
    pub summary: Summary,
}

pub fn aggregate(
    original: &[LedgerRow],
    flagged_hashes: &[String],
    replacements: Vec<LedgerRow>,
) -> Aggregation {
    let replaced = replacements.len();
    let merged = merge_rows(original, flagged_hashes, replacements);
    let merged = DeduplicationEngine::new().deduplicate(merged);
    let summary = build_summary(&merged.rows, original);

    info!(
        replaced,
        merged = merged.rows.len(),
        duplicates = merged.duplicates.len(),
        summary_rows = summary.rows.len(),
        "ledger aggregated"
    );

    Aggregation { merged, summary }
}

// ============================================================================
// TESTS
// ============================================================================
