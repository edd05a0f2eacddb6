// 🗄️ Ledger model - rows of the uploaded "Ledger" sheet
// Loads .xlsx workbooks (calamine) or a bare .csv export into typed rows.
//
// Core columns are typed, everything else rides along in `metadata` so
// descriptive columns survive the round-trip to the merged export.

use anyhow::{anyhow, Context, Result};
use calamine::{Data, Reader, Xlsx};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{debug, info, warn};

pub const LEDGER_SHEET: &str = "Ledger";
pub const BALANCE_STATEMENT_SHEET: &str = "Balance Statement";

// ============================================================================
// COLUMNS
// ============================================================================

/// Columns the pipeline reads by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    BelongsTo,
    BelongsToAddress,
    TransactionHash,
    AssetAddress,
    BalanceImpact,
    CurrencySymbol,
    Direction,
    EventLabel,
}

impl Column {
    /// Every typed column, in export order
    pub const ALL: [Column; 8] = [
        Column::BelongsTo,
        Column::BelongsToAddress,
        Column::TransactionHash,
        Column::AssetAddress,
        Column::BalanceImpact,
        Column::CurrencySymbol,
        Column::Direction,
        Column::EventLabel,
    ];

    /// Columns the Ledger sheet must carry
    pub const REQUIRED: [Column; 6] = [
        Column::BelongsTo,
        Column::BelongsToAddress,
        Column::TransactionHash,
        Column::AssetAddress,
        Column::BalanceImpact,
        Column::CurrencySymbol,
    ];

    /// Header text as it appears in the sheet
    pub fn header(&self) -> &'static str {
        match self {
            Column::BelongsTo => "Belongs To",
            Column::BelongsToAddress => "Belongs To Address",
            Column::TransactionHash => "Transaction Hash",
            Column::AssetAddress => "Asset Address",
            Column::BalanceImpact => "Balance Impact (T)",
            Column::CurrencySymbol => "Original Currency Symbol",
            Column::Direction => "Direction",
            Column::EventLabel => "Event Label",
        }
    }

    pub fn from_header(header: &str) -> Option<Column> {
        Column::ALL.iter().copied().find(|c| c.header() == header)
    }
}

// ============================================================================
// LEDGER ROW
// ============================================================================

/// One row of the Ledger sheet. `None` means the cell was empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    /// 1-based sheet line (header = line 1); `None` for synthesized rows
    pub line_number: Option<usize>,

    pub belongs_to: Option<String>,
    pub belongs_to_address: Option<String>,
    pub transaction_hash: Option<String>,
    pub asset_address: Option<String>,
    pub balance_impact: Option<f64>,
    pub currency_symbol: Option<String>,
    pub direction: Option<String>,
    pub event_label: Option<String>,

    /// Remaining columns, keyed by header
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl LedgerRow {
    pub fn is_missing(&self, column: Column) -> bool {
        self.text(column).is_none()
    }

    /// Cell value as text, `None` when the cell is empty
    pub fn text(&self, column: Column) -> Option<Cow<'_, str>> {
        let value = match column {
            Column::BelongsTo => &self.belongs_to,
            Column::BelongsToAddress => &self.belongs_to_address,
            Column::TransactionHash => &self.transaction_hash,
            Column::AssetAddress => &self.asset_address,
            Column::CurrencySymbol => &self.currency_symbol,
            Column::Direction => &self.direction,
            Column::EventLabel => &self.event_label,
            Column::BalanceImpact => {
                return self.balance_impact.map(|v| Cow::Owned(v.to_string()));
            }
        };
        value.as_deref().map(Cow::Borrowed)
    }

    fn set_text(&mut self, column: Column, value: Option<String>) {
        match column {
            Column::BelongsTo => self.belongs_to = value,
            Column::BelongsToAddress => self.belongs_to_address = value,
            Column::TransactionHash => self.transaction_hash = value,
            Column::AssetAddress => self.asset_address = value,
            Column::CurrencySymbol => self.currency_symbol = value,
            Column::Direction => self.direction = value,
            Column::EventLabel => self.event_label = value,
            Column::BalanceImpact => self.balance_impact = parse_amount(value.as_deref()),
        }
    }

    /// Wallet label lower-cased, the key on-chain addresses are matched against
    pub fn wallet_key(&self) -> Option<String> {
        self.belongs_to.as_ref().map(|s| s.to_lowercase())
    }
}

/// Spreadsheet placeholders that mean "no value"
const NA_TOKENS: [&str; 19] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null", "",
];

/// Cell text with NA placeholders mapped to `None`
fn normalize_cell(cell: Option<String>) -> Option<String> {
    cell.filter(|v| !NA_TOKENS.contains(&v.trim()))
}

/// Parse a balance cell. Anything that is not a number counts as missing
/// and is left for the null check to report.
fn parse_amount(value: Option<&str>) -> Option<f64> {
    let raw = value?;
    let cleaned = raw.trim().replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            warn!(value = raw, "balance is not a number, treated as missing");
            None
        }
    }
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    /// File name the ledger came from
    pub source: String,

    /// Header row in sheet order
    pub columns: Vec<String>,

    pub rows: Vec<LedgerRow>,
}

impl Ledger {
    /// Build a ledger from a header row and raw cell values
    pub fn from_table(
        source: &str,
        headers: Vec<String>,
        records: Vec<Vec<Option<String>>>,
    ) -> Result<Ledger> {
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();

        for required in Column::REQUIRED {
            if !headers.iter().any(|h| h == required.header()) {
                return Err(anyhow!(
                    "{}: sheet '{}' is missing required column '{}'",
                    source,
                    LEDGER_SHEET,
                    required.header()
                ));
            }
        }

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let line_number = index + 2;
            let record: Vec<Option<String>> = record.into_iter().map(normalize_cell).collect();
            if record.iter().all(|c| c.is_none()) {
                debug!(source, line = line_number, "blank row skipped");
                continue;
            }

            let mut row = LedgerRow {
                line_number: Some(line_number),
                ..LedgerRow::default()
            };

            for (header, cell) in headers.iter().zip(record.into_iter()) {
                match Column::from_header(header) {
                    Some(column) => row.set_text(column, cell),
                    None => {
                        if let Some(value) = cell {
                            row.metadata.insert(header.clone(), value);
                        }
                    }
                }
            }

            rows.push(row);
        }

        Ok(Ledger {
            source: source.to_string(),
            columns: headers,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load a ledger from disk, dispatching on the file extension
pub fn load_ledger(path: &Path) -> Result<Ledger> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.xlsx");
    load_ledger_bytes(name, bytes)
}

/// Load a ledger from uploaded bytes; `name` decides the format
pub fn load_ledger_bytes(name: &str, bytes: Vec<u8>) -> Result<Ledger> {
    let extension = Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let ledger = match extension.as_str() {
        "csv" => read_csv_ledger(name, &bytes)?,
        "xlsx" => read_xlsx_ledger(name, bytes)?,
        other => {
            return Err(anyhow!(
                "Unsupported file format: .{} (expected .xlsx or .csv)",
                other
            ))
        }
    };

    info!(source = name, rows = ledger.len(), "ledger loaded");
    Ok(ledger)
}

fn read_csv_ledger(name: &str, bytes: &[u8]) -> Result<Ledger> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header in {}", name))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let record = result
            .with_context(|| format!("Failed to parse CSV line {} in {}", line_num + 2, name))?;
        records.push(
            record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        None
                    } else {
                        Some(cell.to_string())
                    }
                })
                .collect(),
        );
    }

    Ledger::from_table(name, headers, records)
}

fn read_xlsx_ledger(name: &str, bytes: Vec<u8>) -> Result<Ledger> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| anyhow!("Failed to open workbook {}: {}", name, e))?;

    let range = workbook
        .worksheet_range(LEDGER_SHEET)
        .map_err(|e| anyhow!("{}: failed to read sheet '{}': {}", name, LEDGER_SHEET, e))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| anyhow!("{}: sheet '{}' is empty", name, LEDGER_SHEET))?
        .iter()
        .map(|cell| cell_text(cell).unwrap_or_default())
        .collect();
    let records: Vec<Vec<Option<String>>> =
        rows.map(|row| row.iter().map(cell_text).collect()).collect();

    let ledger = Ledger::from_table(name, headers, records)?;

    // The balance statement is read and discarded
    if workbook
        .sheet_names()
        .iter()
        .any(|s| s == BALANCE_STATEMENT_SHEET)
    {
        match workbook.worksheet_range(BALANCE_STATEMENT_SHEET) {
            Ok(statement) => info!(
                source = name,
                rows = statement.height(),
                "balance statement read (unused)"
            ),
            Err(e) => warn!(source = name, error = %e, "balance statement unreadable"),
        }
    } else {
        warn!(source = name, "workbook has no '{}' sheet", BALANCE_STATEMENT_SHEET);
    }

    Ok(ledger)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// EXPORT
// ============================================================================

/// Write rows as CSV: typed columns first, then metadata columns in the
/// order they appear in `column_order`, then any new ones alphabetically.
pub fn write_ledger_csv<W: Write>(
    rows: &[LedgerRow],
    column_order: &[String],
    writer: W,
) -> Result<()> {
    let mut extra: Vec<String> = column_order
        .iter()
        .filter(|h| Column::from_header(h).is_none())
        .cloned()
        .collect();
    let known: BTreeSet<&str> = extra.iter().map(|s| s.as_str()).collect();
    let added: BTreeSet<String> = rows
        .iter()
        .flat_map(|r| r.metadata.keys())
        .filter(|k| !known.contains(k.as_str()))
        .cloned()
        .collect();
    extra.extend(added);

    let mut wtr = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = Column::ALL.iter().map(|c| c.header()).collect();
    header.extend(extra.iter().map(|s| s.as_str()));
    wtr.write_record(&header)?;

    for row in rows {
        let mut record: Vec<String> = Column::ALL
            .iter()
            .map(|c| row.text(*c).map(|v| v.into_owned()).unwrap_or_default())
            .collect();
        record.extend(
            extra
                .iter()
                .map(|k| row.metadata.get(k).cloned().unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush().context("Failed to flush ledger CSV")?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
