// 🔎 Event query - flagged hashes → one SQL text for the indexing service
//
// Flipside takes raw SQL, so hashes are never interpolated as given: each
// one must pass `HashFragment::parse` (optional 0x prefix, hex digits only,
// bounded length) before it reaches the query.

use crate::config::ChainConfig;
use crate::onchain::EventKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Longest hex body a transaction hash can have
pub const MAX_FRAGMENT_HEX: usize = 64;

// ============================================================================
// HASH FRAGMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentRejection {
    Empty,
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
    NotHex { found: char },
}

impl fmt::Display for FragmentRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentRejection::Empty => write!(f, "empty hash"),
            FragmentRejection::TooShort { len, min } => {
                write!(f, "{} hex digits, need at least {}", len, min)
            }
            FragmentRejection::TooLong { len, max } => {
                write!(f, "{} hex digits, at most {} allowed", len, max)
            }
            FragmentRejection::NotHex { found } => write!(f, "non-hex character {:?}", found),
        }
    }
}

impl std::error::Error for FragmentRejection {}

/// A flagged transaction hash that is safe to embed in a LIKE pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashFragment(String);

impl HashFragment {
    pub fn parse(raw: &str, min_hex: usize) -> Result<HashFragment, FragmentRejection> {
        let value = raw.trim().to_ascii_lowercase();
        let body = value.strip_prefix("0x").unwrap_or(&value);

        if body.is_empty() {
            return Err(FragmentRejection::Empty);
        }
        if let Some(found) = body.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(FragmentRejection::NotHex { found });
        }
        if body.len() < min_hex {
            return Err(FragmentRejection::TooShort {
                len: body.len(),
                min: min_hex,
            });
        }
        if body.len() > MAX_FRAGMENT_HEX {
            return Err(FragmentRejection::TooLong {
                len: body.len(),
                max: MAX_FRAGMENT_HEX,
            });
        }

        Ok(HashFragment(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// EVENT QUERY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedFragment {
    pub hash: String,
    pub reason: FragmentRejection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQuery {
    pub schema: String,
    pub native_symbol: String,
    pub start_date: NaiveDate,
    pub fragments: Vec<HashFragment>,
    pub rejected: Vec<RejectedFragment>,
}

impl EventQuery {
    pub fn build(hashes: &[String], chain: &ChainConfig) -> EventQuery {
        let mut fragments: Vec<HashFragment> = Vec::new();
        let mut rejected = Vec::new();

        for hash in hashes {
            match HashFragment::parse(hash, chain.min_fragment_hex) {
                Ok(fragment) => {
                    if !fragments.contains(&fragment) {
                        fragments.push(fragment);
                    }
                }
                Err(reason) => {
                    warn!(hash = %hash, %reason, "hash left out of on-chain query");
                    rejected.push(RejectedFragment {
                        hash: hash.clone(),
                        reason,
                    });
                }
            }
        }

        EventQuery {
            schema: chain.schema.clone(),
            native_symbol: chain.native_symbol.clone(),
            start_date: chain.start_date,
            fragments,
            rejected,
        }
    }

    /// Nothing left to ask the index for
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// `tx_hash ILIKE '%f1%' OR tx_hash ILIKE '%f2%' ...`
    fn hash_condition(&self) -> String {
        self.fragments
            .iter()
            .map(|f| format!("tx_hash ILIKE '%{}%'", f.as_str()))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    /// Token transfers, native transfers and fee payments, unioned
    pub fn to_sql(&self) -> String {
        let condition = self.hash_condition();
        let start = self.start_date.format("%Y-%m-%d");
        let schema = &self.schema;
        let symbol = &self.native_symbol;
        let token = EventKind::TokenTransfer.tag();
        let native = EventKind::NativeTransfer.tag();
        let fees = EventKind::FeePayment.tag();

        format!(
            "with
token_transfers as (
    select block_timestamp, block_number, tx_hash, from_address, to_address, contract_address, name, symbol, amount, '{token}' as event
    from {schema}.core.ez_token_transfers
    where block_timestamp > '{start}'
    and ({condition})
),
native_transfers as (
    select block_timestamp, block_number, tx_hash, from_address, to_address, 'native' as contract_address, 'native' as name, '{symbol}' as symbol, amount, '{native}' as event
    from {schema}.core.ez_native_transfers
    where block_timestamp > '{start}'
    and ({condition})
),
tx_fees as (
    select block_timestamp, block_number, tx_hash, from_address, 'native' as to_address, 'native' as contract_address, 'native' as name, '{symbol}' as symbol, tx_fee as amount, '{fees}' as event
    from {schema}.core.fact_transactions
    where block_timestamp > '{start}'
    and ({condition})
)
select * from token_transfers
union all
select * from native_transfers
union all
select * from tx_fees"
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn full_hash() -> String {
        format!("0x{}", "ab12".repeat(16))
    }

    #[test]
    fn test_fragment_accepts_full_and_partial_hashes() {
        assert!(HashFragment::parse(&full_hash(), 8).is_ok());
        // Truncated hash, the usual corruption
        let partial = HashFragment::parse("  0xAB12AB12AB12 ", 8).unwrap();
        assert_eq!(partial.as_str(), "0xab12ab12ab12");
        // No prefix
        assert!(HashFragment::parse("ab12ab12ab12", 8).is_ok());
    }

    #[test]
    fn test_fragment_rejects_injection() {
        let err = HashFragment::parse("0xab12ab12' OR '1'='1", 8).unwrap_err();
        assert_eq!(err, FragmentRejection::NotHex { found: '\'' });
        assert!(HashFragment::parse("0xab12%ab12ab12", 8).is_err());
    }

    #[test]
    fn test_fragment_length_bounds() {
        assert_eq!(HashFragment::parse("0x", 8), Err(FragmentRejection::Empty));
        assert_eq!(
            HashFragment::parse("0xab12", 8),
            Err(FragmentRejection::TooShort { len: 4, min: 8 })
        );
        let long = format!("0x{}", "a".repeat(65));
        assert_eq!(
            HashFragment::parse(&long, 8),
            Err(FragmentRejection::TooLong { len: 65, max: 64 })
        );
    }

    #[test]
    fn test_build_splits_accepted_and_rejected() {
        let chain = ChainConfig::default();
        let hashes = vec![
            full_hash(),
            "not-a-hash".to_string(),
            full_hash().to_uppercase().replace("0X", "0x"),
        ];

        let query = EventQuery::build(&hashes, &chain);

        assert_eq!(query.fragments.len(), 1);
        assert_eq!(query.rejected.len(), 1);
        assert_eq!(query.rejected[0].hash, "not-a-hash");
        assert!(!query.is_empty());
    }

    #[test]
    fn test_sql_covers_three_sources() {
        let chain = ChainConfig::default();
        let query = EventQuery::build(&[full_hash()], &chain);
        let sql = query.to_sql();

        assert!(sql.contains("avalanche.core.ez_token_transfers"));
        assert!(sql.contains("avalanche.core.ez_native_transfers"));
        assert!(sql.contains("avalanche.core.fact_transactions"));
        assert!(sql.contains("block_timestamp > '2025-04-01'"));
        assert_eq!(
            sql.matches(&format!("tx_hash ILIKE '%{}%'", full_hash())).count(),
            3
        );
        assert!(sql.contains("'pay fees' as event"));
        assert!(sql.contains("'AVAX' as symbol"));
        assert_eq!(sql.matches("union all").count(), 2);
    }

    #[test]
    fn test_sql_joins_fragments_with_or() {
        let chain = ChainConfig::default();
        let a = format!("0x{}", "1".repeat(64));
        let b = format!("0x{}", "2".repeat(20));
        let sql = EventQuery::build(&[a.clone(), b.clone()], &chain).to_sql();

        assert!(sql.contains(&format!(
            "(tx_hash ILIKE '%{}%' OR tx_hash ILIKE '%{}%')",
            a, b
        )));
    }
}
