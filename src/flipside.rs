//! Flipside JSON-RPC client
//!
//! One query lifecycle per fix: `createQueryRun`, poll `getQueryRun` until the
//! run reaches a terminal state, then page through `getQueryRunResults`.
//! Uses the blocking client; the fix flow is a single synchronous request.

use crate::config::FlipsideConfig;
use crate::onchain::{EventKind, LedgerIndex, OnChainEvent};
use crate::query::EventQuery;
use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const STATE_SUCCESS: &str = "QUERY_STATE_SUCCESS";
const STATE_FAILED: &str = "QUERY_STATE_FAILED";
const STATE_CANCELED: &str = "QUERY_STATE_CANCELED";

static NULL_VALUE: Value = Value::Null;

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl<T> RpcResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        if let Some(err) = self.error {
            return Err(anyhow!("{} failed ({}): {}", method, err.code, err.message));
        }
        self.result
            .ok_or_else(|| anyhow!("{} returned neither result nor error", method))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryRunEnvelope {
    query_run: QueryRun,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRun {
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsPage {
    #[serde(default)]
    column_names: Option<Vec<String>>,
    #[serde(default)]
    rows: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    page: Option<PageStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageStats {
    #[serde(default)]
    total_pages: u32,
}

// ============================================================================
// RESULT SET
// ============================================================================

/// Column names plus row values, as returned by the results endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResultSet {
    /// Convert rows into events. Rows with an unknown event tag or without
    /// hash/addresses/amount are skipped with a warning.
    pub fn events(&self) -> Result<Vec<OnChainEvent>> {
        let index: HashMap<String, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_lowercase(), i))
            .collect();

        let col = |name: &str| -> Result<usize> {
            index
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("query result has no '{}' column", name))
        };

        let block_timestamp = col("block_timestamp")?;
        let block_number = col("block_number")?;
        let tx_hash = col("tx_hash")?;
        let from_address = col("from_address")?;
        let to_address = col("to_address")?;
        let contract_address = col("contract_address")?;
        let name = col("name")?;
        let symbol = col("symbol")?;
        let amount = col("amount")?;
        let event = col("event")?;

        let mut events = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            let cell = |c: usize| row.get(c).unwrap_or(&NULL_VALUE);

            let Some(kind) = value_text(cell(event)).and_then(|t| EventKind::from_tag(&t)) else {
                warn!(row = i, event = %cell(event), "unknown event tag, row skipped");
                continue;
            };

            let (Some(hash), Some(from), Some(to), Some(value)) = (
                value_text(cell(tx_hash)),
                value_text(cell(from_address)),
                value_text(cell(to_address)),
                value_f64(cell(amount)),
            ) else {
                warn!(row = i, "incomplete event row skipped");
                continue;
            };

            events.push(OnChainEvent {
                block_timestamp: value_text(cell(block_timestamp)).unwrap_or_default(),
                block_number: value_i64(cell(block_number)),
                tx_hash: hash,
                from_address: from,
                to_address: to,
                contract_address: value_text(cell(contract_address)).unwrap_or_default(),
                name: value_text(cell(name)),
                symbol: value_text(cell(symbol)),
                amount: value,
                event: kind,
            });
        }

        Ok(events)
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct FlipsideClient {
    client: Client,
    endpoint: String,
    config: FlipsideConfig,
}

impl FlipsideClient {
    pub fn new(config: &FlipsideConfig) -> Result<Self> {
        let api_key = config.require_api_key()?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    "x-api-key",
                    api_key
                        .parse::<reqwest::header::HeaderValue>()
                        .context("Invalid Flipside api key")?,
                );
                headers
            })
            .build()
            .context("Failed to build FlipsideClient")?;

        Ok(Self {
            client,
            endpoint: format!("{}/json-rpc", config.base_url.trim_end_matches('/')),
            config: config.clone(),
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params: vec![params],
            id: 1,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .with_context(|| format!("POST {} failed", method))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(anyhow!("{} {}: {}", method, status, text));
        }

        resp.json::<RpcResponse<T>>()
            .with_context(|| format!("Failed to parse {} response", method))?
            .into_result(method)
    }

    pub fn create_query_run(&self, sql: &str) -> Result<QueryRun> {
        let envelope: QueryRunEnvelope = self.call(
            "createQueryRun",
            json!({
                "resultTTLHours": self.config.result_ttl_hours,
                "maxAgeMinutes": self.config.max_age_minutes,
                "sql": sql,
                "tags": { "source": "ledger-fix" },
                "dataSource": "snowflake-default",
                "dataProvider": "flipside",
            }),
        )?;
        Ok(envelope.query_run)
    }

    pub fn get_query_run(&self, query_run_id: &str) -> Result<QueryRun> {
        let envelope: QueryRunEnvelope =
            self.call("getQueryRun", json!({ "queryRunId": query_run_id }))?;
        Ok(envelope.query_run)
    }

    /// Poll until the run succeeds; failure, cancel or running out of polls is an error
    pub fn wait_for_query_run(&self, query_run_id: &str) -> Result<()> {
        for attempt in 1..=self.config.max_polls {
            let run = self.get_query_run(query_run_id)?;
            match run.state.as_str() {
                STATE_SUCCESS => return Ok(()),
                STATE_FAILED | STATE_CANCELED => {
                    return Err(anyhow!(
                        "query run {} ended in {}: {}",
                        query_run_id,
                        run.state,
                        run.error_message.unwrap_or_default()
                    ))
                }
                state => debug!(query_run_id, attempt, state, "query still running"),
            }
            std::thread::sleep(self.config.poll_interval());
        }

        Err(anyhow!(
            "query run {} did not finish after {} polls",
            query_run_id,
            self.config.max_polls
        ))
    }

    pub fn query_results(&self, query_run_id: &str) -> Result<QueryResultSet> {
        let mut result = QueryResultSet::default();
        let mut page_number = 1;

        loop {
            let page: ResultsPage = self.call(
                "getQueryRunResults",
                json!({
                    "queryRunId": query_run_id,
                    "format": "csv",
                    "page": { "number": page_number, "size": self.config.page_size },
                }),
            )?;

            if result.columns.is_empty() {
                result.columns = page.column_names.unwrap_or_default();
            }
            result.rows.extend(page.rows.unwrap_or_default());

            let total_pages = page.page.map(|p| p.total_pages).unwrap_or(1);
            if page_number >= total_pages {
                break;
            }
            page_number += 1;
        }

        Ok(result)
    }

    /// Submit, wait, fetch
    pub fn query(&self, sql: &str) -> Result<QueryResultSet> {
        let run = self.create_query_run(sql)?;
        info!(query_run_id = %run.id, "flipside query submitted");
        self.wait_for_query_run(&run.id)?;
        let result = self.query_results(&run.id)?;
        info!(query_run_id = %run.id, rows = result.rows.len(), "flipside query finished");
        Ok(result)
    }
}

impl LedgerIndex for FlipsideClient {
    fn fetch_events(&self, query: &EventQuery) -> Result<Vec<OnChainEvent>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.query(&query.to_sql())?.events()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        [
            "block_timestamp",
            "block_number",
            "tx_hash",
            "from_address",
            "to_address",
            "contract_address",
            "name",
            "symbol",
            "amount",
            "event",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_result_rows_become_events() {
        let result = QueryResultSet {
            columns: columns(),
            rows: vec![
                vec![
                    json!("2025-05-01T10:00:00.000Z"),
                    json!(123456),
                    json!("0xh1"),
                    json!("0xFROM"),
                    json!("0xTO"),
                    json!("native"),
                    json!("native"),
                    json!("AVAX"),
                    json!(1.5),
                    json!("native_transfers"),
                ],
                vec![
                    json!("2025-05-01T10:00:00.000Z"),
                    json!("123457"),
                    json!("0xh2"),
                    json!("0xFROM"),
                    json!("0xTO"),
                    json!("0xtoken"),
                    Value::Null,
                    json!("USDC"),
                    json!("250.25"),
                    json!("token_transfers"),
                ],
            ],
        };

        let events = result.events().unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, EventKind::NativeTransfer);
        assert_eq!(events[0].block_number, Some(123456));
        assert_eq!(events[0].amount, 1.5);
        assert_eq!(events[1].event, EventKind::TokenTransfer);
        assert_eq!(events[1].block_number, Some(123457));
        assert_eq!(events[1].amount, 250.25);
        assert_eq!(events[1].name, None);
        assert_eq!(events[1].symbol.as_deref(), Some("USDC"));
    }

    #[test]
    fn test_unknown_and_incomplete_rows_skipped() {
        let mut good = vec![
            json!("t"),
            json!(1),
            json!("0xh"),
            json!("0xa"),
            json!("native"),
            json!("native"),
            json!("native"),
            json!("AVAX"),
            json!(0.01),
            json!("pay fees"),
        ];
        let mut unknown = good.clone();
        unknown[9] = json!("swap");
        let mut no_amount = good.clone();
        no_amount[8] = Value::Null;
        good[1] = Value::Null;

        let result = QueryResultSet {
            columns: columns(),
            rows: vec![unknown, no_amount, good],
        };

        let events = result.events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventKind::FeePayment);
        assert_eq!(events[0].block_number, None);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let result = QueryResultSet {
            columns: vec!["tx_hash".to_string()],
            rows: vec![],
        };
        assert!(result.events().is_err());
    }

    #[test]
    fn test_column_names_are_case_insensitive() {
        let result = QueryResultSet {
            columns: columns().iter().map(|c| c.to_uppercase()).collect(),
            rows: vec![],
        };
        assert!(result.events().unwrap().is_empty());
    }

    #[test]
    fn test_rpc_error_surfaces() {
        let resp: RpcResponse<QueryRunEnvelope> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "invalid api key" }
        }))
        .unwrap();

        let err = resp.into_result("createQueryRun").unwrap_err();
        assert!(err.to_string().contains("invalid api key"));
    }

    #[test]
    fn test_query_run_envelope_parses() {
        let resp: RpcResponse<QueryRunEnvelope> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "queryRequest": { "id": "req" },
                "queryRun": { "id": "run-1", "state": "QUERY_STATE_READY", "errorMessage": null }
            }
        }))
        .unwrap();

        let run = resp.into_result("createQueryRun").unwrap().query_run;
        assert_eq!(run.id, "run-1");
        assert_eq!(run.state, "QUERY_STATE_READY");
    }

    #[test]
    fn test_client_requires_api_key() {
        assert!(FlipsideClient::new(&FlipsideConfig::default()).is_err());
    }
}
