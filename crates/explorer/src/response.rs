//! Decoding of the `{status, message, result}` envelope every endpoint returns.

use bscwatch_ledger::TransferRecord;
use serde::Deserialize;
use serde_json::Value;

use crate::ExplorerError;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Value,
}

fn status_ok(status: &Value) -> bool {
    match status {
        Value::String(text) => text.trim() == "1",
        Value::Number(number) => number.as_u64() == Some(1),
        _ => false,
    }
}

/// The envelope's `result`, or the failure it reports.
fn decode_result(body: &str) -> Result<Value, ExplorerError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    if !status_ok(&envelope.status) {
        let detail = match &envelope.result {
            Value::String(text) => Some(text.clone()),
            _ => None,
        };
        return Err(ExplorerError::Api {
            message: envelope.message.unwrap_or_else(|| "NOTOK".to_string()),
            detail,
        });
    }
    match envelope.result {
        Value::Null => Err(ExplorerError::MissingResult),
        result => Ok(result),
    }
}

fn number_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn parse_block_number(body: &str) -> Result<u64, ExplorerError> {
    let result = decode_result(body)?;
    number_text(&result)
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(|| ExplorerError::InvalidResult(format!("block number {result}")))
}

/// Reads `result.ethusd`, the field name Etherscan clones keep for the
/// native coin whatever the chain.
pub fn parse_native_price(body: &str) -> Result<f64, ExplorerError> {
    let result = decode_result(body)?;
    let price = result
        .get("ethusd")
        .and_then(number_text)
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|price| price.is_finite() && *price >= 0.0);
    price.ok_or_else(|| ExplorerError::InvalidResult(format!("price {result}")))
}

pub fn parse_transfers(body: &str) -> Result<Vec<TransferRecord>, ExplorerError> {
    match decode_result(body)? {
        result @ Value::Array(_) => Ok(serde_json::from_value(result)?),
        other => Err(ExplorerError::InvalidResult(format!(
            "expected transfer list, got {other}"
        ))),
    }
}
