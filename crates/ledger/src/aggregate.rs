//! Per-wallet aggregation of a transfer listing.

use crate::filter::CoinFilter;
use crate::record::TransferRecord;
use crate::timefmt::{format_timestamp, TimeDisplay};
use crate::units::{format_fixed, normalize_zero, parse_decimals, parse_integer, scale};
use crate::{REFERENCE_STABLECOIN, ROW_DECIMALS};

/// Everything aggregation needs besides the records, captured once per fetch.
#[derive(Clone, Debug)]
pub struct AggregateContext {
    pub wallet_address: String,
    pub filter: CoinFilter,
    /// Native-coin price in the reference currency; 0 when unknown.
    pub native_price: f64,
    pub time_display: TimeDisplay,
    pub stablecoin: String,
}

impl AggregateContext {
    pub fn new(wallet_address: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            filter: CoinFilter::default(),
            native_price: 0.0,
            time_display: TimeDisplay::Utc,
            stablecoin: REFERENCE_STABLECOIN.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayRow {
    pub timestamp: String,
    pub symbol: String,
    pub value: String,
    pub gas: String,
    pub transaction_index: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreLevel {
    pub score: u32,
    pub next_level_threshold: f64,
    pub amount_needed: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateResult {
    pub rows: Vec<DisplayRow>,
    pub skipped: usize,
    pub send_total: f64,
    pub receive_total: f64,
    pub gas_total_reference: f64,
    pub score: u32,
    pub next_level_threshold: f64,
    pub amount_needed: f64,
    pub net_profit: f64,
    pub total_profit: f64,
}

struct Amounts {
    value: f64,
    gas: f64,
}

/// Amount and gas of one record. A field that fails to convert zeroes its
/// own quantity and nothing else.
fn record_amounts(record: &TransferRecord, is_send: bool) -> Amounts {
    let decimals = record.token_decimal.as_deref().and_then(parse_decimals);

    let value = decimals
        .zip(record.value.as_deref().and_then(parse_integer))
        .map(|(decimals, raw)| {
            let value = scale(raw, decimals);
            if is_send {
                -value
            } else {
                value
            }
        })
        .unwrap_or(0.0);

    let gas_used = record.gas_used.as_deref().map_or(Some(0.0), parse_integer);
    let gas_price = record.gas_price.as_deref().map_or(Some(0.0), parse_integer);
    let gas = match (decimals, gas_used, gas_price) {
        (Some(decimals), Some(used), Some(price)) if (used * price).is_finite() => {
            -scale(used * price, decimals)
        }
        _ => 0.0,
    };

    Amounts {
        value: normalize_zero(value),
        gas: normalize_zero(gas),
    }
}

/// `score` is the largest `s` with `2^s <= amount`, or 0 below 1.
/// A non-finite amount has no level and scores as zero.
pub fn score_level(amount: f64) -> ScoreLevel {
    let amount = if amount.is_finite() { amount.abs() } else { 0.0 };
    let mut score = 0u32;
    let mut remaining = amount;
    while remaining >= 2.0 {
        score += 1;
        remaining /= 2.0;
    }
    let next_level_threshold = 2f64.powi(score as i32 + 1);
    ScoreLevel {
        score,
        next_level_threshold,
        amount_needed: next_level_threshold - amount,
    }
}

pub fn aggregate(records: &[TransferRecord], ctx: &AggregateContext) -> AggregateResult {
    let stablecoin = ctx.stablecoin.to_uppercase();
    let mut rows = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    let mut send_total = 0.0f64;
    let mut receive_total = 0.0f64;
    let mut gas_total_reference = 0.0f64;

    for record in records {
        if record.is_airdrop() || !ctx.filter.allows(record.symbol()) {
            skipped += 1;
            continue;
        }

        let is_send = record.is_from(&ctx.wallet_address);
        let is_receive = record.is_to(&ctx.wallet_address);
        let amounts = record_amounts(record, is_send);
        gas_total_reference += amounts.gas * ctx.native_price;

        if record.symbol().to_uppercase() == stablecoin {
            match (is_send, is_receive) {
                (true, false) => send_total += amounts.value,
                (false, true) => receive_total += amounts.value,
                _ => {}
            }
        }

        rows.push(DisplayRow {
            timestamp: record
                .time_stamp
                .as_deref()
                .and_then(|raw| format_timestamp(raw, ctx.time_display))
                .unwrap_or_default(),
            symbol: record.symbol().to_string(),
            value: format_fixed(amounts.value, ROW_DECIMALS),
            gas: format_fixed(amounts.gas, ROW_DECIMALS),
            transaction_index: record.transaction_index.clone().unwrap_or_default(),
        });
    }

    let level = score_level(send_total);
    let net_profit = send_total + receive_total;
    AggregateResult {
        rows,
        skipped,
        send_total: normalize_zero(send_total),
        receive_total: normalize_zero(receive_total),
        gas_total_reference: normalize_zero(gas_total_reference),
        score: level.score,
        next_level_threshold: level.next_level_threshold,
        amount_needed: level.amount_needed,
        net_profit: normalize_zero(net_profit),
        total_profit: normalize_zero(net_profit + gas_total_reference),
    }
}
