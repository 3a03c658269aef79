//! Label and table text shared by the terminal UI and the headless runner.

use bscwatch_ledger::{AggregateResult, DisplayRow};

use crate::fetch::CycleError;

pub const COLUMNS: [&str; 5] = ["Timestamp", "Token Symbol", "Value", "BNB Gas", "Transaction Index"];

pub fn summary_line(result: Option<&AggregateResult>) -> String {
    match result {
        Some(result) => format!(
            "Send: {:.2} | Receive: {:.2} | Score: {} | Profit: {:.2} | Next Level: {:.2} | Need: {:.2}",
            result.send_total,
            result.receive_total,
            result.score,
            result.net_profit,
            result.next_level_threshold,
            result.amount_needed
        ),
        None => "Send: 0 | Receive: 0 | Score: 0 | Profit: 0 | Next Level: 0 | Need: 0".to_string(),
    }
}

pub fn gas_line(result: Option<&AggregateResult>) -> String {
    match result {
        Some(result) => format!("BNB Gas: {:.2}", result.gas_total_reference),
        None => "BNB Gas: 0".to_string(),
    }
}

pub fn total_profit_line(result: Option<&AggregateResult>) -> String {
    match result {
        Some(result) => format!("Total Profit: {:.2}", result.total_profit),
        None => "Total Profit: 0".to_string(),
    }
}

/// `None` before the first lookup.
pub fn block_height_line(outcome: Option<&Result<u64, CycleError>>) -> String {
    match outcome {
        None => "BNB block height: ".to_string(),
        Some(Ok(height)) => format!("BNB block height: {height}"),
        Some(Err(err)) => format!("BNB block height: Error ({err})"),
    }
}

pub fn price_line(outcome: Option<&Result<f64, CycleError>>) -> String {
    match outcome {
        None => "BNB USD: ".to_string(),
        Some(Ok(price)) => format!("BNB USD: {price}"),
        Some(Err(err)) => format!("BNB USD: Error ({err})"),
    }
}

pub fn row_cells(row: &DisplayRow) -> [&str; 5] {
    [
        row.timestamp.as_str(),
        row.symbol.as_str(),
        row.value.as_str(),
        row.gas.as_str(),
        row.transaction_index.as_str(),
    ]
}

/// Plain-text table for terminals without the UI. Numeric columns are
/// right-aligned.
pub fn render_table(rows: &[DisplayRow]) -> String {
    let mut widths = COLUMNS.map(|title| title.chars().count());
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row_cells(row)) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, COLUMNS, &widths);
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    out.push_str(rule.join("  ").as_str());
    out.push('\n');
    for row in rows {
        push_line(&mut out, row_cells(row), &widths);
    }
    out
}

fn push_line(out: &mut String, cells: [&str; 5], widths: &[usize; 5]) {
    let mut parts = Vec::with_capacity(cells.len());
    for (idx, (cell, &width)) in cells.iter().zip(widths).enumerate() {
        if matches!(idx, 2 | 3) {
            parts.push(format!("{cell:>width$}"));
        } else {
            parts.push(format!("{cell:<width$}"));
        }
    }
    out.push_str(parts.join("  ").trim_end());
    out.push('\n');
}
