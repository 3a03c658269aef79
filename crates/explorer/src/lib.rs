//! Client for Etherscan-compatible explorer REST APIs (BscScan by default).

use std::fmt;

use bscwatch_ledger::TransferRecord;

mod client;
pub mod query;
pub mod response;

pub use client::{ExplorerClient, DEFAULT_TIMEOUT_SECS};
pub use query::Query;
pub use response::{parse_block_number, parse_native_price, parse_transfers};

pub const DEFAULT_BASE_URL: &str = "https://api.bscscan.com/api";

/// Transfers requested per call; the listing is never paginated further.
pub const PAGE_SIZE: u32 = 1000;

pub const END_BLOCK: u64 = 999_999_999;

#[derive(Debug)]
pub enum ExplorerError {
    Transport(String),
    Http { status: i32, url: String },
    Encoding(String),
    Json(String),
    /// The envelope reported failure (`status != "1"`).
    Api {
        message: String,
        detail: Option<String>,
    },
    MissingResult,
    InvalidResult(String),
}

impl fmt::Display for ExplorerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorerError::Transport(message) => write!(f, "request failed: {message}"),
            ExplorerError::Http { status, url } => write!(f, "request failed: {url} (HTTP {status})"),
            ExplorerError::Encoding(message) => write!(f, "response is not text: {message}"),
            ExplorerError::Json(message) => write!(f, "malformed response: {message}"),
            ExplorerError::Api { message, detail } => match detail {
                Some(detail) if !detail.is_empty() => write!(f, "API error: {message} ({detail})"),
                _ => write!(f, "API error: {message}"),
            },
            ExplorerError::MissingResult => write!(f, "response has no result"),
            ExplorerError::InvalidResult(message) => write!(f, "unexpected result: {message}"),
        }
    }
}

impl std::error::Error for ExplorerError {}

impl From<serde_json::Error> for ExplorerError {
    fn from(err: serde_json::Error) -> Self {
        ExplorerError::Json(err.to_string())
    }
}

/// The three lookups a fetch cycle makes. Implemented over HTTP by
/// [`ExplorerClient`] and by in-memory fakes in tests.
pub trait Explorer {
    /// Number of the last block produced at or before `timestamp`.
    fn block_by_time(&self, timestamp: i64) -> Result<u64, ExplorerError>;

    /// Native coin price in USD.
    fn native_price(&self) -> Result<f64, ExplorerError>;

    /// Token transfers touching `address`, oldest first, starting at `start_block`.
    fn token_transfers(
        &self,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<TransferRecord>, ExplorerError>;
}

impl<T: Explorer + ?Sized> Explorer for Box<T> {
    fn block_by_time(&self, timestamp: i64) -> Result<u64, ExplorerError> {
        (**self).block_by_time(timestamp)
    }

    fn native_price(&self) -> Result<f64, ExplorerError> {
        (**self).native_price()
    }

    fn token_transfers(
        &self,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<TransferRecord>, ExplorerError> {
        (**self).token_transfers(address, start_block)
    }
}
