use std::time::Duration;

use bscwatch_ledger::TransferRecord;
use bscwatch_log::{log_debug, log_warn};

use crate::query::Query;
use crate::response::{parse_block_number, parse_native_price, parse_transfers};
use crate::{Explorer, ExplorerError};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Blocking HTTP client. Every call is a single GET; nothing is retried.
#[derive(Clone, Debug)]
pub struct ExplorerClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl ExplorerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn get(&self, query: &Query) -> Result<String, ExplorerError> {
        let url = query.redacted_url(&self.base_url);
        log_debug!("GET {url}");
        let response = query
            .request(&self.base_url, &self.api_key, self.timeout)
            .send()
            .map_err(|err| {
                log_warn!("{} failed: {err}", query.action());
                ExplorerError::Transport(format!("{url} ({err})"))
            })?;
        if response.status_code != 200 {
            return Err(ExplorerError::Http {
                status: response.status_code,
                url,
            });
        }
        let body = response
            .as_str()
            .map_err(|err| ExplorerError::Encoding(err.to_string()))?;
        Ok(body.to_string())
    }
}

impl Explorer for ExplorerClient {
    fn block_by_time(&self, timestamp: i64) -> Result<u64, ExplorerError> {
        let body = self.get(&Query::block_by_time(timestamp))?;
        parse_block_number(&body)
    }

    fn native_price(&self) -> Result<f64, ExplorerError> {
        let body = self.get(&Query::native_price())?;
        parse_native_price(&body)
    }

    fn token_transfers(
        &self,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<TransferRecord>, ExplorerError> {
        let body = self.get(&Query::token_transfers(address, start_block))?;
        let records = parse_transfers(&body)?;
        log_debug!("tokentx returned {} records from block {start_block}", records.len());
        Ok(records)
    }
}
