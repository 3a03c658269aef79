//! Query-string construction for the explorer's `module`/`action` API.

use std::time::Duration;

use crate::{END_BLOCK, PAGE_SIZE};

const REDACTED: &str = "***";

/// One GET request: ordered `key=value` pairs, `apikey` appended last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    params: Vec<(&'static str, String)>,
}

impl Query {
    pub fn new(module: &str, action: &str) -> Self {
        Self {
            params: vec![("module", module.to_string()), ("action", action.to_string())],
        }
    }

    pub fn param(mut self, key: &'static str, value: impl ToString) -> Self {
        self.params.push((key, value.to_string()));
        self
    }

    pub fn block_by_time(timestamp: i64) -> Self {
        Self::new("block", "getblocknobytime")
            .param("timestamp", timestamp)
            .param("closest", "before")
    }

    pub fn native_price() -> Self {
        Self::new("stats", "bnbprice")
    }

    pub fn token_transfers(address: &str, start_block: u64) -> Self {
        Self::new("account", "tokentx")
            .param("address", address)
            .param("page", 1)
            .param("offset", PAGE_SIZE)
            .param("startblock", start_block)
            .param("endblock", END_BLOCK)
            .param("sort", "asc")
    }

    pub fn params(&self) -> &[(&'static str, String)] {
        &self.params
    }

    pub fn action(&self) -> &str {
        self.params
            .iter()
            .find(|(key, _)| *key == "action")
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }

    /// Builds the request; minreq percent-encodes every parameter value.
    pub fn request(&self, base_url: &str, api_key: &str, timeout: Duration) -> minreq::Request {
        let mut request = minreq::get(base_url);
        for (key, value) in &self.params {
            request = request.with_param(*key, value.as_str());
        }
        request
            .with_param("apikey", api_key)
            .with_timeout(timeout.as_secs().max(1))
    }

    /// URL for log lines, with the API key masked.
    pub fn redacted_url(&self, base_url: &str) -> String {
        let mut url = String::from(base_url);
        url.push(if base_url.contains('?') { '&' } else { '?' });
        for (key, value) in &self.params {
            url.push_str(key);
            url.push('=');
            url.push_str(value);
            url.push('&');
        }
        url.push_str("apikey=");
        url.push_str(REDACTED);
        url
    }
}
