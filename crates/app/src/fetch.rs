//! One fetch cycle: block lookup, price lookup, transfer listing, aggregation.

use std::fmt;
use std::time::Duration;

use bscwatch_explorer::{Explorer, ExplorerClient, ExplorerError, DEFAULT_TIMEOUT_SECS};
use bscwatch_ledger::{
    aggregate, start_of_day, AggregateContext, AggregateResult, CoinFilter, DateError, TimeDisplay,
};
use chrono::Local;

/// Snapshot of the foreground's inputs, sent by value to the poller.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub base_url: String,
    pub api_key: String,
    pub address: String,
    /// `YYYYMMDD`; transfers are listed from the block at its local midnight.
    pub date: String,
    pub coins: CoinFilter,
    pub time_display: TimeDisplay,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn connect(&self) -> ExplorerClient {
        ExplorerClient::new(self.base_url.as_str(), self.api_key.as_str()).with_timeout(self.timeout)
    }
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            base_url: bscwatch_explorer::DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            address: String::new(),
            date: bscwatch_ledger::today_utc(),
            coins: CoinFilter::default(),
            time_display: TimeDisplay::Utc,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputError {
    MissingApiKey,
    MissingAddress,
    InvalidDate(DateError),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::MissingApiKey => write!(f, "API key is required"),
            InputError::MissingAddress => write!(f, "address is required"),
            InputError::InvalidDate(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for InputError {}

impl From<DateError> for InputError {
    fn from(err: DateError) -> Self {
        InputError::InvalidDate(err)
    }
}

#[derive(Debug)]
pub enum CycleError {
    Input(InputError),
    Explorer(ExplorerError),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Input(err) => write!(f, "{err}"),
            CycleError::Explorer(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<InputError> for CycleError {
    fn from(err: InputError) -> Self {
        CycleError::Input(err)
    }
}

impl From<DateError> for CycleError {
    fn from(err: DateError) -> Self {
        CycleError::Input(err.into())
    }
}

impl From<ExplorerError> for CycleError {
    fn from(err: ExplorerError) -> Self {
        CycleError::Explorer(err)
    }
}

/// Last successfully fetched values; a failed lookup leaves them unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FetchState {
    pub block_height: u64,
    pub native_price: f64,
}

#[derive(Debug)]
pub struct CycleReport {
    pub block_height: Result<u64, CycleError>,
    pub native_price: Result<f64, CycleError>,
    pub transfers: Result<AggregateResult, CycleError>,
    /// Values in effect after the cycle.
    pub state: FetchState,
}

impl CycleReport {
    pub fn errors(&self) -> impl Iterator<Item = &CycleError> {
        [
            self.block_height.as_ref().err(),
            self.native_price.as_ref().err(),
            self.transfers.as_ref().err(),
        ]
        .into_iter()
        .flatten()
    }
}

fn require_api_key(request: &FetchRequest) -> Result<&str, InputError> {
    match request.api_key.trim() {
        "" => Err(InputError::MissingApiKey),
        key => Ok(key),
    }
}

fn lookup_block<E: Explorer + ?Sized>(
    explorer: &E,
    request: &FetchRequest,
) -> Result<u64, CycleError> {
    let timestamp = start_of_day(&request.date, &Local)?;
    require_api_key(request)?;
    Ok(explorer.block_by_time(timestamp)?)
}

fn lookup_price<E: Explorer + ?Sized>(
    explorer: &E,
    request: &FetchRequest,
) -> Result<f64, CycleError> {
    require_api_key(request)?;
    Ok(explorer.native_price()?)
}

fn list_transfers<E: Explorer + ?Sized>(
    explorer: &E,
    request: &FetchRequest,
    state: &FetchState,
) -> Result<AggregateResult, CycleError> {
    let address = request.address.trim();
    if address.is_empty() {
        return Err(InputError::MissingAddress.into());
    }
    require_api_key(request)?;
    let records = explorer.token_transfers(address, state.block_height)?;
    let ctx = AggregateContext {
        filter: request.coins.clone(),
        native_price: state.native_price,
        time_display: request.time_display,
        ..AggregateContext::new(address)
    };
    Ok(aggregate(&records, &ctx))
}

/// Runs the three lookups in order. Block and price failures fall back to the
/// last known values in `state` so the transfer listing still goes ahead.
pub fn run_cycle<E: Explorer + ?Sized>(
    explorer: &E,
    request: &FetchRequest,
    state: &mut FetchState,
) -> CycleReport {
    let block_height = lookup_block(explorer, request);
    match &block_height {
        Ok(height) => state.block_height = *height,
        Err(err) => log_warn!("Block height lookup failed: {err}"),
    }

    let native_price = lookup_price(explorer, request);
    match &native_price {
        Ok(price) => state.native_price = *price,
        Err(err) => log_warn!("Price lookup failed: {err}"),
    }

    let transfers = list_transfers(explorer, request, state);
    match &transfers {
        Ok(result) => log_info!(
            "Fetched {} transfers ({} skipped) from block {}",
            result.rows.len(),
            result.skipped,
            state.block_height
        ),
        Err(err) => log_warn!("Transfer listing failed: {err}"),
    }

    CycleReport {
        block_height,
        native_price,
        transfers,
        state: *state,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use bscwatch_ledger::TransferRecord;

    /// In-memory explorer: fixed answers, optional failures, call log.
    #[derive(Clone, Default)]
    pub(crate) struct FakeExplorer {
        pub block: Option<u64>,
        pub price: Option<f64>,
        pub records: Option<Vec<TransferRecord>>,
        pub calls: Arc<AtomicUsize>,
        pub start_blocks: Arc<Mutex<Vec<u64>>>,
    }

    fn unavailable() -> ExplorerError {
        ExplorerError::Api {
            message: "NOTOK".to_string(),
            detail: Some("Max rate limit reached".to_string()),
        }
    }

    impl FakeExplorer {
        pub(crate) fn healthy() -> Self {
            Self {
                block: Some(41_000_000),
                price: Some(600.0),
                records: Some(Vec::new()),
                ..Self::default()
            }
        }
    }

    impl Explorer for FakeExplorer {
        fn block_by_time(&self, _timestamp: i64) -> Result<u64, ExplorerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.block.ok_or_else(unavailable)
        }

        fn native_price(&self) -> Result<f64, ExplorerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price.ok_or_else(unavailable)
        }

        fn token_transfers(
            &self,
            _address: &str,
            start_block: u64,
        ) -> Result<Vec<TransferRecord>, ExplorerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut blocks) = self.start_blocks.lock() {
                blocks.push(start_block);
            }
            self.records.clone().ok_or_else(unavailable)
        }
    }

    pub(crate) fn request() -> FetchRequest {
        FetchRequest {
            api_key: "KEY".to_string(),
            address: "0xWallet".to_string(),
            date: "20240101".to_string(),
            ..FetchRequest::default()
        }
    }

    fn stablecoin(from: &str, to: &str, whole_units: u64) -> TransferRecord {
        TransferRecord {
            token_symbol: Some("BSC-USD".to_string()),
            value: Some(whole_units.to_string()),
            token_decimal: Some("0".to_string()),
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            gas_used: Some("2".to_string()),
            gas_price: Some("1".to_string()),
            ..TransferRecord::default()
        }
    }

    #[test]
    fn healthy_cycle_updates_state_and_aggregates() {
        let mut explorer = FakeExplorer::healthy();
        explorer.records = Some(vec![stablecoin("0xwallet", "0xother", 100)]);
        let mut state = FetchState::default();
        let report = run_cycle(&explorer, &request(), &mut state);

        assert_eq!(report.block_height.as_ref().ok(), Some(&41_000_000));
        assert_eq!(report.native_price.as_ref().ok(), Some(&600.0));
        let result = report.transfers.expect("transfers");
        assert_eq!(result.send_total, -100.0);
        assert_eq!(result.gas_total_reference, -1200.0);
        assert_eq!(state.block_height, 41_000_000);
        assert_eq!(explorer.start_blocks.lock().expect("lock").as_slice(), [41_000_000]);
    }

    #[test]
    fn failed_lookups_keep_last_known_values() {
        let explorer = FakeExplorer {
            block: None,
            price: None,
            records: Some(Vec::new()),
            ..FakeExplorer::default()
        };
        let mut state = FetchState {
            block_height: 39_000_000,
            native_price: 550.0,
        };
        let report = run_cycle(&explorer, &request(), &mut state);

        assert!(matches!(report.block_height, Err(CycleError::Explorer(_))));
        assert!(matches!(report.native_price, Err(CycleError::Explorer(_))));
        assert!(report.transfers.is_ok());
        assert_eq!(report.state.block_height, 39_000_000);
        assert_eq!(report.state.native_price, 550.0);
        assert_eq!(explorer.start_blocks.lock().expect("lock").as_slice(), [39_000_000]);
        assert_eq!(report.errors().count(), 2);
    }

    #[test]
    fn missing_address_aborts_only_the_listing() {
        let explorer = FakeExplorer::healthy();
        let mut req = request();
        req.address = "  ".to_string();
        let mut state = FetchState::default();
        let report = run_cycle(&explorer, &req, &mut state);

        assert!(report.block_height.is_ok());
        assert!(report.native_price.is_ok());
        assert!(matches!(
            report.transfers,
            Err(CycleError::Input(InputError::MissingAddress))
        ));
        assert_eq!(explorer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_api_key_skips_every_call() {
        let explorer = FakeExplorer::healthy();
        let mut req = request();
        req.api_key.clear();
        let mut state = FetchState::default();
        let report = run_cycle(&explorer, &req, &mut state);

        assert_eq!(explorer.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            report.native_price,
            Err(CycleError::Input(InputError::MissingApiKey))
        ));
        assert_eq!(report.errors().count(), 3);
    }

    #[test]
    fn invalid_date_is_an_input_error() {
        let explorer = FakeExplorer::healthy();
        let mut req = request();
        req.date = "2024-01-01".to_string();
        let mut state = FetchState::default();
        let report = run_cycle(&explorer, &req, &mut state);

        assert!(matches!(
            report.block_height,
            Err(CycleError::Input(InputError::InvalidDate(_)))
        ));
        // The listing still runs, from block 0.
        assert_eq!(explorer.start_blocks.lock().expect("lock").as_slice(), [0]);
    }

    #[test]
    fn listing_failure_is_reported() {
        let mut explorer = FakeExplorer::healthy();
        explorer.records = None;
        let mut state = FetchState::default();
        let report = run_cycle(&explorer, &request(), &mut state);
        let err = report.transfers.expect_err("listing fails");
        assert_eq!(err.to_string(), "API error: NOTOK (Max rate limit reached)");
    }
}
