//! Token-transfer model and the per-wallet aggregation that turns an explorer
//! transfer list into display rows and summary totals.

pub mod aggregate;
pub mod filter;
pub mod record;
pub mod timefmt;
pub mod units;

pub use aggregate::{aggregate, score_level, AggregateContext, AggregateResult, DisplayRow, ScoreLevel};
pub use filter::CoinFilter;
pub use record::TransferRecord;
pub use timefmt::{format_timestamp, parse_date, start_of_day, today_utc, DateError, TimeDisplay};

/// Token whose transfers feed the send/receive totals.
pub const REFERENCE_STABLECOIN: &str = "BSC-USD";

/// Function-name prefix of claim transactions that never count as activity.
pub const AIRDROP_MARKER: &str = "airdrop";

/// Fractional digits shown for amounts and gas in the transfer table.
pub const ROW_DECIMALS: usize = 12;
