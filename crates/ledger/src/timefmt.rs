use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};

const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_INPUT_FORMAT: &str = "%Y%m%d";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TimeDisplay {
    #[default]
    Utc,
    Local,
}

impl TimeDisplay {
    pub fn from_local_flag(use_local_time: bool) -> Self {
        if use_local_time {
            Self::Local
        } else {
            Self::Utc
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Utc => "UTC",
            Self::Local => "local",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DateError {
    Format(String),
    Nonexistent(String),
    BeforeEpoch(String),
}

impl fmt::Display for DateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateError::Format(raw) => write!(f, "invalid date '{raw}' (expected YYYYMMDD)"),
            DateError::Nonexistent(raw) => write!(f, "date '{raw}' has no local midnight"),
            DateError::BeforeEpoch(raw) => write!(f, "date '{raw}' is not after 1970-01-01"),
        }
    }
}

impl std::error::Error for DateError {}

/// Renders Unix seconds as `YYYY-MM-DD HH:MM:SS`; `None` when the text is not
/// an integer or is out of chrono's range.
pub fn format_timestamp(raw: &str, display: TimeDisplay) -> Option<String> {
    let secs = raw.trim().parse::<i64>().ok()?;
    let utc = DateTime::<Utc>::from_timestamp(secs, 0)?;
    let text = match display {
        TimeDisplay::Utc => utc.format(ROW_TIME_FORMAT).to_string(),
        TimeDisplay::Local => utc.with_timezone(&Local).format(ROW_TIME_FORMAT).to_string(),
    };
    Some(text)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, DateError> {
    let trimmed = raw.trim();
    if trimmed.len() != 8 {
        return Err(DateError::Format(raw.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, DATE_INPUT_FORMAT)
        .map_err(|_| DateError::Format(raw.to_string()))
}

/// Unix seconds of midnight at the start of `raw` (`YYYYMMDD`) in `tz`.
pub fn start_of_day<Tz: TimeZone>(raw: &str, tz: &Tz) -> Result<i64, DateError> {
    let date = parse_date(raw)?;
    let midnight = date.and_time(NaiveTime::MIN);
    let local = tz
        .from_local_datetime(&midnight)
        .earliest()
        .ok_or_else(|| DateError::Nonexistent(raw.to_string()))?;
    let secs = local.timestamp();
    if secs <= 0 {
        return Err(DateError::BeforeEpoch(raw.to_string()));
    }
    Ok(secs)
}

/// Today's date as `YYYYMMDD` in UTC, the default for the date field.
pub fn today_utc() -> String {
    Utc::now().format(DATE_INPUT_FORMAT).to_string()
}
