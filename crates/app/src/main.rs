use bscwatch_log as logging;

macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if crate::logging::enabled($level) {
            crate::logging::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

macro_rules! log_error {
    ($($arg:tt)*) => {{
        log_at!(crate::logging::Level::Error, $($arg)*);
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        log_at!(crate::logging::Level::Warn, $($arg)*);
    }};
}

macro_rules! log_info {
    ($($arg:tt)*) => {{
        log_at!(crate::logging::Level::Info, $($arg)*);
    }};
}

macro_rules! log_debug {
    ($($arg:tt)*) => {{
        log_at!(crate::logging::Level::Debug, $($arg)*);
    }};
}

pub mod fetch;
pub mod poller;
pub mod report;
pub mod settings;
mod tui;

use std::path::PathBuf;
use std::time::Duration;

use bscwatch_explorer::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use bscwatch_ledger::{parse_date, today_utc, CoinFilter, TimeDisplay};
use tokio::sync::watch;

use crate::fetch::{run_cycle, CycleReport, FetchRequest, FetchState};
use crate::poller::{http_connector, PollEvent, Poller};
use crate::settings::{Settings, SettingsStore, DEFAULT_SETTINGS_FILE};

const DEFAULT_INTERVAL_SECS: u64 = 10;
const LOG_CAPTURE_LINES: usize = 2048;

struct Config {
    settings_path: PathBuf,
    base_url: String,
    date: Option<String>,
    coins: String,
    interval_secs: u64,
    timeout_secs: u64,
    watch: bool,
    tui: bool,
    log_level: logging::Level,
    log_format: logging::Format,
    log_timestamps: bool,
}

enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub fn run_entry(default_tui: bool) -> Result<(), String> {
    let cli = parse_args(default_tui)?;
    match cli {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("bscwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config),
    }
}

fn run_with_config(config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    let store = SettingsStore::new(config.settings_path.clone());
    let settings = load_settings(&store);
    let request = build_request(&config, &settings);
    log_info!(
        "Startup: begin (tui={}, settings={}, base_url={})",
        config.tui,
        store.path().display(),
        request.base_url
    );

    if config.tui {
        logging::enable_capture(LOG_CAPTURE_LINES);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        return tui::run_tui(
            tui::TuiInit {
                store,
                settings,
                request,
                interval: Duration::from_secs(config.interval_secs),
            },
            shutdown_rx,
            shutdown_tx,
        );
    }

    if config.watch {
        run_watch(request, Duration::from_secs(config.interval_secs))
    } else {
        run_once(request)
    }
}

/// A malformed settings file is not fatal; the defaults stand in for it.
fn load_settings(store: &SettingsStore) -> Settings {
    match store.load() {
        Ok(settings) => settings,
        Err(err) => {
            log_warn!("Settings: {err}; using defaults");
            Settings::default()
        }
    }
}

fn build_request(config: &Config, settings: &Settings) -> FetchRequest {
    FetchRequest {
        base_url: config.base_url.clone(),
        api_key: settings.api_key.clone(),
        address: settings.address.clone(),
        date: config.date.clone().unwrap_or_else(today_utc),
        coins: CoinFilter::parse(&config.coins),
        time_display: TimeDisplay::from_local_flag(settings.use_local_time),
        timeout: Duration::from_secs(config.timeout_secs),
    }
}

fn run_once(request: FetchRequest) -> Result<(), String> {
    let explorer = request.connect();
    let mut state = FetchState::default();
    let report = run_cycle(&explorer, &request, &mut state);
    print_report(&report);
    match report.transfers {
        Ok(_) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}

/// Repeats the cycle on the poller until the process is interrupted.
fn run_watch(request: FetchRequest, interval: Duration) -> Result<(), String> {
    let mut poller = Poller::new(http_connector(), interval);
    poller.start(request).map_err(|err| err.to_string())?;
    loop {
        match poller.events().recv() {
            Ok(PollEvent::Report(report)) => print_report(&report),
            Ok(PollEvent::Stopped) | Err(_) => return Ok(()),
        }
    }
}

fn print_report(report: &CycleReport) {
    println!("{}", report::block_height_line(Some(&report.block_height)));
    println!("{}", report::price_line(Some(&report.native_price)));
    match &report.transfers {
        Ok(result) => {
            print!("{}", report::render_table(&result.rows));
            println!("{}", report::summary_line(Some(result)));
            println!("{}", report::gas_line(Some(result)));
            println!("{}", report::total_profit_line(Some(result)));
        }
        Err(err) => println!("Transfers: Error ({err})"),
    }
}

fn parse_args(default_tui: bool) -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1), default_tui)
}

fn parse_args_from<I>(raw_args: I, default_tui: bool) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut settings_path = PathBuf::from(DEFAULT_SETTINGS_FILE);
    let mut base_url = DEFAULT_BASE_URL.to_string();
    let mut date: Option<String> = None;
    let mut coins = String::new();
    let mut interval_secs = DEFAULT_INTERVAL_SECS;
    let mut timeout_secs = DEFAULT_TIMEOUT_SECS;
    let mut watch = false;
    let mut tui = default_tui;
    let mut log_level = logging::Level::Info;
    let mut log_format = logging::Format::Text;
    let mut log_timestamps = true;
    let mut args = raw_args.into_iter().peekable();

    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            _ => {}
        }
    }
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --settings\n{}", usage()))?;
                settings_path = PathBuf::from(value);
            }
            "--base-url" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --base-url\n{}", usage()))?;
                let trimmed = value.trim();
                if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                    return Err(format!(
                        "invalid base url '{value}' (expected http:// or https://)\n{}",
                        usage()
                    ));
                }
                base_url = trimmed.to_string();
            }
            "--date" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --date\n{}", usage()))?;
                parse_date(&value).map_err(|err| format!("{err}\n{}", usage()))?;
                date = Some(value.trim().to_string());
            }
            "--coins" => {
                coins = args
                    .next()
                    .ok_or_else(|| format!("missing value for --coins\n{}", usage()))?;
            }
            "--interval" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --interval\n{}", usage()))?;
                interval_secs = value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs >= 1)
                    .ok_or_else(|| format!("invalid interval '{value}' (expected >= 1)\n{}", usage()))?;
            }
            "--timeout" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --timeout\n{}", usage()))?;
                timeout_secs = value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs >= 1)
                    .ok_or_else(|| format!("invalid timeout '{value}' (expected >= 1)\n{}", usage()))?;
            }
            "--watch" => watch = true,
            "--tui" => tui = true,
            "--no-tui" => tui = false,
            "--log-level" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = logging::Level::parse(&value).ok_or_else(|| {
                    format!(
                        "invalid log level '{value}' (expected error|warn|info|debug|trace)\n{}",
                        usage()
                    )
                })?;
            }
            "--log-format" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = logging::Format::parse(&value).ok_or_else(|| {
                    format!("invalid log format '{value}' (expected text|json)\n{}", usage())
                })?;
            }
            "--log-timestamps" => log_timestamps = true,
            "--no-log-timestamps" => log_timestamps = false,
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            other => return Err(format!("unknown argument '{other}'\n{}", usage())),
        }
    }

    Ok(CliAction::Run(Config {
        settings_path,
        base_url,
        date,
        coins,
        interval_secs,
        timeout_secs,
        watch,
        tui,
        log_level,
        log_format,
        log_timestamps,
    }))
}

fn usage() -> String {
    [
        "Usage:",
        "  bscwatch [options]",
        "  bscwatch <command>",
        "  bscwatch-cli [options]",
        "",
        "Commands:",
        "  help     Print this help and exit",
        "  version  Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --settings <path>  Settings file (default: api_key.json)",
        "  --base-url <url>  Explorer API endpoint (default: https://api.bscscan.com/api)",
        "  --date <YYYYMMDD>  List transfers from this day's first block (default: today, UTC)",
        "  --coins <list>  Comma-separated token symbols to keep (default: all)",
        "  --interval <secs>  Seconds between automatic fetches (default: 10)",
        "  --timeout <secs>  HTTP request timeout (default: 30)",
        "  --watch  Headless: repeat the fetch every --interval seconds until interrupted",
        "  --tui  Run the terminal UI (default for bscwatch)",
        "  --no-tui  Print one report and exit (default for bscwatch-cli)",
        "  --log-level  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --log-timestamps  Enable timestamps in text logs (default: on)",
        "  --no-log-timestamps  Disable timestamps in text logs",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str], default_tui: bool) -> Result<CliAction, String> {
        parse_args_from(args.iter().map(|arg| arg.to_string()), default_tui)
    }

    fn config(args: &[&str]) -> Config {
        match parse(args, false).expect("parse") {
            CliAction::Run(config) => config,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn defaults() {
        let config = config(&[]);
        assert_eq!(config.settings_path, PathBuf::from("api_key.json"));
        assert_eq!(config.base_url, "https://api.bscscan.com/api");
        assert_eq!(config.date, None);
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.timeout_secs, 30);
        assert!(!config.watch);
        assert!(!config.tui);
        assert_eq!(config.log_level, logging::Level::Info);
        assert!(config.log_timestamps);
    }

    #[test]
    fn default_tui_follows_binary() {
        match parse(&[], true).expect("parse") {
            CliAction::Run(config) => assert!(config.tui),
            _ => panic!("expected run"),
        }
        match parse(&["--no-tui"], true).expect("parse") {
            CliAction::Run(config) => assert!(!config.tui),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn commands_and_flags() {
        assert!(matches!(parse(&["help"], false), Ok(CliAction::PrintHelp)));
        assert!(matches!(parse(&["version"], false), Ok(CliAction::PrintVersion)));
        assert!(matches!(parse(&["--watch", "-h"], false), Ok(CliAction::PrintHelp)));
        assert!(matches!(parse(&["-V"], false), Ok(CliAction::PrintVersion)));
    }

    #[test]
    fn full_option_set() {
        let config = config(&[
            "--settings",
            "/tmp/bscwatch.json",
            "--base-url",
            "http://localhost:8080/api",
            "--date",
            "20240101",
            "--coins",
            "bsc-usd,cake",
            "--interval",
            "30",
            "--timeout",
            "5",
            "--watch",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--no-log-timestamps",
        ]);
        assert_eq!(config.settings_path, PathBuf::from("/tmp/bscwatch.json"));
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert_eq!(config.date.as_deref(), Some("20240101"));
        assert_eq!(config.coins, "bsc-usd,cake");
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.timeout_secs, 5);
        assert!(config.watch);
        assert_eq!(config.log_level, logging::Level::Debug);
        assert_eq!(config.log_format, logging::Format::Json);
        assert!(!config.log_timestamps);
    }

    #[test]
    fn invalid_values_report_usage() {
        for args in [
            &["--interval", "0"][..],
            &["--interval", "soon"][..],
            &["--timeout", "-1"][..],
            &["--date", "2024-01-01"][..],
            &["--base-url", "ftp://example"][..],
            &["--log-level", "loud"][..],
            &["--settings"][..],
            &["--frobnicate"][..],
        ] {
            let err = match parse(args, false) {
                Err(err) => err,
                Ok(_) => panic!("{args:?} should fail"),
            };
            assert!(err.contains("Usage:"), "{args:?}: {err}");
        }
    }

    #[test]
    fn request_combines_flags_and_settings() {
        let config = config(&["--coins", "cake", "--date", "20240301", "--timeout", "7"]);
        let settings = Settings {
            api_key: "KEY".to_string(),
            address: "0xabc".to_string(),
            use_local_time: true,
            ..Settings::default()
        };
        let request = build_request(&config, &settings);
        assert_eq!(request.api_key, "KEY");
        assert_eq!(request.address, "0xabc");
        assert_eq!(request.date, "20240301");
        assert!(request.coins.allows("CAKE"));
        assert!(!request.coins.allows("BSC-USD"));
        assert_eq!(request.time_display, TimeDisplay::Local);
        assert_eq!(request.timeout, Duration::from_secs(7));
    }

    #[test]
    fn malformed_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("api_key.json");
        std::fs::write(&path, "[1, 2").expect("write");
        let settings = load_settings(&SettingsStore::new(path));
        assert_eq!(settings, Settings::default());
    }
}
