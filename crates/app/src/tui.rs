//! ratatui front end driving the poller.

use std::io;
use std::time::Duration;

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table, Wrap};
use ratatui::Terminal;
use tokio::sync::watch;

use bscwatch_ledger::{AggregateResult, CoinFilter, DisplayRow, TimeDisplay};

use crate::fetch::{CycleReport, FetchRequest};
use crate::logging;
use crate::poller::{http_connector, PollEvent, Poller, PollerState, SHUTDOWN_GRACE};
use crate::report;
use crate::settings::{Settings, SettingsStore};

const UI_TICK: Duration = Duration::from_millis(100);
const LOG_PANEL_LIMIT: usize = 200;
const TABLE_PAGE_STEP: usize = 10;

#[derive(Clone, Copy, Debug)]
struct Theme {
    bg: Color,
    panel: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    warning: Color,
    danger: Color,
    success: Color,
}

const THEME: Theme = Theme {
    bg: Color::Rgb(0, 0, 0),
    panel: Color::Rgb(10, 10, 10),
    border: Color::Rgb(40, 40, 40),
    text: Color::Rgb(230, 230, 230),
    muted: Color::Rgb(100, 100, 100),
    accent: Color::Rgb(240, 185, 11),
    warning: Color::Rgb(255, 180, 0),
    danger: Color::Rgb(255, 60, 60),
    success: Color::Rgb(80, 200, 80),
};

fn style_base() -> Style {
    Style::default().fg(THEME.text).bg(THEME.bg)
}

fn style_panel() -> Style {
    Style::default().fg(THEME.text).bg(THEME.panel)
}

fn style_muted() -> Style {
    Style::default().fg(THEME.muted).bg(THEME.panel)
}

fn style_key() -> Style {
    Style::default()
        .fg(THEME.accent)
        .bg(THEME.panel)
        .add_modifier(Modifier::BOLD)
}

fn style_border() -> Style {
    Style::default().fg(THEME.border).bg(THEME.panel)
}

fn style_title() -> Style {
    Style::default()
        .fg(THEME.text)
        .bg(THEME.panel)
        .add_modifier(Modifier::BOLD)
}

fn style_error() -> Style {
    Style::default()
        .fg(THEME.danger)
        .bg(THEME.panel)
        .add_modifier(Modifier::BOLD)
}

fn style_ok() -> Style {
    Style::default().fg(THEME.success).bg(THEME.panel)
}

fn panel_block(title: impl Into<String>) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(style_border())
        .style(Style::default().bg(THEME.panel))
        .title(Span::styled(title.into(), style_title()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Field {
    BaseUrl,
    ApiKey,
    Address,
    Date,
    Coins,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::BaseUrl,
        Field::ApiKey,
        Field::Address,
        Field::Date,
        Field::Coins,
    ];

    fn label(self) -> &'static str {
        match self {
            Field::BaseUrl => "Web",
            Field::ApiKey => "API Key",
            Field::Address => "Address",
            Field::Date => "Date",
            Field::Coins => "Coin",
        }
    }

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|field| *field == self)
            .unwrap_or_default()
    }

    fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

pub struct TuiInit {
    pub store: SettingsStore,
    pub settings: Settings,
    pub request: FetchRequest,
    pub interval: Duration,
}

struct Status {
    message: String,
    error: bool,
}

struct TuiState {
    store: SettingsStore,
    settings: Settings,
    focus: Field,
    base_url: String,
    /// Replacement key being typed; empty keeps the saved key.
    api_key_input: String,
    address: String,
    date: String,
    coins: String,
    timeout: Duration,
    block_line: String,
    price_line: String,
    rows: Vec<DisplayRow>,
    summary: Option<AggregateResult>,
    table_offset: usize,
    status: Option<Status>,
    logs: Vec<logging::CapturedLog>,
}

impl TuiState {
    fn new(init: &TuiInit) -> Self {
        Self {
            store: init.store.clone(),
            settings: init.settings.clone(),
            focus: Field::Address,
            base_url: init.request.base_url.clone(),
            api_key_input: String::new(),
            address: init.settings.address.clone(),
            date: init.request.date.clone(),
            coins: init.request.coins.to_string(),
            timeout: init.request.timeout,
            block_line: report::block_height_line(None),
            price_line: report::price_line(None),
            rows: Vec::new(),
            summary: None,
            table_offset: 0,
            status: None,
            logs: Vec::new(),
        }
    }

    fn request(&self) -> FetchRequest {
        FetchRequest {
            base_url: self.base_url.trim().to_string(),
            api_key: self.settings.api_key.clone(),
            address: self.address.trim().to_string(),
            date: self.date.trim().to_string(),
            coins: CoinFilter::parse(&self.coins),
            time_display: TimeDisplay::from_local_flag(self.settings.use_local_time),
            timeout: self.timeout,
        }
    }

    fn set_status(&mut self, message: impl Into<String>, error: bool) {
        self.status = Some(Status {
            message: message.into(),
            error,
        });
    }

    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::BaseUrl => &mut self.base_url,
            Field::ApiKey => &mut self.api_key_input,
            Field::Address => &mut self.address,
            Field::Date => &mut self.date,
            Field::Coins => &mut self.coins,
        }
    }

    fn save_settings(&mut self) {
        match self.store.save(&self.settings) {
            Ok(()) => log_debug!("Settings saved to {}", self.store.path().display()),
            Err(err) => {
                log_error!("Settings save failed: {err}");
                self.set_status(format!("Settings save failed: {err}"), true);
            }
        }
    }

    /// Moves an edited API key or address into the settings file.
    fn commit_field(&mut self, field: Field) {
        match field {
            Field::ApiKey => {
                let key = self.api_key_input.trim().to_string();
                self.api_key_input.clear();
                if key.is_empty() || key == self.settings.api_key {
                    return;
                }
                self.settings.api_key = key;
                self.save_settings();
            }
            Field::Address => {
                let address = self.address.trim().to_string();
                if address == self.settings.address {
                    return;
                }
                self.settings.address = address;
                self.save_settings();
            }
            Field::BaseUrl | Field::Date | Field::Coins => {}
        }
    }

    fn toggle_local_time(&mut self) {
        self.settings.use_local_time = !self.settings.use_local_time;
        self.save_settings();
    }

    fn toggle_address_visible(&mut self) {
        self.settings.address_visible = !self.settings.address_visible;
        self.save_settings();
    }

    fn clear_table(&mut self) {
        self.rows.clear();
        self.table_offset = 0;
    }

    fn scroll(&mut self, delta: isize) {
        let max = self.rows.len().saturating_sub(1);
        self.table_offset = self.table_offset.saturating_add_signed(delta).min(max);
    }

    fn apply_event(&mut self, event: PollEvent) {
        match event {
            PollEvent::Report(report) => self.apply_report(*report),
            PollEvent::Stopped => self.set_status("Auto fetch stopped", false),
        }
    }

    fn apply_report(&mut self, report: CycleReport) {
        self.block_line = report::block_height_line(Some(&report.block_height));
        self.price_line = report::price_line(Some(&report.native_price));
        match report.transfers {
            Ok(mut result) => {
                self.rows = std::mem::take(&mut result.rows);
                self.table_offset = 0;
                let message = format!(
                    "Fetched {} transfers ({} skipped)",
                    self.rows.len(),
                    result.skipped
                );
                self.summary = Some(result);
                self.set_status(message, false);
            }
            Err(err) => self.set_status(err.to_string(), true),
        }
    }

    fn update_logs(&mut self, logs: Vec<logging::CapturedLog>) {
        self.logs = logs;
    }
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self, String> {
        enable_raw_mode().map_err(|err| err.to_string())?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide).map_err(|err| err.to_string())?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = execute!(stdout, Show, LeaveAlternateScreen);
    }
}

pub fn run_tui(
    init: TuiInit,
    shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), String> {
    logging::set_stderr_enabled(false);
    let _guard = match TerminalGuard::enter() {
        Ok(guard) => guard,
        Err(err) => {
            logging::set_stderr_enabled(true);
            return Err(err);
        }
    };
    let term_backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(term_backend).map_err(|err| err.to_string())?;
    terminal.clear().map_err(|err| err.to_string())?;

    let mut state = TuiState::new(&init);
    let mut poller = Poller::new(http_connector(), init.interval);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        while let Some(event) = poller.try_event() {
            state.apply_event(event);
        }
        state.update_logs(logging::capture_snapshot(LOG_PANEL_LIMIT));

        terminal
            .draw(|frame| draw(frame, &state, poller.state()))
            .map_err(|err| err.to_string())?;

        if event::poll(UI_TICK).map_err(|err| err.to_string())? {
            match event::read().map_err(|err| err.to_string())? {
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Press
                        && handle_key(key, &mut state, &mut poller, &shutdown_tx)
                    {
                        break;
                    }
                }
                Event::Resize(_, _) => {
                    terminal.clear().map_err(|err| err.to_string())?;
                }
                _ => {}
            }
        }
    }

    if !poller.shutdown(SHUTDOWN_GRACE) {
        log_warn!("Poller did not stop within {}ms", SHUTDOWN_GRACE.as_millis());
    }
    terminal.show_cursor().map_err(|err| err.to_string())?;
    logging::set_stderr_enabled(true);
    Ok(())
}

fn toggle_auto(state: &mut TuiState, poller: &mut Poller) {
    if poller.state() == PollerState::Running {
        poller.stop();
        state.set_status("Stopping auto fetch...", false);
        return;
    }
    state.commit_field(state.focus);
    match poller.start(state.request()) {
        Ok(()) => state.set_status(
            format!("Auto fetch every {}s", poller.interval().as_secs()),
            false,
        ),
        Err(err) => state.set_status(err.to_string(), true),
    }
}

fn manual_fetch(state: &mut TuiState, poller: &mut Poller) {
    state.commit_field(state.focus);
    match poller.run_once(state.request()) {
        Ok(()) => state.set_status("Fetching...", false),
        Err(err) => state.set_status(err.to_string(), true),
    }
}

/// Returns true when the UI should exit.
fn handle_key(
    key: KeyEvent,
    state: &mut TuiState,
    poller: &mut Poller,
    shutdown_tx: &watch::Sender<bool>,
) -> bool {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => {
            let _ = shutdown_tx.send(true);
            return true;
        }
        KeyCode::Char('c') | KeyCode::Char('q') if ctrl => {
            let _ = shutdown_tx.send(true);
            return true;
        }
        KeyCode::F(2) => toggle_auto(state, poller),
        KeyCode::Char('a') if ctrl => toggle_auto(state, poller),
        KeyCode::F(5) => manual_fetch(state, poller),
        KeyCode::Char('r') if ctrl => manual_fetch(state, poller),
        KeyCode::F(6) => state.clear_table(),
        KeyCode::Char('l') if ctrl => state.clear_table(),
        KeyCode::F(7) => {
            state.toggle_local_time();
            poller.update(state.request());
        }
        KeyCode::Char('t') if ctrl => {
            state.toggle_local_time();
            poller.update(state.request());
        }
        KeyCode::F(8) => state.toggle_address_visible(),
        KeyCode::Char('s') if ctrl => {
            state.status = None;
            state.commit_field(state.focus);
            state.save_settings();
            if state.status.is_none() {
                state.set_status(
                    format!("Settings saved to {}", state.store.path().display()),
                    false,
                );
            }
            poller.update(state.request());
        }
        KeyCode::Char('u') if ctrl => state.field_mut(state.focus).clear(),
        KeyCode::Tab | KeyCode::Enter => {
            state.commit_field(state.focus);
            if key.code == KeyCode::Tab {
                state.focus = state.focus.next();
            }
            poller.update(state.request());
        }
        KeyCode::BackTab => {
            state.commit_field(state.focus);
            state.focus = state.focus.prev();
            poller.update(state.request());
        }
        KeyCode::Up => state.scroll(-1),
        KeyCode::Down => state.scroll(1),
        KeyCode::PageUp => state.scroll(-(TABLE_PAGE_STEP as isize)),
        KeyCode::PageDown => state.scroll(TABLE_PAGE_STEP as isize),
        KeyCode::Backspace => {
            state.field_mut(state.focus).pop();
        }
        KeyCode::Char(ch) if !ctrl => state.field_mut(state.focus).push(ch),
        _ => {}
    }
    false
}

fn input_with_cursor(value: &str, focused: bool) -> String {
    if focused {
        format!("{value}_")
    } else {
        value.to_string()
    }
}

fn masked(value: &str) -> String {
    "*".repeat(value.chars().count())
}

fn field_text(state: &TuiState, field: Field) -> String {
    let focused = state.focus == field;
    let value = match field {
        Field::BaseUrl => state.base_url.clone(),
        Field::ApiKey if state.api_key_input.is_empty() => masked(&state.settings.api_key),
        Field::ApiKey => masked(&state.api_key_input),
        Field::Address if !state.settings.address_visible => masked(&state.address),
        Field::Address => state.address.clone(),
        Field::Date => state.date.clone(),
        Field::Coins => state.coins.clone(),
    };
    input_with_cursor(&value, focused)
}

fn draw(frame: &mut ratatui::Frame<'_>, state: &TuiState, poller_state: PollerState) {
    let area = frame.area();
    frame.render_widget(Block::default().style(style_base()), area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(1),
        ])
        .split(area);

    draw_form(frame, state, chunks[0]);
    draw_summary(frame, state, poller_state, chunks[1]);
    draw_table(frame, state, chunks[2]);
    draw_logs(frame, state, chunks[3]);
    draw_keys(frame, poller_state, chunks[4]);
}

fn draw_form(frame: &mut ratatui::Frame<'_>, state: &TuiState, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    for field in Field::ALL {
        let focused = state.focus == field;
        let value_style = if focused { style_key() } else { style_panel() };
        let mut spans = vec![
            Span::styled(format!("{:<8}", field.label()), style_muted()),
            Span::raw(" "),
            Span::styled(field_text(state, field), value_style),
        ];
        if field == Field::Address {
            let shown = if state.settings.address_visible {
                "  [shown]"
            } else {
                "  [hidden]"
            };
            spans.push(Span::styled(shown, style_muted()));
        }
        lines.push(Line::from(spans));
    }
    let time_display = TimeDisplay::from_local_flag(state.settings.use_local_time);
    lines.push(Line::from(vec![
        Span::styled(format!("{:<8}", "Time"), style_muted()),
        Span::raw(" "),
        Span::raw(time_display.label()),
    ]));

    let widget = Paragraph::new(lines)
        .block(panel_block("Settings"))
        .style(style_panel());
    frame.render_widget(widget, area);
}

fn draw_summary(
    frame: &mut ratatui::Frame<'_>,
    state: &TuiState,
    poller_state: PollerState,
    area: Rect,
) {
    let summary = state.summary.as_ref();
    let auto = match poller_state {
        PollerState::Running => Span::styled("running", style_ok()),
        PollerState::Idle => Span::styled("idle", style_muted()),
    };
    let mut lines = vec![
        Line::from(vec![
            Span::raw(state.block_line.clone()),
            Span::raw("    "),
            Span::raw(state.price_line.clone()),
            Span::raw("    "),
            Span::styled("Auto:", style_muted()),
            Span::raw(" "),
            auto,
        ]),
        Line::raw(report::summary_line(summary)),
        Line::raw(report::gas_line(summary)),
        Line::raw(report::total_profit_line(summary)),
    ];
    if let Some(status) = state.status.as_ref() {
        let style = if status.error {
            style_error()
        } else {
            style_ok()
        };
        lines.push(Line::from(vec![
            Span::styled("Status:", style_muted()),
            Span::raw(" "),
            Span::styled(status.message.clone(), style),
        ]));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(panel_block("Summary"))
        .style(style_panel());
    frame.render_widget(widget, area);
}

fn draw_table(frame: &mut ratatui::Frame<'_>, state: &TuiState, area: Rect) {
    let header = Row::new(report::COLUMNS.map(|title| Cell::from(title).style(style_title())));
    let visible = usize::from(area.height.saturating_sub(3));
    let rows: Vec<Row> = state
        .rows
        .iter()
        .skip(state.table_offset)
        .take(visible)
        .map(|row| {
            let value_style = if row.value.starts_with('-') {
                Style::default().fg(THEME.warning).bg(THEME.panel)
            } else {
                style_panel()
            };
            Row::new(vec![
                Cell::from(row.timestamp.clone()),
                Cell::from(row.symbol.clone()),
                Cell::from(row.value.clone()).style(value_style),
                Cell::from(row.gas.clone()).style(style_muted()),
                Cell::from(row.transaction_index.clone()),
            ])
        })
        .collect();
    let title = if state.rows.is_empty() {
        "Transfers".to_string()
    } else {
        format!(
            "Transfers ({}-{} of {})",
            state.table_offset + 1,
            (state.table_offset + visible).min(state.rows.len()),
            state.rows.len()
        )
    };
    let widths = [
        Constraint::Length(19),
        Constraint::Length(14),
        Constraint::Min(22),
        Constraint::Min(22),
        Constraint::Length(17),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .column_spacing(2)
        .block(panel_block(title))
        .style(style_panel());
    frame.render_widget(table, area);
}

fn draw_logs(frame: &mut ratatui::Frame<'_>, state: &TuiState, area: Rect) {
    let capacity = usize::from(area.height.saturating_sub(2));
    let start = state.logs.len().saturating_sub(capacity);
    let lines: Vec<Line> = state.logs[start..]
        .iter()
        .map(|entry| {
            Line::from(vec![
                Span::styled(entry.clock(), style_muted()),
                Span::raw(" "),
                Span::styled(format!("{:<5}", entry.level.as_str()), log_level_style(entry.level)),
                Span::raw(" "),
                Span::raw(sanitize_log_message(&entry.msg)),
            ])
        })
        .collect();
    let widget = Paragraph::new(lines)
        .block(panel_block("Logs"))
        .style(style_panel());
    frame.render_widget(widget, area);
}

fn draw_keys(frame: &mut ratatui::Frame<'_>, poller_state: PollerState, area: Rect) {
    let auto_label = match poller_state {
        PollerState::Running => " stop  ",
        PollerState::Idle => " auto start  ",
    };
    let line = Line::from(vec![
        Span::styled("Tab", style_key()),
        Span::raw(" field  "),
        Span::styled("F2", style_key()),
        Span::raw(auto_label),
        Span::styled("F5", style_key()),
        Span::raw(" manual  "),
        Span::styled("F6", style_key()),
        Span::raw(" clear  "),
        Span::styled("F7", style_key()),
        Span::raw(" local time  "),
        Span::styled("F8", style_key()),
        Span::raw(" show address  "),
        Span::styled("Ctrl+S", style_key()),
        Span::raw(" save  "),
        Span::styled("Esc", style_key()),
        Span::raw(" quit"),
    ]);
    frame.render_widget(Paragraph::new(line).style(style_panel()), area);
}

fn log_level_style(level: logging::Level) -> Style {
    match level {
        logging::Level::Error => style_error(),
        logging::Level::Warn => Style::default()
            .fg(THEME.warning)
            .bg(THEME.panel)
            .add_modifier(Modifier::BOLD),
        logging::Level::Info => style_panel(),
        logging::Level::Debug | logging::Level::Trace => style_muted(),
    }
}

fn sanitize_log_message(msg: &str) -> String {
    let mut out = String::with_capacity(msg.len());
    for ch in msg.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use bscwatch_ledger::{aggregate, AggregateContext, TransferRecord};

    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use crate::fetch::tests::FakeExplorer;
    use crate::fetch::{CycleError, FetchState, InputError};
    use crate::poller::{Connector, DEFAULT_INTERVAL};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(ch: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
    }

    fn fixture(dir: &tempfile::TempDir) -> (TuiState, Poller, watch::Sender<bool>, watch::Receiver<bool>) {
        let store = SettingsStore::new(dir.path().join("api_key.json"));
        let settings = Settings {
            api_key: "OLDKEY".to_string(),
            address: "0xabc".to_string(),
            ..Settings::default()
        };
        let init = TuiInit {
            store,
            settings,
            request: FetchRequest {
                date: "20240101".to_string(),
                ..FetchRequest::default()
            },
            interval: DEFAULT_INTERVAL,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            TuiState::new(&init),
            Poller::new(http_connector(), init.interval),
            shutdown_tx,
            shutdown_rx,
        )
    }

    fn type_text(text: &str, state: &mut TuiState, poller: &mut Poller, tx: &watch::Sender<bool>) {
        for ch in text.chars() {
            assert!(!handle_key(key(KeyCode::Char(ch)), state, poller, tx));
        }
    }

    #[test]
    fn tab_cycles_through_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, _rx) = fixture(&dir);
        assert_eq!(state.focus, Field::Address);
        for expected in [Field::Date, Field::Coins, Field::BaseUrl, Field::ApiKey, Field::Address] {
            handle_key(key(KeyCode::Tab), &mut state, &mut poller, &tx);
            assert_eq!(state.focus, expected);
        }
        handle_key(key(KeyCode::BackTab), &mut state, &mut poller, &tx);
        assert_eq!(state.focus, Field::ApiKey);
    }

    #[test]
    fn api_key_is_masked_and_saved_on_commit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, _rx) = fixture(&dir);
        state.focus = Field::ApiKey;
        assert_eq!(field_text(&state, Field::ApiKey), "******_");

        type_text("NEW", &mut state, &mut poller, &tx);
        assert_eq!(field_text(&state, Field::ApiKey), "***_");
        handle_key(key(KeyCode::Enter), &mut state, &mut poller, &tx);

        assert_eq!(state.settings.api_key, "NEW");
        assert!(state.api_key_input.is_empty());
        let saved = state.store.load().expect("load");
        assert_eq!(saved.api_key, "NEW");
        assert_eq!(state.request().api_key, "NEW");
    }

    #[test]
    fn leaving_api_key_empty_keeps_saved_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, _rx) = fixture(&dir);
        state.focus = Field::ApiKey;
        handle_key(key(KeyCode::Tab), &mut state, &mut poller, &tx);
        assert_eq!(state.settings.api_key, "OLDKEY");
        assert!(!state.store.path().exists());
    }

    #[test]
    fn address_edits_are_persisted_and_maskable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, _rx) = fixture(&dir);
        handle_key(ctrl('u'), &mut state, &mut poller, &tx);
        type_text("0xdef", &mut state, &mut poller, &tx);
        handle_key(key(KeyCode::Backspace), &mut state, &mut poller, &tx);
        handle_key(key(KeyCode::Tab), &mut state, &mut poller, &tx);
        assert_eq!(state.settings.address, "0xde");

        handle_key(key(KeyCode::F(8)), &mut state, &mut poller, &tx);
        assert_eq!(field_text(&state, Field::Address), "****");
        let saved = state.store.load().expect("load");
        assert_eq!(saved.address, "0xde");
        assert!(!saved.address_visible);
    }

    #[test]
    fn local_time_toggle_changes_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, _rx) = fixture(&dir);
        assert_eq!(state.request().time_display, TimeDisplay::Utc);
        handle_key(key(KeyCode::F(7)), &mut state, &mut poller, &tx);
        assert_eq!(state.request().time_display, TimeDisplay::Local);
        assert!(state.store.load().expect("load").use_local_time);
    }

    /// Connector that records the time display of every cycle's snapshot.
    fn recording_connector() -> (Connector, Arc<Mutex<Vec<TimeDisplay>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let connector: Connector = Arc::new(move |request: &FetchRequest| {
            sink.lock().expect("lock").push(request.time_display);
            Box::new(FakeExplorer::healthy()) as Box<dyn bscwatch_explorer::Explorer>
        });
        (connector, seen)
    }

    fn wait_for_display(seen: &Mutex<Vec<TimeDisplay>>, wanted: TimeDisplay) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if seen.lock().expect("lock").last() == Some(&wanted) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn local_time_toggle_reaches_running_loop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, _idle, tx, _rx) = fixture(&dir);
        let (connector, seen) = recording_connector();
        let mut poller = Poller::new(connector, Duration::from_millis(50));

        handle_key(key(KeyCode::F(2)), &mut state, &mut poller, &tx);
        assert_eq!(poller.state(), PollerState::Running);
        assert!(wait_for_display(&seen, TimeDisplay::Utc));

        handle_key(key(KeyCode::F(7)), &mut state, &mut poller, &tx);
        assert!(wait_for_display(&seen, TimeDisplay::Local));

        handle_key(ctrl('t'), &mut state, &mut poller, &tx);
        assert!(wait_for_display(&seen, TimeDisplay::Utc));
        assert!(poller.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn saving_settings_refreshes_running_loop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, _idle, tx, _rx) = fixture(&dir);
        let (connector, seen) = recording_connector();
        let mut poller = Poller::new(connector, Duration::from_millis(50));

        handle_key(key(KeyCode::F(2)), &mut state, &mut poller, &tx);
        assert!(wait_for_display(&seen, TimeDisplay::Utc));

        state.settings.use_local_time = true;
        handle_key(ctrl('s'), &mut state, &mut poller, &tx);
        assert!(wait_for_display(&seen, TimeDisplay::Local));
        assert!(state.store.load().expect("load").use_local_time);
        assert!(poller.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn report_fills_table_and_clear_empties_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, _rx) = fixture(&dir);
        let records = vec![
            TransferRecord {
                token_symbol: Some("BSC-USD".to_string()),
                value: Some("100".to_string()),
                token_decimal: Some("0".to_string()),
                from: Some("0xabc".to_string()),
                to: Some("0xother".to_string()),
                ..TransferRecord::default()
            };
            3
        ];
        let result = aggregate(&records, &AggregateContext::new("0xabc"));
        state.apply_event(PollEvent::Report(Box::new(CycleReport {
            block_height: Ok(41_000_000),
            native_price: Err(CycleError::Input(InputError::MissingApiKey)),
            transfers: Ok(result),
            state: FetchState::default(),
        })));

        assert_eq!(state.rows.len(), 3);
        assert_eq!(state.block_line, "BNB block height: 41000000");
        assert_eq!(state.price_line, "BNB USD: Error (API key is required)");
        assert!(report::summary_line(state.summary.as_ref()).starts_with("Send: -300.00"));

        handle_key(key(KeyCode::Down), &mut state, &mut poller, &tx);
        handle_key(key(KeyCode::PageDown), &mut state, &mut poller, &tx);
        assert_eq!(state.table_offset, 2);

        handle_key(key(KeyCode::F(6)), &mut state, &mut poller, &tx);
        assert!(state.rows.is_empty());
        assert_eq!(state.table_offset, 0);
        assert!(state.summary.is_some());
    }

    #[test]
    fn failed_listing_keeps_previous_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, _poller, _tx, _rx) = fixture(&dir);
        state.rows.push(DisplayRow {
            timestamp: String::new(),
            symbol: "CAKE".to_string(),
            value: "1.000000000000".to_string(),
            gas: "0.000000000000".to_string(),
            transaction_index: "1".to_string(),
        });
        state.apply_report(CycleReport {
            block_height: Ok(1),
            native_price: Ok(1.0),
            transfers: Err(CycleError::Input(InputError::MissingAddress)),
            state: FetchState::default(),
        });
        assert_eq!(state.rows.len(), 1);
        let status = state.status.as_ref().expect("status");
        assert!(status.error);
        assert_eq!(status.message, "address is required");
    }

    #[test]
    fn escape_requests_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, rx) = fixture(&dir);
        assert!(!*rx.borrow());
        assert!(handle_key(key(KeyCode::Esc), &mut state, &mut poller, &tx));
        assert!(*rx.borrow());
    }

    #[test]
    fn control_keys_do_not_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut state, mut poller, tx, _rx) = fixture(&dir);
        state.focus = Field::Coins;
        handle_key(ctrl('l'), &mut state, &mut poller, &tx);
        assert_eq!(state.coins, "");
        type_text("cake", &mut state, &mut poller, &tx);
        assert!(state.request().coins.allows("CAKE"));
    }

    #[test]
    fn log_messages_are_single_line() {
        assert_eq!(sanitize_log_message("a\nb\tc"), "a\\nb\\tc");
    }
}
