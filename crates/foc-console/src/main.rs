use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use foc_client::{
    events_url, height_targets, peer_targets, run_event_stream, spawn_dispatch,
    spawn_height_cycle, spawn_peer_refresh, spawn_roster_load, AgentService, BulkCommand,
    ClientEvent, ControlPlane,
};
use foc_core::{
    derive_rows, sort_rows, Agent, AgentId, ColumnKey, ColumnOrder, EnvId, Height, HeightMap,
    PeerMetricsMap, Row, Selection, SortDirection, SortSpec,
};
use futures_util::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row as TableRow, Table, TableState},
    Terminal,
};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    io,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONTROL_PLANE_URL: &str = "http://localhost:1234";
const DEFAULT_REFRESH_SECS: u64 = 10;
const MIN_REFRESH_SECS: u64 = 1;
const CLIENT_EVENT_CAPACITY: usize = 256;
const EVENTS_PANE_ROWS: u16 = 9;
const EVENTS_SCROLL_STEP: usize = 5;
const STATUS_DETAIL_WIDTH: usize = 60;

#[derive(Parser, Debug)]
#[command(name = "foc-console")]
struct Args {
    /// Control plane base address; falls back to FOC_CONTROL_PLANE_URL.
    #[arg(long, default_value = "")]
    url: String,
    /// Height poll interval in seconds; falls back to FOC_REFRESH_RATE.
    #[arg(long, default_value_t = 0)]
    refresh_rate: u64,
}

#[derive(Clone, Debug)]
struct Config {
    control_plane_url: String,
    refresh_secs: u64,
}

fn resolve_control_plane_url(arg: &str) -> String {
    if !arg.trim().is_empty() {
        return arg.trim().trim_end_matches('/').to_string();
    }
    if let Ok(value) = std::env::var("FOC_CONTROL_PLANE_URL") {
        if !value.trim().is_empty() {
            return value.trim().trim_end_matches('/').to_string();
        }
    }
    DEFAULT_CONTROL_PLANE_URL.to_string()
}

fn resolve_refresh_secs(arg: u64) -> u64 {
    let configured = if arg > 0 {
        arg
    } else {
        std::env::var("FOC_REFRESH_RATE")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_REFRESH_SECS)
    };
    configured.max(MIN_REFRESH_SECS)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("FOC_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

const ACTIONS: [ActionKind; 5] = [
    ActionKind::Kill,
    ActionKind::Status,
    ActionKind::Tps,
    ActionKind::SetLogLevel,
    ActionKind::SetNodeVerbosity,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    Kill,
    Status,
    Tps,
    SetLogLevel,
    SetNodeVerbosity,
}

impl ActionKind {
    fn label(self) -> &'static str {
        match self {
            ActionKind::Kill => "kill",
            ActionKind::Status => "status",
            ActionKind::Tps => "tps",
            ActionKind::SetLogLevel => "set log level",
            ActionKind::SetNodeVerbosity => "set node verbosity",
        }
    }

    fn prompt(self) -> Option<&'static str> {
        match self {
            ActionKind::SetLogLevel => Some("Log level"),
            ActionKind::SetNodeVerbosity => Some("Verbosity"),
            _ => None,
        }
    }
}

/// Turn a chosen action and its (single, shared) secondary input into the
/// command issued to every selected agent. `None` means the dispatch is
/// skipped outright: an empty level or non-numeric verbosity cannot be
/// valid for any agent, and no default is substituted.
fn build_command(action: ActionKind, input: &str) -> Option<BulkCommand> {
    match action {
        ActionKind::Kill => Some(BulkCommand::Kill),
        ActionKind::Status => Some(BulkCommand::Status),
        ActionKind::Tps => Some(BulkCommand::Tps),
        ActionKind::SetLogLevel => {
            let level = input.trim();
            if level.is_empty() {
                None
            } else {
                Some(BulkCommand::SetLogLevel(level.to_string()))
            }
        }
        ActionKind::SetNodeVerbosity => input
            .trim()
            .parse::<u8>()
            .ok()
            .map(BulkCommand::SetNodeVerbosity),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Overlay {
    None,
    Help,
    ActionMenu { cursor: usize },
    Prompt { action: ActionKind, buffer: String },
    Confirm { command: BulkCommand },
}

#[derive(Debug, Clone)]
struct EventEntry {
    received_at: DateTime<Utc>,
    value: Value,
}

struct App {
    config: Config,
    agents: Vec<Agent>,
    roster_loaded: bool,
    env_networks: HashMap<EnvId, String>,
    heights: HeightMap,
    peer_metrics: PeerMetricsMap,
    selection: Selection,
    columns: ColumnOrder,
    sort: SortSpec,
    row_cursor: usize,
    col_cursor: usize,
    drag_from: Option<usize>,
    refresh_secs: u64,
    events: Vec<EventEntry>,
    events_offset: usize,
    stream_closed: bool,
    dispatching: bool,
    overlay: Overlay,
    status_note: Option<String>,
    // Work requests picked up by the driver loop; network tasks are
    // spawned there so every state commit stays single-writer.
    roster_reload_requested: bool,
    height_cycle_requested: bool,
    peer_refresh_requested: bool,
    pending_dispatch: Option<(BulkCommand, Vec<AgentId>)>,
}

impl App {
    fn new(config: Config) -> Self {
        let refresh_secs = config.refresh_secs;
        Self {
            config,
            agents: Vec::new(),
            roster_loaded: false,
            env_networks: HashMap::new(),
            heights: HeightMap::default(),
            peer_metrics: PeerMetricsMap::default(),
            selection: Selection::default(),
            columns: ColumnOrder::default(),
            sort: SortSpec::default(),
            row_cursor: 0,
            col_cursor: 0,
            drag_from: None,
            refresh_secs,
            events: Vec::new(),
            events_offset: 0,
            stream_closed: false,
            dispatching: false,
            overlay: Overlay::None,
            status_note: None,
            roster_reload_requested: false,
            height_cycle_requested: false,
            peer_refresh_requested: false,
            pending_dispatch: None,
        }
    }

    /// The row set in display order: derived fresh from the shared maps,
    /// then ordered per the sort spec.
    fn visible_rows(&self) -> Vec<Row> {
        let mut rows = derive_rows(
            &self.agents,
            &self.env_networks,
            &self.heights,
            &self.peer_metrics,
        );
        sort_rows(&mut rows, self.sort);
        rows
    }

    fn apply_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Roster(agents) => {
                self.agents = agents;
                self.roster_loaded = true;
                let ids: HashSet<AgentId> = self
                    .agents
                    .iter()
                    .map(|agent| agent.agent_id.clone())
                    .collect();
                self.selection.retain_roster(&ids);
                self.heights.retain_agents(&ids);
                self.peer_metrics.retain_agents(&ids);
                self.clamp_row_cursor();
                self.height_cycle_requested = true;
                self.peer_refresh_requested = true;
            }
            ClientEvent::RosterFailed(reason) => {
                self.status_note = Some(if self.roster_loaded {
                    "roster refresh failed; showing previous roster".to_string()
                } else {
                    format!("roster load failed: {}", ellipsize(&reason, STATUS_DETAIL_WIDTH))
                });
            }
            ClientEvent::EnvNetworks(networks) => {
                self.env_networks = networks;
                self.height_cycle_requested = true;
                self.peer_refresh_requested = true;
            }
            ClientEvent::Height {
                cycle,
                agent_id,
                height,
            } => {
                self.heights.commit(cycle, &agent_id, height);
            }
            ClientEvent::PeerMetrics {
                epoch,
                agent_id,
                sample,
            } => {
                self.peer_metrics.commit(epoch, &agent_id, sample);
            }
            ClientEvent::StreamFrame(value) => {
                self.events.push(EventEntry {
                    received_at: Utc::now(),
                    value,
                });
            }
            ClientEvent::StreamClosed => {
                self.stream_closed = true;
                self.status_note = Some("event stream closed".to_string());
            }
            ClientEvent::CommandResult {
                agent_id,
                command,
                outcome,
            } => {
                self.status_note = Some(match outcome {
                    Ok(detail) => format!(
                        "{command} {agent_id}: {}",
                        ellipsize(&detail, STATUS_DETAIL_WIDTH)
                    ),
                    Err(err) => format!(
                        "{command} {agent_id} failed: {}",
                        ellipsize(&err, STATUS_DETAIL_WIDTH)
                    ),
                });
            }
            ClientEvent::DispatchDone(summary) => {
                self.dispatching = false;
                self.selection.clear();
                self.status_note = Some(format!(
                    "dispatch finished: {} ok, {} failed",
                    summary.succeeded, summary.failed
                ));
            }
        }
    }

    fn clamp_row_cursor(&mut self) {
        let len = self.agents.len();
        if len == 0 {
            self.row_cursor = 0;
        } else if self.row_cursor >= len {
            self.row_cursor = len - 1;
        }
    }

    fn activate_header(&mut self, rows: &[Row]) {
        let Some(column) = self.columns.get(self.col_cursor).copied() else {
            return;
        };
        if column.key == ColumnKey::Select {
            self.selection.toggle_all(rows);
        } else if column.sortable {
            self.sort.activate(column.key);
        }
    }

    fn choose_action(&mut self, action: ActionKind) {
        if action.prompt().is_some() {
            self.overlay = Overlay::Prompt {
                action,
                buffer: String::new(),
            };
        } else if let Some(command) = build_command(action, "") {
            self.overlay = Overlay::Confirm { command };
        }
    }

    fn submit_prompt(&mut self, action: ActionKind, input: &str) {
        match build_command(action, input) {
            Some(command) => self.overlay = Overlay::Confirm { command },
            None => {
                self.overlay = Overlay::None;
                self.status_note = Some("dispatch skipped: no usable value".to_string());
            }
        }
    }

    fn confirm_dispatch(&mut self, command: BulkCommand) {
        self.overlay = Overlay::None;
        let targets = self.selection.ordered();
        if targets.is_empty() {
            self.status_note = Some("no agents selected".to_string());
            return;
        }
        self.dispatching = true;
        self.status_note = Some(format!(
            "dispatching {} to {} agent(s)",
            command.label(),
            targets.len()
        ));
        self.pending_dispatch = Some((command, targets));
    }

    fn take_roster_reload(&mut self) -> bool {
        std::mem::take(&mut self.roster_reload_requested)
    }

    fn take_height_cycle_request(&mut self) -> bool {
        std::mem::take(&mut self.height_cycle_requested)
    }

    fn take_peer_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.peer_refresh_requested)
    }

    fn take_pending_dispatch(&mut self) -> Option<(BulkCommand, Vec<AgentId>)> {
        self.pending_dispatch.take()
    }
}

fn handle_key(app: &mut App, key: KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    let overlay = app.overlay.clone();
    match overlay {
        Overlay::None => return handle_main_key(app, key),
        Overlay::Help => {
            if matches!(
                key.code,
                KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q')
            ) {
                app.overlay = Overlay::None;
            }
        }
        Overlay::ActionMenu { cursor } => match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                app.overlay = Overlay::ActionMenu {
                    cursor: cursor.saturating_sub(1),
                };
            }
            KeyCode::Down | KeyCode::Char('j') => {
                app.overlay = Overlay::ActionMenu {
                    cursor: (cursor + 1).min(ACTIONS.len() - 1),
                };
            }
            KeyCode::Enter => app.choose_action(ACTIONS[cursor]),
            KeyCode::Esc => app.overlay = Overlay::None,
            _ => {}
        },
        Overlay::Prompt { action, mut buffer } => match key.code {
            KeyCode::Char(c) => {
                buffer.push(c);
                app.overlay = Overlay::Prompt { action, buffer };
            }
            KeyCode::Backspace => {
                buffer.pop();
                app.overlay = Overlay::Prompt { action, buffer };
            }
            KeyCode::Enter => app.submit_prompt(action, &buffer),
            KeyCode::Esc => {
                app.overlay = Overlay::None;
                app.status_note = Some("dispatch cancelled".to_string());
            }
            _ => {}
        },
        Overlay::Confirm { command } => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                app.confirm_dispatch(command);
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                app.overlay = Overlay::None;
                app.status_note = Some("dispatch cancelled".to_string());
            }
            _ => {}
        },
    }
    false
}

fn handle_main_key(app: &mut App, key: KeyEvent) -> bool {
    let rows = app.visible_rows();
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('?') => app.overlay = Overlay::Help,
        KeyCode::Char('r') => {
            app.roster_reload_requested = true;
            app.status_note = Some("reloading roster".to_string());
        }
        KeyCode::Up | KeyCode::Char('k') => {
            app.row_cursor = app.row_cursor.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if !rows.is_empty() {
                app.row_cursor = (app.row_cursor + 1).min(rows.len() - 1);
            }
        }
        KeyCode::Char(' ') => {
            if let Some(row) = rows.get(app.row_cursor) {
                app.selection.toggle(&row.agent_id);
            }
        }
        KeyCode::Char('a') => app.selection.toggle_all(&rows),
        KeyCode::Left | KeyCode::Char('h') | KeyCode::BackTab => {
            app.col_cursor = app.col_cursor.saturating_sub(1);
        }
        KeyCode::Right | KeyCode::Char('l') | KeyCode::Tab => {
            app.col_cursor = (app.col_cursor + 1).min(app.columns.len() - 1);
        }
        KeyCode::Char('g') => match app.drag_from.take() {
            Some(from) => app.columns.move_column(from, app.col_cursor),
            None => app.drag_from = Some(app.col_cursor),
        },
        KeyCode::Enter => app.activate_header(&rows),
        KeyCode::Char('x') => {
            if app.dispatching {
                app.status_note = Some("dispatch already running".to_string());
            } else if app.selection.is_empty() {
                app.status_note = Some("no agents selected".to_string());
            } else {
                app.overlay = Overlay::ActionMenu { cursor: 0 };
            }
        }
        KeyCode::Char('+') | KeyCode::Char('=') => app.refresh_secs += 1,
        KeyCode::Char('-') => {
            app.refresh_secs = app.refresh_secs.saturating_sub(1).max(MIN_REFRESH_SECS);
        }
        KeyCode::PageUp => {
            app.events_offset = (app.events_offset + EVENTS_SCROLL_STEP)
                .min(app.events.len().saturating_sub(1));
        }
        KeyCode::PageDown => {
            app.events_offset = app.events_offset.saturating_sub(EVENTS_SCROLL_STEP);
        }
        KeyCode::Esc => {
            if app.drag_from.take().is_none() {
                app.status_note = None;
            }
        }
        _ => {}
    }
    false
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config {
        control_plane_url: resolve_control_plane_url(&args.url),
        refresh_secs: resolve_refresh_secs(args.refresh_rate),
    };
    init_logging();

    let (tx, mut rx) = mpsc::channel(CLIENT_EVENT_CAPACITY);
    let control = ControlPlane::new(&config.control_plane_url);
    let service = AgentService::new();
    let mut app = App::new(config);

    spawn_roster_load(control.clone(), tx.clone());
    match events_url(control.base()) {
        Ok(url) => {
            let events_tx = tx.clone();
            tokio::spawn(async move {
                run_event_stream(url, events_tx).await;
            });
        }
        Err(err) => {
            warn!(event = "events_url_error", error = %err);
            app.stream_closed = true;
            app.status_note = Some("event stream unavailable".to_string());
        }
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut input = EventStream::new();
    let mut ticker_secs = app.refresh_secs;
    let mut height_ticker = tokio::time::interval(Duration::from_secs(ticker_secs));

    loop {
        if app.take_roster_reload() {
            spawn_roster_load(control.clone(), tx.clone());
        }
        if app.take_height_cycle_request() {
            let cycle = app.heights.begin_cycle();
            let targets = height_targets(&app.agents, &app.env_networks);
            spawn_height_cycle(service.clone(), cycle, targets, tx.clone());
        }
        if app.take_peer_refresh_request() {
            let epoch = app.peer_metrics.bump_epoch();
            let targets = peer_targets(&app.agents, &app.env_networks);
            spawn_peer_refresh(service.clone(), epoch, targets, tx.clone());
        }
        if let Some((command, targets)) = app.take_pending_dispatch() {
            spawn_dispatch(control.clone(), command, targets, tx.clone());
        }
        if app.refresh_secs != ticker_secs {
            ticker_secs = app.refresh_secs;
            height_ticker = tokio::time::interval(Duration::from_secs(ticker_secs));
        }

        terminal.draw(|frame| render_ui(frame, &app))?;

        tokio::select! {
            _ = height_ticker.tick() => {
                app.height_cycle_requested = true;
            }
            Some(event) = rx.recv() => {
                app.apply_client_event(event);
            }
            maybe_event = input.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if handle_key(&mut app, key) {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "input_error", error = %err);
                    }
                    None => break,
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[derive(Clone, Copy)]
struct ConsoleTheme {
    bg: Color,
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

fn console_theme() -> ConsoleTheme {
    ConsoleTheme {
        bg: Color::Rgb(10, 16, 28),
        surface: Color::Rgb(16, 24, 42),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(186, 214, 252),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

fn render_ui(frame: &mut ratatui::Frame, app: &App) {
    let size = frame.size();
    let theme = console_theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(0),
            Constraint::Length(EVENTS_PANE_ROWS),
        ])
        .split(size);
    frame.render_widget(render_header(app, theme, size.width), layout[0]);
    render_table(frame, app, theme, layout[1]);
    frame.render_widget(render_events(app, theme, layout[2]), layout[2]);
    match &app.overlay {
        Overlay::None => {}
        Overlay::Help => render_help_overlay(frame, theme),
        Overlay::ActionMenu { cursor } => {
            render_action_menu(frame, theme, *cursor, app.selection.len());
        }
        Overlay::Prompt { action, buffer } => render_prompt(frame, theme, *action, buffer),
        Overlay::Confirm { command } => {
            render_confirm(frame, theme, command, app.selection.len());
        }
    }
}

fn render_header(app: &App, theme: ConsoleTheme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let online = app
        .agents
        .iter()
        .filter(|agent| agent.node_state().map(|(_, node)| node.online).unwrap_or(false))
        .count();
    let sort_arrow = match app.sort.direction {
        SortDirection::Ascending => "^",
        SortDirection::Descending => "v",
    };
    let stream = if app.stream_closed { "closed" } else { "live" };
    let fields = vec![
        format!("Control Plane: {}", app.config.control_plane_url),
        format!("Agents: {}/{} Online", online, app.agents.len()),
        format!("Refresh: {}s", app.refresh_secs),
        format!("Sort: {:?} {sort_arrow}", app.sort.key),
        format!("Selected: {}", app.selection.len()),
        format!("Stream: {stream}"),
    ];
    let status_line = ellipsize(&fields.join(" | "), inner_width.max(12));

    let note_line = if let Some(note) = app.status_note.as_deref() {
        ellipsize(note, inner_width.max(12))
    } else if app.drag_from.is_some() {
        "column grabbed: move the cursor and press g to drop, Esc to cancel".to_string()
    } else {
        "r reload | space select | a select all | x actions | g grab column | ? help".to_string()
    };
    let note_color = if app.status_note.is_some() {
        status_note_color(app.status_note.as_deref().unwrap_or_default(), theme)
    } else {
        theme.muted
    };

    Paragraph::new(Text::from(vec![
        Line::from(Span::styled(status_line, Style::default().fg(theme.text))),
        Line::from(Span::styled(note_line, Style::default().fg(note_color))),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .style(Style::default().bg(theme.bg))
            .title(Span::styled(
                "Fleet",
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            )),
    )
}

fn status_note_color(note: &str, theme: ConsoleTheme) -> Color {
    if note.contains("failed") || note.contains("closed") || note.contains("unavailable") {
        theme.critical
    } else if note.contains("cancelled") || note.contains("skipped") {
        theme.warn
    } else {
        theme.accent
    }
}

fn column_width(key: ColumnKey) -> Constraint {
    match key {
        ColumnKey::Select => Constraint::Length(6),
        ColumnKey::AgentId => Constraint::Min(16),
        ColumnKey::Network => Constraint::Length(12),
        ColumnKey::NodeKey => Constraint::Min(16),
        ColumnKey::Online => Constraint::Length(6),
        ColumnKey::Height => Constraint::Length(8),
        ColumnKey::InternalPeers => Constraint::Length(8),
        ColumnKey::ExternalPeers => Constraint::Length(8),
        ColumnKey::PeerMetrics => Constraint::Length(13),
    }
}

fn render_cell(app: &App, theme: ConsoleTheme, row: &Row, key: ColumnKey) -> Cell<'static> {
    match key {
        ColumnKey::Select => Cell::from(if app.selection.contains(&row.agent_id) {
            "[x]"
        } else {
            "[ ]"
        }),
        ColumnKey::AgentId => Cell::from(row.agent_id.clone()),
        ColumnKey::Network => Cell::from(row.network.clone()),
        ColumnKey::NodeKey => Cell::from(row.node_key.clone()),
        ColumnKey::Online => {
            let (glyph, color) = if row.online {
                ("on", theme.ok)
            } else {
                ("off", theme.critical)
            };
            Cell::from(Span::styled(glyph, Style::default().fg(color)))
        }
        ColumnKey::Height => Cell::from(match row.height {
            Height::Known(height) => height.to_string(),
            Height::Unknown => "-".to_string(),
        }),
        ColumnKey::InternalPeers => Cell::from(row.internal_peers.to_string()),
        ColumnKey::ExternalPeers => Cell::from(row.external_peers.to_string()),
        ColumnKey::PeerMetrics => Cell::from(format!(
            "{} {} {}",
            row.peer_metrics.client_count, row.peer_metrics.validator_count, row.peer_metrics.total
        )),
    }
}

fn render_table(frame: &mut ratatui::Frame, app: &App, theme: ConsoleTheme, area: Rect) {
    let rows_data = app.visible_rows();
    let columns = app.columns.columns();

    let header_cells: Vec<Cell> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let mut label = column.label.to_string();
            if column.sortable && column.key == app.sort.key {
                label.push_str(match app.sort.direction {
                    SortDirection::Ascending => " ^",
                    SortDirection::Descending => " v",
                });
            }
            let mut style = Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD);
            if index == app.col_cursor {
                style = style.fg(theme.bg).bg(theme.accent);
            }
            if app.drag_from == Some(index) {
                style = style.add_modifier(Modifier::REVERSED);
            }
            Cell::from(label).style(style)
        })
        .collect();

    let body_rows: Vec<TableRow> = rows_data
        .iter()
        .map(|row| {
            let cells: Vec<Cell> = columns
                .iter()
                .map(|column| render_cell(app, theme, row, column.key))
                .collect();
            TableRow::new(cells).style(Style::default().fg(theme.text))
        })
        .collect();

    let widths: Vec<Constraint> = columns.iter().map(|column| column_width(column.key)).collect();
    let title = if app.roster_loaded {
        format!("Agents ({})", rows_data.len())
    } else {
        "Agents (loading)".to_string()
    };
    let table = Table::new(body_rows, widths)
        .header(TableRow::new(header_cells).height(1))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .style(Style::default().bg(theme.surface))
                .title(Span::styled(
                    title,
                    Style::default()
                        .fg(theme.title)
                        .add_modifier(Modifier::BOLD),
                )),
        )
        .highlight_style(
            Style::default()
                .bg(theme.border)
                .add_modifier(Modifier::BOLD),
        );

    let mut table_state = TableState::default();
    if !rows_data.is_empty() {
        table_state.select(Some(app.row_cursor.min(rows_data.len() - 1)));
    }
    frame.render_stateful_widget(table, area, &mut table_state);
}

fn render_events(app: &App, theme: ConsoleTheme, area: Rect) -> Paragraph<'static> {
    let inner_height = area.height.saturating_sub(2) as usize;
    let inner_width = area.width.saturating_sub(4) as usize;
    let total = app.events.len();
    let end = total.saturating_sub(app.events_offset);
    let start = end.saturating_sub(inner_height);

    let lines: Vec<Line> = if total == 0 {
        vec![Line::from(Span::styled(
            "No events received.",
            Style::default().fg(theme.muted),
        ))]
    } else {
        app.events[start..end]
            .iter()
            .map(|entry| {
                Line::from(vec![
                    Span::styled(
                        entry.received_at.format("%H:%M:%S ").to_string(),
                        Style::default().fg(theme.muted),
                    ),
                    Span::styled(
                        ellipsize(&entry.value.to_string(), inner_width.max(16)),
                        Style::default().fg(theme.text),
                    ),
                ])
            })
            .collect()
    };

    let title = if app.stream_closed {
        format!("Control Plane Events ({total}, stream closed)")
    } else {
        format!("Control Plane Events ({total})")
    };
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .style(Style::default().bg(theme.bg))
                .title(Span::styled(
                    title,
                    Style::default()
                        .fg(theme.title)
                        .add_modifier(Modifier::BOLD),
                )),
        )
}

fn overlay_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn overlay_block(title: &str, theme: ConsoleTheme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.accent))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_action_menu(frame: &mut ratatui::Frame, theme: ConsoleTheme, cursor: usize, selected: usize) {
    let area = overlay_rect(44, ACTIONS.len() as u16 + 3, frame.size());
    let mut lines = vec![Line::from(Span::styled(
        format!("Run against {selected} selected agent(s):"),
        Style::default().fg(theme.muted),
    ))];
    for (index, action) in ACTIONS.iter().enumerate() {
        let marker = if index == cursor { "> " } else { "  " };
        let style = if index == cursor {
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.text)
        };
        lines.push(Line::from(Span::styled(
            format!("{marker}{}", action.label()),
            style,
        )));
    }
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines)).block(overlay_block("Action", theme)),
        area,
    );
}

fn render_prompt(frame: &mut ratatui::Frame, theme: ConsoleTheme, action: ActionKind, buffer: &str) {
    let area = overlay_rect(52, 4, frame.size());
    let prompt = action.prompt().unwrap_or("Value");
    let lines = vec![
        Line::from(Span::styled(
            format!("{prompt} (reused for every selected agent):"),
            Style::default().fg(theme.muted),
        )),
        Line::from(Span::styled(
            format!("{buffer}_"),
            Style::default().fg(theme.text),
        )),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines)).block(overlay_block(action.label(), theme)),
        area,
    );
}

fn render_confirm(frame: &mut ratatui::Frame, theme: ConsoleTheme, command: &BulkCommand, selected: usize) {
    let area = overlay_rect(52, 4, frame.size());
    let lines = vec![
        Line::from(Span::styled(
            format!("Execute {} on {selected} agent(s)?", command.label()),
            Style::default().fg(theme.text),
        )),
        Line::from(Span::styled(
            "y to confirm, n to abort",
            Style::default().fg(theme.muted),
        )),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines)).block(overlay_block("Confirm", theme)),
        area,
    );
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: ConsoleTheme) {
    let entries = [
        ("q", "quit"),
        ("r", "reload roster"),
        ("j/k, Up/Down", "move row cursor"),
        ("space", "toggle row selection"),
        ("a", "select all / clear all"),
        ("h/l, Tab/BackTab", "move column cursor"),
        ("Enter", "sort by column (again to flip) / select all"),
        ("g", "grab column, move cursor, g again to drop"),
        ("x", "bulk action on selection"),
        ("+/-", "adjust refresh rate (min 1s)"),
        ("PgUp/PgDn", "scroll events"),
        ("?", "close help"),
    ];
    let area = overlay_rect(56, entries.len() as u16 + 2, frame.size());
    let lines: Vec<Line> = entries
        .iter()
        .map(|(keys, what)| {
            Line::from(vec![
                Span::styled(format!("{keys:<18}"), Style::default().fg(theme.accent)),
                Span::styled((*what).to_string(), Style::default().fg(theme.text)),
            ])
        })
        .collect();
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(Text::from(lines)).block(overlay_block("Keys", theme)),
        area,
    );
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let truncated: String = input.chars().take(max.saturating_sub(3)).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;
    use foc_client::DispatchSummary;
    use foc_core::{AgentState, NodeState, PeerClass};
    use serde_json::json;

    fn test_config() -> Config {
        Config {
            control_plane_url: "http://localhost:1234".to_string(),
            refresh_secs: DEFAULT_REFRESH_SECS,
        }
    }

    fn test_app() -> App {
        App::new(test_config())
    }

    fn node_agent(agent_id: &str, env_id: &str, online: bool) -> Agent {
        Agent {
            agent_id: agent_id.to_string(),
            is_connected: true,
            external_ip: None,
            internal_ip: Some("10.0.0.4".to_string()),
            state: AgentState::Node(
                env_id.to_string(),
                Box::new(NodeState {
                    node_key: format!("validator/{agent_id}"),
                    online,
                    peers: vec![PeerClass::Internal, PeerClass::External, PeerClass::Internal],
                    extra: HashMap::new(),
                }),
            ),
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::empty())
    }

    #[test]
    fn roster_replace_prunes_selection_and_telemetry() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![
            node_agent("a1", "env1", true),
            node_agent("a2", "env1", true),
        ]));
        app.selection.toggle("a1");
        app.selection.toggle("a2");
        let cycle = app.heights.begin_cycle();
        app.apply_client_event(ClientEvent::Height {
            cycle,
            agent_id: "a1".to_string(),
            height: Height::Known(10),
        });

        app.apply_client_event(ClientEvent::Roster(vec![node_agent("a2", "env1", true)]));

        assert!(!app.selection.contains("a1"));
        assert!(app.selection.contains("a2"));
        assert_eq!(app.heights.get("a1"), Height::Unknown);
        assert!(app.height_cycle_requested);
        assert!(app.peer_refresh_requested);
    }

    #[test]
    fn stale_cycle_height_result_is_discarded() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![node_agent("a1", "env1", true)]));
        let old_cycle = app.heights.begin_cycle();
        let new_cycle = app.heights.begin_cycle();

        app.apply_client_event(ClientEvent::Height {
            cycle: new_cycle,
            agent_id: "a1".to_string(),
            height: Height::Known(200),
        });
        app.apply_client_event(ClientEvent::Height {
            cycle: old_cycle,
            agent_id: "a1".to_string(),
            height: Height::Known(150),
        });

        assert_eq!(app.heights.get("a1"), Height::Known(200));
    }

    #[test]
    fn roster_failure_preserves_previous_roster() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![node_agent("a1", "env1", true)]));
        app.apply_client_event(ClientEvent::RosterFailed("connect refused".to_string()));
        assert_eq!(app.agents.len(), 1);
        assert!(app
            .status_note
            .as_deref()
            .unwrap_or_default()
            .contains("previous roster"));
    }

    #[test]
    fn select_all_key_is_a_strict_toggle() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![
            node_agent("a1", "env1", true),
            node_agent("a2", "env1", true),
        ]));

        handle_key(&mut app, key(KeyCode::Char('a')));
        assert_eq!(app.selection.len(), 2);
        handle_key(&mut app, key(KeyCode::Char('a')));
        assert!(app.selection.is_empty());
        handle_key(&mut app, key(KeyCode::Char('a')));
        assert_eq!(app.selection.len(), 2);
    }

    #[test]
    fn sorting_twice_on_the_same_column_restores_order() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![
            node_agent("b", "env1", true),
            node_agent("a", "env1", true),
            node_agent("c", "env1", true),
        ]));
        let before: Vec<String> = app.visible_rows().iter().map(|r| r.agent_id.clone()).collect();

        app.col_cursor = 1; // AGENT ID
        handle_key(&mut app, key(KeyCode::Enter));
        let flipped: Vec<String> = app.visible_rows().iter().map(|r| r.agent_id.clone()).collect();
        assert_eq!(flipped, vec!["c", "b", "a"]);

        handle_key(&mut app, key(KeyCode::Enter));
        let after: Vec<String> = app.visible_rows().iter().map(|r| r.agent_id.clone()).collect();
        assert_eq!(after, before);
    }

    #[test]
    fn grab_and_drop_reorders_columns() {
        let mut app = test_app();
        let dragged = app.columns.get(1).copied().expect("column");

        app.col_cursor = 1;
        handle_key(&mut app, key(KeyCode::Char('g')));
        assert_eq!(app.drag_from, Some(1));
        handle_key(&mut app, key(KeyCode::Tab));
        handle_key(&mut app, key(KeyCode::Tab));
        handle_key(&mut app, key(KeyCode::Char('g')));

        assert_eq!(app.drag_from, None);
        assert_eq!(app.columns.get(3).copied(), Some(dragged));
        assert_eq!(app.columns.len(), 9);
    }

    #[test]
    fn escape_cancels_a_column_grab() {
        let mut app = test_app();
        let before: Vec<_> = app.columns.columns().to_vec();
        handle_key(&mut app, key(KeyCode::Char('g')));
        handle_key(&mut app, key(KeyCode::Esc));
        handle_key(&mut app, key(KeyCode::Char('g')));
        handle_key(&mut app, key(KeyCode::Char('g')));
        assert_eq!(app.columns.columns(), before.as_slice());
    }

    #[test]
    fn action_menu_requires_a_selection() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![node_agent("a1", "env1", true)]));
        handle_key(&mut app, key(KeyCode::Char('x')));
        assert_eq!(app.overlay, Overlay::None);
        assert_eq!(app.status_note.as_deref(), Some("no agents selected"));
    }

    #[test]
    fn declining_the_confirmation_aborts_the_whole_dispatch() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![
            node_agent("a1", "env1", true),
            node_agent("a2", "env1", true),
        ]));
        handle_key(&mut app, key(KeyCode::Char('a')));
        handle_key(&mut app, key(KeyCode::Char('x')));
        assert_eq!(app.overlay, Overlay::ActionMenu { cursor: 0 });
        handle_key(&mut app, key(KeyCode::Enter)); // kill -> confirm
        assert!(matches!(app.overlay, Overlay::Confirm { .. }));
        handle_key(&mut app, key(KeyCode::Char('n')));

        assert_eq!(app.overlay, Overlay::None);
        assert!(app.take_pending_dispatch().is_none());
        assert!(!app.dispatching);
        assert_eq!(app.selection.len(), 2);
    }

    #[test]
    fn confirming_queues_a_sequential_dispatch_over_the_selection() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![
            node_agent("a2", "env1", true),
            node_agent("a1", "env1", true),
        ]));
        handle_key(&mut app, key(KeyCode::Char('a')));
        handle_key(&mut app, key(KeyCode::Char('x')));
        handle_key(&mut app, key(KeyCode::Enter));
        handle_key(&mut app, key(KeyCode::Char('y')));

        assert!(app.dispatching);
        let (command, targets) = app.take_pending_dispatch().expect("dispatch");
        assert_eq!(command, BulkCommand::Kill);
        assert_eq!(targets, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[test]
    fn dispatch_done_clears_the_selection_unconditionally() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![node_agent("a1", "env1", true)]));
        app.selection.toggle("a1");
        app.dispatching = true;

        app.apply_client_event(ClientEvent::DispatchDone(DispatchSummary {
            attempted: 1,
            succeeded: 0,
            failed: 1,
        }));

        assert!(app.selection.is_empty());
        assert!(!app.dispatching);
        assert!(app
            .status_note
            .as_deref()
            .unwrap_or_default()
            .contains("1 failed"));
    }

    #[test]
    fn log_level_prompt_builds_the_shared_command() {
        let mut app = test_app();
        app.selection.toggle("a1");
        app.submit_prompt(ActionKind::SetLogLevel, "debug");
        assert_eq!(
            app.overlay,
            Overlay::Confirm {
                command: BulkCommand::SetLogLevel("debug".to_string())
            }
        );
    }

    #[test]
    fn non_numeric_verbosity_skips_the_dispatch() {
        let mut app = test_app();
        app.selection.toggle("a1");
        app.submit_prompt(ActionKind::SetNodeVerbosity, "chatty");
        assert_eq!(app.overlay, Overlay::None);
        assert!(app.take_pending_dispatch().is_none());
        assert!(app
            .status_note
            .as_deref()
            .unwrap_or_default()
            .contains("skipped"));
    }

    #[test]
    fn stream_frames_append_in_arrival_order() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::StreamFrame(json!({"seq": 1})));
        app.apply_client_event(ClientEvent::StreamFrame(json!({"seq": 2})));
        assert_eq!(app.events.len(), 2);
        assert_eq!(app.events[0].value["seq"], 1);
        assert_eq!(app.events[1].value["seq"], 2);

        app.apply_client_event(ClientEvent::StreamClosed);
        assert!(app.stream_closed);
        assert_eq!(app.events.len(), 2);
    }

    #[test]
    fn refresh_rate_clamps_to_the_minimum() {
        let mut app = test_app();
        app.refresh_secs = MIN_REFRESH_SECS;
        handle_key(&mut app, key(KeyCode::Char('-')));
        assert_eq!(app.refresh_secs, MIN_REFRESH_SECS);
        handle_key(&mut app, key(KeyCode::Char('+')));
        assert_eq!(app.refresh_secs, MIN_REFRESH_SECS + 1);
        assert_eq!(resolve_refresh_secs(3), 3);
    }

    #[test]
    fn row_cursor_clamps_when_the_roster_shrinks() {
        let mut app = test_app();
        app.apply_client_event(ClientEvent::Roster(vec![
            node_agent("a1", "env1", true),
            node_agent("a2", "env1", true),
            node_agent("a3", "env1", true),
        ]));
        app.row_cursor = 2;
        app.apply_client_event(ClientEvent::Roster(vec![node_agent("a1", "env1", true)]));
        assert_eq!(app.row_cursor, 0);
    }
}
