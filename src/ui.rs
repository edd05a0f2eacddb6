use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ledger_fix::{
    Column, Config, FixRefusal, FlipsideClient, LedgerRow, Session, Severity, SUMMARY_FILE_NAME,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::fs::File;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Checks,
    Summary,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Checks => Page::Summary,
            Page::Summary => Page::Checks,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Checks => "Checks",
            Page::Summary => "Summary",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Banner {
    pub text: String,
    pub color: Color,
}

impl Banner {
    fn info(text: impl Into<String>) -> Self {
        Banner { text: text.into(), color: Color::Cyan }
    }

    fn ok(text: impl Into<String>) -> Self {
        Banner { text: text.into(), color: Color::Green }
    }

    fn error(text: impl Into<String>) -> Self {
        Banner { text: text.into(), color: Color::Red }
    }
}

/// One line of the Checks page: a block header or one of its offending rows
struct CheckLine {
    cells: [String; 5],
    color: Color,
    bold: bool,
}

pub struct App {
    pub session: Session,
    pub config: Config,
    pub current_page: Page,
    pub checks_state: TableState,
    pub summary_state: TableState,
    pub banner: Option<Banner>,
    /// `f` was pressed and the fix waits for `y`
    pub pending_confirm: bool,
    pub output: PathBuf,
}

impl App {
    pub fn new(session: Session, config: Config) -> Self {
        let mut checks_state = TableState::default();
        checks_state.select(Some(0));

        let mut summary_state = TableState::default();
        summary_state.select(Some(0));

        let banner = Some(Banner::info(session.report.verdict()));

        Self {
            session,
            config,
            current_page: Page::Checks,
            checks_state,
            summary_state,
            banner,
            pending_confirm: false,
            output: PathBuf::from(SUMMARY_FILE_NAME),
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    fn check_lines(&self) -> Vec<CheckLine> {
        let mut lines = Vec::new();
        for block in &self.session.report.blocks {
            let color = match (block.passed, block.severity) {
                (true, _) => Color::Green,
                (false, Severity::Critical) => Color::Red,
                (false, Severity::Warning) => Color::Yellow,
            };
            lines.push(CheckLine {
                cells: [
                    block.message.clone(),
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                ],
                color,
                bold: true,
            });
            for row in &block.rows {
                lines.push(CheckLine {
                    cells: [
                        format!("  line {}", row.line_number.map(|n| n.to_string()).unwrap_or_default()),
                        cell(row, Column::BelongsTo, 44),
                        cell(row, Column::TransactionHash, 68),
                        cell(row, Column::AssetAddress, 44),
                        cell(row, Column::BalanceImpact, 16),
                    ],
                    color: Color::White,
                    bold: false,
                });
            }
        }
        lines
    }

    fn row_count(&self) -> usize {
        match self.current_page {
            Page::Checks => self.check_lines().len(),
            Page::Summary => self
                .session
                .outcome
                .as_ref()
                .map(|o| o.summary_rows().len())
                .unwrap_or(0),
        }
    }

    fn current_state(&mut self) -> &mut TableState {
        match self.current_page {
            Page::Checks => &mut self.checks_state,
            Page::Summary => &mut self.summary_state,
        }
    }

    pub fn next(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let state = self.current_state();
        let i = match state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let state = self.current_state();
        let i = match state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        state.select(Some(i));
    }

    /// `f`: ask for confirmation, or explain why the fix is unavailable
    pub fn request_fix(&mut self) {
        match self.session.fix_gate(true) {
            Ok(()) => {
                self.pending_confirm = true;
                self.banner = Some(Banner::info(format!(
                    "Fix {} transaction(s) from on-chain data? (y/n)",
                    self.session.report.issues.advisory_hashes().len()
                )));
            }
            Err(refusal @ FixRefusal::BlockingErrors { .. }) => {
                self.banner = Some(Banner::error(format!("❌ {}", refusal)));
            }
            Err(refusal) => self.banner = Some(Banner::info(refusal.to_string())),
        }
    }

    pub fn cancel_fix(&mut self) {
        self.pending_confirm = false;
        self.banner = Some(Banner::info("Fix cancelled"));
    }

    /// Runs the on-chain query; blocks until the Flipside run finishes
    pub fn confirm_fix(&mut self) {
        self.pending_confirm = false;
        let result = FlipsideClient::new(&self.config.flipside)
            .and_then(|client| self.session.fix(true, &client, &self.config.chain));

        match result {
            Ok(outcome) => {
                self.banner = Some(Banner::ok(format!(
                    "✅ {} (s to save)",
                    outcome.reconciliation.summary()
                )));
                self.session.outcome = Some(outcome);
                self.summary_state.select(Some(0));
                self.current_page = Page::Summary;
            }
            Err(e) => self.banner = Some(Banner::error(format!("❌ Fix failed: {:#}", e))),
        }
    }

    /// `s`: write the summary CSV
    pub fn save(&mut self) {
        let Some(outcome) = &self.session.outcome else {
            self.banner = Some(Banner::info("Nothing to save yet (f to fix)"));
            return;
        };

        let result = File::create(&self.output)
            .map_err(anyhow::Error::from)
            .and_then(|file| outcome.write_summary_csv(file));

        self.banner = Some(match result {
            Ok(()) => Banner::ok(format!("💾 Saved {}", self.output.display())),
            Err(e) => Banner::error(format!("❌ Save failed: {:#}", e)),
        });
    }
}

fn cell(row: &LedgerRow, column: Column, max_len: usize) -> String {
    row.text(column)
        .map(|v| truncate(&v, max_len))
        .unwrap_or_else(|| "<empty>".to_string())
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if app.pending_confirm {
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') => {
                        app.banner = Some(Banner::info("⛓️  Querying on-chain data..."));
                        terminal.draw(|f| ui(f, app))?;
                        app.confirm_fix();
                    }
                    _ => app.cancel_fix(),
                }
                continue;
            }

            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(())
                }
                KeyCode::Tab | KeyCode::BackTab => app.next_page(),
                KeyCode::Char('f') => app.request_fix(),
                KeyCode::Char('s') => app.save(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Banner
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Checks => render_checks(f, chunks[1], app),
        Page::Summary => render_summary(f, chunks[1], app),
    }

    render_banner(f, chunks[2], app);
    render_status_bar(f, chunks[3], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let report = &app.session.report;

    let mut tab_spans = vec![];
    for (i, page) in [Page::Checks, Page::Summary].iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        truncate(&report.source, 40),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Rows: {}", report.row_count),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("❌ {}", report.issues.blocking.len()),
        Style::default().fg(Color::Red),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("⚠️  {}", report.issues.advisory.len()),
        Style::default().fg(Color::Yellow),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn header_row(titles: &[&str]) -> Row<'static> {
    let cells: Vec<Cell> = titles
        .iter()
        .map(|h| {
            Cell::from(h.to_string()).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        })
        .collect();

    Row::new(cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

fn render_checks(f: &mut Frame, area: Rect, app: &mut App) {
    let header = header_row(&[
        "Check",
        "Belongs To",
        "Transaction Hash",
        "Asset Address",
        "Balance (T)",
    ]);

    let rows: Vec<Row> = app
        .check_lines()
        .into_iter()
        .map(|line| {
            let mut style = Style::default().fg(line.color);
            if line.bold {
                style = style.add_modifier(Modifier::BOLD);
            }
            Row::new(line.cells.to_vec()).style(style).height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(44),
            Constraint::Length(44),
            Constraint::Length(68),
            Constraint::Length(44),
            Constraint::Length(16),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Data Quality Checks "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.checks_state);
}

fn render_summary(f: &mut Frame, area: Rect, app: &mut App) {
    let Some(outcome) = &app.session.outcome else {
        let hint = if app.session.report.fix_available() {
            "  No summary yet. Press f to fix flagged transactions."
        } else {
            "  No summary: the fix is only available for ledgers with warnings and no errors."
        };
        let text = Paragraph::new(vec![Line::from(""), Line::from(hint)]).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Summary "),
        );
        f.render_widget(text, area);
        return;
    };

    let summary = &outcome.aggregation.summary;
    let header = header_row(&summary.header());

    let rows: Vec<Row> = summary
        .rows
        .iter()
        .map(|row| {
            let total_color = if row.total >= 0.0 { Color::Green } else { Color::Red };
            let mut cells = vec![
                Cell::from(truncate(&row.belongs_to, 44)),
                Cell::from(truncate(&row.asset_address, 44)),
                Cell::from(row.currency_symbol.clone().unwrap_or_default()),
                Cell::from(format!("{:.6}", row.inflow)).style(Style::default().fg(Color::Green)),
                Cell::from(format!("{:.6}", row.outflow)).style(Style::default().fg(Color::Red)),
                Cell::from(format!("{:.6}", row.fees)).style(Style::default().fg(Color::Yellow)),
                Cell::from(format!("{:.6}", row.total)).style(Style::default().fg(total_color)),
            ];
            cells.extend(summary.extra_columns.iter().map(|c| {
                Cell::from(row.extra.get(c).map(|v| format!("{:.6}", v)).unwrap_or_default())
            }));
            Row::new(cells).height(1)
        })
        .collect();

    let mut widths = vec![
        Constraint::Length(44),
        Constraint::Length(44),
        Constraint::Length(10),
        Constraint::Length(16),
        Constraint::Length(16),
        Constraint::Length(14),
        Constraint::Length(16),
    ];
    widths.extend(summary.extra_columns.iter().map(|_| Constraint::Length(16)));

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Summary by Wallet & Asset "),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.summary_state);
}

fn render_banner(f: &mut Frame, area: Rect, app: &App) {
    let line = match &app.banner {
        Some(banner) => Line::from(Span::styled(
            format!(" {}", banner.text),
            Style::default().fg(banner.color).add_modifier(Modifier::BOLD),
        )),
        None => Line::from(""),
    };

    let banner = Paragraph::new(vec![line]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(banner, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![Span::styled(
        format!(" {} ", app.current_page.title()),
        Style::default().fg(Color::Cyan),
    )];

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("f", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Fix | "));
    status_spans.push(Span::styled("s", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Save CSV | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Belongs To,Belongs To Address,Transaction Hash,Asset Address,Balance Impact (T),Original Currency Symbol";

    fn app_for(line: &str) -> App {
        let csv = format!("{}\n{}\n", HEADER, line);
        let session = Session::from_bytes("ledger.csv", csv.into_bytes()).unwrap();
        App::new(session, Config::default())
    }

    fn wallet() -> String {
        format!("0x{}", "a".repeat(40))
    }

    #[test]
    fn test_fix_refused_with_banner_on_blocking_errors() {
        let mut app = app_for(&format!("{},0xaddr,,native,1,AVAX", wallet()));

        app.request_fix();

        assert!(!app.pending_confirm);
        let banner = app.banner.unwrap();
        assert_eq!(banner.color, Color::Red);
        assert!(banner.text.contains("re-upload"));
    }

    #[test]
    fn test_fix_asks_for_confirmation_on_warnings() {
        let hash = format!("0x{}", "b".repeat(20));
        let mut app = app_for(&format!("{},0xaddr,{},native,1,AVAX", wallet(), hash));

        app.request_fix();
        assert!(app.pending_confirm);

        app.cancel_fix();
        assert!(!app.pending_confirm);
        assert!(app.session.outcome.is_none());
    }

    #[test]
    fn test_save_without_outcome() {
        let mut app = app_for(&format!("{},0xaddr,0x1,native,1,AVAX", wallet()));
        app.save();
        assert!(app.banner.unwrap().text.contains("Nothing to save"));
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = app_for(&format!("{},0xaddr,0x1,native,1,AVAX", wallet()));
        let lines = app.check_lines().len();

        app.previous();
        assert_eq!(app.checks_state.selected(), Some(lines - 1));
        app.next();
        assert_eq!(app.checks_state.selected(), Some(0));

        app.next_page();
        assert_eq!(app.current_page, Page::Summary);
        app.next();
        assert_eq!(app.summary_state.selected(), Some(0));
    }
}
