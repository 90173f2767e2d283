mod helpers;

use crate::history::HISTORY_CAPACITY;
use crate::parser::LogEvent;
use crate::plan::{read_plan_progress, PlanProgress};
use crate::sessions::SessionMeta;
use crate::store::Store;
use crate::theme::{Theme, ThemeColors};
use crate::watcher::{LogWatcher, WatcherStatus};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use helpers::{badge, clock, short_id, truncate_with_ellipsis, window};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, HighlightSpacing, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Plan files change slowly; re-read them on this cadence
const PLAN_REFRESH: Duration = Duration::from_secs(5);
const INPUT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Panel {
    Sessions,
    Agents,
    Models,
    Tools,
    Logs,
}

impl Panel {
    const ORDER: [Panel; 5] = [
        Panel::Sessions,
        Panel::Agents,
        Panel::Models,
        Panel::Tools,
        Panel::Logs,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|p| *p == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }
}

pub struct App {
    store: Arc<Store>,
    watcher: Arc<LogWatcher>,
    project_dir: PathBuf,
    plan: Option<PlanProgress>,
    last_plan_read: Option<Instant>,

    focus: Panel,
    /// Row 0 is "All sessions", row i is `session_list[i - 1]`
    session_state: ListState,
    agent_scroll: usize,
    model_scroll: usize,
    tool_scroll: usize,
    log_scroll: usize,

    exit: bool,
    /// Raised from outside the event loop, e.g. by a termination signal
    shutdown: Arc<AtomicBool>,
}

impl App {
    pub fn new(
        store: Arc<Store>,
        watcher: Arc<LogWatcher>,
        project_dir: PathBuf,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let mut session_state = ListState::default();
        session_state.select(Some(0));
        Self {
            store,
            watcher,
            project_dir,
            plan: None,
            last_plan_read: None,
            focus: Panel::Sessions,
            session_state,
            agent_scroll: 0,
            model_scroll: 0,
            tool_scroll: 0,
            log_scroll: 0,
            exit: false,
            shutdown,
        }
    }

    fn should_exit(&self) -> bool {
        self.exit || self.shutdown.load(Ordering::SeqCst)
    }

    pub fn run(&mut self, terminal: &mut ratatui::DefaultTerminal) -> io::Result<()> {
        while !self.should_exit() {
            self.refresh_plan();
            terminal.draw(|frame| self.draw(frame))?;

            if event::poll(INPUT_POLL)? {
                while event::poll(Duration::ZERO)? {
                    if let Event::Key(key) = event::read()? {
                        if key.kind == KeyEventKind::Press {
                            self.handle_key(key);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn refresh_plan(&mut self) {
        let due = self
            .last_plan_read
            .map(|t| t.elapsed() >= PLAN_REFRESH)
            .unwrap_or(true);
        if due {
            self.plan = read_plan_progress(&self.project_dir);
            self.last_plan_read = Some(Instant::now());
        }
    }

    fn scroll_mut(&mut self) -> Option<&mut usize> {
        match self.focus {
            Panel::Sessions => None,
            Panel::Agents => Some(&mut self.agent_scroll),
            Panel::Models => Some(&mut self.model_scroll),
            Panel::Tools => Some(&mut self.tool_scroll),
            Panel::Logs => Some(&mut self.log_scroll),
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let rows = self.store.session_list().len() + 1;
        let current = self.session_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, rows as isize - 1);
        self.session_state.select(Some(next as usize));
    }

    fn apply_selected_filter(&mut self) {
        let row = self.session_state.selected().unwrap_or(0);
        let filter = match row {
            0 => None,
            i => self.store.session_list().get(i - 1).map(|s| s.id.clone()),
        };
        log::debug!("Session filter: {:?}", filter);
        self.store.set_selected_session(filter);
        self.agent_scroll = 0;
        self.tool_scroll = 0;
        self.log_scroll = 0;
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.exit = true;
            }
            KeyCode::Char('q') | KeyCode::Esc => self.exit = true,
            KeyCode::Tab => self.focus = self.focus.next(),
            KeyCode::BackTab => self.focus = self.focus.prev(),
            KeyCode::Down | KeyCode::Char('j') => match self.scroll_mut() {
                Some(scroll) => *scroll = scroll.saturating_add(1),
                None => self.move_selection(1),
            },
            KeyCode::Up | KeyCode::Char('k') => match self.scroll_mut() {
                Some(scroll) => *scroll = scroll.saturating_sub(1),
                None => self.move_selection(-1),
            },
            KeyCode::Char('g') | KeyCode::Home => match self.scroll_mut() {
                Some(scroll) => *scroll = 0,
                None => self.session_state.select(Some(0)),
            },
            // Offsets are clamped at render time
            KeyCode::Char('G') | KeyCode::End => match self.scroll_mut() {
                Some(scroll) => *scroll = usize::MAX,
                None => self.move_selection(isize::MAX / 2),
            },
            KeyCode::Enter if self.focus == Panel::Sessions => self.apply_selected_filter(),
            KeyCode::Char('a') => {
                self.store.set_selected_session(None);
                self.session_state.select(Some(0));
            }
            _ => {}
        }
    }

    fn panel_block(&self, panel: Panel, title: String, colors: &ThemeColors) -> Block<'static> {
        let border = if self.focus == panel {
            colors.border_focus
        } else {
            colors.border_default
        };
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(Span::styled(
                format!(" {} ", title),
                Style::default()
                    .fg(colors.text_primary)
                    .add_modifier(Modifier::BOLD),
            ))
    }

    pub fn draw(&mut self, frame: &mut Frame) {
        let colors = Theme.colors();
        let area = frame.area();
        frame.render_widget(
            Block::default().style(Style::default().bg(colors.bg_primary)),
            area,
        );

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(area);
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(34), Constraint::Min(0)])
            .split(rows[0]);
        let main = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage(35),
                Constraint::Percentage(30),
                Constraint::Min(0),
            ])
            .split(columns[1]);
        let top = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(main[0]);

        let filter = self.store.selected_session();
        let sessions = self.store.session_list();

        self.render_sessions(frame, columns[0], &sessions, filter.as_deref(), &colors);
        self.render_agents(frame, top[0], filter.as_deref(), &colors);
        self.render_models(frame, top[1], &colors);
        self.render_tools(frame, main[1], filter.as_deref(), &colors);
        self.render_logs(frame, main[2], filter.as_deref(), &colors);
        self.render_status(frame, rows[1], &sessions, filter.as_deref(), &colors);
    }

    fn render_sessions(
        &mut self,
        frame: &mut Frame,
        area: Rect,
        sessions: &[SessionMeta],
        filter: Option<&str>,
        colors: &ThemeColors,
    ) {
        let width = area.width.saturating_sub(6) as usize;
        let marker = |active: bool| if active { "● " } else { "  " };

        let mut items = Vec::with_capacity(sessions.len() + 1);
        items.push(ListItem::new(Line::from(vec![
            Span::styled(marker(filter.is_none()), Style::default().fg(colors.success)),
            Span::styled("All sessions", Style::default().fg(colors.text_primary)),
        ])));
        for session in sessions {
            let active = filter == Some(session.id.as_str());
            let color = if session.parent_id.is_some() {
                colors.text_muted
            } else {
                colors.text_secondary
            };
            items.push(ListItem::new(Line::from(vec![
                Span::styled(marker(active), Style::default().fg(colors.success)),
                Span::styled(
                    truncate_with_ellipsis(session.display_title(), width),
                    Style::default().fg(color),
                ),
            ])));
        }

        if self.session_state.selected().unwrap_or(0) > sessions.len() {
            self.session_state.select(Some(sessions.len()));
        }

        let list = List::new(items)
            .block(self.panel_block(Panel::Sessions, format!("SESSIONS ({})", sessions.len()), colors))
            .highlight_style(Style::default().bg(colors.bg_highlight))
            .highlight_spacing(HighlightSpacing::Always);
        frame.render_stateful_widget(list, area, &mut self.session_state);
    }

    fn render_agents(&mut self, frame: &mut Frame, area: Rect, filter: Option<&str>, colors: &ThemeColors) {
        let agents = self.store.agents(filter);
        let height = area.height.saturating_sub(2) as usize;
        let (visible, offset) = window(&agents, self.agent_scroll, height);
        self.agent_scroll = offset;

        let lines: Vec<Line> = visible
            .iter()
            .map(|agent| {
                let dot = if agent.active { "●" } else { "○" };
                let mut spans = vec![
                    Span::styled(format!("{dot} "), Style::default().fg(colors.success)),
                    badge(format!("{:<14}", truncate_with_ellipsis(&agent.name, 14)), colors.agent_color(&agent.name)),
                    Span::styled(format!(" {:<8}", agent.mode), Style::default().fg(colors.text_secondary)),
                    Span::styled(
                        format!(" {}", truncate_with_ellipsis(&agent.model_id, 24)),
                        Style::default().fg(colors.accent_magenta),
                    ),
                ];
                if filter.is_none() {
                    spans.push(Span::styled(
                        format!("  {}", short_id(&agent.session_id)),
                        Style::default().fg(colors.text_muted),
                    ));
                }
                Line::from(spans)
            })
            .collect();

        let title = format!("AGENTS ({})", agents.len());
        frame.render_widget(
            Paragraph::new(lines).block(self.panel_block(Panel::Agents, title, colors)),
            area,
        );
    }

    fn render_models(&mut self, frame: &mut Frame, area: Rect, colors: &ThemeColors) {
        let mut models: Vec<(String, u64)> = self.store.model_calls().into_iter().collect();
        models.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let height = area.height.saturating_sub(2) as usize;
        let (visible, offset) = window(&models, self.model_scroll, height);
        self.model_scroll = offset;

        let name_width = area.width.saturating_sub(12) as usize;
        let lines: Vec<Line> = visible
            .iter()
            .map(|(model, count)| {
                Line::from(vec![
                    Span::styled(
                        format!("{:<width$}", truncate_with_ellipsis(model, name_width), width = name_width),
                        Style::default().fg(colors.accent_blue),
                    ),
                    Span::styled(format!("{:>8}", count), Style::default().fg(colors.accent_yellow)),
                ])
            })
            .collect();

        let total: u64 = models.iter().map(|(_, c)| c).sum();
        let title = format!("MODELS ({} calls)", total);
        frame.render_widget(
            Paragraph::new(lines).block(self.panel_block(Panel::Models, title, colors)),
            area,
        );
    }

    fn render_tools(&mut self, frame: &mut Frame, area: Rect, filter: Option<&str>, colors: &ThemeColors) {
        let mut calls = self.store.tool_calls(filter);
        calls.reverse();

        let height = area.height.saturating_sub(2) as usize;
        let (visible, offset) = window(&calls, self.tool_scroll, height);
        self.tool_scroll = offset;

        let lines: Vec<Line> = visible
            .iter()
            .map(|call| {
                Line::from(vec![
                    Span::styled(clock(&call.timestamp), Style::default().fg(colors.text_muted)),
                    Span::raw("  "),
                    badge(format!("{:<12}", call.name), colors.accent_cyan),
                    Span::styled(short_id(&call.session_id).to_string(), Style::default().fg(colors.text_muted)),
                ])
            })
            .collect();

        let title = format!("TOOL CALLS ({})", calls.len());
        frame.render_widget(
            Paragraph::new(lines).block(self.panel_block(Panel::Tools, title, colors)),
            area,
        );
    }

    fn log_line(event: &LogEvent, colors: &ThemeColors) -> Line<'static> {
        let mut spans = vec![
            Span::styled(clock(&event.timestamp), Style::default().fg(colors.text_muted)),
            Span::raw(" "),
            badge(format!("{:<5}", event.level.label()), colors.level(event.level)),
            Span::styled(format!(" {:<10}", event.service), Style::default().fg(colors.text_secondary)),
        ];
        if !event.agent.is_empty() {
            spans.push(Span::styled(
                format!(" {}", event.agent),
                Style::default().fg(colors.agent_color(&event.agent)),
            ));
        }
        if !event.model_id.is_empty() {
            spans.push(Span::styled(
                format!(" {}", event.model_id),
                Style::default().fg(colors.accent_magenta),
            ));
        }
        if let Some(title) = event.field("title") {
            spans.push(Span::styled(format!(" \"{}\"", title), Style::default().fg(colors.text_primary)));
        }
        Line::from(spans)
    }

    fn render_logs(&mut self, frame: &mut Frame, area: Rect, filter: Option<&str>, colors: &ThemeColors) {
        let logs: Vec<LogEvent> = self
            .store
            .latest_logs(HISTORY_CAPACITY)
            .into_iter()
            .filter(|e| filter.is_none_or(|id| e.session_id == id))
            .collect();

        let height = area.height.saturating_sub(2) as usize;
        let (visible, offset) = window(&logs, self.log_scroll, height);
        self.log_scroll = offset;

        let lines: Vec<Line> = visible.iter().map(|e| Self::log_line(e, colors)).collect();
        let title = format!("LOG ({})", logs.len());
        frame.render_widget(
            Paragraph::new(lines).block(self.panel_block(Panel::Logs, title, colors)),
            area,
        );
    }

    fn render_status(
        &self,
        frame: &mut Frame,
        area: Rect,
        sessions: &[SessionMeta],
        filter: Option<&str>,
        colors: &ThemeColors,
    ) {
        let current = self.watcher.current_file();
        let state = match self.watcher.status() {
            WatcherStatus::Running if current.is_some() => badge(" ● LIVE ", colors.success),
            WatcherStatus::Running => badge(" ◌ WAITING ", colors.warning),
            WatcherStatus::Failed(_) => badge(" ✖ FAILED ", colors.error),
            _ => badge(" ○ OFFLINE ", colors.text_muted),
        };

        let file = current
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("no log file in {}", self.watcher.dir().display()));

        let scope = match filter {
            Some(id) => {
                let title = sessions
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| s.display_title().to_string())
                    .unwrap_or_else(|| id.to_string());
                format!("session: {}", truncate_with_ellipsis(&title, 30))
            }
            None => "all sessions".to_string(),
        };

        let mut spans = vec![
            state,
            Span::styled(format!(" {} ", file), Style::default().fg(colors.text_secondary)),
            Span::styled(format!("│ {} ", scope), Style::default().fg(colors.info)),
        ];
        if let Some(plan) = &self.plan {
            spans.push(Span::styled(
                format!(
                    "│ plan {} {}/{} ({:.0}%) ",
                    plan.plan_name,
                    plan.completed,
                    plan.total,
                    plan.percent()
                ),
                Style::default().fg(colors.accent_yellow),
            ));
        }
        spans.push(Span::styled(
            "│ tab focus  j/k scroll  enter filter  a all  q quit",
            Style::default().fg(colors.text_muted),
        ));

        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use chrono::DateTime;
    use ratatui::{backend::TestBackend, Terminal};

    fn session(id: &str, title: &str) -> SessionMeta {
        SessionMeta {
            id: id.to_string(),
            project_id: "p".to_string(),
            directory: "/w".to_string(),
            title: title.to_string(),
            parent_id: None,
            worktree: String::new(),
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }

    fn app() -> (App, Arc<Store>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new());
        store.set_session_list(vec![session("ses_1", "Fix parser"), session("ses_2", "Add tests")]);
        let watcher = Arc::new(LogWatcher::new(tmp.path()));
        let app = App::new(
            store.clone(),
            watcher,
            tmp.path().to_path_buf(),
            Arc::new(AtomicBool::new(false)),
        );
        (app, store, tmp)
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    #[test]
    fn enter_filters_to_highlighted_session() {
        let (mut app, store, _tmp) = app();
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Enter);
        assert_eq!(store.selected_session().as_deref(), Some("ses_2"));

        press(&mut app, KeyCode::Char('a'));
        assert_eq!(store.selected_session(), None);
        assert_eq!(app.session_state.selected(), Some(0));
    }

    #[test]
    fn tab_cycles_focus_and_quit_exits() {
        let (mut app, _store, _tmp) = app();
        for _ in 0..Panel::ORDER.len() {
            press(&mut app, KeyCode::Tab);
        }
        assert_eq!(app.focus, Panel::Sessions);
        press(&mut app, KeyCode::BackTab);
        assert_eq!(app.focus, Panel::Logs);
        press(&mut app, KeyCode::Char('q'));
        assert!(app.exit);
    }

    #[test]
    fn external_shutdown_ends_the_loop() {
        let (mut app, _store, _tmp) = app();
        assert!(!app.should_exit());
        app.shutdown.store(true, Ordering::SeqCst);
        assert!(app.should_exit());
    }

    #[test]
    fn renders_live_aggregates() {
        let (mut app, store, _tmp) = app();
        store.apply_event(
            parse_line("INFO 2026-01-31T10:05:40 +1ms service=llm modelID=opus sessionID=ses_1 agent=prometheus mode=all")
                .unwrap(),
        );

        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|frame| app.draw(frame)).unwrap();
        let screen: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();

        assert!(screen.contains("Fix parser"));
        assert!(screen.contains("prometheus"));
        assert!(screen.contains("opus"));
        assert!(screen.contains("OFFLINE"));
        assert!(screen.contains("no log file in"));
    }
}
