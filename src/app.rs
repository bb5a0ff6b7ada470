use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};

use crate::actions::Action;
use crate::orchestrator::{SessionOrchestrator, Task};
use crate::selection::ansi_to_line;
use crate::status::{AgentKind, Status};

/// Theme colors inspired by Claude Code
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bg: Color::Rgb(30, 30, 30),
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87), // Claude orange
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

impl Theme {
    fn status_span(&self, status: Option<Status>) -> Span<'static> {
        match status {
            Some(Status::Active) => Span::styled("● ", Style::default().fg(self.success)),
            Some(Status::Thinking) => Span::styled("◐ ", Style::default().fg(self.warning)),
            Some(Status::Waiting) => Span::styled("? ", Style::default().fg(self.accent)),
            Some(Status::Done) => Span::styled("✓ ", Style::default().fg(self.success)),
            Some(Status::Error) => Span::styled("✗ ", Style::default().fg(self.error)),
            Some(Status::Paused) => Span::styled("‖ ", Style::default().fg(self.dim)),
            None => Span::styled("○ ", Style::default().fg(self.dim)),
        }
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Creating,
    Renaming,
    Confirming,
}

/// Main application state
pub struct App {
    pub orchestrator: SessionOrchestrator,
    pub list_state: ListState,
    pub theme: Theme,
    pub input_mode: InputMode,
    /// Text input buffer
    pub input_buffer: String,
    /// Agent for the shell being created
    pub new_agent: AgentKind,
    pub new_skip_perms: bool,
}

impl App {
    pub fn new(orchestrator: SessionOrchestrator) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            orchestrator,
            list_state,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            new_agent: AgentKind::Claude,
            new_skip_perms: false,
        }
    }

    /// Take pending tasks (drains the queue)
    pub fn take_pending_tasks(&mut self) -> Vec<Task> {
        self.orchestrator.take_pending_tasks()
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::Mouse(event) => {
                self.handle_mouse(event);
                Ok(false)
            }
            Action::Quit => Ok(true),
            other => {
                self.orchestrator.handle(other);
                Ok(false)
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.orchestrator.is_interactive() {
            self.orchestrator.handle_interactive_key(key);
            return Ok(false);
        }

        // Clear the message on any key press
        if self.input_mode == InputMode::Normal {
            self.orchestrator.clear_notice();
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Creating => self.handle_creating_key(key),
            InputMode::Renaming => self.handle_renaming_key(key),
            InputMode::Confirming => self.handle_confirming_key(key),
        }
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        if self.input_mode == InputMode::Normal {
            self.orchestrator.handle_mouse(event);
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.orchestrator.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.orchestrator.select_previous(),
            KeyCode::Enter => {
                if self.orchestrator.selected_session().is_some() && !self.orchestrator.enter_interactive() {
                    self.orchestrator
                        .set_notice("No running pane here. Press 's' to start the agent.");
                }
            }
            KeyCode::Char('a') => self.orchestrator.attach_selected(),
            KeyCode::Char('s') => self.orchestrator.start_agent_selected(),
            KeyCode::Char('p') => self.orchestrator.toggle_pause_selected(),
            KeyCode::Char('r') => self.orchestrator.refresh_worktrees(),
            KeyCode::Char('n') => {
                self.input_mode = InputMode::Creating;
                self.input_buffer.clear();
                self.new_agent = AgentKind::Claude;
                self.new_skip_perms = false;
            }
            KeyCode::Char('R') => {
                if let Some(session) = self.orchestrator.selected_session().filter(|s| s.is_shell()) {
                    self.input_buffer = session.display_name.clone();
                    self.input_mode = InputMode::Renaming;
                }
            }
            KeyCode::Char('d') => {
                if self.orchestrator.selected_session().is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_creating_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let name = std::mem::take(&mut self.input_buffer);
                self.orchestrator
                    .spawn_shell(&name, self.new_agent, self.new_skip_perms);
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Tab => self.new_agent = self.new_agent.next(),
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.new_skip_perms = !self.new_skip_perms;
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_renaming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Enter => {
                let name = std::mem::take(&mut self.input_buffer);
                self.orchestrator.rename_selected(&name);
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                self.orchestrator.kill_selected();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);

        // Render modal dialogs on top
        match self.input_mode {
            InputMode::Creating => self.render_create_dialog(frame),
            InputMode::Renaming => self.render_rename_dialog(frame),
            InputMode::Confirming => self.render_confirm_dialog(frame),
            InputMode::Normal => {}
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let counts = self.orchestrator.statuses();
        let waiting = counts.iter().filter(|s| **s == Some(Status::Waiting)).count();
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " Agent Deck ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ {} sessions │ {} waiting", counts.len(), waiting),
                Style::default().fg(self.theme.dim),
            ),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(30), // Session list
                Constraint::Percentage(70), // Pane preview
            ])
            .split(area);

        self.render_session_list(frame, chunks[0]);
        self.render_preview(frame, chunks[1]);
    }

    fn render_session_list(&mut self, frame: &mut Frame, area: Rect) {
        let sessions = self.orchestrator.sessions();
        let items: Vec<ListItem> = if sessions.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No sessions found. Press 'n' to create one.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            sessions
                .iter()
                .map(|session| {
                    let mut spans = vec![
                        self.theme.status_span(session.status()),
                        Span::styled(session.display_name.clone(), Style::default().fg(self.theme.fg)),
                    ];
                    if let Some(branch) = session.branch() {
                        spans.push(Span::styled(
                            format!(" ({branch})"),
                            Style::default().fg(self.theme.dim),
                        ));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Sessions ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        self.list_state.select(Some(self.orchestrator.selected_index()));
        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_preview(&mut self, frame: &mut Frame, area: Rect) {
        let interactive = self.orchestrator.is_interactive();
        let (title, border) = match self.orchestrator.selected_session() {
            Some(session) => {
                let status = match (session.status(), &session.agent) {
                    (Some(status), _) => status.label(),
                    (None, Some(_)) => "unknown",
                    (None, None) => "no pane",
                };
                let title = if interactive {
                    format!(" {} [{}] INTERACTIVE ", session.display_name, status)
                } else {
                    format!(" {} [{}] ", session.display_name, status)
                };
                (title, if interactive { self.theme.accent } else { self.theme.dim })
            }
            None => (" Preview ".to_string(), self.theme.dim),
        };

        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        self.orchestrator
            .set_viewport(inner.x, inner.y, inner.width, inner.height);

        let lines: Vec<Line> = match self.orchestrator.selected_session() {
            Some(session) if session.agent.is_some() => self
                .orchestrator
                .preview_lines()
                .iter()
                .map(|line| ansi_to_line(line))
                .collect(),
            Some(_) => vec![Line::from(Span::styled(
                "No agent running. Press 's' to start one.",
                Style::default().fg(self.theme.dim),
            ))],
            None => vec![Line::from(Span::styled(
                "Press 'n' to create a new shell",
                Style::default().fg(self.theme.dim),
            ))],
        };
        frame.render_widget(Paragraph::new(lines), inner);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text = if self.orchestrator.is_interactive() {
            " Ctrl+\\: Exit │ drag: Select │ Alt+c: Copy │ Alt+v: Paste │ wheel: Scroll "
        } else {
            " q: Quit │ j/k: Navigate │ Enter: Interact │ a: Attach │ n: New │ R: Rename │ d: Delete │ s: Start │ p: Pause │ r: Rescan "
        };

        let content = match self.orchestrator.notice() {
            Some(msg) => {
                let lower = msg.to_lowercase();
                let style = if lower.contains("fail") || lower.contains("error") {
                    Style::default().fg(self.theme.error)
                } else {
                    Style::default().fg(self.theme.success)
                };
                Line::from(Span::styled(format!(" {} ", msg), style))
            }
            None => Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim))),
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_create_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 30, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" New Shell ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let text = vec![
            Line::from(""),
            Line::from(Span::styled("Display name:", Style::default().fg(self.theme.fg))),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(vec![
                Span::styled("Agent: ", Style::default().fg(self.theme.dim)),
                Span::styled(
                    self.new_agent.profile().display_name,
                    Style::default().fg(self.theme.fg),
                ),
                Span::styled(
                    if self.new_skip_perms { "  (skip permissions)" } else { "" },
                    Style::default().fg(self.theme.warning),
                ),
            ]),
            Line::from(""),
            Line::from(Span::styled(
                "Enter: create │ Tab: agent │ Ctrl+s: skip permissions │ Esc: cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }

    fn render_rename_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Rename Shell ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("▶ {}_", self.input_buffer),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press Enter to rename, Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Confirm Delete ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let (prompt, detail) = match self.orchestrator.selected_session() {
            Some(s) if s.is_shell() => (
                format!("Delete shell '{}'?", s.display_name),
                "The tmux session is killed and removed from the manifest.",
            ),
            Some(s) => (
                format!("Stop the agent in '{}'?", s.display_name),
                "The worktree itself is kept.",
            ),
            None => ("Nothing selected".to_string(), ""),
        };

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(prompt, Style::default().fg(self.theme.fg))),
            Line::from(""),
            Line::from(Span::styled(detail, Style::default().fg(self.theme.warning))),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkerConfig;
    use crate::manifest::ShellDefinition;
    use crate::orchestrator::OrchestratorOptions;
    use crate::status::TextClassifier;
    use std::path::PathBuf;
    use std::time::Duration;

    fn app() -> App {
        let options = OrchestratorOptions {
            poll_interval: Duration::from_secs(1),
            capture_ttl: Duration::from_millis(800),
            buffer_capacity: 100,
            project_dir: PathBuf::from("/work/proj"),
            default_agent: AgentKind::Claude,
            cache_capacity: 16,
        };
        let mut orchestrator =
            SessionOrchestrator::new(options, TextClassifier::new(&MarkerConfig::default()));
        orchestrator.reconcile_shells(
            vec![ShellDefinition::new("proj-sh-1", "one")],
            &["proj-sh-1".to_string()],
        );
        App::new(orchestrator)
    }

    fn press(app: &mut App, code: KeyCode) -> bool {
        app.handle_action(Action::KeyPress(KeyEvent::new(code, KeyModifiers::NONE)))
            .unwrap()
    }

    #[test]
    fn test_quit_key() {
        let mut app = app();
        assert!(press(&mut app, KeyCode::Char('q')));
    }

    #[test]
    fn test_create_dialog_spawns_shell() {
        let mut app = app();
        press(&mut app, KeyCode::Char('n'));
        assert_eq!(app.input_mode, InputMode::Creating);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.new_agent, AgentKind::Codex);
        for c in "api".chars() {
            press(&mut app, KeyCode::Char(c));
        }
        press(&mut app, KeyCode::Enter);

        assert_eq!(app.input_mode, InputMode::Normal);
        match &app.take_pending_tasks()[..] {
            [Task::SpawnShell { def, .. }] => {
                assert_eq!(def.display_name, "api");
                assert_eq!(def.tmux_name, "proj-sh-2");
                assert_eq!(def.agent_type, AgentKind::Codex);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_interactive_mode_captures_keys() {
        let mut app = app();
        press(&mut app, KeyCode::Enter);
        assert!(app.orchestrator.is_interactive());
        app.take_pending_tasks();

        // 'q' goes to the pane instead of quitting
        assert!(!press(&mut app, KeyCode::Char('q')));
        assert_eq!(app.take_pending_tasks().len(), 1);
    }

    #[test]
    fn test_delete_requires_confirmation() {
        let mut app = app();
        press(&mut app, KeyCode::Char('d'));
        assert!(app.take_pending_tasks().is_empty());
        press(&mut app, KeyCode::Char('y'));
        assert_eq!(
            app.take_pending_tasks(),
            vec![Task::KillShell {
                tmux_name: "proj-sh-1".into()
            }]
        );
    }
}
