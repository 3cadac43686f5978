//! Full-screen rendering of the interactive session
//!
//! The loop here only moves data: terminal keys and runtime completions go
//! into [`Session::update`], commands coming back are handed to the caller.

use anyhow::{Context, Result};
use crossterm::event::{self as term, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{cursor, execute};
use envpatch_core::docker::short_id;
use envpatch_core::session::{Command, Event, Key, Screen, Session};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState};
use ratatui::{Frame, Terminal};
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

const UI_POLL_INTERVAL: Duration = Duration::from_millis(60);
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Translate a terminal key into a session key
pub fn map_key(key: KeyEvent) -> Option<Key> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Key::Interrupt),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Up => Some(Key::Up),
        KeyCode::Down => Some(Key::Down),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Tab => Some(Key::Tab),
        KeyCode::Esc => Some(Key::Esc),
        KeyCode::Backspace => Some(Key::Backspace),
        KeyCode::Char(c) => Some(Key::Char(c)),
        _ => None,
    }
}

/// Drive the session until a quit command is dispatched.
///
/// `dispatch` runs a command and returns `false` once the session should end.
pub fn run_session<F>(
    session: Session,
    events: &mut UnboundedReceiver<Event>,
    dispatch: F,
) -> Result<()>
where
    F: FnMut(Command) -> bool,
{
    let mut terminal = setup_terminal()?;
    let result = event_loop(&mut terminal, session, events, dispatch);
    teardown_terminal(&mut terminal)?;
    result
}

fn event_loop<F>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut session: Session,
    events: &mut UnboundedReceiver<Event>,
    mut dispatch: F,
) -> Result<()>
where
    F: FnMut(Command) -> bool,
{
    let mut last_tick = Instant::now();
    loop {
        loop {
            match events.try_recv() {
                Ok(event) => {
                    let (next, running) = step(session, event, &mut dispatch);
                    session = next;
                    if !running {
                        return Ok(());
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Runtime event channel closed");
                    break;
                }
            }
        }

        if last_tick.elapsed() >= TICK_INTERVAL {
            last_tick = Instant::now();
            let (next, _) = step(session, Event::TickElapsed, &mut dispatch);
            session = next;
        }

        draw(terminal, &session)?;

        if !term::poll(UI_POLL_INTERVAL).context("failed to poll terminal events")? {
            continue;
        }
        let term::Event::Key(key) = term::read().context("failed to read terminal event")? else {
            continue;
        };
        if let Some(key) = map_key(key) {
            let (next, running) = step(session, Event::KeyPress(key), &mut dispatch);
            session = next;
            if !running {
                return Ok(());
            }
        }
    }
}

/// Feed one event; returns the next state and whether the session goes on
fn step<F>(session: Session, event: Event, dispatch: &mut F) -> (Session, bool)
where
    F: FnMut(Command) -> bool,
{
    let (next, command) = session.update(event);
    let running = match command {
        Some(command) => dispatch(command),
        None => true,
    };
    (next, running)
}

/// Draw the session onto any backend
pub fn draw<B: Backend>(terminal: &mut Terminal<B>, session: &Session) -> Result<()> {
    terminal
        .draw(|frame| render(frame, session))
        .context("failed to render session")?;
    Ok(())
}

pub fn render(frame: &mut Frame, session: &Session) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    render_header(frame, session, sections[0]);
    match session.environment() {
        Some(_) => render_environment(frame, session, sections[1]),
        None => render_containers(frame, session, sections[1]),
    }
    render_footer(frame, session, sections[2]);
}

fn render_header(frame: &mut Frame, session: &Session, area: Rect) {
    let title = match session.environment() {
        Some(view) => format!("envpatch: {} ({})", view.container_name, short_id(&view.container_id)),
        None => format!("envpatch: {} container(s)", session.containers().len()),
    };
    let status = if session.is_loading() {
        format!("{} working", session.busy_indicator())
    } else {
        String::new()
    };
    let header = Paragraph::new(vec![Line::raw(title), Line::raw(status)]).block(
        Block::default()
            .borders(Borders::TOP | Borders::LEFT | Borders::RIGHT)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(header, area);
}

fn highlight() -> Style {
    Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD)
}

/// Selection for a table; ratatui scrolls the viewport to keep it visible
fn table_state(selected: usize, len: usize) -> TableState {
    let selected = (len > 0).then(|| selected.min(len - 1));
    TableState::default().with_selected(selected)
}

fn render_containers(frame: &mut Frame, session: &Session, area: Rect) {
    let rows = session
        .containers()
        .iter()
        .map(|container| {
            Row::new(vec![
                Cell::from(short_id(&container.id).to_string()),
                Cell::from(container.display_name()),
                Cell::from(container.command.clone()),
            ])
        })
        .collect::<Vec<_>>();

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(20),
            Constraint::Percentage(30),
            Constraint::Percentage(50),
        ],
    )
    .header(Row::new(vec!["ID", "Name", "Command"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .highlight_style(highlight())
    .block(Block::default().title("Containers").borders(Borders::ALL));
    let mut state = table_state(session.selected(), session.containers().len());
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_environment(frame: &mut Frame, session: &Session, area: Rect) {
    let Some(view) = session.environment() else {
        return;
    };
    let rows = view
        .rows
        .iter()
        .map(|var| Row::new(vec![Cell::from(var.name.clone()), Cell::from(var.value.clone())]))
        .collect::<Vec<_>>();

    let table = Table::new(
        rows,
        [Constraint::Percentage(35), Constraint::Percentage(65)],
    )
    .header(Row::new(vec!["Name", "Value"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .highlight_style(highlight())
    .block(Block::default().title("Environment").borders(Borders::ALL));
    let mut state = table_state(view.selected, view.rows.len());
    frame.render_stateful_widget(table, area, &mut state);
}

fn footer_hint(session: &Session) -> String {
    if let Some(prompt) = session.environment().and_then(|view| view.prompt.as_ref()) {
        return format!("{} {}█   (Enter confirm, Esc cancel)", prompt.label(), prompt.input());
    }
    match session.screen() {
        Screen::Containers => "↑/↓ select  Enter open  r refresh  q quit".to_string(),
        Screen::Environment(_) => "↑/↓ select  Enter edit  a add  Esc back  q quit".to_string(),
        Screen::Loading(_) => "please wait…".to_string(),
    }
}

fn render_footer(frame: &mut Frame, session: &Session, area: Rect) {
    let mut lines = vec![Line::raw(footer_hint(session))];
    if let Some(error) = session.error() {
        lines.push(Line::styled(error.to_string(), Style::default().fg(Color::Red)));
    } else if let Some(notice) = session.notice() {
        lines.push(Line::styled(notice.to_string(), Style::default().fg(Color::Green)));
    }
    let footer = Paragraph::new(lines).block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, area);
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)
        .context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("failed to initialize terminal")
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to restore cursor")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use envpatch_core::docker::ContainerSummary;
    use envpatch_core::env::EnvVar;
    use ratatui::backend::TestBackend;

    fn containers() -> Vec<ContainerSummary> {
        vec![
            ContainerSummary {
                id: "0123456789abcdef0123".to_string(),
                names: vec!["web-1".to_string()],
                command: "nginx -g 'daemon off;'".to_string(),
                image: "nginx".to_string(),
                state: "running".to_string(),
            },
            ContainerSummary {
                id: "fedcba9876543210fedc".to_string(),
                names: vec!["db".to_string()],
                command: "postgres".to_string(),
                image: "postgres:16".to_string(),
                state: "exited".to_string(),
            },
        ]
    }

    fn screen_text(session: &Session) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        draw(&mut terminal, session).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_map_key() {
        let press = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(map_key(press(KeyCode::Up)), Some(Key::Up));
        assert_eq!(map_key(press(KeyCode::Char('x'))), Some(Key::Char('x')));
        assert_eq!(map_key(press(KeyCode::F(5))), None);
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Key::Interrupt)
        );
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL)),
            None
        );
    }

    #[test]
    fn test_container_screen_lists_short_ids() {
        let text = screen_text(&Session::new(containers()));
        assert!(text.contains("0123456789ab"));
        assert!(!text.contains("0123456789abc"));
        assert!(text.contains("web-1"));
        assert!(text.contains("postgres"));
        assert!(text.contains("r refresh"));
    }

    #[test]
    fn test_environment_screen_shows_prompt() {
        let session = Session::new(containers());
        let (session, _) = session.update(Event::KeyPress(Key::Enter));
        assert!(screen_text(&session).contains("working"));

        let (session, _) = session.update(Event::SnapshotLoaded {
            container_id: "0123456789abcdef0123".to_string(),
            environment: vec![EnvVar::from_entry("PORT=8080"), EnvVar::from_entry("MODE=dev")],
        });
        let (session, _) = session.update(Event::KeyPress(Key::Enter));

        let text = screen_text(&session);
        assert!(text.contains("envpatch: web-1"));
        assert!(text.contains("MODE"));
        assert!(text.contains("PORT = 8080"));
        assert!(text.contains("Esc cancel"));
    }

    #[test]
    fn test_selected_row_below_the_fold_is_visible() {
        let session = Session::new(containers());
        let (session, _) = session.update(Event::KeyPress(Key::Enter));
        let environment = (0..30)
            .map(|i| EnvVar::from_entry(&format!("VAR_{:02}=value-{}", i, i)))
            .collect();
        let (mut session, _) = session.update(Event::SnapshotLoaded {
            container_id: "0123456789abcdef0123".to_string(),
            environment,
        });
        for _ in 0..25 {
            session = session.update(Event::KeyPress(Key::Down)).0;
        }
        assert_eq!(session.environment().unwrap().selected, 25);

        let text = screen_text(&session);
        assert!(text.contains("VAR_25"));
        assert!(!text.contains("VAR_00"));
    }

    #[test]
    fn test_long_container_list_scrolls() {
        let rows: Vec<ContainerSummary> = (0..40)
            .map(|i| ContainerSummary {
                id: format!("{:064x}", i),
                names: vec![format!("svc-{:02}", i)],
                command: "sleep infinity".to_string(),
                image: String::new(),
                state: String::new(),
            })
            .collect();
        let mut session = Session::new(rows);
        for _ in 0..39 {
            session = session.update(Event::KeyPress(Key::Down)).0;
        }

        let text = screen_text(&session);
        assert!(text.contains("svc-39"));
        assert!(!text.contains("svc-00"));
    }

    #[test]
    fn test_step_stops_on_quit() {
        let mut seen = Vec::new();
        let mut dispatch = |command: Command| {
            let running = command != Command::Quit;
            seen.push(command);
            running
        };

        let (session, running) = step(
            Session::new(containers()),
            Event::KeyPress(Key::Char('r')),
            &mut dispatch,
        );
        assert!(running);
        // Keys are dropped until the refreshed list arrives
        let (session, running) = step(session, Event::KeyPress(Key::Char('q')), &mut dispatch);
        assert!(running);
        let (session, _) = step(session, Event::ContainersLoaded(containers()), &mut dispatch);
        let (_, running) = step(session, Event::KeyPress(Key::Char('q')), &mut dispatch);
        assert!(!running);
        assert_eq!(seen, vec![Command::LoadContainers, Command::Quit]);
    }
}
