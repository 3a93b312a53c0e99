//! Inline fuzzy picker.
//!
//! Candidate lines are streamed in over a channel by a producer task while the
//! event loop waits for the user's choice. The picker only ever answers with a
//! position in the candidate list it was given, so callers map the answer back
//! into the snapshot that produced the lines.

use std::collections::HashMap;
use std::io::{self, Stderr};

use anyhow::{bail, Context, Result};
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Padding, Paragraph},
    Frame, Terminal, TerminalOptions, Viewport,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod colors {
    use ratatui::style::Color;

    pub const CLAUDE_ORANGE: Color = Color::Rgb(217, 119, 87);
    pub const CLAUDE_CREAM: Color = Color::Rgb(250, 245, 235);
    pub const CLAUDE_WARM_GRAY: Color = Color::Rgb(120, 113, 108);
    pub const BORDER_INACTIVE: Color = Color::Rgb(68, 64, 60);
    pub const SELECTION_BG: Color = Color::Rgb(34, 30, 26);
}

/// Rows never drop below this, whatever the terminal height
const MIN_HEIGHT: u16 = 6;

#[derive(Debug, Clone)]
pub struct PickerOptions {
    pub prompt: String,
    /// Share of the terminal height taken by the picker
    pub height_percent: u16,
    /// Width share of the preview pane, 0 disables it
    pub preview_percent: u16,
}

impl Default for PickerOptions {
    fn default() -> Self {
        Self {
            prompt: "worktree: ".to_string(),
            height_percent: 40,
            preview_percent: 45,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerOutcome {
    /// Position of the chosen line in the candidate list
    Selected(usize),
    Cancelled,
}

/// Query, candidates and highlight, independent of any terminal
pub struct PickerState {
    candidates: Vec<String>,
    filtered_indices: Vec<usize>,
    list_state: ListState,
    query: String,
    matcher: SkimMatcherV2,
    loading: bool,
}

impl Default for PickerState {
    fn default() -> Self {
        Self::new()
    }
}

impl PickerState {
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
            filtered_indices: Vec::new(),
            list_state: ListState::default(),
            query: String::new(),
            matcher: SkimMatcherV2::default(),
            loading: true,
        }
    }

    pub fn push_candidate(&mut self, line: String) {
        self.candidates.push(line);
        self.refilter();
    }

    /// No more candidates will arrive
    pub fn finish_loading(&mut self) {
        self.loading = false;
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Candidate positions currently shown, best match first
    pub fn visible(&self) -> &[usize] {
        &self.filtered_indices
    }

    /// Candidate position under the cursor
    pub fn selected_index(&self) -> Option<usize> {
        self.list_state
            .selected()
            .and_then(|i| self.filtered_indices.get(i))
            .copied()
    }

    fn refilter(&mut self) {
        let previous = self.selected_index();

        if self.query.is_empty() {
            self.filtered_indices = (0..self.candidates.len()).collect();
        } else {
            let mut scored: Vec<(usize, i64)> = self
                .candidates
                .iter()
                .enumerate()
                .filter_map(|(i, line)| {
                    self.matcher
                        .fuzzy_match(line, &self.query)
                        .map(|score| (i, score))
                })
                .collect();
            // stable: equal scores keep snapshot order
            scored.sort_by(|a, b| b.1.cmp(&a.1));
            self.filtered_indices = scored.into_iter().map(|(i, _)| i).collect();
        }

        let keep = previous.and_then(|p| self.filtered_indices.iter().position(|&i| i == p));
        match keep {
            Some(pos) => self.list_state.select(Some(pos)),
            None if self.filtered_indices.is_empty() => self.list_state.select(None),
            None => self.list_state.select(Some(0)),
        }
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.list_state.select(None);
        self.refilter();
    }

    pub fn move_selection(&mut self, delta: i32) {
        if self.filtered_indices.is_empty() {
            return;
        }
        let len = self.filtered_indices.len() as i64;
        let current = self.list_state.selected().unwrap_or(0) as i64;
        let next = (current + delta as i64).rem_euclid(len);
        self.list_state.select(Some(next as usize));
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<PickerOutcome> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return Some(PickerOutcome::Cancelled),
            KeyCode::Char('c') if ctrl => return Some(PickerOutcome::Cancelled),

            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::Char('p') if ctrl => self.move_selection(-1),
            KeyCode::Char('n') if ctrl => self.move_selection(1),

            KeyCode::Enter => return self.selected_index().map(PickerOutcome::Selected),

            KeyCode::Backspace => {
                let mut query = self.query.clone();
                query.pop();
                self.set_query(&query);
            }
            KeyCode::Char('u') if ctrl => self.set_query(""),
            KeyCode::Char(c) if !ctrl => {
                let query = format!("{}{c}", self.query);
                self.set_query(&query);
            }
            _ => {}
        }
        None
    }
}

/// Run the picker over `lines` and return the chosen line's position.
///
/// `preview` is asked for the text shown next to the highlighted line.
pub async fn pick<F>(
    lines: Vec<String>,
    options: &PickerOptions,
    mut preview: F,
) -> Result<Option<usize>>
where
    F: FnMut(usize) -> Vec<String>,
{
    if !atty::is(atty::Stream::Stderr) || !atty::is(atty::Stream::Stdin) {
        bail!("Interactive picker requires a terminal");
    }
    if lines.is_empty() {
        return Ok(None);
    }

    info!(candidates = lines.len(), "Opening picker");
    let (tx, rx) = mpsc::channel::<String>(lines.len());
    tokio::spawn(async move {
        for line in lines {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let (_, rows) = crossterm::terminal::size().context("Failed to read terminal size")?;
    let height = (u32::from(rows) * u32::from(options.height_percent) / 100) as u16;
    let height = height.max(MIN_HEIGHT).min(rows);

    enable_raw_mode()?;
    let _raw_mode = RawModeGuard;
    let mut terminal = Terminal::with_options(
        CrosstermBackend::new(io::stderr()),
        TerminalOptions {
            viewport: Viewport::Inline(height),
        },
    )?;

    let mut state = PickerState::new();
    let outcome = run_picker(&mut terminal, &mut state, rx, options, &mut preview).await;

    terminal.clear()?;

    let outcome = outcome?;
    info!(?outcome, "Picker closed");
    Ok(match outcome {
        PickerOutcome::Selected(i) => Some(i),
        PickerOutcome::Cancelled => None,
    })
}

/// Leaves raw mode on every exit path, errors included
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "Failed to leave raw mode");
        }
    }
}

async fn run_picker(
    terminal: &mut Terminal<CrosstermBackend<Stderr>>,
    state: &mut PickerState,
    mut rx: mpsc::Receiver<String>,
    options: &PickerOptions,
    preview: &mut dyn FnMut(usize) -> Vec<String>,
) -> Result<PickerOutcome> {
    let mut events = EventStream::new();
    let mut previews: HashMap<usize, Vec<String>> = HashMap::new();

    loop {
        if options.preview_percent > 0 {
            if let Some(idx) = state.selected_index() {
                // git blocks this worker, other tasks move off it
                previews
                    .entry(idx)
                    .or_insert_with(|| tokio::task::block_in_place(|| preview(idx)));
            }
        }

        let current_preview = state
            .selected_index()
            .and_then(|idx| previews.get(&idx))
            .map(Vec::as_slice)
            .unwrap_or_default();
        terminal.draw(|f| render(f, state, options, current_preview))?;

        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if let Some(outcome) = state.handle_key(key) {
                        return Ok(outcome);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(PickerOutcome::Cancelled),
            },

            line = rx.recv(), if state.is_loading() => match line {
                Some(line) => state.push_candidate(line),
                None => {
                    debug!(count = state.candidates.len(), "All candidates received");
                    state.finish_loading();
                }
            },
        }
    }
}

fn render(frame: &mut Frame, state: &mut PickerState, options: &PickerOptions, preview: &[String]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(frame.area());

    render_prompt(frame, state, options, chunks[0]);

    if options.preview_percent == 0 {
        render_list(frame, state, chunks[1]);
        return;
    }

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(100 - options.preview_percent.min(100)),
            Constraint::Percentage(options.preview_percent.min(100)),
        ])
        .split(chunks[1]);

    render_list(frame, state, body[0]);
    render_preview(frame, preview, body[1]);
}

fn render_prompt(frame: &mut Frame, state: &PickerState, options: &PickerOptions, area: Rect) {
    let counter = if state.is_loading() {
        format!("  {}/{} …", state.visible().len(), state.candidates.len())
    } else {
        format!("  {}/{}", state.visible().len(), state.candidates.len())
    };

    let line = Line::from(vec![
        Span::styled(
            options.prompt.as_str(),
            Style::default()
                .fg(colors::CLAUDE_ORANGE)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(state.query(), Style::default().fg(colors::CLAUDE_CREAM)),
        Span::styled(counter, Style::default().fg(colors::CLAUDE_WARM_GRAY)),
    ]);
    frame.render_widget(Paragraph::new(line), area);

    let cursor_x = area.x + (options.prompt.chars().count() + state.query().chars().count()) as u16;
    frame.set_cursor_position((cursor_x.min(area.right().saturating_sub(1)), area.y));
}

fn render_list(frame: &mut Frame, state: &mut PickerState, area: Rect) {
    let items: Vec<ListItem> = state
        .filtered_indices
        .iter()
        .map(|&i| ListItem::new(state.candidates[i].as_str()))
        .collect();

    let list = List::new(items)
        .highlight_style(
            Style::default()
                .bg(colors::SELECTION_BG)
                .fg(colors::CLAUDE_ORANGE)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("❯ ");

    frame.render_stateful_widget(list, area, &mut state.list_state);
}

fn render_preview(frame: &mut Frame, preview: &[String], area: Rect) {
    let lines: Vec<Line> = preview.iter().map(|l| Line::from(l.as_str())).collect();
    let block = Block::default()
        .borders(Borders::LEFT)
        .border_style(Style::default().fg(colors::BORDER_INACTIVE))
        .padding(Padding::horizontal(1));

    frame.render_widget(
        Paragraph::new(lines)
            .block(block)
            .style(Style::default().fg(colors::CLAUDE_WARM_GRAY)),
        area,
    );
}
