#![forbid(unsafe_code)]

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use crate::error::ToolhubError;
use crate::tools::theme::Theme;
use crate::tui;

/// Scrollable view over a scan log. Used standalone and as a dashboard overlay.
#[derive(Debug, Clone)]
pub struct LogView {
    title: String,
    lines: Vec<String>,
    scroll: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Continue,
    Quit,
    Cancelled,
}

impl LogView {
    #[must_use]
    pub fn new(title: impl Into<String>, content: &str) -> Self {
        let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();
        if lines.is_empty() {
            lines.push("(log is empty)".to_owned());
        }
        Self {
            title: title.into(),
            lines,
            scroll: 0,
        }
    }

    #[must_use]
    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyAction {
        if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c'))
        {
            return KeyAction::Cancelled;
        }

        let last = self.lines.len().saturating_sub(1);
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => return KeyAction::Quit,
            KeyCode::Char('j') | KeyCode::Down => self.scroll = (self.scroll + 1).min(last),
            KeyCode::Char('k') | KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
            KeyCode::PageDown => self.scroll = (self.scroll + 10).min(last),
            KeyCode::PageUp => self.scroll = self.scroll.saturating_sub(10),
            KeyCode::Char('g') | KeyCode::Home => self.scroll = 0,
            KeyCode::Char('G') | KeyCode::End => self.scroll = last,
            _ => {}
        }
        KeyAction::Continue
    }

    pub fn draw(&mut self, f: &mut Frame, area: Rect, theme: Theme) {
        let palette = theme.palette();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);

        f.render_widget(Clear, area);
        let block = Block::default()
            .title(self.title.as_str())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.accent))
            .style(Style::default().bg(palette.bg));
        let inner = block.inner(chunks[0]);
        f.render_widget(block, chunks[0]);

        let visible = inner.height as usize;
        let max_scroll = self.lines.len().saturating_sub(visible);
        if self.scroll > max_scroll {
            self.scroll = max_scroll;
        }

        let text = Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.as_str()))
                .collect::<Vec<_>>(),
        );
        let para = Paragraph::new(text)
            .scroll((u16::try_from(self.scroll).unwrap_or(u16::MAX), 0))
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(palette.fg).bg(palette.bg));
        f.render_widget(para, inner);

        let help = Paragraph::new("q/Esc: close • j/k: scroll • PgUp/PgDn • g/G: top/bottom")
            .style(
                Style::default()
                    .fg(palette.muted)
                    .bg(palette.bg)
                    .add_modifier(Modifier::ITALIC),
            );
        f.render_widget(help, chunks[1]);
    }
}

/// Full-screen log viewer for `scan log`.
pub fn run(title: &str, content: &str, theme: Theme) -> Result<(), ToolhubError> {
    if !tui::is_tty() {
        return Err(ToolhubError::Other("log viewer requires a TTY".to_owned()));
    }

    let mut view = LogView::new(title, content);
    let terminal = tui::init_terminal()?;
    let mut guard = tui::TerminalGuard::new(terminal);

    loop {
        guard
            .terminal()?
            .draw(|f| {
                let area = f.area();
                view.draw(f, area, theme);
            })
            .map_err(|e| ToolhubError::Other(format!("failed to draw log viewer: {e}")))?;

        if event::poll(Duration::from_millis(50))
            .map_err(|e| ToolhubError::Other(format!("event poll failed: {e}")))?
            && let Event::Key(key) = event::read()
                .map_err(|e| ToolhubError::Other(format!("event read failed: {e}")))?
        {
            match view.handle_key(key) {
                KeyAction::Continue => {}
                KeyAction::Quit => return Ok(()),
                KeyAction::Cancelled => return Err(ToolhubError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn scrolling_stays_within_bounds() {
        let mut view = LogView::new("log", "a\nb\nc");
        assert_eq!(view.handle_key(key(KeyCode::Char('k'))), KeyAction::Continue);
        assert_eq!(view.scroll(), 0);
        view.handle_key(key(KeyCode::PageDown));
        assert_eq!(view.scroll(), 2);
        view.handle_key(key(KeyCode::Char('g')));
        assert_eq!(view.scroll(), 0);
        view.handle_key(key(KeyCode::Char('G')));
        assert_eq!(view.scroll(), 2);
    }

    #[test]
    fn quit_and_cancel() {
        let mut view = LogView::new("log", "");
        assert_eq!(view.handle_key(key(KeyCode::Esc)), KeyAction::Quit);
        assert_eq!(
            view.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            KeyAction::Cancelled
        );
    }
}
