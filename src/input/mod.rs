//! Line editing over raw keystroke tokens, plus the terminal key reader that
//! produces them. The editor owns no network or rendering knowledge; it only
//! reports structured events and what to echo.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;

/// One raw input token from the terminal surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputToken {
    Char(char),
    Enter,
    Backspace,
    Interrupt,
}

/// Outcome of feeding one token to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Carriage return: the trimmed line, buffer cleared.
    Submitted(String),
    /// Interrupt control code; the buffer is left untouched.
    Interrupted,
    Continue,
}

/// What the display surface should echo for a consumed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    None,
    Char(char),
    /// Erase the last echoed character.
    Rubout,
}

/// Accumulates printable input into a logical command line.
#[derive(Debug, Default)]
pub struct LineEditor {
    line: String,
}

impl LineEditor {
    pub fn submit_token(&mut self, token: InputToken) -> (LineEvent, Echo) {
        match token {
            InputToken::Enter => {
                let text = self.line.trim().to_string();
                self.line.clear();
                (LineEvent::Submitted(text), Echo::None)
            }
            InputToken::Interrupt => (LineEvent::Interrupted, Echo::None),
            InputToken::Backspace => {
                // No-op at an empty line so the prompt is never erased.
                if self.line.pop().is_some() {
                    (LineEvent::Continue, Echo::Rubout)
                } else {
                    (LineEvent::Continue, Echo::None)
                }
            }
            InputToken::Char(c) => {
                self.line.push(c);
                (LineEvent::Continue, Echo::Char(c))
            }
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }
}

/// Puts the terminal into raw mode for the guard's lifetime.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Reads key events on a dedicated thread and forwards them as tokens. The
/// thread ends when the receiving side is dropped or the terminal goes away.
pub fn spawn_key_reader() -> mpsc::UnboundedReceiver<InputToken> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        let event = match event::read() {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "key reader stopped");
                break;
            }
        };
        let Event::Key(key) = event else { continue };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        let token = match key.code {
            KeyCode::Enter => InputToken::Enter,
            KeyCode::Backspace => InputToken::Backspace,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                InputToken::Interrupt
            }
            KeyCode::Char(c) => InputToken::Char(c),
            _ => continue,
        };
        if tx.send(token).is_err() {
            break;
        }
    });
    rx
}
