//! Styled output for the terminal surface. Lines are pushed into an
//! unbounded channel and drained to stdout by a writer task, so tests can
//! capture exactly what the operator would see.

use tokio::sync::mpsc;

/// New line while the terminal is in raw mode.
pub const LINE_CODE: &str = "\r\n";
/// Prompt text inserted before the operator's typing area.
pub const PROMPT: &str = "[#]";

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const CYAN: &str = "\x1b[38;5;14m";
pub const GREEN: &str = "\x1b[38;5;10m";
pub const PURPLE: &str = "\x1b[38;5;105m";
pub const RED: &str = "\x1b[38;5;9m";
pub const RED_ERROR: &str = "\x1b[1m\x1b[38;5;1m";
pub const YELLOW: &str = "\x1b[38;5;11m";

const CLEAR_ALL: &str = "\x1bc";

#[derive(Clone)]
pub struct Screen {
    tx: mpsc::UnboundedSender<String>,
}

impl Screen {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn write(&self, text: impl Into<String>) {
        let _ = self.tx.send(text.into());
    }

    pub fn writeln(&self, text: impl AsRef<str>) {
        self.write(format!("{}{}", text.as_ref(), LINE_CODE));
    }

    /// Clears everything currently displayed.
    pub fn clear(&self) {
        self.write(CLEAR_ALL);
    }

    /// Prints the prompt, re-showing any text still sitting in the editor.
    pub fn prompt(&self, pending_line: &str) {
        if pending_line.is_empty() {
            self.write(format!("{LINE_CODE}{BOLD}{CYAN}{PROMPT}{RESET} "));
        } else {
            self.write(format!("{LINE_CODE}{BOLD}{CYAN}{PROMPT}{RESET} {pending_line}"));
        }
    }

    pub fn error(&self, message: &str) {
        self.writeln(format!("{LINE_CODE}{RED_ERROR}{message}"));
    }

    pub fn welcome(&self) {
        self.writeln(format!("{BOLD}{CYAN}## Welcome to the Door Console CLI"));
        self.writeln(format!("|  # Type {PURPLE}'help'{CYAN} for help."));
        self.writeln("|  # Enter commands below.");
        self.writeln("-");
    }

    pub fn help(&self) {
        self.writeln(format!("{LINE_CODE}{BOLD}{CYAN}# Help:"));
        self.writeln(format!(
            " > {GREEN}open|unlock [seconds]{CYAN} - Sends the signal to start an open door cycle lasting a certain amount of seconds."
        ));
        self.writeln(format!(
            " > {RED}lock{CYAN} - Requests for the door to be locked immediately."
        ));
        self.writeln(format!(
            " > {PURPLE}system <lock|unlock>{CYAN} - Commands for interfacing with the local system."
        ));
        self.writeln(format!(
            " > {GREEN}connect{CYAN} - Attempts to open a connection to the server."
        ));
        self.writeln(format!(
            " > {RED}disconnect{CYAN} - Closes the connection to the server."
        ));
        self.writeln(format!(
            " > {PURPLE}broadcast <message>{CYAN} - Broadcasts a message to the server and all of the other clients."
        ));
        self.writeln(format!(
            " > {PURPLE}msg|message <message>{CYAN} - Sends a custom message to the server."
        ));
        self.writeln(format!(" > {YELLOW}ping{CYAN} - Pings the server."));
        self.writeln(format!(
            " > {PURPLE}cls|clear{CYAN} - Clears all of the current text, showing only a new prompt line afterwards."
        ));
    }
}

/// Drains styled text to stdout. Ends when every [`Screen`] clone is gone.
pub fn spawn_writer(mut rx: mpsc::UnboundedReceiver<String>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        use std::io::Write;
        while let Some(chunk) = rx.recv().await {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk.as_bytes());
            let _ = out.flush();
        }
    })
}
