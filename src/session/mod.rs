//! The session loop. One task owns every piece of mutable session state
//! (connection state, pending request, line buffer, heartbeat) and
//! interleaves keystroke tokens, link events, heartbeat ticks, and the
//! pending-request deadline with `tokio::select!`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};

use crate::codec::{self, InboundMessage, OutboundIntent};
use crate::command::{self, Command, CommandError};
use crate::config::Config;
use crate::correlate::{Correlator, RequestLabel};
use crate::display::{Screen, BOLD, CYAN, GREEN, LINE_CODE, RED, RED_ERROR, YELLOW};
use crate::input::{Echo, InputToken, LineEditor, LineEvent};
use crate::link::{ConnectionManager, ConnectionState, LinkEvent};

/// Slack added to the connect wait so the transport's own timeout reports
/// first and the deadline only fires if the pump went silent.
const CONNECT_GRACE: Duration = Duration::from_secs(2);

pub struct Session {
    screen: Screen,
    manager: ConnectionManager,
    editor: LineEditor,
    correlator: Correlator,
    keep_alive: Duration,
    response_timeout: Duration,
    connect_budget: Duration,
    welcomed: bool,
}

impl Session {
    pub fn new(config: &Config, screen: Screen, manager: ConnectionManager) -> Self {
        Self {
            screen,
            manager,
            editor: LineEditor::default(),
            correlator: Correlator::default(),
            keep_alive: config.session.keep_alive(),
            response_timeout: config.session.response_timeout(),
            connect_budget: config.session.connect_timeout() + CONNECT_GRACE,
            welcomed: false,
        }
    }

    /// Runs until the operator exits (interrupt at an empty idle prompt) or
    /// an input source goes away.
    pub async fn run(
        mut self,
        mut tokens: mpsc::UnboundedReceiver<InputToken>,
        mut links: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let mut heartbeat: Option<Interval> = None;
        self.start_connect();

        loop {
            tokio::select! {
                token = tokens.recv() => match token {
                    Some(token) => {
                        if !self.on_token(token) {
                            break;
                        }
                    }
                    None => break,
                },
                event = links.recv() => match event {
                    Some(event) => self.on_link_event(event, &mut heartbeat),
                    None => break,
                },
                _ = next_tick(heartbeat.as_mut()) => self.on_heartbeat(),
                _ = sleep_until_opt(self.correlator.deadline()) => self.on_wait_expired(),
            }
        }
    }

    fn start_connect(&mut self) {
        self.screen.writeln(format!("{BOLD}{YELLOW}# Contacting server..."));
        self.screen.writeln("## Connecting to server...");
        self.correlator
            .begin(RequestLabel::Connect, false, self.connect_budget);
        self.manager.open();
    }

    /// Feeds one keystroke token through the editor. Returns false when the
    /// operator has asked to leave.
    fn on_token(&mut self, token: InputToken) -> bool {
        // Submissions are paused while a request is in flight; typing and
        // echo continue so the line is waiting at the next prompt.
        if self.correlator.is_pending()
            && matches!(token, InputToken::Enter | InputToken::Interrupt)
        {
            return true;
        }

        let (event, echo) = self.editor.submit_token(token);
        match echo {
            Echo::Char(c) => self.screen.write(c.to_string()),
            Echo::Rubout => self.screen.write("\u{8} \u{8}"),
            Echo::None => {}
        }

        match event {
            LineEvent::Submitted(line) => {
                if line.is_empty() {
                    self.screen.prompt("");
                } else {
                    self.dispatch(&line);
                }
                true
            }
            LineEvent::Interrupted => {
                // Interrupt at an empty idle prompt ends the session;
                // otherwise it just redraws the prompt with the buffer.
                if self.editor.line().is_empty() {
                    return false;
                }
                self.screen.prompt(self.editor.line());
                true
            }
            LineEvent::Continue => true,
        }
    }

    fn dispatch(&mut self, line: &str) {
        let command = match command::parse(line) {
            Ok(command) => command,
            Err(err) => {
                match err {
                    CommandError::Unrecognized => self
                        .screen
                        .writeln(format!("{LINE_CODE}{BOLD}{CYAN}{err}")),
                    _ => self.screen.error(&err.to_string()),
                }
                self.finish_command();
                return;
            }
        };

        match command {
            Command::Help => {
                self.screen.help();
                self.finish_command();
            }
            Command::Clear => {
                self.screen.clear();
                self.finish_command();
            }
            Command::Connect => self.on_connect_command(),
            Command::Disconnect => self.on_disconnect_command(),
            other => self.send_request(other),
        }
    }

    fn on_connect_command(&mut self) {
        match self.manager.state() {
            ConnectionState::Closed => {
                self.screen.writeln("");
                self.start_connect();
            }
            ConnectionState::Open => {
                self.screen.error("Already connected to the server.");
                self.finish_command();
            }
            ConnectionState::Connecting | ConnectionState::Closing => {
                self.screen.error("Still connecting to the server.");
                self.finish_command();
            }
        }
    }

    fn on_disconnect_command(&mut self) {
        match self.manager.state() {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.screen
                    .writeln(format!("{LINE_CODE}{BOLD}{CYAN}Disconnecting..."));
                self.correlator
                    .begin(RequestLabel::Disconnect, false, self.response_timeout);
                self.manager.close();
            }
            ConnectionState::Closed | ConnectionState::Closing => {
                self.screen.error("Not connected to the server.");
                self.finish_command();
            }
        }
    }

    /// Sends a channel-bound command: acknowledgement line, wire frame, then
    /// one pending request awaiting the correlated response.
    fn send_request(&mut self, command: Command) {
        match self.manager.state() {
            ConnectionState::Open => {}
            ConnectionState::Connecting => {
                self.screen.error("Still connecting to the server.");
                self.finish_command();
                return;
            }
            ConnectionState::Closed | ConnectionState::Closing => {
                self.screen.error("Not connected to the server.");
                self.finish_command();
                return;
            }
        }

        let (ack, intent, timed) = match command {
            Command::Unlock { seconds } => (
                format!("{LINE_CODE}{BOLD}{CYAN}# {GREEN}Open{CYAN} Request Sent."),
                OutboundIntent::SecurityUnlock(seconds),
                false,
            ),
            Command::Lock => (
                format!("{LINE_CODE}{BOLD}{CYAN}# {RED}Lock{CYAN} Request Sent."),
                OutboundIntent::SecurityLock,
                false,
            ),
            Command::SystemUnlock => (
                format!("{LINE_CODE}{BOLD}{CYAN}# System {GREEN}Open{CYAN} Request Sent."),
                OutboundIntent::SystemUnlock,
                false,
            ),
            Command::SystemLock => (
                format!("{LINE_CODE}{BOLD}{CYAN}# System {RED}Lock{CYAN} Request Sent."),
                OutboundIntent::SystemLock,
                false,
            ),
            Command::Ping => (
                format!("{LINE_CODE}{BOLD}{CYAN}Ping!"),
                OutboundIntent::Ping,
                true,
            ),
            Command::Broadcast(text) => (
                format!("{LINE_CODE}{BOLD}{CYAN}Sending broadcast..."),
                OutboundIntent::Broadcast(text),
                false,
            ),
            Command::Message(text) => (
                format!("{LINE_CODE}{BOLD}{CYAN}Sending message..."),
                OutboundIntent::RawMessage(text),
                false,
            ),
            // Help/Clear/Connect/Disconnect are handled before this point.
            _ => return,
        };

        self.screen.writeln(ack);
        if let Err(err) = self.manager.send(codec::encode(&intent)) {
            tracing::warn!(error = %err, "send failed");
            self.finish_command();
            return;
        }
        self.correlator
            .begin(RequestLabel::Standard, timed, self.response_timeout);
    }

    fn on_link_event(&mut self, event: LinkEvent, heartbeat: &mut Option<Interval>) {
        self.manager.apply(&event);
        match event {
            LinkEvent::Opened => self.on_opened(heartbeat),
            LinkEvent::Inbound(text) => self.on_inbound(&text),
            LinkEvent::Closed { error } => self.on_closed(error, heartbeat),
        }
    }

    fn on_opened(&mut self, heartbeat: &mut Option<Interval>) {
        // A close requested mid-handshake leaves the manager in Closing; the
        // channel is already on its way down.
        if self.manager.state() != ConnectionState::Open {
            return;
        }
        self.screen.writeln("### Connected!");
        if let Err(err) = self.manager.send(codec::encode(&OutboundIntent::KeepAlive)) {
            tracing::warn!(error = %err, "initial keep-alive failed");
        }
        *heartbeat = Some(interval_at(
            Instant::now() + self.keep_alive,
            self.keep_alive,
        ));
        if self.correlator.label() == Some(RequestLabel::Connect) {
            self.correlator.clear();
            self.welcome_once();
            self.finish_command();
        }
    }

    fn on_heartbeat(&mut self) {
        if self.manager.state() != ConnectionState::Open {
            return;
        }
        if let Err(err) = self.manager.send(codec::encode(&OutboundIntent::KeepAlive)) {
            tracing::warn!(error = %err, "keep-alive failed");
        }
    }

    fn on_inbound(&mut self, text: &str) {
        match codec::decode(text) {
            // Broadcasts show immediately and never disturb a pending wait.
            InboundMessage::Broadcast(payload) => {
                self.screen
                    .writeln(format!("{LINE_CODE}{YELLOW}Broadcast from Server: {payload}"));
                if !self.correlator.is_pending() {
                    self.screen.prompt(self.editor.line());
                }
            }
            InboundMessage::Response(payload) => match self.correlator.resolve(&payload) {
                Some(matched) => {
                    let mut shown = matched.text;
                    if let Some(ms) = matched.elapsed_ms {
                        shown.push_str(&format!(" ({ms}ms)"));
                    }
                    self.screen
                        .writeln(format!("{LINE_CODE}{YELLOW}Response from Server: {shown}"));
                    self.finish_command();
                }
                None => {
                    self.screen
                        .writeln(format!("{LINE_CODE}{YELLOW}Response from Server: {payload}"));
                    self.screen.prompt(self.editor.line());
                }
            },
            // Keep-alive acknowledgements carry nothing for the operator.
            InboundMessage::ConnectionNotice => {}
            InboundMessage::Raw(raw) => {
                self.screen
                    .writeln(format!("{LINE_CODE}{YELLOW}Message from Server: {raw}"));
                if !self.correlator.is_pending() {
                    self.screen.prompt(self.editor.line());
                }
            }
        }
    }

    fn on_closed(&mut self, error: Option<String>, heartbeat: &mut Option<Interval>) {
        *heartbeat = None;
        if let Some(err) = &error {
            tracing::warn!(error = %err, "channel closed");
        }
        match self.correlator.clear() {
            Some(RequestLabel::Connect) => {
                self.screen
                    .writeln(format!("{LINE_CODE}{RED_ERROR}<!> Failed to connect to server."));
                self.welcome_once();
                self.finish_command();
            }
            Some(RequestLabel::Disconnect) => {
                self.screen
                    .writeln(format!("{LINE_CODE}{BOLD}{YELLOW}# Disconnected from the server."));
                self.finish_command();
            }
            Some(RequestLabel::Standard) => {
                // The channel died while a response was awaited.
                self.screen
                    .writeln(format!("{LINE_CODE}{BOLD}{YELLOW}# Disconnected from the server."));
                self.finish_command();
            }
            None => {
                self.screen
                    .writeln(format!("{LINE_CODE}{BOLD}{YELLOW}# Disconnected from the server."));
                self.screen.prompt(self.editor.line());
            }
        }
    }

    /// The bounded wait ran out without a resolving event.
    fn on_wait_expired(&mut self) {
        match self.correlator.clear() {
            Some(RequestLabel::Connect) => {
                self.manager.abort();
                self.screen
                    .writeln(format!("{LINE_CODE}{RED_ERROR}<!> Failed to connect to server."));
                self.welcome_once();
                self.finish_command();
            }
            Some(RequestLabel::Disconnect) => {
                self.manager.abort();
                self.screen
                    .writeln(format!("{LINE_CODE}{BOLD}{YELLOW}# Disconnected from the server."));
                self.finish_command();
            }
            // Correlation timeout is silent recovery: the prompt returns and
            // input is accepted again.
            Some(RequestLabel::Standard) | None => self.finish_command(),
        }
    }

    fn welcome_once(&mut self) {
        if !self.welcomed {
            self.screen.clear();
            self.screen.welcome();
            self.welcomed = true;
        }
    }

    /// Every command outcome ends here, restoring input acceptance and
    /// redrawing the prompt with whatever was typed mid-wait.
    fn finish_command(&mut self) {
        self.screen.prompt(self.editor.line());
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
