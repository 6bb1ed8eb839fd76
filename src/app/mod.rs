use crate::config::Config;
use crate::display::{self, Screen};
use crate::input::{self, RawModeGuard};
use crate::link::{ConnectionManager, WsDialer};
use crate::session::Session;
use tokio::sync::mpsc;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
        return Err(format!("unknown subcommand: {command}").into());
    }

    let config = Config::load()?;

    let (screen, screen_rx) = Screen::new();
    let writer = display::spawn_writer(screen_rx);

    // Raw mode lasts for the whole session; the guard restores the terminal
    // on exit, panics included.
    let _raw = RawModeGuard::enable()?;
    let tokens = input::spawn_key_reader();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(
        config.server.url.clone(),
        config.server.token.clone(),
        config.session.connect_timeout(),
        event_tx,
        Box::new(WsDialer),
    );

    Session::new(&config, screen, manager).run(tokens, event_rx).await;

    // The session dropped its Screen; wait for the writer to flush the rest.
    let _ = writer.await;
    Ok(())
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
