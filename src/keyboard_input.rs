use crate::error::Result;
use crate::session::ControlCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keyboard controls for a running session
///
/// `c`/space confirms the shot, `s` stops the capture, `q`/Esc stops the session.
pub struct KeyboardInputHandler {
    controls: mpsc::Sender<ControlCommand>,
    cancellation_token: CancellationToken,
}

/// Map a key to a session control command
pub fn command_for_key(code: KeyCode) -> Option<ControlCommand> {
    match code {
        KeyCode::Char('c') | KeyCode::Char(' ') => Some(ControlCommand::Confirm),
        KeyCode::Char('s') => Some(ControlCommand::StopCapture),
        KeyCode::Char('q') | KeyCode::Esc => Some(ControlCommand::StopSession),
        _ => None,
    }
}

impl KeyboardInputHandler {
    pub fn new(controls: mpsc::Sender<ControlCommand>) -> Self {
        Self {
            controls,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard controls - c: confirm, s: stop capture, q: stop session");

        let controls = self.controls.clone();
        let cancellation_token = self.cancellation_token.clone();

        // crossterm polling blocks, keep it off the runtime threads
        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        let Some(command) = command_for_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };

                        info!("Key {:?} -> {:?}", key_event.code, command);
                        if controls.blocking_send(command).is_err() {
                            debug!("Session no longer listening for controls");
                            break;
                        }
                        if command == ControlCommand::StopSession {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}
