//! Line-oriented operator console
//!
//! Reads lines from any [`AsyncBufRead`], publishes them through the session's
//! publisher and prints short notices for session events. Every way out of the
//! loop goes through [`ConnectionController::stop`].

use crate::events::SessionEvent;
use crate::session::{ConnectionController, SendOutcome};
use crate::transport::Transport;
use std::future::Future;
use std::io::{self, ErrorKind, Read};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PROMPT: &str = "> ";

const INPUT_BUFFER_SIZE: usize = 4096;

/// Interpretation of one input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand<'a> {
    /// `exit`, any case, surrounding whitespace ignored
    Exit,
    /// Blank line, nothing to do
    Empty,
    /// Text to publish, surrounding whitespace removed
    Send(&'a str),
}

impl<'a> ConsoleCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            ConsoleCommand::Empty
        } else if trimmed.eq_ignore_ascii_case("exit") {
            ConsoleCommand::Exit
        } else {
            ConsoleCommand::Send(trimmed)
        }
    }
}

/// Why the console loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    ExitCommand,
    EndOfInput,
    Interrupted,
    SessionStopped,
    InputError,
}

/// Operator-facing line for a session event, if it warrants one
pub fn event_notice(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Connected | SessionEvent::PublishAcknowledged { .. } => None,
        SessionEvent::ConnectionLost { reason } => Some(format!("connection lost: {reason}")),
        SessionEvent::Reconnected => Some("reconnected to broker".to_string()),
        SessionEvent::ReconnectFailed { reason } => Some(format!(
            "reconnect failed ({reason}); restart telemetrix to resume publishing"
        )),
        SessionEvent::PeerOffline => {
            Some("peer offline: no heartbeat within the timeout".to_string())
        }
        SessionEvent::PeerOnline => Some("peer back online".to_string()),
    }
}

/// Operator-facing line for a send outcome
pub fn outcome_notice(outcome: &SendOutcome) -> String {
    match outcome {
        SendOutcome::Sent { peer_stale: false } => "sent".to_string(),
        SendOutcome::Sent { peer_stale: true } => {
            "sent, but the peer appears offline (message retained for peer)".to_string()
        }
        SendOutcome::Failed { reason } => format!("send failed: {reason}"),
    }
}

/// Read a blocking source (stdin) on its own OS thread
///
/// Bytes are forwarded unchanged into the returned stream, which ends when the
/// source does. The thread is detached: a read stuck on a terminal never holds up
/// runtime shutdown. Must be called from within a tokio runtime.
pub fn spawn_blocking_reader<R>(source: R) -> io::Result<DuplexStream>
where
    R: Read + Send + 'static,
{
    let runtime = Handle::try_current().map_err(io::Error::other)?;
    let (mut writer, reader) = tokio::io::duplex(INPUT_BUFFER_SIZE);

    std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let mut source = source;
            let mut buf = [0u8; INPUT_BUFFER_SIZE];
            loop {
                let n = match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(error = %e, "Console input read failed");
                        break;
                    }
                };
                if runtime.block_on(writer.write_all(&buf[..n])).is_err() {
                    // Console side is gone
                    break;
                }
            }
        })?;

    Ok(reader)
}

pub struct Console<T: Transport, W> {
    controller: Arc<ConnectionController<T>>,
    output: W,
    prompt: Option<String>,
}

impl<T, W> Console<T, W>
where
    T: Transport,
    W: AsyncWrite + Unpin,
{
    pub fn new(controller: Arc<ConnectionController<T>>, output: W) -> Self {
        Self {
            controller,
            output,
            prompt: Some(DEFAULT_PROMPT.to_string()),
        }
    }

    /// Disable the prompt (e.g. when input is piped)
    pub fn without_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    async fn write_line(&mut self, line: &str) {
        let result = async {
            self.output.write_all(line.as_bytes()).await?;
            self.output.write_all(b"\n").await?;
            self.output.flush().await
        }
        .await;
        if let Err(e) = result {
            debug!(error = %e, "Failed to write console output");
        }
    }

    async fn show_prompt(&mut self) {
        if let Some(prompt) = &self.prompt {
            let result = async {
                self.output.write_all(prompt.as_bytes()).await?;
                self.output.flush().await
            }
            .await;
            if let Err(e) = result {
                debug!(error = %e, "Failed to write prompt");
            }
        }
    }

    /// Run until `exit`, end of input, `interrupt` resolving, or the session stopping
    pub async fn run<R, F>(&mut self, reader: R, interrupt: F) -> ConsoleExit
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        let mut events = self.controller.subscribe_events();
        tokio::pin!(interrupt);

        let mut prompt_pending = true;
        let exit = loop {
            if !self.controller.is_running() {
                break ConsoleExit::SessionStopped;
            }
            if prompt_pending {
                self.show_prompt().await;
                prompt_pending = false;
            }

            let line = tokio::select! {
                biased;

                _ = &mut interrupt => break ConsoleExit::Interrupted,

                Ok(event) = events.recv() => {
                    if let Some(notice) = event_notice(&event) {
                        self.write_line("").await;
                        self.write_line(&notice).await;
                        prompt_pending = true;
                    }
                    continue;
                }

                line = lines.next_line() => line,
            };

            prompt_pending = true;
            match line {
                Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                    ConsoleCommand::Exit => break ConsoleExit::ExitCommand,
                    ConsoleCommand::Empty => {}
                    ConsoleCommand::Send(text) => {
                        let outcome = self
                            .controller
                            .publisher()
                            .send(text, self.controller.now())
                            .await;
                        let notice = outcome_notice(&outcome);
                        self.write_line(&notice).await;
                    }
                },
                Ok(None) => break ConsoleExit::EndOfInput,
                Err(e) => {
                    error!(error = %e, "Failed to read console input");
                    break ConsoleExit::InputError;
                }
            }
        };

        info!(reason = ?exit, "Console loop ended");
        if let Err(e) = self.controller.stop().await {
            warn!(error = %e.operator_message(), "Session stop reported an error");
        }
        exit
    }
}
