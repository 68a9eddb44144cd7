//! Session channel handler: the `Open -> Active -> Closing -> Closed`
//! state machine for a single session channel, including the cooked/raw
//! terminal emulation and the one program (shell or exec) that may run
//! against it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::sync::{mpsc, oneshot};

use crate::commands::{LineReader, Output, Registry};
use crate::event::{Event, EventPayload, Sink};
use crate::pty::{LineEditor, LineEditorEvent, RawLineScanner};
use crate::wire::TerminalMode;

#[derive(Debug, Clone)]
pub struct PtyParams {
    pub term: String,
    pub width: u32,
    pub height: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub modes: Vec<TerminalMode>,
}

/// Per-channel write side: forwards to the underlying SSH library's async
/// `Handle`, tagging stderr via the extended-data code (ext=1), the way
/// RFC 4254 defines `SSH_EXTENDED_DATA_STDERR`.
#[derive(Clone)]
pub struct ChannelOutput {
    handle: Handle,
    channel: ChannelId,
    ext: Option<u32>,
}

impl ChannelOutput {
    pub fn stdout(handle: Handle, channel: ChannelId) -> Self {
        Self {
            handle,
            channel,
            ext: None,
        }
    }

    pub fn stderr(handle: Handle, channel: ChannelId) -> Self {
        Self {
            handle,
            channel,
            ext: Some(1),
        }
    }
}

#[async_trait::async_trait]
impl Output for ChannelOutput {
    async fn write(&mut self, data: &[u8]) {
        let payload = CryptoVec::from_slice(data);
        let result = match self.ext {
            None => self.handle.data(self.channel, payload).await,
            Some(ext) => self.handle.extended_data(self.channel, ext, payload).await,
        };
        if result.is_err() {
            tracing::debug!(channel = ?self.channel, "write to closed channel dropped");
        }
    }
}

enum StdinMode {
    Pty(LineEditor, ChannelOutput),
    Raw(RawLineScanner),
}

/// Turns the raw byte stream a client writes into a channel into discrete
/// lines, either via cooked PTY emulation (with echo) or by raw `\n`
/// scanning.
pub struct ChannelStdin {
    data_rx: mpsc::UnboundedReceiver<Bytes>,
    mode: StdinMode,
    pending: VecDeque<String>,
    eof: bool,
}

impl ChannelStdin {
    pub fn pty(data_rx: mpsc::UnboundedReceiver<Bytes>, echo: ChannelOutput) -> Self {
        Self {
            data_rx,
            mode: StdinMode::Pty(LineEditor::new(), echo),
            pending: VecDeque::new(),
            eof: false,
        }
    }

    pub fn raw(data_rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            data_rx,
            mode: StdinMode::Raw(RawLineScanner::new()),
            pending: VecDeque::new(),
            eof: false,
        }
    }
}

#[async_trait::async_trait]
impl LineReader for ChannelStdin {
    async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }
            if self.eof {
                return None;
            }
            let Some(chunk) = self.data_rx.recv().await else {
                self.eof = true;
                continue;
            };
            match &mut self.mode {
                StdinMode::Raw(scanner) => {
                    for line in scanner.feed(&chunk) {
                        self.pending.push_back(line);
                    }
                }
                StdinMode::Pty(editor, echo) => {
                    for &byte in chunk.iter() {
                        match editor.feed(byte) {
                            LineEditorEvent::Echo(bytes) => {
                                if !bytes.is_empty() {
                                    echo.write(&bytes).await;
                                }
                            }
                            LineEditorEvent::Line { echo: bytes, line } => {
                                echo.write(&bytes).await;
                                self.pending.push_back(line);
                            }
                            LineEditorEvent::Eof { echo: bytes } => {
                                if !bytes.is_empty() {
                                    echo.write(&bytes).await;
                                }
                                self.eof = true;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Open,
    Active,
    Closing,
    Closed,
}

/// What the program running on this channel was started as.
pub enum Program {
    Shell,
    Exec(String),
}

/// Requests forwarded from the connection's `russh::server::Handler` into
/// this channel's own task. Each carries the oneshot the Handler callback
/// is waiting on.
pub enum SessionRequest {
    Env(String, String, oneshot::Sender<()>),
    Pty(PtyParams, oneshot::Sender<()>),
    Shell(oneshot::Sender<bool>),
    Exec(String, oneshot::Sender<bool>),
    Subsystem(String, oneshot::Sender<bool>),
    WindowChange(u32, u32, oneshot::Sender<()>),
    X11(oneshot::Sender<()>),
    Signal(String, oneshot::Sender<()>),
    Data(Bytes, oneshot::Sender<()>),
    ExtendedData(Bytes, u32, oneshot::Sender<()>),
    Eof(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

pub struct SessionChannel {
    pub id: u32,
    pub source: SocketAddr,
    pub sink: Arc<dyn Sink>,
    pub handle: Handle,
    pub channel: ChannelId,
    pub registry: Arc<Registry>,
    pub requests: mpsc::UnboundedReceiver<SessionRequest>,
}

impl SessionChannel {
    pub async fn run(mut self) {
        self.sink
            .log(Event::on_channel(self.source, self.id, EventPayload::Session))
            .await;

        let mut state = ChannelState::Open;
        let mut pty: Option<PtyParams> = None;
        let mut program_stdin_tx: Option<mpsc::UnboundedSender<Bytes>> = None;
        let (exit_tx, mut exit_rx) = oneshot::channel::<u32>();
        let mut exit_tx = Some(exit_tx);

        loop {
            tokio::select! {
                request = self.requests.recv(), if state != ChannelState::Closed => {
                    let Some(request) = request else { break };
                    match request {
                        SessionRequest::Env(name, value, reply) => {
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::Env { name, value })).await;
                            let _ = reply.send(());
                        }
                        SessionRequest::Pty(params, reply) => {
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::Pty {
                                terminal: params.term.clone(),
                                width: params.width,
                                height: params.height,
                            })).await;
                            pty = Some(params);
                            let _ = reply.send(());
                        }
                        SessionRequest::X11(reply) => {
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::X11)).await;
                            let _ = reply.send(());
                        }
                        SessionRequest::WindowChange(width, height, reply) => {
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::WindowChange { width, height })).await;
                            let _ = reply.send(());
                        }
                        SessionRequest::Signal(_name, reply) => {
                            let _ = reply.send(());
                        }
                        SessionRequest::Subsystem(name, reply) => {
                            // No subsystem (e.g. sftp) is actually served; log and reject.
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::Subsystem { name })).await;
                            let _ = reply.send(false);
                        }
                        SessionRequest::Shell(reply) => {
                            let accept = state == ChannelState::Open;
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::Shell)).await;
                            if accept {
                                state = ChannelState::Active;
                                program_stdin_tx = Some(self.spawn_program(Program::Shell, pty.clone(), exit_tx.take()));
                            }
                            let _ = reply.send(accept);
                        }
                        SessionRequest::Exec(command, reply) => {
                            let accept = state == ChannelState::Open;
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::Exec { command: command.clone() })).await;
                            if accept {
                                state = ChannelState::Active;
                                program_stdin_tx = Some(self.spawn_program(Program::Exec(command), pty.clone(), exit_tx.take()));
                            }
                            let _ = reply.send(accept);
                        }
                        SessionRequest::Data(data, reply) => {
                            let input = String::from_utf8_lossy(&data).into_owned();
                            if let Some(tx) = &program_stdin_tx {
                                let _ = tx.send(data);
                            }
                            self.sink.log(Event::on_channel(self.source, self.id, EventPayload::SessionInput { input })).await;
                            let _ = reply.send(());
                        }
                        SessionRequest::ExtendedData(data, _ext, reply) => {
                            if let Some(tx) = &program_stdin_tx {
                                let _ = tx.send(data);
                            }
                            let _ = reply.send(());
                        }
                        SessionRequest::Eof(reply) => {
                            program_stdin_tx = None;
                            let _ = reply.send(());
                        }
                        SessionRequest::Close(reply) => {
                            state = ChannelState::Closing;
                            let _ = reply.send(());
                        }
                    }
                }
                Ok(status) = &mut exit_rx, if state == ChannelState::Active => {
                    let _ = self.handle.exit_status_request(self.channel, status).await;
                    if pty.is_some() {
                        let _ = self.handle.eof(self.channel).await;
                    }
                    let _ = self.handle.close(self.channel).await;
                    state = ChannelState::Closing;
                }
                else => break,
            }

            if state == ChannelState::Closing {
                break;
            }
        }

        self.sink
            .log(Event::on_channel(self.source, self.id, EventPayload::SessionClose))
            .await;
    }

    fn spawn_program(
        &self,
        program: Program,
        pty: Option<PtyParams>,
        exit_tx: Option<oneshot::Sender<u32>>,
    ) -> mpsc::UnboundedSender<Bytes> {
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let registry = self.registry.clone();
        let stdout = ChannelOutput::stdout(self.handle.clone(), self.channel);
        let stderr = ChannelOutput::stderr(self.handle.clone(), self.channel);
        let mut stdin: Box<dyn LineReader> = match &pty {
            Some(_) => Box::new(ChannelStdin::pty(stdin_rx, stdout.clone())),
            None => Box::new(ChannelStdin::raw(stdin_rx)),
        };
        let is_pty = pty.is_some();

        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut stderr = stderr;
            let status = match program {
                Program::Shell => {
                    registry
                        .exec_line("sh", stdin.as_mut(), &mut stdout, &mut stderr, is_pty)
                        .await
                }
                Program::Exec(command) => {
                    registry
                        .exec_line(&command, stdin.as_mut(), &mut stdout, &mut stderr, is_pty)
                        .await
                }
            };
            if let Some(exit_tx) = exit_tx {
                let _ = exit_tx.send(status);
            }
        });

        stdin_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque as Deque;

    #[tokio::test]
    async fn raw_stdin_yields_lines_without_cr_translation() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Bytes::from_static(b"false\ntrue\n")).unwrap();
        drop(tx);
        let mut stdin = ChannelStdin::raw(rx);
        let mut lines = Deque::new();
        while let Some(line) = stdin.read_line().await {
            lines.push_back(line);
        }
        assert_eq!(lines, Deque::from(["false".to_string(), "true".to_string()]));
    }
}
