//! MITM proxy: terminates a real SSH client, dials a real upstream SSH
//! server with the client's captured credentials, then bridges every
//! global request and channel between the two sides, logging each hop. A
//! separate event vocabulary from the honeypot's own (`global_request`,
//! `new_channel`, `channel_data`, `channel_error`, `channel_request`,
//! `channel_eof`, `channel_close`) since this is a different kind of
//! observation: traffic being relayed, not traffic being faked.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use russh::client::{Handle as ClientHandle, Msg as ClientMsg};
use russh::keys::PublicKey;
use russh::server::{Auth, Handle as ServerHandle, Msg as ServerMsg, Session};
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec, Sig};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::wire;

/// Upstream target and the flags governing how the proxy connects to it.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub upstream_host: String,
    pub upstream_port: u16,
    pub ignore_host_key: bool,
    /// Fixed credentials to use instead of the ones captured from the
    /// downstream client, if configured.
    pub credentials: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ProxyEventPayload {
    GlobalRequest {
        request: String,
        want_reply: bool,
        payload: String,
        response: bool,
    },
    NewChannel {
        kind: String,
        accepted: bool,
    },
    ChannelData {
        bytes: usize,
    },
    ChannelError {
        bytes: usize,
    },
    ChannelRequest {
        request: String,
        want_reply: bool,
        payload: String,
        response: bool,
    },
    ChannelEof,
    ChannelClose,
}

#[derive(Debug, Clone)]
pub struct ProxyEvent {
    pub source: SocketAddr,
    pub channel_id: Option<u32>,
    pub payload: ProxyEventPayload,
}

impl ProxyEvent {
    fn new(source: SocketAddr, payload: ProxyEventPayload) -> Self {
        Self {
            source,
            channel_id: None,
            payload,
        }
    }

    fn on_channel(source: SocketAddr, channel_id: u32, payload: ProxyEventPayload) -> Self {
        Self {
            source,
            channel_id: Some(channel_id),
            payload,
        }
    }

    fn human_message(&self) -> String {
        match &self.payload {
            ProxyEventPayload::GlobalRequest {
                request,
                want_reply,
                payload,
                response,
            } => format!(
                "global request {request:?} (want_reply={want_reply}, payload={payload}) -> {response}"
            ),
            ProxyEventPayload::NewChannel { kind, accepted } => {
                format!("new {kind} channel, accepted={accepted}")
            }
            ProxyEventPayload::ChannelData { bytes } => format!("{bytes} bytes of channel data"),
            ProxyEventPayload::ChannelError { bytes } => format!("{bytes} bytes of extended data"),
            ProxyEventPayload::ChannelRequest {
                request,
                want_reply,
                payload,
                response,
            } => format!(
                "channel request {request:?} (want_reply={want_reply}, payload={payload}) -> {response}"
            ),
            ProxyEventPayload::ChannelEof => "channel eof".to_string(),
            ProxyEventPayload::ChannelClose => "channel closed".to_string(),
        }
    }
}

#[derive(Serialize)]
struct WireEvent<'a> {
    source: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<u32>,
    #[serde(flatten)]
    payload: &'a ProxyEventPayload,
}

/// Same shape as `event::EventSink`, over the proxy's own event type. Kept
/// separate rather than made generic so each vocabulary's rendering stays a
/// plain, grep-able match.
pub struct ProxyEventSink<W> {
    writer: Mutex<W>,
    json: bool,
    timestamps: bool,
}

impl<W: AsyncWrite + Unpin + Send> ProxyEventSink<W> {
    pub fn new(writer: W, json: bool, timestamps: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            json,
            timestamps,
        }
    }

    pub async fn log(&self, event: &ProxyEvent) {
        let line = self.render(event);
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(%error, "failed to write proxy event to sink");
            return;
        }
        let _ = writer.flush().await;
    }

    fn render(&self, event: &ProxyEvent) -> String {
        if self.json {
            let wire = WireEvent {
                source: event.source,
                channel_id: event.channel_id,
                payload: &event.payload,
            };
            match serde_json::to_string(&wire) {
                Ok(mut json) => {
                    json.push('\n');
                    json
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to serialize proxy event");
                    String::new()
                }
            }
        } else {
            let prefix = if self.timestamps {
                let now = time::OffsetDateTime::now_utc();
                format!(
                    "{} [{}] ",
                    now.format(&time::format_description::well_known::Rfc3339)
                        .unwrap_or_default(),
                    event.source
                )
            } else {
                format!("[{}] ", event.source)
            };
            format!("{prefix}{}\n", event.human_message())
        }
    }
}

#[async_trait::async_trait]
pub trait ProxySink: Send + Sync {
    async fn log(&self, event: ProxyEvent);
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> ProxySink for ProxyEventSink<W> {
    async fn log(&self, event: ProxyEvent) {
        ProxyEventSink::log(self, &event).await;
    }
}

/// One channel-scoped request forwarded from the downstream client to the
/// upstream server.
enum ChannelRequestKind {
    Pty(wire::PtyRequestPayload),
    Shell,
    Exec(String),
    Subsystem(String),
    WindowChange(wire::WindowChangePayload),
    Env(String, String),
    X11(wire::X11RequestPayload),
    Signal(String),
}

impl ChannelRequestKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Pty(_) => "pty-req",
            Self::Shell => "shell",
            Self::Exec(_) => "exec",
            Self::Subsystem(_) => "subsystem",
            Self::WindowChange(_) => "window-change",
            Self::Env(_, _) => "env",
            Self::X11(_) => "x11-req",
            Self::Signal(_) => "signal",
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Pty(p) => p.encode(),
            Self::Shell => Vec::new(),
            Self::Exec(command) => wire::ExecRequestPayload {
                command: command.clone(),
            }
            .encode(),
            Self::Subsystem(name) => wire::SubsystemRequestPayload { name: name.clone() }.encode(),
            Self::WindowChange(p) => p.encode(),
            Self::Env(name, value) => wire::EnvRequestPayload {
                name: name.clone(),
                value: value.clone(),
            }
            .encode(),
            Self::X11(p) => p.encode(),
            Self::Signal(_) => Vec::new(),
        }
    }

    fn expects_reply(&self) -> bool {
        matches!(
            self,
            Self::Pty(_) | Self::Shell | Self::Exec(_) | Self::Subsystem(_) | Self::X11(_)
        )
    }
}

enum ChannelBridgeRequest {
    Data(Bytes, oneshot::Sender<()>),
    ExtendedData(Bytes, u32, oneshot::Sender<()>),
    Eof(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
    Request(ChannelRequestKind, oneshot::Sender<bool>),
}

/// Events forwarded from `ProxyServerHandler` (facing the real client) into
/// the `ProxyBridge` actor.
pub enum ServerEvent {
    Authenticated(ServerHandle),
    CapturedPassword(String, String, oneshot::Sender<bool>),
    GlobalRequest(GlobalRequestKind, oneshot::Sender<bool>),
    ChannelOpenSession(ChannelId, oneshot::Sender<bool>),
    ChannelOpenDirectTcpip(ChannelId, String, u32, String, u32, oneshot::Sender<bool>),
    ChannelRequest(ChannelId, ChannelRequestKind, oneshot::Sender<bool>),
    Data(ChannelId, Bytes, oneshot::Sender<()>),
    ExtendedData(ChannelId, Bytes, u32, oneshot::Sender<()>),
    ChannelEof(ChannelId, oneshot::Sender<()>),
    ChannelClose(ChannelId, oneshot::Sender<()>),
    Disconnect,
}

pub enum GlobalRequestKind {
    TcpipForward(String, u32),
    CancelTcpipForward(String, u32),
}

impl GlobalRequestKind {
    fn name(&self) -> &'static str {
        match self {
            Self::TcpipForward(_, _) => "tcpip-forward",
            Self::CancelTcpipForward(_, _) => "cancel-tcpip-forward",
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::TcpipForward(address, port) | Self::CancelTcpipForward(address, port) => {
                wire::TcpipForwardPayload {
                    address: address.clone(),
                    port: *port,
                }
                .encode()
            }
        }
    }
}

/// Terminates the real client's SSH connection and forwards every callback
/// into `ProxyBridge` over `event_tx`. Only password auth is relayed
/// upstream; the proxy dials using the captured username/password.
pub struct ProxyServerHandler {
    pub event_tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(thiserror::Error, Debug)]
#[error("proxy bridge is gone")]
struct BridgeGone;

impl ProxyServerHandler {
    fn send(&self, event: ServerEvent) -> Result<(), BridgeGone> {
        self.event_tx.send(event).map_err(|_| BridgeGone)
    }
}

impl russh::server::Handler for ProxyServerHandler {
    type Error = anyhow::Error;

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        self.send(ServerEvent::Authenticated(session.handle()))?;
        Ok(())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::CapturedPassword(
            user.to_string(),
            password.to_string(),
            tx,
        ))?;
        Ok(if rx.await.unwrap_or(false) {
            Auth::Accept
        } else {
            Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            }
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<ServerMsg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelOpenSession(channel.id(), tx))?;
        Ok(rx.await.unwrap_or(false))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<ServerMsg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelOpenDirectTcpip(
            channel.id(),
            host_to_connect.to_string(),
            port_to_connect,
            originator_address.to_string(),
            originator_port,
            tx,
        ))?;
        Ok(rx.await.unwrap_or(false))
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(
            channel,
            ChannelRequestKind::Pty(wire::PtyRequestPayload {
                term: term.to_string(),
                width: col_width,
                height: row_height,
                pixel_width: pix_width,
                pixel_height: pix_height,
                modes: modes
                    .iter()
                    .map(|(opcode, value)| wire::TerminalMode {
                        opcode: *opcode as u8,
                        value: *value,
                    })
                    .collect(),
            }),
            tx,
        ))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(channel, ChannelRequestKind::Shell, tx))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(
            channel,
            ChannelRequestKind::Exec(command),
            tx,
        ))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(
            channel,
            ChannelRequestKind::Subsystem(name.to_string()),
            tx,
        ))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(
            channel,
            ChannelRequestKind::WindowChange(wire::WindowChangePayload {
                width: col_width,
                height: row_height,
                pixel_width: pix_width,
                pixel_height: pix_height,
            }),
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(
            channel,
            ChannelRequestKind::Env(variable_name.to_string(), variable_value.to_string()),
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        single_connection: bool,
        x11_auth_protocol: &str,
        x11_auth_cookie: &str,
        x11_screen_number: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(
            channel,
            ChannelRequestKind::X11(wire::X11RequestPayload {
                single_connection,
                auth_protocol: x11_auth_protocol.to_string(),
                auth_cookie: x11_auth_cookie.to_string(),
                screen_number: x11_screen_number,
            }),
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal_name: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelRequest(
            channel,
            ChannelRequestKind::Signal(format!("{signal_name:?}")),
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::Data(channel, Bytes::copy_from_slice(data), tx))?;
        let _ = rx.await;
        Ok(())
    }

    async fn extended_data(
        &mut self,
        channel: ChannelId,
        code: u32,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ExtendedData(
            channel,
            Bytes::copy_from_slice(data),
            code,
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelEof(channel, tx))?;
        let _ = rx.await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::ChannelClose(channel, tx))?;
        let _ = rx.await;
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::GlobalRequest(
            GlobalRequestKind::TcpipForward(address.to_string(), *port),
            tx,
        ))?;
        let allowed = rx.await.unwrap_or(false);
        if allowed {
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(allowed)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(ServerEvent::GlobalRequest(
            GlobalRequestKind::CancelTcpipForward(address.to_string(), port),
            tx,
        ))?;
        let allowed = rx.await.unwrap_or(false);
        if allowed {
            session.request_success();
        } else {
            session.request_failure();
        }
        Ok(allowed)
    }
}

impl Drop for ProxyServerHandler {
    fn drop(&mut self) {
        let _ = self.event_tx.send(ServerEvent::Disconnect);
    }
}

/// Faces the real upstream server. Host-key verification is reduced to the
/// `ignore_host_key` flag (full known-hosts persistence is out of core
/// scope); forwarded-tcpip/X11 channels the upstream opens on its own
/// initiative are logged and declined rather than bridged back.
pub struct ProxyClientHandler {
    pub ignore_host_key: bool,
}

impl russh::client::Handler for ProxyClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(self, _server_public_key: &PublicKey) -> Result<(Self, bool), Self::Error> {
        let accept = self.ignore_host_key;
        Ok((self, accept))
    }
}

struct ChannelBridge {
    source: SocketAddr,
    id: u32,
    server_handle: ServerHandle,
    server_channel: ChannelId,
    upstream_channel: Channel<ClientMsg>,
    requests: mpsc::UnboundedReceiver<ChannelBridgeRequest>,
    sink: Arc<dyn ProxySink>,
}

impl ChannelBridge {
    async fn run(mut self) {
        let mut pending_reply: Option<(String, String, oneshot::Sender<bool>)> = None;

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else { break };
                    match request {
                        ChannelBridgeRequest::Data(data, reply) => {
                            let _ = self.upstream_channel.data(&data[..]).await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelData { bytes: data.len() })).await;
                            let _ = reply.send(());
                        }
                        ChannelBridgeRequest::ExtendedData(data, ext, reply) => {
                            let _ = self.upstream_channel.extended_data(ext, &data[..]).await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelError { bytes: data.len() })).await;
                            let _ = reply.send(());
                        }
                        ChannelBridgeRequest::Eof(reply) => {
                            let _ = self.upstream_channel.eof().await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelEof)).await;
                            let _ = reply.send(());
                        }
                        ChannelBridgeRequest::Close(reply) => {
                            let _ = self.upstream_channel.close().await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelClose)).await;
                            let _ = reply.send(());
                            break;
                        }
                        ChannelBridgeRequest::Request(kind, reply) => {
                            let name = kind.name().to_string();
                            let payload = data_encoding::BASE64.encode(&kind.payload());
                            let want_reply = kind.expects_reply();
                            self.forward_request(kind).await;
                            if want_reply {
                                pending_reply = Some((name, payload, reply));
                            } else {
                                self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelRequest {
                                    request: name, want_reply, payload, response: true,
                                })).await;
                                let _ = reply.send(true);
                            }
                        }
                    }
                }
                message = self.upstream_channel.wait() => {
                    match message {
                        Some(ChannelMsg::Data { data }) => {
                            let bytes: &[u8] = &data;
                            let payload = CryptoVec::from_slice(bytes);
                            let _ = self.server_handle.data(self.server_channel, payload).await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelData { bytes: bytes.len() })).await;
                        }
                        Some(ChannelMsg::ExtendedData { data, ext }) => {
                            let bytes: &[u8] = &data;
                            let payload = CryptoVec::from_slice(bytes);
                            let _ = self.server_handle.extended_data(self.server_channel, ext, payload).await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelError { bytes: bytes.len() })).await;
                        }
                        Some(ChannelMsg::Eof) => {
                            let _ = self.server_handle.eof(self.server_channel).await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelEof)).await;
                        }
                        Some(ChannelMsg::Close) => {
                            let _ = self.server_handle.close(self.server_channel).await;
                            self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelClose)).await;
                            break;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            let _ = self.server_handle.exit_status_request(self.server_channel, exit_status).await;
                        }
                        Some(ChannelMsg::Success) => {
                            if let Some((request, payload, reply)) = pending_reply.take() {
                                self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelRequest {
                                    request, want_reply: true, payload, response: true,
                                })).await;
                                let _ = reply.send(true);
                            }
                        }
                        Some(ChannelMsg::Failure) => {
                            if let Some((request, payload, reply)) = pending_reply.take() {
                                self.sink.log(ProxyEvent::on_channel(self.source, self.id, ProxyEventPayload::ChannelRequest {
                                    request, want_reply: true, payload, response: false,
                                })).await;
                                let _ = reply.send(false);
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }
    }

    async fn forward_request(&mut self, kind: ChannelRequestKind) {
        let channel = &mut self.upstream_channel;
        let _ = match kind {
            ChannelRequestKind::Pty(p) => {
                channel
                    .request_pty(
                        true,
                        &p.term,
                        p.width,
                        p.height,
                        p.pixel_width,
                        p.pixel_height,
                        &[],
                    )
                    .await
            }
            ChannelRequestKind::Shell => channel.request_shell(true).await,
            ChannelRequestKind::Exec(command) => channel.exec(true, command).await,
            ChannelRequestKind::Subsystem(name) => channel.request_subsystem(true, &name).await,
            ChannelRequestKind::WindowChange(p) => {
                channel
                    .window_change(p.width, p.height, p.pixel_width, p.pixel_height)
                    .await
            }
            ChannelRequestKind::Env(name, value) => channel.set_env(false, name, value).await,
            ChannelRequestKind::X11(p) => {
                channel
                    .request_x11(
                        true,
                        p.single_connection,
                        p.auth_protocol,
                        p.auth_cookie,
                        p.screen_number,
                    )
                    .await
            }
            ChannelRequestKind::Signal(_) => Ok(()),
        };
    }
}

/// Owns the upstream connection and the table of bridged channels for one
/// downstream client connection.
pub struct ProxyBridge {
    pub source: SocketAddr,
    pub config: ProxyConfig,
    pub sink: Arc<dyn ProxySink>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl ProxyBridge {
    pub async fn run(mut self) {
        let mut server_handle: Option<ServerHandle> = None;
        let mut upstream: Option<ClientHandle<ProxyClientHandler>> = None;
        let mut next_id: u32 = 0;
        let mut channels: HashMap<ChannelId, (u32, mpsc::UnboundedSender<ChannelBridgeRequest>)> =
            HashMap::new();

        while let Some(event) = self.events.recv().await {
            match event {
                ServerEvent::Authenticated(handle) => {
                    server_handle = Some(handle);
                }
                ServerEvent::CapturedPassword(user, password, reply) => {
                    let credentials = self.config.credentials.clone().unwrap_or((user, password));
                    let connected = self.connect_upstream(credentials).await;
                    if let Some(handle) = connected {
                        upstream = Some(handle);
                        let _ = reply.send(true);
                    } else {
                        let _ = reply.send(false);
                    }
                }
                ServerEvent::GlobalRequest(kind, reply) => {
                    let name = kind.name().to_string();
                    let payload = data_encoding::BASE64.encode(&kind.payload());
                    let allowed = match (&mut upstream, &kind) {
                        (Some(handle), GlobalRequestKind::TcpipForward(address, port)) => handle
                            .tcpip_forward(address.clone(), *port)
                            .await
                            .unwrap_or(false),
                        (Some(handle), GlobalRequestKind::CancelTcpipForward(address, port)) => {
                            handle
                                .cancel_tcpip_forward(address.clone(), *port)
                                .await
                                .unwrap_or(false)
                        }
                        (None, _) => false,
                    };
                    self.sink
                        .log(ProxyEvent::new(
                            self.source,
                            ProxyEventPayload::GlobalRequest {
                                request: name,
                                want_reply: true,
                                payload,
                                response: allowed,
                            },
                        ))
                        .await;
                    let _ = reply.send(allowed);
                }
                ServerEvent::ChannelOpenSession(channel, reply) => {
                    let opened = match &upstream {
                        Some(handle) => handle.channel_open_session().await.ok(),
                        None => None,
                    };
                    self.register_channel(
                        channel,
                        opened,
                        "session",
                        &mut next_id,
                        &mut channels,
                        &server_handle,
                        reply,
                    )
                    .await;
                }
                ServerEvent::ChannelOpenDirectTcpip(
                    channel,
                    destination_address,
                    destination_port,
                    originator_address,
                    originator_port,
                    reply,
                ) => {
                    let opened = match &upstream {
                        Some(handle) => handle
                            .channel_open_direct_tcpip(
                                destination_address,
                                destination_port,
                                originator_address,
                                originator_port,
                            )
                            .await
                            .ok(),
                        None => None,
                    };
                    self.register_channel(
                        channel,
                        opened,
                        "direct-tcpip",
                        &mut next_id,
                        &mut channels,
                        &server_handle,
                        reply,
                    )
                    .await;
                }
                ServerEvent::ChannelRequest(channel, kind, reply) => {
                    if let Some((_, tx)) = channels.get(&channel) {
                        let (inner_tx, inner_rx) = oneshot::channel();
                        if tx.send(ChannelBridgeRequest::Request(kind, inner_tx)).is_ok() {
                            let accepted = inner_rx.await.unwrap_or(false);
                            let _ = reply.send(accepted);
                            continue;
                        }
                    }
                    let _ = reply.send(false);
                }
                ServerEvent::Data(channel, data, reply) => {
                    if let Some((_, tx)) = channels.get(&channel) {
                        let (inner_tx, inner_rx) = oneshot::channel();
                        if tx.send(ChannelBridgeRequest::Data(data, inner_tx)).is_ok() {
                            let _ = inner_rx.await;
                        }
                    }
                    let _ = reply.send(());
                }
                ServerEvent::ExtendedData(channel, data, ext, reply) => {
                    if let Some((_, tx)) = channels.get(&channel) {
                        let (inner_tx, inner_rx) = oneshot::channel();
                        if tx
                            .send(ChannelBridgeRequest::ExtendedData(data, ext, inner_tx))
                            .is_ok()
                        {
                            let _ = inner_rx.await;
                        }
                    }
                    let _ = reply.send(());
                }
                ServerEvent::ChannelEof(channel, reply) => {
                    if let Some((_, tx)) = channels.get(&channel) {
                        let (inner_tx, inner_rx) = oneshot::channel();
                        if tx.send(ChannelBridgeRequest::Eof(inner_tx)).is_ok() {
                            let _ = inner_rx.await;
                        }
                    }
                    let _ = reply.send(());
                }
                ServerEvent::ChannelClose(channel, reply) => {
                    if let Some((_, tx)) = channels.remove(&channel) {
                        let (inner_tx, inner_rx) = oneshot::channel();
                        if tx.send(ChannelBridgeRequest::Close(inner_tx)).is_ok() {
                            let _ = inner_rx.await;
                        }
                    }
                    let _ = reply.send(());
                }
                ServerEvent::Disconnect => break,
            }
        }
    }

    async fn connect_upstream(
        &self,
        credentials: (String, String),
    ) -> Option<ClientHandle<ProxyClientHandler>> {
        let address_str = format!("{}:{}", self.config.upstream_host, self.config.upstream_port);
        let address: SocketAddr = match tokio::net::lookup_host(&address_str).await {
            Ok(mut addrs) => match addrs.next() {
                Some(address) => address,
                None => {
                    tracing::error!(address = %address_str, "upstream address did not resolve");
                    return None;
                }
            },
            Err(error) => {
                tracing::error!(%error, address = %address_str, "cannot resolve upstream address");
                return None;
            }
        };
        let handler = ProxyClientHandler {
            ignore_host_key: self.config.ignore_host_key,
        };
        let config = Arc::new(russh::client::Config::default());
        let mut handle = russh::client::connect(config, address, handler).await.ok()?;
        let (user, password) = credentials;
        if handle.authenticate_password(user, password).await.ok()? {
            Some(handle)
        } else {
            None
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn register_channel(
        &self,
        server_channel: ChannelId,
        opened: Option<Channel<ClientMsg>>,
        kind: &str,
        next_id: &mut u32,
        channels: &mut HashMap<ChannelId, (u32, mpsc::UnboundedSender<ChannelBridgeRequest>)>,
        server_handle: &Option<ServerHandle>,
        reply: oneshot::Sender<bool>,
    ) {
        let accepted = match (opened, server_handle) {
            (Some(upstream_channel), Some(server_handle)) => {
                let id = *next_id;
                *next_id += 1;
                let (tx, rx) = mpsc::unbounded_channel();
                channels.insert(server_channel, (id, tx));
                let bridge = ChannelBridge {
                    source: self.source,
                    id,
                    server_handle: server_handle.clone(),
                    server_channel,
                    upstream_channel,
                    requests: rx,
                    sink: self.sink.clone(),
                };
                tokio::spawn(bridge.run());
                true
            }
            _ => false,
        };
        self.sink
            .log(ProxyEvent::new(
                self.source,
                ProxyEventPayload::NewChannel {
                    kind: kind.to_string(),
                    accepted,
                },
            ))
            .await;
        let _ = reply.send(accepted);
    }
}
