//! Per-connection request/channel dispatch: the `russh::server::Handler`
//! implementation plus the actor task that owns connection-scoped state
//! (the channel-id counter, the `noMoreSessions` flag, and the routing
//! table from SSH channel id to the task running that channel).
//!
//! `Handler` callbacks only translate SSH library calls into typed events
//! on an unbounded channel and wait for a reply; all actual state lives in
//! `ConnectionActor::run`, which is the only place that mutates it.

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use russh::keys::PublicKey;
use russh::server::{Auth, Handle, Msg, Response, Session};
use russh::{Channel, ChannelId, Sig};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

use crate::auth;
use crate::commands::Registry;
use crate::config::ConfigView;
use crate::direct_tcpip::{DirectTcpipChannel, DirectTcpipRequest, PortRegistry};
use crate::event::{Event, EventPayload, Sink};
use crate::keys;
use crate::session::{PtyParams, SessionChannel, SessionRequest};
use crate::wire;

/// Events forwarded from `Handler` callbacks into the connection's actor
/// task.
pub enum HandlerEvent {
    Authenticated(Handle, String),
    AuthNone(String, oneshot::Sender<bool>),
    AuthPassword(String, String, oneshot::Sender<bool>),
    AuthPublicKeyOffered(oneshot::Sender<bool>),
    AuthPublicKey(String, PublicKey, oneshot::Sender<bool>),
    AuthKeyboardInteractiveStart(oneshot::Sender<Option<(String, Vec<(String, bool)>)>>),
    AuthKeyboardInteractiveAnswer(String, Vec<String>, oneshot::Sender<bool>),
    ChannelOpenSession(ChannelId, oneshot::Sender<bool>),
    ChannelOpenDirectTcpip(ChannelId, String, u32, String, u32, oneshot::Sender<bool>),
    Pty(ChannelId, wire::PtyRequestPayload, oneshot::Sender<()>),
    WindowChange(ChannelId, wire::WindowChangePayload, oneshot::Sender<()>),
    X11(ChannelId, wire::X11RequestPayload, oneshot::Sender<()>),
    Env(ChannelId, wire::EnvRequestPayload, oneshot::Sender<()>),
    Shell(ChannelId, oneshot::Sender<bool>),
    Exec(ChannelId, String, oneshot::Sender<bool>),
    Subsystem(ChannelId, String, oneshot::Sender<bool>),
    Signal(ChannelId, oneshot::Sender<()>),
    Data(ChannelId, Bytes, oneshot::Sender<()>),
    ExtendedData(ChannelId, Bytes, u32, oneshot::Sender<()>),
    ChannelEof(ChannelId, oneshot::Sender<()>),
    ChannelClose(ChannelId, oneshot::Sender<()>),
    TcpipForward(String, u32, oneshot::Sender<()>),
    CancelTcpipForward(String, u32, oneshot::Sender<()>),
    NoMoreSessions(oneshot::Sender<()>),
    UnrecognizedGlobalRequest(String, Vec<u8>),
    Disconnect,
}

#[derive(thiserror::Error, Debug)]
#[error("connection actor is gone")]
struct ActorGone;

pub struct ConnectionHandler {
    pub event_tx: UnboundedSender<HandlerEvent>,
}

impl ConnectionHandler {
    fn send(&self, event: HandlerEvent) -> Result<(), ActorGone> {
        self.event_tx.send(event).map_err(|_| ActorGone)
    }
}

fn modes_from_pty(modes: &[(russh::Pty, u32)]) -> Vec<wire::TerminalMode> {
    modes
        .iter()
        .map(|(opcode, value)| wire::TerminalMode {
            opcode: *opcode as u8,
            value: *value,
        })
        .collect()
}

impl russh::server::Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        let client_version = String::from_utf8_lossy(session.remote_sshid()).into_owned();
        self.send(HandlerEvent::Authenticated(session.handle(), client_version))?;
        Ok(())
    }

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::AuthNone(user.to_string(), tx))?;
        Ok(if rx.await.unwrap_or(false) {
            Auth::Accept
        } else {
            Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            }
        })
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::AuthPassword(
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

    async fn auth_publickey_offered(
        &mut self,
        _user: &str,
        _key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::AuthPublicKeyOffered(tx))?;
        Ok(if rx.await.unwrap_or(false) {
            Auth::Accept
        } else {
            Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            }
        })
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::AuthPublicKey(user.to_string(), key.clone(), tx))?;
        Ok(if rx.await.unwrap_or(false) {
            Auth::Accept
        } else {
            Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            }
        })
    }

    async fn auth_keyboard_interactive<'a>(
        &'a mut self,
        user: &str,
        _submethods: &str,
        response: Option<Response<'a>>,
    ) -> Result<Auth, Self::Error> {
        match response {
            None => {
                let (tx, rx) = oneshot::channel();
                self.send(HandlerEvent::AuthKeyboardInteractiveStart(tx))?;
                match rx.await.ok().flatten() {
                    Some((instruction, questions)) => Ok(Auth::Partial {
                        name: Cow::Borrowed(""),
                        instructions: Cow::Owned(instruction),
                        prompts: Cow::Owned(
                            questions
                                .into_iter()
                                .map(|(text, echo)| (Cow::Owned(text), echo))
                                .collect(),
                        ),
                    }),
                    None => Ok(Auth::Reject {
                        proceed_with_methods: None,
                        partial_success: false,
                    }),
                }
            }
            Some(mut response) => {
                let mut answers = Vec::new();
                while let Some(bytes) = response.next() {
                    answers.push(String::from_utf8_lossy(bytes).into_owned());
                }
                let (tx, rx) = oneshot::channel();
                self.send(HandlerEvent::AuthKeyboardInteractiveAnswer(
                    user.to_string(),
                    answers,
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
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::ChannelOpenSession(channel.id(), tx))?;
        Ok(rx.await.unwrap_or(false))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::ChannelOpenDirectTcpip(
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
        self.send(HandlerEvent::Pty(
            channel,
            wire::PtyRequestPayload {
                term: term.to_string(),
                width: col_width,
                height: row_height,
                pixel_width: pix_width,
                pixel_height: pix_height,
                modes: modes_from_pty(modes),
            },
            tx,
        ))?;
        let _ = rx.await;
        session.channel_success(channel)?;
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
        self.send(HandlerEvent::WindowChange(
            channel,
            wire::WindowChangePayload {
                width: col_width,
                height: row_height,
                pixel_width: pix_width,
                pixel_height: pix_height,
            },
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
        self.send(HandlerEvent::X11(
            channel,
            wire::X11RequestPayload {
                single_connection,
                auth_protocol: x11_auth_protocol.to_string(),
                auth_cookie: x11_auth_cookie.to_string(),
                screen_number: x11_screen_number,
            },
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
        self.send(HandlerEvent::Env(
            channel,
            wire::EnvRequestPayload {
                name: variable_name.to_string(),
                value: variable_value.to_string(),
            },
            tx,
        ))?;
        let _ = rx.await;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::Shell(channel, tx))?;
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
        self.send(HandlerEvent::Exec(channel, command, tx))?;
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
        self.send(HandlerEvent::Subsystem(channel, name.to_string(), tx))?;
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        _signal_name: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::Signal(channel, tx))?;
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
        self.send(HandlerEvent::Data(channel, Bytes::copy_from_slice(data), tx))?;
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
        self.send(HandlerEvent::ExtendedData(
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
        self.send(HandlerEvent::ChannelEof(channel, tx))?;
        let _ = rx.await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::ChannelClose(channel, tx))?;
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
        self.send(HandlerEvent::TcpipForward(address.to_string(), *port, tx))?;
        let _ = rx.await;
        if *port == 0 {
            *port = rand::thread_rng().gen_range(1024..=65535);
        }
        session.request_success();
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::CancelTcpipForward(address.to_string(), port, tx))?;
        let _ = rx.await;
        session.request_success();
        Ok(true)
    }

    async fn streamlocal_forward(
        &mut self,
        socket_path: &str,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.send(HandlerEvent::UnrecognizedGlobalRequest(
            "streamlocal-forward@openssh.com".to_string(),
            socket_path.as_bytes().to_vec(),
        ))?;
        session.request_failure();
        Ok(false)
    }

    async fn cancel_streamlocal_forward(
        &mut self,
        socket_path: &str,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.send(HandlerEvent::UnrecognizedGlobalRequest(
            "cancel-streamlocal-forward@openssh.com".to_string(),
            socket_path.as_bytes().to_vec(),
        ))?;
        session.request_failure();
        Ok(false)
    }

    /// `no-more-sessions@openssh.com`. Not a request type the wire
    /// dispatcher treats specially beyond this; it always succeeds with an
    /// empty reply, same as `pty_request`/`env_request`.
    async fn openssh_no_more_sessions(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::NoMoreSessions(tx))?;
        let _ = rx.await;
        session.request_success();
        Ok(())
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        let _ = self.event_tx.send(HandlerEvent::Disconnect);
    }
}

enum ChannelRoute {
    Session(mpsc::UnboundedSender<SessionRequest>),
    DirectTcpip(mpsc::UnboundedSender<DirectTcpipRequest>),
}

/// Owns all per-connection state and is the sole consumer of the events a
/// `ConnectionHandler` emits.
pub struct ConnectionActor {
    pub source: SocketAddr,
    pub config: Arc<ConfigView>,
    pub sink: Arc<dyn Sink>,
    pub registry: Arc<Registry>,
    pub ports: Arc<PortRegistry>,
    pub events: mpsc::UnboundedReceiver<HandlerEvent>,
}

impl ConnectionActor {
    pub async fn run(mut self) {
        let mut handle: Option<Handle> = None;
        let mut next_id: u32 = 0;
        let mut no_more_sessions = false;
        let mut auth_tries: u32 = 0;
        let mut channels: HashMap<ChannelId, (u32, ChannelRoute)> = HashMap::new();

        while let Some(event) = self.events.recv().await {
            match event {
                HandlerEvent::Authenticated(h, client_version) => {
                    handle = Some(h);
                    self.sink
                        .log(Event::new(self.source, EventPayload::Connection { client_version }))
                        .await;
                }
                HandlerEvent::AuthNone(user, reply) => {
                    auth_tries += 1;
                    let outcome = auth::none(&self.config, &user);
                    let accept = outcome.accept && self.tries_remain(auth_tries);
                    self.sink
                        .log(Event::new(self.source, outcome.event))
                        .await;
                    let _ = reply.send(accept);
                }
                HandlerEvent::AuthPassword(user, password, reply) => {
                    auth_tries += 1;
                    let outcome = auth::password(&self.config, &user, &password);
                    let accept = outcome.accept && self.tries_remain(auth_tries);
                    self.sink
                        .log(Event::new(self.source, outcome.event))
                        .await;
                    let _ = reply.send(accept);
                }
                HandlerEvent::AuthPublicKeyOffered(reply) => {
                    let _ = reply.send(self.config.public_key_auth.is_some());
                }
                HandlerEvent::AuthPublicKey(user, key, reply) => {
                    auth_tries += 1;
                    let fingerprint = keys::fingerprint(&key);
                    let outcome = auth::public_key(&self.config, &user, &fingerprint);
                    let accept = outcome.accept && self.tries_remain(auth_tries);
                    self.sink
                        .log(Event::new(self.source, outcome.event))
                        .await;
                    let _ = reply.send(accept);
                }
                HandlerEvent::AuthKeyboardInteractiveStart(reply) => {
                    let prompt = self.config.keyboard_interactive_auth.as_ref().map(|policy| {
                        (
                            policy.instruction.clone(),
                            policy
                                .questions
                                .iter()
                                .map(|q| (q.text.clone(), q.echo))
                                .collect(),
                        )
                    });
                    let _ = reply.send(prompt);
                }
                HandlerEvent::AuthKeyboardInteractiveAnswer(user, answers, reply) => {
                    auth_tries += 1;
                    let outcome = auth::keyboard_interactive(&self.config, &user, answers);
                    let accept = outcome.accept && self.tries_remain(auth_tries);
                    self.sink
                        .log(Event::new(self.source, outcome.event))
                        .await;
                    let _ = reply.send(accept);
                }
                HandlerEvent::ChannelOpenSession(channel, reply) => {
                    if no_more_sessions || handle.is_none() {
                        let _ = reply.send(false);
                        continue;
                    }
                    let id = next_id;
                    next_id += 1;
                    let (tx, rx) = mpsc::unbounded_channel();
                    channels.insert(channel, (id, ChannelRoute::Session(tx)));
                    let task = SessionChannel {
                        id,
                        source: self.source,
                        sink: self.sink.clone(),
                        handle: handle.clone().expect("checked above"),
                        channel,
                        registry: self.registry.clone(),
                        requests: rx,
                    };
                    tokio::spawn(task.run());
                    let _ = reply.send(true);
                }
                HandlerEvent::ChannelOpenDirectTcpip(
                    channel,
                    destination_address,
                    destination_port,
                    originator_address,
                    originator_port,
                    reply,
                ) => {
                    let server = u16::try_from(destination_port)
                        .ok()
                        .and_then(|port| self.ports.get(port));
                    match (server, &handle) {
                        (Some(server), Some(handle)) => {
                            let id = next_id;
                            next_id += 1;
                            let (tx, rx) = mpsc::unbounded_channel();
                            channels.insert(channel, (id, ChannelRoute::DirectTcpip(tx)));
                            let task = DirectTcpipChannel {
                                id,
                                source: self.source,
                                sink: self.sink.clone(),
                                handle: handle.clone(),
                                channel,
                                destination: format!("{destination_address}:{destination_port}"),
                                originator: format!("{originator_address}:{originator_port}"),
                                server,
                                requests: rx,
                            };
                            tokio::spawn(task.run());
                            let _ = reply.send(true);
                        }
                        _ => {
                            let _ = reply.send(false);
                        }
                    }
                }
                HandlerEvent::Pty(channel, payload, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            let params = PtyParams {
                                term: payload.term,
                                width: payload.width,
                                height: payload.height,
                                pixel_width: payload.pixel_width,
                                pixel_height: payload.pixel_height,
                                modes: payload.modes,
                            };
                            if tx.send(SessionRequest::Pty(params, inner_tx)).is_ok() {
                                let _ = inner_rx.await;
                            }
                        }
                        Some((id, ChannelRoute::DirectTcpip(_))) => {
                            self.log_debug_channel_request(*id, "pty-req", payload.encode())
                                .await;
                        }
                        None => {}
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::WindowChange(channel, payload, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx
                                .send(SessionRequest::WindowChange(
                                    payload.width,
                                    payload.height,
                                    inner_tx,
                                ))
                                .is_ok()
                            {
                                let _ = inner_rx.await;
                            }
                        }
                        Some((id, ChannelRoute::DirectTcpip(_))) => {
                            self.log_debug_channel_request(*id, "window-change", payload.encode())
                                .await;
                        }
                        None => {}
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::X11(channel, payload, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx.send(SessionRequest::X11(inner_tx)).is_ok() {
                                let _ = inner_rx.await;
                            }
                        }
                        Some((id, ChannelRoute::DirectTcpip(_))) => {
                            self.log_debug_channel_request(*id, "x11-req", payload.encode())
                                .await;
                        }
                        None => {}
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::Env(channel, payload, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx
                                .send(SessionRequest::Env(payload.name, payload.value, inner_tx))
                                .is_ok()
                            {
                                let _ = inner_rx.await;
                            }
                        }
                        Some((id, ChannelRoute::DirectTcpip(_))) => {
                            self.log_debug_channel_request(*id, "env", payload.encode())
                                .await;
                        }
                        None => {}
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::Shell(channel, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx.send(SessionRequest::Shell(inner_tx)).is_ok() {
                                let accepted = inner_rx.await.unwrap_or(false);
                                let _ = reply.send(accepted);
                                continue;
                            }
                        }
                        Some((id, ChannelRoute::DirectTcpip(_))) => {
                            self.log_debug_channel_request(*id, "shell", Vec::new()).await;
                        }
                        None => {}
                    }
                    let _ = reply.send(false);
                }
                HandlerEvent::Exec(channel, command, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx
                                .send(SessionRequest::Exec(command.clone(), inner_tx))
                                .is_ok()
                            {
                                let accepted = inner_rx.await.unwrap_or(false);
                                let _ = reply.send(accepted);
                                continue;
                            }
                        }
                        Some((id, ChannelRoute::DirectTcpip(_))) => {
                            let payload = wire::ExecRequestPayload { command }.encode();
                            self.log_debug_channel_request(*id, "exec", payload).await;
                        }
                        None => {}
                    }
                    let _ = reply.send(false);
                }
                HandlerEvent::Subsystem(channel, name, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx
                                .send(SessionRequest::Subsystem(name.clone(), inner_tx))
                                .is_ok()
                            {
                                let accepted = inner_rx.await.unwrap_or(false);
                                let _ = reply.send(accepted);
                                continue;
                            }
                        }
                        Some((id, ChannelRoute::DirectTcpip(_))) => {
                            let payload = wire::SubsystemRequestPayload { name }.encode();
                            self.log_debug_channel_request(*id, "subsystem", payload)
                                .await;
                        }
                        None => {}
                    }
                    let _ = reply.send(false);
                }
                HandlerEvent::Signal(channel, reply) => {
                    if let Some((_, ChannelRoute::Session(tx))) = channels.get(&channel) {
                        let (inner_tx, inner_rx) = oneshot::channel();
                        if tx
                            .send(SessionRequest::Signal(String::new(), inner_tx))
                            .is_ok()
                        {
                            let _ = inner_rx.await;
                        }
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::Data(channel, data, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx.send(SessionRequest::Data(data, inner_tx)).is_ok() {
                                let _ = inner_rx.await;
                            }
                        }
                        Some((_, ChannelRoute::DirectTcpip(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx
                                .send(DirectTcpipRequest::Data(data, inner_tx))
                                .is_ok()
                            {
                                let _ = inner_rx.await;
                            }
                        }
                        None => {}
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::ExtendedData(channel, data, ext, reply) => {
                    if let Some((_, ChannelRoute::Session(tx))) = channels.get(&channel) {
                        let (inner_tx, inner_rx) = oneshot::channel();
                        if tx
                            .send(SessionRequest::ExtendedData(data, ext, inner_tx))
                            .is_ok()
                        {
                            let _ = inner_rx.await;
                        }
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::ChannelEof(channel, reply) => {
                    match channels.get(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx.send(SessionRequest::Eof(inner_tx)).is_ok() {
                                let _ = inner_rx.await;
                            }
                        }
                        Some((_, ChannelRoute::DirectTcpip(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx.send(DirectTcpipRequest::Eof(inner_tx)).is_ok() {
                                let _ = inner_rx.await;
                            }
                        }
                        None => {}
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::ChannelClose(channel, reply) => {
                    match channels.remove(&channel) {
                        Some((_, ChannelRoute::Session(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx.send(SessionRequest::Close(inner_tx)).is_ok() {
                                let _ = inner_rx.await;
                            }
                        }
                        Some((_, ChannelRoute::DirectTcpip(tx))) => {
                            let (inner_tx, inner_rx) = oneshot::channel();
                            if tx.send(DirectTcpipRequest::Close(inner_tx)).is_ok() {
                                let _ = inner_rx.await;
                            }
                        }
                        None => {}
                    }
                    let _ = reply.send(());
                }
                HandlerEvent::TcpipForward(address, port, reply) => {
                    self.sink
                        .log(Event::new(
                            self.source,
                            EventPayload::TcpipForward {
                                address_port: format!("{address}:{port}"),
                            },
                        ))
                        .await;
                    let _ = reply.send(());
                }
                HandlerEvent::CancelTcpipForward(address, port, reply) => {
                    self.sink
                        .log(Event::new(
                            self.source,
                            EventPayload::CancelTcpipForward {
                                address_port: format!("{address}:{port}"),
                            },
                        ))
                        .await;
                    let _ = reply.send(());
                }
                HandlerEvent::NoMoreSessions(reply) => {
                    no_more_sessions = true;
                    self.sink
                        .log(Event::new(self.source, EventPayload::NoMoreSessions))
                        .await;
                    let _ = reply.send(());
                }
                HandlerEvent::UnrecognizedGlobalRequest(request, payload) => {
                    let encoded = data_encoding::BASE64.encode(&payload);
                    self.sink
                        .log(Event::new(
                            self.source,
                            EventPayload::DebugGlobalRequest {
                                request,
                                payload: encoded,
                            },
                        ))
                        .await;
                }
                HandlerEvent::Disconnect => break,
            }
        }

        self.sink
            .log(Event::new(self.source, EventPayload::ConnectionClose))
            .await;
    }

    /// `max_tries == 0` means no library-imposed limit; otherwise the
    /// `count`th attempt is the last one that may still succeed.
    fn tries_remain(&self, count: u32) -> bool {
        self.config.max_tries == 0 || count <= self.config.max_tries
    }

    async fn log_debug_channel_request(&self, channel_id: u32, request: &str, payload: Vec<u8>) {
        let encoded = data_encoding::BASE64.encode(&payload);
        self.sink
            .log(Event::on_channel(
                self.source,
                channel_id,
                EventPayload::DebugChannelRequest {
                    request: request.to_string(),
                    payload: encoded,
                },
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigView;
    use crate::direct_tcpip::PortRegistry;

    #[async_trait::async_trait]
    impl Sink for () {
        async fn log(&self, _event: Event) {}
    }

    fn actor(max_tries: u32) -> ConnectionActor {
        let (_tx, events) = mpsc::unbounded_channel();
        ConnectionActor {
            source: "203.0.113.1:4444".parse().unwrap(),
            config: Arc::new(ConfigView {
                max_tries,
                ..ConfigView::default()
            }),
            sink: Arc::new(()),
            registry: Arc::new(Registry::new()),
            ports: Arc::new(PortRegistry::new()),
            events,
        }
    }

    #[test]
    fn zero_max_tries_means_unlimited() {
        let actor = actor(0);
        assert!(actor.tries_remain(1));
        assert!(actor.tries_remain(1_000));
    }

    #[test]
    fn tries_remain_up_to_and_including_the_limit() {
        let actor = actor(3);
        assert!(actor.tries_remain(1));
        assert!(actor.tries_remain(3));
        assert!(!actor.tries_remain(4));
    }
}
