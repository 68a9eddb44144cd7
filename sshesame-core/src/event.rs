//! Tagged-union event model and the thread-safe sink it is written to.
//! Human rendering produces one fixed-format line per event; JSON
//! rendering is derived from `serde`.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    NoAuth {
        user: String,
        accepted: bool,
    },
    PasswordAuth {
        user: String,
        password: String,
        accepted: bool,
    },
    PublicKeyAuth {
        user: String,
        fingerprint: String,
        accepted: bool,
    },
    KeyboardInteractiveAuth {
        user: String,
        answers: Vec<String>,
        accepted: bool,
    },
    Connection {
        client_version: String,
    },
    ConnectionClose,
    TcpipForward {
        address_port: String,
    },
    CancelTcpipForward {
        address_port: String,
    },
    NoMoreSessions,
    Session,
    SessionClose,
    SessionInput {
        input: String,
    },
    Pty {
        terminal: String,
        width: u32,
        height: u32,
    },
    Shell,
    X11,
    Env {
        name: String,
        value: String,
    },
    Exec {
        command: String,
    },
    Subsystem {
        name: String,
    },
    WindowChange {
        width: u32,
        height: u32,
    },
    DirectTcpip {
        destination: String,
        originator: String,
    },
    DirectTcpipClose,
    DirectTcpipInput {
        input: String,
    },
    DebugGlobalRequest {
        request: String,
        payload: String,
    },
    DebugChannelRequest {
        request: String,
        payload: String,
    },
}

/// A single observed event. `source` is the remote address the `[<addr>]`
/// log prefix is built from; `channel_id` is present for channel-scoped
/// events, using a per-connection id dense from zero.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub source: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<u32>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: SocketAddr, payload: EventPayload) -> Self {
        Self {
            source,
            channel_id: None,
            payload,
        }
    }

    pub fn on_channel(source: SocketAddr, channel_id: u32, payload: EventPayload) -> Self {
        Self {
            source,
            channel_id: Some(channel_id),
            payload,
        }
    }

    /// The human-readable one-line rendering, without the `[<addr>]` prefix
    /// (the sink adds that, plus an optional timestamp).
    pub fn human_message(&self) -> String {
        fn accepted_word(accepted: bool) -> &'static str {
            if accepted {
                "accepted"
            } else {
                "rejected"
            }
        }

        match &self.payload {
            EventPayload::NoAuth { user, accepted } => format!(
                "authentication for user {user:?} without credentials {}",
                accepted_word(*accepted)
            ),
            EventPayload::PasswordAuth {
                user,
                password,
                accepted,
            } => format!(
                "authentication for user {user:?} with password {password:?} {}",
                accepted_word(*accepted)
            ),
            EventPayload::PublicKeyAuth {
                user,
                fingerprint,
                accepted,
            } => format!(
                "authentication for user {user:?} with public key {fingerprint} {}",
                accepted_word(*accepted)
            ),
            EventPayload::KeyboardInteractiveAuth {
                user,
                answers,
                accepted,
            } => format!(
                "authentication for user {user:?} with keyboard-interactive answers {answers:?} {}",
                accepted_word(*accepted)
            ),
            EventPayload::Connection { client_version } => {
                format!("connection with client version {client_version:?}")
            }
            EventPayload::ConnectionClose => "connection closed".to_string(),
            EventPayload::TcpipForward { address_port } => {
                format!("tcpip forward request for {address_port}")
            }
            EventPayload::CancelTcpipForward { address_port } => {
                format!("cancel tcpip forward request for {address_port}")
            }
            EventPayload::NoMoreSessions => "no more sessions requested".to_string(),
            EventPayload::Session => "new session channel".to_string(),
            EventPayload::SessionClose => "session closed".to_string(),
            EventPayload::SessionInput { input } => format!("session input: {input:?}"),
            EventPayload::Pty {
                terminal,
                width,
                height,
            } => format!("pty request: terminal={terminal:?}, size={width}x{height}"),
            EventPayload::Shell => "shell requested".to_string(),
            EventPayload::X11 => "x11 requested".to_string(),
            EventPayload::Env { name, value } => format!("env request: {name}={value:?}"),
            EventPayload::Exec { command } => format!("exec request: {command:?}"),
            EventPayload::Subsystem { name } => format!("subsystem request: {name:?}"),
            EventPayload::WindowChange { width, height } => {
                format!("window change request: {width}x{height}")
            }
            EventPayload::DirectTcpip {
                destination,
                originator,
            } => format!("direct-tcpip request to {destination} from {originator}"),
            EventPayload::DirectTcpipClose => "direct-tcpip channel closed".to_string(),
            EventPayload::DirectTcpipInput { input } => {
                format!("direct-tcpip input: {input:?}")
            }
            EventPayload::DebugGlobalRequest { request, payload } => {
                format!("unknown global request {request:?}, payload {payload}")
            }
            EventPayload::DebugChannelRequest { request, payload } => {
                format!("unknown channel request {request:?}, payload {payload}")
            }
        }
    }
}

/// Serialization-friendly handle to the configured event stream. Writes are
/// serialized through an async mutex so that each event's rendering lands
/// atomically, even with multiple connections logging concurrently.
pub struct EventSink<W> {
    writer: Mutex<W>,
    json: bool,
    timestamps: bool,
}

impl<W: AsyncWrite + Unpin + Send> EventSink<W> {
    pub fn new(writer: W, json: bool, timestamps: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            json,
            timestamps,
        }
    }

    /// Writes one line for `event`. Best-effort: a write failure is not
    /// surfaced to the caller and does not abort the connection that
    /// produced the event.
    pub async fn log(&self, event: &Event) {
        let line = self.render(event);
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(%error, "failed to write event to sink");
            return;
        }
        let _ = writer.flush().await;
    }

    fn render(&self, event: &Event) -> String {
        if self.json {
            match serde_json::to_string(event) {
                Ok(mut json) => {
                    json.push('\n');
                    json
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to serialize event");
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

/// Object-safe handle to "the" event sink, so the rest of the engine can
/// hold `Arc<dyn Sink>` without being generic over the underlying stream
/// type.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn log(&self, event: Event);
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for EventSink<W> {
    async fn log(&self, event: Event) {
        EventSink::log(self, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "203.0.113.1:4444".parse().unwrap()
    }

    #[test]
    fn no_auth_rejection_renders_fixed_message() {
        let event = Event::new(
            addr(),
            EventPayload::NoAuth {
                user: "root".into(),
                accepted: false,
            },
        );
        assert_eq!(
            event.human_message(),
            "authentication for user \"root\" without credentials rejected"
        );
    }

    #[test]
    fn password_auth_acceptance_renders_fixed_message() {
        let event = Event::new(
            addr(),
            EventPayload::PasswordAuth {
                user: "root".into(),
                password: "hunter2".into(),
                accepted: true,
            },
        );
        assert_eq!(
            event.human_message(),
            "authentication for user \"root\" with password \"hunter2\" accepted"
        );
    }

    /// `tcpip-forward 0.0.0.0 0` logs the address the client requested,
    /// not whatever port ends up allocated.
    #[test]
    fn tcpip_forward_port_zero_logs_requested_address() {
        let event = Event::new(
            addr(),
            EventPayload::TcpipForward {
                address_port: "0.0.0.0:0".into(),
            },
        );
        assert_eq!(event.human_message(), "tcpip forward request for 0.0.0.0:0");
    }

    #[tokio::test]
    async fn sink_serializes_json_lines() {
        let buf = Vec::new();
        let sink = EventSink::new(buf, true, false);
        sink.log(&Event::new(addr(), EventPayload::NoMoreSessions))
            .await;
        let buf = sink.writer.into_inner();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"event_type\":\"no_more_sessions\""));
        assert!(text.ends_with('\n'));
    }
}
