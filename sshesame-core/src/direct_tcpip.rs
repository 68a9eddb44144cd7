//! Direct-tcpip channel handling: a pluggable per-port server faking a TCP
//! tunnel destination. Only an HTTP responder on port 80 is registered;
//! anything else is refused at channel-open time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use russh::server::Handle;
use russh::ChannelId;
use tokio::sync::{mpsc, oneshot};

use crate::commands::Output;
use crate::event::{Event, EventPayload, Sink};
use crate::session::ChannelOutput;

/// The byte-stream view of a direct-tcpip channel handed to a `PortServer`:
/// read incoming client bytes, write a response, and log what was seen.
pub struct PortIo {
    data_rx: mpsc::UnboundedReceiver<Bytes>,
    output: Box<dyn Output>,
    sink: Arc<dyn Sink>,
    source: SocketAddr,
    channel_id: u32,
}

impl PortIo {
    pub async fn read_chunk(&mut self) -> Option<Bytes> {
        self.data_rx.recv().await
    }

    pub async fn write(&mut self, data: &[u8]) {
        self.output.write(data).await;
    }

    pub async fn log_input(&self, input: String) {
        self.sink
            .log(Event::on_channel(
                self.source,
                self.channel_id,
                EventPayload::DirectTcpipInput { input },
            ))
            .await;
    }
}

/// A fake server bound to one destination port.
#[async_trait::async_trait]
pub trait PortServer: Send + Sync {
    async fn serve(&self, io: PortIo);
}

/// Reads one HTTP request and replies 404, same as any unconfigured vhost
/// would on a real box.
pub struct HttpPortServer;

#[async_trait::async_trait]
impl PortServer for HttpPortServer {
    async fn serve(&self, mut io: PortIo) {
        let mut buffer = Vec::new();
        loop {
            let Some(chunk) = io.read_chunk().await else {
                return;
            };
            buffer.extend_from_slice(&chunk);

            let mut headers = [httparse::EMPTY_HEADER; 32];
            let mut request = httparse::Request::new(&mut headers);
            match request.parse(&buffer) {
                Ok(httparse::Status::Complete(_)) => {
                    let method = request.method.unwrap_or("").to_string();
                    let path = request.path.unwrap_or("").to_string();
                    io.log_input(format!("{method} {path}")).await;
                    io.write(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    return;
                }
                Ok(httparse::Status::Partial) => continue,
                Err(_) => return,
            }
        }
    }
}

/// Destination-port to server lookup. Only port 80 is registered.
pub struct PortRegistry {
    servers: HashMap<u16, Arc<dyn PortServer>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        let mut servers: HashMap<u16, Arc<dyn PortServer>> = HashMap::new();
        servers.insert(80, Arc::new(HttpPortServer));
        Self { servers }
    }

    pub fn get(&self, port: u16) -> Option<Arc<dyn PortServer>> {
        self.servers.get(&port).cloned()
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests forwarded from the connection's Handler into this channel's
/// own task, mirroring `session::SessionRequest`.
pub enum DirectTcpipRequest {
    Data(Bytes, oneshot::Sender<()>),
    Eof(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

pub struct DirectTcpipChannel {
    pub id: u32,
    pub source: SocketAddr,
    pub sink: Arc<dyn Sink>,
    pub handle: Handle,
    pub channel: ChannelId,
    pub destination: String,
    pub originator: String,
    pub server: Arc<dyn PortServer>,
    pub requests: mpsc::UnboundedReceiver<DirectTcpipRequest>,
}

impl DirectTcpipChannel {
    pub async fn run(mut self) {
        self.sink
            .log(Event::on_channel(
                self.source,
                self.id,
                EventPayload::DirectTcpip {
                    destination: self.destination.clone(),
                    originator: self.originator.clone(),
                },
            ))
            .await;

        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let mut data_tx = Some(data_tx);
        let io = PortIo {
            data_rx,
            output: Box::new(ChannelOutput::stdout(self.handle.clone(), self.channel)),
            sink: self.sink.clone(),
            source: self.source,
            channel_id: self.id,
        };
        let server = self.server.clone();
        let serve_task = tokio::spawn(async move { server.serve(io).await });

        while let Some(request) = self.requests.recv().await {
            match request {
                DirectTcpipRequest::Data(data, reply) => {
                    if let Some(tx) = &data_tx {
                        let _ = tx.send(data);
                    }
                    let _ = reply.send(());
                }
                DirectTcpipRequest::Eof(reply) => {
                    data_tx = None;
                    let _ = reply.send(());
                }
                DirectTcpipRequest::Close(reply) => {
                    let _ = reply.send(());
                    break;
                }
            }
        }

        drop(data_tx);
        let _ = serve_task.await;
        let _ = self.handle.close(self.channel).await;
        self.sink
            .log(Event::on_channel(
                self.source,
                self.id,
                EventPayload::DirectTcpipClose,
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSink;

    #[tokio::test]
    async fn unregistered_port_is_absent() {
        let registry = PortRegistry::new();
        assert!(registry.get(22).is_none());
        assert!(registry.get(80).is_some());
    }

    #[derive(Default, Clone)]
    struct BufOutput(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    #[async_trait::async_trait]
    impl Output for BufOutput {
        async fn write(&mut self, data: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(data);
        }
    }

    /// A GET request to an unconfigured path on the one registered port
    /// gets a plain 404, with no body.
    #[tokio::test]
    async fn http_port_server_replies_404_not_found() {
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let output = BufOutput::default();
        let sink: Arc<dyn Sink> = Arc::new(EventSink::new(Vec::new(), false, false));
        let io = PortIo {
            data_rx,
            output: Box::new(output.clone()),
            sink,
            source: "203.0.113.1:4444".parse().unwrap(),
            channel_id: 0,
        };

        let serve_task = tokio::spawn(async move { HttpPortServer.serve(io).await });
        data_tx.send(Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n")).unwrap();
        drop(data_tx);
        serve_task.await.unwrap();

        assert_eq!(
            output.0.lock().unwrap().as_slice(),
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".as_slice()
        );
    }

    #[test]
    fn open_and_close_events_are_distinct_and_tagged() {
        let addr = "203.0.113.1:4444".parse().unwrap();
        let open = Event::on_channel(
            addr,
            0,
            EventPayload::DirectTcpip {
                destination: "example.org:80".into(),
                originator: "203.0.113.1:4444".into(),
            },
        );
        let close = Event::on_channel(addr, 0, EventPayload::DirectTcpipClose);
        assert!(open.human_message().contains("example.org:80"));
        assert_ne!(open.human_message(), close.human_message());
    }
}
