//! Dual-transport DNS resolver socket.
//!
//! Given a message, transmit it to a configured name server and deliver the
//! matching response, or a typed error, exactly once. UPDATE messages and
//! messages over 512 bytes travel over TCP with a 16-bit length prefix;
//! everything else goes over UDP with up to two retries on timeout.
//!
//! Construction follows the responder pattern: [`ResolverSocket::new`]
//! returns the handle plus a task future that owns both transport sockets.
//! The caller spawns the task on its current-thread runtime; dropping the
//! handle stops the task once its queues drain.

mod tcp;
mod transport;
mod udp;

use std::cell::Cell;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::rc::Rc;

use futures::channel::{mpsc, oneshot};
use futures::future;
use log::debug;
use thiserror::Error;

use crate::dns::{DnsError, Message, MAX_UDP_LEN};
use transport::Task;

pub use transport::ErrorSink;

/// Everything that can go wrong between submitting a request and getting
/// its response.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("no known name servers")]
    NoKnownNameServers,
    #[error("request id {0} is already in flight")]
    RequestIdInUse(u16),
    #[error("request of {0} bytes exceeds the 65535-byte message limit")]
    RequestTooLong(usize),
    #[error("request went unanswered")]
    RequestUnanswered,
    #[error("server answered with rcode {0}")]
    ResponseBad(u8),
    #[error("response id {0} matches no outstanding request")]
    ResponseIdUnexpected(u16),
    #[error("response direction or opcode does not match the request")]
    ResponseNotExpected,
    #[error("malformed message: {0}")]
    Codec(DnsError),
    #[error("all {} requests failed", .0.len())]
    Aggregate(Vec<ResolverError>),
    #[error("{0}")]
    Other(String),
}

/// Tuning knobs shared by both transports, immutable once the socket is up.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub name_servers: Vec<IpAddr>,
    pub port: u16,
    pub timeout_in_ms: u64,
    pub keep_open_for_ms: u64,
    pub udp_retries: u32,
}

impl Default for ResolverOptions {
    fn default() -> ResolverOptions {
        ResolverOptions {
            name_servers: Vec::new(),
            port: 53,
            timeout_in_ms: 10_000,
            keep_open_for_ms: 3_000,
            udp_retries: 2,
        }
    }
}

/// The future driving both transports; spawn it with
/// `tokio::task::spawn_local` or poll it alongside the caller.
pub type ResolverTask = Pin<Box<dyn Future<Output = ()>>>;

/// Request/response engine over one UDP and one TCP transport.
pub struct ResolverSocket {
    options: Rc<ResolverOptions>,
    udp: mpsc::UnboundedSender<Task>,
    tcp: mpsc::UnboundedSender<Task>,
    next_id: Cell<u16>,
}

impl ResolverSocket {
    pub fn new(options: ResolverOptions) -> (ResolverSocket, ResolverTask) {
        ResolverSocket::with_error_sink(options, None)
    }

    /// Like [`ResolverSocket::new`], with a sink receiving errors that have
    /// no task to fail: unmatched response ids and socket-level faults.
    pub fn with_error_sink(
        options: ResolverOptions,
        sink: Option<ErrorSink>,
    ) -> (ResolverSocket, ResolverTask) {
        let options = Rc::new(options);
        let (udp_tx, udp_rx) = mpsc::unbounded();
        let (tcp_tx, tcp_rx) = mpsc::unbounded();
        let udp = udp::UdpTransport::new(options.clone(), udp_rx, sink.clone());
        let tcp = tcp::TcpTransport::new(options.clone(), tcp_rx, sink);
        let task: ResolverTask = Box::pin(async move {
            future::join(udp.run(), tcp.run()).await;
        });
        let socket = ResolverSocket {
            options,
            udp: udp_tx,
            tcp: tcp_tx,
            next_id: Cell::new(rand::random()),
        };
        (socket, task)
    }

    /// Next message id from this socket's counter.
    pub fn allocate_id(&self) -> u16 {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        id
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Transmit `message` to the first configured name server and await its
    /// response.
    pub async fn send(&self, message: &Message) -> Result<Message, ResolverError> {
        let server = match self.options.name_servers.first() {
            Some(addr) => SocketAddr::new(*addr, self.options.port),
            None => return Err(ResolverError::NoKnownNameServers),
        };
        self.send_to(message, server).await
    }

    /// Transmit `message` to one specific server.
    pub async fn send_to(
        &self,
        message: &Message,
        server: SocketAddr,
    ) -> Result<Message, ResolverError> {
        let payload = message.encode().map_err(|err| match err {
            DnsError::MessageTooLong(len) => ResolverError::RequestTooLong(len),
            other => ResolverError::Codec(other),
        })?;

        let over_tcp = message.is_update() || payload.len() > MAX_UDP_LEN;
        let retries_left = if over_tcp { 0 } else { self.options.udp_retries };
        debug!(
            "sending message {} ({} bytes) over {}",
            message.id,
            payload.len(),
            if over_tcp { "tcp" } else { "udp" }
        );

        let (done, completion) = oneshot::channel();
        let task = Task {
            id: message.id,
            opcode: message.opcode(),
            payload,
            server,
            retries_left,
            sent_at: None,
            done,
        };
        let queue = if over_tcp { &self.tcp } else { &self.udp };
        queue
            .unbounded_send(task)
            .map_err(|_| ResolverError::Other("resolver task is gone".to_owned()))?;
        completion
            .await
            .map_err(|_| ResolverError::Other("resolver task dropped the request".to_owned()))?
    }

    /// Transmit each message to every configured name server; succeeds with
    /// the collected responses if at least one request succeeded, fails with
    /// the collected errors otherwise.
    pub async fn send_all(&self, message: &Message) -> Result<Vec<Message>, ResolverError> {
        if self.options.name_servers.is_empty() {
            return Err(ResolverError::NoKnownNameServers);
        }
        let requests = self.options.name_servers.iter().map(|addr| {
            let mut message = message.clone();
            message.id = self.allocate_id();
            let server = SocketAddr::new(*addr, self.options.port);
            async move { self.send_to(&message, server).await }
        });
        let results = future::join_all(requests).await;

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(response) => responses.push(response),
                Err(err) => failures.push(err),
            }
        }
        if responses.is_empty() {
            Err(ResolverError::Aggregate(failures))
        } else {
            Ok(responses)
        }
    }
}
