use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::transport::{report, validate_response, ErrorSink, Task};
use super::{ResolverError, ResolverOptions};
use crate::dns::Message;

/// Incremental parser over the RFC 1035 §4.2.2 stream framing: a 16-bit
/// big-endian length prefix before every message. Chunk boundaries may split
/// the prefix or merge several messages; the state machine does not care.
enum ReadState {
    Length { prefix: [u8; 2], have: usize },
    Body { expected: usize, data: Vec<u8> },
}

impl ReadState {
    fn length() -> ReadState {
        ReadState::Length {
            prefix: [0; 2],
            have: 0,
        }
    }
}

/// Request/response engine over a single lazily-connected TCP stream.
pub struct TcpTransport {
    options: Rc<ResolverOptions>,
    commands: mpsc::UnboundedReceiver<Task>,
    sink: Option<ErrorSink>,
    stream: Option<TcpStream>,
    connected_to: Option<SocketAddr>,
    read_state: ReadState,
    outbound: VecDeque<Task>,
    inbound: HashMap<u16, Task>,
    close_at: Option<Instant>,
    last_activity: Instant,
    closed: bool,
}

enum Event {
    Command(Option<Task>),
    Io(io::Result<usize>),
    Tick,
    CloseDue,
}

impl TcpTransport {
    pub fn new(
        options: Rc<ResolverOptions>,
        commands: mpsc::UnboundedReceiver<Task>,
        sink: Option<ErrorSink>,
    ) -> TcpTransport {
        TcpTransport {
            options,
            commands,
            sink,
            stream: None,
            connected_to: None,
            read_state: ReadState::length(),
            outbound: VecDeque::new(),
            inbound: HashMap::new(),
            close_at: None,
            last_activity: Instant::now(),
            closed: false,
        }
    }

    pub async fn run(mut self) {
        let scan_period = Duration::from_millis((self.options.timeout_in_ms / 20).max(1));
        let mut scan = time::interval(scan_period);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut chunk = vec![0u8; 8 * 1024];

        loop {
            if self.closed && self.outbound.is_empty() && self.inbound.is_empty() {
                return;
            }
            let stream_open = self.stream.is_some();
            let stream = &mut self.stream;
            let close_at = self.close_at;
            let event = tokio::select! {
                command = self.commands.next(), if !self.closed => Event::Command(command),
                read = async {
                    match stream {
                        Some(stream) => stream.read(&mut chunk).await,
                        None => futures::future::pending().await,
                    }
                }, if stream_open => Event::Io(read),
                _ = scan.tick() => Event::Tick,
                _ = async {
                    match close_at {
                        Some(deadline) => time::sleep_until(deadline).await,
                        None => futures::future::pending().await,
                    }
                }, if close_at.is_some() => Event::CloseDue,
            };
            match event {
                Event::Command(Some(task)) => self.enqueue(task).await,
                Event::Command(None) => self.closed = true,
                Event::Io(Ok(0)) => self.handle_eof().await,
                Event::Io(Ok(len)) => {
                    self.last_activity = Instant::now();
                    let received = chunk[..len].to_vec();
                    self.feed(&received);
                    self.maybe_schedule_close();
                }
                Event::Io(Err(err)) => self.fail_all(&err.to_string()),
                Event::Tick => self.scan_timeouts(),
                Event::CloseDue => self.close_if_idle(),
            }
        }
    }

    async fn enqueue(&mut self, task: Task) {
        if self.inbound.contains_key(&task.id) || self.outbound.iter().any(|t| t.id == task.id) {
            let id = task.id;
            task.finish(Err(ResolverError::RequestIdInUse(id)));
            return;
        }
        self.close_at = None;
        self.outbound.push_back(task);
        self.flush().await;
    }

    /// Connect if needed and write queued frames.
    ///
    /// The transport keeps one connection. A task addressed to a different
    /// server waits in the queue until the in-flight set drains, then forces
    /// a reconnect.
    async fn flush(&mut self) {
        loop {
            let front_server = match self.outbound.front() {
                Some(task) => task.server,
                None => return,
            };
            if let Some(peer) = self.connected_to {
                if peer != front_server {
                    if !self.inbound.is_empty() {
                        return;
                    }
                    trace!("draining connection to {} for {}", peer, front_server);
                    self.drop_stream();
                }
            }
            if self.stream.is_none() {
                match TcpStream::connect(front_server).await {
                    Ok(stream) => {
                        trace!("tcp connection to {} opened", front_server);
                        self.stream = Some(stream);
                        self.connected_to = Some(front_server);
                        self.read_state = ReadState::length();
                        self.last_activity = Instant::now();
                    }
                    Err(err) => {
                        self.fail_all(&err.to_string());
                        return;
                    }
                }
            }
            let mut task = match self.outbound.pop_front() {
                Some(task) => task,
                None => return,
            };
            let mut framed = Vec::with_capacity(2 + task.payload.len());
            framed.extend_from_slice(&(task.payload.len() as u16).to_be_bytes());
            framed.extend_from_slice(&task.payload);
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return,
            };
            match stream.write_all(&framed).await {
                Ok(()) => {
                    trace!("sent frame for request {}", task.id);
                    self.last_activity = Instant::now();
                    if task.sent_at.is_none() {
                        task.sent_at = Some(Instant::now());
                    }
                    self.inbound.insert(task.id, task);
                }
                Err(err) => {
                    self.outbound.push_front(task);
                    self.fail_all(&err.to_string());
                    return;
                }
            }
        }
    }

    /// Advance the stream parser over one received chunk.
    fn feed(&mut self, mut chunk: &[u8]) {
        while !chunk.is_empty() {
            match &mut self.read_state {
                ReadState::Length { prefix, have } => {
                    let take = (2 - *have).min(chunk.len());
                    prefix[*have..*have + take].copy_from_slice(&chunk[..take]);
                    *have += take;
                    chunk = &chunk[take..];
                    if *have == 2 {
                        let expected = u16::from_be_bytes(*prefix) as usize;
                        self.read_state = ReadState::Body {
                            expected,
                            data: Vec::with_capacity(expected),
                        };
                        if expected == 0 {
                            self.read_state = ReadState::length();
                            self.handle_frame(&[]);
                        }
                    }
                }
                ReadState::Body { expected, data } => {
                    let take = (*expected - data.len()).min(chunk.len());
                    data.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];
                    if data.len() == *expected {
                        let frame = std::mem::take(data);
                        self.read_state = ReadState::length();
                        self.handle_frame(&frame);
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                report(&self.sink, &ResolverError::Codec(err));
                return;
            }
        };
        match self.inbound.remove(&message.id) {
            Some(task) => {
                trace!("request {} resolved", message.id);
                let opcode = task.opcode;
                task.finish(validate_response(opcode, message));
            }
            None => {
                report(&self.sink, &ResolverError::ResponseIdUnexpected(message.id));
            }
        }
    }

    /// Peer closed the stream: go idle and re-enqueue what was in flight so
    /// a reopened connection can carry it, still under its original timeout.
    async fn handle_eof(&mut self) {
        trace!("tcp connection closed by peer");
        self.drop_stream();
        for (_, task) in self.inbound.drain() {
            self.outbound.push_back(task);
        }
        if self.outbound.is_empty() {
            self.maybe_schedule_close();
        } else {
            self.flush().await;
        }
    }

    /// Reject tasks that ran out of time and end a connection that has been
    /// silent for the whole timeout window.
    fn scan_timeouts(&mut self) {
        let timeout = Duration::from_millis(self.options.timeout_in_ms);
        let now = Instant::now();
        let expired: Vec<u16> = self
            .inbound
            .iter()
            .filter(|(_, task)| task.timed_out(now, timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(task) = self.inbound.remove(&id) {
                debug!("request {} went unanswered", id);
                task.finish(Err(ResolverError::RequestUnanswered));
            }
        }
        if self.stream.is_some()
            && !self.inbound.is_empty()
            && now.duration_since(self.last_activity) >= timeout
        {
            debug!("tcp connection silent for the timeout window, ending it");
            self.drop_stream();
            for (_, task) in self.inbound.drain() {
                task.finish(Err(ResolverError::RequestUnanswered));
            }
        }
        self.maybe_schedule_close();
    }

    fn fail_all(&mut self, reason: &str) {
        report(&self.sink, &ResolverError::Other(reason.to_owned()));
        for task in self.outbound.drain(..) {
            task.finish(Err(ResolverError::Other(reason.to_owned())));
        }
        for (_, task) in self.inbound.drain() {
            task.finish(Err(ResolverError::Other(reason.to_owned())));
        }
        self.drop_stream();
        self.close_at = None;
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.connected_to = None;
        self.read_state = ReadState::length();
    }

    fn maybe_schedule_close(&mut self) {
        if self.stream.is_some() && self.outbound.is_empty() && self.inbound.is_empty() {
            self.close_at =
                Some(Instant::now() + Duration::from_millis(self.options.keep_open_for_ms));
        } else {
            self.close_at = None;
        }
    }

    fn close_if_idle(&mut self) {
        self.close_at = None;
        if self.outbound.is_empty() && self.inbound.is_empty() {
            trace!("closing idle tcp connection");
            self.drop_stream();
        }
    }
}
