use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use log::{debug, trace};
use tokio::net::UdpSocket;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::transport::{report, validate_response, ErrorSink, Task};
use super::{ResolverError, ResolverOptions};
use crate::dns::{Message, MAX_MESSAGE_LEN};

/// One datagram per message; no framing state.
pub struct UdpTransport {
    options: Rc<ResolverOptions>,
    commands: mpsc::UnboundedReceiver<Task>,
    sink: Option<ErrorSink>,
    socket: Option<UdpSocket>,
    outbound: VecDeque<Task>,
    inbound: HashMap<u16, Task>,
    close_at: Option<Instant>,
    closed: bool,
}

enum Event {
    Command(Option<Task>),
    Datagram(io::Result<usize>),
    Tick,
    CloseDue,
}

impl UdpTransport {
    pub fn new(
        options: Rc<ResolverOptions>,
        commands: mpsc::UnboundedReceiver<Task>,
        sink: Option<ErrorSink>,
    ) -> UdpTransport {
        UdpTransport {
            options,
            commands,
            sink,
            socket: None,
            outbound: VecDeque::new(),
            inbound: HashMap::new(),
            close_at: None,
            closed: false,
        }
    }

    pub async fn run(mut self) {
        let scan_period = Duration::from_millis((self.options.timeout_in_ms / 20).max(1));
        let mut scan = time::interval(scan_period);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_MESSAGE_LEN];

        loop {
            if self.closed && self.outbound.is_empty() && self.inbound.is_empty() {
                return;
            }
            let socket = &self.socket;
            let close_at = self.close_at;
            let event = tokio::select! {
                command = self.commands.next(), if !self.closed => Event::Command(command),
                received = async {
                    match socket {
                        Some(socket) => socket.recv_from(&mut buf).await,
                        None => futures::future::pending().await,
                    }
                }, if socket.is_some() => Event::Datagram(received.map(|(n, _)| n)),
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
                Event::Datagram(Ok(len)) => {
                    let datagram = buf[..len].to_vec();
                    self.handle_datagram(&datagram);
                }
                Event::Datagram(Err(err)) => self.fail_all(&err.to_string()),
                Event::Tick => self.scan_timeouts().await,
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

        if self.socket.is_none() {
            let bind_to: SocketAddr = if self.outbound[0].server.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
            };
            match UdpSocket::bind(bind_to).await {
                Ok(socket) => {
                    trace!("udp socket opened on {:?}", socket.local_addr().ok());
                    self.socket = Some(socket);
                }
                Err(err) => {
                    self.fail_all(&err.to_string());
                    return;
                }
            }
        }
        self.flush().await;
    }

    async fn flush(&mut self) {
        while let Some(mut task) = self.outbound.pop_front() {
            let socket = match &self.socket {
                Some(socket) => socket,
                None => return,
            };
            match socket.send_to(&task.payload, task.server).await {
                Ok(_) => {
                    trace!("sent datagram for request {}", task.id);
                    task.sent_at = Some(Instant::now());
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

    fn handle_datagram(&mut self, datagram: &[u8]) {
        let message = match Message::decode(datagram) {
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
                self.maybe_schedule_close();
            }
            None => {
                report(&self.sink, &ResolverError::ResponseIdUnexpected(message.id));
            }
        }
    }

    /// Retransmit timed-out tasks with retries left, reject the rest.
    async fn scan_timeouts(&mut self) {
        let timeout = Duration::from_millis(self.options.timeout_in_ms);
        let now = Instant::now();
        let expired: Vec<u16> = self
            .inbound
            .iter()
            .filter(|(_, task)| task.timed_out(now, timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            let mut task = match self.inbound.remove(&id) {
                Some(task) => task,
                None => continue,
            };
            if task.retries_left > 0 {
                task.retries_left -= 1;
                debug!("request {} timed out, {} retries left", id, task.retries_left);
                self.outbound.push_back(task);
            } else {
                debug!("request {} went unanswered", id);
                task.finish(Err(ResolverError::RequestUnanswered));
            }
        }
        if !self.outbound.is_empty() {
            self.flush().await;
        }
        self.maybe_schedule_close();
    }

    /// Reject everything queued or in flight after a socket-level fault.
    fn fail_all(&mut self, reason: &str) {
        report(&self.sink, &ResolverError::Other(reason.to_owned()));
        for task in self.outbound.drain(..) {
            task.finish(Err(ResolverError::Other(reason.to_owned())));
        }
        for (_, task) in self.inbound.drain() {
            task.finish(Err(ResolverError::Other(reason.to_owned())));
        }
        self.socket = None;
        self.close_at = None;
    }

    fn maybe_schedule_close(&mut self) {
        if self.socket.is_some() && self.outbound.is_empty() && self.inbound.is_empty() {
            self.close_at = Some(Instant::now() + Duration::from_millis(self.options.keep_open_for_ms));
        } else {
            self.close_at = None;
        }
    }

    fn close_if_idle(&mut self) {
        self.close_at = None;
        if self.outbound.is_empty() && self.inbound.is_empty() {
            trace!("closing idle udp socket");
            self.socket = None;
        }
    }
}
