use std::net::SocketAddr;
use std::rc::Rc;

use futures::channel::oneshot;
use log::warn;
use tokio::time::Instant;

use super::ResolverError;
use crate::dns::Message;

/// Receives errors that have no task to fail: unmatched response ids and
/// socket-level faults. When absent they are logged and dropped.
pub type ErrorSink = Rc<dyn Fn(&ResolverError)>;

/// One outstanding request on a transport.
///
/// Born when the caller submits a message, tracked by id once on the wire,
/// destroyed on completion or rejection. The completion channel is the only
/// route back to the caller; the transport never holds the caller. The
/// timestamp is stamped on transmission and drives the timeout scan; a TCP
/// task re-enqueued across a reconnect keeps its original stamp so its total
/// lifetime stays bounded.
pub struct Task {
    pub id: u16,
    pub opcode: u8,
    pub payload: Vec<u8>,
    pub server: SocketAddr,
    pub retries_left: u32,
    pub sent_at: Option<Instant>,
    pub done: oneshot::Sender<Result<Message, ResolverError>>,
}

impl Task {
    /// Complete the task; a dropped caller is tolerated.
    pub fn finish(self, result: Result<Message, ResolverError>) {
        let _ = self.done.send(result);
    }

    pub fn timed_out(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.sent_at
            .map_or(false, |sent| now.duration_since(sent) >= timeout)
    }
}

/// Check a decoded response against the request it claims to answer.
pub fn validate_response(request_opcode: u8, response: Message) -> Result<Message, ResolverError> {
    if !response.flags.qr || response.opcode() != request_opcode {
        return Err(ResolverError::ResponseNotExpected);
    }
    if response.flags.rcode != 0 {
        return Err(ResolverError::ResponseBad(response.flags.rcode));
    }
    Ok(response)
}

/// Report an ownerless error to the sink, or log it.
pub fn report(sink: &Option<ErrorSink>, error: &ResolverError) {
    match sink {
        Some(sink) => sink(error),
        None => warn!("unhandled resolver error: {}", error),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dns::{class, opcode, rtype, Name};

    #[test]
    fn response_must_flip_qr() {
        let request = Message::query(5, Name::from_dotted("a."), rtype::A, class::IN);
        assert!(matches!(
            validate_response(opcode::QUERY, request),
            Err(ResolverError::ResponseNotExpected)
        ));
    }

    #[test]
    fn response_opcode_must_match() {
        let mut response = Message::query(5, Name::from_dotted("a."), rtype::A, class::IN);
        response.flags.qr = true;
        response.flags.opcode = opcode::UPDATE;
        assert!(matches!(
            validate_response(opcode::QUERY, response),
            Err(ResolverError::ResponseNotExpected)
        ));
    }

    #[test]
    fn clean_response_passes() {
        let mut response = Message::query(5, Name::from_dotted("a."), rtype::A, class::IN);
        response.flags.qr = true;
        assert!(validate_response(opcode::QUERY, response).is_ok());
    }
}
