//! Response assembly and request/response correlation.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ClientError, ProtocolViolation};
use crate::message::{Headers, Response, ResponseHead};

#[derive(Debug, Default)]
enum AssemblyState {
    #[default]
    Ready,
    AccumulatingBody {
        head: ResponseHead,
        body: BytesMut,
    },
    Complete,
}

/// Builds one response out of the head and body events of a single stream.
///
/// Ready -> AccumulatingBody -> Complete. Interim 1xx heads are skipped.
/// Trailers that end the stream are folded into the response headers. Any
/// other transition is a [`ProtocolViolation`].
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    state: AssemblyState,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, AssemblyState::Complete)
    }

    pub fn on_head(
        &mut self,
        head: ResponseHead,
        end_stream: bool,
    ) -> Result<Option<Response>, ProtocolViolation> {
        match std::mem::take(&mut self.state) {
            AssemblyState::Ready => {
                if (100..200).contains(&head.status) {
                    if end_stream {
                        self.state = AssemblyState::Complete;
                        return Err(ProtocolViolation::new(
                            "informational response ended the stream",
                        ));
                    }
                    debug!(status = head.status, "Skipping informational response");
                    return Ok(None);
                }
                if end_stream {
                    self.state = AssemblyState::Complete;
                    return Ok(Some(Response::new(head, Bytes::new())));
                }
                self.state = AssemblyState::AccumulatingBody {
                    head,
                    body: BytesMut::new(),
                };
                Ok(None)
            }
            state @ AssemblyState::AccumulatingBody { .. } => {
                self.state = state;
                Err(ProtocolViolation::new("second response head on one stream"))
            }
            AssemblyState::Complete => {
                self.state = AssemblyState::Complete;
                Err(ProtocolViolation::new("header block after end of stream"))
            }
        }
    }

    /// Whether the next header block on this stream can only be trailers.
    pub fn expects_trailers(&self) -> bool {
        matches!(self.state, AssemblyState::AccumulatingBody { .. })
    }

    pub fn on_trailers(
        &mut self,
        trailers: Headers,
        end_stream: bool,
    ) -> Result<Option<Response>, ProtocolViolation> {
        match std::mem::take(&mut self.state) {
            AssemblyState::AccumulatingBody { mut head, body } => {
                self.state = AssemblyState::Complete;
                if !end_stream {
                    return Err(ProtocolViolation::new("trailers did not end the stream"));
                }
                for (name, value) in trailers.iter() {
                    head.headers.add(name, value);
                }
                Ok(Some(Response::new(head, body.freeze())))
            }
            state => {
                self.state = state;
                Err(ProtocolViolation::new("trailers outside of a response body"))
            }
        }
    }

    pub fn on_data(
        &mut self,
        data: Bytes,
        end_stream: bool,
    ) -> Result<Option<Response>, ProtocolViolation> {
        match std::mem::take(&mut self.state) {
            AssemblyState::AccumulatingBody { head, mut body } => {
                body.extend_from_slice(&data);
                if end_stream {
                    self.state = AssemblyState::Complete;
                    return Ok(Some(Response::new(head, body.freeze())));
                }
                self.state = AssemblyState::AccumulatingBody { head, body };
                Ok(None)
            }
            AssemblyState::Ready => {
                self.state = AssemblyState::Complete;
                Err(ProtocolViolation::new("DATA before response headers"))
            }
            AssemblyState::Complete => {
                self.state = AssemblyState::Complete;
                Err(ProtocolViolation::new("DATA after end of stream"))
            }
        }
    }
}

pub type ExchangeResult = Result<Response, ClientError>;

/// An in-flight request waiting for its outcome.
#[derive(Debug)]
pub struct PendingExchange {
    pub stream_id: u32,
    tx: oneshot::Sender<ExchangeResult>,
}

impl PendingExchange {
    pub fn new(stream_id: u32, tx: oneshot::Sender<ExchangeResult>) -> Self {
        Self { stream_id, tx }
    }

    fn resolve(self, result: ExchangeResult) {
        // The caller may have stopped waiting
        let _ = self.tx.send(result);
    }
}

/// FIFO pairing of completed streams with pending exchanges.
///
/// Every completion resolves the oldest pending exchange, whichever stream
/// it came from. This is only correct while the peer completes streams in
/// submission order.
#[derive(Debug, Default)]
pub struct CorrelationQueue {
    pending: VecDeque<PendingExchange>,
}

impl CorrelationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, exchange: PendingExchange) {
        self.pending.push_back(exchange);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolves the oldest pending exchange with a completion from
    /// `stream_id`. Returns `false` when nothing was pending.
    pub fn complete(&mut self, stream_id: u32, result: ExchangeResult) -> bool {
        let Some(exchange) = self.pending.pop_front() else {
            warn!(stream_id, "Completion with no pending exchange, dropping");
            return false;
        };
        if exchange.stream_id != stream_id {
            debug!(
                completed_stream = stream_id,
                paired_stream = exchange.stream_id,
                "Stream completed out of submission order"
            );
        }
        exchange.resolve(result);
        true
    }

    /// Resolves the pending exchange for `stream_id` directly, used when a
    /// request could not be written at all.
    pub fn fail_stream(&mut self, stream_id: u32, error: ClientError) {
        if let Some(pos) = self.pending.iter().position(|e| e.stream_id == stream_id) {
            if let Some(exchange) = self.pending.remove(pos) {
                exchange.resolve(Err(error));
            }
        }
    }

    /// Fails every pending exchange with `ConnectionClosed`.
    pub fn fail_all(&mut self) -> usize {
        let count = self.pending.len();
        for exchange in self.pending.drain(..) {
            exchange.resolve(Err(ClientError::ConnectionClosed));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Version;

    fn pending(stream_id: u32) -> (PendingExchange, oneshot::Receiver<ExchangeResult>) {
        let (tx, rx) = oneshot::channel();
        (PendingExchange::new(stream_id, tx), rx)
    }

    fn head(status: u16) -> ResponseHead {
        ResponseHead {
            status,
            version: Version::HTTP_2,
            headers: Headers::new(),
        }
    }

    #[test]
    fn head_with_end_stream_completes_with_empty_body() {
        let mut assembler = ResponseAssembler::new();
        let response = assembler.on_head(head(200), true).unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert!(assembler.is_complete());
    }

    #[test]
    fn body_accumulates_across_data_frames() {
        let mut assembler = ResponseAssembler::new();
        assert!(assembler.on_head(head(400), false).unwrap().is_none());
        assert!(assembler
            .on_data(Bytes::from_static(b"{\"reason\":"), false)
            .unwrap()
            .is_none());
        let response = assembler
            .on_data(Bytes::from_static(b"\"BadDeviceToken\"}"), true)
            .unwrap()
            .unwrap();
        assert_eq!(&response.body[..], b"{\"reason\":\"BadDeviceToken\"}");
    }

    #[test]
    fn informational_heads_are_skipped() {
        let mut assembler = ResponseAssembler::new();
        assert!(assembler.on_head(head(100), false).unwrap().is_none());
        assert!(!assembler.is_complete());
        let response = assembler.on_head(head(204), true).unwrap().unwrap();
        assert_eq!(response.status, 204);
    }

    #[test]
    fn trailers_are_merged() {
        let mut assembler = ResponseAssembler::new();
        assembler.on_head(head(200), false).unwrap();
        assembler.on_data(Bytes::from_static(b"ok"), false).unwrap();

        assert!(assembler.expects_trailers());
        let trailers: Headers = [("x-checksum", "abc")].into_iter().collect();
        let response = assembler.on_trailers(trailers, true).unwrap().unwrap();
        assert_eq!(response.header("x-checksum"), Some("abc"));
        assert_eq!(&response.body[..], b"ok");
    }

    #[test]
    fn invalid_transitions_are_violations() {
        let mut assembler = ResponseAssembler::new();
        assert!(assembler.on_data(Bytes::new(), true).is_err());

        let mut assembler = ResponseAssembler::new();
        assembler.on_head(head(200), true).unwrap();
        assert!(assembler.on_data(Bytes::new(), true).is_err());
        assert!(assembler.on_head(head(200), true).is_err());
    }

    #[tokio::test]
    async fn queue_pairs_in_fifo_order() {
        let mut queue = CorrelationQueue::new();
        let (first, first_rx) = pending(1);
        let (second, second_rx) = pending(3);
        queue.push(first);
        queue.push(second);

        // stream 3 finishes first and is handed to the oldest exchange
        assert!(queue.complete(3, Ok(Response::new(head(201), Bytes::new()))));
        assert!(queue.complete(1, Ok(Response::new(head(202), Bytes::new()))));

        assert_eq!(first_rx.await.unwrap().unwrap().status, 201);
        assert_eq!(second_rx.await.unwrap().unwrap().status, 202);
        assert!(!queue.complete(5, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn fail_all_drains_queue() {
        let mut queue = CorrelationQueue::new();
        let (a, a_rx) = pending(1);
        let (b, b_rx) = pending(3);
        queue.push(a);
        queue.push(b);

        assert_eq!(queue.fail_all(), 2);
        assert!(queue.is_empty());
        assert!(matches!(a_rx.await.unwrap(), Err(ClientError::ConnectionClosed)));
        assert!(matches!(b_rx.await.unwrap(), Err(ClientError::ConnectionClosed)));
    }
}
