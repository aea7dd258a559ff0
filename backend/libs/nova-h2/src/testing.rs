//! In-process HTTP/2 server for tests, speaking cleartext prior-knowledge h2.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::frame::{Frame, Setting, DEFAULT_MAX_FRAME_SIZE, PREFACE};
use crate::header_block::response_block;
use crate::hpack::{Decoder, Encoder};
use crate::message::{Headers, RequestHead};

fn invalid(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

/// A complete request as seen by the server.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub stream_id: u32,
    pub head: RequestHead,
    pub body: Bytes,
}

/// Server side of one accepted connection.
pub struct MockServerConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    encoder: Encoder,
    decoder: Decoder,
    partial: HashMap<u32, (RequestHead, BytesMut)>,
    header_fragment: Option<(u32, bool, BytesMut)>,
}

impl MockServerConnection {
    /// Accepts one client and completes the server side of the handshake.
    pub async fn accept(listener: &TcpListener) -> io::Result<Self> {
        let (stream, _) = listener.accept().await?;
        Self::handshake(stream).await
    }

    pub async fn handshake(mut stream: TcpStream) -> io::Result<Self> {
        let mut preface = [0u8; 24];
        stream.read_exact(&mut preface).await?;
        if preface != PREFACE {
            return Err(invalid("bad client preface"));
        }

        let mut out = BytesMut::new();
        Frame::Settings {
            ack: false,
            settings: vec![Setting::MaxConcurrentStreams(100)],
        }
        .encode(&mut out);
        stream.write_all(&out).await?;

        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(16 * 1024),
            encoder: Encoder::new(),
            decoder: Decoder::default(),
            partial: HashMap::new(),
            header_fragment: None,
        })
    }

    async fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            if let Some(frame) =
                Frame::decode(&mut self.read_buf, 1 << 20).map_err(invalid)?
            {
                return Ok(Some(frame));
            }
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Returns the next request whose stream has ended, or `None` once the
    /// client goes away.
    pub async fn next_request(&mut self) -> io::Result<Option<ReceivedRequest>> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                return Ok(None);
            };
            debug!(frame = ?frame, "Mock server received frame");

            match frame {
                Frame::Headers {
                    stream_id,
                    fragment,
                    end_stream,
                    end_headers,
                } => {
                    if !end_headers {
                        let buf = BytesMut::from(&fragment[..]);
                        self.header_fragment = Some((stream_id, end_stream, buf));
                        continue;
                    }
                    if let Some(done) = self.on_head(stream_id, &fragment, end_stream)? {
                        return Ok(Some(done));
                    }
                }
                Frame::Continuation {
                    fragment,
                    end_headers,
                    ..
                } => {
                    let Some((stream_id, end_stream, mut buf)) = self.header_fragment.take()
                    else {
                        return Err(invalid("unexpected CONTINUATION"));
                    };
                    buf.extend_from_slice(&fragment);
                    if !end_headers {
                        self.header_fragment = Some((stream_id, end_stream, buf));
                        continue;
                    }
                    if let Some(done) = self.on_head(stream_id, &buf, end_stream)? {
                        return Ok(Some(done));
                    }
                }
                Frame::Data {
                    stream_id,
                    payload,
                    end_stream,
                    ..
                } => {
                    if let Some((_, body)) = self.partial.get_mut(&stream_id) {
                        body.extend_from_slice(&payload);
                    }
                    if end_stream {
                        if let Some((head, body)) = self.partial.remove(&stream_id) {
                            return Ok(Some(ReceivedRequest {
                                stream_id,
                                head,
                                body: body.freeze(),
                            }));
                        }
                    }
                }
                Frame::Settings { ack: false, .. } => {
                    self.send_frame(Frame::Settings {
                        ack: true,
                        settings: Vec::new(),
                    })
                    .await?;
                }
                Frame::Ping { ack: false, payload } => {
                    self.send_frame(Frame::Ping { ack: true, payload }).await?;
                }
                Frame::GoAway { .. } => return Ok(None),
                _ => {}
            }
        }
    }

    fn on_head(
        &mut self,
        stream_id: u32,
        fragment: &[u8],
        end_stream: bool,
    ) -> io::Result<Option<ReceivedRequest>> {
        let block = self.decoder.decode(fragment).map_err(invalid)?;
        let head = RequestHead::from_header_block(&block).map_err(invalid)?;
        if end_stream {
            return Ok(Some(ReceivedRequest {
                stream_id,
                head,
                body: Bytes::new(),
            }));
        }
        self.partial.insert(stream_id, (head, BytesMut::new()));
        Ok(None)
    }

    /// Writes a complete response on `stream_id`.
    pub async fn respond(
        &mut self,
        stream_id: u32,
        status: u16,
        headers: &Headers,
        body: &[u8],
    ) -> io::Result<()> {
        let block = response_block(status, headers);
        let mut encoded = Vec::new();
        self.encoder.encode(&block, &mut encoded);

        let mut out = BytesMut::new();
        Frame::Headers {
            stream_id,
            fragment: Bytes::from(encoded),
            end_stream: body.is_empty(),
            end_headers: true,
        }
        .encode(&mut out);

        let mut chunks = body.chunks(DEFAULT_MAX_FRAME_SIZE as usize).peekable();
        while let Some(chunk) = chunks.next() {
            Frame::data(stream_id, Bytes::copy_from_slice(chunk), chunks.peek().is_none())
                .encode(&mut out);
        }
        self.stream.write_all(&out).await
    }

    /// Writes an arbitrary frame, e.g. RST_STREAM or GOAWAY.
    pub async fn send_frame(&mut self, frame: Frame) -> io::Result<()> {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        self.stream.write_all(&out).await
    }
}

/// A canned response produced by a [`MockServer`] responder.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

type Responder = dyn Fn(&ReceivedRequest) -> MockResponse + Send + Sync;

/// Accepts connections on a loopback port and answers every request in
/// arrival order using a responder function.
pub struct MockServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(responder: F) -> io::Result<Self>
    where
        F: Fn(&ReceivedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Responder> = Arc::new(responder);

        let log = received.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = log.clone();
                let responder = responder.clone();
                tokio::spawn(async move {
                    let Ok(mut conn) = MockServerConnection::handshake(stream).await else {
                        return;
                    };
                    while let Ok(Some(request)) = conn.next_request().await {
                        let response = responder(&request);
                        log.lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push(request.clone());
                        if conn
                            .respond(
                                request.stream_id,
                                response.status,
                                &response.headers,
                                &response.body,
                            )
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
        });

        Ok(Self {
            addr,
            received,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Requests answered so far, in arrival order.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
