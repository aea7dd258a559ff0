//! Long-lived HTTP/2 client connection.
//!
//! A [`Connection`] is a cheap handle onto a driver task that owns the
//! transport. The driver writes each request as HEADERS, optional
//! CONTINUATION and DATA frames, assembles response frames per stream, and
//! hands every completed response to the oldest pending exchange.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, Scheme};
use crate::error::{ClientError, ConnectError, H2Error};
use crate::exchange::{CorrelationQueue, ExchangeResult, PendingExchange, ResponseAssembler};
use crate::frame::{
    ErrorCode, Frame, Setting, DEFAULT_MAX_FRAME_SIZE, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE,
    PREFACE,
};
use crate::header_block::{request_block, trailers_from_header_block};
use crate::hpack::{Decoder, Encoder};
use crate::message::{Request, Response, ResponseHead};
use crate::tls::{self, ALPN_H2};

const MAX_STREAM_ID: u32 = MAX_WINDOW_SIZE;

enum Command {
    Send {
        request: Request,
        tx: oneshot::Sender<ExchangeResult>,
    },
    Close,
}

struct Shared {
    authority: String,
    scheme: Scheme,
    writable: AtomicBool,
    pending: AtomicUsize,
    closed: watch::Receiver<bool>,
}

/// Handle to one multiplexed connection. Clones share the connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("scheme", &self.shared.scheme)
            .field("authority", &self.shared.authority)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Opens a TCP connection, wraps it in TLS for `https`, and completes
    /// the HTTP/2 preface and SETTINGS exchange.
    pub async fn connect(
        scheme: Scheme,
        host: &str,
        port: u16,
        config: &ClientConfig,
    ) -> Result<Connection, ConnectError> {
        let authority = if port == scheme.default_port() {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };

        let connecting = async {
            let tcp = TcpStream::connect((host, port)).await?;
            tcp.set_nodelay(true)?;

            if !scheme.is_tls() {
                return Connection::handshake(tcp, scheme, authority, config).await;
            }

            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| ConnectError::InvalidServerName(host.to_string()))?;
            let stream = tls::connector(config)?
                .connect(server_name, tcp)
                .await
                .map_err(|e| ConnectError::Tls(e.to_string()))?;
            if stream.get_ref().1.alpn_protocol() != Some(ALPN_H2) {
                return Err(ConnectError::Handshake(
                    "server did not negotiate h2".to_string(),
                ));
            }
            Connection::handshake(stream, scheme, authority, config).await
        };

        let connection = tokio::time::timeout(config.connect_timeout, connecting)
            .await
            .map_err(|_| ConnectError::Timeout(config.connect_timeout))??;

        info!(scheme = %scheme, host = %host, port, "HTTP/2 connection established");
        Ok(connection)
    }

    /// Runs the client side of the HTTP/2 handshake over an established
    /// transport and spawns the driver task.
    pub async fn handshake<T>(
        io: T,
        scheme: Scheme,
        authority: impl Into<String>,
        config: &ClientConfig,
    ) -> Result<Connection, ConnectError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(io);

        let mut out = BytesMut::with_capacity(64);
        out.extend_from_slice(PREFACE);
        Frame::Settings {
            ack: false,
            settings: vec![
                Setting::EnablePush(false),
                Setting::HeaderTableSize(config.header_table_size),
                Setting::InitialWindowSize(config.initial_window_size),
                Setting::MaxFrameSize(config.max_frame_size),
                Setting::MaxHeaderListSize(config.max_header_list_size),
            ],
        }
        .encode(&mut out);
        if config.initial_window_size > DEFAULT_WINDOW_SIZE {
            Frame::WindowUpdate {
                stream_id: 0,
                increment: config.initial_window_size - DEFAULT_WINDOW_SIZE,
            }
            .encode(&mut out);
        }
        writer.write_all(&out).await?;
        writer.flush().await?;

        // The server preface is a SETTINGS frame
        let mut read_buf = BytesMut::with_capacity(16 * 1024);
        let settings = loop {
            match Frame::decode(&mut read_buf, config.max_frame_size)
                .map_err(|e| ConnectError::Handshake(e.to_string()))?
            {
                Some(Frame::Settings {
                    ack: false,
                    settings,
                }) => break settings,
                Some(other) => {
                    return Err(ConnectError::Handshake(format!(
                        "expected SETTINGS, got {other:?}"
                    )))
                }
                None => {
                    if reader.read_buf(&mut read_buf).await? == 0 {
                        return Err(ConnectError::Handshake(
                            "connection closed during handshake".to_string(),
                        ));
                    }
                }
            }
        };

        let (closed_tx, closed_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            authority: authority.into(),
            scheme,
            writable: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
            closed: closed_rx,
        });

        let mut driver = Driver {
            reader,
            writer,
            read_buf,
            commands: commands_rx,
            shared: shared.clone(),
            closed_tx,
            encoder: Encoder::new(),
            decoder: Decoder::new(config.header_table_size as usize),
            queue: CorrelationQueue::new(),
            streams: HashMap::new(),
            deferred: VecDeque::new(),
            next_stream_id: 1,
            peer: PeerSettings::default(),
            local_window: config.initial_window_size,
            local_max_frame_size: config.max_frame_size,
            max_header_list_size: config.max_header_list_size as usize,
            conn_send_window: i64::from(DEFAULT_WINDOW_SIZE),
            conn_recv_unacked: 0,
            header_fragment: None,
            going_away: false,
        };
        driver
            .apply_settings(&settings)
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        driver
            .write_frame(Frame::Settings {
                ack: true,
                settings: Vec::new(),
            })
            .await?;

        tokio::spawn(driver.run());

        Ok(Connection {
            shared,
            commands: commands_tx,
        })
    }

    /// Submits a request and waits for the response paired with it.
    pub async fn send(&self, request: Request) -> Result<Response, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { request, tx })
            .map_err(|_| ClientError::ConnectionClosed)?;

        let mut response = rx.await.map_err(|_| ClientError::ConnectionClosed)??;
        response.connection = Some(self.clone());
        Ok(response)
    }

    /// Fails every pending exchange with `ConnectionClosed` and releases the
    /// transport. Returns once the driver has shut down.
    pub async fn close(&self) {
        self.shared.writable.store(false, Ordering::Release);
        let _ = self.commands.send(Command::Close);
        self.on_close().await;
    }

    /// Resolves once the connection has shut down for any reason.
    pub fn on_close(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed = self.shared.closed.clone();
        async move {
            // An error means the driver is gone, which is closed as well
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }

    /// Whether new requests can be written.
    pub fn is_connected(&self) -> bool {
        self.shared.writable.load(Ordering::Acquire)
    }

    /// Number of requests written and still waiting for a response.
    pub fn pending_exchanges(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn authority(&self) -> &str {
        &self.shared.authority
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerSettings {
    initial_window_size: u32,
    max_frame_size: u32,
    max_concurrent_streams: Option<u32>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            initial_window_size: DEFAULT_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: None,
        }
    }
}

struct StreamState {
    assembler: ResponseAssembler,
    send_window: i64,
    recv_unacked: u32,
    /// Body bytes still blocked on flow control
    outbound: Option<Bytes>,
}

struct HeaderFragment {
    stream_id: u32,
    end_stream: bool,
    buf: BytesMut,
}

enum Exit {
    Closed,
    Eof,
    Io(io::Error),
    Protocol(H2Error),
}

impl From<io::Error> for Exit {
    fn from(err: io::Error) -> Self {
        Exit::Io(err)
    }
}

impl From<H2Error> for Exit {
    fn from(err: H2Error) -> Self {
        Exit::Protocol(err)
    }
}

enum Event {
    Command(Option<Command>),
    Read(io::Result<usize>),
}

struct Driver<T> {
    reader: ReadHalf<T>,
    writer: WriteHalf<T>,
    read_buf: BytesMut,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    closed_tx: watch::Sender<bool>,
    encoder: Encoder,
    decoder: Decoder,
    queue: CorrelationQueue,
    streams: HashMap<u32, StreamState>,
    /// Requests held back so no head is written while another body waits
    deferred: VecDeque<(Request, oneshot::Sender<ExchangeResult>)>,
    next_stream_id: u32,
    peer: PeerSettings,
    local_window: u32,
    local_max_frame_size: u32,
    max_header_list_size: usize,
    conn_send_window: i64,
    conn_recv_unacked: u32,
    header_fragment: Option<HeaderFragment>,
    going_away: bool,
}

impl<T> Driver<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn run(mut self) {
        let exit = loop {
            if let Err(exit) = self.process_buffered().await {
                break exit;
            }
            self.read_buf.reserve(16 * 1024);

            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                read = self.reader.read_buf(&mut self.read_buf) => Event::Read(read),
            };

            let step = match event {
                Event::Command(Some(Command::Send { request, tx })) => {
                    self.submit(request, tx).await
                }
                Event::Command(Some(Command::Close)) | Event::Command(None) => Err(Exit::Closed),
                Event::Read(Ok(0)) => Err(Exit::Eof),
                Event::Read(Ok(_)) => Ok(()),
                Event::Read(Err(e)) => Err(Exit::Io(e)),
            };
            if let Err(exit) = step {
                break exit;
            }
        };

        self.shutdown(exit).await;
    }

    async fn shutdown(&mut self, exit: Exit) {
        self.shared.writable.store(false, Ordering::Release);

        match &exit {
            Exit::Closed => {
                debug!(authority = %self.shared.authority, "Closing connection");
                let _ = self
                    .write_frame(Frame::GoAway {
                        last_stream_id: 0,
                        code: ErrorCode::NoError,
                        debug_data: Bytes::new(),
                    })
                    .await;
            }
            Exit::Eof => info!(authority = %self.shared.authority, "Connection closed by peer"),
            Exit::Io(e) => error!(authority = %self.shared.authority, error = %e, "Connection I/O error"),
            Exit::Protocol(e) => {
                error!(authority = %self.shared.authority, error = %e, "HTTP/2 protocol error");
                let _ = self
                    .write_frame(Frame::GoAway {
                        last_stream_id: 0,
                        code: e.code(),
                        debug_data: Bytes::new(),
                    })
                    .await;
            }
        }

        let failed = self.queue.fail_all();
        self.streams.clear();
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Send { tx, .. } = command {
                let _ = tx.send(Err(ClientError::ConnectionClosed));
            }
        }
        for (_, tx) in self.deferred.drain(..) {
            let _ = tx.send(Err(ClientError::ConnectionClosed));
        }
        if failed > 0 {
            warn!(failed, "Failed pending exchanges on connection close");
        }
        self.sync_pending();

        let _ = self.writer.shutdown().await;
        self.closed_tx.send_replace(true);
    }

    fn sync_pending(&self) {
        self.shared.pending.store(self.queue.len(), Ordering::Release);
    }

    async fn write_frame(&mut self, frame: Frame) -> io::Result<()> {
        let mut out = BytesMut::with_capacity(64);
        frame.encode(&mut out);
        self.writer.write_all(&out).await?;
        self.writer.flush().await
    }

    async fn write_buf(&mut self, out: &[u8]) -> io::Result<()> {
        self.writer.write_all(out).await?;
        self.writer.flush().await
    }

    fn must_defer(&self) -> bool {
        let blocked = self.streams.values().any(|s| s.outbound.is_some());
        let saturated = self
            .peer
            .max_concurrent_streams
            .map_or(false, |max| self.streams.len() >= max as usize);
        blocked || saturated
    }

    async fn submit(
        &mut self,
        request: Request,
        tx: oneshot::Sender<ExchangeResult>,
    ) -> Result<(), Exit> {
        if self.going_away || self.next_stream_id > MAX_STREAM_ID {
            let _ = tx.send(Err(ClientError::ConnectionClosed));
            return Ok(());
        }
        if self.must_defer() {
            debug!(deferred = self.deferred.len() + 1, "Deferring request");
            self.deferred.push_back((request, tx));
            return Ok(());
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let block = request_block(
            &request.method,
            &request.path,
            self.shared.scheme.as_str(),
            &self.shared.authority,
            &request.headers,
        );
        let mut encoded = Vec::with_capacity(block.as_bytes().len());
        self.encoder.encode(&block, &mut encoded);

        let body = request.body.filter(|b| !b.is_empty());
        let mut out = BytesMut::with_capacity(encoded.len() + 64);
        let max_frame = self.peer.max_frame_size as usize;
        let mut chunks = encoded.chunks(max_frame).peekable();
        let first = chunks.next().unwrap_or(&[]);
        Frame::Headers {
            stream_id,
            fragment: Bytes::copy_from_slice(first),
            end_stream: body.is_none(),
            end_headers: chunks.peek().is_none(),
        }
        .encode(&mut out);
        while let Some(chunk) = chunks.next() {
            Frame::Continuation {
                stream_id,
                fragment: Bytes::copy_from_slice(chunk),
                end_headers: chunks.peek().is_none(),
            }
            .encode(&mut out);
        }

        let mut state = StreamState {
            assembler: ResponseAssembler::new(),
            send_window: i64::from(self.peer.initial_window_size),
            recv_unacked: 0,
            outbound: body,
        };
        write_data(
            stream_id,
            &mut state,
            &mut self.conn_send_window,
            max_frame,
            &mut out,
        );

        debug!(
            stream_id,
            method = %request.method,
            path = %request.path,
            blocked = state.outbound.is_some(),
            "Writing request"
        );
        self.streams.insert(stream_id, state);
        self.queue.push(PendingExchange::new(stream_id, tx));
        self.sync_pending();

        if let Err(e) = self.write_buf(&out).await {
            let kind = e.kind();
            self.streams.remove(&stream_id);
            self.queue.fail_stream(stream_id, ClientError::Network(e));
            self.sync_pending();
            return Err(Exit::Io(io::Error::new(kind, "request write failed")));
        }
        Ok(())
    }

    /// Writes DATA held back by flow control, then releases deferred
    /// requests.
    async fn flush_blocked(&mut self) -> Result<(), Exit> {
        let mut ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.outbound.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        let max_frame = self.peer.max_frame_size as usize;
        let mut out = BytesMut::new();
        for id in ids {
            if let Some(state) = self.streams.get_mut(&id) {
                write_data(id, state, &mut self.conn_send_window, max_frame, &mut out);
            }
        }
        if !out.is_empty() {
            self.write_buf(&out).await?;
        }

        while !self.must_defer() && !self.going_away {
            let Some((request, tx)) = self.deferred.pop_front() else {
                break;
            };
            self.submit(request, tx).await?;
        }
        Ok(())
    }

    async fn process_buffered(&mut self) -> Result<(), Exit> {
        while let Some(frame) = Frame::decode(&mut self.read_buf, self.local_max_frame_size)? {
            self.handle_frame(frame).await?;
        }
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), Exit> {
        if let Some(fragment) = &self.header_fragment {
            let continues = matches!(frame, Frame::Continuation { .. })
                && frame.stream_id() == fragment.stream_id;
            if !continues {
                return Err(H2Error::Protocol("expected CONTINUATION").into());
            }
        }

        match frame {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                flow_len,
            } => self.on_data(stream_id, payload, end_stream, flow_len).await,
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                if end_headers {
                    self.on_header_block(stream_id, &fragment, end_stream).await
                } else {
                    self.check_fragment_size(fragment.len())?;
                    self.header_fragment = Some(HeaderFragment {
                        stream_id,
                        end_stream,
                        buf: BytesMut::from(&fragment[..]),
                    });
                    Ok(())
                }
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let Some(mut pending) = self.header_fragment.take() else {
                    return Err(H2Error::Protocol("unexpected CONTINUATION").into());
                };
                self.check_fragment_size(pending.buf.len() + fragment.len())?;
                pending.buf.extend_from_slice(&fragment);
                if end_headers {
                    self.on_header_block(stream_id, &pending.buf, pending.end_stream)
                        .await
                } else {
                    self.header_fragment = Some(pending);
                    Ok(())
                }
            }
            Frame::RstStream { stream_id, code } => {
                if self.streams.remove(&stream_id).is_some() {
                    warn!(stream_id, code = ?code, "Stream reset by peer");
                    self.queue
                        .complete(stream_id, Err(ClientError::StreamReset(code)));
                    self.after_completion().await?;
                }
                Ok(())
            }
            Frame::Settings { ack: true, .. } => {
                debug!("SETTINGS acknowledged");
                Ok(())
            }
            Frame::Settings {
                ack: false,
                settings,
            } => {
                self.apply_settings(&settings)?;
                self.write_frame(Frame::Settings {
                    ack: true,
                    settings: Vec::new(),
                })
                .await?;
                self.flush_blocked().await
            }
            Frame::Ping { ack: false, payload } => {
                self.write_frame(Frame::Ping { ack: true, payload }).await?;
                Ok(())
            }
            Frame::Ping { ack: true, .. } => Ok(()),
            Frame::GoAway {
                last_stream_id,
                code,
                debug_data,
            } => self.on_goaway(last_stream_id, code, &debug_data),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                let increment = i64::from(increment);
                if stream_id == 0 {
                    self.conn_send_window += increment;
                    if self.conn_send_window > i64::from(MAX_WINDOW_SIZE) {
                        return Err(H2Error::FlowControl.into());
                    }
                } else if let Some(state) = self.streams.get_mut(&stream_id) {
                    state.send_window += increment;
                    if state.send_window > i64::from(MAX_WINDOW_SIZE) {
                        return Err(H2Error::FlowControl.into());
                    }
                }
                self.flush_blocked().await
            }
            Frame::PushPromise { .. } => Err(H2Error::Protocol("PUSH_PROMISE with push disabled").into()),
            Frame::Priority { .. } | Frame::Unknown { .. } => Ok(()),
        }
    }

    fn check_fragment_size(&self, len: usize) -> Result<(), H2Error> {
        if len > self.max_header_list_size {
            return Err(H2Error::Protocol("header block exceeds the header list limit"));
        }
        Ok(())
    }

    fn apply_settings(&mut self, settings: &[Setting]) -> Result<(), H2Error> {
        for setting in settings {
            match *setting {
                Setting::InitialWindowSize(size) => {
                    let delta = i64::from(size) - i64::from(self.peer.initial_window_size);
                    for state in self.streams.values_mut() {
                        state.send_window += delta;
                        if state.send_window > i64::from(MAX_WINDOW_SIZE) {
                            return Err(H2Error::FlowControl);
                        }
                    }
                    self.peer.initial_window_size = size;
                }
                Setting::MaxFrameSize(size) => self.peer.max_frame_size = size,
                Setting::MaxConcurrentStreams(max) => self.peer.max_concurrent_streams = Some(max),
                Setting::HeaderTableSize(_)
                | Setting::EnablePush(_)
                | Setting::MaxHeaderListSize(_)
                | Setting::Unknown(..) => {}
            }
        }
        debug!(peer = ?self.peer, "Applied peer SETTINGS");
        Ok(())
    }

    async fn on_data(
        &mut self,
        stream_id: u32,
        payload: Bytes,
        end_stream: bool,
        flow_len: u32,
    ) -> Result<(), Exit> {
        let threshold = self.local_window / 2;

        self.conn_recv_unacked += flow_len;
        if self.conn_recv_unacked > 0 && self.conn_recv_unacked >= threshold {
            let increment = std::mem::take(&mut self.conn_recv_unacked);
            self.write_frame(Frame::WindowUpdate {
                stream_id: 0,
                increment,
            })
            .await?;
        }

        let Some(state) = self.streams.get_mut(&stream_id) else {
            debug!(stream_id, "DATA for unknown stream, ignoring");
            return Ok(());
        };
        let result = state.assembler.on_data(payload, end_stream);

        state.recv_unacked += flow_len;
        let stream_update = if !end_stream && state.recv_unacked > 0 && state.recv_unacked >= threshold {
            Some(std::mem::take(&mut state.recv_unacked))
        } else {
            None
        };
        if let Some(increment) = stream_update {
            self.write_frame(Frame::WindowUpdate {
                stream_id,
                increment,
            })
            .await?;
        }

        self.on_assembly(stream_id, result.map_err(ClientError::from))
            .await
    }

    async fn on_header_block(
        &mut self,
        stream_id: u32,
        fragment: &[u8],
        end_stream: bool,
    ) -> Result<(), Exit> {
        // Always decode so the HPACK table stays in sync
        let block = self.decoder.decode(fragment)?;
        if block.list_size() > self.max_header_list_size {
            return Err(H2Error::Protocol("header list exceeds the header list limit").into());
        }

        let Some(state) = self.streams.get_mut(&stream_id) else {
            debug!(stream_id, "HEADERS for unknown stream, ignoring");
            return Ok(());
        };

        let result = if state.assembler.expects_trailers() {
            trailers_from_header_block(&block)
                .and_then(|trailers| state.assembler.on_trailers(trailers, end_stream))
        } else {
            ResponseHead::from_header_block(&block)
                .and_then(|head| state.assembler.on_head(head, end_stream))
        };
        self.on_assembly(stream_id, result.map_err(ClientError::from))
            .await
    }

    async fn on_assembly(
        &mut self,
        stream_id: u32,
        result: Result<Option<Response>, ClientError>,
    ) -> Result<(), Exit> {
        match result {
            Ok(None) => Ok(()),
            Ok(Some(response)) => {
                debug!(stream_id, status = response.status, "Response complete");
                self.streams.remove(&stream_id);
                self.queue.complete(stream_id, Ok(response));
                self.after_completion().await
            }
            Err(e) => {
                warn!(stream_id, error = %e, "Malformed response, resetting stream");
                self.streams.remove(&stream_id);
                self.queue.complete(stream_id, Err(e));
                self.write_frame(Frame::RstStream {
                    stream_id,
                    code: ErrorCode::ProtocolError,
                })
                .await?;
                self.after_completion().await
            }
        }
    }

    async fn after_completion(&mut self) -> Result<(), Exit> {
        self.sync_pending();
        if self.going_away && self.streams.is_empty() {
            return Err(Exit::Closed);
        }
        self.flush_blocked().await
    }

    fn on_goaway(&mut self, last_stream_id: u32, code: ErrorCode, debug_data: &[u8]) -> Result<(), Exit> {
        warn!(
            authority = %self.shared.authority,
            last_stream_id,
            code = ?code,
            debug = %String::from_utf8_lossy(debug_data),
            "Received GOAWAY"
        );
        self.going_away = true;
        self.shared.writable.store(false, Ordering::Release);

        let unprocessed: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|id| *id > last_stream_id)
            .collect();
        for id in unprocessed {
            self.streams.remove(&id);
            self.queue.fail_stream(id, ClientError::ConnectionClosed);
        }
        for (_, tx) in self.deferred.drain(..) {
            let _ = tx.send(Err(ClientError::ConnectionClosed));
        }
        self.sync_pending();

        if self.streams.is_empty() {
            return Err(Exit::Closed);
        }
        Ok(())
    }
}

/// Moves as much of the blocked body into DATA frames as both windows allow.
fn write_data(
    stream_id: u32,
    state: &mut StreamState,
    conn_window: &mut i64,
    max_frame: usize,
    out: &mut BytesMut,
) {
    let Some(mut remaining) = state.outbound.take() else {
        return;
    };
    while !remaining.is_empty() {
        let window = (*conn_window).min(state.send_window);
        if window <= 0 {
            break;
        }
        let len = remaining.len().min(window as usize).min(max_frame);
        let chunk = remaining.split_to(len);
        *conn_window -= len as i64;
        state.send_window -= len as i64;
        Frame::data(stream_id, chunk, remaining.is_empty()).encode(out);
    }
    if !remaining.is_empty() {
        state.outbound = Some(remaining);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::message::Headers;
    use crate::method::Method;
    use crate::testing::MockServerConnection;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, MockServerConnection) {
        pair_with(ClientConfig::default()).await
    }

    async fn pair_with(config: ClientConfig) -> (Connection, MockServerConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move { MockServerConnection::accept(&listener).await });
        let client = Connection::connect(Scheme::Http, "127.0.0.1", port, &config)
            .await
            .unwrap();
        (client, server.await.unwrap().unwrap())
    }

    async fn wait_for_pending(client: &Connection, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.pending_exchanges() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn post(path: &str) -> Request {
        Request::new(Method::Post, path)
            .header("content-type", "application/json")
            .body(Bytes::from_static(b"{}"))
    }

    #[tokio::test]
    async fn in_order_completions_pair_with_their_requests() {
        let (client, mut server) = pair().await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/first")).await }
        });
        let req1 = server.next_request().await.unwrap().unwrap();
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/second")).await }
        });
        let req2 = server.next_request().await.unwrap().unwrap();

        assert_eq!(req1.head.path, "/first");
        assert_eq!(&req1.body[..], b"{}");
        assert_eq!(req2.head.path, "/second");

        server.respond(req1.stream_id, 200, &Headers::new(), b"one").await.unwrap();
        server.respond(req2.stream_id, 201, &Headers::new(), b"two").await.unwrap();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!((first.status, &first.body[..]), (200, &b"one"[..]));
        assert_eq!((second.status, &second.body[..]), (201, &b"two"[..]));
        assert!(first.connection().is_some());
        assert_eq!(client.pending_exchanges(), 0);
    }

    #[tokio::test]
    async fn out_of_order_completions_pair_by_arrival() {
        let (client, mut server) = pair().await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/first")).await }
        });
        let req1 = server.next_request().await.unwrap().unwrap();
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/second")).await }
        });
        let req2 = server.next_request().await.unwrap().unwrap();

        // answer the second stream first
        server.respond(req2.stream_id, 202, &Headers::new(), b"for-second").await.unwrap();
        server.respond(req1.stream_id, 200, &Headers::new(), b"for-first").await.unwrap();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(&first.body[..], b"for-second");
        assert_eq!(&second.body[..], b"for-first");
    }

    #[tokio::test]
    async fn close_fails_every_pending_exchange() {
        let (client, mut server) = pair().await;

        let sends: Vec<_> = (0..2)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.send(post(&format!("/{i}"))).await })
            })
            .collect();
        server.next_request().await.unwrap().unwrap();
        server.next_request().await.unwrap().unwrap();
        wait_for_pending(&client, 2).await;

        client.close().await;

        for send in sends {
            assert!(matches!(send.await.unwrap(), Err(ClientError::ConnectionClosed)));
        }
        assert!(!client.is_connected());
        assert!(matches!(
            client.send(post("/late")).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn peer_disconnect_fails_pending_and_signals_close() {
        let (client, mut server) = pair().await;

        let send = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/x")).await }
        });
        server.next_request().await.unwrap().unwrap();
        drop(server);

        assert!(matches!(send.await.unwrap(), Err(ClientError::ConnectionClosed)));
        tokio::time::timeout(Duration::from_secs(5), client.on_close())
            .await
            .unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn stream_reset_fails_the_exchange() {
        let (client, mut server) = pair().await;

        let send = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/x")).await }
        });
        let req = server.next_request().await.unwrap().unwrap();
        server
            .send_frame(Frame::RstStream {
                stream_id: req.stream_id,
                code: ErrorCode::RefusedStream,
            })
            .await
            .unwrap();

        assert!(matches!(
            send.await.unwrap(),
            Err(ClientError::StreamReset(ErrorCode::RefusedStream))
        ));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn request_pseudo_headers_come_first() {
        let (client, mut server) = pair().await;

        let send = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .send(
                        Request::new(Method::Get, "/status")
                            .header("X-Request-Id", "1")
                            .header("x-request-id", "2"),
                    )
                    .await
            }
        });
        let req = server.next_request().await.unwrap().unwrap();
        assert_eq!(req.head.method, Method::Get);
        assert_eq!(req.head.scheme.as_deref(), Some("http"));
        assert!(req.head.authority.as_deref().unwrap().starts_with("127.0.0.1:"));
        assert_eq!(
            req.head.headers.get_all("x-request-id").collect::<Vec<_>>(),
            ["1", "2"]
        );

        server.respond(req.stream_id, 204, &Headers::new(), b"").await.unwrap();
        let response = send.await.unwrap().unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn oversized_continuation_closes_the_connection() {
        let (client, mut server) =
            pair_with(ClientConfig::default().with_max_header_list_size(1024)).await;

        let send = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/x")).await }
        });
        let req = server.next_request().await.unwrap().unwrap();

        server
            .send_frame(Frame::Headers {
                stream_id: req.stream_id,
                fragment: Bytes::from(vec![0u8; 600]),
                end_stream: false,
                end_headers: false,
            })
            .await
            .unwrap();
        for _ in 0..4 {
            // the client may already have hung up
            let _ = server
                .send_frame(Frame::Continuation {
                    stream_id: req.stream_id,
                    fragment: Bytes::from(vec![0u8; 600]),
                    end_headers: false,
                })
                .await;
        }

        assert!(matches!(send.await.unwrap(), Err(ClientError::ConnectionClosed)));
        tokio::time::timeout(Duration::from_secs(5), client.on_close())
            .await
            .unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn large_response_headers_within_limit_are_accepted() {
        let (client, mut server) = pair().await;

        let send = tokio::spawn({
            let client = client.clone();
            async move { client.send(post("/x")).await }
        });
        let req = server.next_request().await.unwrap().unwrap();
        let mut headers = Headers::new();
        headers.add("x-large", "v".repeat(4000));
        server.respond(req.stream_id, 200, &headers, b"").await.unwrap();

        let response = send.await.unwrap().unwrap();
        assert_eq!(response.header("x-large").map(str::len), Some(4000));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result =
            Connection::connect(Scheme::Http, "127.0.0.1", port, &ClientConfig::default()).await;
        assert!(matches!(result, Err(ConnectError::Io(_))));
    }
}
