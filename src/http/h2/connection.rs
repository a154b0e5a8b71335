//! HTTP/2 connection multiplexer
//!
//! # Architecture
//!
//! ```text
//!   send_request ──┐                      ┌── reader task ◀── socket
//!   send_request ──┼─▶ Mutex<ConnState> ◀─┤   (frames, HPACK decoder)
//!   ping / close ──┘         │            │
//!                            ▼            │
//!                    mpsc<Outbound> ──▶ writer task ──▶ socket
//! ```
//!
//! All connection state lives in [`ConnState`] behind one mutex that is
//! never held across an await. Frames are encoded whole and queued to the
//! writer task, which is the only owner of the write half; a HEADERS frame
//! and its CONTINUATION frames are queued as one unit so nothing can
//! interleave with them. Stream id allocation, HPACK encoding and queueing
//! of the header block happen in a single critical section, which keeps
//! stream ids strictly increasing on the wire and the encoder's table in
//! step with the peer's decoder.
//!
//! Callers suspend on one [`Notify`] whenever they lack send credit or a
//! concurrency slot; it is signalled on WINDOW_UPDATE, SETTINGS, stream
//! completion and connection failure.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::frames::*;
use super::settings::Settings;
use super::stream::{H2Stream, StreamId};
use super::{CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE, MAX_STREAM_ID, MAX_WINDOW_SIZE};
use crate::http::buffer::BufferPool;
use crate::http::hpack::{Decoder, Encoder, HeaderField, DEFAULT_MAX_HEADER_LIST_BYTES};
use crate::http::headers::validate_field;
use crate::http::message::{HttpRequest, HttpResponse};
use crate::http::Error as HttpError;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Upper bound on the encoder table, whatever the peer allows
const MAX_ENCODER_TABLE_SIZE: u32 = 64 * 1024;

/// Default cap on a buffered response body
pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Connection-specific fields that HTTP/2 forbids
const CONNECTION_HEADERS: [&str; 6] = [
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// HTTP/2 connection configuration
#[derive(Debug, Clone)]
pub struct H2Config {
    /// SETTINGS advertised in the preface
    pub settings: Settings,
    /// Connection-level receive window
    pub connection_window: u32,
    /// Cap on decoded header bytes per header block
    pub max_header_list_bytes: usize,
    /// How long the peer has to acknowledge our SETTINGS
    pub settings_timeout: Duration,
    /// Cap on the response body buffered per stream
    ///
    /// Receive credit is granted as DATA arrives, so this bounds what a
    /// peer can make us hold. A stream crossing it is reset with CANCEL.
    pub max_response_body_bytes: usize,
}

impl Default for H2Config {
    fn default() -> Self {
        let mut settings = Settings::client_defaults();
        settings.max_header_list_size = Some(DEFAULT_MAX_HEADER_LIST_BYTES as u32);
        H2Config {
            settings,
            connection_window: 1024 * 1024,
            max_header_list_bytes: DEFAULT_MAX_HEADER_LIST_BYTES,
            settings_timeout: Duration::from_secs(10),
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }
}

impl H2Config {
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn connection_window(mut self, size: u32) -> Self {
        self.connection_window = size;
        self
    }

    pub fn max_header_list_bytes(mut self, limit: usize) -> Self {
        self.max_header_list_bytes = limit;
        self.settings.max_header_list_size = Some(limit.min(u32::MAX as usize) as u32);
        self
    }

    pub fn settings_timeout(mut self, timeout: Duration) -> Self {
        self.settings_timeout = timeout;
        self
    }

    pub fn max_response_body_bytes(mut self, limit: usize) -> Self {
        self.max_response_body_bytes = limit;
        self
    }

    /// Check the values before they are advertised
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.settings.enable_push == Some(true) {
            return Err(Error::InvalidSettings(
                "server push is not supported".to_string(),
            ));
        }
        if self.connection_window < DEFAULT_INITIAL_WINDOW_SIZE
            || self.connection_window > MAX_WINDOW_SIZE
        {
            return Err(Error::InvalidSettings(format!(
                "connection window {} outside {}..=2^31-1",
                self.connection_window, DEFAULT_INITIAL_WINDOW_SIZE
            )));
        }
        Ok(())
    }
}

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

struct ConnState {
    streams: HashMap<StreamId, H2Stream>,
    next_stream_id: StreamId,
    flow: FlowControl,
    local_settings: Settings,
    peer_settings: Settings,
    settings_acked: bool,
    encoder: Encoder,
    /// GOAWAY received from the peer
    goaway: Option<(StreamId, ErrorCode)>,
    /// GOAWAY sent by us
    closing: bool,
    /// Fatal connection error
    error: Option<(ErrorCode, String)>,
    pings: HashMap<[u8; 8], oneshot::Sender<()>>,
    next_ping: u64,
    /// Highest stream id the peer promised; all of them were refused
    last_promised_id: StreamId,
    max_body_bytes: usize,
}

impl ConnState {
    fn lost(&self) -> Option<Error> {
        self.error.as_ref().map(|(code, reason)| Error::ConnectionLost {
            code: *code,
            reason: reason.clone(),
        })
    }

    /// Whether a new stream may be opened at all
    fn check_open(&self) -> Result<()> {
        if let Some(err) = self.lost() {
            return Err(err);
        }
        if let Some((last_stream_id, code)) = self.goaway {
            return Err(Error::GoAway {
                last_stream_id,
                code,
            });
        }
        if self.closing {
            return Err(Error::ConnectionClosed);
        }
        if self.next_stream_id > MAX_STREAM_ID {
            return Err(Error::RefusedStream(self.next_stream_id));
        }
        Ok(())
    }

    fn has_stream_slot(&self) -> bool {
        match self.peer_settings.get_max_concurrent_streams() {
            Some(max) => self.streams.len() < max as usize,
            None => true,
        }
    }

    fn peer_max_frame_size(&self) -> usize {
        self.peer_settings.get_max_frame_size() as usize
    }

    /// Streams that were never opened or promised
    ///
    /// Refused pushed streams count as closed: the peer may have sent on
    /// them before our RST_STREAM arrived.
    fn is_idle_stream(&self, id: StreamId) -> bool {
        if id % 2 == 0 {
            id > self.last_promised_id
        } else {
            id >= self.next_stream_id
        }
    }
}

struct Shared {
    state: Mutex<ConnState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, frame: Bytes) {
        let _ = self.outbound.send(Outbound::Frame(frame));
    }

    /// Terminate the connection with a connection error
    fn fail(&self, err: &Error) {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.error.is_some() {
            return;
        }

        let code = err.error_code();
        let reason = err.to_string();
        st.error = Some((code, reason.clone()));

        if !st.closing && !matches!(err, Error::Io(_) | Error::ConnectionClosed) {
            self.send(FrameCodec::encode_goaway_frame(&GoawayFrame::new(
                0,
                code,
                Bytes::from(reason.clone()),
            )));
        }
        let _ = self.outbound.send(Outbound::Shutdown);

        for (_, mut stream) in st.streams.drain() {
            stream.fail(Error::ConnectionLost {
                code,
                reason: reason.clone(),
            });
        }
        st.pings.clear();
        drop(guard);
        self.changed.notify_waiters();
    }
}

/// Remove a stream whose response is complete and resolve its caller
fn finish_stream(shared: &Shared, st: &mut ConnState, id: StreamId) {
    let Some(mut stream) = st.streams.remove(&id) else {
        return;
    };
    if stream.state().can_send() {
        // the response ended while the request body was still being sent
        shared.send(FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(
            id,
            ErrorCode::Cancel,
        )));
    }
    trace!(stream_id = id, "stream complete");
    stream.complete();
    shared.changed.notify_waiters();
}

/// Reset a stream with a stream error
fn reset_stream(shared: &Shared, st: &mut ConnState, id: StreamId, err: Error) {
    let Some(mut stream) = st.streams.remove(&id) else {
        return;
    };
    let code = err.error_code();
    debug!(stream_id = id, code = %code, error = %err, "resetting stream");
    shared.send(FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(id, code)));
    stream.fail(err);
    shared.changed.notify_waiters();
}

/// Queue HEADERS plus CONTINUATION frames as one contiguous unit
fn encode_header_block(
    stream_id: StreamId,
    mut block: Bytes,
    end_stream: bool,
    max_frame_size: usize,
) -> Bytes {
    let mut out = BytesMut::with_capacity(block.len() + 9);
    let first = block.split_to(block.len().min(max_frame_size));
    out.extend_from_slice(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
        stream_id,
        first,
        end_stream,
        block.is_empty(),
    )));

    while !block.is_empty() {
        let fragment = block.split_to(block.len().min(max_frame_size));
        out.extend_from_slice(&FrameCodec::encode_continuation_frame(&ContinuationFrame {
            stream_id,
            header_block: fragment,
            end_headers: block.is_empty(),
        }));
    }
    out.freeze()
}

/// Translate a request into an HTTP/2 header list
fn request_fields(request: &HttpRequest, authority: &str) -> Result<Vec<HeaderField>> {
    request
        .validate()
        .and_then(|()| validate_field("host", authority))
        .map_err(|e| match e {
            HttpError::InvalidHeader(reason) => Error::InvalidHeader(reason),
            other => Error::InvalidHeader(other.to_string()),
        })?;

    let mut fields = Vec::with_capacity(request.headers().len() + 5);
    fields.push(HeaderField::new(":method", request.method().as_str()));
    fields.push(HeaderField::new(
        ":scheme",
        request.scheme().unwrap_or("https").to_string(),
    ));
    fields.push(HeaderField::new(":authority", authority.to_string()));
    fields.push(HeaderField::new(":path", request.target().to_string()));

    for (name, value) in request.headers().iter() {
        let name = name.to_ascii_lowercase();
        if name.is_empty() || name.starts_with(':') {
            return Err(Error::InvalidHeader(format!("invalid field name {:?}", name)));
        }
        if CONNECTION_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if name == "te" && !value.eq_ignore_ascii_case("trailers") {
            continue;
        }
        fields.push(HeaderField::new(name, value.to_string()));
    }

    if !request.body().is_empty() && !request.headers().contains("content-length") {
        fields.push(HeaderField::new(
            "content-length",
            request.body().len().to_string(),
        ));
    }
    Ok(fields)
}

/// Cancels the stream if the request future is dropped or cancelled
struct StreamGuard<'a> {
    shared: &'a Shared,
    id: StreamId,
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.shared.lock();
        let Some(mut stream) = st.streams.remove(&self.id) else {
            return;
        };
        debug!(stream_id = self.id, "cancelling stream");
        if st.error.is_none() {
            self.shared.send(FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(
                self.id,
                ErrorCode::Cancel,
            )));
        }
        stream.fail(Error::Cancel(self.id));
        drop(st);
        self.shared.changed.notify_waiters();
    }
}

/// A multiplexed HTTP/2 client connection
pub struct H2Connection {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl H2Connection {
    /// Send the preface and start the reader and writer tasks
    ///
    /// Requests may be sent right away; peer SETTINGS are applied when they
    /// arrive.
    pub async fn handshake<S>(session: S, config: H2Config) -> Result<H2Connection>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;
        let (read_half, mut write_half) = tokio::io::split(session);

        let mut preface = BytesMut::with_capacity(CONNECTION_PREFACE.len() + 64);
        preface.extend_from_slice(CONNECTION_PREFACE);
        preface.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
            config.settings.clone(),
        )));
        if config.connection_window > DEFAULT_INITIAL_WINDOW_SIZE {
            preface.extend_from_slice(&FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(0, config.connection_window - DEFAULT_INITIAL_WINDOW_SIZE),
            ));
        }
        write_half.write_all(&preface).await?;
        write_half.flush().await?;
        debug!(settings = ?config.settings, "HTTP/2 preface sent");

        let (outbound, rx) = mpsc::unbounded_channel();
        let state = ConnState {
            streams: HashMap::new(),
            next_stream_id: 1,
            flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE, config.connection_window),
            local_settings: config.settings.clone(),
            peer_settings: Settings::new(),
            settings_acked: false,
            encoder: Encoder::default(),
            goaway: None,
            closing: false,
            error: None,
            pings: HashMap::new(),
            next_ping: 0,
            last_promised_id: 0,
            max_body_bytes: config.max_response_body_bytes,
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            outbound,
            changed: Notify::new(),
        });

        tokio::spawn(write_loop(Arc::downgrade(&shared), write_half, rx));
        tokio::spawn(settings_timer(Arc::downgrade(&shared), config.settings_timeout));

        let reader = FrameReader {
            shared: Arc::clone(&shared),
            decoder: Decoder::new(
                config.settings.get_header_table_size() as usize,
                config.max_header_list_bytes,
            ),
            buffers: BufferPool::new(4, 64 * 1024),
            pending: None,
            max_frame_size: config.settings.get_max_frame_size() as usize,
            max_block_len: config.max_header_list_bytes.saturating_mul(4),
            saw_settings: false,
        };
        let reader = tokio::spawn(reader.run(read_half));

        Ok(H2Connection { shared, reader })
    }

    /// Send one request and wait for its response
    ///
    /// The request is abandoned when `cancel` completes or when the returned
    /// future is dropped: the stream is reset with CANCEL, its concurrency
    /// slot is released and the connection keeps serving other streams.
    /// A cancelled request yields [`Error::Cancel`] with the stream id, or
    /// id 0 when no stream had been opened yet.
    pub async fn send_request<C>(
        &self,
        request: &HttpRequest,
        authority: &str,
        cancel: C,
    ) -> Result<HttpResponse>
    where
        C: Future<Output = ()>,
    {
        let fields = request_fields(request, authority)?;
        let body = request.body().clone();
        tokio::pin!(cancel);

        let (id, response) = tokio::select! {
            opened = self.open_stream(&fields, body.is_empty()) => opened?,
            _ = &mut cancel => return Err(Error::Cancel(0)),
        };

        let guard = StreamGuard {
            shared: &self.shared,
            id,
        };
        let result = tokio::select! {
            result = self.exchange(id, body, response) => result,
            _ = &mut cancel => Err(Error::Cancel(id)),
        };
        drop(guard);
        result
    }

    async fn open_stream(
        &self,
        fields: &[HeaderField],
        end_stream: bool,
    ) -> Result<(StreamId, oneshot::Receiver<Result<HttpResponse>>)> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut guard = self.shared.lock();
                let st = &mut *guard;
                st.check_open()?;
                if st.has_stream_slot() {
                    return self.start_stream(st, fields, end_stream);
                }
            }
            trace!("waiting for a stream slot");
            notified.await;
        }
    }

    fn start_stream(
        &self,
        st: &mut ConnState,
        fields: &[HeaderField],
        end_stream: bool,
    ) -> Result<(StreamId, oneshot::Receiver<Result<HttpResponse>>)> {
        let id = st.next_stream_id;
        let (tx, rx) = oneshot::channel();
        let mut stream = H2Stream::new(
            id,
            st.peer_settings.get_initial_window_size(),
            st.local_settings.get_initial_window_size(),
            tx,
        )
        .with_body_limit(st.max_body_bytes);
        stream.send_headers(end_stream)?;
        st.next_stream_id += 2;

        let mut block = BytesMut::new();
        st.encoder.encode(fields, &mut block);
        self.shared.send(encode_header_block(
            id,
            block.freeze(),
            end_stream,
            st.peer_max_frame_size(),
        ));
        st.streams.insert(id, stream);
        debug!(stream_id = id, active_streams = st.streams.len(), "stream opened");
        Ok((id, rx))
    }

    /// Send the request body within the flow-control windows, then wait for
    /// the response
    async fn exchange(
        &self,
        id: StreamId,
        mut body: Bytes,
        response: oneshot::Receiver<Result<HttpResponse>>,
    ) -> Result<HttpResponse> {
        while !body.is_empty() {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut guard = self.shared.lock();
                let st = &mut *guard;
                if let Some(err) = st.lost() {
                    return Err(err);
                }
                let max_frame_size = st.peer_max_frame_size();
                let conn_credit = st.flow.send_window().available();
                let Some(stream) = st.streams.get_mut(&id) else {
                    // reset, or the response already completed
                    break;
                };
                if !stream.state().can_send() {
                    break;
                }

                let n = body
                    .len()
                    .min(conn_credit)
                    .min(stream.flow().send_window().available())
                    .min(max_frame_size);
                if n > 0 {
                    stream.flow_mut().send_window_mut().reserve(n);
                    let chunk = body.split_to(n);
                    let end_stream = body.is_empty();
                    if end_stream {
                        stream.send_end_stream();
                    }
                    st.flow.send_window_mut().reserve(n);
                    self.shared.send(FrameCodec::encode_data_frame(&DataFrame::new(
                        id, chunk, end_stream,
                    )));
                    continue;
                }
                trace!(stream_id = id, "waiting for flow-control credit");
            }
            notified.await;
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Err(self.shared.lock().lost().unwrap_or(Error::ConnectionClosed)),
        }
    }

    /// Measure the round-trip time with a PING
    pub async fn ping(&self) -> Result<Duration> {
        let (tx, rx) = oneshot::channel();
        {
            let mut st = self.shared.lock();
            if let Some(err) = st.lost() {
                return Err(err);
            }
            st.next_ping += 1;
            let data = st.next_ping.to_be_bytes();
            st.pings.insert(data, tx);
            self.shared
                .send(FrameCodec::encode_ping_frame(&PingFrame::new(data)));
        }
        let start = Instant::now();
        rx.await
            .map_err(|_| self.shared.lock().lost().unwrap_or(Error::ConnectionClosed))?;
        Ok(start.elapsed())
    }

    /// Send GOAWAY(NO_ERROR), fail in-flight streams and shut the write half
    pub fn close(&self) {
        let mut guard = self.shared.lock();
        let st = &mut *guard;
        if st.closing || st.error.is_some() {
            return;
        }
        st.closing = true;
        debug!(active_streams = st.streams.len(), "closing HTTP/2 connection");

        self.shared.send(FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            0,
            ErrorCode::NoError,
            Bytes::new(),
        )));
        let _ = self.shared.outbound.send(Outbound::Shutdown);
        for (_, mut stream) in st.streams.drain() {
            stream.fail(Error::ConnectionClosed);
        }
        drop(guard);
        self.shared.changed.notify_waiters();
        self.reader.abort();
    }

    /// Whether new requests may be sent on this connection
    pub fn is_usable(&self) -> bool {
        let st = self.shared.lock();
        st.error.is_none()
            && st.goaway.is_none()
            && !st.closing
            && st.next_stream_id <= MAX_STREAM_ID
            && !self.reader.is_finished()
    }

    pub fn active_streams(&self) -> usize {
        self.shared.lock().streams.len()
    }

    /// Settings received from the peer so far
    pub fn peer_settings(&self) -> Settings {
        self.shared.lock().peer_settings.clone()
    }
}

impl Drop for H2Connection {
    fn drop(&mut self) {
        self.close();
        self.reader.abort();
    }
}

async fn write_loop<W>(shared: Weak<Shared>, mut writer: W, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    let result: io::Result<()> = async {
        while let Some(msg) = rx.recv().await {
            let mut shutdown = false;
            match msg {
                Outbound::Frame(frame) => writer.write_all(&frame).await?,
                Outbound::Shutdown => shutdown = true,
            }
            while !shutdown {
                match rx.try_recv() {
                    Ok(Outbound::Frame(frame)) => writer.write_all(&frame).await?,
                    Ok(Outbound::Shutdown) => shutdown = true,
                    Err(_) => break,
                }
            }
            writer.flush().await?;
            if shutdown {
                writer.shutdown().await?;
                break;
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        debug!(error = %e, "HTTP/2 writer failed");
        if let Some(shared) = shared.upgrade() {
            shared.fail(&Error::Io(e));
        }
    }
}

async fn settings_timer(shared: Weak<Shared>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let acked = shared.lock().settings_acked;
    if !acked {
        warn!(?timeout, "SETTINGS not acknowledged in time");
        shared.fail(&Error::SettingsTimeout);
    }
}

/// Header block being reassembled from HEADERS or PUSH_PROMISE plus
/// CONTINUATION frames
struct PendingBlock {
    stream_id: StreamId,
    end_stream: bool,
    promised: Option<StreamId>,
    block: BytesMut,
}

/// State owned by the reader task
struct FrameReader {
    shared: Arc<Shared>,
    decoder: Decoder,
    buffers: BufferPool,
    pending: Option<PendingBlock>,
    max_frame_size: usize,
    max_block_len: usize,
    saw_settings: bool,
}

impl FrameReader {
    async fn run<R: AsyncRead + Unpin>(mut self, mut reader: R) {
        let err = match self.read_loop(&mut reader).await {
            Ok(()) => Error::ConnectionClosed,
            Err(e) => e,
        };
        if matches!(err, Error::ConnectionClosed) {
            debug!("HTTP/2 connection closed by peer");
        } else {
            warn!(error = %err, code = %err.error_code(), "HTTP/2 connection failed");
        }
        self.shared.fail(&err);
    }

    async fn read_loop<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<()> {
        while let Some(frame) = FrameCodec::read_frame(reader, self.max_frame_size).await? {
            trace!(
                frame_type = %frame.frame_type,
                stream_id = frame.stream_id,
                flags = frame.flags.as_u8(),
                len = frame.payload.len(),
                "frame received"
            );
            self.on_frame(frame)?;
        }
        Ok(())
    }

    fn on_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.saw_settings {
            if frame.frame_type != FrameType::Settings || frame.flags.is_ack() {
                return Err(Error::MissingPreface);
            }
            self.saw_settings = true;
        }

        if let Some(pending) = &self.pending {
            if frame.frame_type != FrameType::Continuation || frame.stream_id != pending.stream_id
            {
                return Err(Error::Protocol(format!(
                    "expected CONTINUATION on stream {}, got {} on stream {}",
                    pending.stream_id, frame.frame_type, frame.stream_id
                )));
            }
        }

        match frame.frame_type {
            FrameType::Data => self.on_data(&frame),
            FrameType::Headers => self.on_headers(&frame),
            FrameType::Priority => FrameCodec::parse_priority(&frame).map(|_| ()),
            FrameType::RstStream => self.on_rst_stream(&frame),
            FrameType::Settings => self.on_settings(&frame),
            FrameType::PushPromise => self.on_push_promise(&frame),
            FrameType::Ping => self.on_ping(&frame),
            FrameType::Goaway => self.on_goaway(&frame),
            FrameType::WindowUpdate => self.on_window_update(&frame),
            FrameType::Continuation => self.on_continuation(&frame),
            FrameType::Unknown(frame_type) => {
                trace!(frame_type, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    fn require_known_stream(&self, kind: FrameType, id: StreamId) -> Result<()> {
        if self.shared.lock().is_idle_stream(id) {
            return Err(Error::Protocol(format!("{} on idle stream {}", kind, id)));
        }
        Ok(())
    }

    fn on_data(&mut self, frame: &Frame) -> Result<()> {
        let data = FrameCodec::parse_data(frame)?;
        let id = data.stream_id;
        let flow_len = frame.payload.len();

        let mut guard = self.shared.lock();
        let st = &mut *guard;
        if st.is_idle_stream(id) {
            return Err(Error::Protocol(format!("DATA on idle stream {}", id)));
        }

        st.flow.recv_window_mut().consume(flow_len)?;
        if let Some(increment) = st.flow.recv_window_mut().take_update() {
            self.shared.send(FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(0, increment),
            ));
        }

        let Some(stream) = st.streams.get_mut(&id) else {
            trace!(stream_id = id, "DATA for closed stream ignored");
            return Ok(());
        };
        stream.flow_mut().recv_window_mut().consume(flow_len)?;

        match stream.receive_data(&data.data, data.end_stream) {
            Err(e) => reset_stream(&self.shared, st, id, e),
            Ok(()) if stream.is_response_complete() => finish_stream(&self.shared, st, id),
            Ok(()) => {
                if let Some(increment) = stream.flow_mut().recv_window_mut().take_update() {
                    self.shared.send(FrameCodec::encode_window_update_frame(
                        &WindowUpdateFrame::new(id, increment),
                    ));
                }
            }
        }
        Ok(())
    }

    fn on_headers(&mut self, frame: &Frame) -> Result<()> {
        let headers = FrameCodec::parse_headers(frame)?;
        self.require_known_stream(FrameType::Headers, headers.stream_id)?;

        self.start_block(
            headers.stream_id,
            headers.end_stream,
            None,
            &headers.header_block,
            headers.end_headers,
        )
    }

    fn on_push_promise(&mut self, frame: &Frame) -> Result<()> {
        let push = FrameCodec::parse_push_promise(frame)?;
        self.require_known_stream(FrameType::PushPromise, push.stream_id)?;
        {
            let mut st = self.shared.lock();
            let promised = push.promised_stream_id;
            if promised == 0 || promised % 2 != 0 || promised <= st.last_promised_id {
                return Err(Error::Protocol(format!(
                    "invalid promised stream id {}",
                    promised
                )));
            }
            st.last_promised_id = promised;
        }

        self.start_block(
            push.stream_id,
            false,
            Some(push.promised_stream_id),
            &push.header_block,
            push.end_headers,
        )
    }

    fn start_block(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        promised: Option<StreamId>,
        fragment: &[u8],
        end_headers: bool,
    ) -> Result<()> {
        self.check_block_len(fragment.len())?;
        let mut block = self.buffers.get();
        block.extend_from_slice(fragment);
        self.pending = Some(PendingBlock {
            stream_id,
            end_stream,
            promised,
            block,
        });
        if end_headers {
            self.finish_block()?;
        }
        Ok(())
    }

    fn check_block_len(&self, len: usize) -> Result<()> {
        if len > self.max_block_len {
            return Err(Error::Compression(format!(
                "header block exceeds {} bytes",
                self.max_block_len
            )));
        }
        Ok(())
    }

    fn on_continuation(&mut self, frame: &Frame) -> Result<()> {
        let continuation = FrameCodec::parse_continuation(frame)?;
        let Some(buffered) = self.pending.as_ref().map(|p| p.block.len()) else {
            return Err(Error::Protocol(format!(
                "CONTINUATION without HEADERS on stream {}",
                continuation.stream_id
            )));
        };
        self.check_block_len(buffered + continuation.header_block.len())?;
        if let Some(pending) = self.pending.as_mut() {
            pending.block.extend_from_slice(&continuation.header_block);
        }
        if continuation.end_headers {
            self.finish_block()?;
        }
        Ok(())
    }

    /// Decode a complete header block and hand it to its stream
    ///
    /// Blocks are always decoded, even for streams that are gone, so the
    /// decoder's table stays in step with the peer's encoder.
    fn finish_block(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let decoded = self.decoder.decode(&pending.block);
        self.buffers.put(pending.block);
        let fields = decoded.map_err(|e| Error::Compression(e.to_string()))?;

        if let Some(promised) = pending.promised {
            debug!(
                stream_id = pending.stream_id,
                promised_stream_id = promised,
                "refusing pushed stream"
            );
            self.shared.send(FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(
                promised,
                ErrorCode::RefusedStream,
            )));
            return Ok(());
        }

        let id = pending.stream_id;
        let mut guard = self.shared.lock();
        let st = &mut *guard;
        let Some(stream) = st.streams.get_mut(&id) else {
            trace!(stream_id = id, "HEADERS for closed stream ignored");
            return Ok(());
        };
        match stream.receive_headers(fields, pending.end_stream) {
            Err(e) => reset_stream(&self.shared, st, id, e),
            Ok(()) if stream.is_response_complete() => finish_stream(&self.shared, st, id),
            Ok(()) => {}
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: &Frame) -> Result<()> {
        let rst = FrameCodec::parse_rst_stream(frame)?;
        let id = rst.stream_id;

        let mut st = self.shared.lock();
        if st.is_idle_stream(id) {
            return Err(Error::Protocol(format!("RST_STREAM on idle stream {}", id)));
        }
        if let Some(mut stream) = st.streams.remove(&id) {
            debug!(stream_id = id, code = %rst.error_code, "stream reset by peer");
            stream.fail(if rst.error_code == ErrorCode::RefusedStream {
                Error::RefusedStream(id)
            } else {
                Error::StreamReset {
                    stream_id: id,
                    code: rst.error_code,
                }
            });
            drop(st);
            self.shared.changed.notify_waiters();
        }
        Ok(())
    }

    fn on_settings(&mut self, frame: &Frame) -> Result<()> {
        let settings = FrameCodec::parse_settings(frame)?;
        let mut guard = self.shared.lock();
        let st = &mut *guard;

        if settings.ack {
            if !st.settings_acked {
                debug!("local SETTINGS acknowledged");
            }
            st.settings_acked = true;
            return Ok(());
        }

        let peer = settings.settings;
        if let Some(size) = peer.initial_window_size {
            for stream in st.streams.values_mut() {
                stream.flow_mut().send_window_mut().update_initial_size(size)?;
            }
        }
        if let Some(size) = peer.header_table_size {
            let size = size.min(MAX_ENCODER_TABLE_SIZE) as usize;
            if size != st.encoder.table().max_size() {
                st.encoder.set_max_table_size(size);
            }
        }
        st.peer_settings.merge(&peer);
        debug!(settings = ?peer, "peer SETTINGS applied");

        self.shared
            .send(FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        drop(guard);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame) -> Result<()> {
        let ping = FrameCodec::parse_ping(frame)?;
        if ping.ack {
            if let Some(tx) = self.shared.lock().pings.remove(&ping.data) {
                let _ = tx.send(());
            }
        } else {
            self.shared
                .send(FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)));
        }
        Ok(())
    }

    fn on_goaway(&mut self, frame: &Frame) -> Result<()> {
        let goaway = FrameCodec::parse_goaway(frame)?;
        let last_stream_id = goaway.last_stream_id;
        let code = goaway.error_code;

        let mut guard = self.shared.lock();
        let st = &mut *guard;
        if code == ErrorCode::NoError {
            debug!(last_stream_id, "peer sent GOAWAY");
        } else {
            warn!(
                last_stream_id,
                code = %code,
                debug_data = %String::from_utf8_lossy(&goaway.debug_data),
                "peer sent GOAWAY"
            );
        }
        st.goaway = Some((last_stream_id, code));

        let unprocessed: Vec<StreamId> = st
            .streams
            .keys()
            .copied()
            .filter(|&id| id > last_stream_id)
            .collect();
        for id in unprocessed {
            if let Some(mut stream) = st.streams.remove(&id) {
                stream.fail(Error::GoAway {
                    last_stream_id,
                    code,
                });
            }
        }
        drop(guard);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    fn on_window_update(&mut self, frame: &Frame) -> Result<()> {
        let update = FrameCodec::parse_window_update(frame)?;
        let id = update.stream_id;

        let mut guard = self.shared.lock();
        let st = &mut *guard;
        if id == 0 {
            st.flow.send_window_mut().increase(update.size_increment)?;
        } else {
            if st.is_idle_stream(id) {
                return Err(Error::Protocol(format!("WINDOW_UPDATE on idle stream {}", id)));
            }
            let result = st
                .streams
                .get_mut(&id)
                .map(|stream| stream.flow_mut().send_window_mut().increase(update.size_increment));
            if let Some(Err(e)) = result {
                let code = e.error_code();
                debug!(stream_id = id, error = %e, "invalid stream WINDOW_UPDATE");
                reset_stream(
                    &self.shared,
                    st,
                    id,
                    Error::StreamReset {
                        stream_id: id,
                        code,
                    },
                );
            }
        }
        drop(guard);
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::Method;

    #[test]
    fn test_request_fields() {
        let request = HttpRequest::builder()
            .method(Method::Post)
            .uri("https://example.com/upload?x=1")
            .header("Host", "example.com")
            .header("Connection", "keep-alive")
            .header("TE", "gzip")
            .header("X-Trace", "abc")
            .body(&b"hello"[..])
            .build();

        let fields = request_fields(&request, "example.com").unwrap();
        let pairs: Vec<(String, String)> = fields
            .iter()
            .map(|f| (f.name_str().into_owned(), String::from_utf8_lossy(&f.value).into_owned()))
            .collect();
        let pairs: Vec<(&str, &str)> = pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();

        assert_eq!(
            pairs,
            vec![
                (":method", "POST"),
                (":scheme", "https"),
                (":authority", "example.com"),
                (":path", "/upload?x=1"),
                ("x-trace", "abc"),
                ("content-length", "5"),
            ]
        );
    }

    #[test]
    fn test_request_fields_reject_pseudo_header() {
        let request = HttpRequest::builder()
            .uri("https://example.com/")
            .header(":path", "/evil")
            .build();
        assert!(matches!(
            request_fields(&request, "example.com"),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_request_fields_reject_line_breaks() {
        let request = HttpRequest::builder()
            .uri("https://example.com/")
            .header("x-note", "a\r\nx-injected: 1")
            .build();
        assert!(matches!(
            request_fields(&request, "example.com"),
            Err(Error::InvalidHeader(_))
        ));

        let request = HttpRequest::new(Method::Get, "https://example.com/");
        assert!(matches!(
            request_fields(&request, "example.com\n"),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_header_block_split_into_continuations() {
        let block = Bytes::from(vec![0x82u8; 40]);
        let encoded = encode_header_block(5, block, true, 16);

        // HEADERS(16) + CONTINUATION(16) + CONTINUATION(8)
        assert_eq!(encoded.len(), 9 * 3 + 40);
        let first = FrameCodec::decode_header(encoded[0..9].try_into().unwrap());
        assert_eq!(first.frame_type, FrameType::Headers);
        assert_eq!(first.length, 16);
        assert!(first.flags.is_end_stream());
        assert!(!first.flags.is_end_headers());

        let last = FrameCodec::decode_header(encoded[50..59].try_into().unwrap());
        assert_eq!(last.frame_type, FrameType::Continuation);
        assert_eq!(last.length, 8);
        assert_eq!(last.stream_id, 5);
        assert!(last.flags.is_end_headers());
    }

    #[test]
    fn test_header_block_single_frame() {
        let encoded = encode_header_block(1, Bytes::from_static(&[0x82, 0x84]), false, 16384);
        let header = FrameCodec::decode_header(encoded[0..9].try_into().unwrap());
        assert_eq!(header.length, 2);
        assert!(header.flags.is_end_headers());
        assert!(!header.flags.is_end_stream());
    }

    #[test]
    fn test_config_validation() {
        assert!(H2Config::default().validate().is_ok());
        assert!(H2Config::default().connection_window(1).validate().is_err());
        assert!(H2Config::default().max_frame_size(1024).validate().is_err());

        let mut push = H2Config::default();
        push.settings.enable_push = Some(true);
        assert!(matches!(push.validate(), Err(Error::InvalidSettings(_))));
    }
}
