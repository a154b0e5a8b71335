//! Test peers shared by the integration tests
//!
//! - [`MockPeer`]: a scripted HTTP/2 server speaking raw frames
//! - [`serve_echo`]: a small HTTP/2 server loop built on it
//! - [`spawn_tls_server`]: a TLS listener with a throwaway self-signed
//!   certificate and configurable ALPN

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use httpwire::http::h2::frames::{
    ContinuationFrame, DataFrame, Frame, FrameType, GoawayFrame, HeadersFrame, PingFrame, PriorityFrame,
    PrioritySpec, PushPromiseFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
};
use httpwire::http::h2::{ErrorCode, FrameCodec, Settings, CONNECTION_PREFACE};
use httpwire::http::hpack::{Decoder, Encoder, HeaderField};
use httpwire::http::tls::Protocol;
use httpwire::net::{Connected, Connector, PoolKey};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{select_next_proto, AlpnError, Ssl, SslAcceptor, SslMethod};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;

/// Route `tracing` output through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A decoded request as seen by the mock server
#[derive(Debug, Clone)]
pub struct Request {
    pub stream_id: u32,
    pub fields: Vec<HeaderField>,
    pub end_stream: bool,
}

impl Request {
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|f| f.name.as_ref() == name.as_bytes())
            .map(|f| String::from_utf8_lossy(&f.value).into_owned())
    }
}

/// Scripted HTTP/2 server side of a connection
pub struct MockPeer<S> {
    io: S,
    decoder: Decoder,
    encoder: Encoder,
}

impl<S: AsyncRead + AsyncWrite + Unpin> MockPeer<S> {
    /// Read the client preface, send `settings` and acknowledge the client's
    pub async fn accept(io: S, settings: Settings) -> Self {
        let mut peer = MockPeer::raw(io);
        peer.read_preface().await;
        peer.send_settings(settings).await;

        let first = peer.read_frame().await.expect("client SETTINGS");
        assert_eq!(first.frame_type, FrameType::Settings);
        assert!(!first.flags.is_ack());
        peer.write(FrameCodec::encode_settings_frame(&SettingsFrame::ack()))
            .await;
        peer
    }

    /// A peer that has not exchanged anything yet
    pub fn raw(io: S) -> Self {
        MockPeer {
            io,
            decoder: Decoder::new(4096, 1 << 20),
            encoder: Encoder::new(4096),
        }
    }

    pub async fn read_preface(&mut self) {
        let mut preface = [0u8; 24];
        self.io.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface[..], CONNECTION_PREFACE);
    }

    /// Next frame, or None once the client is gone
    pub async fn read_frame(&mut self) -> Option<Frame> {
        FrameCodec::read_frame(&mut self.io, 1 << 20)
            .await
            .ok()
            .flatten()
    }

    /// Next frame that is not connection housekeeping
    ///
    /// SETTINGS and WINDOW_UPDATE are skipped, PINGs are answered.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let frame = self.read_frame().await?;
            match frame.frame_type {
                FrameType::Settings | FrameType::WindowUpdate => continue,
                FrameType::Ping if !frame.flags.is_ack() => {
                    let ping = FrameCodec::parse_ping(&frame).unwrap();
                    self.write(FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)))
                        .await;
                }
                _ => return Some(frame),
            }
        }
    }

    /// Next frame of `frame_type`, skipping everything else
    pub async fn expect_frame(&mut self, frame_type: FrameType) -> Frame {
        loop {
            let frame = self.read_frame().await.expect("connection open");
            if frame.frame_type == frame_type {
                return frame;
            }
        }
    }

    /// Read the next request's header block
    pub async fn read_request(&mut self) -> Request {
        let frame = self.next_frame().await.expect("request HEADERS");
        self.decode_request(frame).await
    }

    /// Finish a header block started by `frame`, reading CONTINUATIONs
    pub async fn decode_request(&mut self, frame: Frame) -> Request {
        assert_eq!(frame.frame_type, FrameType::Headers);
        let headers = FrameCodec::parse_headers(&frame).unwrap();
        let mut block = BytesMut::from(&headers.header_block[..]);
        let mut end_headers = headers.end_headers;
        while !end_headers {
            let next = self.read_frame().await.expect("CONTINUATION");
            let continuation = FrameCodec::parse_continuation(&next).unwrap();
            assert_eq!(continuation.stream_id, headers.stream_id);
            block.extend_from_slice(&continuation.header_block);
            end_headers = continuation.end_headers;
        }
        Request {
            stream_id: headers.stream_id,
            fields: self.decoder.decode(&block).unwrap(),
            end_stream: headers.end_stream,
        }
    }

    pub fn encode_block(&mut self, fields: &[HeaderField]) -> Bytes {
        let mut block = BytesMut::new();
        self.encoder.encode(fields, &mut block);
        block.freeze()
    }

    /// Encode a header list into one HEADERS frame
    pub fn headers_frame(&mut self, stream_id: u32, fields: &[HeaderField], end_stream: bool) -> Bytes {
        let block = self.encode_block(fields);
        FrameCodec::encode_headers_frame(&HeadersFrame::new(stream_id, block, end_stream, true))
    }

    /// Response headers split into a HEADERS frame and CONTINUATION frames
    /// of at most `fragment` bytes each
    pub async fn send_headers_split(
        &mut self,
        stream_id: u32,
        fields: &[HeaderField],
        end_stream: bool,
        fragment: usize,
    ) {
        let mut block = self.encode_block(fields);
        let first = block.split_to(block.len().min(fragment));
        let mut out = BytesMut::new();
        out.extend_from_slice(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
            stream_id,
            first,
            end_stream,
            block.is_empty(),
        )));
        while !block.is_empty() {
            let header_block = block.split_to(block.len().min(fragment));
            out.extend_from_slice(&FrameCodec::encode_continuation_frame(&ContinuationFrame {
                stream_id,
                header_block,
                end_headers: block.is_empty(),
            }));
        }
        self.write(out.freeze()).await;
    }

    pub async fn send_continuation(&mut self, stream_id: u32, header_block: Bytes, end_headers: bool) {
        self.write(FrameCodec::encode_continuation_frame(&ContinuationFrame {
            stream_id,
            header_block,
            end_headers,
        }))
        .await;
    }

    pub async fn send_priority(&mut self, stream_id: u32, dependency: u32, weight: u8) {
        self.write(FrameCodec::encode_priority_frame(&PriorityFrame {
            stream_id,
            priority: PrioritySpec::new(dependency, false, weight),
        }))
        .await;
    }

    pub async fn send_push_promise(&mut self, stream_id: u32, promised_stream_id: u32, path: &str) {
        let header_block = self.encode_block(&[
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", "https"),
            HeaderField::new(":authority", "example.com"),
            HeaderField::new(":path", path.to_string()),
        ]);
        self.write(FrameCodec::encode_push_promise_frame(&PushPromiseFrame {
            stream_id,
            promised_stream_id,
            header_block,
            end_headers: true,
        }))
        .await;
    }

    pub async fn send_headers(
        &mut self,
        stream_id: u32,
        status: u16,
        extra: &[(&str, &str)],
        end_stream: bool,
    ) {
        let mut fields = vec![HeaderField::new(":status", status.to_string())];
        for (name, value) in extra {
            fields.push(HeaderField::new(name.to_string(), value.to_string()));
        }
        let frame = self.headers_frame(stream_id, &fields, end_stream);
        self.write(frame).await;
    }

    pub async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        self.write(FrameCodec::encode_data_frame(&DataFrame::new(
            stream_id,
            Bytes::copy_from_slice(data),
            end_stream,
        )))
        .await;
    }

    /// Complete 200 response with `body`
    pub async fn send_response(&mut self, stream_id: u32, body: &[u8]) {
        if body.is_empty() {
            self.send_headers(stream_id, 200, &[], true).await;
        } else {
            let len = body.len().to_string();
            self.send_headers(stream_id, 200, &[("content-length", &len)], false)
                .await;
            self.send_data(stream_id, body, true).await;
        }
    }

    pub async fn send_settings(&mut self, settings: Settings) {
        self.write(FrameCodec::encode_settings_frame(&SettingsFrame::new(settings)))
            .await;
    }

    pub async fn send_rst(&mut self, stream_id: u32, code: ErrorCode) {
        self.write(FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(
            stream_id, code,
        )))
        .await;
    }

    pub async fn send_goaway(&mut self, last_stream_id: u32, code: ErrorCode) {
        self.write(FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            last_stream_id,
            code,
            Bytes::new(),
        )))
        .await;
    }

    pub async fn send_window_update(&mut self, stream_id: u32, increment: u32) {
        self.write(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
            stream_id, increment,
        )))
        .await;
    }

    pub async fn write(&mut self, bytes: Bytes) {
        self.io.write_all(&bytes).await.unwrap();
        self.io.flush().await.unwrap();
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}

/// Answer every request with 200
///
/// The response body is the request body when there is one, the `:path`
/// otherwise. Stream ids are appended to `seen` in arrival order.
pub async fn serve_echo<S>(mut peer: MockPeer<S>, seen: Arc<Mutex<Vec<u32>>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut uploads: HashMap<u32, (String, Vec<u8>)> = HashMap::new();

    while let Some(frame) = peer.next_frame().await {
        match frame.frame_type {
            FrameType::Headers => {
                let request = peer.decode_request(frame).await;
                seen.lock().unwrap().push(request.stream_id);
                let path = request.field(":path").unwrap_or_default();
                if request.end_stream {
                    peer.send_response(request.stream_id, path.as_bytes()).await;
                } else {
                    uploads.insert(request.stream_id, (path, Vec::new()));
                }
            }
            FrameType::Data => {
                let data = FrameCodec::parse_data(&frame).unwrap();
                let Some((_, body)) = uploads.get_mut(&data.stream_id) else {
                    continue;
                };
                body.extend_from_slice(&data.data);
                if !data.data.is_empty() {
                    let len = data.data.len() as u32;
                    peer.send_window_update(0, len).await;
                    peer.send_window_update(data.stream_id, len).await;
                }
                if data.end_stream {
                    if let Some((path, body)) = uploads.remove(&data.stream_id) {
                        let reply = if body.is_empty() { path.into_bytes() } else { body };
                        peer.send_response(data.stream_id, &reply).await;
                    }
                }
            }
            FrameType::RstStream => {
                uploads.remove(&frame.stream_id);
            }
            FrameType::Goaway => break,
            _ => {}
        }
    }
}

/// Connector handing out in-memory pipes to [`serve_echo`] servers
#[derive(Default)]
pub struct EchoConnector {
    pub connects: AtomicUsize,
    pub seen: Arc<Mutex<Vec<u32>>>,
}

impl EchoConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for EchoConnector {
    fn connect<'a>(&'a self, _key: &'a PoolKey) -> BoxFuture<'a, httpwire::net::Result<Connected>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(256 * 1024);
            let seen = self.seen.clone();
            tokio::spawn(async move {
                let peer = MockPeer::accept(server, Settings::new()).await;
                serve_echo(peer, seen).await;
            });
            Ok(Connected {
                session: Box::new(client),
                protocol: Protocol::Http2,
                tls: None,
            })
        })
    }
}

/// A connected client/peer pair over an in-memory pipe
pub fn pipe() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(256 * 1024)
}

/// Self-signed certificate for `localhost` and `127.0.0.1`
pub fn self_signed_cert() -> (X509, PKey<Private>) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .digital_signature()
                .key_cert_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
    let san = SubjectAlternativeName::new()
        .dns("localhost")
        .ip("127.0.0.1")
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(san).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// A running TLS test server
pub struct TlsServer {
    pub addr: SocketAddr,
    /// PEM of the server certificate, to be trusted by clients
    pub cert_pem: Vec<u8>,
    pub accepted: Arc<AtomicUsize>,
}

impl TlsServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.addr.port(), path)
    }
}

/// Accept TLS connections and hand each to `handler`
///
/// `alpn` is the server's protocol list in wire format; empty disables ALPN.
pub async fn spawn_tls_server<F, Fut>(alpn: &'static [u8], handler: F) -> TlsServer
where
    F: Fn(SslStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (cert, key) = self_signed_cert();
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&key).unwrap();
    acceptor.set_certificate(&cert).unwrap();
    if !alpn.is_empty() {
        acceptor.set_alpn_select_callback(move |_, client| {
            select_next_proto(alpn, client).ok_or(AlpnError::NOACK)
        });
    }
    let acceptor = Arc::new(acceptor.build());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let ssl = Ssl::new(acceptor.context()).unwrap();
                let mut stream = SslStream::new(ssl, tcp).unwrap();
                if Pin::new(&mut stream).accept().await.is_err() {
                    return;
                }
                (*handler)(stream).await;
            });
        }
    });

    TlsServer {
        addr,
        cert_pem: cert.to_pem().unwrap(),
        accepted,
    }
}

/// Serve HTTP/1.1 keep-alive responses echoing the request target
pub async fn serve_http1<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        buf.drain(..head_end);

        let target = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            target.len(),
            target
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}
