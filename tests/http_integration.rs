//! HTTP/1.1 transport integration tests
//!
//! These run [`Transport`] against small TCP servers on localhost and check
//! connection reuse, body framing, timeouts and cancellation.

mod common;

use httpwire::http::Http1Connection;
use httpwire::{Cancellation, Error, HttpRequest, Method, Transport, TransportConfig};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Accept connections forever, passing each with its index to `handler`
async fn spawn_server<F, Fut>(handler: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(usize, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handler(index, stream));
        }
    });
    (addr, accepted)
}

/// Read one request head; None if the client went away first
async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return None,
        }
    }
    Some(String::from_utf8_lossy(&head).into_owned())
}

fn get(addr: SocketAddr, path: &str) -> HttpRequest {
    HttpRequest::builder()
        .method(Method::Get)
        .uri(format!("http://{}{}", addr, path))
        .build()
}

#[tokio::test]
async fn test_keep_alive_reuses_connection() {
    common::init_tracing();
    let (addr, accepted) = spawn_server(|_, stream| common::serve_http1(stream)).await;
    let transport = Transport::new(TransportConfig::default()).unwrap();

    for path in ["/one", "/two", "/three"] {
        let response = transport.send(get(addr, path), None).await.unwrap();
        assert_eq!(response.status().code(), 200);
        assert_eq!(response.body().as_ref(), path.as_bytes());
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_head_on_the_wire() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    let (addr, _) = spawn_server(move |_, mut stream| {
        let tx = tx.lock().unwrap().take();
        async move {
            let head = read_head(&mut stream).await.unwrap();
            let mut body = [0u8; 5];
            stream.read_exact(&mut body).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            if let Some(tx) = tx {
                let _ = tx.send((head, body));
            }
        }
    })
    .await;

    let transport = Transport::new(TransportConfig::default()).unwrap();
    let request = HttpRequest::builder()
        .method(Method::Post)
        .uri(format!("http://{}/items?id=7", addr))
        .header("X-Trace", "abc")
        .body(&b"hello"[..])
        .build();
    let response = transport.send(request, None).await.unwrap();
    assert_eq!(response.status().code(), 201);

    let (head, body) = rx.await.unwrap();
    assert!(head.starts_with("POST /items?id=7 HTTP/1.1\r\n"), "{}", head);
    assert!(head.contains(&format!("Host: {}\r\n", addr)), "{}", head);
    assert!(head.contains("X-Trace: abc\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));
    assert_eq!(&body, b"hello");
}

#[tokio::test]
async fn test_chunked_response() {
    let (addr, _) = spawn_server(|_, mut stream| async move {
        if read_head(&mut stream).await.is_some() {
            let _ = stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                      5\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: 42\r\n\r\n",
                )
                .await;
            common::serve_http1(stream).await;
        }
    })
    .await;

    let transport = Transport::new(TransportConfig::default()).unwrap();
    let response = transport.send(get(addr, "/"), None).await.unwrap();
    assert_eq!(response.body().as_ref(), b"hello world");
    assert_eq!(response.trailers().get("X-Checksum"), Some("42"));

    // chunked framing leaves the connection reusable
    transport.send(get(addr, "/again"), None).await.unwrap();
}

#[tokio::test]
async fn test_connection_close_is_not_reused() {
    let (addr, accepted) = spawn_server(|_, mut stream| async move {
        if read_head(&mut stream).await.is_some() {
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok")
                .await;
        }
    })
    .await;

    let transport = Transport::new(TransportConfig::default()).unwrap();
    for _ in 0..2 {
        let response = transport.send(get(addr, "/"), None).await.unwrap();
        assert_eq!(response.body().as_ref(), b"ok");
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_body_until_eof() {
    let (addr, _) = spawn_server(|_, mut stream| async move {
        if read_head(&mut stream).await.is_some() {
            let _ = stream.write_all(b"HTTP/1.0 200 OK\r\n\r\nstreamed").await;
        }
    })
    .await;

    let transport = Transport::new(TransportConfig::default()).unwrap();
    let response = transport.send(get(addr, "/"), None).await.unwrap();
    assert_eq!(response.body().as_ref(), b"streamed");
}

#[tokio::test]
async fn test_server_closed_idle_connection_is_replaced() {
    // answers once as if keep-alive, then hangs up
    let (addr, accepted) = spawn_server(|_, mut stream| async move {
        if read_head(&mut stream).await.is_some() {
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await;
        }
    })
    .await;

    let transport = Transport::new(TransportConfig::default()).unwrap();
    transport.send(get(addr, "/"), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = transport.send(get(addr, "/"), None).await.unwrap();
    assert_eq!(response.body().as_ref(), b"ok");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_request_timeout() {
    let (addr, _) = spawn_server(|_, mut stream| async move {
        let _ = read_head(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    })
    .await;

    let config = TransportConfig::builder()
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let transport = Transport::new(config).unwrap();
    let err = transport.send(get(addr, "/slow"), None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "unexpected error: {:?}", err);
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_cancel_discards_connection() {
    // the first connection never answers, later ones do
    let (addr, accepted) = spawn_server(|index, mut stream| async move {
        if index == 0 {
            let _ = read_head(&mut stream).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        } else {
            common::serve_http1(stream).await;
        }
    })
    .await;

    let transport = Transport::new(TransportConfig::default()).unwrap();
    let (handle, token) = Cancellation::new();
    let pending = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.send(get(addr, "/hang"), Some(token)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());

    let response = transport.send(get(addr, "/fresh"), None).await.unwrap();
    assert_eq!(response.body().as_ref(), b"/fresh");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pool_capacity_timeout() {
    let (addr, _) = spawn_server(|_, mut stream| async move {
        let _ = read_head(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    })
    .await;

    let config = TransportConfig::builder()
        .max_connections_per_host(1)
        .pool_wait_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let transport = Transport::new(config).unwrap();

    let busy = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.send(get(addr, "/busy"), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = transport.send(get(addr, "/waiting"), None).await.unwrap_err();
    assert!(
        matches!(err, Error::Connect(httpwire::net::Error::PoolTimeout(_))),
        "unexpected error: {:?}",
        err
    );
    assert!(err.is_timeout());
    busy.abort();
}

#[tokio::test]
async fn test_connect_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let transport = Transport::new(TransportConfig::default()).unwrap();
    let err = transport
        .send(
            HttpRequest::new(Method::Get, format!("http://127.0.0.1:{}/", port)),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connect(httpwire::net::Error::Connect { .. })));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_http1_connection_directly() {
    let (addr, _) = spawn_server(|_, stream| common::serve_http1(stream)).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Http1Connection::new(stream);
    let authority = addr.to_string();
    for path in ["/a", "/b"] {
        let exchange = conn
            .send_request(&get(addr, path), &authority)
            .await
            .unwrap();
        assert!(exchange.reusable);
        assert_eq!(exchange.response.body().as_ref(), path.as_bytes());
    }
    conn.shutdown().await.unwrap();
}
