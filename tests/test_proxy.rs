//! Tests for outbound request construction and the HTTP forwarding engine

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use host_forward::config::UpstreamConfig;
use host_forward::http::headers::Headers;
use host_forward::http::request::{BodyFraming, Method};
use host_forward::proxy::connector::{Connector, RequestForm};
use host_forward::proxy::egress::EgressProxies;
use host_forward::proxy::engine::{ClientIo, EngineError, ForwardRequest, ForwardingEngine};
use host_forward::proxy::target::ValidatedTarget;
use host_forward::proxy::upstream::{HttpForwarder, build_request_head};

fn forward_request(method: Method, target: &str, headers: &[(&str, &str)]) -> ForwardRequest {
    ForwardRequest {
        method,
        headers: headers.iter().copied().collect::<Headers>(),
        target: ValidatedTarget::parse(target).unwrap(),
        framing: BodyFraming::None,
        upgrade: None,
    }
}

fn head_text(request: &ForwardRequest, form: &RequestForm) -> String {
    String::from_utf8(build_request_head(request, form)).unwrap()
}

/// Reads a request head and whatever arrived after it.
async fn read_head(socket: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before sending a head");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(end + 4);
            return (String::from_utf8(buf).unwrap(), rest);
        }
    }
}

/// An origin that reads the request but never answers. Resolves to whether
/// the proxy closed the connection within two seconds, and the body bytes
/// received before that.
async fn silent_origin() -> (u16, JoinHandle<(bool, Vec<u8>)>) {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = origin.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        let (_, mut received) = read_head(&mut socket).await;
        let closed = tokio::time::timeout(Duration::from_secs(2), socket.read_to_end(&mut received)).await;
        (matches!(closed, Ok(Ok(_))), received)
    });
    (port, task)
}

#[test]
fn test_build_request_uses_target_path_and_host() {
    let request = forward_request(
        Method::GET,
        "https://api.example.com/v1/chat?x=1",
        &[("Host", "proxy.local:8080"), ("User-Agent", "Test")],
    );
    let text = head_text(&request, &RequestForm::Origin);

    assert!(text.starts_with("GET /v1/chat?x=1 HTTP/1.1\r\nHost: api.example.com\r\n"));
    assert!(text.contains("User-Agent: Test\r\n"));
    assert!(!text.contains("proxy.local"));
    assert!(text.ends_with("Connection: close\r\n\r\n"));
}

#[test]
fn test_build_request_keeps_non_default_port_in_host() {
    let request = forward_request(Method::POST, "http://example.com:8081/api", &[]);
    let text = head_text(&request, &RequestForm::Origin);

    assert!(text.starts_with("POST /api HTTP/1.1\r\nHost: example.com:8081\r\n"));
}

#[test]
fn test_build_request_default_path() {
    let request = forward_request(Method::GET, "http://example.com", &[]);
    let text = head_text(&request, &RequestForm::Origin);

    assert!(text.starts_with("GET / HTTP/1.1\r\n"));
}

#[test]
fn test_build_request_reframes_chunked_body() {
    let mut request = forward_request(Method::POST, "http://example.com/upload", &[]);
    request.framing = BodyFraming::Chunked;
    let text = head_text(&request, &RequestForm::Origin);

    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
}

#[test]
fn test_build_request_absolute_form_for_plain_proxy() {
    let request = forward_request(Method::GET, "http://example.com/a?b=c#frag", &[]);
    let form = RequestForm::Absolute {
        proxy_authorization: Some("Basic dTpw".into()),
    };
    let text = head_text(&request, &form);

    assert!(text.starts_with("GET http://example.com/a?b=c HTTP/1.1\r\n"));
    assert!(text.contains("Proxy-Authorization: Basic dTpw\r\n"));
}

#[test]
fn test_build_upgrade_request() {
    let mut request = forward_request(
        Method::GET,
        "wss://echo.example.com/socket",
        &[("Sec-WebSocket-Version", "13")],
    );
    request.upgrade = Some("websocket".into());
    let text = head_text(&request, &RequestForm::Origin);

    assert!(text.contains("Connection: Upgrade\r\nUpgrade: websocket\r\n"));
    assert!(!text.contains("Connection: close"));
}

#[tokio::test]
async fn test_forwarder_relays_body_and_response() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = origin.local_addr().unwrap().port();

    let origin_task = tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        let (head, mut body) = read_head(&mut socket).await;
        while body.len() < 5 {
            let mut chunk = [0u8; 16];
            let n = socket.read(&mut chunk).await.unwrap();
            body.extend_from_slice(&chunk[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap();
        socket.write_all(&body).await.unwrap();
        head
    });

    let mut request = forward_request(
        Method::POST,
        &format!("http://127.0.0.1:{port}/echo?x=1"),
        &[("Content-Length", "5"), ("Content-Type", "text/plain")],
    );
    request.framing = BodyFraming::Length(5);

    let (mut proxy_side, mut client_side) = tokio::io::duplex(64 * 1024);
    client_side.write_all(b"lo").await.unwrap();

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    engine
        .forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::from_static(b"hel"),
            },
        )
        .await
        .unwrap();
    drop(proxy_side);

    let mut response = String::new();
    client_side.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 201 Created\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(!response.contains("keep-alive"));
    assert!(response.ends_with("\r\n\r\nhello"));

    let head = origin_task.await.unwrap();
    assert!(head.starts_with(&format!("POST /echo?x=1 HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n")));
    assert!(head.contains("Content-Type: text/plain\r\n"));
}

#[tokio::test]
async fn test_forwarder_reports_unreachable_origin() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let request = forward_request(Method::GET, &format!("http://127.0.0.1:{port}/"), &[]);
    let (mut proxy_side, _client_side) = tokio::io::duplex(1024);

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    let err = engine
        .forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::new(),
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_origin_failure());
}

#[tokio::test]
async fn test_forwarder_splices_upgraded_connection() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = origin.local_addr().unwrap().port();

    let origin_task = tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        let (head, mut early) = read_head(&mut socket).await;
        while early.len() < 4 {
            let mut chunk = [0u8; 16];
            let n = socket.read(&mut chunk).await.unwrap();
            early.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(early, b"ping");
        socket
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\npong")
            .await
            .unwrap();
        head
    });

    let mut request = forward_request(
        Method::GET,
        &format!("ws://127.0.0.1:{port}/socket"),
        &[("Sec-WebSocket-Version", "13")],
    );
    request.upgrade = Some("websocket".into());

    let (mut proxy_side, mut client_side) = tokio::io::duplex(64 * 1024);
    client_side.shutdown().await.unwrap();

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    engine
        .forward_upgrade(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::from_static(b"ping"),
            },
        )
        .await
        .unwrap();
    drop(proxy_side);

    let mut out = String::new();
    client_side.read_to_string(&mut out).await.unwrap();
    assert_eq!(
        out,
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\npong"
    );

    let head = origin_task.await.unwrap();
    assert!(head.starts_with("GET /socket HTTP/1.1\r\n"));
    assert!(head.contains("Connection: Upgrade\r\nUpgrade: websocket\r\n"));
}

#[tokio::test]
async fn test_forwarder_uses_absolute_form_through_plain_upstream_proxy() {
    let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy.local_addr().unwrap();

    let proxy_task = tokio::spawn(async move {
        let (mut socket, _) = proxy.accept().await.unwrap();
        let (head, _) = read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
        head
    });

    let egress = EgressProxies::from_config(&UpstreamConfig {
        http_proxy: Some(format!("http://user:pass@{proxy_addr}")),
        ..Default::default()
    })
    .unwrap();
    let engine = HttpForwarder::new(Connector::new(true, egress));

    let request = forward_request(Method::GET, "http://api.example.com/status", &[]);
    let (mut proxy_side, mut client_side) = tokio::io::duplex(4096);
    engine
        .forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::new(),
            },
        )
        .await
        .unwrap();
    drop(proxy_side);

    let mut response = String::new();
    client_side.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));

    let head = proxy_task.await.unwrap();
    assert!(head.starts_with("GET http://api.example.com/status HTTP/1.1\r\nHost: api.example.com\r\n"));
    assert!(head.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
}

#[tokio::test]
async fn test_forwarder_closes_origin_when_client_hangs_up() {
    let (port, origin_task) = silent_origin().await;

    let request = forward_request(Method::GET, &format!("http://127.0.0.1:{port}/slow"), &[]);
    let (mut proxy_side, client_side) = tokio::io::duplex(4096);

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    let (res, ()) = tokio::join!(
        engine.forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::new(),
            },
        ),
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(client_side);
        },
    );

    assert!(matches!(res, Err(EngineError::ClientDisconnected)));
    let (closed, _) = origin_task.await.unwrap();
    assert!(closed, "origin connection left open after client hangup");
}

#[tokio::test]
async fn test_forwarder_aborts_truncated_request_body() {
    let (port, origin_task) = silent_origin().await;

    let mut request = forward_request(
        Method::POST,
        &format!("http://127.0.0.1:{port}/upload"),
        &[("Content-Length", "100")],
    );
    request.framing = BodyFraming::Length(100);
    let (mut proxy_side, client_side) = tokio::io::duplex(4096);

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    let (res, ()) = tokio::join!(
        engine.forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::from_static(b"0123456789"),
            },
        ),
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(client_side);
        },
    );

    assert!(matches!(res, Err(EngineError::ClientDisconnected)));
    let (closed, received) = origin_task.await.unwrap();
    assert!(closed, "origin connection left open after a short body");
    assert_eq!(received, b"0123456789");
}

#[tokio::test]
async fn test_forwarder_relays_chunked_body_verbatim() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = origin.local_addr().unwrap().port();

    let origin_task = tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        let (head, mut body) = read_head(&mut socket).await;
        while !body.ends_with(b"0\r\n\r\n") {
            let mut chunk = [0u8; 64];
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "proxy closed mid-body");
            body.extend_from_slice(&chunk[..n]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        (head, body)
    });

    let mut request = forward_request(Method::POST, &format!("http://127.0.0.1:{port}/stream"), &[]);
    request.framing = BodyFraming::Chunked;

    let (mut proxy_side, mut client_side) = tokio::io::duplex(4096);
    client_side.write_all(b"lo\r\n0\r\n\r\n").await.unwrap();

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    engine
        .forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::from_static(b"5\r\nhel"),
            },
        )
        .await
        .unwrap();
    drop(proxy_side);

    let mut response = String::new();
    client_side.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("\r\n\r\nok"));

    let (head, body) = origin_task.await.unwrap();
    assert!(head.contains("Transfer-Encoding: chunked\r\n"));
    assert_eq!(body, b"5\r\nhello\r\n0\r\n\r\n");
}

#[tokio::test]
async fn test_forwarder_relays_refused_upgrade() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = origin.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 4\r\n\r\nnope")
            .await
            .unwrap();
    });

    let mut request = forward_request(Method::GET, &format!("ws://127.0.0.1:{port}/socket"), &[]);
    request.upgrade = Some("websocket".into());

    // The client stays open, as a real client waiting for a 101 would.
    let (mut proxy_side, mut client_side) = tokio::io::duplex(4096);

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    engine
        .forward_upgrade(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::new(),
            },
        )
        .await
        .unwrap();
    drop(proxy_side);

    let mut out = String::new();
    client_side.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "HTTP/1.1 403 Forbidden\r\nContent-Length: 4\r\n\r\nnope");
}

#[tokio::test]
async fn test_forwarder_rejects_oversized_response_head() {
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = origin.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = origin.accept().await.unwrap();
        read_head(&mut socket).await;
        let mut head = b"HTTP/1.1 200 OK\r\n".to_vec();
        for i in 0..128 {
            head.extend_from_slice(format!("X-Fill-{i}: {}\r\n", "a".repeat(600)).as_bytes());
        }
        socket.write_all(&head).await.unwrap();
        // Hold the connection open without ever ending the head.
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest).await;
    });

    let request = forward_request(Method::GET, &format!("http://127.0.0.1:{port}/"), &[]);
    let (mut proxy_side, _client_side) = tokio::io::duplex(4096);

    let engine = HttpForwarder::new(Connector::new(true, EgressProxies::default()));
    let err = engine
        .forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::new(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Protocol(_)));
}

#[tokio::test]
async fn test_forwarder_tunnels_https_target_through_upstream_proxy() {
    let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy.local_addr().unwrap();

    let proxy_task = tokio::spawn(async move {
        let (mut socket, _) = proxy.accept().await.unwrap();
        let (head, _) = read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await
            .unwrap();
        // First byte of a TLS ClientHello record.
        let first = socket.read_u8().await.unwrap();
        (head, first)
    });

    let egress = EgressProxies::from_config(&UpstreamConfig {
        https_proxy: Some(format!("http://{proxy_addr}")),
        ..Default::default()
    })
    .unwrap();
    let engine = HttpForwarder::new(Connector::new(true, egress));

    let request = forward_request(Method::GET, "https://api.example.com/v1/models", &[]);
    let (mut proxy_side, _client_side) = tokio::io::duplex(4096);
    let err = engine
        .forward(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::new(),
            },
        )
        .await
        .unwrap_err();

    // The fake proxy hangs up instead of relaying the handshake.
    assert!(matches!(err, EngineError::Tls { .. }));

    let (head, first) = proxy_task.await.unwrap();
    assert!(head.starts_with("CONNECT api.example.com:443 HTTP/1.1\r\n"));
    assert_eq!(first, 0x16);
}

#[tokio::test]
async fn test_forwarder_tunnels_upgrade_through_plain_upstream_proxy() {
    let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy.local_addr().unwrap();

    let proxy_task = tokio::spawn(async move {
        let (mut socket, _) = proxy.accept().await.unwrap();
        let (connect, _) = read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await
            .unwrap();
        let (tunnelled, _) = read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        (connect, tunnelled)
    });

    let egress = EgressProxies::from_config(&UpstreamConfig {
        http_proxy: Some(format!("http://{proxy_addr}")),
        ..Default::default()
    })
    .unwrap();
    let engine = HttpForwarder::new(Connector::new(true, egress));

    let mut request = forward_request(Method::GET, "ws://echo.example.com/socket", &[]);
    request.upgrade = Some("websocket".into());
    let (mut proxy_side, mut client_side) = tokio::io::duplex(4096);
    engine
        .forward_upgrade(
            request,
            ClientIo {
                stream: &mut proxy_side,
                buffered: Bytes::new(),
            },
        )
        .await
        .unwrap();
    drop(proxy_side);

    let mut out = String::new();
    client_side.read_to_string(&mut out).await.unwrap();
    assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));

    let (connect, tunnelled) = proxy_task.await.unwrap();
    assert!(connect.starts_with("CONNECT echo.example.com:80 HTTP/1.1\r\n"));
    assert!(tunnelled.starts_with("GET /socket HTTP/1.1\r\nHost: echo.example.com\r\n"));
    assert!(tunnelled.contains("Upgrade: websocket\r\n"));
}
