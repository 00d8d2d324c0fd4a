//! Origin connection and request forwarding
//!
//! This module connects to the target origin and relays the exchange:
//! request head and body upstream, response head and body back to the client,
//! or a spliced duplex stream for upgraded connections.

use std::io::Cursor;

use anyhow::Context;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::headers::Headers;
use crate::http::parser::{MAX_HEAD_LEN, find_headers_end};
use crate::http::request::BodyFraming;
use crate::proxy::connector::{Connector, RequestForm};
use crate::proxy::engine::{ClientIo, EngineError, ForwardRequest, ForwardingEngine};

/// Status line and headers of an origin response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = format!("{} {} {}\r\n", self.version, self.status, self.reason).into_bytes();
        for (k, v) in self.headers.iter() {
            buf.extend_from_slice(format!("{}: {}\r\n", k, v).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// The concrete forwarding engine: HTTP/1.1 over TCP or TLS.
///
/// Every exchange uses a fresh origin connection with `Connection: close`;
/// there is no pooling.
pub struct HttpForwarder {
    connector: Connector,
}

impl HttpForwarder {
    pub fn new(connector: Connector) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ForwardingEngine for HttpForwarder {
    async fn forward(&self, request: ForwardRequest, client: ClientIo<'_>) -> Result<(), EngineError> {
        let (origin, form) = self.connector.connect(&request.target, false).await?;
        let head = build_request_head(&request, &form);

        tracing::debug!(
            method = %request.method,
            target = %request.target,
            "Connected to origin"
        );

        let (mut origin_rd, mut origin_wr) = tokio::io::split(origin);
        origin_wr.write_all(&head).await?;
        origin_wr.flush().await?;

        let ClientIo { stream, buffered } = client;
        let (client_rd, mut client_wr) = tokio::io::split(stream);
        let mut body = Cursor::new(buffered).chain(client_rd);

        let limit = match request.framing {
            BodyFraming::None => Some(0),
            BodyFraming::Length(n) => Some(n),
            // Relayed verbatim until the response ends or the client leaves.
            BodyFraming::Chunked => None,
        };
        let client_gone = async {
            match upload_body(&mut body, &mut origin_wr, limit).await {
                Ok(()) => {}
                Err(UploadError::Client) => return,
                Err(UploadError::Origin(e)) => {
                    tracing::debug!(error = %e, "origin stopped reading the request body");
                }
            }
            wait_for_hangup(&mut body).await;
        };

        // Either way the origin connection is dropped on return.
        tokio::select! {
            biased;
            res = relay_response(&mut origin_rd, &mut client_wr) => res,
            () = client_gone => Err(EngineError::ClientDisconnected),
        }
    }

    async fn forward_upgrade(
        &self,
        request: ForwardRequest,
        client: ClientIo<'_>,
    ) -> Result<(), EngineError> {
        let (mut origin, form) = self.connector.connect(&request.target, true).await?;
        let head = build_request_head(&request, &form);

        origin.write_all(&head).await?;
        if !client.buffered.is_empty() {
            origin.write_all(&client.buffered).await?;
        }
        origin.flush().await?;

        let (response, leftover) = read_response_head(&mut origin).await?;
        let switched = response.status == 101;
        tracing::debug!(
            target = %request.target,
            status = response.status,
            "Origin answered upgrade request"
        );

        let stream = client.stream;
        stream.write_all(&response.to_bytes()).await?;
        stream.write_all(&leftover).await?;
        stream.flush().await?;

        if switched {
            let (up, down) = tokio::io::copy_bidirectional(stream, &mut origin).await?;
            tracing::debug!(target = %request.target, up, down, "Upgraded connection closed");
        } else {
            let (mut client_rd, mut client_wr) = tokio::io::split(stream);
            let copied = tokio::select! {
                biased;
                res = tokio::io::copy(&mut origin, &mut client_wr) => res,
                () = wait_for_hangup(&mut client_rd) => return Err(EngineError::ClientDisconnected),
            };
            copied?;
            client_wr.flush().await?;
        }
        Ok(())
    }
}

enum UploadError {
    /// The client closed or failed before the body was complete.
    Client,
    Origin(std::io::Error),
}

/// Copies the request body to the origin.
///
/// `limit` is the announced length; `None` copies until the client closes,
/// which always counts as the client leaving.
async fn upload_body<R, W>(body: &mut R, origin: &mut W, limit: Option<u64>) -> Result<(), UploadError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut remaining = limit;
    let mut buf = vec![0u8; 8192];

    loop {
        let want = match remaining {
            Some(0) => break,
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX).min(buf.len()),
            None => buf.len(),
        };
        let n = match body.read(&mut buf[..want]).await {
            Ok(0) | Err(_) => return Err(UploadError::Client),
            Ok(n) => n,
        };
        origin.write_all(&buf[..n]).await.map_err(UploadError::Origin)?;
        origin.flush().await.map_err(UploadError::Origin)?;
        if let Some(left) = remaining.as_mut() {
            *left -= n as u64;
        }
    }
    Ok(())
}

/// Reads and discards client bytes until the client closes or errors.
async fn wait_for_hangup<R>(client: &mut R)
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut scratch = [0u8; 1024];
    loop {
        match client.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Builds the outbound request head.
///
/// The request-target comes from the validated target, never from the inbound
/// path, and `Host` is rewritten to the target's authority.
pub fn build_request_head(request: &ForwardRequest, form: &RequestForm) -> Vec<u8> {
    let mut buffer = Vec::new();

    let request_target = match form {
        RequestForm::Origin => request.target.path_and_query(),
        RequestForm::Absolute { .. } => request.target.absolute_form(),
    };
    buffer.extend_from_slice(
        format!("{} {} HTTP/1.1\r\n", request.method, request_target).as_bytes(),
    );

    buffer.extend_from_slice(format!("Host: {}\r\n", request.target.authority()).as_bytes());
    for (key, value) in request.headers.iter() {
        if key.eq_ignore_ascii_case("host") {
            continue;
        }
        buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
    }

    if request.framing == BodyFraming::Chunked {
        buffer.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
    }
    if let RequestForm::Absolute { proxy_authorization: Some(auth) } = form {
        buffer.extend_from_slice(format!("Proxy-Authorization: {}\r\n", auth).as_bytes());
    }

    match &request.upgrade {
        Some(protocol) => {
            buffer.extend_from_slice(b"Connection: Upgrade\r\n");
            buffer.extend_from_slice(format!("Upgrade: {}\r\n", protocol).as_bytes());
        }
        None => buffer.extend_from_slice(b"Connection: close\r\n"),
    }

    // End of headers
    buffer.extend_from_slice(b"\r\n");
    buffer
}

/// Reads the origin's response head and relays the response to the client.
///
/// The origin's connection-management headers are replaced by
/// `Connection: close`; everything after the head is copied untouched until
/// the origin closes.
async fn relay_response<R, W>(origin: &mut R, client: &mut W) -> Result<(), EngineError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let (mut head, leftover) = read_response_head(origin).await?;
    head.headers.remove("Connection");
    head.headers.remove("Keep-Alive");
    head.headers.remove("Proxy-Connection");
    head.headers.append("Connection", "close");

    tracing::info!(status = head.status, "Origin responded");

    client.write_all(&head.to_bytes()).await?;
    client.write_all(&leftover).await?;
    tokio::io::copy(origin, client).await?;
    client.flush().await?;
    Ok(())
}

/// Reads until the end of the response head.
///
/// Returns the parsed head and any body bytes read past it.
pub async fn read_response_head<R>(stream: &mut R) -> Result<(ResponseHead, BytesMut), EngineError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = BytesMut::with_capacity(8192);

    loop {
        let n = stream.read_buf(&mut buffer).await?;

        if let Some(headers_end) = find_headers_end(&buffer) {
            let head_bytes = buffer.split_to(headers_end + 4);
            let head = parse_response_head(&head_bytes)?;
            return Ok((head, buffer));
        }

        if n == 0 {
            return Err(EngineError::Protocol(
                "origin closed the connection before sending a response".into(),
            ));
        }

        // Prevent unbounded header growth
        if buffer.len() > MAX_HEAD_LEN {
            return Err(EngineError::Protocol("response head too large".into()));
        }
    }
}

/// Parses a response status line and headers.
pub fn parse_response_head(head_bytes: &[u8]) -> Result<ResponseHead, EngineError> {
    let parsed = (|| -> anyhow::Result<ResponseHead> {
        let text = std::str::from_utf8(head_bytes).context("response head is not UTF-8")?;
        let mut lines = text.split("\r\n");

        let status_line = lines.next().context("empty response")?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            anyhow::bail!("invalid status line: {status_line}");
        }
        let status: u16 = parts
            .next()
            .context("missing status code")?
            .parse()
            .context("invalid status code")?;
        let reason = parts.next().unwrap_or_default();

        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.append(key.trim(), value.trim());
            }
        }

        Ok(ResponseHead {
            version: version.to_string(),
            status,
            reason: reason.to_string(),
            headers,
        })
    })();

    parsed.map_err(|e| EngineError::Protocol(format!("{e:#}")))
}
