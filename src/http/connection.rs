use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::{BodyFraming, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::stream::ClientStream;
use crate::http::writer::ResponseWriter;
use crate::proxy::dispatcher::{Dispatcher, Disposition, InboundRequest};

pub struct Connection<S> {
    stream: S,
    secure: bool,
    dispatcher: Arc<Dispatcher>,
    buffer: BytesMut,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Dispatching(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl<S: ClientStream> Connection<S> {
    /// `secure` tells the dispatcher the client reached us over TLS.
    pub fn new(stream: S, secure: bool, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            stream,
            secure,
            dispatcher,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        ReadOutcome::Request(req) => ConnectionState::Dispatching(req),
                        ReadOutcome::Malformed(e) => {
                            info!(error = %e, "malformed request");
                            let response = Response::json_error(
                                StatusCode::BadRequest,
                                "Bad request",
                                Some(&e.to_string()),
                            );
                            ConnectionState::Writing(ResponseWriter::new(&response), false)
                        }
                        ReadOutcome::Eof => ConnectionState::Closed,
                    };
                }

                ConnectionState::Dispatching(req) => {
                    self.state = self.dispatch(req).await;
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    }
                }

                ConnectionState::Closed => {
                    let _ = self.stream.shutdown().await;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, req: Request) -> ConnectionState {
        let dispatcher = Arc::clone(&self.dispatcher);

        if req.is_upgrade() {
            dispatcher
                .handle_upgrade(InboundRequest {
                    request: req,
                    secure: self.secure,
                    stream: &mut self.stream,
                    buffered: &mut self.buffer,
                })
                .await;
            return ConnectionState::Closed;
        }

        // An unread body would be parsed as the next request.
        let keep_alive = req.keep_alive() && req.body_framing() == BodyFraming::None;

        let disposition = dispatcher
            .handle_request(InboundRequest {
                request: req,
                secure: self.secure,
                stream: &mut self.stream,
                buffered: &mut self.buffer,
            })
            .await;

        match disposition {
            Disposition::Respond(response) => {
                ConnectionState::Writing(ResponseWriter::new(&response), keep_alive)
            }
            Disposition::RespondAndClose(response) => {
                ConnectionState::Writing(ResponseWriter::new(&response), false)
            }
            Disposition::Close => ConnectionState::Closed,
        }
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    let _ = self.buffer.split_to(consumed);
                    debug!(method = %request.method, path = %request.path, "request received");
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {}

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;

            if n == 0 {
                // Client closed connection
                if !self.buffer.is_empty() {
                    debug!(pending = self.buffer.len(), "client closed mid-request");
                }
                return Ok(ReadOutcome::Eof);
            }
        }
    }
}
