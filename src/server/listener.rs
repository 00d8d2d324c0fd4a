use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{Config, TlsMaterial};
use crate::http::connection::Connection;
use crate::proxy::dispatcher::Dispatcher;
use crate::server::tls::load_acceptor;

/// Runs the plaintext listener and, when TLS material is complete, the HTTPS
/// listener. Returns only if binding fails.
pub async fn run(cfg: Arc<Config>, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let http_addr = cfg.http_addr()?;
    let http = TcpListener::bind(http_addr).await?;
    info!("Listening on http://{}", http_addr);

    let https = match (cfg.https_addr()?, cfg.tls_material()) {
        (Some(addr), TlsMaterial::Ready { cert_path, key_path, ca_path }) => {
            let acceptor = load_acceptor(cert_path, key_path, ca_path.map(|p| p.as_path()))?;
            let listener = TcpListener::bind(addr).await?;
            info!("Listening on https://{}", addr);
            Some((listener, acceptor))
        }
        _ => None,
    };

    let plain = serve_plain(http, Arc::clone(&dispatcher));
    match https {
        Some((listener, acceptor)) => {
            tokio::join!(plain, serve_tls(listener, acceptor, dispatcher));
        }
        None => plain.await,
    }
    Ok(())
}

async fn serve_plain(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        if let Err(e) = socket.set_nodelay(true) {
            debug!(%peer, "set_nodelay failed: {}", e);
        }

        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(
            async move {
                let mut conn = Connection::new(socket, false, dispatcher);
                if let Err(e) = conn.run().await {
                    error!("Connection error: {}", e);
                }
            }
            .instrument(conn_span(peer, "http")),
        );
    }
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, dispatcher: Arc<Dispatcher>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        if let Err(e) = socket.set_nodelay(true) {
            debug!(%peer, "set_nodelay failed: {}", e);
        }

        let acceptor = acceptor.clone();
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(
            async move {
                let stream = match acceptor.accept(socket).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("TLS handshake failed: {}", e);
                        return;
                    }
                };
                let mut conn = Connection::new(stream, true, dispatcher);
                if let Err(e) = conn.run().await {
                    error!("Connection error: {}", e);
                }
            }
            .instrument(conn_span(peer, "https")),
        );
    }
}

fn conn_span(peer: SocketAddr, scheme: &'static str) -> tracing::Span {
    info_span!("conn", %peer, scheme)
}
