//! Socket binding and the connection accept loop.

use crate::error::ServerError;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// Resolve `host:port` to one socket address, preferring IPv4.
pub async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ServerError::Resolve(format!("{}:{} ({})", host, port, e)))?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ServerError::Resolve(format!("{}:{}", host, port)))
}

/// Bind a listener. No other port is tried on failure.
pub(crate) async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = resolve_addr(host, port).await?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accept connections until `shutdown` flips to `true`.
///
/// Each connection is served with HTTP/1.1, plus HTTP/2 (h2 over TLS or
/// prior-knowledge h2c) when `http2` is on. Open connections finish their
/// in-flight requests after shutdown.
pub(crate) fn spawn(
    listener: TcpListener,
    router: Router,
    tls: Option<TlsAcceptor>,
    http2: bool,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    tracing::trace!(%peer, "connection accepted");

                    let router = router.clone();
                    let tls = tls.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        match tls {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => serve_connection(stream, router, http2, shutdown).await,
                                Err(e) => tracing::debug!(%peer, "TLS handshake failed: {}", e),
                            },
                            None => serve_connection(stream, router, http2, shutdown).await,
                        }
                    });
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("listener closed");
    })
}

async fn serve_connection<S>(
    stream: S,
    router: Router,
    http2: bool,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let builder = auto::Builder::new(TokioExecutor::new());
    #[cfg(feature = "http2")]
    let builder = if http2 { builder } else { builder.http1_only() };
    #[cfg(not(feature = "http2"))]
    let builder = {
        let _ = http2;
        builder.http1_only()
    };

    let service = TowerToHyperService::new(router);
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!("connection error: {}", e);
            }
        }
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                tracing::debug!("connection error during shutdown: {}", e);
            }
        }
    }
}
