//! Listener-side transport
//!
//! A [`Transport`] is either plain TCP or TLS-terminating. [`serve`] runs
//! the accept loop, handing each connection to hyper on its own tracked
//! task until the listening token is cancelled.

pub mod tls;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TlsSettings;
use crate::error::Result;
use crate::tracker::ConnectionTracker;

pub use tls::TlsMaterial;

/// Plain or TLS-terminating transport
#[derive(Clone)]
pub enum Transport {
    Plain,
    Tls(TlsAcceptor),
}

impl Transport {
    /// Plain transport without TLS settings, TLS otherwise. Unreadable or
    /// invalid certificate material is an error.
    pub fn new(https: Option<&TlsSettings>, cert_dir: &std::path::Path) -> Result<Self> {
        match https {
            None => Ok(Transport::Plain),
            Some(settings) => {
                let config = TlsMaterial::resolve(settings, cert_dir)?.server_config()?;
                Ok(Transport::Tls(TlsAcceptor::from(Arc::new(config))))
            }
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Plain => "http",
            Transport::Tls(_) => "https",
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

/// Accept connections on `listener` until `listening` is cancelled.
///
/// Connections already open when the token fires keep being served; only
/// [`ConnectionTracker::force_close_all`] ends them.
pub async fn serve(
    listener: TcpListener,
    transport: Transport,
    router: Router,
    tracker: ConnectionTracker,
    listening: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = listening.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Accept failed: {}", err);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
        };

        let _ = stream.set_nodelay(true);
        let transport = transport.clone();
        let router = router.clone();
        let accepted = tracker.spawn(async move {
            match transport {
                Transport::Plain => serve_connection(stream, router, peer).await,
                Transport::Tls(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, router, peer).await,
                    Err(err) => debug!("TLS handshake with {} failed: {}", peer, err),
                },
            }
        });
        if !accepted {
            break;
        }
    }
    debug!("Listener closed");
}

async fn serve_connection<S>(stream: S, router: Router, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(router);
    let builder = auto::Builder::new(TokioExecutor::new());
    if let Err(err) = builder
        .serve_connection_with_upgrades(TokioIo::new(stream), service)
        .await
    {
        debug!("Connection from {} ended with error: {}", peer, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_cert_dir;

    #[test]
    fn test_plain_without_settings() {
        let transport = Transport::new(None, &default_cert_dir()).unwrap();
        assert_eq!(transport.scheme(), "http");
        assert!(!transport.is_tls());
    }

    #[test]
    fn test_tls_from_bundled_material() {
        let settings = TlsSettings::default();
        let transport = Transport::new(Some(&settings), &default_cert_dir()).unwrap();
        assert_eq!(transport.scheme(), "https");
    }

    #[test]
    fn test_tls_without_material_is_fatal() {
        let settings = TlsSettings::default();
        let missing = std::path::Path::new("/nonexistent/certs");
        assert!(Transport::new(Some(&settings), missing).is_err());
    }
}
