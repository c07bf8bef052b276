use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::addr::resolve;
use crate::conn::{Conn, ConnConfig};
use crate::error::{Result, TransportError};

/// Accepts TCP connections and wraps each one in a [`Conn`].
pub struct StreamListener {
    listener: TcpListener,
    config: ConnConfig,
    closed: CancellationToken,
}

impl StreamListener {
    /// Bind and listen on `addr`.
    pub async fn bind(addr: &str) -> Result<Self> {
        let bind_err = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let local = resolve(addr).await.map_err(bind_err)?;
        let listener = TcpListener::bind(local).await.map_err(bind_err)?;
        info!(addr = %listener.local_addr()?, "listening on tcp");
        Ok(Self {
            listener,
            config: ConnConfig::default(),
            closed: CancellationToken::new(),
        })
    }

    /// Configuration applied to every accepted connection.
    pub fn with_config(mut self, config: ConnConfig) -> Self {
        self.config = config;
        self
    }

    /// Wait for the next connection.
    ///
    /// Returns [`TransportError::Closed`] once [`StreamListener::close`] has
    /// been called.
    pub async fn accept(&self) -> Result<Conn> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let (stream, peer) = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            accepted = self.listener.accept() => accepted.map_err(TransportError::Accept)?,
        };
        debug!(%peer, "accepted connection");
        Ok(Conn::from_tcp_stream(stream)?.with_config(self.config.clone()))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Stop accepting. Connections already handed out are unaffected.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
