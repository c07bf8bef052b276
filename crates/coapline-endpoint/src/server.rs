use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use coapline_message::{decode_datagram, Message, MessageType, MAX_PACKET_LEN};
use coapline_transport::{Addr, Conn, ConnConfig, Network, StreamListener, TransportError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler::{Handler, RequestContext};
use crate::reliability::{Dedup, DedupCache};

/// Runs a [`Handler`] over a transport handle or listener.
///
/// Cloning is cheap; clones share the handler and the duplicate cache.
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    config: ServerConfig,
    dedup: Arc<DedupCache>,
}

impl Server {
    pub fn new<H: Handler + 'static>(handler: H) -> Self {
        let config = ServerConfig::default();
        Self {
            handler: Arc::new(handler),
            dedup: Arc::new(DedupCache::new(config.dedup_window)),
            config,
        }
    }

    /// Replace the configuration. Resets the duplicate cache.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.dedup = Arc::new(DedupCache::new(config.dedup_window));
        self.config = config;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dedup_cache(&self) -> &DedupCache {
        &self.dedup
    }

    fn conn_config(&self) -> ConnConfig {
        ConnConfig {
            read_timeout: self.config.params.ack_timeout,
            max_frame_size: self.config.max_frame_size,
        }
    }

    /// Bind `addr` on `network` and serve until a fatal error.
    pub async fn listen_and_serve(&self, network: Network, addr: &str) -> Result<()> {
        match network {
            Network::Udp => {
                let conn = Conn::bind_udp(addr).await?.with_config(self.conn_config());
                info!(addr = %conn.local_addr()?, "serving udp");
                self.serve(Arc::new(conn)).await
            }
            Network::Tcp => {
                let listener = StreamListener::bind(addr)
                    .await?
                    .with_config(self.conn_config());
                self.serve_listener(&listener).await
            }
        }
    }

    /// Serve an existing handle until it is closed or fails.
    ///
    /// A UDP handle runs the datagram loop. A TCP handle is served as a
    /// single connection.
    pub async fn serve(&self, conn: Arc<Conn>) -> Result<()> {
        match conn.network() {
            Network::Udp => self.serve_datagrams(conn).await,
            Network::Tcp => {
                serve_stream(conn, Arc::clone(&self.handler), self.config.transient_pause).await
            }
        }
    }

    /// Accept connections and serve each one on its own task.
    ///
    /// Returns `Ok(())` once the listener is closed.
    pub async fn serve_listener(&self, listener: &StreamListener) -> Result<()> {
        loop {
            let conn = match listener.accept().await {
                Ok(conn) => Arc::new(conn),
                Err(TransportError::Closed) => return Ok(()),
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "transient accept error");
                    tokio::time::sleep(self.config.transient_pause).await;
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "accept failed, stopping listener");
                    return Err(err.into());
                }
            };
            let handler = Arc::clone(&self.handler);
            let pause = self.config.transient_pause;
            tokio::spawn(async move {
                let remote = conn.peer_addr();
                if let Err(err) = serve_stream(conn, handler, pause).await {
                    warn!(
                        remote = %remote.map(|a| a.to_string()).unwrap_or_default(),
                        error = %err,
                        "connection torn down"
                    );
                }
            });
        }
    }

    async fn serve_datagrams(&self, conn: Arc<Conn>) -> Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_LEN];
        let sweep_every = self.dedup.window().max(Duration::from_secs(1));
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let received = tokio::select! {
                _ = sweep.tick() => {
                    let purged = self.dedup.purge_expired();
                    if purged > 0 {
                        debug!(purged, remaining = self.dedup.len(), "dedup cache swept");
                    }
                    continue;
                }
                received = conn.recv_datagram(&mut buf) => received,
            };
            match received {
                Ok((len, from)) => {
                    let packet = Bytes::copy_from_slice(&buf[..len]);
                    let conn = Arc::clone(&conn);
                    let handler = Arc::clone(&self.handler);
                    let dedup = Arc::clone(&self.dedup);
                    tokio::spawn(async move {
                        handle_datagram(&conn, handler.as_ref(), &dedup, packet, from).await;
                    });
                }
                Err(TransportError::Closed) => {
                    debug!("udp handle closed, stopping server");
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "transient receive error");
                    tokio::time::sleep(self.config.transient_pause).await;
                }
                Err(err) => {
                    error!(error = %err, "receive failed, stopping server");
                    return Err(err.into());
                }
            }
        }
    }
}

async fn handle_datagram(
    conn: &Conn,
    handler: &dyn Handler,
    dedup: &DedupCache,
    packet: Bytes,
    from: SocketAddr,
) {
    let msg = match decode_datagram(&packet) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(remote = %from, len = packet.len(), error = %err, "dropping malformed datagram");
            return;
        }
    };
    let remote = Addr::Udp(from);
    debug!(
        remote = %from,
        message_id = msg.message_id,
        kind = msg.message_type.short_name(),
        code = %msg.code,
        "datagram received"
    );

    match msg.message_type {
        MessageType::Acknowledgement | MessageType::Reset => {
            debug!(remote = %from, message_id = msg.message_id, "ignoring ack/reset");
            return;
        }
        MessageType::Confirmable if msg.is_empty() => {
            debug!(remote = %from, message_id = msg.message_id, "ping");
            if let Err(err) = conn
                .transmit(Some(&remote), &Message::reset(msg.message_id))
                .await
            {
                warn!(remote = %from, error = %err, "failed to answer ping");
            }
            return;
        }
        MessageType::Confirmable => {
            if let Dedup::Duplicate(cached) = dedup.check(from, msg.message_id) {
                debug!(
                    remote = %from,
                    message_id = msg.message_id,
                    replay = cached.is_some(),
                    "duplicate confirmable"
                );
                if let Some(bytes) = cached {
                    if let Err(err) = conn.send(Some(&remote), &bytes).await {
                        warn!(remote = %from, error = %err, "failed to replay response");
                    }
                }
                return;
            }
        }
        MessageType::NonConfirmable => {}
    }

    let ctx = RequestContext::new(conn, remote);
    let Some(response) = handler.serve(&ctx, &msg) else {
        return;
    };
    let bytes = match conn.encode(&response) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(remote = %from, message_id = msg.message_id, error = %err, "dropping unencodable response");
            return;
        }
    };
    if msg.is_confirmable() {
        dedup.record_response(from, msg.message_id, bytes.clone());
    }
    if let Err(err) = conn.send(Some(&remote), &bytes).await {
        warn!(remote = %from, error = %err, "failed to send response");
    }
}

/// Serve one stream connection, strictly in order, until EOF or close.
async fn serve_stream(conn: Arc<Conn>, handler: Arc<dyn Handler>, pause: Duration) -> Result<()> {
    loop {
        let (msg, remote) = match conn.receive().await {
            Ok(received) => received,
            Err(TransportError::Closed) | Err(TransportError::ConnectionClosed) => {
                debug!("stream ended");
                return Ok(());
            }
            Err(err) if err.is_transient() => {
                tokio::time::sleep(pause).await;
                continue;
            }
            Err(TransportError::Codec(err)) => {
                warn!(error = %err, "malformed frame, closing connection");
                if let Err(close_err) = conn.close().await {
                    debug!(error = %close_err, "close after codec error failed");
                }
                return Err(Error::Codec(err));
            }
            Err(err) => return Err(err.into()),
        };
        debug!(
            remote = %remote,
            code = %msg.code,
            token_len = msg.token.len(),
            "frame received"
        );
        if msg.is_empty() || msg.code.is_signal() {
            debug!(remote = %remote, code = %msg.code, "ignoring empty or signalling frame");
            continue;
        }
        let ctx = RequestContext::new(&conn, remote);
        if let Some(response) = handler.serve(&ctx, &msg) {
            conn.transmit(None, &response).await?;
        }
    }
}

/// Serve `handler` on an existing handle with the default configuration.
pub async fn serve<H: Handler + 'static>(conn: Arc<Conn>, handler: H) -> Result<()> {
    Server::new(handler).serve(conn).await
}

/// Bind `addr` on the transport named `network` (`"udp"` or `"tcp"`) and
/// serve `handler` until a fatal error.
pub async fn listen_and_serve<H: Handler + 'static>(
    network: &str,
    addr: &str,
    handler: H,
) -> Result<()> {
    let network = network
        .parse::<Network>()
        .map_err(|err| Error::Configuration(err.to_string()))?;
    Server::new(handler).listen_and_serve(network, addr).await
}
