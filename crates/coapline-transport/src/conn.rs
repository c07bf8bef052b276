use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use coapline_message::{
    decode_datagram, decode_stream, encode_datagram, encode_stream, Message, DEFAULT_MAX_FRAME_SIZE,
    MAX_PACKET_LEN,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::addr::{resolve, Addr, Network};
use crate::error::{Result, TransportError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Transport handle configuration.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// Deadline applied by [`Conn::receive`]. Default: 2 s.
    pub read_timeout: Duration,
    /// Largest stream frame accepted. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// A transport handle: either a UDP socket or a connected TCP stream.
///
/// Closing the handle with [`Conn::close`] makes every pending and future
/// receive fail with [`TransportError::Closed`].
pub struct Conn {
    inner: ConnInner,
    config: ConnConfig,
    closed: CancellationToken,
}

enum ConnInner {
    Udp(UdpInner),
    Tcp(TcpInner),
}

struct UdpInner {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

struct TcpInner {
    reader: Mutex<TcpReader>,
    writer: Mutex<OwnedWriteHalf>,
    local: SocketAddr,
    peer: SocketAddr,
}

struct TcpReader {
    half: OwnedReadHalf,
    buf: BytesMut,
}

impl Conn {
    /// Open a client handle to `addr`.
    ///
    /// For UDP this binds an ephemeral local port and connects it to the
    /// peer, so replies from other sources are filtered by the kernel.
    pub async fn dial(network: Network, addr: &str) -> Result<Self> {
        let target = resolve(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let connect_err = |source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        };

        match network {
            Network::Udp => {
                let local: SocketAddr = if target.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = UdpSocket::bind(local).await.map_err(connect_err)?;
                socket.connect(target).await.map_err(connect_err)?;
                debug!(peer = %target, "dialed udp");
                Ok(Self::from_udp(socket, Some(target)))
            }
            Network::Tcp => {
                let stream = TcpStream::connect(target).await.map_err(connect_err)?;
                debug!(peer = %target, "dialed tcp");
                Self::from_tcp_stream(stream)
            }
        }
    }

    /// Bind an unconnected UDP handle for serving.
    pub async fn bind_udp(addr: &str) -> Result<Self> {
        let bind_err = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let local = resolve(addr).await.map_err(bind_err)?;
        let socket = UdpSocket::bind(local).await.map_err(bind_err)?;
        info!(addr = %socket.local_addr()?, "listening on udp");
        Ok(Self::from_udp(socket, None))
    }

    /// Wrap an existing UDP socket. `peer` is the connected remote, if any.
    pub fn from_udp(socket: UdpSocket, peer: Option<SocketAddr>) -> Self {
        Self {
            inner: ConnInner::Udp(UdpInner { socket, peer }),
            config: ConnConfig::default(),
            closed: CancellationToken::new(),
        }
    }

    /// Wrap an accepted or dialed TCP stream.
    pub fn from_tcp_stream(stream: TcpStream) -> Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            inner: ConnInner::Tcp(TcpInner {
                reader: Mutex::new(TcpReader {
                    half: read_half,
                    buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
                }),
                writer: Mutex::new(write_half),
                local,
                peer,
            }),
            config: ConnConfig::default(),
            closed: CancellationToken::new(),
        })
    }

    /// Replace the handle configuration.
    pub fn with_config(mut self, config: ConnConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ConnConfig {
        &self.config
    }

    /// Which transport this handle uses.
    pub fn network(&self) -> Network {
        match &self.inner {
            ConnInner::Udp(_) => Network::Udp,
            ConnInner::Tcp(_) => Network::Tcp,
        }
    }

    pub fn local_addr(&self) -> Result<Addr> {
        match &self.inner {
            ConnInner::Udp(udp) => Ok(Addr::Udp(udp.socket.local_addr()?)),
            ConnInner::Tcp(tcp) => Ok(Addr::Tcp(tcp.local)),
        }
    }

    /// The connected peer, if the handle has one.
    pub fn peer_addr(&self) -> Option<Addr> {
        match &self.inner {
            ConnInner::Udp(udp) => udp.peer.map(Addr::Udp),
            ConnInner::Tcp(tcp) => Some(Addr::Tcp(tcp.peer)),
        }
    }

    /// Encode `msg` with the framing that matches this transport.
    pub fn encode(&self, msg: &Message) -> Result<Bytes> {
        let bytes = match self.network() {
            Network::Udp => encode_datagram(msg)?,
            Network::Tcp => encode_stream(msg)?,
        };
        Ok(bytes)
    }

    /// Send raw bytes.
    ///
    /// UDP: to `to` if given, otherwise to the connected peer. TCP: to the
    /// stream; `to` is ignored.
    pub async fn send(&self, to: Option<&Addr>, data: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match &self.inner {
            ConnInner::Udp(udp) => {
                let target = match to {
                    Some(Addr::Udp(addr)) => Some(*addr),
                    Some(Addr::Tcp(_)) => {
                        return Err(TransportError::WrongNetwork {
                            expected: Network::Tcp,
                            actual: Network::Udp,
                        })
                    }
                    None => None,
                };
                match target {
                    Some(addr) if udp.peer != Some(addr) => {
                        udp.socket.send_to(data, addr).await?;
                    }
                    _ if udp.peer.is_some() => {
                        udp.socket.send(data).await?;
                    }
                    _ => return Err(TransportError::NoPeer),
                }
            }
            ConnInner::Tcp(tcp) => {
                let mut writer = tcp.writer.lock().await;
                writer.write_all(data).await?;
                writer.flush().await?;
            }
        }
        trace!(len = data.len(), network = %self.network(), "sent");
        Ok(())
    }

    /// Encode and send a message.
    pub async fn transmit(&self, to: Option<&Addr>, msg: &Message) -> Result<()> {
        let bytes = self.encode(msg)?;
        self.send(to, &bytes).await
    }

    /// Receive one raw datagram into `buf`. UDP only.
    ///
    /// Waits without a deadline until a packet arrives or the handle is
    /// closed.
    pub async fn recv_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let ConnInner::Udp(udp) = &self.inner else {
            return Err(TransportError::WrongNetwork {
                expected: Network::Udp,
                actual: Network::Tcp,
            });
        };
        self.guarded(None, async { Ok(udp.socket.recv_from(buf).await?) })
            .await
    }

    /// Receive and decode one message, bounded by the configured read
    /// timeout.
    pub async fn receive(&self) -> Result<(Message, Addr)> {
        self.receive_within(self.config.read_timeout).await
    }

    /// Receive and decode one message, waiting at most `timeout`.
    ///
    /// UDP decodes a single packet. TCP reads into a buffer kept across
    /// calls until one frame decodes; bytes after that frame stay buffered
    /// for the next call.
    pub async fn receive_within(&self, timeout: Duration) -> Result<(Message, Addr)> {
        match &self.inner {
            ConnInner::Udp(udp) => {
                self.guarded(Some(timeout), async {
                    let mut buf = vec![0u8; MAX_PACKET_LEN];
                    let (len, from) = udp.socket.recv_from(&mut buf).await?;
                    let msg = decode_datagram(&buf[..len])?;
                    Ok((msg, Addr::Udp(from)))
                })
                .await
            }
            ConnInner::Tcp(tcp) => {
                let max_frame_size = self.config.max_frame_size;
                self.guarded(Some(timeout), async {
                    let mut reader = tcp.reader.lock().await;
                    let TcpReader { half, buf } = &mut *reader;
                    loop {
                        if let Some(msg) = decode_stream(buf, max_frame_size)? {
                            return Ok((msg, Addr::Tcp(tcp.peer)));
                        }
                        if half.read_buf(buf).await? == 0 {
                            return Err(TransportError::ConnectionClosed);
                        }
                    }
                })
                .await
            }
        }
    }

    /// Close the handle.
    ///
    /// Pending receives return [`TransportError::Closed`]. For TCP the write
    /// half is shut down so the peer sees end-of-stream.
    pub async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        if let ConnInner::Tcp(tcp) = &self.inner {
            let mut writer = tcp.writer.lock().await;
            if let Err(err) = writer.shutdown().await {
                debug!(error = %err, "tcp shutdown failed");
            }
        }
        debug!(network = %self.network(), "closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn guarded<T, F>(&self, timeout: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let bounded = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| TransportError::Timeout(limit))?,
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            result = bounded => result,
        }
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("network", &self.network())
            .field("peer", &self.peer_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coapline_message::{Code, CodecError, MessageType};
    use tokio::net::TcpListener;

    use super::*;

    fn request(id: u16) -> Message {
        let mut msg = Message::confirmable(Code::GET, id).with_token(&b"tk"[..]);
        msg.set_path_string("sensors/temp");
        msg
    }

    async fn tcp_pair() -> (Conn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dial = tokio::spawn(async move {
            Conn::dial(Network::Tcp, &addr.to_string()).await.unwrap()
        });
        let (server, _) = listener.accept().await.unwrap();
        (dial.await.unwrap(), server)
    }

    #[tokio::test]
    async fn udp_dial_send_and_receive() {
        let server = Conn::bind_udp("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap().socket_addr();
        let client = Conn::dial(Network::Udp, &server_addr.to_string())
            .await
            .unwrap();

        client.transmit(None, &request(1)).await.unwrap();
        let (msg, from) = server.receive().await.unwrap();
        assert_eq!(msg, request(1));
        assert_eq!(from.network(), Network::Udp);

        let reply = Message::ack_response(&msg, Code::CONTENT).with_payload(&b"21"[..]);
        server.transmit(Some(&from), &reply).await.unwrap();
        let (got, _) = client.receive().await.unwrap();
        assert_eq!(got, reply);
    }

    #[tokio::test]
    async fn udp_receive_keeps_payload_larger_than_mtu() {
        let server = Conn::bind_udp("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap().socket_addr();
        let client = Conn::dial(Network::Udp, &server_addr.to_string())
            .await
            .unwrap();

        let big = request(2).with_payload(vec![0xC3; 4000]);
        client.transmit(None, &big).await.unwrap();
        let (msg, _) = server.receive().await.unwrap();
        assert_eq!(msg.payload.len(), 4000);
        assert_eq!(msg, big);
    }

    #[tokio::test]
    async fn udp_send_without_peer_fails() {
        let server = Conn::bind_udp("127.0.0.1:0").await.unwrap();
        let err = server.send(None, b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::NoPeer));
    }

    #[tokio::test]
    async fn udp_receive_times_out() {
        let server = Conn::bind_udp("127.0.0.1:0").await.unwrap();
        let err = server
            .receive_within(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn udp_malformed_packet_is_codec_error() {
        let server = Conn::bind_udp("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().socket_addr();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[0x40, 0x01], addr).await.unwrap();

        let err = server.receive().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Codec(CodecError::Truncated("header"))
        ));
    }

    #[tokio::test]
    async fn close_unblocks_pending_receive() {
        let server = Arc::new(Conn::bind_udp("127.0.0.1:0").await.unwrap());
        let waiter = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                server.recv_datagram(&mut buf).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.close().await.unwrap();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(matches!(
            server.send(None, b"x").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn tcp_frame_split_across_writes() {
        let (client, mut server) = tcp_pair().await;
        let msg = request(0).with_payload(vec![0x33; 600]);
        let wire = encode_stream(&msg).unwrap();

        server.write_all(&wire[..5]).await.unwrap();
        server.flush().await.unwrap();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            server.write_all(&wire[5..]).await.unwrap();
            server
        });

        let (got, from) = client.receive().await.unwrap();
        assert_eq!(got, msg);
        assert_eq!(from.network(), Network::Tcp);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_leftover_bytes_kept_for_next_receive() {
        let (client, mut server) = tcp_pair().await;
        let first = Message::new(MessageType::Acknowledgement, Code::CONTENT, 0)
            .with_token(&b"a"[..])
            .with_payload(&b"one"[..]);
        let second = Message::new(MessageType::Acknowledgement, Code::CHANGED, 0)
            .with_token(&b"b"[..]);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_stream(&first).unwrap());
        wire.extend_from_slice(&encode_stream(&second).unwrap());
        server.write_all(&wire).await.unwrap();

        assert_eq!(client.receive().await.unwrap().0, first);
        assert_eq!(client.receive().await.unwrap().0, second);
    }

    #[tokio::test]
    async fn tcp_peer_close_reported() {
        let (client, server) = tcp_pair().await;
        drop(server);
        let err = client.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[tokio::test]
    async fn tcp_transmit_ignores_address() {
        let (client, mut server) = tcp_pair().await;
        let bogus = Addr::Udp("127.0.0.1:9".parse().unwrap());
        client.transmit(Some(&bogus), &request(0)).await.unwrap();

        let mut buf = BytesMut::new();
        loop {
            server.read_buf(&mut buf).await.unwrap();
            if let Some(msg) = decode_stream(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap() {
                assert_eq!(msg, request(0));
                break;
            }
        }
    }

    #[tokio::test]
    async fn datagram_recv_rejected_on_tcp() {
        let (client, _server) = tcp_pair().await;
        let mut buf = [0u8; 4];
        assert!(matches!(
            client.recv_datagram(&mut buf).await,
            Err(TransportError::WrongNetwork {
                expected: Network::Udp,
                ..
            })
        ));
    }
}
