use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use coapline_message::{Code, Message, MessageType};
use coapline_transport::{Conn, ConnConfig, Network, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::reliability::{Correlation, Transaction};

const TOKEN_LEN: usize = 4;

/// Unclaimed messages kept for [`Client::receive`]; the oldest is dropped
/// beyond this.
pub const MAX_UNSOLICITED: usize = 64;

/// A CoAP client bound to one server.
///
/// Confirmable requests over UDP are retransmitted with exponential backoff
/// until acknowledged, reset, or out of attempts. Over TCP the stream is
/// reliable, so a request is sent once and the reply is matched by token.
/// Messages that arrive while an exchange is in flight but belong to
/// something else are queued for [`Client::receive`], up to
/// [`MAX_UNSOLICITED`].
pub struct Client {
    conn: Conn,
    config: ClientConfig,
    rng: StdRng,
    next_message_id: u16,
    unsolicited: VecDeque<Message>,
}

impl Client {
    /// Connect to `addr` over the transport named `network` (`"udp"` or
    /// `"tcp"`).
    pub async fn dial(network: &str, addr: &str) -> Result<Self> {
        let network = network
            .parse::<Network>()
            .map_err(|err| Error::Configuration(err.to_string()))?;
        let conn = Conn::dial(network, addr).await?;
        Ok(Self::from_conn(conn))
    }

    /// Wrap an already-connected handle.
    pub fn from_conn(conn: Conn) -> Self {
        let mut rng = StdRng::from_entropy();
        let next_message_id = rng.gen();
        Self {
            conn,
            config: ClientConfig::default(),
            rng,
            next_message_id,
            unsolicited: VecDeque::new(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(self, config: ClientConfig) -> Result<Self> {
        config.params.validate()?;
        let conn_config = ConnConfig {
            read_timeout: config.params.ack_timeout,
            max_frame_size: config.max_frame_size,
        };
        Ok(Self {
            conn: self.conn.with_config(conn_config),
            config,
            ..self
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    /// Allocate a message ID. IDs increase by one and wrap.
    pub fn next_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    /// Build a request with a fresh message ID and a random token.
    pub fn request(&mut self, message_type: MessageType, code: Code, path: &str) -> Message {
        let message_id = self.next_message_id();
        let token: [u8; TOKEN_LEN] = self.rng.gen();
        let mut msg = Message::new(message_type, code, message_id)
            .with_token(Bytes::copy_from_slice(&token));
        msg.set_path_string(path);
        msg
    }

    /// Send `msg` and, for a confirmable, wait for its response.
    ///
    /// Non-confirmable messages, ACKs and RSTs are sent once and resolve to
    /// `Ok(None)`.
    pub async fn send(&mut self, msg: &Message) -> Result<Option<Message>> {
        match (msg.message_type, self.conn.network()) {
            (MessageType::Confirmable, Network::Udp) => self.exchange_datagram(msg).await.map(Some),
            (MessageType::Confirmable, Network::Tcp) => {
                self.conn.transmit(None, msg).await?;
                let limit = self.config.params.max_transmit_wait();
                self.await_response(&msg.token, limit, 1).await.map(Some)
            }
            _ => {
                self.conn.transmit(None, msg).await?;
                Ok(None)
            }
        }
    }

    /// Next message not claimed by an exchange, waiting up to the read
    /// timeout.
    pub async fn receive(&mut self) -> Result<Message> {
        if let Some(msg) = self.unsolicited.pop_front() {
            return Ok(msg);
        }
        let (msg, _) = self.conn.receive().await?;
        Ok(msg)
    }

    pub async fn close(&self) -> Result<()> {
        Ok(self.conn.close().await?)
    }

    async fn exchange_datagram(&mut self, msg: &Message) -> Result<Message> {
        let mut tx = Transaction::new(msg.message_id, &self.config.params, &mut self.rng);
        let wire = self.conn.encode(msg)?;

        while let Some(wait) = tx.next_attempt() {
            if tx.transmissions() > 1 {
                debug!(
                    message_id = msg.message_id,
                    attempt = tx.transmissions(),
                    "retransmitting"
                );
            }
            self.conn.send(None, &wire).await?;

            let deadline = Instant::now() + wait;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let reply = match self.conn.receive_within(remaining).await {
                    Ok((reply, _)) => reply,
                    Err(TransportError::Timeout(_)) => break,
                    Err(TransportError::Codec(err)) => {
                        warn!(error = %err, "dropping malformed reply");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };
                match tx.correlate(&reply) {
                    Correlation::Acknowledged if reply.code.is_empty() => {
                        debug!(message_id = msg.message_id, "acknowledged, awaiting separate response");
                        let limit = self.config.params.max_transmit_wait();
                        return self
                            .await_response(&msg.token, limit, tx.transmissions())
                            .await;
                    }
                    Correlation::Acknowledged => return Ok(reply),
                    Correlation::Rejected => {
                        return Err(Error::Rejected {
                            message_id: msg.message_id,
                        })
                    }
                    Correlation::Unrelated if is_separate_response(&reply, &msg.token) => {
                        // The empty ACK was lost but the response made it.
                        self.acknowledge(&reply).await?;
                        return Ok(reply);
                    }
                    Correlation::Unrelated => self.queue_unsolicited(reply),
                }
            }
        }

        debug!(
            message_id = msg.message_id,
            transmissions = tx.transmissions(),
            "exchange timed out"
        );
        Err(Error::Timeout {
            transmissions: tx.transmissions(),
        })
    }

    /// Wait up to `limit` for a response carrying `token`.
    async fn await_response(
        &mut self,
        token: &Bytes,
        limit: Duration,
        transmissions: u32,
    ) -> Result<Message> {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout { transmissions });
            }
            let reply = match self.conn.receive_within(remaining).await {
                Ok((reply, _)) => reply,
                Err(TransportError::Timeout(_)) => return Err(Error::Timeout { transmissions }),
                Err(TransportError::Codec(err)) if self.conn.network() == Network::Udp => {
                    warn!(error = %err, "dropping malformed reply");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if reply.token == *token && reply.code.is_response() {
                self.acknowledge(&reply).await?;
                return Ok(reply);
            }
            self.queue_unsolicited(reply);
        }
    }

    fn queue_unsolicited(&mut self, msg: Message) {
        if self.unsolicited.len() >= MAX_UNSOLICITED {
            if let Some(dropped) = self.unsolicited.pop_front() {
                debug!(message_id = dropped.message_id, "unsolicited queue full, dropping oldest");
            }
        }
        self.unsolicited.push_back(msg);
    }

    async fn acknowledge(&self, reply: &Message) -> Result<()> {
        if reply.is_confirmable() && self.conn.network() == Network::Udp {
            self.conn
                .transmit(None, &Message::empty_ack(reply.message_id))
                .await?;
        }
        Ok(())
    }
}

fn is_separate_response(reply: &Message, token: &Bytes) -> bool {
    matches!(
        reply.message_type,
        MessageType::Confirmable | MessageType::NonConfirmable
    ) && reply.code.is_response()
        && reply.token == *token
}
