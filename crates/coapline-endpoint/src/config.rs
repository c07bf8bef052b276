use std::time::Duration;

use coapline_message::DEFAULT_MAX_FRAME_SIZE;
use rand::Rng;

use crate::error::{Error, Result};

const MAX_RETRANSMIT_LIMIT: u32 = 20;

/// Retransmission parameters (RFC 7252 §4.8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionParams {
    /// Base wait for an acknowledgement. Default: 2 s.
    pub ack_timeout: Duration,
    /// Upper bound of the random multiplier applied to the first wait.
    /// Default: 1.5.
    pub ack_random_factor: f64,
    /// Retransmissions after the first send. Default: 4.
    pub max_retransmit: u32,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
        }
    }
}

impl TransmissionParams {
    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout.is_zero() {
            return Err(Error::Configuration("ack_timeout must be non-zero".into()));
        }
        if !self.ack_random_factor.is_finite() || self.ack_random_factor < 1.0 {
            return Err(Error::Configuration(format!(
                "ack_random_factor must be >= 1.0, got {}",
                self.ack_random_factor
            )));
        }
        if self.max_retransmit > MAX_RETRANSMIT_LIMIT {
            return Err(Error::Configuration(format!(
                "max_retransmit must be <= {MAX_RETRANSMIT_LIMIT}, got {}",
                self.max_retransmit
            )));
        }
        Ok(())
    }

    /// First wait: `ack_timeout` scaled by a uniform draw from
    /// `[1.0, ack_random_factor)`.
    pub fn initial_timeout<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let factor = if self.ack_random_factor > 1.0 {
            rng.gen_range(1.0..self.ack_random_factor)
        } else {
            1.0
        };
        self.ack_timeout.mul_f64(factor)
    }

    /// Time from the first send to the last retransmission, worst case.
    pub fn max_transmit_span(&self) -> Duration {
        let doublings = (1u64 << self.max_retransmit) - 1;
        self.ack_timeout
            .mul_f64(doublings as f64 * self.ack_random_factor)
    }

    /// Time from the first send until the sender gives up, worst case.
    pub fn max_transmit_wait(&self) -> Duration {
        let doublings = (1u64 << (self.max_retransmit + 1)) - 1;
        self.ack_timeout
            .mul_f64(doublings as f64 * self.ack_random_factor)
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub params: TransmissionParams,
    /// How long a handled confirmable message ID is remembered.
    /// Default: `params.max_transmit_wait()`.
    pub dedup_window: Duration,
    /// Pause before retrying after a transient receive error. Default: 5 ms.
    pub transient_pause: Duration,
    /// Largest stream frame accepted. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let params = TransmissionParams::default();
        Self {
            params,
            dedup_window: params.max_transmit_wait(),
            transient_pause: Duration::from_millis(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub params: TransmissionParams,
    /// Largest stream frame accepted from the server. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            params: TransmissionParams::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn default_spans_match_rfc() {
        let params = TransmissionParams::default();
        assert_eq!(params.max_transmit_span(), Duration::from_secs(45));
        assert_eq!(params.max_transmit_wait(), Duration::from_secs(93));
    }

    #[test]
    fn initial_timeout_within_random_bounds() {
        let params = TransmissionParams::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let timeout = params.initial_timeout(&mut rng);
            assert!(timeout >= Duration::from_secs(2));
            assert!(timeout < Duration::from_secs(3));
        }
    }

    #[test]
    fn unit_factor_gives_exact_timeout() {
        let params = TransmissionParams {
            ack_random_factor: 1.0,
            ..TransmissionParams::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(params.initial_timeout(&mut rng), Duration::from_secs(2));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad_factor = TransmissionParams {
            ack_random_factor: 0.5,
            ..TransmissionParams::default()
        };
        assert!(matches!(bad_factor.validate(), Err(Error::Configuration(_))));

        let zero_timeout = TransmissionParams {
            ack_timeout: Duration::ZERO,
            ..TransmissionParams::default()
        };
        assert!(zero_timeout.validate().is_err());

        let too_many = TransmissionParams {
            max_retransmit: 64,
            ..TransmissionParams::default()
        };
        assert!(too_many.validate().is_err());
        assert!(TransmissionParams::default().validate().is_ok());
    }
}
