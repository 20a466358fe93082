//! Runtime knobs shared by the hub, queues, rooms and client sessions.

use std::time::Duration;

use crate::matchmaking::TolerancePolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerConfig {
    /// How often each queue runs a pairing sweep.
    pub pairing_interval: Duration,
    pub tolerance: TolerancePolicy,
    /// Seconds an empty room waits for a player before closing.
    pub room_ttl: u32,
    /// Outbound frames buffered per client before new ones are dropped.
    pub send_buffer: usize,
    /// A client that stays silent this long is disconnected.
    pub pong_wait: Duration,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pairing_interval: Duration::from_secs(3),
            tolerance: TolerancePolicy::default(),
            room_ttl: 20,
            send_buffer: 192,
            pong_wait: Duration::from_secs(8),
            max_frame_size: 1024,
        }
    }
}

impl ServerConfig {
    /// Application pings go out at three quarters of the pong wait.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 3 / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.ping_period(), Duration::from_secs(6));
        assert!(config.ping_period() < config.pong_wait);
        assert_eq!(config.tolerance.initial, 50.0);
        assert!(config.tolerance.max.is_infinite());
        assert!(config.send_buffer >= 128);
    }
}
