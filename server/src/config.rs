//! Room configuration and its validation

use std::time::Duration;

use crate::error::ConfigError;
use crate::ingest::MovementPolicy;
use crate::replication::ReplicationMode;
use crate::tick::TickPolicy;

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub tick_interval: Duration,
    pub max_clients: usize,
    pub spawn_radius: f32,
    pub replication: ReplicationMode,
    pub tick_policy: TickPolicy,
    pub movement: MovementPolicy,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(shared::TICK_INTERVAL_MS),
            max_clients: shared::MAX_CLIENTS,
            spawn_radius: shared::SPAWN_RADIUS,
            replication: ReplicationMode::Full,
            tick_policy: TickPolicy::StopWhenEmpty,
            movement: MovementPolicy::default(),
        }
    }
}

impl RoomConfig {
    /// Builds a config ticking at `tick_rate` Hz
    pub fn with_tick_rate(mut self, tick_rate: u32) -> Result<Self, ConfigError> {
        if tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        self.tick_interval = Duration::from_nanos(1_000_000_000 / u64::from(tick_rate));
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !self.spawn_radius.is_finite() || self.spawn_radius < 0.0 {
            return Err(ConfigError::InvalidSpawnRadius(self.spawn_radius));
        }
        if let Some(bound) = self.movement.position_bound {
            if !bound.is_finite() || bound <= 0.0 {
                return Err(ConfigError::InvalidPositionBound(bound));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RoomConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.max_clients, 50);
        assert_eq!(config.spawn_radius, 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tick_rate_conversion() {
        let config = RoomConfig::default().with_tick_rate(20).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(50));

        let err = RoomConfig::default().with_tick_rate(0).unwrap_err();
        assert_eq!(err, ConfigError::ZeroTickRate);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = RoomConfig {
            max_clients: 0,
            ..RoomConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));

        let config = RoomConfig {
            spawn_radius: f32::NAN,
            ..RoomConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSpawnRadius(_))
        ));

        let mut config = RoomConfig::default();
        config.movement.position_bound = Some(-1.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPositionBound(-1.0))
        );
    }
}
