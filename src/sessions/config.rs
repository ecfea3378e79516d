//! Configuration for game sessions.
//!
//! # Overview
//!
//! | Preset | Remote timeout | Use case |
//! |--------|----------------|----------|
//! | `TrackerConfig::default()` | 10 s | Typical hosted backend |
//! | `TrackerConfig::lan()` | 2 s | Backend on the local network |
//! | `TrackerConfig::mobile()` | 30 s | Flaky mobile connections |
//! | `TrackerConfig::offline()` | none | In-process stores |
//!
//! # Example
//!
//! ```
//! use schwimmen_tracker::TrackerConfig;
//!
//! let config = TrackerConfig {
//!     starting_lives: 5,
//!     ..TrackerConfig::mobile()
//! };
//! assert!(config.validate().is_ok());
//! ```

use web_time::Duration;

use crate::error::{TrackerError, TrackerResult};

/// Largest supported number of starting lives.
const MAX_STARTING_LIVES: i32 = 99;

/// Configuration for a [`GameSession`](crate::GameSession).
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. To ensure your
/// code continues to compile, always use the `..Default::default()` or
/// `..TrackerConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "TrackerConfig has no effect unless passed to GameBuilder::with_config()"]
pub struct TrackerConfig {
    /// Lives every participant holds in round 0.
    ///
    /// Default: 3
    pub starting_lives: i32,

    /// Time a single remote call may take before it counts as failed and the session rolls
    /// back. `None` waits forever.
    ///
    /// Default: `Some(10s)`
    pub remote_timeout: Option<Duration>,

    /// Maximum number of undrained events. The oldest events are dropped beyond this.
    ///
    /// Default: 100
    pub event_queue_size: usize,

    /// Whether a commit that leaves a single survivor completes the game automatically.
    /// When disabled, call [`GameSession::complete_if_won`](crate::GameSession::complete_if_won).
    ///
    /// Default: true
    pub auto_complete: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            starting_lives: 3,
            remote_timeout: Some(Duration::from_secs(10)),
            event_queue_size: 100,
            auto_complete: true,
        }
    }
}

impl TrackerConfig {
    /// Creates a new `TrackerConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for a backend on the local network: fail fast.
    pub fn lan() -> Self {
        Self {
            remote_timeout: Some(Duration::from_secs(2)),
            ..Self::default()
        }
    }

    /// Preset for mobile clients, where requests can stall for a while.
    pub fn mobile() -> Self {
        Self {
            remote_timeout: Some(Duration::from_secs(30)),
            ..Self::default()
        }
    }

    /// Preset for in-process stores that never hang.
    pub fn offline() -> Self {
        Self {
            remote_timeout: None,
            ..Self::default()
        }
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidConfig` if `starting_lives` is outside `1..=99`,
    /// `event_queue_size` is zero, or `remote_timeout` is zero.
    pub fn validate(&self) -> TrackerResult<()> {
        if !(1..=MAX_STARTING_LIVES).contains(&self.starting_lives) {
            return Err(TrackerError::InvalidConfig {
                info: format!(
                    "starting_lives must be between 1 and {}, got {}",
                    MAX_STARTING_LIVES, self.starting_lives
                ),
            });
        }
        if self.event_queue_size == 0 {
            return Err(TrackerError::InvalidConfig {
                info: "event_queue_size must be at least 1".to_owned(),
            });
        }
        if self.remote_timeout == Some(Duration::ZERO) {
            return Err(TrackerError::InvalidConfig {
                info: "remote_timeout must be positive, use None to disable it".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.starting_lives, 3);
        assert_eq!(config.remote_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.event_queue_size, 100);
        assert!(config.auto_complete);
        assert_eq!(TrackerConfig::new(), config);
    }

    #[test]
    fn presets_only_change_timeout() {
        assert_eq!(
            TrackerConfig::lan().remote_timeout,
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            TrackerConfig::mobile().remote_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(TrackerConfig::offline().remote_timeout, None);
        assert_eq!(TrackerConfig::offline().starting_lives, 3);
    }

    #[test]
    fn presets_validate() {
        for config in [
            TrackerConfig::default(),
            TrackerConfig::lan(),
            TrackerConfig::mobile(),
            TrackerConfig::offline(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }

    #[test]
    fn zero_lives_rejected() {
        let config = TrackerConfig {
            starting_lives: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrackerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn too_many_lives_rejected() {
        let config = TrackerConfig {
            starting_lives: 100,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_event_queue_rejected() {
        let config = TrackerConfig {
            event_queue_size: 0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = TrackerConfig {
            remote_timeout: Some(Duration::ZERO),
            ..TrackerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("remote_timeout"));
    }
}
