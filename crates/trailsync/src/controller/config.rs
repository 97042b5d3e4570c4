use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ControllerError;
use crate::Frame;

/// Session tuning shared by client and server controllers.
///
/// Every field has a default, so a config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tick_rate: u32,
    /// Delays of the trailing copies in milliseconds; the leading copy at 0 is implicit.
    pub delays_ms: Vec<u64>,
    pub sync_interval_ms: u64,
    pub hash_check_interval_ms: u64,
    pub snapshot_cooldown_ms: u64,
    pub state_request_resend_ms: u64,
    pub command_resend_ms: u64,
    pub join_resend_ms: u64,
    pub connection_timeout_ms: u64,
    /// Clock corrections at or below this many frames are ignored.
    pub clock_threshold: i64,
    pub clock_window: usize,
    /// Most simulation frames run by a single `update` call.
    pub max_catch_up: u32,
    pub max_clients: usize,
    /// Frames of local trailing hashes kept for late hash checks.
    pub hash_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            delays_ms: vec![50, 150, 300],
            sync_interval_ms: 1000,
            hash_check_interval_ms: 5000,
            snapshot_cooldown_ms: 5000,
            state_request_resend_ms: 1000,
            command_resend_ms: 100,
            join_resend_ms: 1000,
            connection_timeout_ms: 10_000,
            clock_threshold: 2,
            clock_window: 8,
            max_catch_up: 10,
            max_clients: 32,
            hash_history: 256,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.tick_rate == 0 {
            return Err(ControllerError::InvalidConfig(String::from(
                "tick_rate must be positive",
            )));
        }
        if self.max_catch_up == 0 {
            return Err(ControllerError::InvalidConfig(String::from(
                "max_catch_up must be positive",
            )));
        }
        if self.clock_window == 0 {
            return Err(ControllerError::InvalidConfig(String::from(
                "clock_window must be positive",
            )));
        }
        Ok(())
    }

    /// Copy delays in frames, starting with the leading copy at 0.
    ///
    /// Milliseconds round up to whole frames; delays that land on the same frame collapse.
    pub fn delay_frames(&self) -> Vec<Frame> {
        let rate = u64::from(self.tick_rate.max(1));
        let mut frames: Vec<Frame> = std::iter::once(0)
            .chain(self.delays_ms.iter().map(|ms| (ms * rate).div_ceil(1000)))
            .collect();
        frames.sort_unstable();
        frames.dedup();
        frames
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate.max(1)))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn hash_check_interval(&self) -> Duration {
        Duration::from_millis(self.hash_check_interval_ms)
    }

    pub fn snapshot_cooldown(&self) -> Duration {
        Duration::from_millis(self.snapshot_cooldown_ms)
    }

    pub fn state_request_resend(&self) -> Duration {
        Duration::from_millis(self.state_request_resend_ms)
    }

    pub fn command_resend(&self) -> Duration {
        Duration::from_millis(self.command_resend_ms)
    }

    pub fn join_resend(&self) -> Duration {
        Duration::from_millis(self.join_resend_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}
