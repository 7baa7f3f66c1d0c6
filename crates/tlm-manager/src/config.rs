// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Manager configuration.
//!
//! Ambient knobs of the broker itself. Session-level settings (ports,
//! startup timeout) live in the model's
//! [`SimulationParams`](crate::SimulationParams), which is where clients
//! discover them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ManagerError, Result};

/// Tunables for the manager core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Number of pre-allocated message buffers in the handoff queue
    /// (default: 32).
    #[serde(default = "default_queue_slots")]
    pub queue_slots: usize,

    /// Payload bytes reserved per buffer up front (default: 256, enough
    /// for every fixed payload without reallocation).
    #[serde(default = "default_payload_capacity")]
    pub payload_capacity: usize,

    /// Maximum accepted payload size in bytes; larger frames are a
    /// protocol violation (default: 64 KiB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Readiness-wait tick in milliseconds; bounds how quickly the worker
    /// threads observe shutdown and the startup timeout (default: 100).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_queue_slots() -> usize {
    32
}

fn default_payload_capacity() -> usize {
    256
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_slots: default_queue_slots(),
            payload_capacity: default_payload_capacity(),
            max_message_size: default_max_message_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ManagerConfig {
    /// Check the configuration for nonsense values.
    pub fn validate(&self) -> Result<()> {
        if self.queue_slots < 2 {
            return Err(ManagerError::Config(
                "queue_slots must be at least 2".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ManagerError::Config(
                "max_message_size must be non-zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ManagerError::Config(
                "poll_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Readiness-wait tick as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_slots, 32);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_rejects_degenerate_values() {
        let mut config = ManagerConfig::default();
        config.queue_slots = 1;
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
