// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Tunables of the transport layer.
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::retry::RetryPolicy;

/// Smallest DDR read block: reads are 4 KiB aligned.
pub const BLOCK_EXP_FLOOR: u8 = 12;
/// Largest DDR read block tried during negotiation.
pub const BLOCK_EXP_CEILING: u8 = 20;

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

/// Transport settings. Durations are given in milliseconds so the struct can
/// be loaded from JSON as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub port: u16,
    /// Receive timeout for a single bulk frame.
    pub frame_timeout_ms: u64,
    /// Receive timeout for a register reply.
    pub reply_timeout_ms: u64,
    /// Timeout used while draining stray datagrams.
    pub flush_timeout_ms: u64,
    pub recv_buffer_bytes: usize,
    /// Attempts per operation, including the first one.
    pub attempts: u32,
    /// Pause before the n-th retry of a bulk write is `n * write_backoff_ms`.
    pub write_backoff_ms: u64,
    pub max_block_exp: u8,
    pub min_block_exp: u8,
    /// Readback trials per block size during negotiation.
    pub negotiation_trials: u32,
    pub busy_poll_limit: u32,
    /// Pause before the working block size is reduced.
    pub degrade_pause_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            port: 0x1234,
            frame_timeout_ms: 10,
            reply_timeout_ms: 100,
            flush_timeout_ms: 1,
            recv_buffer_bytes: 20 << 20,
            attempts: 5,
            write_backoff_ms: 100,
            max_block_exp: BLOCK_EXP_CEILING,
            min_block_exp: BLOCK_EXP_FLOOR,
            negotiation_trials: 10,
            busy_poll_limit: 1000,
            degrade_pause_ms: 1000,
        }
    }
}

impl TransportSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings = serde_json::from_str(json).context("Invalid transport settings")?;
        Ok(settings)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn degrade_pause(&self) -> Duration {
        Duration::from_millis(self.degrade_pause_ms)
    }

    pub(crate) fn register_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::ZERO)
    }

    pub(crate) fn write_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.write_backoff_ms))
    }

    pub(crate) fn read_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::ZERO)
    }

    /// Bring the settings into the range the hardware supports.
    pub fn sanitize(&mut self) -> Vec<SanitizationChange> {
        let mut changes = vec![];
        let mut record = |field: &'static str, original: String, sanitized: String, reason: &str| {
            changes.push(SanitizationChange {
                field,
                original,
                sanitized,
                reason: reason.to_string(),
            });
        };
        if self.attempts == 0 {
            record("attempts", "0".into(), "1".into(), "At least one attempt is made.");
            self.attempts = 1;
        }
        if self.frame_timeout_ms == 0 {
            record(
                "frame_timeout_ms",
                "0".into(),
                "1".into(),
                "A zero timeout would block forever.",
            );
            self.frame_timeout_ms = 1;
        }
        if self.reply_timeout_ms == 0 {
            record(
                "reply_timeout_ms",
                "0".into(),
                "1".into(),
                "A zero timeout would block forever.",
            );
            self.reply_timeout_ms = 1;
        }
        if self.flush_timeout_ms == 0 {
            record(
                "flush_timeout_ms",
                "0".into(),
                "1".into(),
                "A zero timeout would block forever.",
            );
            self.flush_timeout_ms = 1;
        }
        let clamped = self.max_block_exp.clamp(BLOCK_EXP_FLOOR, BLOCK_EXP_CEILING);
        if clamped != self.max_block_exp {
            record(
                "max_block_exp",
                self.max_block_exp.to_string(),
                clamped.to_string(),
                &format!("Must lie in {BLOCK_EXP_FLOOR}..={BLOCK_EXP_CEILING}."),
            );
            self.max_block_exp = clamped;
        }
        let clamped = self.min_block_exp.clamp(BLOCK_EXP_FLOOR, self.max_block_exp);
        if clamped != self.min_block_exp {
            record(
                "min_block_exp",
                self.min_block_exp.to_string(),
                clamped.to_string(),
                &format!(
                    "Must lie in {BLOCK_EXP_FLOOR}..={}.",
                    self.max_block_exp
                ),
            );
            self.min_block_exp = clamped;
        }
        if self.negotiation_trials == 0 {
            record(
                "negotiation_trials",
                "0".into(),
                "1".into(),
                "A block size is only accepted after a successful trial.",
            );
            self.negotiation_trials = 1;
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let mut settings = TransportSettings::default();
        assert!(settings.sanitize().is_empty());
        assert_eq!(settings.port, 0x1234);
        assert_eq!(settings.frame_timeout(), Duration::from_millis(10));
    }

    #[test]
    fn test_from_json_partial() {
        let settings = TransportSettings::from_json(r#"{"attempts": 3, "max_block_exp": 16}"#)
            .expect("valid json");
        assert_eq!(settings.attempts, 3);
        assert_eq!(settings.max_block_exp, 16);
        assert_eq!(settings.reply_timeout_ms, 100);
        assert!(TransportSettings::from_json("{\"attempts\": -1}").is_err());
    }

    #[test]
    fn test_sanitize_block_sizes() {
        let mut settings = TransportSettings {
            max_block_exp: 24,
            min_block_exp: 10,
            attempts: 0,
            ..Default::default()
        };
        let changes = settings.sanitize();
        let fields: Vec<_> = changes.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["attempts", "max_block_exp", "min_block_exp"]);
        assert_eq!(settings.max_block_exp, 20);
        assert_eq!(settings.min_block_exp, 12);
        assert_eq!(settings.attempts, 1);
    }
}
