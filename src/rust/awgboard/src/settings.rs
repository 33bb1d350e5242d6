// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Board level configuration.
use std::time::Duration;

use anyhow::Context;
use awgboard_compiler::CodeFormat;
use awgboard_transport::{SanitizationChange, TransportSettings};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Settings of an [`AwgBoard`](crate::AwgBoard). Durations are given in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub transport: TransportSettings,
    /// Samples are offset binary; two's complement otherwise.
    pub unsigned_codes: bool,
    pub mark_in_wave: bool,
    /// Program executions per start, applied to every channel.
    pub loop_count: u16,
    /// Output voltage at full scale into 50 Ohm.
    pub volt_range: f64,
    /// Time given to the one-shot DDR to RAM copy after an upload.
    pub load_settle_ms: u64,
    /// Time given to the EEPROM after each I2C transaction.
    pub eeprom_settle_ms: u64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        BoardSettings {
            transport: TransportSettings::default(),
            unsigned_codes: true,
            mark_in_wave: false,
            loop_count: 60_000,
            volt_range: 1.0,
            load_settle_ms: 1,
            eeprom_settle_ms: 10,
        }
    }
}

impl BoardSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings = serde_json::from_str(json).context("Invalid board settings")?;
        Ok(settings)
    }

    pub fn code_format(&self) -> CodeFormat {
        if self.unsigned_codes {
            CodeFormat::Unsigned
        } else {
            CodeFormat::Signed
        }
    }

    pub fn load_settle(&self) -> Duration {
        Duration::from_millis(self.load_settle_ms)
    }

    pub fn eeprom_settle(&self) -> Duration {
        Duration::from_millis(self.eeprom_settle_ms)
    }

    /// Bring the settings into the range the hardware supports.
    pub fn sanitize(&mut self) -> Vec<SanitizationChange> {
        let mut changes = self.transport.sanitize();
        if self.loop_count == 0 {
            changes.push(SanitizationChange {
                field: "loop_count",
                original: "0".into(),
                sanitized: "1".into(),
                reason: "A started channel runs its program at least once.".into(),
            });
            self.loop_count = 1;
        }
        if !(self.volt_range.is_finite() && self.volt_range > 0.0) {
            changes.push(SanitizationChange {
                field: "volt_range",
                original: self.volt_range.to_string(),
                sanitized: "1".into(),
                reason: "The voltage range must be positive.".into(),
            });
            self.volt_range = 1.0;
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json() {
        let settings =
            BoardSettings::from_json(r#"{"loop_count": 10, "transport": {"attempts": 3}}"#).unwrap();
        assert_eq!(settings.loop_count, 10);
        assert_eq!(settings.transport.attempts, 3);
        assert!(settings.unsigned_codes);
        assert_eq!(settings.code_format(), CodeFormat::Unsigned);
        assert!(BoardSettings::from_json("{\"loop_count\": -1}").is_err());
    }

    #[test]
    fn test_sanitize() {
        let mut settings = BoardSettings {
            loop_count: 0,
            volt_range: -2.0,
            ..Default::default()
        };
        let fields: Vec<_> = settings.sanitize().iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["loop_count", "volt_range"]);
        assert_eq!(settings.loop_count, 1);
        assert_eq!(settings.volt_range, 1.0);
        assert!(settings.sanitize().is_empty());
    }
}
