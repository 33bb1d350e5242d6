// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;

use numeric_array::NumericArray;

use crate::{Error, Result};

/// How the sequencer starts a wave unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveKind {
    /// Wait for a trigger; resets the elapsed time.
    Trigger,
    /// Counted delay after the previous unit.
    Delayed,
    /// Free running playback.
    Continuous,
}

impl FromStr for WaveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trig" | "trigger" => Ok(WaveKind::Trigger),
            "delay" | "delayed" => Ok(WaveKind::Delayed),
            "continue" | "continuous" => Ok(WaveKind::Continuous),
            other => Err(Error::precondition(format!("Unknown wave kind '{other}'"))),
        }
    }
}

/// One piece of waveform placed on the channel's time line.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveUnit {
    pub kind: WaveKind,
    /// Seconds after the most recent trigger unit.
    pub start_time: f64,
    pub samples: NumericArray,
    /// One bit per sample, merged into the code LSB in mark-in-wave mode.
    pub mark: Option<Vec<u8>>,
}

impl WaveUnit {
    pub fn new(kind: WaveKind, start_time: f64, samples: impl Into<NumericArray>) -> Self {
        WaveUnit {
            kind,
            start_time,
            samples: samples.into(),
            mark: None,
        }
    }

    pub fn with_mark(mut self, mark: Vec<u8>) -> Result<Self> {
        if mark.len() != self.samples.len() {
            return Err(Error::precondition(format!(
                "Mark has {} entries, wave has {} samples",
                mark.len(),
                self.samples.len()
            )));
        }
        if let Some(bad) = mark.iter().find(|bit| **bit > 1) {
            return Err(Error::precondition(format!("Mark value {bad} is not a bit")));
        }
        self.mark = Some(mark);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
