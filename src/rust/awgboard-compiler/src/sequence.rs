// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Bookkeeping of a multi-step sequence staged in DDR.
//!
//! Every step stores one wave per channel in that channel's DDR region. The
//! waves of consecutive steps are packed back to back, so a step's start
//! offset is the previous step's next offset.

use indexmap::IndexMap;

use crate::{Error, Result};

/// Upper bound (exclusive) of a step's playback delay in seconds.
pub const MAX_STEP_DELAY: f64 = 256e-6;

/// How a step starts its playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitMode {
    #[default]
    Trigger,
    /// Counted delay instead of a trigger.
    Timed,
}

/// Step to continue with after a step completes.
///
/// Only sequential flow is played by the generated programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Goto {
    #[default]
    Next,
    Step(usize),
}

/// Placement of one channel's wave inside its DDR region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepWave {
    /// Byte offset relative to the channel region.
    pub start_offset: u64,
    /// First free byte after the padded wave.
    pub next_offset: u64,
    /// Wave size in bytes, before padding.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStep {
    /// Keyed by channel number, in insertion order.
    pub waves: IndexMap<u8, StepWave>,
    pub wait: WaitMode,
    pub goto: Goto,
    pub repeat: u32,
    /// Seconds; used in [`WaitMode::Timed`].
    pub delay: f64,
}

impl SequenceStep {
    pub fn new(wait: WaitMode, goto: Goto, repeat: u32, delay: f64) -> Self {
        SequenceStep {
            waves: IndexMap::new(),
            wait,
            goto,
            repeat,
            delay,
        }
    }

    pub fn validate(&self, max_repeat: u32) -> Result<()> {
        if !(0.0..MAX_STEP_DELAY).contains(&self.delay) {
            return Err(Error::precondition(format!(
                "Step delay {} s outside [0, {MAX_STEP_DELAY})",
                self.delay
            )));
        }
        if self.repeat > max_repeat {
            return Err(Error::CapacityExceeded {
                what: "Step repeat count",
                needed: u64::from(self.repeat),
                capacity: u64::from(max_repeat),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    steps: Vec<SequenceStep>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Make room for step `index` (1-based). Step 1 clears the sequence;
    /// re-setting an existing step drops it and every later step.
    pub fn prepare_step(&mut self, index: usize) -> Result<()> {
        if index == 0 {
            return Err(Error::precondition("Sequence steps are numbered from 1"));
        }
        if index > self.steps.len() + 1 {
            return Err(Error::precondition(format!(
                "Step {index} set before step {}",
                self.steps.len() + 1
            )));
        }
        self.steps.truncate(index - 1);
        Ok(())
    }

    /// DDR offset at which the next step's wave for `channel` goes.
    pub fn start_offset(&self, channel: u8) -> u64 {
        self.steps
            .last()
            .and_then(|step| step.waves.get(&channel))
            .map_or(0, |wave| wave.next_offset)
    }

    /// Append a step. All steps must cover the same channels.
    pub fn push(&mut self, step: SequenceStep) -> Result<()> {
        if let Some(first) = self.steps.first() {
            let same = first.waves.len() == step.waves.len()
                && first.waves.keys().all(|channel| step.waves.contains_key(channel));
            if !same {
                return Err(Error::precondition(
                    "Every sequence step must provide waves for the same channels",
                ));
            }
        }
        self.steps.push(step);
        Ok(())
    }

    /// Channels covered by the sequence.
    pub fn channels(&self) -> Vec<u8> {
        self.steps
            .first()
            .map(|step| step.waves.keys().copied().collect())
            .unwrap_or_default()
    }
}
