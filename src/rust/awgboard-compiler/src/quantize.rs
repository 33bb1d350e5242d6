// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Conversion of normalized samples into DAC codes.

use awgboard_isa::DeviceTraits;
use numeric_array::NumericArray;

use crate::{Error, Result};

/// Code scale for a unit-amplitude sample.
const FULL_SCALE: f64 = 32767.5;

/// Sample code representation of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodeFormat {
    /// Offset binary, 0 V at mid scale.
    #[default]
    Unsigned,
    /// Two's complement.
    Signed,
}

impl CodeFormat {
    /// Code that outputs 0 V, as a raw 16 bit pattern.
    pub const fn zero_code(self) -> u16 {
        match self {
            CodeFormat::Unsigned => 32768,
            CodeFormat::Signed => 0,
        }
    }

    fn mid_scale(self) -> f64 {
        match self {
            CodeFormat::Unsigned => 1.0,
            CodeFormat::Signed => 0.0,
        }
    }

    fn range(self) -> (f64, f64) {
        match self {
            CodeFormat::Unsigned => (0.0, f64::from(u16::MAX)),
            CodeFormat::Signed => (f64::from(i16::MIN), f64::from(i16::MAX)),
        }
    }

    fn to_raw(self, code: i64) -> u16 {
        match self {
            CodeFormat::Unsigned => code as u16,
            CodeFormat::Signed => (code as i16) as u16,
        }
    }
}

/// Per-channel sample to code mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    pub format: CodeFormat,
    /// Channel gain, at most 1.
    pub gain: f64,
    /// Voltage reserve kept for the offset trim.
    pub headroom: f64,
    /// The code LSB carries the marker bit.
    pub mark_in_wave: bool,
}

impl Quantizer {
    pub fn new(traits: &DeviceTraits, format: CodeFormat, gain: f64, mark_in_wave: bool) -> Self {
        Quantizer {
            format,
            gain,
            headroom: traits.headroom,
            mark_in_wave,
        }
    }

    /// Quantize `samples`. In mark-in-wave mode `mark` supplies the LSB of
    /// every code and must be present.
    pub fn quantize(&self, samples: &NumericArray, mark: Option<&[u8]>) -> Result<Vec<u16>> {
        let mark = match (self.mark_in_wave, mark) {
            (true, None) => {
                return Err(Error::precondition("Mark-in-wave mode requires mark data"));
            }
            (true, Some(mark)) if mark.len() != samples.len() => {
                return Err(Error::precondition(format!(
                    "Mark has {} entries, wave has {} samples",
                    mark.len(),
                    samples.len()
                )));
            }
            (true, Some(mark)) => Some(mark),
            (false, _) => None,
        };
        let (low, high) = self.format.range();
        let offset = self.format.mid_scale();
        let mut codes = Vec::with_capacity(samples.len());
        for (index, sample) in samples.iter_f64().enumerate() {
            let level = sample * self.gain / self.headroom + offset;
            let code = match mark {
                Some(mark) => {
                    (level * FULL_SCALE / 2.0).trunc() * 2.0 + f64::from(mark[index])
                }
                None => (level * FULL_SCALE).trunc(),
            };
            if !(low..=high).contains(&code) {
                return Err(Error::CodeOutOfRange { value: sample });
            }
            codes.push(self.format.to_raw(code as i64));
        }
        Ok(codes)
    }
}

/// Quantized samples of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    codes: Vec<u16>,
    format: CodeFormat,
}

impl SampleBuffer {
    pub fn new(format: CodeFormat) -> Self {
        SampleBuffer {
            codes: Vec::new(),
            format,
        }
    }

    pub fn from_codes(format: CodeFormat, codes: Vec<u16>) -> Self {
        SampleBuffer { codes, format }
    }

    pub fn format(&self) -> CodeFormat {
        self.format
    }

    pub fn codes(&self) -> &[u16] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn push_zeros(&mut self, count: usize) {
        let zero = self.format.zero_code();
        self.codes.extend(std::iter::repeat_n(zero, count));
    }

    pub fn extend_from_slice(&mut self, codes: &[u16]) {
        self.codes.extend_from_slice(codes);
    }

    /// Pad with the zero code up to a multiple of `multiple` samples.
    pub fn pad_to_multiple(&mut self, multiple: usize) {
        let rem = self.codes.len() % multiple;
        if rem != 0 {
            self.push_zeros(multiple - rem);
        }
    }

    pub fn padded_to_multiple(&self, multiple: usize) -> SampleBuffer {
        let mut padded = self.clone();
        padded.pad_to_multiple(multiple);
        padded
    }

    /// Little-endian byte image as stored in wave memory.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.codes.iter().flat_map(|code| code.to_le_bytes()).collect()
    }
}
