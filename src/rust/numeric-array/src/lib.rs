// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Real-valued sample arrays handed to the waveform compiler.
//!
//! The compiler treats the array as opaque: it only needs elementwise
//! arithmetic, padding and an `f64` view of the samples.

#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    Integer64(Vec<i64>),
    Float64(Vec<f64>),
}

impl NumericArray {
    pub fn abs_at_index(&self, index: usize) -> Option<f64> {
        match self {
            NumericArray::Integer64(vec) => vec.get(index).map(|x| x.abs() as f64),
            NumericArray::Float64(vec) => vec.get(index).map(|x| x.abs()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NumericArray::Integer64(vec) => vec.len(),
            NumericArray::Float64(vec) => vec.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            NumericArray::Integer64(vec) => vec.is_empty(),
            NumericArray::Float64(vec) => vec.is_empty(),
        }
    }

    pub fn iter_f64(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            NumericArray::Integer64(vec) => Box::new(vec.iter().map(|x| *x as f64)),
            NumericArray::Float64(vec) => Box::new(vec.iter().copied()),
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.iter_f64().collect()
    }

    /// Largest absolute sample, `0.0` for an empty array.
    pub fn max_abs(&self) -> f64 {
        self.iter_f64().fold(0.0, |acc, x| acc.max(x.abs()))
    }

    /// Multiply every sample by `factor`.
    pub fn scale(&self, factor: f64) -> NumericArray {
        NumericArray::Float64(self.iter_f64().map(|x| x * factor).collect())
    }

    /// Add `offset` to every sample.
    pub fn offset(&self, offset: f64) -> NumericArray {
        NumericArray::Float64(self.iter_f64().map(|x| x + offset).collect())
    }

    /// First difference, with the first sample kept as is so the length is
    /// unchanged. Used for pre-emphasis of fast edges.
    pub fn derivative(&self) -> NumericArray {
        let samples = self.to_f64_vec();
        let mut out = Vec::with_capacity(samples.len());
        let mut previous = 0.0;
        for x in samples {
            out.push(x - previous);
            previous = x;
        }
        NumericArray::Float64(out)
    }

    /// Pad at the end with `value` up to the next multiple of `multiple`.
    pub fn padded_to_multiple(&self, multiple: usize, value: f64) -> NumericArray {
        let mut samples = self.to_f64_vec();
        if multiple > 0 {
            let rem = samples.len() % multiple;
            if rem != 0 {
                samples.resize(samples.len() + multiple - rem, value);
            }
        }
        NumericArray::Float64(samples)
    }
}

impl From<Vec<f64>> for NumericArray {
    fn from(value: Vec<f64>) -> Self {
        NumericArray::Float64(value)
    }
}

impl From<Vec<i64>> for NumericArray {
    fn from(value: Vec<i64>) -> Self {
        NumericArray::Integer64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_and_offset() {
        let a = NumericArray::from(vec![1i64, -2, 3]);
        assert_eq!(a.scale(0.5), NumericArray::Float64(vec![0.5, -1.0, 1.5]));
        assert_eq!(a.offset(1.0), NumericArray::Float64(vec![2.0, -1.0, 4.0]));
        assert_eq!(a.max_abs(), 3.0);
    }

    #[test]
    fn test_derivative_keeps_length() {
        let a = NumericArray::from(vec![0.0, 1.0, 1.0, 0.5]);
        assert_eq!(
            a.derivative(),
            NumericArray::Float64(vec![0.0, 1.0, 0.0, -0.5])
        );
    }

    #[test]
    fn test_padding() {
        let a = NumericArray::from(vec![1.0; 5]);
        let padded = a.padded_to_multiple(4, 0.0);
        assert_eq!(padded.len(), 8);
        assert_eq!(padded.abs_at_index(7), Some(0.0));
        assert_eq!(a.padded_to_multiple(5, 0.0).len(), 5);
    }
}
