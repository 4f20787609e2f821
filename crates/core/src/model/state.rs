//! PV field storage for one ensemble member
//!
//! `PvField` is the physical boundary PV, two `n × n` levels stored flat in
//! row-major order (`[level][y][x]`). `PvState` pairs it with the spectral
//! representation and tracks which side is current, so the two can never be
//! read while out of sync.

use crate::error::SqgError;
use crate::spectral::{Complex64, SpectralTransform};
use serde::{Deserialize, Serialize};

/// Boundary PV on the physical grid
///
/// Level 0 is the lower boundary (z = 0), level 1 the upper boundary (z = H).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvField {
    /// Values in `[level][y][x]` order
    pub data: Vec<f64>,
    /// Grid points in each direction
    pub n: usize,
}

impl PvField {
    /// Number of boundary levels
    pub const LEVELS: usize = 2;

    /// Field of zeros on an `n × n` grid
    pub fn zeros(n: usize) -> Self {
        Self {
            data: vec![0.0; Self::LEVELS * n * n],
            n,
        }
    }

    /// Wrap flat `[level][y][x]` data
    ///
    /// # Errors
    ///
    /// `InvalidLevelCount` if `levels != 2`, `ShapeMismatch` if the data
    /// length is not `levels × n × n`
    pub fn from_shape(levels: usize, n: usize, data: Vec<f64>) -> Result<Self, SqgError> {
        if levels != Self::LEVELS {
            return Err(SqgError::InvalidLevelCount(levels));
        }
        if data.len() != levels * n * n {
            return Err(SqgError::ShapeMismatch {
                what: "pv field",
                expected: levels * n * n,
                found: data.len(),
            });
        }
        Ok(Self { data, n })
    }

    /// Check that the data holds exactly two `n × n` levels
    ///
    /// # Errors
    ///
    /// `InvalidLevelCount` if the data is a whole number of levels other
    /// than two, `ShapeMismatch` if it is not a whole number of levels
    pub fn validate(&self) -> Result<(), SqgError> {
        let npts = self.n * self.n;
        if npts == 0 || self.data.len() % npts != 0 {
            return Err(SqgError::ShapeMismatch {
                what: "pv field",
                expected: Self::LEVELS * npts,
                found: self.data.len(),
            });
        }
        let levels = self.data.len() / npts;
        if levels != Self::LEVELS {
            return Err(SqgError::InvalidLevelCount(levels));
        }
        Ok(())
    }

    /// Build a field by evaluating `value(level, x, y)` at every point
    pub fn from_fn(n: usize, mut value: impl FnMut(usize, usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(Self::LEVELS * n * n);
        for level in 0..Self::LEVELS {
            for y in 0..n {
                for x in 0..n {
                    data.push(value(level, x, y));
                }
            }
        }
        Self { data, n }
    }

    /// Points per level
    pub fn points(&self) -> usize {
        self.n * self.n
    }

    /// One level as a slice
    pub fn level(&self, level: usize) -> &[f64] {
        let npts = self.points();
        &self.data[level * npts..(level + 1) * npts]
    }

    /// One level as a mutable slice
    pub fn level_mut(&mut self, level: usize) -> &mut [f64] {
        let npts = self.points();
        &mut self.data[level * npts..(level + 1) * npts]
    }

    /// Value at grid position
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn get(&self, level: usize, x: usize, y: usize) -> f64 {
        assert!(
            level < Self::LEVELS && x < self.n && y < self.n,
            "Coordinates out of bounds"
        );
        self.data[(level * self.n + y) * self.n + x]
    }

    /// Set value at grid position
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    pub fn set(&mut self, level: usize, x: usize, y: usize, value: f64) {
        assert!(
            level < Self::LEVELS && x < self.n && y < self.n,
            "Coordinates out of bounds"
        );
        self.data[(level * self.n + y) * self.n + x] = value;
    }

    /// Get reference to field data
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Get mutable reference to field data
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Both,
    PhysicalStale,
    SpectralStale,
}

/// Physical and spectral PV kept consistent through a freshness flag
///
/// Writing one representation marks the other stale; reading a stale side
/// re-synchronizes it with the supplied transform.
#[derive(Debug, Clone)]
pub struct PvState {
    physical: PvField,
    spectral: Vec<Complex64>,
    freshness: Freshness,
}

impl PvState {
    /// Start from a physical field, transforming it once
    pub fn from_physical(field: PvField, transform: &SpectralTransform) -> Self {
        let spectral = transform.forward_levels(field.as_slice());
        Self {
            physical: field,
            spectral,
            freshness: Freshness::Both,
        }
    }

    /// Grid points in each direction
    pub fn n(&self) -> usize {
        self.physical.n
    }

    /// Whether both representations are current
    pub fn is_synchronized(&self) -> bool {
        self.freshness == Freshness::Both
    }

    /// Physical field, transforming from spectral space if needed
    pub fn physical(&mut self, transform: &SpectralTransform) -> &PvField {
        if self.freshness == Freshness::PhysicalStale {
            self.physical.data = transform.inverse_levels(&self.spectral);
            self.freshness = Freshness::Both;
        }
        &self.physical
    }

    /// Spectral field, transforming from physical space if needed
    pub fn spectral(&mut self, transform: &SpectralTransform) -> &[Complex64] {
        if self.freshness == Freshness::SpectralStale {
            self.spectral = transform.forward_levels(self.physical.as_slice());
            self.freshness = Freshness::Both;
        }
        &self.spectral
    }

    /// Replace the physical field
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the new field is on a different grid
    pub fn set_physical(&mut self, field: PvField) -> Result<(), SqgError> {
        if field.data.len() != self.physical.data.len() {
            return Err(SqgError::ShapeMismatch {
                what: "pv field",
                expected: self.physical.data.len(),
                found: field.data.len(),
            });
        }
        self.physical = field;
        self.freshness = Freshness::SpectralStale;
        Ok(())
    }

    /// Replace the spectral field
    ///
    /// # Panics
    ///
    /// Panics if the coefficient count differs from the current spectrum
    pub fn set_spectral(&mut self, spectral: Vec<Complex64>) {
        assert_eq!(
            spectral.len(),
            self.spectral.len(),
            "spectral pv has wrong length"
        );
        self.spectral = spectral;
        self.freshness = Freshness::PhysicalStale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_field_creation() {
        let field = PvField::zeros(4);
        assert_eq!(field.n, 4);
        assert_eq!(field.data.len(), 32);
        assert!(field.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_from_shape_rejects_wrong_levels() {
        let err = PvField::from_shape(3, 4, vec![0.0; 48]).unwrap_err();
        assert_eq!(err, SqgError::InvalidLevelCount(3));
        let err = PvField::from_shape(2, 4, vec![0.0; 30]).unwrap_err();
        assert!(matches!(err, SqgError::ShapeMismatch { expected: 32, .. }));
    }

    #[test]
    fn test_get_set_and_levels() {
        let mut field = PvField::zeros(4);
        field.set(1, 2, 3, 5.0);
        assert_eq!(field.get(1, 2, 3), 5.0);
        assert_eq!(field.level(1)[3 * 4 + 2], 5.0);
        assert!(field.level(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_state_resynchronizes_after_spectral_write() {
        let n = 8;
        let transform = SpectralTransform::new(n, 0).unwrap();
        let field = PvField::from_fn(n, |level, x, y| (level + x * y) as f64);
        let mut state = PvState::from_physical(field.clone(), &transform);
        assert!(state.is_synchronized());

        let mut spec = state.spectral(&transform).to_vec();
        for c in &mut spec {
            *c *= 2.0;
        }
        state.set_spectral(spec);
        assert!(!state.is_synchronized());

        let doubled = state.physical(&transform).clone();
        assert!(state.is_synchronized());
        for (a, b) in field.data.iter().zip(&doubled.data) {
            assert_abs_diff_eq!(2.0 * a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_state_resynchronizes_after_physical_write() {
        let n = 8;
        let transform = SpectralTransform::new(n, 0).unwrap();
        let mut state = PvState::from_physical(PvField::zeros(n), &transform);

        let ones = PvField::from_fn(n, |_, _, _| 1.0);
        state.set_physical(ones).unwrap();
        let spec = state.spectral(&transform);
        assert_abs_diff_eq!(spec[0].re, 64.0, epsilon = 1e-10);

        let wrong = PvField::zeros(4);
        assert!(state.set_physical(wrong).is_err());
    }
}
