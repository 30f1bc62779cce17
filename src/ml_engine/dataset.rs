//! Dataset - Slices etiquetados para training
//!
//! A slice is a contiguous row range of the series turned into a feature matrix
//! and one label vector. Rows whose label is missing are dropped.

use ndarray::{Array1, Array2, Axis};

/// Feature matrix plus target for one (row range, label)
#[derive(Debug, Clone)]
pub struct LabeledSlice {
    pub x: Array2<f64>,
    /// Target: 1.0 positivo, 0.0 negativo
    pub y: Array1<f64>,
}

impl LabeledSlice {
    /// Keep the rows of `x` and `y` whose label is finite
    pub fn new(x: Array2<f64>, y: Array1<f64>) -> Self {
        let keep: Vec<usize> = y
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, _)| i)
            .collect();

        if keep.len() == y.len() {
            return Self { x, y };
        }

        Self {
            x: x.select(Axis(0), &keep),
            y: y.select(Axis(0), &keep),
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Calcular estadísticas del slice
    pub fn statistics(&self) -> SliceStats {
        let positives = self.y.iter().filter(|&&v| v >= 0.5).count();
        let total = self.len();
        SliceStats {
            total_samples: total,
            positive_samples: positives,
            negative_samples: total - positives,
            class_balance: if total == 0 {
                0.0
            } else {
                positives as f64 / total as f64
            },
        }
    }
}

/// Estadísticas del slice
#[derive(Debug, Clone, PartialEq)]
pub struct SliceStats {
    pub total_samples: usize,
    pub positive_samples: usize,
    pub negative_samples: usize,
    pub class_balance: f64,
}
