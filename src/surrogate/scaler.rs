//! Per-column standardization, `(x − mean) / scale`.

use serde::{Deserialize, Serialize};

/// Columns whose spread is below this are left unscaled (scale 1).
const MIN_SCALE: f64 = 10.0 * f64::EPSILON;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fits column means and population standard deviations.
    ///
    /// Returns `None` for an empty input.
    pub fn fit<R: AsRef<[f64]>>(rows: &[R]) -> Option<StandardScaler> {
        let first = rows.first()?.as_ref();
        let width = first.len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.as_ref()) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in variance.iter_mut().zip(row.as_ref()).zip(&mean) {
                *s += (v - m) * (v - m);
            }
        }
        let scale = variance
            .into_iter()
            .map(|s| {
                let std = (s / n).sqrt();
                if std < MIN_SCALE { 1.0 } else { std }
            })
            .collect();

        Some(StandardScaler { mean, scale })
    }

    /// Single-column scaler over scalar values.
    pub fn fit_values(values: &[f64]) -> Option<StandardScaler> {
        let rows: Vec<[f64; 1]> = values.iter().map(|v| [*v]).collect();
        Self::fit(&rows)
    }

    pub fn transform<const N: usize>(&self, row: &[f64; N]) -> [f64; N] {
        let mut out = [0.0; N];
        for (i, o) in out.iter_mut().enumerate() {
            *o = (row[i] - self.mean[i]) / self.scale[i];
        }
        out
    }

    pub fn transform_value(&self, value: f64) -> f64 {
        (value - self.mean[0]) / self.scale[0]
    }

    pub fn inverse_value(&self, value: f64) -> f64 {
        value.mul_add(self.scale[0], self.mean[0])
    }

    /// Standard deviations only rescale; the mean shift does not apply.
    pub fn inverse_std(&self, std: f64) -> f64 {
        std * self.scale[0]
    }

    /// True when lengths agree with `width` and every entry is finite with a
    /// positive scale.
    pub fn is_valid(&self, width: usize) -> bool {
        self.mean.len() == width
            && self.scale.len() == width
            && self.mean.iter().all(|m| m.is_finite())
            && self.scale.iter().all(|s| s.is_finite() && *s > 0.0)
    }
}
