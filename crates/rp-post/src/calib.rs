//! Calibration collaborator interface.
//!
//! The physics of the detector-response correction lives behind the
//! [`Calibrator`] trait; this crate only relies on the two call shapes and
//! on both returning one corrected deposition per input deposition.
//! Collaborator failures (e.g. a gain lookup miss for a run) propagate
//! unmodified — depositions are never silently left half-corrected or
//! defaulted.

use serde::Deserialize;

use rp_common::{Result, Source};

/// Detector-response correction applied to raw depositions.
pub trait Calibrator: std::fmt::Debug + Send + Sync {
    /// Correct depositions using a static dE/dx assumption for the
    /// recombination factor.
    fn calibrate(
        &self,
        points: &[[f64; 3]],
        depositions: &[f64],
        sources: &[Source],
        run_id: Option<i64>,
        dedx: f64,
    ) -> Result<Vec<f64>>;

    /// Correct depositions of a track, segmenting it to estimate a local
    /// dQ/dx instead of assuming a single static dE/dx.
    fn calibrate_tracked(
        &self,
        points: &[[f64; 3]],
        depositions: &[f64],
        sources: &[Source],
        run_id: Option<i64>,
    ) -> Result<Vec<f64>>;
}

impl<T: Calibrator + ?Sized> Calibrator for std::sync::Arc<T> {
    fn calibrate(
        &self,
        points: &[[f64; 3]],
        depositions: &[f64],
        sources: &[Source],
        run_id: Option<i64>,
        dedx: f64,
    ) -> Result<Vec<f64>> {
        (**self).calibrate(points, depositions, sources, run_id, dedx)
    }

    fn calibrate_tracked(
        &self,
        points: &[[f64; 3]],
        depositions: &[f64],
        sources: &[Source],
        run_id: Option<i64>,
    ) -> Result<Vec<f64>> {
        (**self).calibrate_tracked(points, depositions, sources, run_id)
    }
}

/// Configuration of the default [`GainCalibrator`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GainCalibratorConfig {
    /// Flat electronics gain applied to every deposition.
    pub gain: f64,
    /// Recombination slope; the correction divisor is `1 + recomb * dE/dx`.
    pub recomb: f64,
}

impl Default for GainCalibratorConfig {
    fn default() -> Self {
        GainCalibratorConfig {
            gain: 1.0,
            recomb: 0.0,
        }
    }
}

/// Default collaborator: flat gain with a linear recombination model.
///
/// This carries none of the run- or geometry-dependent detector physics of a
/// full calibration service; it exists so a processor built from
/// configuration alone is runnable end to end.
#[derive(Debug, Clone)]
pub struct GainCalibrator {
    gain: f64,
    recomb: f64,
}

impl GainCalibrator {
    pub fn new(config: GainCalibratorConfig) -> Self {
        GainCalibrator {
            gain: config.gain,
            recomb: config.recomb,
        }
    }

    fn correction(&self, dedx: f64) -> f64 {
        self.gain / (1.0 + self.recomb * dedx)
    }
}

impl Calibrator for GainCalibrator {
    fn calibrate(
        &self,
        _points: &[[f64; 3]],
        depositions: &[f64],
        _sources: &[Source],
        _run_id: Option<i64>,
        dedx: f64,
    ) -> Result<Vec<f64>> {
        let factor = self.correction(dedx);
        Ok(depositions.iter().map(|q| q * factor).collect())
    }

    fn calibrate_tracked(
        &self,
        points: &[[f64; 3]],
        depositions: &[f64],
        _sources: &[Source],
        _run_id: Option<i64>,
    ) -> Result<Vec<f64>> {
        // Local dQ/dx from the spacing to the previous point; falls back to
        // the raw deposition when two points coincide.
        let mut out = Vec::with_capacity(depositions.len());
        for (i, q) in depositions.iter().enumerate() {
            let dedx = if i == 0 || i >= points.len() {
                *q
            } else {
                let step = distance(&points[i - 1], &points[i]);
                if step > 0.0 {
                    q / step
                } else {
                    *q
                }
            };
            out.push(q * self.correction(dedx));
        }
        Ok(out)
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}
