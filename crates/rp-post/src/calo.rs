//! Calorimetric energy reconstruction and calibration passes.

use tracing::debug;

use rp_common::{Error, EventData, Particle, Product, Result, Shape};

use crate::base::{
    KeySpec, ObjType, PostCore, Processor, RunMode, TruthDepMode, TruthPointMode,
};
use crate::calib::{Calibrator, GainCalibrator, GainCalibratorConfig};
use crate::expr::ScaleFactor;

/// Configuration of [`CalorimetricEnergyProcessor`].
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaloConfig {
    /// Global scaling factor for the depositions (number or expression).
    pub scaling: ScaleFactor,
    /// Shower energy fudge factor, accounts for missing cluster energy
    /// (number or expression).
    pub shower_fudge: ScaleFactor,
    pub obj_type: ObjType,
    pub run_mode: RunMode,
    pub truth_dep_mode: TruthDepMode,
}

impl Default for CaloConfig {
    fn default() -> Self {
        CaloConfig {
            scaling: ScaleFactor::Number(1.0),
            shower_fudge: ScaleFactor::Number(1.0),
            obj_type: ObjType::Particle,
            run_mode: RunMode::Reco,
            truth_dep_mode: TruthDepMode::Depositions,
        }
    }
}

/// Compute calorimetric energy by summing the charge depositions and
/// scaling by the ADC to MeV conversion factor, if needed.
#[derive(Debug)]
pub struct CalorimetricEnergyProcessor {
    core: PostCore,
    scaling: f64,
    shower_fudge: f64,
}

impl CalorimetricEnergyProcessor {
    pub const NAME: &'static str = "calo_ke";
    pub const ALIASES: &'static [&'static str] = &["reconstruct_calo_energy"];

    /// Resolve the conversion factors and fix the object selection.
    pub fn new(config: CaloConfig) -> Result<Self> {
        let scaling = config.scaling.resolve()?;
        let shower_fudge = config.shower_fudge.resolve()?;
        let core = PostCore::new(
            config.obj_type,
            config.run_mode,
            TruthPointMode::Points,
            config.truth_dep_mode,
        );

        Ok(CalorimetricEnergyProcessor {
            core,
            scaling,
            shower_fudge,
        })
    }

    /// Registry builder: deserialize a configuration block and construct.
    pub fn from_config(config: serde_yaml::Value) -> Result<Box<dyn Processor>> {
        let config: CaloConfig = serde_yaml::from_value(config)
            .map_err(|e| Error::Configuration(format!("invalid {} configuration: {e}", Self::NAME)))?;
        Ok(Box::new(Self::new(config)?))
    }
}

impl Processor for CalorimetricEnergyProcessor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn keys(&self) -> &[KeySpec] {
        &self.core.keys
    }

    /// Reconstruct the calorimetric KE for each particle in one entry.
    fn process(&self, data: &mut EventData) -> Result<()> {
        for key in &self.core.obj_keys {
            for part in data.particles_mut(key)?.iter_mut() {
                let mut scaling = self.scaling;
                if part.shape() != Shape::Track {
                    scaling *= self.shower_fudge;
                }

                let total: f64 = self.core.get_depositions(part).iter().sum();
                part.set_calo_ke(scaling * total);
            }
        }
        Ok(())
    }
}

/// Configuration of [`CalibrationProcessor`].
///
/// Fields beyond the ones named here flow to the collaborator configuration.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Static value of dE/dx used to compute the recombination factor when
    /// no local estimate is made.
    pub dedx: f64,
    /// Segment tracks to get a proper local dQ/dx estimate.
    pub do_tracking: bool,
    pub obj_type: ObjType,
    pub run_mode: RunMode,
    pub truth_point_mode: TruthPointMode,
    #[serde(flatten)]
    pub calibrator: GainCalibratorConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            dedx: 2.2,
            do_tracking: false,
            obj_type: ObjType::Particle,
            run_mode: RunMode::Reco,
            truth_point_mode: TruthPointMode::Points,
            calibrator: GainCalibratorConfig::default(),
        }
    }
}

/// Which truth deposition attribute calibration writes back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TruthDepAttr {
    DepositionsQ,
    DepositionsAdaptQ,
}

/// Apply calibrations to the reconstructed objects.
#[derive(Debug)]
pub struct CalibrationProcessor {
    core: PostCore,
    calibrator: Box<dyn Calibrator>,
    dedx: f64,
    do_tracking: bool,
    /// Truth particle attribute written back, resolved from the point mode.
    truth_dep_attr: TruthDepAttr,
    /// Shared truth tensor key written back, resolved from the point mode.
    truth_dep_key: &'static str,
}

impl CalibrationProcessor {
    pub const NAME: &'static str = "calibration";
    pub const ALIASES: &'static [&'static str] = &["apply_calibrations"];

    /// Key of the shared reconstructed deposition tensor.
    pub const DEPOSITIONS_KEY: &'static str = "depositions";

    /// Construct with the default gain calibrator built from configuration.
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        let calibrator = Box::new(GainCalibrator::new(config.calibrator.clone()));
        Self::with_calibrator(config, calibrator)
    }

    /// Construct around an externally supplied calibration collaborator.
    pub fn with_calibrator(
        config: CalibrationConfig,
        calibrator: Box<dyn Calibrator>,
    ) -> Result<Self> {
        // Fixed two-entry lookup: point mode -> (truth attribute, tensor key).
        let (truth_dep_attr, truth_dep_key) = match config.truth_point_mode {
            TruthPointMode::Points => (TruthDepAttr::DepositionsQ, "depositions_label"),
            TruthPointMode::PointsAdapt => (TruthDepAttr::DepositionsAdaptQ, "depositions"),
        };

        let truth_dep_mode = match truth_dep_attr {
            TruthDepAttr::DepositionsQ => TruthDepMode::DepositionsQ,
            TruthDepAttr::DepositionsAdaptQ => TruthDepMode::DepositionsAdaptQ,
        };

        let mut core = PostCore::new(
            config.obj_type,
            config.run_mode,
            config.truth_point_mode,
            truth_dep_mode,
        );
        core.require("run_info", false);
        core.require(Self::DEPOSITIONS_KEY, config.run_mode.covers_reco());
        core.require(truth_dep_key, config.run_mode.covers_truth());

        Ok(CalibrationProcessor {
            core,
            calibrator,
            dedx: config.dedx,
            do_tracking: config.do_tracking,
            truth_dep_attr,
            truth_dep_key,
        })
    }

    /// Registry builder: deserialize a configuration block and construct.
    pub fn from_config(config: serde_yaml::Value) -> Result<Box<dyn Processor>> {
        let config: CalibrationConfig = serde_yaml::from_value(config)
            .map_err(|e| Error::Configuration(format!("invalid {} configuration: {e}", Self::NAME)))?;
        Ok(Box::new(Self::new(config)?))
    }

    /// Run the collaborator for one particle, choosing the call shape.
    fn corrected_depositions(&self, part: &Particle, run_id: Option<i64>) -> Result<Vec<f64>> {
        let points = self.core.get_points(part);
        let depositions = raw_depositions(part);
        let sources = part.sources();

        let corrected = if !self.do_tracking || part.shape() != Shape::Track {
            self.calibrator
                .calibrate(points, depositions, sources, run_id, self.dedx)?
        } else {
            self.calibrator
                .calibrate_tracked(points, depositions, sources, run_id)?
        };

        if corrected.len() != depositions.len() {
            return Err(Error::LengthMismatch {
                context: "calibrated depositions",
                expected: depositions.len(),
                actual: corrected.len(),
            });
        }
        Ok(corrected)
    }

    fn calibrate_collection(
        &self,
        parts: &mut [Particle],
        run_id: Option<i64>,
        data: &mut EventData,
    ) -> Result<()> {
        for part in parts.iter_mut() {
            // Make sure the particle coordinates are expressed in cm.
            self.core.check_units(part)?;

            // Nothing to correct without points.
            if self.core.get_points(part).is_empty() {
                continue;
            }

            let corrected = self.corrected_depositions(part, run_id)?;

            // Update the particle *and* the shared tensor it was drawn from.
            match part {
                Particle::Reco(p) => {
                    let tensor = data.tensor_mut(Self::DEPOSITIONS_KEY)?;
                    for (value, &at) in corrected.iter().zip(p.index.iter()) {
                        match tensor.get_mut(at) {
                            Some(slot) => *slot = *value,
                            None => {
                                return Err(Error::LengthMismatch {
                                    context: "shared deposition tensor",
                                    expected: at + 1,
                                    actual: tensor.len(),
                                })
                            }
                        }
                    }
                    p.depositions = corrected;
                }
                Particle::Truth(p) => {
                    // Truth tensors are not indexed per particle; they are
                    // replaced wholesale, matching the upstream truth
                    // representation.
                    match self.truth_dep_attr {
                        TruthDepAttr::DepositionsQ => p.depositions_q = corrected.clone(),
                        TruthDepAttr::DepositionsAdaptQ => {
                            p.depositions_adapt_q = corrected.clone()
                        }
                    }
                    data.insert(self.truth_dep_key, Product::Tensor(corrected));
                }
            }
        }
        Ok(())
    }
}

/// The particle's own raw deposition array, handed to the collaborator.
fn raw_depositions(part: &Particle) -> &[f64] {
    match part {
        Particle::Reco(p) => &p.depositions,
        Particle::Truth(p) => &p.depositions,
    }
}

impl Processor for CalibrationProcessor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn keys(&self) -> &[KeySpec] {
        &self.core.keys
    }

    /// Apply calibrations to each particle in one entry.
    fn process(&self, data: &mut EventData) -> Result<()> {
        // Fetch the run info once per entry; the collaborator tolerates its
        // absence.
        let run_id = data.run_info().map(|info| info.run);
        debug!(run = ?run_id, tracking = self.do_tracking, "applying calibrations");

        for key in &self.core.obj_keys {
            // The collection is taken out so the shared tensors can be
            // mutated while iterating it; it is restored even on failure.
            let mut parts = data.take_particles(key)?;
            let result = self.calibrate_collection(&mut parts, run_id, data);
            data.put_particles(*key, parts);
            result?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use rp_common::{LengthUnit, RecoParticle, Source, TruthParticle};

    fn reco_particle(shape: Shape, depositions: Vec<f64>, offset: usize) -> Particle {
        let n = depositions.len();
        Particle::Reco(RecoParticle {
            id: 0,
            shape,
            points: (0..n).map(|i| [i as f64, 0.0, 0.0]).collect(),
            depositions,
            sources: vec![Source::default(); n],
            index: (offset..offset + n).collect(),
            units: LengthUnit::Cm,
            calo_ke: None,
        })
    }

    fn entry_with(parts: Vec<Particle>, tensor: Vec<f64>) -> EventData {
        let mut data = EventData::new();
        data.insert("reco_particles", Product::Particles(parts));
        data.insert("depositions", Product::Tensor(tensor));
        data
    }

    #[test]
    fn test_calo_ke_shower_scaling() {
        let processor = CalorimetricEnergyProcessor::new(CaloConfig {
            scaling: 2.0.into(),
            shower_fudge: 1.5.into(),
            ..Default::default()
        })
        .unwrap();

        let mut data = entry_with(
            vec![reco_particle(Shape::Shower, vec![1.0, 2.0, 3.0], 0)],
            vec![1.0, 2.0, 3.0],
        );
        processor.process(&mut data).unwrap();
        assert_eq!(data.particles("reco_particles").unwrap()[0].calo_ke(), Some(18.0));
    }

    #[test]
    fn test_calo_ke_track_skips_fudge() {
        let processor = CalorimetricEnergyProcessor::new(CaloConfig {
            scaling: 2.0.into(),
            shower_fudge: 1.5.into(),
            ..Default::default()
        })
        .unwrap();

        let mut data = entry_with(
            vec![reco_particle(Shape::Track, vec![1.0, 2.0, 3.0], 0)],
            vec![1.0, 2.0, 3.0],
        );
        processor.process(&mut data).unwrap();
        assert_eq!(data.particles("reco_particles").unwrap()[0].calo_ke(), Some(12.0));
    }

    #[test]
    fn test_calo_ke_expression_scaling() {
        let processor = CalorimetricEnergyProcessor::new(CaloConfig {
            scaling: ScaleFactor::Expression("1. / 0.5".into()),
            ..Default::default()
        })
        .unwrap();

        let mut data = entry_with(vec![reco_particle(Shape::Track, vec![3.0], 0)], vec![3.0]);
        processor.process(&mut data).unwrap();
        assert_eq!(data.particles("reco_particles").unwrap()[0].calo_ke(), Some(6.0));
    }

    #[test]
    fn test_calo_ke_empty_depositions_is_zero() {
        let processor = CalorimetricEnergyProcessor::new(CaloConfig::default()).unwrap();
        let mut data = entry_with(vec![reco_particle(Shape::Shower, vec![], 0)], vec![]);
        processor.process(&mut data).unwrap();
        assert_eq!(data.particles("reco_particles").unwrap()[0].calo_ke(), Some(0.0));
    }

    #[test]
    fn test_calo_ke_malformed_expression_fails_at_construction() {
        let err = CalorimetricEnergyProcessor::new(CaloConfig {
            scaling: ScaleFactor::Expression("__import__('os')".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Expression { .. }));
    }

    #[test]
    fn test_calo_ke_truth_dep_mode() {
        let processor = CalorimetricEnergyProcessor::new(CaloConfig {
            scaling: 1.0.into(),
            shower_fudge: 1.0.into(),
            run_mode: RunMode::Truth,
            truth_dep_mode: TruthDepMode::DepositionsAdaptQ,
            ..Default::default()
        })
        .unwrap();

        let mut data = EventData::new();
        data.insert(
            "truth_particles",
            Product::Particles(vec![Particle::Truth(TruthParticle {
                shape: Shape::Track,
                depositions_adapt_q: vec![5.0, 7.0],
                ..Default::default()
            })]),
        );
        processor.process(&mut data).unwrap();
        assert_eq!(data.particles("truth_particles").unwrap()[0].calo_ke(), Some(12.0));
    }

    /// Records which call shape each invocation used; corrections multiply
    /// by a fixed factor so outputs are distinguishable from inputs.
    #[derive(Debug)]
    struct StubCalibrator {
        calls: Mutex<Vec<&'static str>>,
        factor: f64,
    }

    impl StubCalibrator {
        fn shared(factor: f64) -> Arc<Self> {
            Arc::new(StubCalibrator {
                calls: Mutex::new(Vec::new()),
                factor,
            })
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Calibrator for StubCalibrator {
        fn calibrate(
            &self,
            _points: &[[f64; 3]],
            depositions: &[f64],
            _sources: &[Source],
            _run_id: Option<i64>,
            _dedx: f64,
        ) -> rp_common::Result<Vec<f64>> {
            self.calls.lock().unwrap().push("simple");
            Ok(depositions.iter().map(|q| q * self.factor).collect())
        }

        fn calibrate_tracked(
            &self,
            _points: &[[f64; 3]],
            depositions: &[f64],
            _sources: &[Source],
            _run_id: Option<i64>,
        ) -> rp_common::Result<Vec<f64>> {
            self.calls.lock().unwrap().push("tracked");
            Ok(depositions.iter().map(|q| q * self.factor).collect())
        }
    }

    fn calibration_with_stub(
        config: CalibrationConfig,
        factor: f64,
    ) -> (CalibrationProcessor, Arc<StubCalibrator>) {
        let stub = StubCalibrator::shared(factor);
        let processor =
            CalibrationProcessor::with_calibrator(config, Box::new(stub.clone())).unwrap();
        (processor, stub)
    }

    #[test]
    fn test_calibration_reco_aliasing_invariant() {
        let (processor, _stub) = calibration_with_stub(CalibrationConfig::default(), 2.0);

        let mut data = entry_with(
            vec![
                reco_particle(Shape::Shower, vec![1.0, 2.0], 0),
                reco_particle(Shape::Track, vec![3.0, 4.0], 2),
            ],
            vec![1.0, 2.0, 3.0, 4.0],
        );
        processor.process(&mut data).unwrap();

        let tensor: Vec<f64> = data.tensor("depositions").unwrap().to_vec();
        for part in data.particles("reco_particles").unwrap() {
            let p = part.as_reco().unwrap();
            for (value, &at) in p.depositions.iter().zip(p.index.iter()) {
                assert_eq!(tensor[at], *value);
            }
        }
        assert_eq!(tensor, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_calibration_empty_points_is_a_noop() {
        let (processor, stub) = calibration_with_stub(CalibrationConfig::default(), 2.0);

        let mut data = entry_with(vec![reco_particle(Shape::Shower, vec![], 0)], vec![9.0]);
        processor.process(&mut data).unwrap();

        assert!(stub.calls().is_empty());
        assert_eq!(data.tensor("depositions").unwrap(), &[9.0]);
    }

    #[test]
    fn test_calibration_tracking_path_selection() {
        let config = CalibrationConfig {
            do_tracking: true,
            ..Default::default()
        };
        let (processor, stub) = calibration_with_stub(config, 1.0);

        let mut data = entry_with(
            vec![
                reco_particle(Shape::Track, vec![1.0], 0),
                reco_particle(Shape::Shower, vec![2.0], 1),
            ],
            vec![1.0, 2.0],
        );
        processor.process(&mut data).unwrap();
        assert_eq!(stub.calls(), vec!["tracked", "simple"]);

        // Same particles without tracking both take the simple path.
        let (processor, stub) = calibration_with_stub(CalibrationConfig::default(), 1.0);
        let mut data = entry_with(
            vec![
                reco_particle(Shape::Track, vec![1.0], 0),
                reco_particle(Shape::Shower, vec![2.0], 1),
            ],
            vec![1.0, 2.0],
        );
        processor.process(&mut data).unwrap();
        assert_eq!(stub.calls(), vec!["simple", "simple"]);
    }

    #[test]
    fn test_calibration_truth_write_back() {
        let config = CalibrationConfig {
            run_mode: RunMode::Truth,
            truth_point_mode: TruthPointMode::PointsAdapt,
            ..Default::default()
        };
        let (processor, _stub) = calibration_with_stub(config, 3.0);

        let mut data = EventData::new();
        data.insert(
            "truth_particles",
            Product::Particles(vec![Particle::Truth(TruthParticle {
                shape: Shape::Shower,
                points_adapt: vec![[0.0; 3], [1.0, 0.0, 0.0]],
                depositions_adapt: vec![0.0, 0.0],
                depositions_adapt_q: vec![0.0, 0.0],
                depositions: vec![1.0, 2.0],
                depositions_q: vec![1.0, 2.0],
                points: vec![[0.0; 3], [1.0, 0.0, 0.0]],
                sources: vec![Source::default(); 2],
                ..Default::default()
            })]),
        );
        data.insert("depositions", Product::Tensor(vec![0.0, 0.0]));
        processor.process(&mut data).unwrap();

        // The adapted point mode writes the adapted charge attribute and
        // replaces the shared `depositions` tensor wholesale.
        let part = &data.particles("truth_particles").unwrap()[0];
        assert_eq!(part.as_truth().unwrap().depositions_adapt_q, vec![3.0, 6.0]);
        assert_eq!(data.tensor("depositions").unwrap(), &[3.0, 6.0]);
    }

    #[test]
    fn test_calibration_label_point_mode_targets() {
        let config = CalibrationConfig {
            run_mode: RunMode::Truth,
            truth_point_mode: TruthPointMode::Points,
            ..Default::default()
        };
        let (processor, _stub) = calibration_with_stub(config, 2.0);
        assert!(processor
            .keys()
            .iter()
            .any(|s| s.key == "depositions_label" && s.required));

        let mut data = EventData::new();
        data.insert(
            "truth_particles",
            Product::Particles(vec![Particle::Truth(TruthParticle {
                points: vec![[0.0; 3]],
                depositions: vec![4.0],
                depositions_q: vec![0.0],
                sources: vec![Source::default()],
                ..Default::default()
            })]),
        );
        data.insert("depositions_label", Product::Tensor(vec![0.0]));
        processor.process(&mut data).unwrap();

        let part = &data.particles("truth_particles").unwrap()[0];
        assert_eq!(part.as_truth().unwrap().depositions_q, vec![8.0]);
        assert_eq!(data.tensor("depositions_label").unwrap(), &[8.0]);
    }

    #[test]
    fn test_calibration_key_declarations_follow_run_mode() {
        let (processor, _stub) = calibration_with_stub(CalibrationConfig::default(), 1.0);
        let find = |key: &str| {
            processor
                .keys()
                .iter()
                .find(|s| s.key == key)
                .map(|s| s.required)
        };
        assert_eq!(find("run_info"), Some(false));
        assert_eq!(find("depositions"), Some(true));
        assert_eq!(find("depositions_label"), Some(false));

        let config = CalibrationConfig {
            run_mode: RunMode::Truth,
            ..Default::default()
        };
        let (processor, _stub) = calibration_with_stub(config, 1.0);
        let find = |key: &str| {
            processor
                .keys()
                .iter()
                .find(|s| s.key == key)
                .map(|s| s.required)
        };
        assert_eq!(find("depositions"), Some(false));
        assert_eq!(find("depositions_label"), Some(true));
    }

    #[test]
    fn test_calibration_unit_error_aborts_entry() {
        let (processor, stub) = calibration_with_stub(CalibrationConfig::default(), 1.0);

        let mut bad = reco_particle(Shape::Track, vec![1.0], 1);
        bad.as_reco_mut().unwrap().units = LengthUnit::Px;
        let mut data = entry_with(
            vec![bad, reco_particle(Shape::Track, vec![2.0], 0)],
            vec![2.0, 1.0],
        );

        let err = processor.process(&mut data).unwrap_err();
        assert!(matches!(err, Error::Unit { .. }));
        // No silent skip-and-continue: the second particle was never touched.
        assert!(stub.calls().is_empty());
        // The collection itself survives the aborted entry.
        assert_eq!(data.particles("reco_particles").unwrap().len(), 2);
    }

    #[test]
    fn test_calibration_second_pass_scales_again() {
        // The processor is not idempotent when its collaborator applies a
        // multiplicative correction.
        let (processor, _stub) = calibration_with_stub(CalibrationConfig::default(), 2.0);
        let mut data = entry_with(vec![reco_particle(Shape::Track, vec![1.0], 0)], vec![1.0]);
        processor.process(&mut data).unwrap();
        processor.process(&mut data).unwrap();
        assert_eq!(data.tensor("depositions").unwrap(), &[4.0]);
    }
}
