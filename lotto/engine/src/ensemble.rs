use crate::{
    config::{EnsembleWeights, NUM_NUMBERS},
    error::EngineError,
    model::ModelKind,
    scorer::ScoreVector,
};

/// Weighted average of the two model score vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ensembler {
    weights: EnsembleWeights,
    universe: usize,
}

impl Ensembler {
    /// Creates an ensembler for vectors of length `universe`.
    pub fn new(weights: EnsembleWeights, universe: usize) -> Result<Self, EngineError> {
        weights.validate()?;
        Ok(Self { weights, universe })
    }

    /// Configured weights.
    #[must_use]
    pub const fn weights(&self) -> EnsembleWeights {
        self.weights
    }

    /// `blended[i] = w_rf * rf[i] + w_xgb * xgb[i]`.
    pub fn blend(&self, rf: &ScoreVector, xgb: &ScoreVector) -> Result<ScoreVector, EngineError> {
        for scores in [rf, xgb] {
            if scores.len() != self.universe {
                return Err(EngineError::DimensionMismatch {
                    expected: self.universe,
                    actual: scores.len(),
                });
            }
        }
        let w_rf = self.weights.for_model(ModelKind::Rf);
        let w_xgb = self.weights.for_model(ModelKind::Xgb);
        let blended = rf
            .as_slice()
            .iter()
            .zip(xgb.as_slice())
            .map(|(p_rf, p_xgb)| w_rf.mul_add(*p_rf, w_xgb * p_xgb))
            .collect();
        Ok(ScoreVector::new(blended))
    }
}

/// Blends two 45-number score vectors with `weights`.
pub fn blend(
    rf: &ScoreVector,
    xgb: &ScoreVector,
    weights: EnsembleWeights,
) -> Result<ScoreVector, EngineError> {
    Ensembler::new(weights, NUM_NUMBERS)?.blend(rf, xgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture_scores;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    #[test]
    fn averages_with_equal_weights() {
        let (rf, xgb) = fixture_scores();
        let blended = blend(&rf, &xgb, EnsembleWeights::default()).unwrap();
        assert_eq!(blended.len(), 45);
        let head: Vec<f32> = blended.as_slice()[..3].to_vec();
        for (got, want) in head.iter().zip([0.5, 0.5, 0.75]) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn respects_uneven_weights() {
        let rf = ScoreVector::new(vec![1.0; 45]);
        let xgb = ScoreVector::new(vec![0.0; 45]);
        let weights = EnsembleWeights::new(0.25, 0.75).unwrap();
        let blended = blend(&rf, &xgb, weights).unwrap();
        assert!(blended.as_slice().iter().all(|p| (p - 0.25).abs() < 1e-6));
    }

    #[test]
    fn rejects_short_vectors() {
        let rf = ScoreVector::new(vec![0.5; 45]);
        let xgb = ScoreVector::new(vec![0.5; 44]);
        let err = blend(&rf, &xgb, EnsembleWeights::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch {
                expected: 45,
                actual: 44
            }
        ));
    }

    #[test]
    fn rejects_invalid_weights() {
        let weights = EnsembleWeights { rf: 0.7, xgb: 0.7 };
        assert!(matches!(
            Ensembler::new(weights, 45),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn stays_within_unit_interval() {
        let mut rng = SmallRng::seed_from_u64(645);
        for _ in 0..200 {
            let rf = ScoreVector::new((0..45).map(|_| rng.gen_range(0.0..=1.0)).collect());
            let xgb = ScoreVector::new((0..45).map(|_| rng.gen_range(0.0..=1.0)).collect());
            let w = rng.gen_range(0.0..=1.0_f32);
            let weights = EnsembleWeights { rf: w, xgb: 1.0 - w };
            let blended = Ensembler::new(weights, 45).unwrap().blend(&rf, &xgb).unwrap();
            assert_eq!(blended.len(), 45);
            assert!(blended
                .as_slice()
                .iter()
                .all(|p| (-1e-6..=1.0 + 1e-6).contains(p)));
        }
    }
}
