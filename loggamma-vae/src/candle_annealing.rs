use candle_core::{DType, Device, Result, Tensor};

/// where every linear ramp starts
pub const ANNEAL_FLOOR: f64 = 0.01;

/// Linear ramp then clamp
///
/// c(t) = 1 if t/D > 1, otherwise min(1, 0.01 + t/D)
///
/// * `step` - number of optimizer updates so far
/// * `divisor` - number of updates for the ramp (D)
///
pub fn annealing_coefficient(step: u64, divisor: f64) -> f64 {
    let ratio = step as f64 / divisor;
    if ratio > 1.0 {
        1.0
    } else {
        (ANNEAL_FLOOR + ratio).min(1.0)
    }
}

/// Quantities whose weight follows its own schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnealTarget {
    KlAlpha,
    KlZ,
    BetaPrior,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnnealSchedule {
    /// constant weight, e.g., no annealing
    Fixed(f64),
    /// `annealing_coefficient(t, divisor)`
    LinearRamp { divisor: f64 },
}

impl AnnealSchedule {
    pub fn coefficient(&self, step: u64) -> f64 {
        match self {
            AnnealSchedule::Fixed(w) => *w,
            AnnealSchedule::LinearRamp { divisor } => annealing_coefficient(step, *divisor),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            AnnealSchedule::Fixed(w) if !(0.0..=1.0).contains(w) => {
                candle_core::bail!("fixed annealing weight must be in [0, 1], got {}", w)
            }
            AnnealSchedule::LinearRamp { divisor } if !divisor.is_finite() || *divisor <= 0.0 => {
                candle_core::bail!("annealing divisor must be positive, got {}", divisor)
            }
            _ => Ok(()),
        }
    }
}

/// Prior shape of the LogGamma/Dirichlet prior
#[derive(Clone, Debug, PartialEq)]
pub enum PriorShape {
    Scalar(f64),
    PerClass(Vec<f64>),
}

impl PriorShape {
    pub fn validate(&self, n_classes: usize) -> Result<()> {
        let values = match self {
            PriorShape::Scalar(b) => std::slice::from_ref(b),
            PriorShape::PerClass(bb) => {
                if bb.len() != n_classes {
                    candle_core::bail!(
                        "per-class prior has {} entries but there are {} classes",
                        bb.len(),
                        n_classes
                    );
                }
                bb.as_slice()
            }
        };
        if values.iter().any(|b| !b.is_finite() || *b <= 0.0) {
            candle_core::bail!("prior shape must be positive: {:?}", values);
        }
        Ok(())
    }

    /// `self * (1 - coef) + other * coef`, elementwise
    pub fn interpolate(&self, other: &PriorShape, coef: f64) -> Result<PriorShape> {
        let mix = |a: f64, b: f64| a * (1.0 - coef) + b * coef;
        Ok(match (self, other) {
            (PriorShape::Scalar(a), PriorShape::Scalar(b)) => PriorShape::Scalar(mix(*a, *b)),
            (PriorShape::Scalar(a), PriorShape::PerClass(bb)) => {
                PriorShape::PerClass(bb.iter().map(|b| mix(*a, *b)).collect())
            }
            (PriorShape::PerClass(aa), PriorShape::Scalar(b)) => {
                PriorShape::PerClass(aa.iter().map(|a| mix(*a, *b)).collect())
            }
            (PriorShape::PerClass(aa), PriorShape::PerClass(bb)) => {
                if aa.len() != bb.len() {
                    candle_core::bail!("prior lengths differ: {} vs {}", aa.len(), bb.len());
                }
                PriorShape::PerClass(aa.iter().zip(bb).map(|(a, b)| mix(*a, *b)).collect())
            }
        })
    }

    pub fn mean(&self) -> f64 {
        match self {
            PriorShape::Scalar(b) => *b,
            PriorShape::PerClass(bb) => bb.iter().sum::<f64>() / bb.len().max(1) as f64,
        }
    }

    /// A `[1, K]` row to broadcast over a minibatch
    pub fn to_tensor(&self, n_classes: usize, dtype: DType, device: &Device) -> Result<Tensor> {
        let row = match self {
            PriorShape::Scalar(b) => vec![*b; n_classes],
            PriorShape::PerClass(bb) => bb.clone(),
        };
        Tensor::from_vec(row, (1, n_classes), &Device::Cpu)?
            .to_dtype(dtype)?
            .to_device(device)
    }
}

/// Hyperparameter values at the current update count
#[derive(Clone, Debug, PartialEq)]
pub struct AnnealedHyperparams {
    pub step: u64,
    pub kl_alpha: f64,
    pub kl_z: f64,
    pub betaprior_coef: f64,
    pub betaprior: PriorShape,
}

/// The update counter and the schedules that read it
#[derive(Clone, Debug)]
pub struct AnnealState {
    step: u64,
    kl_alpha: AnnealSchedule,
    kl_z: AnnealSchedule,
    betaprior: AnnealSchedule,
    initial_betaprior: PriorShape,
    final_betaprior: PriorShape,
}

impl AnnealState {
    pub fn new(
        kl_alpha: AnnealSchedule,
        kl_z: AnnealSchedule,
        betaprior: AnnealSchedule,
        initial_betaprior: PriorShape,
        final_betaprior: PriorShape,
    ) -> Self {
        Self {
            step: 0,
            kl_alpha,
            kl_z,
            betaprior,
            initial_betaprior,
            final_betaprior,
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// once per optimizer update
    pub fn advance(&mut self) {
        self.step += 1;
    }

    pub fn set_step(&mut self, step: u64) {
        self.step = step;
    }

    pub fn coefficient(&self, target: AnnealTarget) -> f64 {
        match target {
            AnnealTarget::KlAlpha => self.kl_alpha.coefficient(self.step),
            AnnealTarget::KlZ => self.kl_z.coefficient(self.step),
            AnnealTarget::BetaPrior => self.betaprior.coefficient(self.step),
        }
    }

    pub fn hyperparameters(&self) -> Result<AnnealedHyperparams> {
        let betaprior_coef = self.coefficient(AnnealTarget::BetaPrior);
        Ok(AnnealedHyperparams {
            step: self.step,
            kl_alpha: self.coefficient(AnnealTarget::KlAlpha),
            kl_z: self.coefficient(AnnealTarget::KlZ),
            betaprior_coef,
            betaprior: self
                .initial_betaprior
                .interpolate(&self.final_betaprior, betaprior_coef)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_ramp_boundaries() {
        let d = 500.0;
        assert_abs_diff_eq!(annealing_coefficient(0, d), 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(annealing_coefficient(250, d), 0.51, epsilon = 1e-12);
        assert_abs_diff_eq!(annealing_coefficient(500, d), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(annealing_coefficient(501, d), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(annealing_coefficient(1_000_000, d), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ramp_is_continuous_and_monotone() {
        let d = 100.0;
        let coefs: Vec<f64> = (0..=150).map(|t| annealing_coefficient(t, d)).collect();
        for w in coefs.windows(2) {
            assert!(w[1] >= w[0]);
            assert!(w[1] - w[0] <= 1.0 / d + 1e-12);
        }
        assert!(coefs.iter().all(|c| (0.0..=1.0).contains(c)));
    }

    #[test]
    fn test_betaprior_interpolation() -> Result<()> {
        let mut state = AnnealState::new(
            AnnealSchedule::Fixed(1.0),
            AnnealSchedule::LinearRamp { divisor: 10.0 },
            AnnealSchedule::LinearRamp { divisor: 10.0 },
            PriorShape::Scalar(0.2),
            PriorShape::Scalar(1.0),
        );

        let h0 = state.hyperparameters()?;
        assert_abs_diff_eq!(h0.kl_alpha, 1.0);
        assert_abs_diff_eq!(h0.kl_z, 0.01);
        assert_abs_diff_eq!(h0.betaprior.mean(), 0.2 * 0.99 + 1.0 * 0.01, epsilon = 1e-12);

        for _ in 0..10 {
            state.advance();
        }
        let h1 = state.hyperparameters()?;
        assert_eq!(h1.step, 10);
        assert_eq!(h1.betaprior, PriorShape::Scalar(1.0));
        Ok(())
    }

    #[test]
    fn test_per_class_prior() -> Result<()> {
        let a = PriorShape::PerClass(vec![1.0, 2.0]);
        let b = PriorShape::Scalar(3.0);
        assert_eq!(a.interpolate(&b, 0.5)?, PriorShape::PerClass(vec![2.0, 2.5]));
        assert!(a.validate(3).is_err());
        assert!(PriorShape::Scalar(-1.0).validate(3).is_err());

        let row = a.to_tensor(2, DType::F32, &Device::Cpu)?;
        assert_eq!(row.to_vec2::<f32>()?, vec![vec![1.0, 2.0]]);
        Ok(())
    }

    #[test]
    fn test_schedule_validation() {
        assert!(AnnealSchedule::LinearRamp { divisor: 0.0 }.validate().is_err());
        assert!(AnnealSchedule::Fixed(1.5).validate().is_err());
        assert!(AnnealSchedule::Fixed(0.3).validate().is_ok());
    }
}
