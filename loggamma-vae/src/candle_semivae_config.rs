use crate::candle_annealing::{AnnealSchedule, AnnealState, PriorShape};
use candle_core::Result;

/// clamp on log β before exponentiating; keeps β in [e^-5, e^5]
pub const LOGBETA_CLIP: f64 = 5.0;

/// std of the jitter added to Z during training
pub const Z_NOISE_STD: f64 = 0.05;

/// nllY when the label is taken as alpha itself: -ln(0.1)
pub const DISCRETE_NLL_Y: f64 = std::f64::consts::LN_10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// Gaussian likelihood
    Real,
    /// Bernoulli likelihood
    Binary,
}

/// What the score-function correction multiplies `log q(U)` with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreFunctionBaseline {
    /// `-2 * KL_Z + nllX`
    NegativeKl,
    /// `w(KL_Z) * KL_Z + nllX`
    AnnealedKl,
}

/// Train and eval graphs share parameters but differ in noise,
/// dropout, annealing and the score-function term
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    Train,
    Eval,
}

impl BuildMode {
    pub fn is_training(&self) -> bool {
        matches!(self, BuildMode::Train)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HiddenActivation {
    Relu,
    Silu,
    Gelu,
    Sigmoid,
}

impl From<HiddenActivation> for candle_nn::Activation {
    fn from(act: HiddenActivation) -> Self {
        match act {
            HiddenActivation::Relu => candle_nn::Activation::Relu,
            HiddenActivation::Silu => candle_nn::Activation::Silu,
            HiddenActivation::Gelu => candle_nn::Activation::Gelu,
            HiddenActivation::Sigmoid => candle_nn::Activation::Sigmoid,
        }
    }
}

/// Network sizes for the MLP backbone
#[derive(Clone, Debug)]
pub struct BackboneConfig {
    pub dim_obs: usize,
    pub n_classes: usize,
    pub dim_latent: usize,
    /// width of h(x) and the log β branch
    pub q_dim_hidden: usize,
    /// layers in h(x)
    pub q_layers: usize,
    /// layers between h(x) and the log β head
    pub alpha_inference_layers: usize,
    /// layers between (alpha, h(x)) and the Z heads
    pub z_inference_layers: usize,
    pub p_dim_hidden: usize,
    pub p_layers: usize,
    pub activation: HiddenActivation,
    pub data_type: DataType,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            dim_obs: 784,
            n_classes: 10,
            dim_latent: 50,
            q_dim_hidden: 300,
            q_layers: 2,
            alpha_inference_layers: 2,
            z_inference_layers: 2,
            p_dim_hidden: 200,
            p_layers: 2,
            activation: HiddenActivation::Relu,
            data_type: DataType::Binary,
        }
    }
}

impl BackboneConfig {
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("dim_obs", self.dim_obs),
            ("n_classes", self.n_classes),
            ("dim_latent", self.dim_latent),
            ("q_dim_hidden", self.q_dim_hidden),
            ("p_dim_hidden", self.p_dim_hidden),
            ("q_layers", self.q_layers),
            ("p_layers", self.p_layers),
        ];
        for (name, d) in dims {
            if d == 0 {
                candle_core::bail!("{} must be positive", name);
            }
        }
        Ok(())
    }
}

/// Everything the LogGamma/Dirichlet layer reads at graph-construction time
#[derive(Clone, Debug)]
pub struct SemiVaeConfig {
    pub n_classes: usize,
    pub data_type: DataType,
    /// U is multiplied by this before the softmax
    pub sharpening: f64,
    /// prior shape at step 0
    pub betaprior: PriorShape,
    /// prior shape after the ramp saturates
    pub final_betaprior: PriorShape,
    pub anneal_betaprior: AnnealSchedule,
    pub anneal_kl_alpha: AnnealSchedule,
    pub anneal_kl_z: AnnealSchedule,
    /// with labels, take alpha = Y and skip the LogGamma branch
    pub logpxy_discrete: bool,
    /// learn the label shift `softplus(posterior)` instead of adding 1
    pub learn_posterior: bool,
    pub score_baseline: ScoreFunctionBaseline,
    pub input_dropout: f64,
    pub dropout_logbeta: f64,
}

impl Default for SemiVaeConfig {
    fn default() -> Self {
        Self {
            n_classes: 10,
            data_type: DataType::Binary,
            sharpening: 1.0,
            betaprior: PriorShape::Scalar(0.2),
            final_betaprior: PriorShape::Scalar(1.0),
            anneal_betaprior: AnnealSchedule::LinearRamp { divisor: 50_000.0 },
            anneal_kl_alpha: AnnealSchedule::LinearRamp { divisor: 50_000.0 },
            anneal_kl_z: AnnealSchedule::LinearRamp { divisor: 50_000.0 },
            logpxy_discrete: false,
            learn_posterior: false,
            score_baseline: ScoreFunctionBaseline::AnnealedKl,
            input_dropout: 0.0,
            dropout_logbeta: 0.0,
        }
    }
}

impl SemiVaeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_classes == 0 {
            candle_core::bail!("n_classes must be positive");
        }
        if !self.sharpening.is_finite() || self.sharpening <= 0.0 {
            candle_core::bail!("sharpening must be positive, got {}", self.sharpening);
        }
        for (name, rate) in [
            ("input_dropout", self.input_dropout),
            ("dropout_logbeta", self.dropout_logbeta),
        ] {
            if !(0.0..1.0).contains(&rate) {
                candle_core::bail!("{} must be in [0, 1), got {}", name, rate);
            }
        }
        self.betaprior.validate(self.n_classes)?;
        self.final_betaprior.validate(self.n_classes)?;
        self.anneal_betaprior.validate()?;
        self.anneal_kl_alpha.validate()?;
        self.anneal_kl_z.validate()
    }

    /// Fresh annealing state at step 0
    pub fn anneal_state(&self) -> AnnealState {
        AnnealState::new(
            self.anneal_kl_alpha.clone(),
            self.anneal_kl_z.clone(),
            self.anneal_betaprior.clone(),
            self.betaprior.clone(),
            self.final_betaprior.clone(),
        )
    }
}
