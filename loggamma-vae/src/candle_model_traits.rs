use crate::candle_vae_outputs::{OutputKey, Reducer, ReportEntry};
use candle_core::{Result, Tensor};

/// Likelihood parameters emitted by a generative network
#[derive(Clone, Debug)]
pub enum ObsParams {
    /// diagonal Gaussian: mean and log covariance (n x d)
    Gaussian { mean: Tensor, logcov: Tensor },
    /// independent Bernoulli logits (n x d)
    Bernoulli { logits: Tensor },
}

impl ObsParams {
    pub fn family(&self) -> &'static str {
        match self {
            ObsParams::Gaussian { .. } => "gaussian",
            ObsParams::Bernoulli { .. } => "bernoulli",
        }
    }
}

/// Networks the LogGamma/Dirichlet layer builds on: hidden layers of
/// the inference side, the Gaussian Z inference, and the generative
/// network. Sampling, divergences and the objective live in the layer.
pub trait SemiVaeBackboneT {
    /// h(x)
    ///
    /// * `x_nd` - input data (n x d)
    ///
    /// # Returns `hx_nh` (n x h)
    fn hidden_x(&self, x_nd: &Tensor) -> Result<Tensor>;

    /// hidden layers between h(x) and the log β head
    fn hidden_logbeta(&self, hx_nh: &Tensor) -> Result<Tensor>;

    /// unclipped log β (n x k)
    fn logbeta(&self, h_nh: &Tensor) -> Result<Tensor>;

    /// Gaussian posterior parameters of Z given (alpha, h(x))
    ///
    /// # Returns `(mu_nl, logcov2_nl)`
    fn infer_z(&self, alpha_nk: &Tensor, hx_nh: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Likelihood parameters of x given (alpha, Z)
    fn generate(&self, alpha_nk: &Tensor, z_nl: &Tensor) -> Result<ObsParams>;

    fn dim_obs(&self) -> usize;

    fn dim_classes(&self) -> usize;

    fn dim_latent(&self) -> usize;

    /// what the progress bar shows by default
    fn progress_bar_report_map(&self) -> Vec<ReportEntry> {
        vec![
            ReportEntry::new("loss/bound", OutputKey::Bound, Reducer::Mean, |v| {
                format!("{:.4}", v)
            }),
            ReportEntry::new("loss/objfunc", OutputKey::Objfunc, Reducer::Mean, |v| {
                format!("{:.4}", v)
            }),
        ]
    }
}
