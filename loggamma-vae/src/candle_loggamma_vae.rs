use crate::candle_annealing::{AnnealTarget, AnnealedHyperparams};
use crate::candle_loss_functions::*;
use crate::candle_model_traits::*;
use crate::candle_random_stream::RandomStream;
use crate::candle_semivae_config::*;
use crate::candle_special_functions::digamma;
use crate::candle_vae_outputs::*;
use crate::candle_variational;
use candle_core::{DType, Result, Tensor};
use candle_nn::{ops, VarBuilder};
use log::debug;

/// Semi-supervised VAE whose class variable is Dirichlet, drawn
/// through LogGamma variates
///
/// The alpha branch cannot be reparameterized, so its gradient comes
/// from a score-function term `f * log q(U | β)` with `f` detached.
pub struct LogGammaSemiVae<B>
where
    B: SemiVaeBackboneT,
{
    backbone: B,
    config: SemiVaeConfig,
    posterior: Option<Tensor>,
    anneal: crate::candle_annealing::AnnealState,
}

impl<B> LogGammaSemiVae<B>
where
    B: SemiVaeBackboneT,
{
    /// * `backbone` - hidden, inference and generative networks
    /// * `config` - validated here
    /// * `vs` - registers `q_alpha_y.posterior` when `learn_posterior`
    pub fn new(backbone: B, config: SemiVaeConfig, vs: VarBuilder) -> Result<Self> {
        config.validate()?;

        if backbone.dim_classes() != config.n_classes {
            candle_core::bail!(
                "backbone has {} classes but the layer expects {}",
                backbone.dim_classes(),
                config.n_classes
            );
        }

        let posterior = if config.learn_posterior {
            Some(vs.pp("q_alpha_y").get_with_hints(
                (1, 1),
                "posterior",
                candle_nn::Init::Const(1.),
            )?)
        } else {
            None
        };

        let anneal = config.anneal_state();

        Ok(Self {
            backbone,
            config,
            posterior,
            anneal,
        })
    }

    pub fn backbone(&self) -> &B {
        &self.backbone
    }

    pub fn config(&self) -> &SemiVaeConfig {
        &self.config
    }

    /// number of optimizer updates seen so far
    pub fn step(&self) -> u64 {
        self.anneal.step()
    }

    /// once per optimizer update
    pub fn advance_step(&mut self) {
        self.anneal.advance();
    }

    /// e.g., to resume from a checkpoint
    pub fn set_step(&mut self, step: u64) {
        self.anneal.set_step(step);
    }

    pub fn hyperparameters(&self) -> Result<AnnealedHyperparams> {
        self.anneal.hyperparameters()
    }

    /// `(U, KL)` with the current configuration
    pub fn variational_loggamma(
        &self,
        beta_nk: &Tensor,
        betaprior: &Tensor,
        rng: &mut RandomStream,
    ) -> Result<(Tensor, Tensor)> {
        candle_variational::variational_loggamma(beta_nk, betaprior, rng)
    }

    /// `(alpha, KL)` with the configured sharpening
    pub fn variational_dirichlet(
        &self,
        beta_nk: &Tensor,
        betaprior: &Tensor,
        rng: &mut RandomStream,
    ) -> Result<(Tensor, Tensor)> {
        candle_variational::variational_dirichlet(
            beta_nk,
            betaprior,
            self.config.sharpening,
            rng,
        )
    }

    /// h(x) and the clipped log β
    ///
    /// # Returns `(hx_nh, logbeta_nk)`
    pub fn build_inference_alpha(
        &self,
        x_nd: &Tensor,
        mode: BuildMode,
        rng: &mut RandomStream,
    ) -> Result<(Tensor, Tensor)> {
        self.check_obs(x_nd)?;
        let train = mode.is_training();

        if train && self.config.input_dropout > 0. {
            debug!("Inference with dropout: {:.4}", self.config.input_dropout);
        }
        let x_nd = rng.dropout(x_nd, self.config.input_dropout, train)?;

        let hx_nh = self.backbone.hidden_x(&x_nd)?;
        let h_nh = self.backbone.hidden_logbeta(&hx_nh)?;
        let h_nh = rng.dropout(&h_nh, self.config.dropout_logbeta, train)?;

        let logbeta_nk = self
            .backbone
            .logbeta(&h_nh)?
            .clamp(-LOGBETA_CLIP, LOGBETA_CLIP)?;

        Ok((hx_nh, logbeta_nk))
    }

    /// Upper bound of -log p(x), or of -log p(x, y) when `y_nk` is given
    ///
    /// * `x_nd` - observations (n x d)
    /// * `eps_nl` - standard Gaussian noise for Z (n x l)
    /// * `y_nk` - one-hot labels (n x k)
    /// * `mode` - train graphs anneal, jitter and add the score term
    /// * `rng` - LogGamma seeds, dropout and jitter
    pub fn build_vae(
        &self,
        x_nd: &Tensor,
        eps_nl: &Tensor,
        y_nk: Option<&Tensor>,
        mode: BuildMode,
        rng: &mut RandomStream,
    ) -> Result<VaeOutputs> {
        let (nn, kk) = (x_nd.dim(0)?, self.config.n_classes);
        let (dtype, device) = (x_nd.dtype(), x_nd.device());

        if eps_nl.dims() != [nn, self.backbone.dim_latent()] {
            candle_core::bail!(
                "eps {:?} should be [{}, {}]",
                eps_nl.dims(),
                nn,
                self.backbone.dim_latent()
            );
        }
        if let Some(y_nk) = y_nk {
            if y_nk.dims() != [nn, kk] {
                candle_core::bail!("labels {:?} should be [{}, {}]", y_nk.dims(), nn, kk);
            }
            debug!("Building graph for lower bound of logp(x,y)");
        } else {
            debug!("Building graph for lower bound of logp(x)");
        }

        let hyper = self.hyperparameters()?;
        let betaprior = hyper.betaprior.to_tensor(kk, dtype, device)?;

        let (hx_nh, logbeta_nk) = self.build_inference_alpha(x_nd, mode, rng)?;
        let mut beta_nk = logbeta_nk.exp()?;

        // alpha, U, KL(alpha), -log p(y | alpha)
        let (alpha_nk, u_nk, kl_loggamma, nll_y) = match y_nk {
            Some(y_nk) if self.config.logpxy_discrete => {
                let y_nk = y_nk.to_dtype(dtype)?;
                let nll_y = Tensor::new(DISCRETE_NLL_Y, device)?.to_dtype(dtype)?;
                let kl = Tensor::zeros((), dtype, device)?;
                (y_nk, None, kl, Some(nll_y))
            }
            Some(y_nk) => {
                let y_nk = y_nk.to_dtype(dtype)?;
                beta_nk = match &self.posterior {
                    Some(posterior) => {
                        let shift = softplus(posterior)?.to_dtype(dtype)?;
                        (beta_nk + y_nk.broadcast_mul(&shift)?)?
                    }
                    None => (beta_nk + &y_nk)?,
                };
                let beta_y_n = beta_nk.mul(&y_nk)?.sum(1)?;
                let nll_y = (digamma(&beta_nk.sum(1)?)? - digamma(&beta_y_n)?)?;

                let (u_nk, kl) = self.variational_loggamma(&beta_nk, &betaprior, rng)?;
                let alpha_nk =
                    candle_variational::sharpened_softmax(&u_nk, self.config.sharpening)?;
                (alpha_nk, Some(u_nk), kl, Some(nll_y))
            }
            None => {
                let (u_nk, kl) = self.variational_loggamma(&beta_nk, &betaprior, rng)?;
                let alpha_nk =
                    candle_variational::sharpened_softmax(&u_nk, self.config.sharpening)?;
                (alpha_nk, Some(u_nk), kl, None)
            }
        };

        let (mu_nl, logcov2_nl) = self.backbone.infer_z(&alpha_nk, &hx_nh)?;
        let (z_nl, kl_z) = candle_variational::variational_gaussian(&mu_nl, &logcov2_nl, eps_nl)?;

        let z_nl = if mode.is_training() {
            (&z_nl + rng.randn_like(&z_nl, Z_NOISE_STD)?)?
        } else {
            z_nl
        };

        let nll_x = match (self.config.data_type, self.backbone.generate(&alpha_nk, &z_nl)?) {
            (DataType::Real, ObsParams::Gaussian { mean, logcov }) => {
                gaussian_nll(x_nd, &mean, &logcov)?
            }
            (DataType::Binary, ObsParams::Bernoulli { logits }) => bernoulli_nll(x_nd, &logits)?,
            (data_type, params) => candle_core::bail!(
                "{:?} data cannot be scored by a {} decoder",
                data_type,
                params.family()
            ),
        };

        // negative of the lower bound
        let kl = (kl_loggamma.sum_all()? + kl_z.sum_all()?)?;
        let nll = match &nll_y {
            Some(nll_y) => (nll_x.sum_all()? + nll_y.sum_all()?)?,
            None => nll_x.sum_all()?,
        };
        let bound = (&kl + &nll)?;

        let objfunc = match mode {
            BuildMode::Eval => bound.clone(),
            BuildMode::Train => {
                let w_alpha = self.anneal.coefficient(AnnealTarget::KlAlpha);
                let w_z = self.anneal.coefficient(AnnealTarget::KlZ);
                let annealed = ((kl_loggamma.sum_all()? * w_alpha)?
                    + (kl_z.sum_all()? * w_z)?
                    + &nll)?;

                match &u_nk {
                    Some(u_nk) => {
                        let kl_z_n = kl_z.flatten_all()?;
                        let nll_x_n = nll_x.flatten_all()?;
                        let f_n = match self.config.score_baseline {
                            ScoreFunctionBaseline::NegativeKl => ((kl_z_n * -2.)? + nll_x_n)?,
                            ScoreFunctionBaseline::AnnealedKl => ((kl_z_n * w_z)? + nll_x_n)?,
                        }
                        .detach();
                        let log_q_n = loggamma_log_density(u_nk, &beta_nk)?.flatten_all()?;
                        (annealed + f_n.mul(&log_q_n)?.sum_all()?)?
                    }
                    None => annealed,
                }
            }
        };

        Ok(VaeOutputs {
            alpha: alpha_nk,
            u: u_nk,
            z: z_nl,
            mu: mu_nl,
            logcov2: logcov2_nl,
            logbeta: logbeta_nk,
            bound,
            objfunc,
            nll_x,
            kl_loggamma,
            kl_z,
            kl,
            nll,
            eps: eps_nl.clone(),
            nll_y,
            betaprior,
        })
    }

    /// Supervised head on log β
    ///
    /// * `x_nd` - observations (n x d)
    /// * `labels_n` - class indices (n)
    pub fn build_classifier(
        &self,
        x_nd: &Tensor,
        labels_n: &Tensor,
        mode: BuildMode,
        rng: &mut RandomStream,
    ) -> Result<ClassifierOutputs> {
        let nn = x_nd.dim(0)?;
        if labels_n.dims() != [nn] {
            candle_core::bail!("labels {:?} should be [{}]", labels_n.dims(), nn);
        }
        let labels_n = labels_n.to_dtype(DType::U32)?;

        let (_, logbeta_nk) = self.build_inference_alpha(x_nd, mode, rng)?;
        let probs_nk = ops::softmax(&logbeta_nk, 1)?;

        let loss_n = ops::log_softmax(&logbeta_nk, 1)?
            .gather(&labels_n.unsqueeze(1)?, 1)?
            .squeeze(1)?
            .neg()?;

        let accuracy_n = probs_nk
            .argmax(1)?
            .eq(&labels_n)?
            .to_dtype(logbeta_nk.dtype())?;

        Ok(ClassifierOutputs {
            probs: probs_nk,
            loss: loss_n,
            accuracy: accuracy_n,
        })
    }

    /// backbone entries followed by the annealed prior
    pub fn progress_bar_report_map(&self) -> Vec<ReportEntry> {
        let mut report = self.backbone.progress_bar_report_map();
        report.push(ReportEntry::new(
            "hyperparameters/betaprior",
            OutputKey::Betaprior,
            Reducer::Last,
            |v| format!("{:.5} (last)", v),
        ));
        report
    }

    fn check_obs(&self, x_nd: &Tensor) -> Result<()> {
        match x_nd.dims() {
            [_, d] if *d == self.backbone.dim_obs() => Ok(()),
            dims => candle_core::bail!(
                "observations {:?} should be [n, {}]",
                dims,
                self.backbone.dim_obs()
            ),
        }
    }
}
