use crate::candle_data_loader::*;
use crate::candle_inference::TrainConfig;
use crate::candle_loggamma_vae::LogGammaSemiVae;
use crate::candle_model_traits::SemiVaeBackboneT;
use crate::candle_random_stream::RandomStream;
use crate::candle_semivae_config::BuildMode;
use crate::candle_vae_outputs::*;

use candle_core::Tensor;
use candle_nn::AdamW;
use candle_nn::Optimizer;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

/// Per-epoch summary of the training trace
#[derive(Clone, Debug)]
pub struct EpochStats {
    pub epoch: usize,
    /// optimizer updates so far
    pub step: u64,
    /// -log p(x) bound per sample
    pub bound: f32,
    /// training objective per sample
    pub objfunc: f32,
    /// supervised cross entropy per labelled sample
    pub classifier_loss: Option<f32>,
    pub accuracy: Option<f32>,
    /// mean prior shape at the end of the epoch
    pub betaprior: f32,
}

pub struct SemiVae<'a, B>
where
    B: SemiVaeBackboneT,
{
    pub model: &'a mut LogGammaSemiVae<B>,
    pub variable_map: &'a candle_nn::VarMap,
}

impl<'a, B> SemiVae<'a, B>
where
    B: SemiVaeBackboneT,
{
    pub fn build(model: &'a mut LogGammaSemiVae<B>, variable_map: &'a candle_nn::VarMap) -> Self {
        Self {
            model,
            variable_map,
        }
    }

    /// Train on unlabelled and labelled minibatches
    ///
    /// Each minibatch takes one AdamW step on
    /// `[objfunc(x) + objfunc(x, y) + w * classifier loss] / n` and then
    /// advances the annealing counter.
    ///
    /// * `data` - data loader
    /// * `train_config` - training configuration
    /// * `rng` - the random stream for every stochastic step
    pub fn train<DataL>(
        &mut self,
        data: &mut DataL,
        train_config: &TrainConfig,
        rng: &mut RandomStream,
    ) -> anyhow::Result<Vec<EpochStats>>
    where
        DataL: DataLoader,
    {
        train_config.validate()?;

        let device = &train_config.device;
        let mut adam = AdamW::new_lr(
            self.variable_map.all_vars(),
            train_config.learning_rate.into(),
        )?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut trace = ReportTrace::new(self.model.progress_bar_report_map());
        let mut epoch_trace = vec![];
        let dim_latent = self.model.backbone().dim_latent();

        for epoch in 0..train_config.num_epochs {
            data.shuffle_minibatch(train_config.batch_size, rng)?;

            let mut bound_tot = 0f32;
            let mut objfunc_tot = 0f32;
            let mut nsamples = 0usize;
            let mut cls_tot = 0f32;
            let mut acc_tot = 0f32;
            let mut nlabelled = 0usize;

            for b in 0..data.num_minibatch() {
                let mb = data.minibatch_data(b, device)?;
                let x_nd = &mb.input;
                let nn = x_nd.dim(0)?;

                let eps_nl = rng.randn((nn, dim_latent), 1., x_nd.dtype(), device)?;
                let out = self
                    .model
                    .build_vae(x_nd, &eps_nl, None, BuildMode::Train, rng)?;

                let mut loss = out.objfunc.clone();
                let mut ntot = nn;

                if let Some(labelled) = mb.labelled.as_ref() {
                    let nl = labelled.input.dim(0)?;
                    let eps_l = rng.randn((nl, dim_latent), 1., x_nd.dtype(), device)?;
                    let out_l = self.model.build_vae(
                        &labelled.input,
                        &eps_l,
                        Some(&labelled.onehot),
                        BuildMode::Train,
                        rng,
                    )?;
                    loss = (loss + &out_l.objfunc)?;

                    if train_config.classifier_weight > 0. {
                        let cls = self.model.build_classifier(
                            &labelled.input,
                            &labelled.labels,
                            BuildMode::Train,
                            rng,
                        )?;
                        let cls_loss = cls.loss.sum_all()?;
                        loss = (loss + (&cls_loss * train_config.classifier_weight)?)?;
                        cls_tot += cls_loss.to_scalar::<f32>()?;
                        acc_tot += cls.accuracy.sum_all()?.to_scalar::<f32>()?;
                        nlabelled += nl;
                    }
                    ntot += nl;
                }

                let loss = (loss / ntot as f64)?;
                adam.backward_step(&loss)?;
                self.model.advance_step();

                trace.record(&out)?;
                bound_tot += out.scalar(OutputKey::Bound)?;
                objfunc_tot += out.scalar(OutputKey::Objfunc)?;
                nsamples += nn;
            }

            let hyper = self.model.hyperparameters()?;
            let stats = EpochStats {
                epoch: epoch + 1,
                step: hyper.step,
                bound: bound_tot / nsamples.max(1) as f32,
                objfunc: objfunc_tot / nsamples.max(1) as f32,
                classifier_loss: (nlabelled > 0).then(|| cls_tot / nlabelled as f32),
                accuracy: (nlabelled > 0).then(|| acc_tot / nlabelled as f32),
                betaprior: hyper.betaprior.mean() as f32,
            };

            pb.set_message(trace.message());
            pb.inc(1);
            trace.clear();

            if train_config.verbose {
                info!(
                    "[{}] bound: {:.4}, objfunc: {:.4}, betaprior: {:.5} (step {})",
                    stats.epoch, stats.bound, stats.objfunc, stats.betaprior, stats.step
                );
            }
            epoch_trace.push(stats);
        } // each epoch

        pb.finish_and_clear();
        Ok(epoch_trace)
    }

    /// -log p(x) bound per sample with the eval graph
    pub fn evaluate_bound(&self, x_nd: &Tensor, rng: &mut RandomStream) -> anyhow::Result<f32> {
        let nn = x_nd.dim(0)?;
        let dim_latent = self.model.backbone().dim_latent();
        let eps_nl = rng.randn((nn, dim_latent), 1., x_nd.dtype(), x_nd.device())?;
        let out = self
            .model
            .build_vae(x_nd, &eps_nl, None, BuildMode::Eval, rng)?;
        Ok(out.scalar(OutputKey::Bound)? / nn as f32)
    }

    /// fraction of rows whose argmax log β matches the label
    pub fn evaluate_accuracy(
        &self,
        x_nd: &Tensor,
        labels_n: &Tensor,
        rng: &mut RandomStream,
    ) -> anyhow::Result<f32> {
        let cls = self
            .model
            .build_classifier(x_nd, labels_n, BuildMode::Eval, rng)?;
        Ok(cls.accuracy.mean_all()?.to_scalar::<f32>()?)
    }
}
