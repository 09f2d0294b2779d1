use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, ValueEnum};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::candle_annealing::{AnnealSchedule, PriorShape};
use crate::candle_data_loader::SemiSupervisedData;
use crate::candle_inference::TrainConfig;
use crate::candle_loggamma_vae::LogGammaSemiVae;
use crate::candle_mlp_backbone::MlpBackbone;
use crate::candle_random_stream::RandomStream;
use crate::candle_semivae_config::*;
use crate::candle_synthetic::{generate_mixture_data, SimArgs};
use crate::candle_vae_inference::{EpochStats, SemiVae};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DataTypeArg {
    Real,
    Binary,
}

impl From<DataTypeArg> for DataType {
    fn from(arg: DataTypeArg) -> Self {
        match arg {
            DataTypeArg::Real => DataType::Real,
            DataTypeArg::Binary => DataType::Binary,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BaselineArg {
    /// -2 * KL_Z + nllX
    NegKl,
    /// w(KL_Z) * KL_Z + nllX
    AnnealedKl,
}

impl From<BaselineArg> for ScoreFunctionBaseline {
    fn from(arg: BaselineArg) -> Self {
        match arg {
            BaselineArg::NegKl => ScoreFunctionBaseline::NegativeKl,
            BaselineArg::AnnealedKl => ScoreFunctionBaseline::AnnealedKl,
        }
    }
}

#[derive(Args, Debug)]
pub struct FitSyntheticArgs {
    #[arg(long, default_value = "1000")]
    pub samples: usize,

    #[arg(long, default_value = "20")]
    pub features: usize,

    #[arg(short, long, default_value = "3")]
    pub classes: usize,

    #[arg(long, default_value = "100", help = "Number of rows that keep their label")]
    pub labelled: usize,

    #[arg(long, default_value = "3.0", help = "Std of the class centres")]
    pub separation: f32,

    #[arg(long, default_value = "1.0", help = "Within-class std (real data)")]
    pub noise: f32,

    #[arg(short, long, default_value = "real")]
    pub data_type: DataTypeArg,

    #[arg(long, default_value = "10", help = "Dimension of the Gaussian latent Z")]
    pub latent: usize,

    #[arg(long, default_value = "64")]
    pub hidden: usize,

    #[arg(long, default_value = "1")]
    pub layers: usize,

    #[arg(long, default_value = "50")]
    pub epochs: usize,

    #[arg(long, default_value = "100")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.001")]
    pub lr: f32,

    #[arg(long, default_value = "1.0")]
    pub sharpening: f64,

    #[arg(long, default_value = "0.2", help = "Prior shape at the first update")]
    pub betaprior: f64,

    #[arg(long, default_value = "1.0", help = "Prior shape after annealing")]
    pub final_betaprior: f64,

    #[arg(long, default_value = "500", help = "Updates until annealing saturates")]
    pub anneal: f64,

    #[arg(long, help = "Take alpha = Y for labelled rows")]
    pub logpxy_discrete: bool,

    #[arg(long, help = "Learn the label shift of beta")]
    pub learn_posterior: bool,

    #[arg(long, default_value = "annealed-kl")]
    pub baseline: BaselineArg,

    #[arg(long, default_value = "0.1")]
    pub classifier_weight: f64,

    #[arg(long, default_value = "0.0")]
    pub input_dropout: f64,

    #[arg(long, default_value = "0.0", help = "Dropout on the hidden layer of the log beta head")]
    pub logbeta_dropout: f64,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(short, long, help = "Per-epoch trace ({output}.trace.tsv.gz)")]
    pub output: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

fn trace_path(base: &Path) -> PathBuf {
    let s = base.to_string_lossy();
    let base_str = s.strip_suffix(".tsv.gz").unwrap_or(&s);
    PathBuf::from(format!("{}.trace.tsv.gz", base_str))
}

/// Write the per-epoch trace as gzipped TSV
pub fn write_trace(trace: &[EpochStats], path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = File::create(path)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut writer = BufWriter::new(encoder);

    let na = |v: Option<f32>| v.map(|x| x.to_string()).unwrap_or_else(|| "NA".to_string());

    writeln!(
        writer,
        "epoch\tstep\tbound\tobjfunc\tclassifier_loss\taccuracy\tbetaprior"
    )?;
    for s in trace {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.epoch,
            s.step,
            s.bound,
            s.objfunc,
            na(s.classifier_loss),
            na(s.accuracy),
            s.betaprior
        )?;
    }
    writer.into_inner().map_err(|e| e.into_error())?.finish()?;
    Ok(())
}

pub fn run(args: &FitSyntheticArgs) -> Result<Vec<EpochStats>> {
    let device = Device::Cpu;
    let data_type: DataType = args.data_type.into();

    let sim = generate_mixture_data(&SimArgs {
        n_samples: args.samples,
        dim_obs: args.features,
        n_classes: args.classes,
        n_labelled: args.labelled,
        separation: args.separation,
        noise: args.noise,
        data_type,
        rseed: args.seed,
    })?;

    let mut data = SemiSupervisedData::new(&sim.x, &sim.labels, args.classes)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let backbone = MlpBackbone::new(
        BackboneConfig {
            dim_obs: args.features,
            n_classes: args.classes,
            dim_latent: args.latent,
            q_dim_hidden: args.hidden,
            q_layers: args.layers,
            alpha_inference_layers: args.layers,
            z_inference_layers: args.layers,
            p_dim_hidden: args.hidden,
            p_layers: args.layers,
            activation: HiddenActivation::Relu,
            data_type,
        },
        vb.clone(),
    )?;

    let ramp = AnnealSchedule::LinearRamp {
        divisor: args.anneal,
    };

    let config = SemiVaeConfig {
        n_classes: args.classes,
        data_type,
        sharpening: args.sharpening,
        betaprior: PriorShape::Scalar(args.betaprior),
        final_betaprior: PriorShape::Scalar(args.final_betaprior),
        anneal_betaprior: ramp.clone(),
        anneal_kl_alpha: ramp.clone(),
        anneal_kl_z: ramp,
        logpxy_discrete: args.logpxy_discrete,
        learn_posterior: args.learn_posterior,
        score_baseline: args.baseline.into(),
        input_dropout: args.input_dropout,
        dropout_logbeta: args.logbeta_dropout,
    };

    let mut model = LogGammaSemiVae::new(backbone, config, vb)?;

    info!(
        "fitting {} samples ({} labelled), {} features, {} classes",
        args.samples, args.labelled, args.features, args.classes
    );

    let train_config = TrainConfig {
        learning_rate: args.lr,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        classifier_weight: args.classifier_weight,
        device: device.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let mut rng = RandomStream::new(args.seed);
    let mut vae = SemiVae::build(&mut model, &varmap);
    let trace = vae.train(&mut data, &train_config, &mut rng)?;

    let x = data.full_data(&device)?;
    let classes = Tensor::from_vec(sim.classes.clone(), sim.classes.len(), &device)?;
    let bound = vae.evaluate_bound(&x, &mut rng)?;
    let accuracy = vae.evaluate_accuracy(&x, &classes, &mut rng)?;
    info!("evaluation bound: {:.4}, accuracy: {:.4}", bound, accuracy);

    if let Some(output) = args.output.as_ref() {
        let path = trace_path(output);
        write_trace(&trace, &path)?;
        info!("wrote the trace to {:?}", path);
    }

    Ok(trace)
}
