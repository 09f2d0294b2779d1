use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use crate::candle_semivae_config::{BackboneConfig, DataType};
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// log variance range of both Gaussian heads
const MIN_LNVAR: f64 = -8.;
const MAX_LNVAR: f64 = 8.;

/// Fully connected backbone
///
/// ```text
/// x -> h_x -> h_logbeta -> logbeta
/// [alpha, h_x] -> h_z -> (z.mean, z.logcov)
/// [alpha, z] -> p_x -> x.mean (, x.logcov)
/// ```
pub struct MlpBackbone {
    config: BackboneConfig,
    h_x: StackLayers<Linear>,
    h_logbeta: StackLayers<Linear>,
    logbeta: Linear,
    h_z: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
    p_x: StackLayers<Linear>,
    x_mean: Linear,
    x_lnvar: Option<Linear>,
}

impl SemiVaeBackboneT for MlpBackbone {
    fn hidden_x(&self, x_nd: &Tensor) -> Result<Tensor> {
        self.h_x.forward(x_nd)
    }

    fn hidden_logbeta(&self, hx_nh: &Tensor) -> Result<Tensor> {
        self.h_logbeta.forward(hx_nh)
    }

    fn logbeta(&self, h_nh: &Tensor) -> Result<Tensor> {
        self.logbeta.forward(h_nh)
    }

    fn infer_z(&self, alpha_nk: &Tensor, hx_nh: &Tensor) -> Result<(Tensor, Tensor)> {
        let h_nm = self.h_z.forward(&Tensor::cat(&[alpha_nk, hx_nh], 1)?)?;
        let mu_nl = self.z_mean.forward(&h_nm)?;
        let logcov2_nl = self.z_lnvar.forward(&h_nm)?.clamp(MIN_LNVAR, MAX_LNVAR)?;
        Ok((mu_nl, logcov2_nl))
    }

    fn generate(&self, alpha_nk: &Tensor, z_nl: &Tensor) -> Result<ObsParams> {
        let h_nm = self.p_x.forward(&Tensor::cat(&[alpha_nk, z_nl], 1)?)?;
        let mean_nd = self.x_mean.forward(&h_nm)?;
        match &self.x_lnvar {
            Some(x_lnvar) => Ok(ObsParams::Gaussian {
                mean: mean_nd,
                logcov: x_lnvar.forward(&h_nm)?.clamp(MIN_LNVAR, MAX_LNVAR)?,
            }),
            None => Ok(ObsParams::Bernoulli { logits: mean_nd }),
        }
    }

    fn dim_obs(&self) -> usize {
        self.config.dim_obs
    }

    fn dim_classes(&self) -> usize {
        self.config.n_classes
    }

    fn dim_latent(&self) -> usize {
        self.config.dim_latent
    }
}

impl MlpBackbone {
    pub fn config(&self) -> &BackboneConfig {
        &self.config
    }

    /// Will create a new backbone with these variables:
    ///
    /// * `h_x.fc.{}` and `h_logbeta.fc.{}` where {} is the layer index
    /// * `logbeta`
    /// * `h_z.fc.{}`, `z.mean`, `z.logcov`
    /// * `p_x.fc.{}`, `x.mean`, and `x.logcov` for real-valued data
    ///
    /// # Arguments
    /// * `config` - network sizes; validated here
    /// * `vs` - variable builder
    pub fn new(config: BackboneConfig, vs: VarBuilder) -> Result<Self> {
        config.validate()?;

        let act: candle_nn::Activation = config.activation.into();
        let (d, k, l) = (config.dim_obs, config.n_classes, config.dim_latent);
        let hq = config.q_dim_hidden;
        let hp = config.p_dim_hidden;

        // (1) x -> alpha
        let h_x = hidden_layers(d, hq, config.q_layers, act, vs.pp("h_x"))?;
        let h_logbeta =
            hidden_layers(hq, hq, config.alpha_inference_layers, act, vs.pp("h_logbeta"))?;
        let logbeta = candle_nn::linear(hq, k, vs.pp("logbeta"))?;

        // (2) alpha, x -> z
        let z_in = k + hq;
        let h_z = hidden_layers(z_in, hq, config.z_inference_layers, act, vs.pp("h_z"))?;
        let z_width = if config.z_inference_layers > 0 { hq } else { z_in };
        let z_mean = candle_nn::linear(z_width, l, vs.pp("z.mean"))?;
        let z_lnvar = candle_nn::linear(z_width, l, vs.pp("z.logcov"))?;

        // (3) alpha, z -> x
        let p_x = hidden_layers(k + l, hp, config.p_layers, act, vs.pp("p_x"))?;
        let x_mean = candle_nn::linear(hp, d, vs.pp("x.mean"))?;
        let x_lnvar = match config.data_type {
            DataType::Real => Some(candle_nn::linear(hp, d, vs.pp("x.logcov"))?),
            DataType::Binary => None,
        };

        Ok(Self {
            config,
            h_x,
            h_logbeta,
            logbeta,
            h_z,
            z_mean,
            z_lnvar,
            p_x,
            x_mean,
            x_lnvar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small(data_type: DataType) -> BackboneConfig {
        BackboneConfig {
            dim_obs: 5,
            n_classes: 3,
            dim_latent: 2,
            q_dim_hidden: 8,
            q_layers: 1,
            alpha_inference_layers: 1,
            z_inference_layers: 0,
            p_dim_hidden: 6,
            p_layers: 1,
            data_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let net = MlpBackbone::new(small(DataType::Real), vs)?;

        let x = Tensor::randn(0f32, 1., (4, 5), &dev)?;
        let hx = net.hidden_x(&x)?;
        let logbeta = net.logbeta(&net.hidden_logbeta(&hx)?)?;
        assert_eq!(logbeta.dims(), &[4, 3]);

        let alpha = candle_nn::ops::softmax(&logbeta, 1)?;
        let (mu, logcov2) = net.infer_z(&alpha, &hx)?;
        assert_eq!(mu.dims(), &[4, 2]);
        assert_eq!(logcov2.dims(), &[4, 2]);

        match net.generate(&alpha, &mu)? {
            ObsParams::Gaussian { mean, logcov } => {
                assert_eq!(mean.dims(), &[4, 5]);
                assert!(logcov.abs()?.max_all()?.to_scalar::<f32>()? <= 8.0);
            }
            other => panic!("expected gaussian, got {}", other.family()),
        }
        Ok(())
    }

    #[test]
    fn test_binary_emits_logits() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let net = MlpBackbone::new(small(DataType::Binary), vs)?;

        let alpha = Tensor::ones((2, 3), DType::F32, &dev)?;
        let z = Tensor::zeros((2, 2), DType::F32, &dev)?;
        assert_eq!(net.generate(&alpha, &z)?.family(), "bernoulli");

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().all(|n| !n.starts_with("x.logcov")));
        assert!(names.contains(&"z.logcov.weight".to_string()));
        Ok(())
    }

    #[test]
    fn test_rejects_zero_dims() {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = BackboneConfig {
            dim_latent: 0,
            ..small(DataType::Real)
        };
        assert!(MlpBackbone::new(config, vs).is_err());
    }
}
