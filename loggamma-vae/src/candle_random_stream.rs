use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Distribution, StandardNormal};

/// The one random stream every stochastic step draws from: LogGamma
/// seeds, Gaussian jitter, dropout masks, `eps` and minibatch shuffling.
/// Reproducible given the master seed.
pub struct RandomStream {
    rng: StdRng,
}

impl RandomStream {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A fresh seed for an opaque sampler call; never reused
    pub fn next_seed(&mut self) -> u64 {
        self.rng.random::<u64>()
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// `N(0, std^2)` noise of the given shape
    pub fn randn<S: Into<Shape>>(
        &mut self,
        shape: S,
        std: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        let shape: Shape = shape.into();
        let values: Vec<f64> = (0..shape.elem_count())
            .map(|_| {
                let z: f64 = StandardNormal.sample(&mut self.rng);
                z * std
            })
            .collect();
        Tensor::from_vec(values, shape, &Device::Cpu)?
            .to_dtype(dtype)?
            .to_device(device)
    }

    pub fn randn_like(&mut self, x: &Tensor, std: f64) -> Result<Tensor> {
        self.randn(x.shape().clone(), std, x.dtype(), x.device())
    }

    /// Inverted dropout: drop each entry with probability `rate` and
    /// rescale the survivors by `1/(1 - rate)`. Identity unless `train`.
    pub fn dropout(&mut self, x: &Tensor, rate: f64, train: bool) -> Result<Tensor> {
        if !train || rate <= 0.0 {
            return Ok(x.clone());
        }
        if rate >= 1.0 {
            candle_core::bail!("dropout rate must be in [0, 1), got {}", rate);
        }

        let keep = Bernoulli::new(1.0 - rate)
            .map_err(|e| candle_core::Error::Msg(format!("dropout: {}", e)))?;
        let scale = 1.0 / (1.0 - rate);
        let mask: Vec<f64> = (0..x.elem_count())
            .map(|_| if keep.sample(&mut self.rng) { scale } else { 0.0 })
            .collect();
        let mask = Tensor::from_vec(mask, x.shape().clone(), &Device::Cpu)?
            .to_dtype(x.dtype())?
            .to_device(x.device())?;
        x.mul(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeds_are_fresh_and_reproducible() {
        let mut a = RandomStream::new(7);
        let mut b = RandomStream::new(7);
        let seeds_a: Vec<u64> = (0..5).map(|_| a.next_seed()).collect();
        let seeds_b: Vec<u64> = (0..5).map(|_| b.next_seed()).collect();
        assert_eq!(seeds_a, seeds_b);
        assert_ne!(seeds_a[0], seeds_a[1]);
    }

    #[test]
    fn test_dropout_modes() -> Result<()> {
        let mut stream = RandomStream::new(1);
        let x = Tensor::ones((20, 10), DType::F32, &Device::Cpu)?;

        let eval = stream.dropout(&x, 0.5, false)?;
        assert_eq!(eval.sum_all()?.to_scalar::<f32>()?, 200.0);

        let train = stream.dropout(&x, 0.5, true)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(train.iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(train.iter().any(|&v| v == 0.0));

        assert!(stream.dropout(&x, 1.0, true).is_err());
        Ok(())
    }

    #[test]
    fn test_randn_shape() -> Result<()> {
        let mut stream = RandomStream::new(3);
        let z = stream.randn((4, 3), 0.05, DType::F32, &Device::Cpu)?;
        assert_eq!(z.dims(), &[4, 3]);
        let max_abs = z.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(max_abs < 1.0);
        Ok(())
    }
}
