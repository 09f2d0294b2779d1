use crate::candle_loggamma_sampler::sample_loggamma;
use crate::candle_loss_functions::{gaussian_kl_loss, loggamma_kl};
use crate::candle_random_stream::RandomStream;
use candle_core::{Result, Tensor};
use candle_nn::ops;

/// LogGamma variates and their KL divergence
///
/// `U ~ LogGamma(β)` is drawn by the opaque sampler with a fresh seed
/// and detached; only `KL` carries gradients back to `β` (and `β0`).
///
/// # Returns `(u_nk, kl_n)`
pub fn variational_loggamma(
    beta_nk: &Tensor,
    betaprior: &Tensor,
    rng: &mut RandomStream,
) -> Result<(Tensor, Tensor)> {
    let u_nk = sample_loggamma(beta_nk, rng.next_seed())?.detach();
    let kl_n = loggamma_kl(beta_nk, betaprior)?;
    Ok((u_nk, kl_n))
}

/// `alpha = softmax(U * sharpening)` over the last dimension
pub fn sharpened_softmax(u_nk: &Tensor, sharpening: f64) -> Result<Tensor> {
    let last = u_nk.rank() - 1;
    if sharpening != 1.0 {
        ops::softmax(&(u_nk * sharpening)?, last)
    } else {
        ops::softmax(u_nk, last)
    }
}

/// Dirichlet-like samples through LogGamma variates
///
/// # Returns `(alpha_nk, kl_n)`
pub fn variational_dirichlet(
    beta_nk: &Tensor,
    betaprior: &Tensor,
    sharpening: f64,
    rng: &mut RandomStream,
) -> Result<(Tensor, Tensor)> {
    let (u_nk, kl_n) = variational_loggamma(beta_nk, betaprior, rng)?;
    Ok((sharpened_softmax(&u_nk, sharpening)?, kl_n))
}

///
/// z = mu + exp(0.5 * logcov2) * eps
///
/// # Returns `(z_nl, kl_n)`
pub fn variational_gaussian(
    mu_nl: &Tensor,
    logcov2_nl: &Tensor,
    eps_nl: &Tensor,
) -> Result<(Tensor, Tensor)> {
    if eps_nl.dims() != mu_nl.dims() {
        candle_core::bail!(
            "eps {:?} does not match the Gaussian mean {:?}",
            eps_nl.dims(),
            mu_nl.dims()
        );
    }
    let z_nl = (mu_nl + (logcov2_nl * 0.5)?.exp()?.mul(eps_nl)?)?;
    Ok((z_nl, gaussian_kl_loss(mu_nl, logcov2_nl)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device, Var};

    #[test]
    fn test_alpha_rows_sum_to_one() -> Result<()> {
        let mut rng = RandomStream::new(42);
        let beta = Tensor::new(&[[0.1f32, 1.0, 5.0], [2.0, 2.0, 2.0]], &Device::Cpu)?;
        let prior = Tensor::new(&[[1f32, 1.0, 1.0]], &Device::Cpu)?;

        for &sharpening in &[0.1, 1.0, 3.0, 50.0] {
            let (alpha, kl) = variational_dirichlet(&beta, &prior, sharpening, &mut rng)?;
            assert_eq!(alpha.dims(), &[2, 3]);
            assert_eq!(kl.dims(), &[2]);
            for s in alpha.sum(1)?.to_vec1::<f32>()? {
                assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_gradient_flows_through_kl_only() -> Result<()> {
        let mut rng = RandomStream::new(0);
        let beta = Var::new(&[[1f32, 2.0, 3.0]], &Device::Cpu)?;
        let prior = Tensor::new(&[[0.5f32, 0.5, 0.5]], &Device::Cpu)?;

        let (u, kl) = variational_loggamma(beta.as_tensor(), &prior, &mut rng)?;

        let grads = u.sum_all()?.backward()?;
        assert!(grads.get(beta.as_tensor()).is_none());

        let grads = kl.sum_all()?.backward()?;
        assert!(grads.get(beta.as_tensor()).is_some());
        Ok(())
    }

    #[test]
    fn test_consecutive_draws_differ() -> Result<()> {
        let mut rng = RandomStream::new(5);
        let beta = Tensor::ones((4, 3), DType::F32, &Device::Cpu)?;
        let prior = Tensor::ones((1, 3), DType::F32, &Device::Cpu)?;
        let (u1, _) = variational_loggamma(&beta, &prior, &mut rng)?;
        let (u2, _) = variational_loggamma(&beta, &prior, &mut rng)?;
        assert_ne!(u1.to_vec2::<f32>()?, u2.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_gaussian_reparameterization() -> Result<()> {
        let mu = Tensor::new(&[[1f32, -1.0]], &Device::Cpu)?;
        let logcov2 = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
        let eps = Tensor::new(&[[0.5f32, 0.5]], &Device::Cpu)?;
        let (z, kl) = variational_gaussian(&mu, &logcov2, &eps)?;
        assert_eq!(z.to_vec2::<f32>()?, vec![vec![1.5, -0.5]]);
        assert_abs_diff_eq!(kl.to_vec1::<f32>()?[0], 1.0, epsilon = 1e-6);

        let bad_eps = Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?;
        assert!(variational_gaussian(&mu, &logcov2, &bad_eps).is_err());
        Ok(())
    }
}
