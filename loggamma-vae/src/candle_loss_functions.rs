use crate::candle_special_functions::{digamma, lgamma};
use candle_core::{Result, Tensor};

/// KL divergence loss between two Gaussian distributions
///
/// -0.5 * (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// LogGamma log-density with unit rate
///
/// log p(x | β) = Σ_k x(i,k) * β(i,k) - exp(x(i,k)) - lgamma(β(i,k))
///
/// * `x_nk` - evaluation points (n x k)
/// * `beta_nk` - shape parameters (n x k)
///
pub fn loggamma_log_density(x_nk: &Tensor, beta_nk: &Tensor) -> Result<Tensor> {
    x_nk.mul(beta_nk)?
        .sub(&x_nk.exp()?)?
        .sub(&lgamma(beta_nk)?)?
        .sum(x_nk.rank() - 1)
}

/// KL divergence between LogGamma(β, 1) and LogGamma(β0, 1)
///
/// KL(i) = Σ_k lgamma(β0(k)) - lgamma(β(i,k)) - (β0(k) - β(i,k)) * ψ(β(i,k))
///
/// * `beta_nk` - posterior shape parameters (n x k)
/// * `betaprior` - prior shape, broadcast over rows (`[]`, `[k]` or `[1, k]`)
///
pub fn loggamma_kl(beta_nk: &Tensor, betaprior: &Tensor) -> Result<Tensor> {
    let lgamma_prior = lgamma(betaprior)?;
    let shift_nk = betaprior.broadcast_sub(beta_nk)?.mul(&digamma(beta_nk)?)?;

    lgamma_prior
        .broadcast_sub(&lgamma(beta_nk)?)?
        .sub(&shift_nk)?
        .sum(beta_nk.rank() - 1)
}

/// Gaussian negative log-likelihood with diagonal covariance
///
/// nll(i) = 0.5 * Σ_d [ log(2π) + logcov(i,d) + (x(i,d) - mean(i,d))^2 / exp(logcov(i,d)) ]
///
pub fn gaussian_nll(x_nd: &Tensor, mean_nd: &Tensor, logcov_nd: &Tensor) -> Result<Tensor> {
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let sq_nd = x_nd.sub(mean_nd)?.sqr()?.div(&logcov_nd.exp()?)?;

    ((logcov_nd.add(&sq_nd)? + ln_2pi)?.sum(x_nd.rank() - 1)? * 0.5)
}

/// Bernoulli negative log-likelihood from logits
///
/// nll(i) = Σ_d softplus(l(i,d)) - x(i,d) * l(i,d)
///
pub fn bernoulli_nll(x_nd: &Tensor, logits_nd: &Tensor) -> Result<Tensor> {
    softplus(logits_nd)?
        .sub(&x_nd.mul(logits_nd)?)?
        .sum(x_nd.rank() - 1)
}

/// log(1 + exp(x)) = max(x, 0) + log(1 + exp(-|x|))
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.)?.log()?;
    x.relu()?.add(&tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_loggamma_sampler::sample_loggamma;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    fn grid() -> Vec<f64> {
        (-10..=10).map(|i| (i as f64 / 2.0).exp()).collect()
    }

    #[test]
    fn test_kl_self_is_zero() -> Result<()> {
        let beta = Tensor::from_vec(grid(), (3, 7), &Device::Cpu)?;
        let kl = loggamma_kl(&beta, &beta)?.to_vec1::<f64>()?;
        for v in kl {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_kl_non_negative() -> Result<()> {
        let g = grid();
        for &b0 in &g {
            let beta = Tensor::from_vec(g.clone(), (g.len(), 1), &Device::Cpu)?;
            let prior = Tensor::new(&[b0], &Device::Cpu)?;
            let kl = loggamma_kl(&beta, &prior)?.to_vec1::<f64>()?;
            assert!(kl.iter().all(|&v| v >= -1e-9), "{:?}", kl);
        }
        Ok(())
    }

    #[test]
    fn test_kl_monte_carlo() -> Result<()> {
        // E_q[ log q(U) - log p(U) ] = KL(q || p)
        let (b, b0) = (2.0f64, 0.5f64);
        let beta = Tensor::full(b, (2000, 10), &Device::Cpu)?;
        let prior = Tensor::full(b0, (2000, 10), &Device::Cpu)?;
        let u = sample_loggamma(&beta, 99)?;

        let log_q = loggamma_log_density(&u, &beta)?;
        let log_p = loggamma_log_density(&u, &prior)?;
        let mc = (log_q - log_p)?.mean_all()?.to_scalar::<f64>()?;

        let exact = loggamma_kl(&beta, &Tensor::new(&[[b0]], &Device::Cpu)?)?
            .mean_all()?
            .to_scalar::<f64>()?;

        assert_abs_diff_eq!(mc, exact, epsilon = 0.5);
        assert!(exact > 0.0);
        Ok(())
    }

    #[test]
    fn test_log_density_value() -> Result<()> {
        // β = 1: log p(x) = x - exp(x)
        let x = Tensor::new(&[[0.0f64, 1.0]], &Device::Cpu)?;
        let beta = Tensor::new(&[[1.0f64, 1.0]], &Device::Cpu)?;
        let lp = loggamma_log_density(&x, &beta)?.to_vec1::<f64>()?;
        assert_abs_diff_eq!(lp[0], -1.0 + 1.0 - 1f64.exp(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_kl_shape_mismatch() -> Result<()> {
        let beta = Tensor::ones((4, 3), candle_core::DType::F32, &Device::Cpu)?;
        let prior = Tensor::ones((1, 2), candle_core::DType::F32, &Device::Cpu)?;
        assert!(loggamma_kl(&beta, &prior).is_err());
        Ok(())
    }

    #[test]
    fn test_nll_values() -> Result<()> {
        let x = Tensor::new(&[[1f64, 0.0]], &Device::Cpu)?;
        let zero = Tensor::zeros((1, 2), candle_core::DType::F64, &Device::Cpu)?;

        // standard normal at (1, 0)
        let nll = gaussian_nll(&x, &zero, &zero)?.to_vec1::<f64>()?;
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        assert_abs_diff_eq!(nll[0], ln_2pi + 0.5, epsilon = 1e-9);

        // logits 0 is p = 0.5 on every entry
        let nll = bernoulli_nll(&x, &zero)?.to_vec1::<f64>()?;
        assert_abs_diff_eq!(nll[0], 2.0 * 2f64.ln(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_softplus_stable() -> Result<()> {
        let x = Tensor::new(&[-100f32, 0.0, 100.0], &Device::Cpu)?;
        let y = softplus(&x)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(y[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y[1], 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(y[2], 100.0, epsilon = 1e-3);
        Ok(())
    }
}
