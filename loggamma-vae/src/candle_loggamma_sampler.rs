use candle_core::{DType, Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, Open01};
use rayon::prelude::*;

/// One LogGamma(shape, 1) variate, i.e., `ln X` with `X ~ Gamma(shape, 1)`
///
/// For `shape < 1` we use `Gamma(a) = Gamma(a + 1) * U^(1/a)`, so
/// `ln X = ln Gamma(a + 1) + ln(U) / a`, which stays finite even when
/// `X` itself would underflow to zero.
pub fn random_loggamma<R: Rng + ?Sized>(shape: f64, rng: &mut R) -> Result<f64> {
    if !shape.is_finite() || shape <= 0.0 {
        candle_core::bail!("LogGamma shape must be positive and finite, got {}", shape);
    }

    let boosted = if shape < 1.0 { shape + 1.0 } else { shape };
    let gamma = Gamma::new(boosted, 1.0)
        .map_err(|e| candle_core::Error::Msg(format!("gamma({}): {}", boosted, e)))?;
    let log_x = gamma.sample(rng).ln();

    if shape < 1.0 {
        let u: f64 = Open01.sample(rng);
        Ok(log_x + u.ln() / shape)
    } else {
        Ok(log_x)
    }
}

/// Draw `U[i,k] ~ LogGamma(beta[i,k], 1)` outside the autodiff graph
///
/// The values are copied to host memory and sampled there, so the
/// returned tensor carries no history back to `beta`. Each row gets its
/// own generator derived from `(seed, row)`, which keeps the draws
/// deterministic under `rayon`.
///
/// * `beta_nk` - positive shape parameters (n x k)
/// * `seed` - a fresh seed for this call
///
pub fn sample_loggamma(beta_nk: &Tensor, seed: u64) -> Result<Tensor> {
    let (nn, kk) = beta_nk.dims2()?;

    let shapes = beta_nk
        .detach()
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?;

    let rows = shapes
        .par_chunks(kk.max(1))
        .enumerate()
        .map(|(i, row)| {
            let mut rng = StdRng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            row.iter()
                .map(|&a| random_loggamma(a, &mut rng))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let values: Vec<f64> = rows.into_iter().flatten().collect();

    Tensor::from_vec(values, (nn, kk), &Device::Cpu)?
        .to_dtype(beta_nk.dtype())?
        .to_device(beta_nk.device())
        .map(|u| u.detach())
}
