use crate::candle_semivae_config::DataType;
use candle_core::{Device, Tensor};
use log::info;
use rand::prelude::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};

pub struct SimArgs {
    pub n_samples: usize,
    pub dim_obs: usize,
    pub n_classes: usize,
    /// number of rows that keep their label
    pub n_labelled: usize,
    /// std of the class centres
    pub separation: f32,
    /// within-class std (real-valued data only)
    pub noise: f32,
    pub data_type: DataType,
    pub rseed: u64,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            n_samples: 1000,
            dim_obs: 20,
            n_classes: 3,
            n_labelled: 100,
            separation: 3.,
            noise: 1.,
            data_type: DataType::Real,
            rseed: 42,
        }
    }
}

pub struct SimOut {
    /// observations (n x d)
    pub x: Tensor,
    /// true class of every row
    pub classes: Vec<u32>,
    /// `classes` with all but `n_labelled` rows hidden
    pub labels: Vec<Option<u32>>,
    /// class centres (k x d); logits for binary data
    pub centers: Tensor,
}

/// Mixture data with one centre per class
///
/// ```text
/// c(i) ~ Uniform{0 .. K-1}
/// real:   x(i,d) ~ N(mu(c(i),d), noise^2)
/// binary: x(i,d) ~ Bernoulli(sigmoid(mu(c(i),d)))
/// mu(k,d) ~ N(0, separation^2)
/// ```
///
pub fn generate_mixture_data(args: &SimArgs) -> anyhow::Result<SimOut> {
    let (nn, dd, kk) = (args.n_samples, args.dim_obs, args.n_classes);
    if nn == 0 || dd == 0 || kk == 0 {
        return Err(anyhow::anyhow!(
            "need positive sizes: {} samples, {} features, {} classes",
            nn,
            dd,
            kk
        ));
    }
    if args.n_labelled > nn {
        return Err(anyhow::anyhow!(
            "cannot label {} of {} samples",
            args.n_labelled,
            nn
        ));
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(args.rseed);

    // 1. class centres
    let rnorm_mu = Normal::new(0f32, args.separation)?;
    let centers: Vec<f32> = (0..(kk * dd)).map(|_| rnorm_mu.sample(&mut rng)).collect();

    // 2. class membership
    let runif = Uniform::new(0, kk as u32)?;
    let classes: Vec<u32> = (0..nn).map(|_| runif.sample(&mut rng)).collect();

    // 3. observations
    let mut x = Vec::with_capacity(nn * dd);
    match args.data_type {
        DataType::Real => {
            let rnorm = Normal::new(0f32, args.noise)?;
            for &c in classes.iter() {
                let mu = &centers[(c as usize * dd)..((c as usize + 1) * dd)];
                x.extend(mu.iter().map(|m| m + rnorm.sample(&mut rng)));
            }
        }
        DataType::Binary => {
            for &c in classes.iter() {
                let mu = &centers[(c as usize * dd)..((c as usize + 1) * dd)];
                for &m in mu {
                    let p = 1. / (1. + (-m as f64).exp());
                    let coin = Bernoulli::new(p)?;
                    x.push(if coin.sample(&mut rng) { 1f32 } else { 0f32 });
                }
            }
        }
    }

    // 4. hide labels
    let mut rows: Vec<usize> = (0..nn).collect();
    rows.shuffle(&mut rng);
    let mut labels = vec![None; nn];
    for &i in rows.iter().take(args.n_labelled) {
        labels[i] = Some(classes[i]);
    }

    info!(
        "simulated {} x {} {:?} data, {} classes, {} labelled",
        nn, dd, args.data_type, kk, args.n_labelled
    );

    Ok(SimOut {
        x: Tensor::from_vec(x, (nn, dd), &Device::Cpu)?,
        classes,
        labels,
        centers: Tensor::from_vec(centers, (kk, dd), &Device::Cpu)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_mixture() -> anyhow::Result<()> {
        let args = SimArgs {
            n_samples: 50,
            dim_obs: 4,
            n_classes: 2,
            n_labelled: 10,
            ..Default::default()
        };
        let sim = generate_mixture_data(&args)?;
        assert_eq!(sim.x.dims(), &[50, 4]);
        assert_eq!(sim.centers.dims(), &[2, 4]);
        assert_eq!(sim.labels.iter().filter(|y| y.is_some()).count(), 10);
        for (y, c) in sim.labels.iter().zip(sim.classes.iter()) {
            if let Some(y) = y {
                assert_eq!(y, c);
            }
        }

        let again = generate_mixture_data(&args)?;
        assert_eq!(sim.x.to_vec2::<f32>()?, again.x.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_binary_mixture() -> anyhow::Result<()> {
        let args = SimArgs {
            n_samples: 30,
            data_type: DataType::Binary,
            n_labelled: 0,
            ..Default::default()
        };
        let sim = generate_mixture_data(&args)?;
        let x = sim.x.flatten_all()?.to_vec1::<f32>()?;
        assert!(x.iter().all(|&v| v == 0. || v == 1.));
        assert!(sim.labels.iter().all(|y| y.is_none()));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let args = SimArgs {
            n_samples: 5,
            n_labelled: 6,
            ..Default::default()
        };
        assert!(generate_mixture_data(&args).is_err());
    }
}
