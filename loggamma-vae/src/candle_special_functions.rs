use candle_core::cpu_backend::unary_map;
use candle_core::{CpuStorage, CustomOp1, Layout, Result, Shape, Tensor};
use special::Gamma as SpecialGamma;

/// below this we shift `x` upward before the asymptotic series
const ASYMPTOTIC_THRESHOLD: f64 = 20.0;

/// B_2, B_4, ..., B_14
const BERNOULLI_2K: [f64; 7] = [
    1.0 / 6.0,
    -1.0 / 30.0,
    1.0 / 42.0,
    -1.0 / 30.0,
    5.0 / 66.0,
    -691.0 / 2730.0,
    7.0 / 6.0,
];

fn factorial(n: usize) -> f64 {
    (1..=n).map(|j| j as f64).product()
}

/// Digamma function ψ(x) of a positive real
pub fn digamma_f64(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    SpecialGamma::digamma(x)
}

/// Polygamma function ψ⁽ⁿ⁾(x) of a positive real
///
/// `order == 0` is digamma. For `order >= 1` we use the recurrence
///
/// ψ⁽ⁿ⁾(x) = ψ⁽ⁿ⁾(x + 1) + (-1)ⁿ⁺¹ n! / xⁿ⁺¹
///
/// until `x >= 20`, then the asymptotic expansion
///
/// ψ⁽ⁿ⁾(x) ~ (-1)ⁿ⁺¹ [ (n-1)!/xⁿ + n!/(2xⁿ⁺¹) + Σ_k B₂ₖ (2k+n-1)!/((2k)! x²ᵏ⁺ⁿ) ]
///
pub fn polygamma_f64(order: usize, x: f64) -> f64 {
    if order == 0 {
        return digamma_f64(x);
    }

    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }

    let n = order as i32;
    let sign = if order % 2 == 1 { 1.0 } else { -1.0 };
    let n_fact = factorial(order);

    let mut x = x;
    let mut shifted = 0.0;
    while x < ASYMPTOTIC_THRESHOLD {
        shifted += n_fact / x.powi(n + 1);
        x += 1.0;
    }

    let mut series = factorial(order - 1) / x.powi(n) + n_fact / (2.0 * x.powi(n + 1));
    for (k, b2k) in BERNOULLI_2K.iter().enumerate() {
        let two_k = 2 * (k + 1);
        let ratio: f64 = ((two_k + 1)..(two_k + order)).map(|j| j as f64).product();
        series += b2k * ratio / x.powi((two_k + order) as i32);
    }

    sign * (shifted + series)
}

/// log Γ(x) of a positive real
pub fn ln_gamma_f64(x: f64) -> f64 {
    SpecialGamma::ln_gamma(x).0
}

fn map_cpu<F>(
    name: &'static str,
    storage: &CpuStorage,
    layout: &Layout,
    func: F,
) -> Result<(CpuStorage, Shape)>
where
    F: Fn(f64) -> f64,
{
    let out = match storage {
        CpuStorage::F32(xs) => {
            CpuStorage::F32(unary_map(xs, layout, |x: f32| func(x as f64) as f32))
        }
        CpuStorage::F64(xs) => CpuStorage::F64(unary_map(xs, layout, |x: f64| func(x))),
        _ => candle_core::bail!("{} is only implemented for f32 and f64", name),
    };
    Ok((out, layout.shape().clone()))
}

struct LnGamma;

impl CustomOp1 for LnGamma {
    fn name(&self) -> &'static str {
        "lgamma"
    }

    fn cpu_fwd(&self, storage: &CpuStorage, layout: &Layout) -> Result<(CpuStorage, Shape)> {
        map_cpu(self.name(), storage, layout, ln_gamma_f64)
    }

    /// d/dx log Γ(x) = ψ(x)
    fn bwd(&self, arg: &Tensor, _res: &Tensor, grad_res: &Tensor) -> Result<Option<Tensor>> {
        Ok(Some(grad_res.mul(&digamma(arg)?)?))
    }
}

struct Polygamma {
    order: usize,
}

impl CustomOp1 for Polygamma {
    fn name(&self) -> &'static str {
        if self.order == 0 {
            "digamma"
        } else {
            "polygamma"
        }
    }

    fn cpu_fwd(&self, storage: &CpuStorage, layout: &Layout) -> Result<(CpuStorage, Shape)> {
        let order = self.order;
        map_cpu(self.name(), storage, layout, |x| polygamma_f64(order, x))
    }

    /// d/dx ψ⁽ⁿ⁾(x) = ψ⁽ⁿ⁺¹⁾(x)
    fn bwd(&self, arg: &Tensor, _res: &Tensor, grad_res: &Tensor) -> Result<Option<Tensor>> {
        Ok(Some(grad_res.mul(&polygamma(self.order + 1, arg)?)?))
    }
}

/// Elementwise log Γ(x), differentiable
pub fn lgamma(x: &Tensor) -> Result<Tensor> {
    x.apply_op1(LnGamma)
}

/// Elementwise digamma ψ(x), differentiable
pub fn digamma(x: &Tensor) -> Result<Tensor> {
    x.apply_op1(Polygamma { order: 0 })
}

/// Elementwise polygamma ψ⁽ⁿ⁾(x), differentiable
///
/// * `order` - derivative order (0 is digamma, 1 is trigamma, ...)
/// * `x` - positive real tensor (f32 or f64, CPU)
pub fn polygamma(order: usize, x: &Tensor) -> Result<Tensor> {
    x.apply_op1(Polygamma { order })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use candle_core::{DType, Device, Var};

    const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

    #[test]
    fn test_scalar_known_values() {
        let pi2 = std::f64::consts::PI.powi(2);
        assert_abs_diff_eq!(polygamma_f64(0, 1.0), -EULER_GAMMA, epsilon = 1e-10);
        assert_abs_diff_eq!(polygamma_f64(1, 1.0), pi2 / 6.0, epsilon = 1e-10);
        assert_abs_diff_eq!(polygamma_f64(1, 0.5), pi2 / 2.0, epsilon = 1e-9);
        // ψ⁽²⁾(1) = -2 ζ(3)
        assert_abs_diff_eq!(polygamma_f64(2, 1.0), -2.0 * 1.202_056_903_159_594, epsilon = 1e-9);
        assert_abs_diff_eq!(digamma_f64(0.5), -EULER_GAMMA - 2.0 * 2f64.ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(ln_gamma_f64(0.5), 0.5 * std::f64::consts::PI.ln(), epsilon = 1e-8);
        assert_abs_diff_eq!(ln_gamma_f64(5.0), 24f64.ln(), epsilon = 1e-8);
    }

    #[test]
    fn test_digamma_recurrence() {
        for &x in &[1e-3, 0.25, 1.0, 7.5, 148.0] {
            assert_relative_eq!(digamma_f64(x + 1.0), digamma_f64(x) + 1.0 / x, max_relative = 1e-10);
        }
        assert!(digamma_f64(0.0).is_nan());
        assert!(digamma_f64(-1.5).is_nan());
    }

    #[test]
    fn test_trigamma_recurrence() {
        for &x in &[0.01, 0.3, 1.7, 4.2, 33.0] {
            let lhs = polygamma_f64(1, x + 1.0);
            let rhs = polygamma_f64(1, x) - 1.0 / (x * x);
            assert_relative_eq!(lhs, rhs, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_operating_range_is_finite() -> Result<()> {
        let x: Vec<f32> = (-50..=50).map(|i| (i as f32 / 10.0).exp()).collect();
        let x = Tensor::from_vec(x, 101, &Device::Cpu)?;

        for out in [lgamma(&x)?, digamma(&x)?, polygamma(1, &x)?] {
            let vals = out.to_vec1::<f32>()?;
            assert!(vals.iter().all(|v| v.is_finite()));
        }
        Ok(())
    }

    #[test]
    fn test_tensor_matches_scalar() -> Result<()> {
        let xs = [0.1f64, 0.5, 1.0, 2.5, 10.0];
        let x = Tensor::new(&xs, &Device::Cpu)?;
        let lg = lgamma(&x)?.to_vec1::<f64>()?;
        let dg = digamma(&x)?.to_vec1::<f64>()?;
        for (j, &v) in xs.iter().enumerate() {
            assert_abs_diff_eq!(lg[j], ln_gamma_f64(v), epsilon = 1e-12);
            assert_abs_diff_eq!(dg[j], polygamma_f64(0, v), epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_strided_input() -> Result<()> {
        let x = Tensor::new(&[[1f64, 2.0], [3.0, 4.0]], &Device::Cpu)?.t()?;
        let lg = lgamma(&x)?.to_vec2::<f64>()?;
        assert_abs_diff_eq!(lg[0][1], ln_gamma_f64(3.0), epsilon = 1e-12);
        assert_abs_diff_eq!(lg[1][0], ln_gamma_f64(2.0), epsilon = 1e-12);

        let x32 = Tensor::new(&[[0.5f32, 1.5, 2.5], [3.5, 4.5, 5.5]], &Device::Cpu)?
            .t()?
            .narrow(0, 1, 2)?;
        let dg = digamma(&x32)?.to_vec2::<f32>()?;
        assert_abs_diff_eq!(dg[0][1], digamma_f64(4.5) as f32, epsilon = 1e-5);
        assert_abs_diff_eq!(dg[1][0], digamma_f64(2.5) as f32, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_gradients() -> Result<()> {
        let xs = [0.2f64, 1.0, 3.5];
        let x = Var::new(&xs, &Device::Cpu)?;

        let grads = lgamma(x.as_tensor())?.sum_all()?.backward()?;
        let d_lg = grads.get(x.as_tensor()).expect("lgamma grad").to_vec1::<f64>()?;

        let grads = digamma(x.as_tensor())?.sum_all()?.backward()?;
        let d_dg = grads.get(x.as_tensor()).expect("digamma grad").to_vec1::<f64>()?;

        for (j, &v) in xs.iter().enumerate() {
            assert_abs_diff_eq!(d_lg[j], digamma_f64(v), epsilon = 1e-10);
            assert_abs_diff_eq!(d_dg[j], polygamma_f64(1, v), epsilon = 1e-10);
        }
        Ok(())
    }

    #[test]
    fn test_unsupported_dtype() -> Result<()> {
        let x = Tensor::new(&[1u32, 2], &Device::Cpu)?;
        assert!(lgamma(&x).is_err());
        assert_eq!(x.dtype(), DType::U32);
        Ok(())
    }
}
