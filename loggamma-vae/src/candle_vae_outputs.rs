use candle_core::{DType, Result, Tensor};
use std::collections::BTreeMap;

/// Names of the quantities a `build_vae` call produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputKey {
    Alpha,
    U,
    Z,
    Mu,
    Logcov2,
    Logbeta,
    Bound,
    Objfunc,
    NllX,
    KlLoggamma,
    KlZ,
    Kl,
    Nll,
    Eps,
    NllY,
    Betaprior,
}

impl OutputKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKey::Alpha => "alpha",
            OutputKey::U => "U",
            OutputKey::Z => "Z",
            OutputKey::Mu => "mu",
            OutputKey::Logcov2 => "logcov2",
            OutputKey::Logbeta => "logbeta",
            OutputKey::Bound => "bound",
            OutputKey::Objfunc => "objfunc",
            OutputKey::NllX => "nllX",
            OutputKey::KlLoggamma => "KL_loggamma",
            OutputKey::KlZ => "KL_Z",
            OutputKey::Kl => "KL",
            OutputKey::Nll => "NLL",
            OutputKey::Eps => "eps",
            OutputKey::NllY => "nllY",
            OutputKey::Betaprior => "betaprior",
        }
    }
}

impl std::fmt::Display for OutputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one `build_vae` call computed
///
/// `u` is absent when labels stand in for alpha; `nll_y` is present
/// only for labelled builds.
#[derive(Clone, Debug)]
pub struct VaeOutputs {
    pub alpha: Tensor,
    pub u: Option<Tensor>,
    pub z: Tensor,
    pub mu: Tensor,
    pub logcov2: Tensor,
    pub logbeta: Tensor,
    pub bound: Tensor,
    pub objfunc: Tensor,
    pub nll_x: Tensor,
    pub kl_loggamma: Tensor,
    pub kl_z: Tensor,
    pub kl: Tensor,
    pub nll: Tensor,
    pub eps: Tensor,
    pub nll_y: Option<Tensor>,
    pub betaprior: Tensor,
}

impl VaeOutputs {
    pub fn get(&self, key: OutputKey) -> Option<&Tensor> {
        match key {
            OutputKey::Alpha => Some(&self.alpha),
            OutputKey::U => self.u.as_ref(),
            OutputKey::Z => Some(&self.z),
            OutputKey::Mu => Some(&self.mu),
            OutputKey::Logcov2 => Some(&self.logcov2),
            OutputKey::Logbeta => Some(&self.logbeta),
            OutputKey::Bound => Some(&self.bound),
            OutputKey::Objfunc => Some(&self.objfunc),
            OutputKey::NllX => Some(&self.nll_x),
            OutputKey::KlLoggamma => Some(&self.kl_loggamma),
            OutputKey::KlZ => Some(&self.kl_z),
            OutputKey::Kl => Some(&self.kl),
            OutputKey::Nll => Some(&self.nll),
            OutputKey::Eps => Some(&self.eps),
            OutputKey::NllY => self.nll_y.as_ref(),
            OutputKey::Betaprior => Some(&self.betaprior),
        }
    }

    /// All populated entries in key order
    pub fn entries(&self) -> Vec<(OutputKey, &Tensor)> {
        ALL_KEYS
            .iter()
            .filter_map(|&k| self.get(k).map(|t| (k, t)))
            .collect()
    }

    /// Mean of an entry as f32, e.g., for logging
    pub fn scalar(&self, key: OutputKey) -> Result<f32> {
        match self.get(key) {
            Some(t) => t.to_dtype(DType::F32)?.mean_all()?.to_scalar::<f32>(),
            None => candle_core::bail!("{} was not built", key),
        }
    }
}

const ALL_KEYS: [OutputKey; 16] = [
    OutputKey::Alpha,
    OutputKey::U,
    OutputKey::Z,
    OutputKey::Mu,
    OutputKey::Logcov2,
    OutputKey::Logbeta,
    OutputKey::Bound,
    OutputKey::Objfunc,
    OutputKey::NllX,
    OutputKey::KlLoggamma,
    OutputKey::KlZ,
    OutputKey::Kl,
    OutputKey::Nll,
    OutputKey::Eps,
    OutputKey::NllY,
    OutputKey::Betaprior,
];

/// Latest value of every key seen so far
///
/// Successive updates overwrite overlapping keys and never drop one,
/// so e.g. `nllY` stays after an unlabelled build follows a labelled one.
#[derive(Clone, Debug, Default)]
pub struct OutputsRegistry {
    values: BTreeMap<OutputKey, Tensor>,
}

impl OutputsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, outputs: &VaeOutputs) {
        for (key, tensor) in outputs.entries() {
            self.values.insert(key, tensor.clone());
        }
    }

    pub fn get(&self, key: OutputKey) -> Option<&Tensor> {
        self.values.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = OutputKey> + '_ {
        self.values.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Supervised head on log β
pub struct ClassifierOutputs {
    /// softmax(log β) (n x k)
    pub probs: Tensor,
    /// cross entropy (n)
    pub loss: Tensor,
    /// 1 if argmax matches the label (n)
    pub accuracy: Tensor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Last,
}

impl Reducer {
    pub fn reduce(&self, values: &[f32]) -> f32 {
        match self {
            Reducer::Mean if values.is_empty() => f32::NAN,
            Reducer::Mean => values.iter().sum::<f32>() / values.len() as f32,
            Reducer::Last => values.last().copied().unwrap_or(f32::NAN),
        }
    }
}

/// One item of the progress-bar message: (label, reducer, format)
#[derive(Clone, Copy)]
pub struct ReportEntry {
    pub label: &'static str,
    pub source: OutputKey,
    pub reducer: Reducer,
    pub format: fn(f32) -> String,
}

impl ReportEntry {
    pub fn new(
        label: &'static str,
        source: OutputKey,
        reducer: Reducer,
        format: fn(f32) -> String,
    ) -> Self {
        Self {
            label,
            source,
            reducer,
            format,
        }
    }
}

impl std::fmt::Debug for ReportEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportEntry")
            .field("label", &self.label)
            .field("source", &self.source)
            .field("reducer", &self.reducer)
            .finish()
    }
}

/// Per-step values for each report entry
pub struct ReportTrace {
    entries: Vec<ReportEntry>,
    values: Vec<Vec<f32>>,
}

impl ReportTrace {
    pub fn new(entries: Vec<ReportEntry>) -> Self {
        let values = vec![vec![]; entries.len()];
        Self { entries, values }
    }

    /// Entries whose key was not built (e.g., `nllY` without labels) are skipped
    pub fn record(&mut self, outputs: &VaeOutputs) -> Result<()> {
        for (entry, values) in self.entries.iter().zip(self.values.iter_mut()) {
            if outputs.get(entry.source).is_some() {
                values.push(outputs.scalar(entry.source)?);
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> Vec<(&'static str, f32)> {
        self.entries
            .iter()
            .zip(self.values.iter())
            .map(|(e, v)| (e.label, e.reducer.reduce(v)))
            .collect()
    }

    pub fn message(&self) -> String {
        self.entries
            .iter()
            .zip(self.values.iter())
            .map(|(e, v)| format!("{} {}", e.label, (e.format)(e.reducer.reduce(v))))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| v.clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reducers() {
        assert_eq!(Reducer::Mean.reduce(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(Reducer::Last.reduce(&[1.0, 2.0, 3.0]), 3.0);
        assert!(Reducer::Last.reduce(&[]).is_nan());
    }

    #[test]
    fn test_key_names() {
        assert_eq!(OutputKey::KlLoggamma.as_str(), "KL_loggamma");
        assert_eq!(OutputKey::NllY.to_string(), "nllY");
        assert_eq!(ALL_KEYS.len(), 16);
    }
}
