use crate::candle_random_stream::RandomStream;
use candle_core::{DType, Device, Tensor};
use rand::prelude::SliceRandom;

/// Labelled part of a minibatch
pub struct LabelledMinibatch {
    /// observations (n x d)
    pub input: Tensor,
    /// one-hot labels (n x k)
    pub onehot: Tensor,
    /// class indices (n), u32
    pub labels: Tensor,
}

pub struct MinibatchData {
    /// every row, labelled or not, for the bound on -log p(x)
    pub input: Tensor,
    /// labelled rows for -log p(x, y) and the classifier
    pub labelled: Option<LabelledMinibatch>,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(
        &mut self,
        batch_size: usize,
        rng: &mut RandomStream,
    ) -> anyhow::Result<()>;
}

///
/// In-memory data where only some rows carry a class label. Each row
/// is a feature vector. Labelled minibatches are drawn from the
/// labelled rows and recycled when there are fewer of them.
///
pub struct SemiSupervisedData {
    input_data: Tensor,
    n_classes: usize,
    labelled_rows: Vec<usize>,
    labelled_classes: Vec<u32>,

    minibatches: Minibatches,
    labelled_minibatches: Minibatches,

    shuffled_input_data: Option<Vec<Tensor>>,
    shuffled_labelled_data: Option<Vec<(Tensor, Tensor, Tensor)>>,
}

impl SemiSupervisedData {
    ///
    /// * `data` - observations (n x d), one row per sample
    /// * `labels` - class of each row, `None` if unlabelled
    /// * `n_classes` - number of classes
    ///
    pub fn new(data: &Tensor, labels: &[Option<u32>], n_classes: usize) -> anyhow::Result<Self> {
        let (nn, _) = data.dims2()?;
        if labels.len() != nn {
            return Err(anyhow::anyhow!(
                "{} labels for {} rows of data",
                labels.len(),
                nn
            ));
        }

        let mut labelled_rows = vec![];
        let mut labelled_classes = vec![];
        for (i, y) in labels.iter().enumerate() {
            if let Some(y) = *y {
                if y as usize >= n_classes {
                    return Err(anyhow::anyhow!(
                        "row {} has class {} but there are {} classes",
                        i,
                        y,
                        n_classes
                    ));
                }
                labelled_rows.push(i);
                labelled_classes.push(y);
            }
        }

        Ok(SemiSupervisedData {
            input_data: data.to_dtype(DType::F32)?.to_device(&Device::Cpu)?,
            n_classes,
            labelled_minibatches: Minibatches::new(labelled_rows.len()),
            labelled_rows,
            labelled_classes,
            minibatches: Minibatches::new(nn),
            shuffled_input_data: None,
            shuffled_labelled_data: None,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    pub fn num_labelled(&self) -> usize {
        self.labelled_rows.len()
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// all rows at once, e.g., for the evaluation bound
    pub fn full_data(&self, target_device: &Device) -> anyhow::Result<Tensor> {
        Ok(self.input_data.to_device(target_device)?)
    }

    /// `(x, onehot, labels)` for the labelled rows listed by position
    fn labelled_chunk(&self, positions: &[usize]) -> anyhow::Result<(Tensor, Tensor, Tensor)> {
        let rows: Vec<u32> = positions
            .iter()
            .map(|&p| self.labelled_rows[p] as u32)
            .collect();
        let classes: Vec<u32> = positions.iter().map(|&p| self.labelled_classes[p]).collect();

        let rows = Tensor::from_vec(rows, positions.len(), &Device::Cpu)?;
        let x = self.input_data.index_select(&rows, 0)?;
        let onehot = onehot(&classes, self.n_classes)?;
        let labels = Tensor::from_vec(classes, positions.len(), &Device::Cpu)?;
        Ok((x, onehot, labels))
    }
}

impl DataLoader for SemiSupervisedData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let (Some(inputs), Some(labelled)) = (
            self.shuffled_input_data.as_ref(),
            self.shuffled_labelled_data.as_ref(),
        ) else {
            return Err(anyhow::anyhow!("need to shuffle data"));
        };

        let input = inputs
            .get(batch_idx)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid index = {} vs. total # = {}",
                    batch_idx,
                    inputs.len()
                )
            })?
            .to_device(target_device)?;

        let labelled = if labelled.is_empty() {
            None
        } else {
            let (x, onehot, labels) = &labelled[batch_idx % labelled.len()];
            Some(LabelledMinibatch {
                input: x.to_device(target_device)?,
                onehot: onehot.to_device(target_device)?,
                labels: labels.to_device(target_device)?,
            })
        };

        Ok(MinibatchData { input, labelled })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(
        &mut self,
        batch_size: usize,
        rng: &mut RandomStream,
    ) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }

        /////////////////////
        // shuffle indexes //
        /////////////////////

        self.minibatches.shuffle_minibatch(batch_size, rng);
        self.labelled_minibatches.shuffle_minibatch(batch_size, rng);

        ///////////////////////////////////
        // preload all the shuffled data //
        ///////////////////////////////////

        let mut shuffled_input_data = Vec::with_capacity(self.minibatches.chunks.len());
        for samples in self.minibatches.chunks.iter() {
            let rows: Vec<u32> = samples.iter().map(|&i| i as u32).collect();
            let rows = Tensor::from_vec(rows, samples.len(), &Device::Cpu)?;
            shuffled_input_data.push(self.input_data.index_select(&rows, 0)?);
        }

        let mut shuffled_labelled_data = Vec::with_capacity(self.labelled_minibatches.chunks.len());
        for positions in self.labelled_minibatches.chunks.iter() {
            shuffled_labelled_data.push(self.labelled_chunk(positions)?);
        }

        self.shuffled_input_data = Some(shuffled_input_data);
        self.shuffled_labelled_data = Some(shuffled_labelled_data);
        Ok(())
    }
}

/// one-hot rows (n x k) of the given classes
pub fn onehot(classes: &[u32], n_classes: usize) -> candle_core::Result<Tensor> {
    let mut y = vec![0f32; classes.len() * n_classes];
    for (i, &c) in classes.iter().enumerate() {
        if c as usize >= n_classes {
            candle_core::bail!("class {} of row {} exceeds {} classes", c, i, n_classes);
        }
        y[i * n_classes + c as usize] = 1.;
    }
    Tensor::from_vec(y, (classes.len(), n_classes), &Device::Cpu)
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(size: usize) -> Self {
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
        }
    }

    /// Every sample lands in exactly one chunk; the last may be smaller.
    pub fn shuffle_minibatch(&mut self, batch_size: usize, rng: &mut RandomStream) {
        self.samples.shuffle(rng.rng_mut());
        self.chunks = self
            .samples
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}
