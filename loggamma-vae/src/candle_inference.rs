pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// weight of the supervised cross entropy on log β; 0 to skip
    pub classifier_weight: f64,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 100,
            num_epochs: 100,
            classifier_weight: 0.1,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0. {
            return Err(anyhow::anyhow!(
                "learning rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }
        if !self.classifier_weight.is_finite() || self.classifier_weight < 0. {
            return Err(anyhow::anyhow!(
                "classifier weight must be non-negative, got {}",
                self.classifier_weight
            ));
        }
        Ok(())
    }
}
