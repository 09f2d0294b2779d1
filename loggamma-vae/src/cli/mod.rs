pub mod fit_synthetic;

use clap::{Parser, Subcommand};

pub use fit_synthetic::{BaselineArg, DataTypeArg, FitSyntheticArgs};

#[derive(Parser)]
#[command(name = "loggamma-vae")]
#[command(about = "Semi-supervised VAE with a LogGamma/Dirichlet class variable")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit the model to simulated mixture data
    FitSynthetic(FitSyntheticArgs),
}
