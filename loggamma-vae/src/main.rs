use anyhow::Result;
use clap::Parser;
use loggamma_vae::cli::{fit_synthetic, Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::FitSynthetic(args) => {
            fit_synthetic::run(args)?;
        }
    }

    Ok(())
}
