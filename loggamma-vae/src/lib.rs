pub mod candle_annealing;
pub mod candle_aux_layers;
pub mod candle_data_loader;
pub mod candle_inference;
pub mod candle_loggamma_sampler;
pub mod candle_loggamma_vae;
pub mod candle_loss_functions;
pub mod candle_mlp_backbone;
pub mod candle_model_traits;
pub mod candle_random_stream;
pub mod candle_semivae_config;
pub mod candle_special_functions;
pub mod candle_synthetic;
pub mod candle_vae_inference;
pub mod candle_vae_outputs;
pub mod candle_variational;
pub mod cli;

pub use candle_core;
pub use candle_nn;
