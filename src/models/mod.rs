//! Whisper model catalog and cache.

pub mod catalog;
pub mod download;

pub use catalog::{ModelInfo, get_model, list_models};
pub use download::{
    cached_model_path, download_model, is_model_installed, list_installed_models, model_path, models_dir,
    resolve_model,
};
