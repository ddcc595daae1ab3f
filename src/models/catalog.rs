//! Whisper model catalog.
//!
//! Only multilingual models are listed: the source language may be anything
//! the translation model accepts, so English-only weights do not fit.

const BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Metadata for a downloadable ggml Whisper model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model identifier (e.g., "tiny", "base")
    pub name: &'static str,
    /// Download size in megabytes
    pub size_mb: u32,
    /// SHA-1 of the ggml file, as published by whisper.cpp
    pub sha1: &'static str,
}

impl ModelInfo {
    /// File name on disk and on the hub.
    pub fn file_name(&self) -> String {
        format!("ggml-{}.bin", self.name)
    }

    pub fn url(&self) -> String {
        format!("{BASE_URL}/{}", self.file_name())
    }
}

/// Models from fastest (tiny) to most accurate (medium).
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "tiny",
        size_mb: 75,
        sha1: "bd577a113a864445d4c299885e0cb97d4ba92b5f",
    },
    ModelInfo {
        name: "base",
        size_mb: 142,
        sha1: "465707469ff3a37a2b9b8d8f89f2f99de7299dac",
    },
    ModelInfo {
        name: "small",
        size_mb: 466,
        sha1: "55356645c2b361a969dfd0ef2c5a50d530afd8d5",
    },
    ModelInfo {
        name: "medium",
        size_mb: 1533,
        sha1: "fd9727b6e1217c2f614f9b698455c4ffd82463b4",
    },
];

/// Find a model by name.
pub fn get_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.name == name)
}

pub fn list_models() -> &'static [ModelInfo] {
    MODELS
}

/// Names accepted by `--model`, for help and error messages.
pub fn model_names() -> Vec<&'static str> {
    MODELS.iter().map(|m| m.name).collect()
}
