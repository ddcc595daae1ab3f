//! MarianMT (OPUS-MT) translation through candle.
//!
//! The supported setup is a local model directory (`[translation] model_dir`):
//!
//! ```text
//! <model_dir>/
//!   config.json          Hugging Face Marian config
//!   model.safetensors    weights (or pytorch_model.bin)
//!   tokenizer.json       source-side tokenizer
//!   tokenizer-dec.json   target-side tokenizer (optional, source is reused)
//! ```
//!
//! The tokenizers are `tokenizers` JSON files converted from the OPUS-MT
//! `source.spm`/`target.spm` models; the OPUS-MT repositories only ship the
//! sentencepiece files. Without a local directory, config and weights come
//! from `Helsinki-NLP/opus-mt-{src}-{tgt}` and the converted tokenizers from
//! [`TOKENIZER_REPO`], which covers a handful of languages.

use crate::error::{Result, VoxrelayError};
use crate::mt::engine::TranslationEngine;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::marian::{Config, MTModel};
use hf_hub::api::sync::Api;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

/// Upper bound on generated tokens per utterance.
const MAX_DECODE_TOKENS: usize = 256;

pub const CONFIG_FILE: &str = "config.json";
pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const PYTORCH_FILE: &str = "pytorch_model.bin";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const DECODER_TOKENIZER_FILE: &str = "tokenizer-dec.json";

/// Hub repository publishing `tokenizers` JSON conversions of OPUS-MT vocabularies.
pub const TOKENIZER_REPO: &str = "lmz/candle-marian";

/// Hub repository for a language pair.
pub fn opus_repo(source_lang: &str, target_lang: &str) -> String {
    format!("Helsinki-NLP/opus-mt-{source_lang}-{target_lang}")
}

/// Converted tokenizer for one side of a pair in [`TOKENIZER_REPO`].
pub fn hub_tokenizer_file(lang: &str) -> String {
    format!("tokenizer-marian-base-{lang}.json")
}

#[derive(Debug)]
struct ModelFiles {
    config: PathBuf,
    weights: PathBuf,
    tokenizer: PathBuf,
    decoder_tokenizer: Option<PathBuf>,
}

fn init_error(message: String) -> VoxrelayError {
    VoxrelayError::EngineInit {
        engine: "marian".to_string(),
        message,
    }
}

fn translation_error(message: String) -> VoxrelayError {
    VoxrelayError::Translation { message }
}

fn local_files(dir: &Path) -> Result<ModelFiles> {
    let missing = |path: PathBuf| VoxrelayError::ModelNotFound {
        path: path.display().to_string(),
    };
    let require = |name: &str| {
        let path = dir.join(name);
        if path.exists() { Ok(path) } else { Err(missing(path)) }
    };

    let config = require(CONFIG_FILE)?;
    let weights = [SAFETENSORS_FILE, PYTORCH_FILE]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| missing(dir.join(SAFETENSORS_FILE)))?;
    let decoder_tokenizer = dir.join(DECODER_TOKENIZER_FILE);

    Ok(ModelFiles {
        config,
        weights,
        tokenizer: require(TOKENIZER_FILE)?,
        decoder_tokenizer: decoder_tokenizer.exists().then_some(decoder_tokenizer),
    })
}

fn hub_files(source_lang: &str, target_lang: &str) -> Result<ModelFiles> {
    let api = Api::new().map_err(|e| init_error(format!("HF Hub API init: {e}")))?;
    let fetch = |repo_id: &str, name: &str| {
        api.model(repo_id.to_string())
            .get(name)
            .map_err(|e| init_error(format!("download {repo_id}/{name}: {e}")))
    };

    let model_repo = opus_repo(source_lang, target_lang);
    let weights = fetch(&model_repo, SAFETENSORS_FILE).or_else(|_| fetch(&model_repo, PYTORCH_FILE))?;
    let tokenizer = fetch(TOKENIZER_REPO, &hub_tokenizer_file(source_lang)).map_err(|e| {
        init_error(format!(
            "{e}; no converted tokenizer for '{source_lang}', set translation.model_dir"
        ))
    })?;

    Ok(ModelFiles {
        config: fetch(&model_repo, CONFIG_FILE)?,
        weights,
        tokenizer,
        decoder_tokenizer: fetch(TOKENIZER_REPO, &hub_tokenizer_file(target_lang)).ok(),
    })
}

/// Parses a Hugging Face Marian config. Older OPUS-MT configs omit fields
/// that newer `transformers` releases write, so those get their defaults.
fn parse_config(bytes: &[u8]) -> serde_json::Result<Config> {
    let mut value: Value = serde_json::from_slice(bytes)?;
    if let Some(fields) = value.as_object_mut() {
        for key in ["share_encoder_decoder_embeddings", "use_cache", "is_encoder_decoder"] {
            fields.entry(key).or_insert(Value::Bool(true));
        }
        if let Some(eos) = fields.get("eos_token_id").cloned() {
            fields.entry("forced_eos_token_id").or_insert(eos);
        }
    }
    serde_json::from_value(value)
}

fn var_builder(weights: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let loaded = if weights.extension().is_some_and(|ext| ext == "safetensors") {
        // SAFETY: the weights file is not modified while mapped.
        unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device) }
    } else {
        VarBuilder::from_pth(weights, DType::F32, device)
    };
    loaded.map_err(|e| init_error(format!("load {}: {e}", weights.display())))
}

/// Greedy MarianMT translator running on the CPU.
pub struct MarianTranslator {
    model: MTModel,
    config: Config,
    source_tokenizer: Tokenizer,
    target_tokenizer: Tokenizer,
    device: Device,
    name: String,
    target_language: String,
}

impl MarianTranslator {
    /// Loads from `model_dir`, or from the hub when `None`.
    ///
    /// # Errors
    /// `ModelNotFound` for a missing local file, `EngineInit` for anything
    /// that fails while downloading or building the model.
    pub fn load(model_dir: Option<&Path>, source_lang: &str, target_lang: &str) -> Result<Self> {
        let (files, name) = match model_dir {
            Some(dir) => (local_files(dir)?, dir.display().to_string()),
            None => (
                hub_files(source_lang, target_lang)?,
                opus_repo(source_lang, target_lang),
            ),
        };

        let config_bytes = std::fs::read(&files.config)?;
        let config = parse_config(&config_bytes)
            .map_err(|e| init_error(format!("parse {}: {e}", files.config.display())))?;

        let device = Device::Cpu;
        let vb = var_builder(&files.weights, &device)?;
        let model = MTModel::new(&config, vb).map_err(|e| init_error(format!("build model: {e}")))?;

        let load_tokenizer = |path: &Path| {
            Tokenizer::from_file(path)
                .map_err(|e| init_error(format!("load tokenizer {}: {e}", path.display())))
        };
        let source_tokenizer = load_tokenizer(&files.tokenizer)?;
        let target_tokenizer = match &files.decoder_tokenizer {
            Some(path) => load_tokenizer(path)?,
            None => source_tokenizer.clone(),
        };

        tracing::info!(model = %name, target = target_lang, "loaded MarianMT model");

        Ok(Self {
            model,
            config,
            source_tokenizer,
            target_tokenizer,
            device,
            name,
            target_language: target_lang.to_string(),
        })
    }

    fn generate(&mut self, text: &str) -> Result<String> {
        let mut input_ids = self
            .source_tokenizer
            .encode(text, true)
            .map_err(|e| translation_error(format!("tokenize: {e}")))?
            .get_ids()
            .to_vec();
        input_ids.push(self.config.eos_token_id);

        let input = Tensor::new(input_ids.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| translation_error(format!("input tensor: {e}")))?;
        let encoded = self
            .model
            .encoder()
            .forward(&input, 0)
            .map_err(|e| translation_error(format!("encoder forward: {e}")))?;

        // The KV cache lets every step after the first feed only the newest token.
        let mut output_ids = vec![self.config.decoder_start_token_id];
        for step in 0..MAX_DECODE_TOKENS {
            let start_pos = if step == 0 { 0 } else { output_ids.len() - 1 };
            let next_token = Tensor::new(&output_ids[start_pos..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .and_then(|t| self.model.decode(&t, &encoded, start_pos))
                .and_then(|logits| logits.squeeze(0))
                .and_then(|logits| logits.get(logits.dim(0)? - 1))
                .and_then(|last| last.argmax(candle_core::D::Minus1))
                .and_then(|token| token.to_scalar::<u32>())
                .map_err(|e| translation_error(format!("decoder step {step}: {e}")))?;

            if next_token == self.config.eos_token_id || next_token == self.config.forced_eos_token_id {
                break;
            }
            output_ids.push(next_token);
        }

        self.target_tokenizer
            .decode(&output_ids[1..], true)
            .map_err(|e| translation_error(format!("detokenize: {e}")))
    }
}

impl TranslationEngine for MarianTranslator {
    fn translate(&mut self, text: &str) -> Result<String> {
        let result = self.generate(text);
        self.model.reset_kv_cache();
        result.map(|translated| translated.trim().to_string())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn target_language(&self) -> &str {
        &self.target_language
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_repo_name() {
        assert_eq!(opus_repo("en", "de"), "Helsinki-NLP/opus-mt-en-de");
    }

    #[test]
    fn test_missing_local_files_are_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        match MarianTranslator::load(Some(dir.path()), "en", "de") {
            Err(VoxrelayError::ModelNotFound { path }) => assert!(path.ends_with(CONFIG_FILE)),
            Err(e) => panic!("Expected ModelNotFound, got {e}"),
            Ok(_) => panic!("loaded from an empty directory"),
        }
    }

    /// Creates `names` as empty files in a fresh directory.
    fn model_dir(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_model_dir_layout_resolves() {
        let dir = model_dir(&[CONFIG_FILE, PYTORCH_FILE, TOKENIZER_FILE, DECODER_TOKENIZER_FILE]);

        let files = local_files(dir.path()).unwrap();

        assert!(files.weights.ends_with(PYTORCH_FILE));
        assert!(files.tokenizer.ends_with(TOKENIZER_FILE));
        assert!(files.decoder_tokenizer.unwrap().ends_with(DECODER_TOKENIZER_FILE));
    }

    #[test]
    fn test_safetensors_preferred_over_pytorch_weights() {
        let dir = model_dir(&[CONFIG_FILE, SAFETENSORS_FILE, PYTORCH_FILE, TOKENIZER_FILE]);

        let files = local_files(dir.path()).unwrap();

        assert!(files.weights.ends_with(SAFETENSORS_FILE));
        assert!(files.decoder_tokenizer.is_none());
    }

    #[test]
    fn test_missing_weights_are_model_not_found() {
        let dir = model_dir(&[CONFIG_FILE, TOKENIZER_FILE]);
        match local_files(dir.path()) {
            Err(VoxrelayError::ModelNotFound { path }) => assert!(path.ends_with(SAFETENSORS_FILE)),
            other => panic!("Expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_sentencepiece_only_dir_is_rejected() {
        // What a plain OPUS-MT download contains.
        let dir = model_dir(&[CONFIG_FILE, PYTORCH_FILE, "source.spm", "target.spm", "vocab.json"]);
        match local_files(dir.path()) {
            Err(VoxrelayError::ModelNotFound { path }) => assert!(path.ends_with(TOKENIZER_FILE)),
            other => panic!("Expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_opus_mt_config_without_newer_fields_parses() {
        let config = br#"{
            "model_type": "marian",
            "activation_function": "swish",
            "d_model": 512,
            "decoder_attention_heads": 8,
            "decoder_ffn_dim": 2048,
            "decoder_layers": 6,
            "decoder_start_token_id": 59513,
            "encoder_attention_heads": 8,
            "encoder_ffn_dim": 2048,
            "encoder_layers": 6,
            "eos_token_id": 0,
            "max_position_embeddings": 512,
            "pad_token_id": 59513,
            "scale_embedding": true,
            "vocab_size": 59514
        }"#;

        let config = parse_config(config).unwrap();

        assert_eq!(config.vocab_size, 59514);
        assert_eq!(config.forced_eos_token_id, 0);
        assert_eq!(config.decoder_start_token_id, 59513);
    }

    #[test]
    fn test_hub_tokenizer_file_name() {
        assert_eq!(hub_tokenizer_file("fr"), "tokenizer-marian-base-fr.json");
    }

    #[test]
    fn test_marian_translator_is_send() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<MarianTranslator>();
    }
}
