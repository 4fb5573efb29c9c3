//! Sentence embedding with a local BERT model.
//!
//! Uses Candle to run a sentence-transformer checkpoint fetched from the
//! Hugging Face Hub. Token states are mean-pooled over the attention mask
//! and L2-normalized, so every returned vector has unit length.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

/// Default sentence-transformer checkpoint.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Errors from loading or running the embedding model.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Weights, config or tokenizer could not be fetched or parsed.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("inference failed: {0}")]
    Inference(#[from] candle_core::Error),
}

/// Embedding model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Hugging Face model identifier.
    pub model_id: String,
    /// Model revision (branch, tag or commit).
    pub revision: String,
    /// Inputs longer than this many tokens are truncated.
    pub max_seq_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            max_seq_length: 256,
        }
    }
}

/// Anything that turns text into a fixed-length unit vector.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;
}

/// A loaded BERT model with its tokenizer.
///
/// Loading is slow (download plus weight conversion), so the engine is
/// built once and shared.
pub struct EmbeddingEngine {
    config: EmbeddingConfig,
    model: BertModel,
    tokenizer: Tokenizer,
    dimension: usize,
    device: Device,
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl EmbeddingEngine {
    /// Fetches (or reuses the cached copy of) the configured model and loads
    /// it on the CPU. Blocks; call from a blocking context.
    pub fn load(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        info!(model_id = %config.model_id, revision = %config.revision, "Loading embedding model");
        let files = Self::fetch(&config)?;
        let device = Device::Cpu;

        let model_config: Config = serde_json::from_str(
            &std::fs::read_to_string(&files.config).map_err(load_error)?,
        )
        .map_err(load_error)?;
        let dimension = model_config.hidden_size;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(load_error)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_seq_length,
                ..Default::default()
            }))
            .map_err(load_error)?;

        let weights = std::fs::read(&files.weights).map_err(load_error)?;
        let vb = VarBuilder::from_buffered_safetensors(weights, DTYPE, &device)
            .map_err(load_error)?;
        let model = BertModel::load(vb, &model_config).map_err(load_error)?;

        info!(model_id = %config.model_id, dimension, "Embedding model loaded");
        Ok(Self {
            config,
            model,
            tokenizer,
            dimension,
            device,
        })
    }

    fn fetch(config: &EmbeddingConfig) -> Result<ModelFiles, EmbeddingError> {
        let api = Api::new().map_err(load_error)?;
        let repo = api.repo(Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));
        Ok(ModelFiles {
            config: repo.get("config.json").map_err(load_error)?,
            tokenizer: repo.get("tokenizer.json").map_err(load_error)?,
            weights: repo.get("model.safetensors").map_err(load_error)?,
        })
    }
}

impl TextEmbedder for EmbeddingEngine {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenization(e.to_string()))?;

        let ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;
        let pooled = mean_pool(&hidden, &mask)?;
        let normalized = l2_normalize(&pooled)?;
        Ok(normalized.squeeze(0)?.to_vec1::<f32>()?)
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Averages `(batch, seq, hidden)` token states over positions where `mask`
/// is set.
fn mean_pool(hidden: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    summed.broadcast_div(&counts)
}

fn l2_normalize(v: &Tensor) -> candle_core::Result<Tensor> {
    let norm = v.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
    v.broadcast_div(&norm)
}

fn load_error(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::ModelLoad(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_minilm() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.model_id, "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(config.max_seq_length, 256);
    }

    #[test]
    fn mean_pool_ignores_padding() {
        let hidden = Tensor::new(&[[[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();

        let pooled = mean_pool(&hidden, &mask).unwrap();
        assert_eq!(pooled.to_vec2::<f32>().unwrap(), vec![vec![2.0, 3.0]]);
    }

    #[test]
    fn l2_normalize_yields_unit_rows() {
        let v = Tensor::new(&[[3.0f32, 4.0]], &Device::Cpu).unwrap();
        let n = l2_normalize(&v).unwrap().to_vec2::<f32>().unwrap();

        assert!((n[0][0] - 0.6).abs() < 1e-6);
        assert!((n[0][1] - 0.8).abs() < 1e-6);
    }
}
