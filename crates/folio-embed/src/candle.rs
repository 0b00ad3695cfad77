//! Sentence-transformer embedder using Candle.
//!
//! Defaults to `sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2`:
//! - 384 dimensions
//! - 50+ languages, including Chinese
//! - BERT architecture, mean pooling

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use folio_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput};
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::hub::fetch_model;

/// Default model identifier on HuggingFace Hub.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

/// Embedding dimension of the default model.
pub const DEFAULT_DIMENSION: usize = 384;

/// Maximum sequence length.
const MAX_TOKENS: usize = 512;

struct Loaded {
    model: BertModel,
    tokenizer: Tokenizer,
}

/// BERT embedder using Candle.
pub struct CandleEmbedder {
    model_id: String,
    dimension: usize,
    /// Device to run inference on (CPU or CUDA)
    device: Device,
    /// Cache directory for models
    cache_dir: Option<PathBuf>,
    loaded: OnceCell<Loaded>,
}

impl CandleEmbedder {
    /// Create an embedder for the default model.
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self::with_model(DEFAULT_MODEL_ID, DEFAULT_DIMENSION, cache_dir)
    }

    /// Create an embedder for any BERT sentence-transformer.
    pub fn with_model(model_id: &str, dimension: usize, cache_dir: Option<PathBuf>) -> Self {
        // Try to use CUDA if available, fallback to CPU
        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        info!("CandleEmbedder using device: {:?}", device);

        Self {
            model_id: model_id.to_string(),
            dimension,
            device,
            cache_dir,
            loaded: OnceCell::new(),
        }
    }

    /// Initialize the model (download if needed, load into memory).
    pub async fn init(&self) -> Result<(), EmbedError> {
        self.loaded().await.map(|_| ())
    }

    async fn loaded(&self) -> Result<&Loaded, EmbedError> {
        self.loaded.get_or_try_init(|| self.load()).await
    }

    async fn load(&self) -> Result<Loaded, EmbedError> {
        info!("Initializing CandleEmbedder with model: {}", self.model_id);

        let files = fetch_model(&self.model_id, self.cache_dir.clone())
            .await
            .map_err(EmbedError::ModelLoad)?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| EmbedError::ModelLoad(format!("Failed to load tokenizer: {e}")))?;

        let config_str = tokio::fs::read_to_string(&files.config)
            .await
            .map_err(|e| EmbedError::ModelLoad(format!("Failed to read config: {e}")))?;
        let config: Config = serde_json::from_str(&config_str)
            .map_err(|e| EmbedError::ModelLoad(format!("Failed to parse config: {e}")))?;

        // SAFETY: the safetensors file is mapped read-only and not modified
        // while the model is alive.
        #[allow(unsafe_code)]
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights], DType::F32, &self.device)
                .map_err(|e| EmbedError::ModelLoad(format!("Failed to load weights: {e}")))?
        };

        let model = BertModel::load(vb, &config)
            .map_err(|e| EmbedError::ModelLoad(format!("Failed to create BERT model: {e}")))?;

        info!("CandleEmbedder initialized successfully");
        Ok(Loaded { model, tokenizer })
    }

    /// Mean pooling with attention mask.
    fn mean_pooling(
        &self,
        token_embeddings: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor, EmbedError> {
        let mask = attention_mask
            .unsqueeze(2)
            .map_err(|e| EmbedError::Inference(format!("unsqueeze failed: {e}")))?
            .broadcast_as(token_embeddings.shape())
            .map_err(|e| EmbedError::Inference(format!("broadcast failed: {e}")))?
            .to_dtype(DType::F32)
            .map_err(|e| EmbedError::Inference(format!("dtype conversion failed: {e}")))?;

        let sum = token_embeddings
            .mul(&mask)
            .map_err(|e| EmbedError::Inference(format!("mul failed: {e}")))?
            .sum(1)
            .map_err(|e| EmbedError::Inference(format!("sum failed: {e}")))?;

        let mask_sum = mask
            .sum(1)
            .map_err(|e| EmbedError::Inference(format!("mask sum failed: {e}")))?
            .clamp(1e-9, f64::MAX)
            .map_err(|e| EmbedError::Inference(format!("clamp failed: {e}")))?;

        sum.div(&mask_sum)
            .map_err(|e| EmbedError::Inference(format!("div failed: {e}")))
    }

    /// L2 normalize embeddings.
    fn normalize(&self, embeddings: &Tensor) -> Result<Tensor, EmbedError> {
        let norm = embeddings
            .sqr()
            .map_err(|e| EmbedError::Inference(format!("sqr failed: {e}")))?
            .sum_keepdim(1)
            .map_err(|e| EmbedError::Inference(format!("sum_keepdim failed: {e}")))?
            .sqrt()
            .map_err(|e| EmbedError::Inference(format!("sqrt failed: {e}")))?
            .clamp(1e-12, f64::MAX)
            .map_err(|e| EmbedError::Inference(format!("clamp failed: {e}")))?;

        embeddings
            .broadcast_div(&norm)
            .map_err(|e| EmbedError::Inference(format!("div failed: {e}")))
    }

    /// Encode a batch of texts.
    async fn encode_batch(
        &self,
        texts: &[&str],
        normalize: bool,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        let loaded = self.loaded().await?;

        let encodings = loaded
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedError::Inference(format!("Tokenization failed: {e}")))?;

        let max_len = encodings
            .iter()
            .map(|e| e.len())
            .max()
            .unwrap_or(0)
            .min(MAX_TOKENS);

        let mut input_ids_vec: Vec<u32> = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask_vec: Vec<u32> = Vec::with_capacity(texts.len() * max_len);
        let mut token_counts = Vec::with_capacity(texts.len());

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let len = ids.len().min(max_len);
            token_counts.push(len);

            input_ids_vec.extend_from_slice(&ids[..len]);
            input_ids_vec.extend(std::iter::repeat_n(0, max_len - len));
            attention_mask_vec.extend(std::iter::repeat_n(1, len));
            attention_mask_vec.extend(std::iter::repeat_n(0, max_len - len));
        }

        let batch_size = texts.len();

        let input_ids = Tensor::from_vec(input_ids_vec, (batch_size, max_len), &self.device)
            .map_err(|e| EmbedError::Inference(format!("Failed to create input_ids tensor: {e}")))?;

        let attention_mask =
            Tensor::from_vec(attention_mask_vec, (batch_size, max_len), &self.device).map_err(
                |e| EmbedError::Inference(format!("Failed to create attention_mask tensor: {e}")),
            )?;

        let token_type_ids = input_ids
            .zeros_like()
            .map_err(|e| EmbedError::Inference(format!("Failed to create token_type_ids: {e}")))?;

        let output = loaded
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| EmbedError::Inference(format!("Model forward failed: {e}")))?;

        let pooled = self.mean_pooling(&output, &attention_mask)?;
        let final_embeddings = if normalize {
            self.normalize(&pooled)?
        } else {
            pooled
        };

        let vectors = final_embeddings
            .to_vec2::<f32>()
            .map_err(|e| EmbedError::Inference(format!("Failed to convert to vec: {e}")))?;

        let mut results = Vec::with_capacity(batch_size);
        for (embedding, token_count) in vectors.into_iter().zip(token_counts) {
            if embedding.len() != self.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
            results.push(EmbeddingOutput {
                embedding,
                token_count,
            });
        }

        Ok(results)
    }
}

#[async_trait]
impl Embedder for CandleEmbedder {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts with batch_size {}",
            texts.len(),
            config.batch_size
        );

        let mut all_results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(config.batch_size.max(1)) {
            all_results.extend(self.encode_batch(batch, config.normalize).await?);
        }

        Ok(all_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_candle_embedder_defaults() {
        let embedder = CandleEmbedder::new(None);
        assert_eq!(embedder.dimension(), 384);
        assert_eq!(embedder.model_name(), DEFAULT_MODEL_ID);
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_candle_embedder() {
        let cache_dir = tempdir().unwrap();
        let embedder = CandleEmbedder::new(Some(cache_dir.path().to_path_buf()));
        embedder.init().await.unwrap();

        let config = EmbeddingConfig::default();
        let results = embedder
            .embed_text(&["起重机常见故障", "common crane faults"], &config)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].embedding.len(), 384);

        // Normalized output has unit length
        let norm: f32 = results[0].embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);

        // Translations land close together
        let sim: f32 = results[0]
            .embedding
            .iter()
            .zip(&results[1].embedding)
            .map(|(a, b)| a * b)
            .sum();
        assert!(sim > 0.5);
    }
}
