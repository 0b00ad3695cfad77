//! Cross-encoder reranker using Candle.
//!
//! Loads a `BertForSequenceClassification` checkpoint (default
//! `cross-encoder/ms-marco-MiniLM-L-6-v2`) and scores each (query, passage)
//! pair as one sequence: `[CLS] query [SEP] passage [SEP]` → pooler →
//! single-logit classifier. Scores are raw logits; higher is more relevant.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};
use candle_transformers::models::bert::{BertModel, Config};
use folio_core::{RerankError, Reranker};
use serde::Deserialize;
use std::path::PathBuf;
use tokenizers::{Tokenizer, TruncationParams};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::hub::fetch_model;

/// Default model identifier on HuggingFace Hub.
pub const DEFAULT_RERANK_MODEL_ID: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

/// Maximum sequence length of a (query, passage) pair.
const MAX_TOKENS: usize = 512;

/// Pairs scored per forward pass.
const BATCH_SIZE: usize = 32;

/// The fields of `config.json` the classification head needs.
#[derive(Deserialize)]
struct HeadConfig {
    hidden_size: usize,
}

struct Loaded {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
}

/// BERT cross-encoder reranker.
pub struct CandleCrossEncoder {
    model_id: String,
    device: Device,
    cache_dir: Option<PathBuf>,
    loaded: OnceCell<Loaded>,
}

impl CandleCrossEncoder {
    /// Create a reranker for the default model.
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self::with_model(DEFAULT_RERANK_MODEL_ID, cache_dir)
    }

    /// Create a reranker for any BERT sequence-classification checkpoint
    /// with a single output label.
    pub fn with_model(model_id: &str, cache_dir: Option<PathBuf>) -> Self {
        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        Self {
            model_id: model_id.to_string(),
            device,
            cache_dir,
            loaded: OnceCell::new(),
        }
    }

    /// Download and load the model.
    pub async fn init(&self) -> Result<(), RerankError> {
        self.loaded().await.map(|_| ())
    }

    async fn loaded(&self) -> Result<&Loaded, RerankError> {
        self.loaded.get_or_try_init(|| self.load()).await
    }

    async fn load(&self) -> Result<Loaded, RerankError> {
        info!("Initializing cross-encoder: {}", self.model_id);

        let files = fetch_model(&self.model_id, self.cache_dir.clone())
            .await
            .map_err(RerankError::Model)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| RerankError::Model(format!("Failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| RerankError::Model(format!("Failed to set truncation: {e}")))?;

        let config_str = tokio::fs::read_to_string(&files.config)
            .await
            .map_err(|e| RerankError::Model(format!("Failed to read config: {e}")))?;
        let config: Config = serde_json::from_str(&config_str)
            .map_err(|e| RerankError::Model(format!("Failed to parse config: {e}")))?;
        let head: HeadConfig = serde_json::from_str(&config_str)
            .map_err(|e| RerankError::Model(format!("Failed to parse config: {e}")))?;

        // SAFETY: the safetensors file is mapped read-only and not modified
        // while the model is alive.
        #[allow(unsafe_code)]
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights], DType::F32, &self.device)
                .map_err(|e| RerankError::Model(format!("Failed to load weights: {e}")))?
        };

        let bert = BertModel::load(vb.pp("bert"), &config)
            .map_err(|e| RerankError::Model(format!("Failed to create BERT model: {e}")))?;
        let pooler = linear(head.hidden_size, head.hidden_size, vb.pp("bert.pooler.dense"))
            .map_err(|e| RerankError::Model(format!("Failed to load pooler: {e}")))?;
        let classifier = linear(head.hidden_size, 1, vb.pp("classifier"))
            .map_err(|e| RerankError::Model(format!("Failed to load classifier: {e}")))?;

        info!("Cross-encoder initialized successfully");
        Ok(Loaded {
            bert,
            pooler,
            classifier,
            tokenizer,
        })
    }

    fn score_batch(
        &self,
        loaded: &Loaded,
        query: &str,
        texts: &[&str],
    ) -> Result<Vec<f32>, RerankError> {
        let pairs: Vec<(&str, &str)> = texts.iter().map(|t| (query, *t)).collect();
        let encodings = loaded
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| RerankError::Model(format!("Tokenization failed: {e}")))?;

        let max_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0);
        let batch_size = texts.len();

        let mut input_ids = Vec::with_capacity(batch_size * max_len);
        let mut type_ids = Vec::with_capacity(batch_size * max_len);
        let mut mask = Vec::with_capacity(batch_size * max_len);

        for encoding in &encodings {
            let len = encoding.len();
            input_ids.extend_from_slice(encoding.get_ids());
            input_ids.extend(std::iter::repeat_n(0u32, max_len - len));
            type_ids.extend_from_slice(encoding.get_type_ids());
            type_ids.extend(std::iter::repeat_n(0u32, max_len - len));
            mask.extend(std::iter::repeat_n(1u32, len));
            mask.extend(std::iter::repeat_n(0u32, max_len - len));
        }

        let shape = (batch_size, max_len);
        let input_ids = Tensor::from_vec(input_ids, shape, &self.device)
            .map_err(|e| RerankError::Model(format!("Failed to create input_ids tensor: {e}")))?;
        let type_ids = Tensor::from_vec(type_ids, shape, &self.device)
            .map_err(|e| RerankError::Model(format!("Failed to create type_ids tensor: {e}")))?;
        let mask = Tensor::from_vec(mask, shape, &self.device)
            .map_err(|e| RerankError::Model(format!("Failed to create mask tensor: {e}")))?;

        let hidden = loaded
            .bert
            .forward(&input_ids, &type_ids, Some(&mask))
            .map_err(|e| RerankError::Model(format!("Model forward failed: {e}")))?;

        // [CLS] token: (batch, seq, hidden) -> (batch, hidden)
        let cls = hidden
            .narrow(1, 0, 1)
            .map_err(|e| RerankError::Model(format!("narrow failed: {e}")))?
            .squeeze(1)
            .map_err(|e| RerankError::Model(format!("squeeze failed: {e}")))?;

        let pooled = loaded
            .pooler
            .forward(&cls)
            .map_err(|e| RerankError::Model(format!("pooler failed: {e}")))?
            .tanh()
            .map_err(|e| RerankError::Model(format!("tanh failed: {e}")))?;

        let logits = loaded
            .classifier
            .forward(&pooled)
            .map_err(|e| RerankError::Model(format!("classifier failed: {e}")))?
            .squeeze(1)
            .map_err(|e| RerankError::Model(format!("squeeze failed: {e}")))?
            .to_vec1::<f32>()
            .map_err(|e| RerankError::Model(format!("Failed to convert to vec: {e}")))?;

        Ok(logits)
    }
}

#[async_trait]
impl Reranker for CandleCrossEncoder {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RerankError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let loaded = self.loaded().await?;
        debug!("Cross-encoding {} pairs", texts.len());

        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            scores.extend(self.score_batch(loaded, query, batch)?);
        }

        if scores.len() != texts.len() {
            return Err(RerankError::ScoreCount {
                expected: texts.len(),
                actual: scores.len(),
            });
        }
        Ok(scores)
    }
}
