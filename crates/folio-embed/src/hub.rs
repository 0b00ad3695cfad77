//! Model file download from the Hugging Face Hub.

use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::PathBuf;
use tracing::debug;

/// Local paths of the files a BERT-style model needs.
pub(crate) struct ModelFiles {
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub weights: PathBuf,
}

/// Fetch (or reuse from `cache_dir`) the tokenizer, config and safetensors
/// weights of `model_id`.
pub(crate) async fn fetch_model(
    model_id: &str,
    cache_dir: Option<PathBuf>,
) -> Result<ModelFiles, String> {
    let mut builder = ApiBuilder::new();
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(dir);
    }
    let api = builder
        .build()
        .map_err(|e| format!("Failed to create HF API: {e}"))?;

    let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

    debug!("Downloading tokenizer for {model_id}...");
    let tokenizer = repo
        .get("tokenizer.json")
        .await
        .map_err(|e| format!("Failed to download tokenizer: {e}"))?;

    debug!("Downloading config for {model_id}...");
    let config = repo
        .get("config.json")
        .await
        .map_err(|e| format!("Failed to download config: {e}"))?;

    debug!("Downloading weights for {model_id}...");
    let weights = repo
        .get("model.safetensors")
        .await
        .map_err(|e| format!("Failed to download weights: {e}"))?;

    Ok(ModelFiles {
        tokenizer,
        config,
        weights,
    })
}
