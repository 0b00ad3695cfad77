//! Deterministic hashing embedder.
//!
//! [`HashEmbedder`] maps text to a fixed-dimension vector by hashing tokens
//! into buckets (the "hashing trick"). Texts that share tokens get a positive
//! cosine similarity, which is enough for offline ingestion, demos and
//! end-to-end tests without a model server.
//!
//! Tokens are lowercased alphanumeric words; CJK text contributes every
//! character and every adjacent character pair, since it has no spaces.

use async_trait::async_trait;
use folio_core::{EmbedError, Embedder, EmbeddingConfig, EmbeddingOutput};

/// Bag-of-tokens embedder backed by blake3.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder producing vectors of `dimension` components.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str, normalize: bool) -> EmbeddingOutput {
        let tokens = tokenize(text);
        let mut embedding = vec![0.0f32; self.dimension];

        for token in &tokens {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        if normalize {
            let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in &mut embedding {
                    *v /= norm;
                }
            }
        }

        EmbeddingOutput {
            embedding,
            token_count: tokens.len(),
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF   // kana
        | 0x3400..=0x4DBF // CJK extension A
        | 0x4E00..=0x9FFF // CJK unified
        | 0xAC00..=0xD7AF // hangul
        | 0xF900..=0xFAFF)
}

/// Split text into hashing tokens.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
            if let Some(p) = prev_cjk {
                tokens.push(format!("{p}{c}"));
            }
            prev_cjk = Some(c);
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
            prev_cjk = None;
        } else {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            prev_cjk = None;
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    tokens
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "blake3-hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_text(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<EmbeddingOutput>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| self.embed_one(text, config.normalize))
            .collect())
    }
}
