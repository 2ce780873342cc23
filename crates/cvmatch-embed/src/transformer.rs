use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use cvmatch_core::{Embedder, Embedding, MatchError, Result};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

/// Encoder family of a sentence-embedding checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Bert,
    XlmRoberta,
}

impl Architecture {
    fn pad_id(self) -> u32 {
        match self { Architecture::Bert => 0, Architecture::XlmRoberta => 1 }
    }
}

/// Static description of a checkpoint on disk.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub id: &'static str,
    pub architecture: Architecture,
    pub dim: usize,
    pub max_len: usize,
    pub model_dir: PathBuf,
}

enum Encoder {
    Bert(BertModel),
    XlmRoberta(XLMRobertaModel),
}

struct Loaded {
    encoder: Encoder,
    tokenizer: Tokenizer,
    device: Device,
}

/// Transformer sentence embedder backed by candle.
///
/// Expects `tokenizer.json`, `config.json` and `model.safetensors` (or
/// `pytorch_model.bin`) under `model_dir`. The model is loaded once and kept resident.
pub struct TransformerEmbedder {
    profile: ModelProfile,
    loaded: OnceCell<Arc<Loaded>>,
}

impl TransformerEmbedder {
    pub fn new(profile: ModelProfile) -> Self {
        Self { profile, loaded: OnceCell::new() }
    }

    pub fn max_len(&self) -> usize { self.profile.max_len }

    async fn loaded(&self) -> Result<Arc<Loaded>> {
        let profile = self.profile.clone();
        let loaded = self
            .loaded
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || load(&profile))
                    .await
                    .map_err(|e| MatchError::ModelNotFound(format!("model load task failed: {e}")))?
                    .map(Arc::new)
            })
            .await?;
        Ok(loaded.clone())
    }
}

#[async_trait]
impl Embedder for TransformerEmbedder {
    fn id(&self) -> &str { self.profile.id }
    fn dim(&self) -> usize { self.profile.dim }

    async fn load_model(&self) -> Result<()> {
        self.loaded().await.map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(MatchError::InvalidInput("cannot embed empty text".into()));
        }
        let Some(loaded) = self.loaded.get().cloned() else {
            return Err(MatchError::ModelNotFound(format!("{} is not loaded", self.profile.id)));
        };
        let profile = self.profile.clone();
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || forward(&loaded, &profile, &text))
            .await
            .map_err(|e| MatchError::InvalidOutput(format!("embedding task failed: {e}")))?
            .map_err(|e| MatchError::InvalidOutput(e.to_string()))?;
        if vector.len() != self.profile.dim {
            return Err(MatchError::InvalidOutput(format!(
                "{} produced {} dims, expected {}",
                self.profile.id,
                vector.len(),
                self.profile.dim
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(MatchError::InvalidOutput(format!("{} produced non-finite values", self.profile.id)));
        }
        Ok(vector)
    }
}

fn load(profile: &ModelProfile) -> Result<Loaded> {
    let dir = &profile.model_dir;
    info!(model = profile.id, dir = %dir.display(), "loading embedding model");

    let tokenizer_path = dir.join("tokenizer.json");
    if !tokenizer_path.exists() {
        return Err(MatchError::TokenizerNotFound(tokenizer_path.display().to_string()));
    }
    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| MatchError::TokenizerNotFound(format!("{}: {}", tokenizer_path.display(), e)))?;
    if tokenizer.get_vocab_size(true) == 0 {
        return Err(MatchError::VocabNotFound(tokenizer_path.display().to_string()));
    }

    let config_path = dir.join("config.json");
    let config_json = std::fs::read_to_string(&config_path)
        .map_err(|e| MatchError::ModelNotFound(format!("{}: {}", config_path.display(), e)))?;

    let device = select_device();
    let weights = read_weights(dir, &device)?;
    let vb = VarBuilder::from_tensors(weights, DType::F32, &device);

    let bad_config = |e: serde_json::Error| MatchError::ModelNotFound(format!("{}: {}", config_path.display(), e));
    let bad_weights = |e: candle_core::Error| MatchError::ModelNotFound(format!("{}: {}", dir.display(), e));
    let encoder = match profile.architecture {
        Architecture::Bert => {
            let config: BertConfig = serde_json::from_str(&config_json).map_err(bad_config)?;
            Encoder::Bert(BertModel::load(vb, &config).map_err(bad_weights)?)
        }
        Architecture::XlmRoberta => {
            let config: XLMRobertaConfig = serde_json::from_str(&config_json).map_err(bad_config)?;
            Encoder::XlmRoberta(XLMRobertaModel::new(&config, vb).map_err(bad_weights)?)
        }
    };
    info!(model = profile.id, "embedding model loaded");
    Ok(Loaded { encoder, tokenizer, device })
}

fn read_weights(dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = dir.join("model.safetensors");
    if safetensors.exists() {
        return candle_core::safetensors::load(&safetensors, device)
            .map_err(|e| MatchError::ModelNotFound(format!("{}: {}", safetensors.display(), e)));
    }
    let pickle = dir.join("pytorch_model.bin");
    if pickle.exists() {
        let weights = candle_core::pickle::read_all(&pickle)
            .map_err(|e| MatchError::ModelNotFound(format!("{}: {}", pickle.display(), e)))?;
        return Ok(weights.into_iter().collect());
    }
    Err(MatchError::ModelNotFound(format!("no model.safetensors or pytorch_model.bin in {}", dir.display())))
}

fn forward(loaded: &Loaded, profile: &ModelProfile, text: &str) -> anyhow::Result<Vec<f32>> {
    let start = Instant::now();
    let (input_ids, attention_mask) =
        tokenize_on_device(&loaded.tokenizer, text, profile.max_len, profile.architecture.pad_id(), &loaded.device)?;
    let token_type_ids = input_ids.zeros_like()?;
    let hidden = match &loaded.encoder {
        Encoder::Bert(model) => model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?,
        Encoder::XlmRoberta(model) => model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?,
    };
    let pooled = masked_mean_l2(&hidden, &attention_mask)?;
    let out: Vec<f32> = pooled
        .to_device(&Device::Cpu)?
        .squeeze(0)?
        .to_vec1()
        .map_err(|e| anyhow!("pooled output is not a vector: {}", e))?;
    let elapsed = start.elapsed();
    if elapsed.as_millis() > 500 { warn!(model = profile.id, elapsed_ms = elapsed.as_millis() as u64, "slow embedding"); }
    debug!(model = profile.id, elapsed_ms = elapsed.as_millis() as u64, "embedded");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(dir: &Path) -> ModelProfile {
        ModelProfile { id: "mini_lm", architecture: Architecture::Bert, dim: 384, max_len: 128, model_dir: dir.to_path_buf() }
    }

    #[tokio::test]
    async fn missing_tokenizer_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let embedder = TransformerEmbedder::new(profile(tmp.path()));
        let err = embedder.load_model().await.unwrap_err();
        assert!(matches!(err, MatchError::TokenizerNotFound(_)), "{err}");
    }

    #[tokio::test]
    async fn embed_before_load_is_model_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let embedder = TransformerEmbedder::new(profile(tmp.path()));
        assert!(matches!(embedder.embed("swift").await, Err(MatchError::ModelNotFound(_))));
        assert!(matches!(embedder.embed("  ").await, Err(MatchError::InvalidInput(_))));
    }
}
