use std::{
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::{
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationParams,
};

use crate::{
    encoder::{Embedding, Encoder},
    entry_db::EntryDb,
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const MODEL_ENV_VAR: &str = "KBSEEK_MODEL";
/// Settings key holding the persisted model choice.
pub const MODEL_SETTING: &str = "model_name";

/// Word pieces kept per text; longer inputs are truncated.
const MAX_SEQUENCE_LENGTH: usize = 256;
const ENCODE_BATCH_SIZE: usize = 32;

/// Resolve the model ID, in order of priority:
/// 1. An explicit ID (from --model)
/// 2. The `KBSEEK_MODEL` environment variable
/// 3. The `model_name` setting stored in the entry database
/// 4. [`DEFAULT_MODEL_ID`]
pub fn resolve_model_id(explicit: Option<&str>, db: &EntryDb) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }
    if let Ok(id) = std::env::var(MODEL_ENV_VAR) {
        return Ok(id);
    }
    db.get_setting_or(MODEL_SETTING, DEFAULT_MODEL_ID)
}

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

struct LoadedModel {
    bert: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// Owns the sentence-embedding model, loading it on first use.
///
/// Once loaded the model is never mutated, so one `ModelManager` behind an
/// `Arc` serves any number of concurrent searches. Only the first load is
/// serialized: it may download the model files from the Hub, and every
/// caller arriving meanwhile waits for it. Long-running surfaces call
/// [`preload`](Self::preload) (`--preload`) to pay that cost at startup.
pub struct ModelManager {
    model: OnceLock<LoadedModel>,
    init: Mutex<()>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `KBSEEK_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`sentence-transformers/all-MiniLM-L6-v2`)
    ///
    /// The model is not loaded until the first call to `encode`.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(model_id)
    }

    /// Creates a `ModelManager` with an explicit model ID or local model
    /// directory, bypassing environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: OnceLock::new(),
            init: Mutex::new(()),
            model_id,
        }
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Load the model now instead of on the first search.
    pub fn preload(&self) -> Result<()> {
        self.ensure_loaded().map(|_| ())
    }

    fn ensure_loaded(&self) -> Result<&LoadedModel> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }

        let _guard = self.init.lock().map_err(|_| {
            Error::Encoding("model initialization lock poisoned".to_string())
        })?;
        if let Some(model) = self.model.get() {
            return Ok(model);
        }

        tracing::info!(model = %self.model_id, "loading sentence-embedding model");
        let loaded = load_model(&self.model_id)?;
        tracing::info!(model = %self.model_id, "model loaded");
        Ok(self.model.get_or_init(|| loaded))
    }
}

impl Encoder for ModelManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn warm_up(&self) -> Result<()> {
        self.preload()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.ensure_loaded()?;
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(ENCODE_BATCH_SIZE) {
            embeddings.extend(embed_batch(model, batch)?);
        }
        Ok(embeddings)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Find the model files, either in a local directory or in the
/// HuggingFace Hub cache (downloading them if needed).
fn resolve_model_files(model_id: &str) -> Result<ModelFiles> {
    let local = Path::new(model_id);
    if local.is_dir() {
        let files = ModelFiles {
            config: local.join("config.json"),
            tokenizer: local.join("tokenizer.json"),
            weights: local.join("model.safetensors"),
        };
        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.is_file() {
                return Err(Error::Encoding(format!(
                    "model file missing: {}",
                    path.display()
                )));
            }
        }
        return Ok(files);
    }

    let api = Api::new().map_err(hub_err)?;
    let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
    Ok(ModelFiles {
        config: repo.get("config.json").map_err(hub_err)?,
        tokenizer: repo.get("tokenizer.json").map_err(hub_err)?,
        weights: repo.get("model.safetensors").map_err(hub_err)?,
    })
}

fn load_model(model_id: &str) -> Result<LoadedModel> {
    let files = resolve_model_files(model_id)?;

    let config: Config = serde_json::from_str(
        &std::fs::read_to_string(&files.config).map_err(Error::from)?,
    )
    .map_err(|e| Error::Encoding(format!("invalid model config: {e}")))?;

    let mut tokenizer =
        Tokenizer::from_file(&files.tokenizer).map_err(tokenizer_err)?;
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: MAX_SEQUENCE_LENGTH,
            ..Default::default()
        }))
        .map_err(tokenizer_err)?;

    let device = default_device();
    // SAFETY: the weights file is not modified while it is mapped.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[files.weights], DTYPE, &device)
    }
    .map_err(candle_err)?;
    let bert = BertModel::load(vb, &config).map_err(candle_err)?;

    Ok(LoadedModel {
        bert,
        tokenizer,
        device,
    })
}

/// Run one padded batch through the model.
///
/// Token states are mean-pooled under the attention mask and L2-normalized,
/// matching how sentence-transformers produces its embeddings.
fn embed_batch(model: &LoadedModel, texts: &[String]) -> Result<Vec<Embedding>> {
    let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let encodings = model
        .tokenizer
        .encode_batch(inputs, true)
        .map_err(tokenizer_err)?;

    let token_ids = encodings
        .iter()
        .map(|e| Tensor::new(e.get_ids(), &model.device))
        .collect::<candle_core::Result<Vec<_>>>()
        .map_err(candle_err)?;
    let masks = encodings
        .iter()
        .map(|e| Tensor::new(e.get_attention_mask(), &model.device))
        .collect::<candle_core::Result<Vec<_>>>()
        .map_err(candle_err)?;

    let pooled = (|| -> candle_core::Result<Vec<Vec<f32>>> {
        let token_ids = Tensor::stack(&token_ids, 0)?;
        let mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = token_ids.zeros_like()?;

        // [batch, tokens, hidden]
        let hidden = model.bert.forward(&token_ids, &token_type_ids, Some(&mask))?;

        let mask = mask.to_dtype(DTYPE)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let mean = summed.broadcast_div(&counts)?;

        let norms = mean.sqr()?.sum_keepdim(1)?.sqrt()?;
        mean.broadcast_div(&norms)?.to_vec2::<f32>()
    })()
    .map_err(candle_err)?;

    Ok(pooled)
}

fn candle_err(e: candle_core::Error) -> Error {
    Error::Encoding(format!("tensor computation error: {e}"))
}

fn tokenizer_err(e: tokenizers::Error) -> Error {
    Error::Encoding(format!("tokenizer error: {e}"))
}

fn hub_err(e: hf_hub::api::sync::ApiError) -> Error {
    Error::Encoding(format!("failed to fetch model files: {e}"))
}
