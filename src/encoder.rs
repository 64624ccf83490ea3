//! Text-to-vector encoders.
//!
//! Everything that turns text into an [`Embedding`] sits behind the
//! [`Encoder`] trait so the search pipeline can be driven by the real
//! sentence-embedding model ([`ModelManager`](crate::ModelManager)) or by the
//! deterministic [`HashingEncoder`].

use std::{str::FromStr, sync::Arc};

use crate::{
    error::{Error, Result},
    model_manager::ModelManager,
};

/// A dense vector representing a piece of text.
pub type Embedding = Vec<f32>;

pub const ENCODER_ENV_VAR: &str = "KBSEEK_ENCODER";

/// Maps text to embeddings living in one shared vector space.
///
/// Implementations are shared by concurrent searches and must not need
/// `&mut self` to encode.
pub trait Encoder: Send + Sync {
    /// Identity of the model producing the vectors. Embeddings from encoders
    /// with different ids are not comparable.
    fn model_id(&self) -> &str;

    /// Encode a batch of texts, one embedding per text, in input order.
    fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Load whatever the encoder needs up front instead of on the first
    /// call to [`encode`](Encoder::encode).
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Encode a single phrase.
    fn encode_one(&self, text: &str) -> Result<Embedding> {
        let mut embeddings = self.encode(&[text.to_string()])?;
        match (embeddings.pop(), embeddings.is_empty()) {
            (Some(embedding), true) => Ok(embedding),
            _ => Err(Error::Encoding(
                "encoder did not return exactly one embedding".to_string(),
            )),
        }
    }
}

/// Which encoder implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EncoderKind {
    /// Pre-trained sentence-embedding model (downloaded on first use).
    #[default]
    Sentence,
    /// Feature-hashing bag of words; no model download.
    Hashing,
}

impl FromStr for EncoderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sentence" => Ok(Self::Sentence),
            "hashing" => Ok(Self::Hashing),
            other => Err(Error::Config(format!(
                "unknown encoder '{other}' (expected 'sentence' or 'hashing')"
            ))),
        }
    }
}

impl EncoderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentence => "sentence",
            Self::Hashing => "hashing",
        }
    }

    /// Resolve the encoder kind from an explicit choice, falling back to the
    /// `KBSEEK_ENCODER` environment variable and then the default.
    pub fn resolve(explicit: Option<EncoderKind>) -> Result<Self> {
        if let Some(kind) = explicit {
            return Ok(kind);
        }
        match std::env::var(ENCODER_ENV_VAR) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Build the shared encoder for this process.
///
/// The sentence model is not loaded here; it loads on first use.
pub fn build_encoder(kind: EncoderKind, model_id: &str) -> Arc<dyn Encoder> {
    match kind {
        EncoderKind::Sentence => {
            Arc::new(ModelManager::with_model_id(model_id.to_string()))
        }
        EncoderKind::Hashing => Arc::new(HashingEncoder::default()),
    }
}

/// Deterministic bag-of-words encoder.
///
/// Lower-cased alphanumeric tokens are hashed (FNV-1a) into a fixed number
/// of buckets and the count vector is L2-normalized. Texts without any
/// token encode to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
    model_id: String,
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashing-{dimension}"),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = fnv1a(&token.to_lowercase()) % self.dimension as u64;
            vector[bucket as usize] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Encoder for HashingEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

fn fnv1a(token: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    token.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}
