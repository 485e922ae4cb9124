//! Transformer inference pipeline.
//!
//! Pure-Rust path: loads an ONNX encoder with tract-onnx, tokenizes with the
//! tokenizers crate, and turns the last hidden state into sentence
//! embeddings via masked mean pooling and L2 normalization. The output
//! matches reference sentence-transformer semantics: positions the attention
//! mask marks as padding contribute nothing to the mean, and the norm gets a
//! `1e-12` epsilon before division.
//!
//! [`Embedder`] is the seam between the coordinator and the model runtime;
//! tests substitute a deterministic implementation so no model files are
//! required.

use std::path::Path;

use tract_onnx::prelude::*;

use crate::error::{Error, Result};
use crate::tokenizer::TokenizerAdapter;

/// Maximum token positions per sequence unless a caller overrides it.
pub const DEFAULT_MAX_LEN: usize = 256;

/// Anything that can turn text into unit-norm embedding vectors.
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality `H`.
    fn dimension(&self) -> usize;
    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    /// Embed a batch of texts; output order matches input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Options for [`InferenceEngine::load`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// GPU execution request. This build runs CPU-only; `true` logs a warning.
    pub use_gpu: bool,
    /// Sequence length `S` used for every batch.
    pub max_len: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            use_gpu: false,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

/// Tokenized batch: three row-major `[B × S]` i64 matrices.
struct TokenBatch {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
    b: usize,
    s: usize,
}

/// ONNX transformer encoder wrapped into the [`Embedder`] contract.
pub struct InferenceEngine {
    model: TypedRunnableModel<TypedModel>,
    tokenizer: TokenizerAdapter,
    input_count: usize,
    input_names: Vec<String>,
    dimension: usize,
    max_len: usize,
}

impl InferenceEngine {
    /// Load the model and tokenizer and discover the embedding dimension.
    ///
    /// The model must declare two inputs (`input_ids`, `attention_mask`) or
    /// three (plus `token_type_ids`), and its first output must be a rank-3
    /// `[B, S, H]` hidden state. `H` is read off a one-row probe run.
    pub fn load(model_path: &Path, tokenizer_path: &Path, options: EngineOptions) -> Result<Self> {
        if options.use_gpu {
            tracing::warn!("GPU execution requested but this build runs CPU-only");
        }

        let tokenizer = TokenizerAdapter::from_file(tokenizer_path)?;

        let graph = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| Error::Inference(format!("load model {}: {e}", model_path.display())))?;

        let input_count = graph.inputs.len();
        if !(2..=3).contains(&input_count) {
            return Err(Error::ModelShape(format!(
                "expected 2 or 3 model inputs, found {input_count}"
            )));
        }
        let input_names: Vec<String> = graph
            .inputs
            .iter()
            .map(|outlet| graph.node(outlet.node).name.clone())
            .collect();

        let model = graph
            .into_optimized()
            .map_err(|e| Error::Inference(format!("optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| Error::Inference(format!("build runnable model: {e}")))?;

        let mut engine = Self {
            model,
            tokenizer,
            input_count,
            input_names,
            dimension: 0,
            max_len: options.max_len.max(1),
        };

        // Probe run discovers H from the output's last axis.
        let probe = engine.forward(std::slice::from_ref(&"hello".to_string()), 8)?;
        engine.dimension = probe
            .first()
            .map(Vec::len)
            .filter(|&h| h > 0)
            .ok_or_else(|| Error::ModelShape("probe run produced no embedding".to_string()))?;

        tracing::info!(
            dimension = engine.dimension,
            inputs = ?engine.input_names,
            "embedding model loaded"
        );
        Ok(engine)
    }

    fn tokenize_batch(&self, texts: &[String], max_len: usize) -> Result<TokenBatch> {
        let b = texts.len();
        let s = max_len;
        let mut input_ids = vec![0i64; b * s];
        let mut attention_mask = vec![0i64; b * s];
        let token_type_ids = vec![0i64; b * s];

        for (i, text) in texts.iter().enumerate() {
            let mut ids = self.tokenizer.encode(text)?;
            ids.truncate(s);
            for (t, &id) in ids.iter().enumerate() {
                input_ids[i * s + t] = i64::from(id);
                attention_mask[i * s + t] = 1;
            }
        }

        Ok(TokenBatch {
            input_ids,
            attention_mask,
            token_type_ids,
            b,
            s,
        })
    }

    fn forward(&self, texts: &[String], max_len: usize) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.tokenize_batch(texts, max_len)?;
        let shape = (batch.b, batch.s);

        let input_ids = ndarray::Array2::from_shape_vec(shape, batch.input_ids)
            .map_err(|e| Error::ModelShape(format!("input_ids shape: {e}")))?;
        let attention = ndarray::Array2::from_shape_vec(shape, batch.attention_mask.clone())
            .map_err(|e| Error::ModelShape(format!("attention_mask shape: {e}")))?;

        let mut inputs: TVec<TValue> = tvec!(
            Tensor::from(input_ids).into(),
            Tensor::from(attention).into()
        );
        if self.input_count == 3 {
            let token_types = ndarray::Array2::from_shape_vec(shape, batch.token_type_ids)
                .map_err(|e| Error::ModelShape(format!("token_type_ids shape: {e}")))?;
            inputs.push(Tensor::from(token_types).into());
        }

        let outputs = self
            .model
            .run(inputs)
            .map_err(|e| Error::Inference(format!("model execution: {e}")))?;
        let hidden = outputs
            .first()
            .ok_or_else(|| Error::ModelShape("model produced no outputs".to_string()))?;
        let view = hidden
            .to_array_view::<f32>()
            .map_err(|e| Error::ModelShape(format!("read output tensor: {e}")))?;

        if view.ndim() != 3 {
            return Err(Error::ModelShape(format!(
                "expected rank-3 hidden state, got rank {}",
                view.ndim()
            )));
        }
        let hidden = view
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| Error::ModelShape(e.to_string()))?;
        let (out_b, out_s, _h) = hidden.dim();
        if out_b != batch.b || out_s != batch.s {
            return Err(Error::ModelShape(format!(
                "hidden state is [{out_b}, {out_s}, _], batch was [{}, {}]",
                batch.b, batch.s
            )));
        }

        Ok(mean_pool_l2_norm(hidden, &batch.attention_mask))
    }
}

impl Embedder for InferenceEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.forward(std::slice::from_ref(&text.to_string()), self.max_len)?;
        embeddings
            .pop()
            .ok_or_else(|| Error::ModelShape("empty embedding batch".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.forward(texts, self.max_len)
    }
}

/// Masked mean pooling followed by L2 normalization.
///
/// For each batch row: average the hidden states at positions where the mask
/// is 1 (a row with no unmasked positions pools to the zero vector), then
/// divide by `‖v‖₂ + 1e-12`. The norm accumulates in f64.
pub(crate) fn mean_pool_l2_norm(
    hidden: ndarray::ArrayView3<'_, f32>,
    mask: &[i64],
) -> Vec<Vec<f32>> {
    let (b, s, h) = hidden.dim();
    let mut out = Vec::with_capacity(b);

    for i in 0..b {
        let mut acc = vec![0f32; h];
        let mut count = 0f32;
        for t in 0..s {
            if mask[i * s + t] == 1 {
                for (k, &v) in hidden.slice(ndarray::s![i, t, ..]).iter().enumerate() {
                    acc[k] += v;
                }
                count += 1.0;
            }
        }
        if count > 0.0 {
            for x in &mut acc {
                *x /= count;
            }
        }

        let norm = acc
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt()
            + 1e-12;
        for x in &mut acc {
            *x = (f64::from(*x) / norm) as f32;
        }
        out.push(acc);
    }

    out
}

/// Pairwise cosine similarity matrix for already unit-norm embeddings.
///
/// For unit-norm inputs the cosine matrix is the plain dot-product matrix
/// `E · Eᵀ`. Exposed for diagnostics.
pub fn cosine_sim_matrix(embeddings: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let n = embeddings.len();
    let mut matrix = vec![vec![0f32; n]; n];
    for i in 0..n {
        for j in 0..n {
            matrix[i][j] = embeddings[i]
                .iter()
                .zip(embeddings[j].iter())
                .map(|(a, b)| a * b)
                .sum();
        }
    }
    matrix
}
