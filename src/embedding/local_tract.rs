//! Tract-based dense encoder.
//!
//! Pure-Rust path: loads the model's ONNX export with tract-onnx, tokenizes
//! with the tokenizers crate, and mean-pools the last hidden state over the
//! attention mask. Model files are downloaded once from Hugging Face and
//! cached under `~/.cache/coinfinder-ml/models/`.

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView3};
use std::path::{Path, PathBuf};
use tokenizers::TruncationParams;
use tract_onnx::prelude::*;

use crate::error::EmbeddingError;

const ONNX_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

type RunFn = Box<dyn Fn(TVec<TValue>) -> TractResult<TVec<TValue>> + Send + Sync>;

fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base)
        .join(".cache")
        .join("coinfinder-ml")
        .join("models");
    std::fs::create_dir_all(&dir).map_err(|e| anyhow::anyhow!("Create cache dir: {}", e))?;
    Ok(dir)
}

fn download_to_cache(repo: &str, path: &str, cache_path: &Path) -> Result<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!(
        "https://huggingface.co/{}/resolve/main/{}",
        repo,
        path.replace(' ', "%20")
    );
    tracing::info!(%url, "downloading encoder file");
    let resp = reqwest::blocking::get(&url)
        .map_err(|e| anyhow::anyhow!("Download {}: {}", url, e))?
        .error_for_status()
        .map_err(|e| anyhow::anyhow!("Download {}: {}", url, e))?;
    let bytes = resp
        .bytes()
        .map_err(|e| anyhow::anyhow!("Read body: {}", e))?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("Create cache parent: {}", e))?;
    }
    std::fs::write(cache_path, &bytes).map_err(|e| anyhow::anyhow!("Write cache: {}", e))?;
    Ok(())
}

/// Ensure model and tokenizer are cached; return (onnx path, tokenizer path).
fn ensure_cached(model_name: &str) -> Result<(PathBuf, PathBuf)> {
    if model_name.contains("..") {
        bail!("invalid model name: {}", model_name);
    }
    let model_dir = cache_dir()?.join(model_name.replace('/', "--"));
    let onnx_path = model_dir.join(ONNX_FILE);
    let tokenizer_path = model_dir.join(TOKENIZER_FILE);
    download_to_cache(model_name, ONNX_FILE, &onnx_path)?;
    download_to_cache(model_name, TOKENIZER_FILE, &tokenizer_path)?;
    Ok((onnx_path, tokenizer_path))
}

/// Truncate inside the tokenizer so [CLS]/[SEP] survive on long texts.
fn limit_sequence_length(
    mut tokenizer: tokenizers::Tokenizer,
    max_seq_len: usize,
) -> Result<tokenizers::Tokenizer> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_seq_len,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Configure truncation: {}", e))?;
    Ok(tokenizer)
}

/// A loaded, frozen transformer encoder.
pub struct TractEncoder {
    tokenizer: tokenizers::Tokenizer,
    run: RunFn,
    n_inputs: usize,
    max_seq_len: usize,
    batch_size: usize,
    dims: usize,
}

impl TractEncoder {
    /// Download (if needed) and load `model_name`, then probe its output width.
    pub fn load(model_name: &str, max_seq_len: usize, batch_size: usize) -> Result<Self> {
        let (onnx_path, tokenizer_path) = ensure_cached(model_name)?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Load tokenizer: {}", e))?;
        let tokenizer = limit_sequence_length(tokenizer, max_seq_len)?;

        let model = tract_onnx::onnx()
            .model_for_path(onnx_path)
            .map_err(|e| anyhow::anyhow!("Load ONNX: {}", e))?;
        let n_inputs = model.inputs.len();
        if !(2..=3).contains(&n_inputs) {
            bail!("unsupported encoder graph: expected 2 or 3 inputs, got {}", n_inputs);
        }
        let plan = model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("Optimize: {}", e))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("Build tract runnable: {}", e))?;
        let run: RunFn = Box::new(move |inputs: TVec<TValue>| plan.run(inputs));

        let mut encoder = Self {
            tokenizer,
            run,
            n_inputs,
            max_seq_len,
            batch_size: batch_size.max(1),
            dims: 0,
        };
        let probe = encoder.embed_batch(&["probe".to_string()])?;
        encoder.dims = probe.ncols();
        tracing::info!(model = model_name, dims = encoder.dims, "dense encoder loaded");
        Ok(encoder)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed texts in sequential mini-batches.
    pub fn embed(&self, texts: &[String]) -> Result<Array2<f32>, EmbeddingError> {
        let mut out = Array2::<f32>::zeros((texts.len(), self.dims));
        for (b, chunk) in texts.chunks(self.batch_size).enumerate() {
            let batch = self
                .embed_batch(chunk)
                .map_err(|e| EmbeddingError::Encoder(e.to_string()))?;
            if batch.ncols() != self.dims {
                return Err(EmbeddingError::Encoder(format!(
                    "encoder returned {} columns, expected {}",
                    batch.ncols(),
                    self.dims
                )));
            }
            let start = b * self.batch_size;
            out.slice_mut(ndarray::s![start..start + chunk.len(), ..])
                .assign(&batch);
        }
        Ok(out)
    }

    fn embed_batch(&self, chunk: &[String]) -> Result<Array2<f32>> {
        let encodings = chunk
            .iter()
            .map(|s| {
                self.tokenizer
                    .encode(s.as_str(), true)
                    .map_err(|e| anyhow::anyhow!("Tokenize: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        // Pad to the longest sequence in the batch, truncated to max_seq_len.
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(1)
            .clamp(1, self.max_seq_len);

        let rows = encodings.len();
        let mut input_ids = vec![0i64; rows * seq_len];
        let mut attention_mask = vec![0i64; rows * seq_len];
        let mut type_ids = vec![0i64; rows * seq_len];

        for (i, enc) in encodings.iter().enumerate() {
            let len = enc.get_ids().len().min(seq_len);
            for j in 0..len {
                input_ids[i * seq_len + j] = enc.get_ids()[j] as i64;
                attention_mask[i * seq_len + j] = enc.get_attention_mask()[j] as i64;
                type_ids[i * seq_len + j] = enc.get_type_ids()[j] as i64;
            }
        }

        let shape = (rows, seq_len);
        let mask = Array2::from_shape_vec(shape, attention_mask.clone())
            .map_err(|e| anyhow::anyhow!("Attention mask shape: {}", e))?;
        let mut inputs: TVec<TValue> = tvec!(
            Tensor::from(
                Array2::from_shape_vec(shape, input_ids)
                    .map_err(|e| anyhow::anyhow!("Input ids shape: {}", e))?
            )
            .into(),
            Tensor::from(mask).into(),
        );
        if self.n_inputs == 3 {
            let types = Array2::from_shape_vec(shape, type_ids)
                .map_err(|e| anyhow::anyhow!("Token type ids shape: {}", e))?;
            inputs.push(Tensor::from(types).into());
        }

        let result = (self.run)(inputs)?;
        let output = result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No output tensor"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| anyhow::anyhow!("Output to array: {}", e))?;

        // last_hidden_state: [batch, seq_len, hidden]
        let out_shape = view.shape().to_vec();
        let view = view
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|_| anyhow::anyhow!("Unexpected output shape: {:?}", out_shape))?;
        if out_shape[0] != rows {
            bail!("Unexpected output shape: {:?}", out_shape);
        }

        Ok(mean_pool(view, &attention_mask, seq_len))
    }
}

/// Mean of the hidden states over non-padding positions.
///
/// `mask` is the row-major `(batch, seq_len)` attention mask. A row with no
/// attended positions divides by 1 and comes out as zeros.
fn mean_pool(hidden: ArrayView3<f32>, mask: &[i64], seq_len: usize) -> Array2<f32> {
    let (rows, out_len, dims) = hidden.dim();
    let out_len = out_len.min(seq_len);
    let mut pooled = Array2::<f32>::zeros((rows, dims));
    for i in 0..rows {
        let mut count = 0f32;
        for j in 0..out_len {
            let m = mask[i * seq_len + j] as f32;
            if m == 0.0 {
                continue;
            }
            for k in 0..dims {
                pooled[[i, k]] += hidden[[i, j, k]] * m;
            }
            count += m;
        }
        let count = count.max(1.0);
        pooled.row_mut(i).mapv_inplace(|v| v / count);
    }
    pooled
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_mean_pool_ignores_padding() {
        // row 0: two real tokens then one pad; row 1: all three real
        let hidden = array![
            [[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]],
            [[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]],
        ];
        let mask = [1, 1, 0, 1, 1, 1];
        let pooled = mean_pool(hidden.view(), &mask, 3);
        assert_eq!(pooled.row(0).to_vec(), vec![2.0, 3.0]);
        assert_eq!(pooled.row(1).to_vec(), vec![2.0, 2.0]);

        let plain = hidden.mean_axis(ndarray::Axis(1)).unwrap();
        assert_ne!(pooled.row(0), plain.row(0));
    }

    const TINY_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"SpecialToken": {"id": "[SEP]", "type_id": 0}}
            ],
            "pair": [
                {"SpecialToken": {"id": "[CLS]", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"SpecialToken": {"id": "[SEP]", "type_id": 0}},
                {"Sequence": {"id": "B", "type_id": 1}},
                {"SpecialToken": {"id": "[SEP]", "type_id": 1}}
            ],
            "special_tokens": {
                "[CLS]": {"id": "[CLS]", "ids": [1], "tokens": ["[CLS]"]},
                "[SEP]": {"id": "[SEP]", "ids": [2], "tokens": ["[SEP]"]}
            }
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[UNK]": 0, "[CLS]": 1, "[SEP]": 2, "one": 3, "cent": 4, "spain": 5, "copper": 6},
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn test_truncation_keeps_special_tokens() {
        let tokenizer: tokenizers::Tokenizer = TINY_TOKENIZER.parse().unwrap();
        let tokenizer = limit_sequence_length(tokenizer, 4).unwrap();
        let enc = tokenizer.encode("one cent spain copper", true).unwrap();
        assert_eq!(enc.get_ids(), &[1, 3, 4, 2]);

        let short = tokenizer.encode("cent", true).unwrap();
        assert_eq!(short.get_ids(), &[1, 4, 2]);
    }

    #[test]
    fn test_mean_pool_all_padding_row_is_zero() {
        let hidden = Array3::<f32>::from_elem((1, 2, 3), 5.0);
        let pooled = mean_pool(hidden.view(), &[0, 0], 2);
        assert_eq!(pooled.shape(), &[1, 3]);
        assert!(pooled.iter().all(|&v| v == 0.0));
    }
}
