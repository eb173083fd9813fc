use anyhow::{Result, bail};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::softmax;
use candle_transformers::models::debertav2::{
    Config as DebertaV2Config, DebertaV2SeqClassificationModel, Id2Label,
};
use hf_hub::{Repo, RepoType, api::tokio::Api};
use std::path::PathBuf;
use tokenizers::{PaddingParams, Tokenizer};

use crate::config::Config;
use crate::engine::BatchedModel;
use crate::types::{Classification, Label, Method};

/// Model scores below this force the conservative Review label regardless
/// of what the model picked.
const CONFIDENCE_FLOOR: f64 = 0.6;
/// Above this, any spam-adjacent raw label is collapsed straight to Spam.
const SPAM_OVERRIDE: f64 = 0.9;

/// Raw model label string -> application taxonomy. The model is trained on
/// descriptive category phrases; anything it emits outside this table lands
/// in Review.
fn map_label(raw: &str) -> Label {
    match raw.to_lowercase().as_str() {
        "work and business communications" => Label::Work,
        "personal and social messages" => Label::Personal,
        "spam and promotional content" => Label::Spam,
        "important and urgent notifications" => Label::Important,
        "newsletters and updates" => Label::Newsletters,
        "financial and banking communications" => Label::Finance,
        "shopping and e-commerce notifications" => Label::Shopping,
        "travel and booking confirmations" => Label::Travel,
        "educational and learning content" => Label::Education,
        "social media and platform notifications" => Label::SocialMedia,
        "health and medical communications" => Label::Health,
        "legal and official documents" => Label::Legal,
        "technical and it communications" => Label::Technical,
        "project management and collaboration" => Label::Projects,
        "customer service and support" => Label::Support,
        "entertainment and media content" => Label::Entertainment,
        _ => Label::Review,
    }
}

/// Applies the floor and spam override to a raw model prediction.
fn refine(raw_label: &str, score: f64) -> Classification {
    let label = if score < CONFIDENCE_FLOOR {
        Label::Review
    } else if score > SPAM_OVERRIDE && raw_label.to_lowercase().contains("spam") {
        Label::Spam
    } else {
        map_label(raw_label)
    };
    Classification {
        label,
        confidence: (score * 1000.0).round() / 1000.0,
        reasoning: format!("AI classification: {raw_label} ({score:.3})"),
        method: Method::Ai,
    }
}

#[derive(Debug, Clone)]
pub struct DebertaSettings {
    pub model_id: Option<String>,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub use_pth: bool,
    pub cpu: bool,
    pub max_sequence_length: usize,
}

impl From<&Config> for DebertaSettings {
    fn from(config: &Config) -> Self {
        Self {
            model_id: config.model_id.clone(),
            model_path: config.model_path.clone(),
            revision: config.model_revision.clone(),
            use_pth: config.use_pth,
            cpu: config.cpu_only,
            max_sequence_length: config.max_sequence_length,
        }
    }
}

/// DeBERTa sequence classifier over email text. Loaded once at startup;
/// read-only afterwards, shared across request handlers.
pub struct DebertaClassifier {
    model: DebertaV2SeqClassificationModel,
    tokenizer: Tokenizer,
    device: Device,
    id2label: Id2Label,
}

impl DebertaClassifier {
    fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Ok(Device::new_metal(0)?)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    #[tracing::instrument(skip(settings), fields(model_id = ?settings.model_id, cpu = settings.cpu))]
    pub async fn load(settings: DebertaSettings) -> Result<Self> {
        let device = Self::device(settings.cpu)?;

        // Fetch from the Hugging Face Hub unless a local directory is given.
        let (config_filename, tokenizer_filename, weights_filename) = match &settings.model_path {
            Some(base_path) => {
                if !base_path.is_dir() {
                    bail!("Model path {} is not a directory.", base_path.display());
                }
                let weights = if settings.use_pth {
                    base_path.join("pytorch_model.bin")
                } else {
                    base_path.join("model.safetensors")
                };
                (
                    base_path.join("config.json"),
                    base_path.join("tokenizer.json"),
                    weights,
                )
            }
            None => {
                let Some(model_id) = settings.model_id.clone() else {
                    bail!("Either model_id or model_path must be specified");
                };
                let repo = Repo::with_revision(model_id, RepoType::Model, settings.revision.clone());
                let api = Api::new()?.repo(repo);
                let weights = if settings.use_pth {
                    api.get("pytorch_model.bin").await?
                } else {
                    api.get("model.safetensors").await?
                };
                (
                    api.get("config.json").await?,
                    api.get("tokenizer.json").await?,
                    weights,
                )
            }
        };

        let model_config = std::fs::read_to_string(config_filename)?;
        let model_config: DebertaV2Config = serde_json::from_str(&model_config)?;

        let Some(id2label) = model_config.id2label.clone() else {
            bail!("Id2Label not found in the model configuration");
        };

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: settings.max_sequence_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Tokenizer truncation error: {e}"))?;

        let dtype = candle_transformers::models::debertav2::DTYPE;
        let vb = if settings.use_pth {
            VarBuilder::from_pth(&weights_filename, dtype, &device)?
        } else {
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], dtype, &device)? }
        };

        let vb = vb.set_prefix("deberta");
        let model =
            DebertaV2SeqClassificationModel::load(vb, &model_config, Some(id2label.clone()))?;

        Ok(Self {
            model,
            tokenizer,
            device,
            id2label,
        })
    }
}

#[async_trait]
impl BatchedModel for DebertaClassifier {
    #[tracing::instrument(skip(self, texts), fields(batch_size = texts.len()))]
    async fn classify_batch(&self, texts: Vec<String>) -> Result<Vec<Classification>> {
        let tokenizer = self.tokenizer.clone();
        let (input_ids, attention_mask, token_type_ids) = tokio::task::spawn_blocking(move || {
            let encodings = tokenizer
                .encode_batch(texts, true)
                .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;

            let mut ids = Vec::with_capacity(encodings.len());
            let mut masks = Vec::with_capacity(encodings.len());
            let mut type_ids = Vec::with_capacity(encodings.len());
            for encoding in &encodings {
                ids.push(encoding.get_ids().to_vec());
                masks.push(encoding.get_attention_mask().to_vec());
                type_ids.push(encoding.get_type_ids().to_vec());
            }
            Ok::<_, anyhow::Error>((ids, masks, type_ids))
        })
        .await??;

        let to_tensors = |rows: &[Vec<u32>]| -> Result<Tensor> {
            let tensors: Result<Vec<_>> = rows
                .iter()
                .map(|row| Tensor::new(row.as_slice(), &self.device).map_err(anyhow::Error::from))
                .collect();
            Tensor::stack(&tensors?, 0).map_err(anyhow::Error::from)
        };

        let input_ids = to_tensors(&input_ids)?;
        let attention_mask = to_tensors(&attention_mask)?;
        let token_type_ids = to_tensors(&token_type_ids)?;

        let logits = self
            .model
            .forward(&input_ids, Some(token_type_ids), Some(attention_mask))?;
        let predictions = logits.argmax(1)?.to_vec1::<u32>()?;
        let scores = softmax(&logits, 1)?.to_vec2::<f32>()?;

        Ok(predictions
            .iter()
            .zip(scores.iter())
            .map(|(&prediction, probs)| {
                let raw_label = self
                    .id2label
                    .get(&prediction)
                    .cloned()
                    .unwrap_or_else(|| format!("LABEL_{prediction}"));
                let score = probs
                    .get(prediction as usize)
                    .copied()
                    .unwrap_or_default() as f64;
                refine(&raw_label, score)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_forces_review() {
        let result = refine("work and business communications", 0.45);
        assert_eq!(result.label, Label::Review);
        assert_eq!(result.method, Method::Ai);
    }

    #[test]
    fn confident_prediction_maps_through_taxonomy() {
        let result = refine("financial and banking communications", 0.82);
        assert_eq!(result.label, Label::Finance);
        assert_eq!(result.confidence, 0.82);
    }

    #[test]
    fn very_confident_spam_label_overrides_to_spam() {
        let result = refine("spam and promotional content", 0.95);
        assert_eq!(result.label, Label::Spam);
    }

    #[test]
    fn unknown_raw_label_maps_to_review() {
        let result = refine("LABEL_42", 0.99);
        assert_eq!(result.label, Label::Review);
    }

    #[test]
    fn confidence_is_rounded_to_three_decimals() {
        let result = refine("work and business communications", 0.87654);
        assert_eq!(result.confidence, 0.877);
    }
}
