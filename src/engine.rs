use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::rules;
use crate::types::{Classification, Method};

/// A classification strategy. Implementations must not panic on any input;
/// errors are recovered by the hybrid wrapper or the handler's emergency
/// payload, never surfaced raw to the extension.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn classify(&self, content: &str, subject: &str) -> Result<Classification>;

    /// Reported by /health.
    fn model_status(&self) -> &'static str;
}

/// Model side of the micro-batching queue: one forward pass over a whole
/// batch of preprocessed texts.
#[async_trait]
pub trait BatchedModel: Send + Sync {
    async fn classify_batch(&self, texts: Vec<String>) -> Result<Vec<Classification>>;
}

/// Keyword tables only. Infallible and stateless.
pub struct RuleEngine;

#[async_trait]
impl Engine for RuleEngine {
    async fn classify(&self, content: &str, subject: &str) -> Result<Classification> {
        Ok(rules::classify(content, subject))
    }

    fn model_status(&self) -> &'static str {
        "rule-based"
    }
}

/// Runs the primary (model-backed) engine and answers from the rule tables
/// whenever it fails, optionally bounding each inference with a timeout.
/// A classification request never errors out of this wrapper.
pub struct HybridEngine {
    primary: Arc<dyn Engine>,
    timeout: Option<Duration>,
}

impl HybridEngine {
    pub fn new(primary: Arc<dyn Engine>, timeout: Duration) -> Self {
        Self {
            primary,
            timeout: Some(timeout),
        }
    }

    /// Fallback-on-error only; inference runs unbounded.
    pub fn without_timeout(primary: Arc<dyn Engine>) -> Self {
        Self {
            primary,
            timeout: None,
        }
    }

    fn fall_back(content: &str, subject: &str, cause: &str) -> Classification {
        let mut result = rules::classify(content, subject);
        result.method = Method::Fallback;
        result.reasoning = format!("{} ({cause})", result.reasoning);
        result
    }
}

#[async_trait]
impl Engine for HybridEngine {
    #[tracing::instrument(skip_all, fields(content_len = content.len()))]
    async fn classify(&self, content: &str, subject: &str) -> Result<Classification> {
        let outcome = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.primary.classify(content, subject)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(timeout = ?limit, "model classification timed out, using rule fallback");
                        metrics::counter!("classification_fallbacks_total").increment(1);
                        return Ok(Self::fall_back(content, subject, "model timed out"));
                    }
                }
            }
            None => self.primary.classify(content, subject).await,
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(err) => {
                tracing::warn!(error = %err, "model classification failed, using rule fallback");
                metrics::counter!("classification_fallbacks_total").increment(1);
                Ok(Self::fall_back(content, subject, "model unavailable"))
            }
        }
    }

    fn model_status(&self) -> &'static str {
        self.primary.model_status()
    }
}
