use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::{Instant, interval};

use crate::config::BatchConfig;
use crate::engine::{BatchedModel, Engine};
use crate::sanitize::preprocess_for_model;
use crate::types::{Classification, Label, Method};

type ResponseSender = oneshot::Sender<Result<Classification>>;

#[derive(Debug)]
struct QueuedEmail {
    text: String,
    response_tx: ResponseSender,
}

/// Front half of the micro-batching queue. Each call enqueues one
/// preprocessed email and waits for the batch processor to answer; emails
/// arriving from concurrent requests share a forward pass.
pub struct NeuralEngine {
    request_tx: flume::Sender<QueuedEmail>,
}

impl NeuralEngine {
    pub fn new<T: BatchedModel + 'static>(
        config: BatchConfig,
        model: T,
    ) -> (Self, BatchProcessor<T>) {
        let (request_tx, request_rx) = flume::bounded(0); // Rendezvous channel

        let processor = BatchProcessor {
            request_rx,
            config,
            queue: VecDeque::new(),
            model,
        };

        (Self { request_tx }, processor)
    }
}

#[async_trait]
impl Engine for NeuralEngine {
    #[tracing::instrument(skip_all, fields(content_len = content.len()))]
    async fn classify(&self, content: &str, subject: &str) -> Result<Classification> {
        let text = preprocess_for_model(content, subject);
        if text.is_empty() {
            // Nothing for the model to look at; don't waste a batch slot.
            return Ok(Classification {
                label: Label::Review,
                confidence: 0.1,
                reasoning: "Empty or invalid email content".into(),
                method: Method::Ai,
            });
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send_async(QueuedEmail { text, response_tx })
            .await
            .map_err(|_| anyhow::anyhow!("Inference queue is closed"))?;

        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("Response channel closed"))?
    }

    fn model_status(&self) -> &'static str {
        if self.request_tx.is_disconnected() {
            "error"
        } else {
            "loaded"
        }
    }
}

/// Back half of the queue: collects emails until the batch fills or the
/// tick fires, then runs one model pass and fans results back out.
pub struct BatchProcessor<T: BatchedModel> {
    request_rx: flume::Receiver<QueuedEmail>,
    config: BatchConfig,
    queue: VecDeque<QueuedEmail>,
    model: T,
}

impl<T: BatchedModel> BatchProcessor<T> {
    #[tracing::instrument(skip(self))]
    pub async fn run_forever(mut self) -> Result<()> {
        let mut tick_timer = interval(self.config.tick_duration);

        loop {
            tokio::select! {
                email = self.request_rx.recv_async() => {
                    match email {
                        Ok(email) => {
                            self.queue.push_back(email);
                            if self.queue.len() >= self.config.batch_size {
                                tracing::debug!(batch_size = self.config.batch_size, "Batch full, processing immediately");
                                self.process_batch().await;
                            }
                        }
                        Err(_) => {
                            tracing::info!("Channel closed, processing remaining emails and exiting");
                            if !self.queue.is_empty() {
                                self.process_batch().await;
                            }
                            break Ok(());
                        }
                    }
                }

                _ = tick_timer.tick() => {
                    if !self.queue.is_empty() {
                        tracing::debug!(pending = self.queue.len(), "Tick fired, processing pending emails");
                        self.process_batch().await;
                    }
                }
            }
        }
    }

    async fn process_batch(&mut self) {
        let batch_start = Instant::now();

        let batch: Vec<_> = self
            .queue
            .drain(..self.config.batch_size.min(self.queue.len()))
            .collect();
        if batch.is_empty() {
            return;
        }

        let texts: Vec<_> = batch.iter().map(|email| email.text.clone()).collect();
        let senders: Vec<_> = batch.into_iter().map(|email| email.response_tx).collect();

        match self.model.classify_batch(texts).await {
            Ok(results) => {
                for (response_tx, result) in senders.into_iter().zip(results) {
                    let _ = response_tx.send(Ok(result));
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Batch inference failed");
                for response_tx in senders {
                    let _ = response_tx.send(Err(anyhow::anyhow!("Batch inference failed: {err}")));
                }
            }
        }

        tracing::info!(
            processing_time_ms = batch_start.elapsed().as_millis(),
            "Batch processed"
        );
    }
}
