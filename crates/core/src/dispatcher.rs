//! Bounded-concurrency batch classification.
//!
//! Inputs are split into ordered batches and fanned out through a fixed-size
//! worker pool; output order always matches input order no matter which batch
//! finishes first. The pool bound is local to one dispatch call and
//! independent of the per-provider slot bound inside the rate limiter.

use crate::cancel::CancelFlag;
use crate::config::ClassificationConfig;
use crate::error::EngineError;
use crate::models::{ClassificationInput, ClassificationResult, ClassifyContext};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};
use vault_providers::{Classifier, ProviderError, ProviderRegistry, RateLimiter};

pub struct ClassificationDispatcher {
    registry: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
    cfg: ClassificationConfig,
}

struct BatchOutcome {
    batch_idx: usize,
    result: Result<Vec<ClassificationResult>, ProviderError>,
}

impl ClassificationDispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        limiter: Arc<RateLimiter>,
        cfg: ClassificationConfig,
    ) -> Self {
        Self {
            registry,
            limiter,
            cfg,
        }
    }

    /// Classify every input, preserving input order in the output. A failed
    /// call marks its own items as errors and never aborts the rest.
    pub async fn dispatch(
        &self,
        inputs: &[ClassificationInput],
        ctx: &ClassifyContext,
        cancel: &CancelFlag,
    ) -> Result<Vec<Result<ClassificationResult, EngineError>>, EngineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let indexed: Vec<(usize, ClassificationInput)> =
            inputs.iter().cloned().enumerate().collect();
        let mut results = self
            .run_stage(
                &self.cfg.provider,
                indexed,
                self.cfg.batch_size.max(1),
                ctx,
                cancel,
            )
            .await?;

        // Second stage: low-confidence results go back out one at a time
        // through the precise provider.
        if let Some(refine) = self.cfg.refine_provider.clone() {
            let escalate: Vec<(usize, ClassificationInput)> = results
                .iter()
                .enumerate()
                .filter_map(|(i, r)| match r {
                    Ok(res) if res.confidence < self.cfg.escalation_threshold => {
                        Some((i, inputs[i].clone()))
                    }
                    _ => None,
                })
                .collect();
            if !escalate.is_empty() {
                debug!(count = escalate.len(), provider = %refine, "escalating low-confidence results");
                let refined = self
                    .run_stage(&refine, escalate.clone(), 1, ctx, cancel)
                    .await?;
                for ((idx, _), refined_result) in escalate.into_iter().zip(refined) {
                    // Keep the first-stage answer when the refine pass fails.
                    if let Ok(res) = refined_result {
                        results[idx] = Ok(res);
                    }
                }
            }
        }

        Ok(results)
    }

    /// One dispatch stage: fixed batch size, bounded fan-out, ordered
    /// reassembly keyed by batch index.
    async fn run_stage(
        &self,
        provider: &str,
        items: Vec<(usize, ClassificationInput)>,
        batch_size: usize,
        ctx: &ClassifyContext,
        cancel: &CancelFlag,
    ) -> Result<Vec<Result<ClassificationResult, EngineError>>, EngineError> {
        let classifier = self
            .registry
            .classifier(Some(provider))
            .map_err(EngineError::from)?;

        let batches: Vec<Vec<(usize, ClassificationInput)>> = items
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let batch_count = batches.len();
        let pool = Arc::new(Semaphore::new(self.cfg.max_concurrent_batches.max(1)));
        let mut join_set: JoinSet<Result<BatchOutcome, EngineError>> = JoinSet::new();

        for (batch_idx, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                join_set.abort_all();
                return Err(EngineError::Cancelled);
            }
            let permit = pool
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Unknown("worker pool closed".into()))?;
            let classifier = classifier.clone();
            let limiter = self.limiter.clone();
            let provider = provider.to_string();
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let inputs: Vec<ClassificationInput> =
                batch.iter().map(|(_, input)| input.clone()).collect();
            let max_attempts = self.cfg.max_attempts.max(1);

            join_set.spawn(async move {
                let _permit = permit;
                let result = classify_batch_with_retry(
                    &*classifier,
                    &limiter,
                    &provider,
                    &inputs,
                    &ctx,
                    &cancel,
                    max_attempts,
                )
                .await?;
                Ok(BatchOutcome { batch_idx, result })
            });
        }

        let mut ordered: Vec<Option<Result<Vec<ClassificationResult>, ProviderError>>> =
            (0..batch_count).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(inner) => inner?,
                Err(e) if e.is_cancelled() => return Err(EngineError::Cancelled),
                Err(e) => return Err(EngineError::Unknown(format!("worker task failed: {e}"))),
            };
            ordered[outcome.batch_idx] = Some(outcome.result);
        }

        // Flatten back to per-item results in original input order.
        let mut out = Vec::with_capacity(items.len());
        for (batch_idx, batch) in batches.iter().enumerate() {
            let batch_result = ordered[batch_idx]
                .take()
                .unwrap_or(Err(ProviderError::Unknown("batch never completed".into())));
            match batch_result {
                Ok(results) => {
                    for result in results {
                        out.push(Ok(result));
                    }
                }
                Err(e) => {
                    for _ in batch {
                        out.push(Err(EngineError::from(e.clone())));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// One batch through the limiter with the transport retry budget. Quota and
/// transient failures are reported to the limiter (whose growing spacing and
/// cooldown are the backoff) and retried; everything else fails fast.
async fn classify_batch_with_retry(
    classifier: &dyn Classifier,
    limiter: &RateLimiter,
    provider: &str,
    inputs: &[ClassificationInput],
    ctx: &ClassifyContext,
    cancel: &CancelFlag,
    max_attempts: usize,
) -> Result<Result<Vec<ClassificationResult>, ProviderError>, EngineError> {
    let mut last_err = ProviderError::Unknown("no attempts made".into());
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        limiter.acquire(provider).await;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let started = Instant::now();
        match classifier.classify(inputs, ctx).await {
            Ok(results) => {
                limiter.record_success(provider, started.elapsed()).await;
                if results.len() != inputs.len() {
                    return Ok(Err(ProviderError::Parse(format!(
                        "expected {} results, got {}",
                        inputs.len(),
                        results.len()
                    ))));
                }
                return Ok(Ok(results));
            }
            Err(e) => {
                if e.affects_limiter() {
                    limiter.record_failure(provider, e.is_rate_limited()).await;
                }
                warn!(provider, attempt, error = %e, "classification call failed");
                let retryable = e.is_retryable();
                last_err = e;
                if !retryable || attempt == max_attempts {
                    break;
                }
            }
        }
    }
    Ok(Err(last_err))
}
