//! Token usage accounting across a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Running totals for one provider.
#[derive(Debug, Default)]
pub struct UsageTally {
    calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl UsageTally {
    pub fn record(&self, response: &CompletionResponse) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(u64::from(response.input_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(response.output_tokens), Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens.load(Ordering::Relaxed)
    }

    /// Estimated USD cost given per-token prices.
    pub fn estimated_cost(&self, (input_price, output_price): (Decimal, Decimal)) -> Decimal {
        Decimal::from(self.input_tokens()) * input_price
            + Decimal::from(self.output_tokens()) * output_price
    }
}

/// Wraps a provider and tallies every successful call.
pub struct MeteredProvider {
    inner: Arc<dyn LlmProvider>,
    tally: UsageTally,
}

impl MeteredProvider {
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self {
            inner,
            tally: UsageTally::default(),
        }
    }

    pub fn tally(&self) -> &UsageTally {
        &self.tally
    }

    /// Log the totals at the end of a run.
    pub fn log_summary(&self) {
        let cost = self.tally.estimated_cost(self.inner.cost_per_token());
        info!(
            model = %self.inner.model_name(),
            calls = self.tally.calls(),
            input_tokens = self.tally.input_tokens(),
            output_tokens = self.tally.output_tokens(),
            estimated_cost_usd = %cost.round_dp(4),
            "LLM usage"
        );
    }
}

#[async_trait]
impl LlmProvider for MeteredProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        self.inner.cost_per_token()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self.inner.complete(request).await?;
        self.tally.record(&response);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::llm::provider::ChatMessage;

    struct FixedLlm;

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (dec!(0.000001), dec!(0.000002))
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "ok".into(),
                input_tokens: 100,
                output_tokens: 50,
            })
        }
    }

    #[tokio::test]
    async fn metered_provider_accumulates_usage() {
        let metered = MeteredProvider::new(Arc::new(FixedLlm));
        for _ in 0..2 {
            metered
                .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
                .await
                .unwrap();
        }
        assert_eq!(metered.tally().calls(), 2);
        assert_eq!(metered.tally().input_tokens(), 200);
        assert_eq!(
            metered.tally().estimated_cost(metered.cost_per_token()),
            dec!(0.0004)
        );
    }
}
