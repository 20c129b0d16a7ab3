//! Workload implementations for the reference worker
//!
//! The supervised job itself is deliberately boring: either a simulated
//! flaky operation driven by `rand`, or a real HTTP GET against a configured
//! URL. Both return `ResilienceError` so the retry/breaker stack around them
//! sees realistic failures.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::traits::Workload;
use resilience::{ResilienceError, ResilienceResult};

/// Simulated work with a configurable failure rate and latency
pub struct FlakyWorkload {
    failure_rate: f64,
    latency: Duration,
}

impl FlakyWorkload {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
        }
    }
}

impl Default for FlakyWorkload {
    fn default() -> Self {
        Self::new(0.1, Duration::from_millis(200))
    }
}

#[async_trait]
impl Workload for FlakyWorkload {
    async fn perform(&self, cycle: u64) -> ResilienceResult<String> {
        tokio::time::sleep(self.latency).await;

        // ThreadRng is not Send, keep it out of the future's state
        let failed = {
            let mut rng = rand::thread_rng();
            rng.gen::<f64>() < self.failure_rate
        };
        if failed {
            return Err(ResilienceError::operation(format!(
                "simulated failure on cycle {cycle}"
            )));
        }

        Ok(format!("cycle {cycle} completed"))
    }
}

/// Real outbound work: GET a configured URL and report the status
pub struct HttpWorkload {
    client: reqwest::Client,
    url: String,
}

impl HttpWorkload {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Workload for HttpWorkload {
    async fn perform(&self, cycle: u64) -> ResilienceResult<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ResilienceError::operation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResilienceError::operation(format!(
                "unexpected status {status}"
            )));
        }

        Ok(format!("cycle {cycle}: {} -> {status}", self.url))
    }
}
