//! LLM subsystem — serves `llm/*` bus requests with the configured provider.
//!
//! Methods:
//! - `llm/complete` with `LlmRequest` → `CommsMessage` carrying the reply.
//! - `llm/health` → runs a live probe and returns the health state as JSON.
//!
//! Each request runs in its own task; the supervisor loop never waits on HTTP.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError, providers};
use crate::supervisor::bus::{BusError, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::dispatch::BusHandler;
use crate::supervisor::health::HealthReporter;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct LlmSubsystem {
    provider: LlmProvider,
    reporter: Option<HealthReporter>,
}

impl LlmSubsystem {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self::with_provider(providers::build(config, api_key)?))
    }

    pub fn with_provider(provider: LlmProvider) -> Self {
        Self { provider, reporter: None }
    }

    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Probe the provider now and then every minute until shutdown.
    pub fn spawn_health_checker(&self, shutdown: CancellationToken) {
        let Some(reporter) = self.reporter.clone() else {
            return;
        };
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => run_check(&provider, &reporter).await,
                }
            }
        });
    }
}

async fn run_check(provider: &LlmProvider, reporter: &HealthReporter) {
    let details = Some(serde_json::json!({ "model": provider.model_name() }));
    match provider.ping().await {
        Ok(()) => {
            debug!(model = provider.model_name(), "llm provider reachable");
            reporter.set_healthy_with("ok", details).await;
        }
        Err(e) => {
            warn!(model = provider.model_name(), error = %e, "llm provider unreachable");
            reporter.set_unhealthy(format!("provider unreachable: {e}")).await;
        }
    }
}

impl BusHandler for LlmSubsystem {
    fn prefix(&self) -> &str {
        "llm"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match (method, payload) {
            ("llm/complete", BusPayload::LlmRequest { channel_id, content, system }) => {
                let provider = self.provider.clone();
                debug!(%channel_id, content_len = content.len(), "dispatching to llm provider");
                tokio::spawn(async move {
                    let result = provider
                        .complete(&content, system.as_deref())
                        .await
                        .map(|resp| {
                            if let Some(u) = &resp.usage {
                                debug!(input_tokens = u.input_tokens, output_tokens = u.output_tokens, "llm usage");
                            }
                            BusPayload::CommsMessage { channel_id, content: resp.text, usage: resp.usage }
                        })
                        .map_err(|e| BusError::internal(e.to_string()));
                    let _ = reply_tx.send(result);
                });
            }
            ("llm/complete", _) => {
                let _ = reply_tx.send(Err(BusError::bad_request("llm/complete requires LlmRequest payload")));
            }
            ("llm/health", _) => {
                let provider = self.provider.clone();
                let reporter = self.reporter.clone();
                tokio::spawn(async move {
                    let data = match reporter {
                        Some(r) => {
                            run_check(&provider, &r).await;
                            serde_json::to_string(&r.get_current().await).unwrap_or_default()
                        }
                        None => serde_json::json!({ "id": "llm", "healthy": true }).to_string(),
                    };
                    let _ = reply_tx.send(Ok(BusPayload::JsonResponse { data }));
                });
            }
            (other, _) => {
                let _ = reply_tx.send(Err(BusError::new(
                    ERR_METHOD_NOT_FOUND,
                    format!("llm method not found: {other}"),
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::supervisor::health::HealthRegistry;

    fn call(sub: &LlmSubsystem, method: &str, payload: BusPayload) -> oneshot::Receiver<BusResult> {
        let (tx, rx) = oneshot::channel();
        sub.handle_request(method, payload, tx);
        rx
    }

    #[tokio::test]
    async fn complete_replies_with_comms_message() {
        let sub = LlmSubsystem::with_provider(LlmProvider::Dummy(DummyProvider));
        let payload = BusPayload::LlmRequest { channel_id: "pty0".into(), content: "hello".into(), system: None };
        match call(&sub, "llm/complete", payload).await.unwrap().unwrap() {
            BusPayload::CommsMessage { channel_id, content, .. } => {
                assert_eq!(channel_id, "pty0");
                assert_eq!(content, "[echo] hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_payload_and_unknown_method() {
        let sub = LlmSubsystem::with_provider(LlmProvider::Dummy(DummyProvider));
        let err = call(&sub, "llm/complete", BusPayload::Empty).await.unwrap().unwrap_err();
        assert_eq!(err.code, crate::supervisor::bus::ERR_BAD_REQUEST);
        let err = call(&sub, "llm/nope", BusPayload::Empty).await.unwrap().unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn health_writes_reporter() {
        let registry = HealthRegistry::new();
        let sub = LlmSubsystem::with_provider(LlmProvider::Dummy(DummyProvider))
            .with_health_reporter(registry.reporter("llm"));
        let reply = call(&sub, "llm/health", BusPayload::Empty).await.unwrap().unwrap();
        assert!(matches!(reply, BusPayload::JsonResponse { data } if data.contains("\"healthy\":true")));
        assert!(registry.all_healthy().await);
    }
}
