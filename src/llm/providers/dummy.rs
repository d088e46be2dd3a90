//! Dummy provider — echoes the prompt back prefixed with `[echo]`.
//! Lets the whole bus round-trip run without an API key.

use crate::llm::{LlmResponse, ProviderError};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, content: &str) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse { text: format!("[echo] {content}"), usage: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_prefixes_echo() {
        let reply = DummyProvider.complete("draft a task").await.unwrap();
        assert_eq!(reply.text, "[echo] draft a task");
        assert!(reply.usage.is_none());
    }
}
