//! Push-based health registry.
//!
//! Subsystems hold a [`HealthReporter`] and write their state when it
//! changes; readers (`/health`, `manage/status`, `GET /api/health`) take a
//! cached snapshot and never wait on subsystem I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    pub id: String,
    pub healthy: bool,
    pub message: String,
    /// When this state was written.
    pub since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SubsystemHealth {
    fn new(id: &str, healthy: bool, message: String, details: Option<serde_json::Value>) -> Self {
        Self { id: id.to_string(), healthy, message, since: Utc::now(), details }
    }
}

/// Shared registry; clone freely.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<HashMap<String, SubsystemHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporter(&self, id: impl Into<String>) -> HealthReporter {
        HealthReporter { id: id.into(), registry: self.clone() }
    }

    /// All states sorted by id.
    pub async fn snapshot(&self) -> Vec<SubsystemHealth> {
        let map = self.inner.read().await;
        let mut v: Vec<_> = map.values().cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        v
    }

    /// `true` when nothing is degraded (including when nothing reported yet).
    pub async fn all_healthy(&self) -> bool {
        self.inner.read().await.values().all(|h| h.healthy)
    }

    /// Chat-friendly rendering of the snapshot.
    pub async fn render(&self) -> String {
        let snapshot = self.snapshot().await;
        if snapshot.is_empty() {
            return "no subsystem has reported health yet".to_string();
        }
        snapshot
            .iter()
            .map(|h| {
                let mark = if h.healthy { "ok " } else { "ERR" };
                format!("{mark} {:<10} {}", h.id, h.message)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Per-subsystem write handle.
#[derive(Clone)]
pub struct HealthReporter {
    id: String,
    registry: HealthRegistry,
}

impl HealthReporter {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn set_healthy(&self) {
        self.write(true, "ok".to_string(), None).await;
    }

    pub async fn set_healthy_with(&self, message: impl Into<String>, details: Option<serde_json::Value>) {
        self.write(true, message.into(), details).await;
    }

    pub async fn set_unhealthy(&self, message: impl Into<String>) {
        self.write(false, message.into(), None).await;
    }

    pub async fn get_current(&self) -> Option<SubsystemHealth> {
        self.registry.inner.read().await.get(&self.id).cloned()
    }

    async fn write(&self, healthy: bool, message: String, details: Option<serde_json::Value>) {
        let h = SubsystemHealth::new(&self.id, healthy, message, details);
        self.registry.inner.write().await.insert(self.id.clone(), h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_write_wins() {
        let registry = HealthRegistry::new();
        let watcher = registry.reporter("watcher");

        assert!(watcher.get_current().await.is_none());
        watcher.set_healthy().await;
        watcher.set_unhealthy("watch failed").await;

        let current = watcher.get_current().await.unwrap();
        assert!(!current.healthy);
        assert_eq!(current.message, "watch failed");
        assert!(!registry.all_healthy().await);
    }

    #[tokio::test]
    async fn snapshot_sorted_and_rendered() {
        let registry = HealthRegistry::new();
        assert!(registry.all_healthy().await);
        assert!(registry.render().await.contains("no subsystem"));

        registry.reporter("tools").set_healthy().await;
        registry.reporter("agents").set_healthy_with("3 agents", None).await;
        registry.reporter("llm").set_unhealthy("timeout").await;

        let ids: Vec<_> = registry.snapshot().await.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["agents", "llm", "tools"]);

        let text = registry.render().await;
        assert!(text.contains("ERR llm"));
        assert!(text.contains("3 agents"));
    }
}
