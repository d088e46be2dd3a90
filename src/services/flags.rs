//! Runtime feature flags.
//!
//! Defaults are overlaid by the `[features]` config table and can be flipped
//! from chat (`/flag <name> on|off`). Flags gate the optional behaviours of the
//! PM agent; an unknown name reads as disabled.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::info;

pub const AUTO_TRIAGE: &str = "auto_triage";
pub const STANDUP: &str = "standup";
pub const NOTIFY_CHANGES: &str = "notify_changes";
pub const LLM_DRAFTING: &str = "llm_drafting";
pub const GIT_AUTOMATION: &str = "git_automation";

/// Shared flag set. Wrap in an `Arc` to share.
pub struct FeatureFlags {
    flags: RwLock<BTreeMap<String, bool>>,
}

impl FeatureFlags {
    pub fn new(overrides: &HashMap<String, bool>) -> Self {
        let mut flags = BTreeMap::from([
            (AUTO_TRIAGE.to_string(), true),
            (STANDUP.to_string(), true),
            (NOTIFY_CHANGES.to_string(), true),
            (LLM_DRAFTING.to_string(), true),
            (GIT_AUTOMATION.to_string(), false),
        ]);
        for (name, enabled) in overrides {
            flags.insert(name.to_ascii_lowercase(), *enabled);
        }
        Self { flags: RwLock::new(flags) }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        let flags = self.flags.read().unwrap_or_else(|p| p.into_inner());
        flags.get(&name.to_ascii_lowercase()).copied().unwrap_or(false)
    }

    /// Set a flag, returning its previous value (if it existed).
    pub fn set(&self, name: &str, enabled: bool) -> Option<bool> {
        let name = name.to_ascii_lowercase();
        let mut flags = self.flags.write().unwrap_or_else(|p| p.into_inner());
        let previous = flags.insert(name.clone(), enabled);
        info!(flag = %name, enabled, ?previous, "feature flag set");
        previous
    }

    /// All flags sorted by name.
    pub fn list(&self) -> Vec<(String, bool)> {
        let flags = self.flags.read().unwrap_or_else(|p| p.into_inner());
        flags.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Parse `on`/`off` style values from chat.
pub fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" | "enable" | "enabled" => Some(true),
        "off" | "false" | "no" | "0" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}
