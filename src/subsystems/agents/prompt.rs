//! Layered prompt builder.
//!
//! System prompts are assembled from plain-text fragments under the prompts
//! directory (`config/prompts/` by default). Layers are appended in order and
//! missing files are skipped, so a deployment can override a single layer
//! without shipping the rest. Layers the agents cannot work without are
//! loaded with [`PromptBuilder::layer_or`], which falls back to an inline
//! default.
//!
//! ```text
//! id.md           who the bot is ({{bot_name}})
//! pm_draft.md     turn a request into a task draft (JSON)
//! pm_triage.md    pick priority and assignee for an inbox task (JSON)
//! specialist.md   role notes on a task ({{role}}, {{focus}})
//! roles/<role>.md optional per-role addendum
//! ```
//!
//! `{{key}}` substitution runs once in [`PromptBuilder::build`], after the
//! layers are joined.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

const SEPARATOR: &str = "\n\n";

pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self { prompts_dir: prompts_dir.into(), parts: Vec::new(), vars: HashMap::new() }
    }

    fn load(&self, filename: &str) -> Option<String> {
        let path = self.prompts_dir.join(filename);
        match fs::read_to_string(&path) {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(_) => {
                debug!(path = %path.display(), "prompt layer not found, skipped");
                None
            }
        }
    }

    /// Append `filename` from the prompts directory, if it exists.
    pub fn layer(mut self, filename: &str) -> Self {
        if let Some(text) = self.load(filename) {
            self.parts.push(text);
        }
        self
    }

    /// Append `filename`, or `fallback` when the file is missing or empty.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        let text = self.load(filename).unwrap_or_else(|| fallback.trim().to_string());
        if !text.is_empty() {
            self.parts.push(text);
        }
        self
    }

    pub fn append(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    pub fn with_vars<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in vars {
            self.vars.insert(k.to_string(), v.to_string());
        }
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> String {
        let mut prompt = self.parts.join(SEPARATOR);
        for (k, v) in &self.vars {
            prompt = prompt.replace(&format!("{{{{{k}}}}}"), v);
        }
        prompt
    }
}

/// Identity layer shared by every agent prompt.
pub fn preamble(prompts_dir: impl Into<PathBuf>, bot_name: &str) -> PromptBuilder {
    PromptBuilder::new(prompts_dir)
        .layer_or("id.md", "You are {{bot_name}}, part of a small software project team.")
        .var("bot_name", bot_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layers_join_in_order_and_missing_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), "first\n").unwrap();
        fs::write(dir.path().join("b.md"), "  second  ").unwrap();
        fs::write(dir.path().join("empty.md"), "\n\n").unwrap();

        let prompt = PromptBuilder::new(dir.path())
            .layer("a.md")
            .layer("missing.md")
            .layer("empty.md")
            .layer("b.md")
            .build();
        assert_eq!(prompt, "first\n\nsecond");
    }

    #[test]
    fn fallback_only_when_file_missing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.md"), "from disk").unwrap();

        let prompt = PromptBuilder::new(dir.path())
            .layer_or("x.md", "inline x")
            .layer_or("y.md", "inline y")
            .build();
        assert_eq!(prompt, "from disk\n\ninline y");
    }

    #[test]
    fn variables_are_substituted_everywhere() {
        let prompt = PromptBuilder::new("/nonexistent")
            .append("You are the {{role}}.")
            .append("As {{role}}, focus on {{focus}}. {{unknown}} stays.")
            .with_vars([("role", "qa"), ("focus", "tests")])
            .build();
        assert_eq!(prompt, "You are the qa.\n\nAs qa, focus on tests. {{unknown}} stays.");
    }

    #[test]
    fn preamble_uses_bot_name() {
        let prompt = preamble("/nonexistent", "pm-bot").build();
        assert!(prompt.contains("pm-bot"));
        assert!(!prompt.contains("{{bot_name}}"));
    }
}
