//! pmteam-bot — a chat-driven project management team.
//!
//! Tasks live as markdown files in status directories; a PM agent drafts,
//! triages and reports on them; role specialists annotate them; chat
//! channels (console, Telegram, HTTP) talk to the agents over the
//! supervisor bus.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod services;
pub mod subsystems;
pub mod supervisor;
pub mod tasks;
