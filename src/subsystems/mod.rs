//! Subsystem modules for the PM team bot.

pub mod agents;
pub mod comms;
pub mod cron;
pub mod llm;
pub mod management;
pub mod runtime;
pub mod tools;
pub mod watcher;
